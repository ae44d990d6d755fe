//! User API and health handlers.
//!
//! Handlers translate between HTTP and the use case: they parse input, pick
//! the use case from the request context and map [`AppError`]s onto Problem
//! Details. Each one runs inside a `handler.<operation>` span.
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, rejection::JsonRejection},
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use opentelemetry::{KeyValue, trace::SpanKind};
use serde::Deserialize;

use crate::{
    adapters::{
        middleware::RequestCtx,
        problem::{ProblemDetail, ProblemType},
        response::ApiResponse,
    },
    core::{
        context::RequestContext,
        error::AppError,
        logging::{self, Layer},
        user::UserId,
        user_usecase::UserUseCase,
    },
    telemetry::SpanScope,
};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
}

/// Opens the handler span with the request tags every handler carries.
pub(crate) fn handler_span(
    ctx: &RequestContext,
    operation: &str,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> (RequestContext, SpanScope) {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    ctx.start_span(
        format!("handler.{operation}"),
        SpanKind::Internal,
        vec![
            KeyValue::new("http.method", method.to_string()),
            KeyValue::new("http.url", uri.path().to_string()),
            KeyValue::new("http.user_agent", user_agent),
        ],
    )
}

/// The injected interactor, or one built from the locator.
pub(crate) fn resolve_usecase(ctx: &RequestContext) -> Option<Arc<UserUseCase>> {
    ctx.interactor::<UserUseCase>().or_else(|| {
        ctx.locator()
            .map(|locator| Arc::new(UserUseCase::from_locator(&locator)))
    })
}

fn missing_usecase(ctx: &RequestContext, instance: &str) -> Response {
    let err = AppError::internal("no repository locator configured", "request context is incomplete");
    logging::app_error(ctx, Layer::Handler, "Cannot resolve user use case", &err);
    ProblemDetail::from_app_error(&err, instance)
        .with_trace(&ctx.trace_ids())
        .into_response()
}

fn problem_for(ctx: &RequestContext, err: &AppError, instance: &str) -> ProblemDetail {
    ProblemDetail::from_app_error(err, instance).with_trace(&ctx.trace_ids())
}

/// `GET /` and `GET /health`.
pub async fn health(
    RequestCtx(ctx): RequestCtx,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let (ctx, span) = handler_span(&ctx, "health_check", &method, &uri, &headers);
    span.set_attribute(KeyValue::new("health.status", "healthy"));
    logging::info(&ctx, Layer::Handler, "Health check endpoint called");

    ApiResponse::message("Service is healthy").into_response()
}

/// `POST /api/users`.
pub async fn create_user(
    RequestCtx(ctx): RequestCtx,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Response {
    let (ctx, span) = handler_span(&ctx, "create_user", &method, &uri, &headers);
    let instance = uri.path();

    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            logging::warn(&ctx, Layer::Handler, "Rejected oversized request body");
            span.record_error("payload too large");
            return ProblemDetail::new(
                ProblemType::BadRequest,
                "Payload Too Large",
                StatusCode::PAYLOAD_TOO_LARGE,
                rejection.body_text(),
                instance,
                false,
            )
            .with_trace(&ctx.trace_ids())
            .into_response();
        }
        Err(rejection) => {
            let reason = rejection.body_text();
            let err = AppError::Validation {
                field: "body",
                message: "Invalid request body".to_string(),
            };
            logging::app_error(&ctx, Layer::Handler, "Failed to decode request body", &err);
            span.record_error(reason.clone());
            return problem_for(&ctx, &err, instance)
                .with_extra("parse_error", reason)
                .into_response();
        }
    };
    span.set_attributes([
        KeyValue::new("user.name", request.name.clone()),
        KeyValue::new("user.email", request.email.clone()),
    ]);

    let Some(usecase) = resolve_usecase(&ctx) else {
        return missing_usecase(&ctx, instance);
    };

    match usecase.create_user(&ctx, &request.name, &request.email).await {
        Ok(user) => {
            span.set_attribute(KeyValue::new("user.id", user.id));
            logging::info(&ctx, Layer::Handler, "User created successfully");
            ApiResponse::created(user, "User created successfully").into_response()
        }
        Err(err) => {
            logging::app_error(&ctx, Layer::Handler, "Failed to create user", &err);
            span.record_error(err.to_string());
            problem_for(&ctx, &err, instance)
                .with_extra("user.email", request.email)
                .into_response()
        }
    }
}

/// `GET /api/users/{id}`.
pub async fn get_user(
    RequestCtx(ctx): RequestCtx,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(raw_id): Path<String>,
) -> Response {
    let (ctx, span) = handler_span(&ctx, "get_user", &method, &uri, &headers);
    let instance = uri.path();

    let id: UserId = match raw_id.parse() {
        Ok(id) => id,
        Err(_) => {
            logging::warn(&ctx, Layer::Handler, format_args!("Invalid user ID '{raw_id}'"));
            span.record_error("Invalid user ID");
            return ProblemDetail::validation("User ID must be a valid integer", instance)
                .with_extra("provided_id", raw_id)
                .with_trace(&ctx.trace_ids())
                .into_response();
        }
    };
    span.set_attribute(KeyValue::new("user.id", id));

    let Some(usecase) = resolve_usecase(&ctx) else {
        return missing_usecase(&ctx, instance);
    };

    match usecase.get_user(&ctx, id).await {
        Ok(user) => {
            span.set_attributes([
                KeyValue::new("user.name", user.name.clone()),
                KeyValue::new("user.email", user.email.clone()),
            ]);
            logging::info(&ctx, Layer::Handler, "User retrieved successfully");
            ApiResponse::ok(user).into_response()
        }
        Err(err) => {
            logging::app_error(&ctx, Layer::Handler, "Failed to get user", &err);
            span.record_error(err.to_string());
            let mut problem = problem_for(&ctx, &err, instance);
            if matches!(err, AppError::NotFound { .. }) {
                problem = problem.with_extra("user.id", id);
            }
            problem.into_response()
        }
    }
}

/// `GET /api/users`.
pub async fn get_all_users(
    RequestCtx(ctx): RequestCtx,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let (ctx, span) = handler_span(&ctx, "get_all_users", &method, &uri, &headers);
    let instance = uri.path();

    let Some(usecase) = resolve_usecase(&ctx) else {
        return missing_usecase(&ctx, instance);
    };

    match usecase.get_all_users(&ctx).await {
        Ok(users) => {
            span.set_attribute(KeyValue::new("users.count", users.len() as i64));
            logging::info(&ctx, Layer::Handler, "Users retrieved successfully");
            ApiResponse::ok(users).into_response()
        }
        Err(err) => {
            logging::app_error(&ctx, Layer::Handler, "Failed to get users", &err);
            span.record_error(err.to_string());
            problem_for(&ctx, &err, instance).into_response()
        }
    }
}
