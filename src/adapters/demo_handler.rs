//! Endpoints that produce known telemetry shapes on demand: a slow request,
//! alerting and non-alerting errors, a warning and a panic.
use std::time::Duration;

use axum::{
    http::{HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
};
use opentelemetry::KeyValue;
use serde_json::json;

use crate::{
    adapters::{
        http_handler::{handler_span, resolve_usecase},
        middleware::RequestCtx,
        problem::ProblemDetail,
        response::ApiResponse,
    },
    core::{
        error::AppError,
        logging::{self, Layer},
    },
};

const SLOW_DELAY: Duration = Duration::from_secs(2);

/// `GET /api/slow`.
///
/// Answers 503 early when the server starts shutting down. A client that
/// disconnects just drops this future, so that case never reaches the branch.
pub async fn slow(RequestCtx(ctx): RequestCtx, method: Method, uri: Uri, headers: HeaderMap) -> Response {
    let (ctx, span) = handler_span(&ctx, "slow_endpoint", &method, &uri, &headers);
    span.set_attributes([
        KeyValue::new("test.type", "slow_request"),
        KeyValue::new("operation", "slow_query_simulation"),
    ]);
    logging::info(&ctx, Layer::Handler, "Slow endpoint called - simulating 2 second delay");

    tokio::select! {
        _ = tokio::time::sleep(SLOW_DELAY) => {}
        _ = ctx.cancellation().cancelled() => {
            logging::warn(&ctx, Layer::Handler, "Slow operation cancelled before completion");
            span.record_error("request cancelled");
            return ProblemDetail::from_app_error(&AppError::Cancelled, uri.path())
                .with_trace(&ctx.trace_ids())
                .into_response();
        }
    }

    logging::info(&ctx, Layer::Handler, "Slow operation completed");
    ApiResponse::ok(json!({
        "message": "This endpoint intentionally took 2 seconds to respond",
        "delay": "2s",
    }))
    .with_message("Slow request completed successfully")
    .into_response()
}

/// `GET /api/error`: a system error that alerts.
pub async fn error(RequestCtx(ctx): RequestCtx, method: Method, uri: Uri, headers: HeaderMap) -> Response {
    let (ctx, span) = handler_span(&ctx, "error_endpoint", &method, &uri, &headers);
    span.set_attribute(KeyValue::new("test.type", "error_simulation"));
    logging::info(&ctx, Layer::Handler, "Error endpoint called - will generate an error");

    let err = AppError::internal("simulated database connection error", "connection refused");
    logging::app_error(&ctx, Layer::Handler, "Simulated error occurred", &err);
    span.set_attributes([
        KeyValue::new("error.type", "database_error"),
        KeyValue::new("error.stack", "user_repository.rs:42"),
    ]);

    ProblemDetail::internal(
        "Simulated database connection error for tracing demonstration",
        uri.path(),
        true,
    )
    .with_extra("error.stack", "user_repository.rs:42")
    .with_extra("db.operation", "connection_test")
    .with_trace(&ctx.trace_ids())
    .into_response()
}

/// `GET /api/expected-error`: a conflict that must not alert.
pub async fn expected_error(
    RequestCtx(ctx): RequestCtx,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let (ctx, span) = handler_span(&ctx, "expected_error_endpoint", &method, &uri, &headers);
    span.set_attribute(KeyValue::new("test.type", "expected_error_simulation"));
    logging::info(&ctx, Layer::Handler, "Expected error endpoint called");

    let err = AppError::Conflict("user already exists".to_string());
    logging::app_error(&ctx, Layer::Handler, "Expected error occurred", &err);

    ProblemDetail::conflict(
        "User with email 'duplicate@example.com' already exists. This is an expected error that should not trigger alerts.",
        uri.path(),
    )
    .with_extra("user.email", "duplicate@example.com")
    .with_extra("validation.field", "email")
    .with_trace(&ctx.trace_ids())
    .into_response()
}

/// `GET /api/unexpected-error`: a lost backend connection that alerts.
pub async fn unexpected_error(
    RequestCtx(ctx): RequestCtx,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let (ctx, span) = handler_span(&ctx, "unexpected_error_endpoint", &method, &uri, &headers);
    span.set_attribute(KeyValue::new("test.type", "unexpected_error_simulation"));
    logging::info(&ctx, Layer::Handler, "Unexpected error endpoint called");

    let err = AppError::internal("database connection lost", "mysql.example.com:3306");
    logging::app_error(&ctx, Layer::Handler, "Unexpected error occurred", &err);

    ProblemDetail::internal(
        "Database connection to mysql.example.com was lost unexpectedly. This system error should trigger an alert for immediate investigation.",
        uri.path(),
        true,
    )
    .with_extra("db.host", "mysql.example.com")
    .with_extra("db.port", 3306)
    .with_extra("retry.attempted", false)
    .with_trace(&ctx.trace_ids())
    .into_response()
}

/// `GET /api/warn`.
pub async fn warn(RequestCtx(ctx): RequestCtx, method: Method, uri: Uri, headers: HeaderMap) -> Response {
    let (ctx, span) = handler_span(&ctx, "warn_endpoint", &method, &uri, &headers);
    span.set_attribute(KeyValue::new("test.type", "warning_simulation"));
    logging::info(&ctx, Layer::Handler, "Warn endpoint called");
    logging::warn(
        &ctx,
        Layer::Handler,
        "Performance degradation detected: response_time_ms=1500 threshold_ms=1000",
    );

    ApiResponse::ok(json!({
        "message": "Warning logged successfully",
        "level": "warn",
        "type": "performance_degradation",
    }))
    .with_message("Warning endpoint completed")
    .into_response()
}

/// `GET /api/panic`: the use case panics; the recovery middleware answers.
pub async fn panic(RequestCtx(ctx): RequestCtx, method: Method, uri: Uri, headers: HeaderMap) -> Response {
    let (ctx, span) = handler_span(&ctx, "panic_endpoint", &method, &uri, &headers);
    span.set_attribute(KeyValue::new("test.type", "panic_simulation"));
    logging::info(
        &ctx,
        Layer::Handler,
        "Panic endpoint called - will trigger panic in use case layer",
    );

    let Some(usecase) = resolve_usecase(&ctx) else {
        let err = AppError::internal("no repository locator configured", "request context is incomplete");
        return ProblemDetail::from_app_error(&err, uri.path())
            .with_trace(&ctx.trace_ids())
            .into_response();
    };

    match usecase.test_panic(&ctx).await {
        Ok(()) => ApiResponse::message("No panic occurred").into_response(),
        Err(err) => ProblemDetail::from_app_error(&err, uri.path())
            .with_trace(&ctx.trace_ids())
            .into_response(),
    }
}
