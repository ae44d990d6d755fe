//! Problem Details (RFC 9457) error bodies.
//!
//! `notify` is part of the alerting contract: `true` pages, `false` does not.
use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{core::error::AppError, telemetry::TraceIds};

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

const ERROR_TYPE_BASE: &str = "https://tracetour.example.com/errors";

/// Stable problem type URIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemType {
    Validation,
    NotFound,
    Conflict,
    Unauthorized,
    Forbidden,
    Internal,
    BadRequest,
    ServiceUnavailable,
}

impl ProblemType {
    pub fn slug(&self) -> &'static str {
        match self {
            ProblemType::Validation => "validation",
            ProblemType::NotFound => "not-found",
            ProblemType::Conflict => "conflict",
            ProblemType::Unauthorized => "unauthorized",
            ProblemType::Forbidden => "forbidden",
            ProblemType::Internal => "internal",
            ProblemType::BadRequest => "bad-request",
            ProblemType::ServiceUnavailable => "service-unavailable",
        }
    }

    pub fn uri(&self) -> String {
        format!("{ERROR_TYPE_BASE}/{}", self.slug())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProblemDetail {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub instance: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub span_id: String,
    pub notify: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProblemDetail {
    pub fn new(
        problem_type: ProblemType,
        title: impl Into<String>,
        status: StatusCode,
        detail: impl Into<String>,
        instance: impl Into<String>,
        notify: bool,
    ) -> Self {
        Self {
            problem_type: problem_type.uri(),
            title: title.into(),
            status: status.as_u16(),
            detail: detail.into(),
            instance: instance.into(),
            trace_id: String::new(),
            span_id: String::new(),
            notify,
            extra: Map::new(),
        }
    }

    pub fn internal(detail: impl Into<String>, instance: impl Into<String>, notify: bool) -> Self {
        Self::new(
            ProblemType::Internal,
            "Internal Server Error",
            StatusCode::INTERNAL_SERVER_ERROR,
            detail,
            instance,
            notify,
        )
    }

    pub fn validation(detail: impl Into<String>, instance: impl Into<String>) -> Self {
        Self::new(
            ProblemType::Validation,
            "Validation Error",
            StatusCode::BAD_REQUEST,
            detail,
            instance,
            false,
        )
    }

    pub fn not_found(detail: impl Into<String>, instance: impl Into<String>) -> Self {
        Self::new(
            ProblemType::NotFound,
            "Not Found",
            StatusCode::NOT_FOUND,
            detail,
            instance,
            false,
        )
    }

    pub fn conflict(detail: impl Into<String>, instance: impl Into<String>) -> Self {
        Self::new(
            ProblemType::Conflict,
            "Conflict",
            StatusCode::CONFLICT,
            detail,
            instance,
            false,
        )
    }

    pub fn service_unavailable(detail: impl Into<String>, instance: impl Into<String>) -> Self {
        Self::new(
            ProblemType::ServiceUnavailable,
            "Service Unavailable",
            StatusCode::SERVICE_UNAVAILABLE,
            detail,
            instance,
            false,
        )
    }

    /// Translate a use case error. Internal details stay in the logs, only the
    /// failing operation reaches the caller.
    pub fn from_app_error(err: &AppError, instance: impl Into<String>) -> Self {
        match err {
            AppError::Validation { field, message } => {
                Self::validation(message.clone(), instance).with_extra("validation.field", *field)
            }
            AppError::NotFound { id } => {
                Self::not_found(format!("User with ID {id} not found"), instance)
            }
            AppError::Conflict(message) => Self::conflict(message.clone(), instance),
            AppError::Internal { context, .. } => Self::internal(context.clone(), instance, true),
            AppError::Cancelled => {
                Self::service_unavailable("The request was cancelled before it completed", instance)
            }
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn with_trace(mut self, ids: &TraceIds) -> Self {
        self.trace_id = ids.trace_id.clone();
        self.span_id = ids.span_id.clone();
        self
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ProblemDetail {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match serde_json::to_vec(&self) {
            Ok(body) => (
                status,
                [(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_CONTENT_TYPE))],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Failed to encode problem detail: {}", e);
                (status, "Internal Server Error").into_response()
            }
        }
    }
}
