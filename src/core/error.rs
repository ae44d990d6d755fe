use thiserror::Error;

use crate::{
    core::user::UserId,
    ports::UserRepositoryError,
};

/// Errors surfaced by the use case layer.
///
/// The variants mirror the alerting taxonomy: validation, not-found, conflict
/// and cancellation are expected outcomes, internal failures always alert.
/// Panics never become an `AppError`; they are handled by the recovery
/// middleware.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AppError {
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("user {id} not found")]
    NotFound { id: UserId },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{context}: {message}")]
    Internal { context: String, message: String },

    #[error("request cancelled")]
    Cancelled,
}

impl AppError {
    pub fn internal(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        AppError::Internal {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// Map a store failure, adding the failing operation as context.
    pub fn from_user_store(context: &str, err: UserRepositoryError) -> Self {
        match err {
            UserRepositoryError::NotFound(id) => AppError::NotFound { id },
            UserRepositoryError::DuplicateEmail(email) => {
                AppError::Conflict(format!("user with email '{email}' already exists"))
            }
            UserRepositoryError::Cancelled => AppError::Cancelled,
            other => AppError::internal(context, other),
        }
    }

    /// Whether this error should page someone.
    pub fn notify(&self) -> bool {
        matches!(self, AppError::Internal { .. })
    }

    /// Value used for the `error.type` log field and span tag.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "validation_error",
            AppError::NotFound { .. } => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Internal { .. } => "system_error",
            AppError::Cancelled => "cancelled",
        }
    }
}
