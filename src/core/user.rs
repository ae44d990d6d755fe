//! User domain type and input validation.
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::error::AppError;

/// Store-assigned user identifier. Zero means "not yet persisted".
pub type UserId = i64;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is a valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Build a user that has not been persisted yet (`id == 0`).
    pub fn unsaved(name: impl Into<String>, email: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            email: email.into(),
            created_at,
        }
    }
}

/// Cache key under which a user is stored.
pub fn user_cache_key(id: UserId) -> String {
    format!("user:{id}")
}

/// Validated input for user creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
}

impl NewUser {
    /// Trim and validate raw input.
    pub fn parse(name: &str, email: &str) -> Result<Self, AppError> {
        let name = name.trim();
        let email = email.trim();

        if name.is_empty() {
            return Err(AppError::Validation {
                field: "name",
                message: "name must not be empty".to_string(),
            });
        }
        if !EMAIL_PATTERN.is_match(email) {
            return Err(AppError::Validation {
                field: "email",
                message: format!("'{email}' is not a valid email address"),
            });
        }

        Ok(Self {
            name: name.to_string(),
            email: email.to_string(),
        })
    }
}
