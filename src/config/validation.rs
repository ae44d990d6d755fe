use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use crate::config::models::{CorsConfig, ServerConfig, ServiceConfig, TelemetryConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration, reporting every problem at once
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }
        errors.extend(Self::validate_service(&config.service));
        errors.extend(Self::validate_telemetry(&config.telemetry));
        errors.extend(Self::validate_cors(&config.cors));

        if let Err(e) = config.shutdown_timeout() {
            errors.push(ValidationError::InvalidField {
                field: "shutdown_timeout".to_string(),
                message: format!("'{}' is not a duration: {e}", config.shutdown_timeout),
            });
        }

        if let Err(e) = EnvFilter::try_new(&config.logging.level) {
            errors.push(ValidationError::InvalidField {
                field: "logging.level".to_string(),
                message: e.to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_service(service: &ServiceConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if service.name.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "service.name".to_string(),
            });
        }
        errors
    }

    fn validate_telemetry(telemetry: &TelemetryConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !(0.0..=1.0).contains(&telemetry.sample_ratio) {
            errors.push(ValidationError::InvalidField {
                field: "telemetry.sample_ratio".to_string(),
                message: format!(
                    "Must be between 0.0 and 1.0, got {}",
                    telemetry.sample_ratio
                ),
            });
        }

        if let Some(endpoint) = &telemetry.otlp_endpoint {
            if let Err(e) = Self::validate_url(endpoint, "telemetry.otlp_endpoint") {
                errors.push(e);
            }
        }

        errors
    }

    fn validate_cors(cors: &CorsConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if cors.allow_origins.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "cors.allow_origins".to_string(),
            });
        }

        for (i, origin) in cors.allow_origins.iter().enumerate() {
            if origin == "*" {
                continue;
            }
            if let Err(e) = Self::validate_url(origin, &format!("cors.allow_origins[{i}]")) {
                errors.push(e);
            }
        }

        errors
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
