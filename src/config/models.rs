//! Configuration data structures for Tracetour.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. Every
//! field has a default so an empty file, or no file at all, yields a runnable
//! service.
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout() -> String {
    "30s".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    /// How long in-flight requests may run after a shutdown signal, e.g. "30s"
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: String,
}

impl ServerConfig {
    /// Create a new server configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Parsed `shutdown_timeout`.
    pub fn shutdown_timeout(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.shutdown_timeout)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            service: ServiceConfig::default(),
            logging: LoggingConfig::default(),
            telemetry: TelemetryConfig::default(),
            cors: CorsConfig::default(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Identity reported on every span and in the telemetry resource.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub environment: String,
    pub version: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "tracetour".to_string(),
            environment: "development".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level or `EnvFilter` directive, e.g. "info" or "tracetour=debug,tower_http=warn"
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Wrap the repositories in tracing decorators and record spans
    pub enabled: bool,
    /// OTLP/gRPC collector endpoint, e.g. "http://localhost:4317"
    pub otlp_endpoint: Option<String>,
    /// Fraction of root traces sampled, between 0.0 and 1.0
    pub sample_ratio: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: None,
            sample_ratio: 1.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CorsConfig {
    /// `*` or a list of exact origins such as "https://app.example.com"
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub max_age_secs: u64,
}

impl CorsConfig {
    pub fn allows_any_origin(&self) -> bool {
        self.allow_origins.iter().any(|origin| origin == "*")
    }

    pub fn allows_origin(&self, origin: &str) -> bool {
        self.allows_any_origin() || self.allow_origins.iter().any(|allowed| allowed == origin)
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_string()],
            allow_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .into_iter()
                .map(String::from)
                .collect(),
            allow_headers: [
                "Content-Type",
                "Authorization",
                "X-Request-ID",
                "traceparent",
                "tracestate",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            expose_headers: ["X-Trace-Id", "X-Span-Id", "X-Request-ID"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_age_secs: 86400,
        }
    }
}

/// Builder for ServerConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service.name = name.into();
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.config.service.environment = environment.into();
        self
    }

    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.config.logging = config;
        self
    }

    pub fn telemetry(mut self, config: TelemetryConfig) -> Self {
        self.config.telemetry = config;
        self
    }

    pub fn otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.telemetry.otlp_endpoint = Some(endpoint.into());
        self
    }

    pub fn cors(mut self, config: CorsConfig) -> Self {
        self.config.cors = config;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.config.shutdown_timeout = timeout.into();
        self
    }

    /// Build the final ServerConfig
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.service.name, "tracetour");
        assert_eq!(config.telemetry.sample_ratio, 1.0);
        assert!(config.cors.allows_any_origin());
        assert_eq!(config.shutdown_timeout().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_cors_origin_matching() {
        let cors = CorsConfig {
            allow_origins: vec!["https://app.example.com".to_string()],
            ..CorsConfig::default()
        };
        assert!(cors.allows_origin("https://app.example.com"));
        assert!(!cors.allows_origin("https://evil.example.com"));
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::builder()
            .listen_addr("127.0.0.1:3000")
            .service_name("users")
            .otlp_endpoint("http://collector:4317")
            .shutdown_timeout("5s")
            .build();
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.service.name, "users");
        assert_eq!(
            config.telemetry.otlp_endpoint.as_deref(),
            Some("http://collector:4317")
        );
        assert_eq!(config.shutdown_timeout().unwrap(), Duration::from_secs(5));
    }
}
