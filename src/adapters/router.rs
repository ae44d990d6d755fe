//! Route table and middleware composition.
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::get,
};
use opentelemetry_sdk::trace::SdkTracer;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

use crate::{
    adapters::{
        demo_handler, http_handler,
        middleware::{
            CorsPolicy, cors_middleware, interactor_middleware, locator_middleware,
            logger_middleware, trace_root_middleware,
        },
        recovery::recovery_middleware,
    },
    core::context::RepositoryLocator,
};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared, read-only state handed to the stateful middleware.
#[derive(Clone)]
pub struct AppState {
    pub locator: Arc<RepositoryLocator>,
    pub tracer: Option<SdkTracer>,
    pub cors: Arc<CorsPolicy>,
    /// Parent of every per-request cancellation token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(locator: Arc<RepositoryLocator>, tracer: Option<SdkTracer>, cors: CorsPolicy) -> Self {
        Self {
            locator,
            tracer,
            cors: Arc::new(cors),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel in-flight requests when `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }
}

/// Build the application router.
///
/// Middleware order, outermost first: trace root, panic recovery, logger,
/// repository locator, CORS, then the route handler. The `/api/users` routes
/// additionally get the interactor layer.
pub fn build_router(state: AppState) -> Router {
    let users = Router::new()
        .route(
            "/api/users",
            get(http_handler::get_all_users).post(http_handler::create_user),
        )
        .route("/api/users/{id}", get(http_handler::get_user))
        .route_layer(middleware::from_fn(interactor_middleware));

    let demo = Router::new()
        .route("/api/slow", get(demo_handler::slow))
        .route("/api/error", get(demo_handler::error))
        .route("/api/expected-error", get(demo_handler::expected_error))
        .route("/api/unexpected-error", get(demo_handler::unexpected_error))
        .route("/api/warn", get(demo_handler::warn))
        .route("/api/panic", get(demo_handler::panic));

    Router::new()
        .route("/", get(http_handler::health))
        .route("/health", get(http_handler::health))
        .merge(users)
        .merge(demo)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    trace_root_middleware,
                ))
                .layer(middleware::from_fn(recovery_middleware))
                .layer(middleware::from_fn(logger_middleware))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    locator_middleware,
                ))
                .layer(middleware::from_fn_with_state(state, cors_middleware))
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        extract::Request,
        http::{Method, StatusCode, header},
    };
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
    use tower::ServiceExt; // for oneshot

    use super::*;
    use crate::adapters::{
        in_memory_locator,
        middleware::{REQUEST_ID_HEADER, SPAN_ID_HEADER, TRACE_ID_HEADER},
    };

    fn traced_app() -> (Router, InMemorySpanExporter, SdkTracerProvider) {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let state = AppState::new(
            Arc::new(in_memory_locator(true)),
            Some(provider.tracer("test")),
            CorsPolicy::default(),
        );
        (build_router(state), exporter, provider)
    }

    #[tokio::test]
    async fn test_response_carries_trace_headers() {
        let (app, _exporter, _provider) = traced_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let trace_id = response.headers().get(TRACE_ID_HEADER).unwrap();
        assert_eq!(trace_id.len(), 32);
        assert_eq!(response.headers().get(SPAN_ID_HEADER).unwrap().len(), 16);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_middleware_spans_nest_under_root() {
        let (app, exporter, _provider) = traced_app();
        let response = app
            .oneshot(Request::builder().uri("/api/users").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let spans = exporter.get_finished_spans().unwrap();
        let root = spans
            .iter()
            .find(|s| s.name == "GET /api/users")
            .expect("root span");
        let trace_id = root.span_context.trace_id();
        for name in [
            "middleware.recovery",
            "middleware.logger",
            "middleware.repo_locator",
            "middleware.cors",
            "handler.get_all_users",
            "usecase.get_all_users",
            "memory_db.find_all_users",
        ] {
            let span = spans
                .iter()
                .find(|s| s.name == name)
                .unwrap_or_else(|| panic!("missing span {name}"));
            assert_eq!(span.span_context.trace_id(), trace_id, "{name}");
        }

        let recovery = spans.iter().find(|s| s.name == "middleware.recovery").unwrap();
        assert_eq!(recovery.parent_span_id, root.span_context.span_id());
        let cors = spans.iter().find(|s| s.name == "middleware.cors").unwrap();
        let locator = spans
            .iter()
            .find(|s| s.name == "middleware.repo_locator")
            .unwrap();
        assert_eq!(cors.parent_span_id, locator.span_context.span_id());
    }

    #[tokio::test]
    async fn test_remote_parent_is_continued() {
        let (app, exporter, _provider) = traced_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(
                        "traceparent",
                        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(TRACE_ID_HEADER).unwrap(),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );

        let spans = exporter.get_finished_spans().unwrap();
        let root = spans.iter().find(|s| s.name == "GET /health").unwrap();
        assert_eq!(root.parent_span_id.to_string(), "00f067aa0ba902b7");
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let (app, _exporter, _provider) = traced_app();
        let body = format!(
            r#"{{"name":"{}","email":"big@example.com"}}"#,
            "x".repeat(MAX_BODY_BYTES)
        );
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/users")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::CONTENT_LENGTH, body.len())
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (app, _exporter, _provider) = traced_app();
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_slow_request() {
        let shutdown = CancellationToken::new();
        let state = AppState::new(Arc::new(in_memory_locator(false)), None, CorsPolicy::default())
            .with_shutdown(shutdown.clone());
        let app = build_router(state);

        let request = tokio::spawn(
            app.oneshot(Request::builder().uri("/api/slow").body(Body::empty()).unwrap()),
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown.cancel();

        let response = tokio::time::timeout(std::time::Duration::from_secs(1), request)
            .await
            .expect("slow request should stop early")
            .unwrap()
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }
}
