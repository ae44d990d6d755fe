//! Request middleware that builds and threads the [`RequestContext`].
//!
//! The context travels in the request extensions. Each layer reads the context
//! left by the layer above, derives its own copy and stores that for the layer
//! below; nothing is read back after `next.run` returns. Composition order is
//! fixed in [`crate::adapters::router::build_router`].
use std::{convert::Infallible, sync::Arc, time::Instant};

use axum::{
    extract::{FromRequestParts, MatchedPath, Request, State},
    http::{HeaderValue, Method, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use opentelemetry::{KeyValue, trace::SpanKind};
use opentelemetry_semantic_conventions::attribute::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, HTTP_ROUTE, URL_PATH,
};
use tracing::Instrument;

use crate::{
    adapters::router::AppState,
    config::models::CorsConfig,
    core::{
        context::RequestContext,
        logging::{self, Layer, Logger},
        user_usecase::UserUseCase,
    },
    metrics::{self, RequestTimer},
    telemetry::extract_remote_context,
    tracing_setup::{create_request_span, record_response},
};

pub const TRACE_ID_HEADER: &str = "X-Trace-Id";
pub const SPAN_ID_HEADER: &str = "X-Span-Id";
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Label used for requests that matched no route.
const UNMATCHED_ROUTE: &str = "unmatched";

/// Extractor for the context built by the middleware chain.
///
/// Never rejects: a request that bypassed the chain gets an empty context.
#[derive(Debug, Clone)]
pub struct RequestCtx(pub RequestContext);

impl<S: Send + Sync> FromRequestParts<S> for RequestCtx {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<RequestContext>()
                .cloned()
                .unwrap_or_default(),
        ))
    }
}

pub(crate) fn request_context(req: &Request) -> RequestContext {
    req.extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_default()
}

pub(crate) fn route_label(req: &Request) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string())
}

fn insert_header(response: &mut Response, name: &'static str, value: &str) {
    if value.is_empty() {
        return;
    }
    if let Ok(header_value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(name, header_value);
    }
}

/// Outermost layer: creates the root server span, the per-request context and
/// the cancellation token, then echoes the trace ids on the response.
pub async fn trace_root_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let route = route_label(&req);

    // child of the shutdown token: draining cancels every in-flight request
    let cancellation = state.shutdown.child_token();
    let request_id = uuid::Uuid::new_v4().to_string();
    let root = RequestContext::new(
        extract_remote_context(req.headers()),
        state.tracer.clone(),
        cancellation.clone(),
    )
    .with_request_id(request_id.clone());
    let span_route = if route == UNMATCHED_ROUTE { path.clone() } else { route.clone() };
    let (ctx, span) = root.start_span(
        format!("{method} {span_route}"),
        SpanKind::Server,
        vec![
            KeyValue::new(HTTP_REQUEST_METHOD, method.to_string()),
            KeyValue::new(HTTP_ROUTE, route.clone()),
            KeyValue::new(URL_PATH, path.clone()),
        ],
    );
    let ids = span.ids();
    req.extensions_mut().insert(ctx);

    tracing::debug!("Started processing {} {}", method, path);
    let _timer = RequestTimer::new(method.as_str(), route.as_str());

    // cancels the request's token if the client goes away before we respond
    let cancel_on_drop = cancellation.drop_guard();
    let mut response = next.run(req).await;
    let _ = cancel_on_drop.disarm();

    let status = response.status();
    span.set_attribute(KeyValue::new(
        HTTP_RESPONSE_STATUS_CODE,
        i64::from(status.as_u16()),
    ));
    if status.is_server_error() {
        span.record_error(format!("HTTP {}", status.as_u16()));
    }

    insert_header(&mut response, TRACE_ID_HEADER, &ids.trace_id);
    insert_header(&mut response, SPAN_ID_HEADER, &ids.span_id);
    insert_header(&mut response, REQUEST_ID_HEADER, &request_id);
    metrics::increment_request_total(method.as_str(), &route, status.as_u16());

    tracing::info!(
        trace_id = %ids.trace_id,
        request_id = %request_id,
        "Completed {} {} - {} in {:?}",
        method,
        path,
        status,
        start.elapsed()
    );

    response
}

/// Injects the request logger. Reuses the request id assigned by the trace
/// root, minting one only when this layer runs on its own.
pub async fn logger_middleware(mut req: Request, next: Next) -> Response {
    let start = Instant::now();
    let parent = request_context(&req);
    let (ctx, _span) = parent.start_span("middleware.logger", SpanKind::Internal, vec![]);

    let request_id = ctx
        .request_id()
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let log_span = create_request_span(req.method().as_str(), req.uri().path(), &request_id);
    let ctx = ctx
        .with_logger(Logger::new(log_span.clone()))
        .with_request_id(request_id.clone());
    req.extensions_mut().insert(ctx);

    let mut response = next.run(req).instrument(log_span.clone()).await;

    record_response(&log_span, response.status().as_u16(), start.elapsed());
    insert_header(&mut response, REQUEST_ID_HEADER, &request_id);
    response
}

/// Injects the shared repository locator.
pub async fn locator_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let parent = request_context(&req);
    let (ctx, _span) = parent.start_span("middleware.repo_locator", SpanKind::Internal, vec![]);
    let ctx = ctx.with_locator(Arc::clone(&state.locator));
    req.extensions_mut().insert(ctx);

    next.run(req).await
}

/// Builds the user use case from the locator and stores it as the interactor.
pub async fn interactor_middleware(mut req: Request, next: Next) -> Response {
    let ctx = request_context(&req);
    match ctx.locator() {
        Some(locator) => {
            let interactor = Arc::new(UserUseCase::from_locator(&locator));
            req.extensions_mut().insert(ctx.with_interactor(interactor));
        }
        None => logging::warn(
            &ctx,
            Layer::Middleware,
            "No repository locator in context, skipping interactor injection",
        ),
    }

    next.run(req).await
}

/// CORS headers precomputed from [`CorsConfig`].
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    config: CorsConfig,
    allow_methods: Option<HeaderValue>,
    allow_headers: Option<HeaderValue>,
    expose_headers: Option<HeaderValue>,
    max_age: HeaderValue,
}

fn join_header(values: &[String]) -> Option<HeaderValue> {
    if values.is_empty() {
        return None;
    }
    HeaderValue::from_str(&values.join(", ")).ok()
}

impl CorsPolicy {
    pub fn from_config(config: &CorsConfig) -> Self {
        Self {
            config: config.clone(),
            allow_methods: join_header(&config.allow_methods),
            allow_headers: join_header(&config.allow_headers),
            expose_headers: join_header(&config.expose_headers),
            max_age: HeaderValue::from(config.max_age_secs),
        }
    }

    /// Value for `Access-Control-Allow-Origin`, or `None` when the origin is not allowed.
    fn allow_origin(&self, origin: Option<&HeaderValue>) -> Option<HeaderValue> {
        let origin = origin?;
        if self.config.allows_any_origin() {
            return Some(HeaderValue::from_static("*"));
        }
        let origin_str = origin.to_str().ok()?;
        self.config
            .allows_origin(origin_str)
            .then(|| origin.clone())
    }

    fn apply_simple(&self, response: &mut Response, allow_origin: HeaderValue) {
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
        if !self.config.allows_any_origin() {
            headers.append(header::VARY, HeaderValue::from_static("Origin"));
        }
        if let Some(expose) = &self.expose_headers {
            headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, expose.clone());
        }
    }

    fn apply_preflight(&self, response: &mut Response, allow_origin: HeaderValue) {
        self.apply_simple(response, allow_origin);
        let headers = response.headers_mut();
        if let Some(methods) = &self.allow_methods {
            headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, methods.clone());
        }
        if let Some(allowed) = &self.allow_headers {
            headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allowed.clone());
        }
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
    }
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self::from_config(&CorsConfig::default())
    }
}

/// Answers preflight requests and decorates every other response.
pub async fn cors_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let parent = request_context(&req);
    let (ctx, _span) = parent.start_span("middleware.cors", SpanKind::Internal, vec![]);

    let origin = req.headers().get(header::ORIGIN).cloned();
    let is_preflight = req.method() == Method::OPTIONS
        && origin.is_some()
        && req
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);
    let allow_origin = state.cors.allow_origin(origin.as_ref());

    if is_preflight {
        let mut response = StatusCode::NO_CONTENT.into_response();
        match allow_origin {
            Some(allow_origin) => state.cors.apply_preflight(&mut response, allow_origin),
            None => logging::warn(&ctx, Layer::Middleware, "Rejected CORS preflight from disallowed origin"),
        }
        return response;
    }

    req.extensions_mut().insert(ctx);
    let mut response = next.run(req).await;
    if let Some(allow_origin) = allow_origin {
        state.cors.apply_simple(&mut response, allow_origin);
    }
    response
}
