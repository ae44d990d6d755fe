//! Trace-correlated logging helpers.
//!
//! Every line is emitted as a child event of the request's logging span and
//! carries the trace and span id active in the given [`RequestContext`].
use std::fmt;

use opentelemetry::{
    KeyValue,
    trace::{Status, TraceContextExt},
};
use tracing::Span;

use crate::core::{context::RequestContext, error::AppError};

/// Write handle for request-scoped log lines.
#[derive(Debug, Clone)]
pub struct Logger {
    span: Span,
}

impl Logger {
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self { span: Span::none() }
    }
}

/// Architectural layer that produced a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Middleware,
    Handler,
    Usecase,
    Repository,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Middleware => "middleware",
            Layer::Handler => "handler",
            Layer::Usecase => "usecase",
            Layer::Repository => "repository",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn info(ctx: &RequestContext, layer: Layer, message: impl fmt::Display) {
    let logger = ctx.logger();
    let ids = ctx.trace_ids();
    tracing::info!(
        parent: logger.span(),
        layer = layer.as_str(),
        trace_id = %ids.trace_id,
        span_id = %ids.span_id,
        "[{}] {}",
        layer,
        message
    );
}

pub fn warn(ctx: &RequestContext, layer: Layer, message: impl fmt::Display) {
    let logger = ctx.logger();
    let ids = ctx.trace_ids();
    tracing::warn!(
        parent: logger.span(),
        layer = layer.as_str(),
        trace_id = %ids.trace_id,
        span_id = %ids.span_id,
        "[{}] {}",
        layer,
        message
    );
}

/// Log a failure and tag the active trace span with it.
///
/// `notify` marks the failure as alert-worthy (`error.type = system_error`);
/// expected failures use `expected_error`.
pub fn error(
    ctx: &RequestContext,
    layer: Layer,
    message: impl fmt::Display,
    err: &dyn fmt::Display,
    notify: bool,
) {
    let error_type = if notify { "system_error" } else { "expected_error" };
    emit_error(ctx, layer, message, err, notify, error_type);
}

/// Like [`error`], taking `notify` and `error.type` from the error itself.
pub fn app_error(ctx: &RequestContext, layer: Layer, message: impl fmt::Display, err: &AppError) {
    emit_error(ctx, layer, message, err, err.notify(), err.error_type());
}

fn emit_error(
    ctx: &RequestContext,
    layer: Layer,
    message: impl fmt::Display,
    err: &dyn fmt::Display,
    notify: bool,
    error_type: &'static str,
) {
    let logger = ctx.logger();
    let ids = ctx.trace_ids();
    tracing::error!(
        parent: logger.span(),
        layer = layer.as_str(),
        trace_id = %ids.trace_id,
        span_id = %ids.span_id,
        error = %err,
        "error.notify" = notify,
        "error.type" = error_type,
        "[{}] {}",
        layer,
        message
    );

    let span = ctx.trace().span();
    let error_message = err.to_string();
    span.set_attribute(KeyValue::new("error", true));
    span.set_attribute(KeyValue::new("error.msg", error_message.clone()));
    span.set_attribute(KeyValue::new("error.notify", notify));
    span.set_attribute(KeyValue::new("error.type", error_type));
    span.set_status(Status::error(error_message));
}
