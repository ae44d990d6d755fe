//! Panic recovery middleware.
//!
//! Converts any panic raised below it into exactly one 500 Problem Details
//! response and exactly one error log entry. Everything the failure path needs
//! (trace ids, method, path, route) is captured before the inner chain runs.
use std::{
    any::Any,
    backtrace::Backtrace,
    cell::RefCell,
    panic::{self, AssertUnwindSafe},
    sync::Once,
};

use axum::{
    extract::Request,
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;
use opentelemetry::{KeyValue, trace::SpanKind};

use crate::{
    adapters::{
        middleware::{request_context, route_label},
        problem::{PROBLEM_CONTENT_TYPE, ProblemDetail},
    },
    core::error::AppError,
    metrics,
    telemetry::{SpanScope, TraceIds},
};

const PANIC_DETAIL: &str = "An unexpected error occurred";
const FALLBACK_BODY: &str = r#"{"error":"Internal Server Error"}"#;

/// Lifecycle of one request through the recovery layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Armed,
    Executing,
    Completed,
    Recovering,
    Responded,
}

impl RecoveryState {
    pub fn can_transition_to(self, next: RecoveryState) -> bool {
        matches!(
            (self, next),
            (RecoveryState::Armed, RecoveryState::Executing)
                | (RecoveryState::Executing, RecoveryState::Completed)
                | (RecoveryState::Executing, RecoveryState::Recovering)
                | (RecoveryState::Recovering, RecoveryState::Responded)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RecoveryState::Completed | RecoveryState::Responded)
    }
}

/// Tracks the state of a single request. Illegal transitions are ignored and
/// logged; they never panic inside the recovery path.
#[derive(Debug)]
pub struct RecoveryGuard {
    state: RecoveryState,
}

impl RecoveryGuard {
    pub fn new() -> Self {
        Self {
            state: RecoveryState::Armed,
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn advance(&mut self, next: RecoveryState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            tracing::warn!(from = ?self.state, to = ?next, "Ignoring invalid recovery transition");
            false
        }
    }
}

impl Default for RecoveryGuard {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static LAST_PANIC_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

/// Record the backtrace of every panic in a thread-local slot, then defer to
/// the previously installed hook. Safe to call more than once.
pub fn install_panic_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture().to_string();
            LAST_PANIC_BACKTRACE.with(|slot| {
                if let Ok(mut slot) = slot.try_borrow_mut() {
                    *slot = Some(backtrace);
                }
            });
            previous(info);
        }));
    });
}

/// Take the backtrace recorded for the most recent panic on this thread.
pub fn take_panic_backtrace() -> Option<String> {
    LAST_PANIC_BACKTRACE
        .with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
}

/// Render a panic payload. Handles the payload types `panic!` and
/// `std::panic::panic_any` commonly carry.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(err) = payload.downcast_ref::<AppError>() {
        err.to_string()
    } else if let Some(err) = payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
        err.to_string()
    } else {
        "unknown panic payload".to_string()
    }
}

/// What the failure path needs, taken before the inner chain runs.
struct RequestSnapshot {
    ids: TraceIds,
    request_id: String,
    method: String,
    path: String,
    route: String,
}

pub async fn recovery_middleware(mut req: Request, next: Next) -> Response {
    let mut guard = RecoveryGuard::new();

    let parent = request_context(&req);
    let (ctx, span) = parent.start_span("middleware.recovery", SpanKind::Internal, vec![]);
    let snapshot = RequestSnapshot {
        ids: ctx.trace_ids(),
        request_id: ctx.request_id().unwrap_or_default().to_string(),
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
        route: route_label(&req),
    };
    req.extensions_mut().insert(ctx);

    guard.advance(RecoveryState::Executing);
    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => {
            guard.advance(RecoveryState::Completed);
            response
        }
        Err(payload) => {
            guard.advance(RecoveryState::Recovering);
            let response = respond_to_panic(&span, &snapshot, payload.as_ref());
            guard.advance(RecoveryState::Responded);
            response
        }
    }
}

fn respond_to_panic(span: &SpanScope, snapshot: &RequestSnapshot, payload: &(dyn Any + Send)) -> Response {
    // a panic while handling the panic must not escape this layer
    panic::catch_unwind(AssertUnwindSafe(|| {
        let message = panic_message(payload);
        let stack = take_panic_backtrace().unwrap_or_default();

        tracing::error!(
            trace_id = %snapshot.ids.trace_id,
            span_id = %snapshot.ids.span_id,
            request_id = %snapshot.request_id,
            "panic.value" = %message,
            "panic.stack_trace" = %stack,
            "http.method" = %snapshot.method,
            "http.url" = %snapshot.path,
            "error.notify" = true,
            "error.type" = "panic",
            "[middleware] Panic recovered"
        );

        span.record_error(format!("panic: {message}"));
        span.set_attributes([
            KeyValue::new("error.type", "panic"),
            KeyValue::new("error.notify", true),
            KeyValue::new("error.stack", stack),
        ]);
        metrics::increment_panics_recovered(&snapshot.route);

        ProblemDetail::internal(PANIC_DETAIL, snapshot.path.clone(), true)
            .with_extra("error", "Internal Server Error")
            .with_trace(&snapshot.ids)
            .into_response()
    }))
    .unwrap_or_else(|_| fallback_response())
}

fn fallback_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_CONTENT_TYPE))],
        FALLBACK_BODY,
    )
        .into_response()
}
