//! Request-scoped context carrier.
//!
//! A [`RequestContext`] is created once per inbound request by the root
//! middleware and handed down by value. Every `with_*` setter returns a new
//! context and leaves the receiver untouched, so a layer can never change what
//! an outer layer already observed.
use std::{any::Any, borrow::Cow, fmt, sync::Arc};

use opentelemetry::{
    Context, KeyValue,
    trace::{SpanKind, TraceContextExt, Tracer as _},
};
use opentelemetry_sdk::trace::SdkTracer;
use tokio_util::sync::CancellationToken;

use crate::{
    core::logging::Logger,
    ports::{CacheRepository, UserRepository},
    telemetry::{SpanScope, TraceIds},
};

/// The two data-access ports, built once at startup and shared read-only.
#[derive(Clone)]
pub struct RepositoryLocator {
    users: Arc<dyn UserRepository>,
    cache: Arc<dyn CacheRepository>,
}

impl RepositoryLocator {
    pub fn new(users: Arc<dyn UserRepository>, cache: Arc<dyn CacheRepository>) -> Self {
        Self { users, cache }
    }

    pub fn users(&self) -> Arc<dyn UserRepository> {
        Arc::clone(&self.users)
    }

    pub fn cache(&self) -> Arc<dyn CacheRepository> {
        Arc::clone(&self.cache)
    }
}

impl fmt::Debug for RepositoryLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryLocator")
            .field("users", &self.users.backend())
            .field("cache", &self.cache.backend())
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct RequestContext {
    logger: Option<Logger>,
    locator: Option<Arc<RepositoryLocator>>,
    interactor: Option<Arc<dyn Any + Send + Sync>>,
    trace: Context,
    tracer: Option<SdkTracer>,
    cancellation: CancellationToken,
    request_id: Option<String>,
}

impl RequestContext {
    /// Root context for one request.
    ///
    /// `trace` is the (possibly remote) parent trace context, `tracer` is `None`
    /// when telemetry is disabled, in which case spans are never recorded.
    pub fn new(trace: Context, tracer: Option<SdkTracer>, cancellation: CancellationToken) -> Self {
        Self {
            trace,
            tracer,
            cancellation,
            ..Self::default()
        }
    }

    pub fn with_logger(&self, logger: Logger) -> Self {
        Self {
            logger: Some(logger),
            ..self.clone()
        }
    }

    pub fn with_locator(&self, locator: Arc<RepositoryLocator>) -> Self {
        Self {
            locator: Some(locator),
            ..self.clone()
        }
    }

    pub fn with_interactor<T: Any + Send + Sync>(&self, interactor: Arc<T>) -> Self {
        Self {
            interactor: Some(interactor),
            ..self.clone()
        }
    }

    pub fn with_request_id(&self, request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            ..self.clone()
        }
    }

    /// The injected logger, or a detached one when none was injected.
    pub fn logger(&self) -> Logger {
        self.logger.clone().unwrap_or_default()
    }

    pub fn locator(&self) -> Option<Arc<RepositoryLocator>> {
        self.locator.clone()
    }

    /// The injected interactor, if one of type `T` is present.
    pub fn interactor<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.interactor
            .clone()
            .and_then(|interactor| interactor.downcast::<T>().ok())
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn trace(&self) -> &Context {
        &self.trace
    }

    pub fn trace_ids(&self) -> TraceIds {
        TraceIds::from_context(&self.trace)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Open a child span of the current one.
    ///
    /// Returns the context to hand to deeper layers, with the new span active,
    /// and the scope that ends the span when dropped.
    pub fn start_span(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
    ) -> (RequestContext, SpanScope) {
        let Some(tracer) = &self.tracer else {
            return (self.clone(), SpanScope::detached());
        };

        let span = tracer
            .span_builder(name)
            .with_kind(kind)
            .with_attributes(attributes)
            .start_with_context(tracer, &self.trace);
        let cx = self.trace.with_span(span);

        let child = Self {
            trace: cx.clone(),
            ..self.clone()
        };
        (child, SpanScope::new(cx))
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("trace", &self.trace_ids())
            .field("has_logger", &self.logger.is_some())
            .field("locator", &self.locator)
            .field("has_interactor", &self.interactor.is_some())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
