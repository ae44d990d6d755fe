//! OpenTelemetry wiring: provider setup, RAII span scopes and trace id helpers.
//!
//! Spans are always created through [`crate::core::context::RequestContext::start_span`],
//! which hands back a [`SpanScope`]. The scope ends its span exactly once when it is
//! dropped, including while a panic unwinds through the frame that owns it.
use std::borrow::Cow;

use eyre::{Result, WrapErr};
use http::HeaderMap;
use opentelemetry::{
    Context, KeyValue, global,
    propagation::{Extractor, TextMapPropagator},
    trace::{Status, TraceContextExt, TracerProvider as _},
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    metrics::SdkMeterProvider,
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracer, SdkTracerProvider},
};

use crate::config::models::{ServiceConfig, TelemetryConfig};

/// Trace and span identifiers of a span, rendered as lowercase hex.
///
/// Both fields are empty when no valid span is active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceIds {
    pub trace_id: String,
    pub span_id: String,
}

impl TraceIds {
    pub fn from_context(cx: &Context) -> Self {
        let span = cx.span();
        let span_context = span.span_context();
        if !span_context.is_valid() {
            return Self::default();
        }
        Self {
            trace_id: span_context.trace_id().to_string(),
            span_id: span_context.span_id().to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.trace_id.is_empty()
    }
}

/// Owns one open span and ends it when dropped.
pub struct SpanScope {
    cx: Context,
}

impl SpanScope {
    pub(crate) fn new(cx: Context) -> Self {
        Self { cx }
    }

    /// A scope around the no-op span, used when no tracer is configured.
    pub fn detached() -> Self {
        Self {
            cx: Context::new(),
        }
    }

    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn ids(&self) -> TraceIds {
        TraceIds::from_context(&self.cx)
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        self.cx.span().set_attribute(attribute);
    }

    pub fn set_attributes(&self, attributes: impl IntoIterator<Item = KeyValue>) {
        let span = self.cx.span();
        for attribute in attributes {
            span.set_attribute(attribute);
        }
    }

    /// Tag the span as failed. The error itself is left untouched.
    pub fn record_error(&self, message: impl Into<Cow<'static, str>>) {
        let message = message.into();
        let span = self.cx.span();
        span.set_attribute(KeyValue::new("error", true));
        span.set_attribute(KeyValue::new("error.msg", message.clone()));
        span.set_status(Status::error(message));
    }
}

impl Drop for SpanScope {
    fn drop(&mut self) {
        let span = self.cx.span();
        if std::thread::panicking() {
            span.set_attribute(KeyValue::new("error", true));
            span.set_attribute(KeyValue::new("error.type", "panic"));
            span.set_status(Status::error("panic while span was active"));
        }
        span.end();
    }
}

/// Read-only view of request headers for W3C trace context extraction.
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// Continue a remote trace when the caller sent a `traceparent` header.
pub fn extract_remote_context(headers: &HeaderMap) -> Context {
    TraceContextPropagator::new().extract_with_context(&Context::new(), &HeaderExtractor(headers))
}

/// Installed tracer and meter providers.
pub struct Telemetry {
    tracer_provider: SdkTracerProvider,
    meter_provider: Option<SdkMeterProvider>,
    tracer: SdkTracer,
}

impl Telemetry {
    pub fn tracer(&self) -> SdkTracer {
        self.tracer.clone()
    }

    /// Flush and stop exporters. Failures are logged, never returned.
    pub fn shutdown(&self) {
        tracing::info!("Telemetry shutdown initiated");
        if let Err(e) = self.tracer_provider.shutdown() {
            tracing::warn!("Tracer provider shutdown failed: {}", e);
        }
        if let Some(meter_provider) = &self.meter_provider {
            if let Err(e) = meter_provider.shutdown() {
                tracing::warn!("Meter provider shutdown failed: {}", e);
            }
        }
        tracing::info!("Telemetry shutdown complete");
    }
}

fn build_resource(service: &ServiceConfig) -> Resource {
    Resource::builder()
        .with_service_name(service.name.clone())
        .with_attributes([
            KeyValue::new("service.version", service.version.clone()),
            KeyValue::new("deployment.environment", service.environment.clone()),
        ])
        .build()
}

/// Build the tracer (and, with an OTLP endpoint, meter) providers and install them globally.
pub fn init_telemetry(service: &ServiceConfig, config: &TelemetryConfig) -> Result<Telemetry> {
    tracing::info!(
        "Initializing telemetry for {} (env: {}, sample ratio: {}, otlp: {:?})",
        service.name,
        service.environment,
        config.sample_ratio,
        config.otlp_endpoint
    );

    let resource = build_resource(service);
    let sampler = Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(config.sample_ratio)));
    let mut builder = SdkTracerProvider::builder()
        .with_sampler(sampler)
        .with_resource(resource.clone());
    let mut meter_provider = None;

    if let Some(endpoint) = config.otlp_endpoint.as_deref() {
        let span_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .wrap_err_with(|| format!("Failed to build OTLP span exporter for {endpoint}"))?;
        builder = builder.with_batch_exporter(span_exporter);

        let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .wrap_err_with(|| format!("Failed to build OTLP metric exporter for {endpoint}"))?;
        let provider = SdkMeterProvider::builder()
            .with_periodic_exporter(metric_exporter)
            .with_resource(resource)
            .build();
        global::set_meter_provider(provider.clone());
        meter_provider = Some(provider);
    } else {
        tracing::warn!("No OTLP endpoint configured; spans are recorded but not exported");
    }

    let tracer_provider = builder.build();
    global::set_tracer_provider(tracer_provider.clone());
    global::set_text_map_propagator(TraceContextPropagator::new());
    let tracer = tracer_provider.tracer(service.name.clone());

    tracing::info!("Telemetry initialized successfully");
    Ok(Telemetry {
        tracer_provider,
        meter_provider,
        tracer,
    })
}
