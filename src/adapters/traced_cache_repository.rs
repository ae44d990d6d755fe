//! Tracing decorator for [`CacheRepository`].
//!
//! A miss is a successful lookup: it is tagged `cache.hit = false` and never
//! marks the span as failed.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use opentelemetry::{KeyValue, trace::SpanKind};

use crate::{
    core::context::RequestContext,
    ports::{CACHE_TTL, CacheLookup, CacheRepository, CacheResult},
    telemetry::SpanScope,
};

pub struct TracedCacheRepository {
    inner: Arc<dyn CacheRepository>,
    ttl: Duration,
}

impl TracedCacheRepository {
    pub fn new(inner: Arc<dyn CacheRepository>) -> Self {
        Self::with_ttl(inner, CACHE_TTL)
    }

    /// `ttl` is only reported on `set` spans; it must match what the inner cache applies.
    pub fn with_ttl(inner: Arc<dyn CacheRepository>, ttl: Duration) -> Self {
        Self { inner, ttl }
    }

    fn start(
        &self,
        ctx: &RequestContext,
        operation: &str,
        command: &'static str,
        key: &str,
    ) -> (RequestContext, SpanScope) {
        let backend = self.inner.backend();
        ctx.start_span(
            format!("{backend}.{operation}"),
            SpanKind::Client,
            vec![
                KeyValue::new("db.system", backend),
                KeyValue::new("db.operation", command),
                KeyValue::new("cache.key", key.to_string()),
            ],
        )
    }
}

fn finish<T>(span: &SpanScope, result: &CacheResult<T>) {
    match result {
        Ok(_) => span.set_attribute(KeyValue::new("cache.success", true)),
        Err(err) => {
            span.record_error(err.to_string());
            span.set_attribute(KeyValue::new("cache.success", false));
        }
    }
}

#[async_trait]
impl CacheRepository for TracedCacheRepository {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    async fn set(&self, ctx: &RequestContext, key: &str, value: &str) -> CacheResult<()> {
        let (ctx, span) = self.start(ctx, "set", "SET", key);
        span.set_attribute(KeyValue::new("cache.ttl", self.ttl.as_secs_f64()));

        let result = self.inner.set(&ctx, key, value).await;
        finish(&span, &result);
        result
    }

    async fn get(&self, ctx: &RequestContext, key: &str) -> CacheResult<CacheLookup> {
        let (ctx, span) = self.start(ctx, "get", "GET", key);

        let result = self.inner.get(&ctx, key).await;
        if let Ok(lookup) = &result {
            span.set_attribute(KeyValue::new("cache.hit", lookup.is_hit()));
        }
        finish(&span, &result);
        result
    }

    async fn delete(&self, ctx: &RequestContext, key: &str) -> CacheResult<()> {
        let (ctx, span) = self.start(ctx, "delete", "DELETE", key);

        let result = self.inner.delete(&ctx, key).await;
        finish(&span, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry::{Context, Value, trace::TracerProvider as _};
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{adapters::MemoryCacheRepository, ports::CacheError};

    fn attribute(span: &SpanData, key: &str) -> Option<Value> {
        span.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.clone())
    }

    fn setup(token: CancellationToken) -> (RequestContext, InMemorySpanExporter, SdkTracerProvider) {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let ctx = RequestContext::new(Context::new(), Some(provider.tracer("test")), token);
        (ctx, exporter, provider)
    }

    #[tokio::test]
    async fn test_hit_and_miss_are_not_errors() {
        let (ctx, exporter, _provider) = setup(CancellationToken::new());
        let cache = TracedCacheRepository::new(Arc::new(MemoryCacheRepository::new()));

        assert_eq!(cache.get(&ctx, "user:1").await.unwrap(), CacheLookup::Miss);
        cache.set(&ctx, "user:1", "{}").await.unwrap();
        assert!(cache.get(&ctx, "user:1").await.unwrap().is_hit());

        let spans = exporter.get_finished_spans().unwrap();
        let names: Vec<_> = spans.iter().map(|s| s.name.to_string()).collect();
        assert_eq!(
            names,
            vec!["memory_cache.get", "memory_cache.set", "memory_cache.get"]
        );

        assert_eq!(attribute(&spans[0], "cache.hit"), Some(Value::Bool(false)));
        assert_eq!(attribute(&spans[0], "error"), None);
        assert_eq!(attribute(&spans[1], "cache.ttl"), Some(Value::F64(300.0)));
        assert_eq!(attribute(&spans[2], "cache.hit"), Some(Value::Bool(true)));
        assert_eq!(attribute(&spans[2], "cache.key"), Some(Value::from("user:1".to_string())));
    }

    #[tokio::test]
    async fn test_failure_is_tagged_and_propagated() {
        let token = CancellationToken::new();
        let (ctx, exporter, _provider) = setup(token.clone());
        let cache = TracedCacheRepository::new(Arc::new(MemoryCacheRepository::new()));
        token.cancel();

        let err = cache.delete(&ctx, "user:1").await.unwrap_err();
        assert_eq!(err, CacheError::Cancelled);

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "memory_cache.delete");
        assert_eq!(attribute(&spans[0], "error"), Some(Value::Bool(true)));
        assert_eq!(attribute(&spans[0], "cache.success"), Some(Value::Bool(false)));
    }
}
