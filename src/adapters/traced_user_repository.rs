//! Tracing decorator for [`UserRepository`].
//!
//! Each call runs inside a client span named `<backend>.<operation>`. Results
//! and errors pass through untouched.
use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::{KeyValue, trace::SpanKind};

use crate::{
    core::{
        context::RequestContext,
        user::{User, UserId},
    },
    ports::{UserRepository, UserRepositoryResult},
    telemetry::SpanScope,
};

pub struct TracedUserRepository {
    inner: Arc<dyn UserRepository>,
}

impl TracedUserRepository {
    pub fn new(inner: Arc<dyn UserRepository>) -> Self {
        Self { inner }
    }

    fn start(
        &self,
        ctx: &RequestContext,
        operation: &str,
        statement: &'static str,
        mut attributes: Vec<KeyValue>,
    ) -> (RequestContext, SpanScope) {
        let backend = self.inner.backend();
        attributes.push(KeyValue::new("db.system", backend));
        attributes.push(KeyValue::new("db.operation", statement));
        ctx.start_span(format!("{backend}.{operation}"), SpanKind::Client, attributes)
    }
}

fn finish<T>(span: &SpanScope, result: &UserRepositoryResult<T>) {
    match result {
        Ok(_) => span.set_attribute(KeyValue::new("query.success", true)),
        Err(err) => {
            span.record_error(err.to_string());
            span.set_attribute(KeyValue::new("query.success", false));
        }
    }
}

#[async_trait]
impl UserRepository for TracedUserRepository {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    async fn create(&self, ctx: &RequestContext, user: User) -> UserRepositoryResult<User> {
        let (ctx, span) = self.start(
            ctx,
            "create_user",
            "INSERT",
            vec![
                KeyValue::new("user.name", user.name.clone()),
                KeyValue::new("user.email", user.email.clone()),
            ],
        );

        let result = self.inner.create(&ctx, user).await;
        if let Ok(created) = &result {
            span.set_attribute(KeyValue::new("user.id", created.id));
        }
        finish(&span, &result);
        result
    }

    async fn find_by_id(&self, ctx: &RequestContext, id: UserId) -> UserRepositoryResult<User> {
        let (ctx, span) = self.start(
            ctx,
            "find_user_by_id",
            "SELECT",
            vec![KeyValue::new("user.id", id)],
        );

        let result = self.inner.find_by_id(&ctx, id).await;
        if let Ok(user) = &result {
            span.set_attributes([
                KeyValue::new("user.name", user.name.clone()),
                KeyValue::new("user.email", user.email.clone()),
            ]);
        }
        finish(&span, &result);
        result
    }

    async fn find_all(&self, ctx: &RequestContext) -> UserRepositoryResult<Vec<User>> {
        let (ctx, span) = self.start(ctx, "find_all_users", "SELECT", Vec::new());

        let result = self.inner.find_all(&ctx).await;
        if let Ok(users) = &result {
            span.set_attribute(KeyValue::new("users.count", users.len() as i64));
        }
        finish(&span, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::panic::AssertUnwindSafe;

    use chrono::Utc;
    use futures_util::FutureExt;
    use opentelemetry::{Context, Value, trace::TracerProvider as _};
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{adapters::MemoryUserRepository, ports::UserRepositoryError};

    struct PanickingUsers;

    #[async_trait]
    impl UserRepository for PanickingUsers {
        fn backend(&self) -> &'static str {
            "panicking_db"
        }

        async fn create(&self, _ctx: &RequestContext, _user: User) -> UserRepositoryResult<User> {
            panic!("driver bug")
        }

        async fn find_by_id(&self, _ctx: &RequestContext, _id: UserId) -> UserRepositoryResult<User> {
            panic!("driver bug")
        }

        async fn find_all(&self, _ctx: &RequestContext) -> UserRepositoryResult<Vec<User>> {
            panic!("driver bug")
        }
    }

    fn traced_ctx() -> (RequestContext, InMemorySpanExporter, SdkTracerProvider) {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let ctx = RequestContext::new(
            Context::new(),
            Some(provider.tracer("test")),
            CancellationToken::new(),
        );
        (ctx, exporter, provider)
    }

    fn attribute(span: &SpanData, key: &str) -> Option<Value> {
        span.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.clone())
    }

    #[tokio::test]
    async fn test_success_is_tagged_and_passed_through() {
        let (ctx, exporter, _provider) = traced_ctx();
        let repo = TracedUserRepository::new(Arc::new(MemoryUserRepository::new()));

        let created = repo
            .create(&ctx, User::unsaved("Alice", "alice@example.com", Utc::now()))
            .await
            .unwrap();
        assert_eq!(created.id, 1);

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "memory_db.create_user");
        assert_eq!(attribute(&spans[0], "db.operation"), Some(Value::from("INSERT")));
        assert_eq!(attribute(&spans[0], "user.id"), Some(Value::I64(1)));
        assert_eq!(attribute(&spans[0], "query.success"), Some(Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_error_is_tagged_and_unchanged() {
        let (ctx, exporter, _provider) = traced_ctx();
        let repo = TracedUserRepository::new(Arc::new(MemoryUserRepository::new()));

        let err = repo.find_by_id(&ctx, 7).await.unwrap_err();
        assert_eq!(err, UserRepositoryError::NotFound(7));

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "memory_db.find_user_by_id");
        assert_eq!(attribute(&spans[0], "error"), Some(Value::Bool(true)));
        assert_eq!(
            attribute(&spans[0], "error.msg"),
            Some(Value::from("user 7 not found"))
        );
        assert_eq!(attribute(&spans[0], "query.success"), Some(Value::Bool(false)));
    }

    #[tokio::test]
    async fn test_span_ends_once_when_inner_panics() {
        let (ctx, exporter, _provider) = traced_ctx();
        let repo = TracedUserRepository::new(Arc::new(PanickingUsers));

        let outcome = AssertUnwindSafe(repo.find_all(&ctx)).catch_unwind().await;
        assert!(outcome.is_err());

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "panicking_db.find_all_users");
        assert_eq!(attribute(&spans[0], "error.type"), Some(Value::from("panic")));
    }

    #[tokio::test]
    async fn test_untraced_context_still_delegates() {
        let repo = TracedUserRepository::new(Arc::new(MemoryUserRepository::new()));
        let users = repo.find_all(&RequestContext::default()).await.unwrap();
        assert!(users.is_empty());
        assert_eq!(repo.backend(), "memory_db");
    }
}
