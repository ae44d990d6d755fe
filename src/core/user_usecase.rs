//! User business logic with cache-aside reads.
//!
//! The store is the source of truth. The cache is a best-effort accelerator:
//! failures to read or populate it are logged and never fail the operation.
use std::sync::Arc;

use chrono::Utc;
use opentelemetry::{KeyValue, trace::SpanKind};

use crate::{
    core::{
        context::{RepositoryLocator, RequestContext},
        error::AppError,
        logging::{self, Layer},
        user::{NewUser, User, UserId, user_cache_key},
    },
    metrics::{self, CacheLookupResult},
    ports::{CacheLookup, CacheRepository, UserRepository},
    telemetry::SpanScope,
};

#[derive(Clone)]
pub struct UserUseCase {
    users: Arc<dyn UserRepository>,
    cache: Arc<dyn CacheRepository>,
}

impl UserUseCase {
    pub fn new(users: Arc<dyn UserRepository>, cache: Arc<dyn CacheRepository>) -> Self {
        Self { users, cache }
    }

    pub fn from_locator(locator: &RepositoryLocator) -> Self {
        Self::new(locator.users(), locator.cache())
    }

    /// Validate and persist a new user, then cache it.
    ///
    /// `created_at` is taken at call time; the id is assigned by the store.
    pub async fn create_user(
        &self,
        ctx: &RequestContext,
        name: &str,
        email: &str,
    ) -> Result<User, AppError> {
        let (ctx, span) = ctx.start_span(
            "usecase.create_user",
            SpanKind::Internal,
            vec![
                KeyValue::new("user.name", name.to_string()),
                KeyValue::new("user.email", email.to_string()),
            ],
        );
        logging::info(&ctx, Layer::Usecase, format_args!("Creating user {name} <{email}>"));

        let new_user = NewUser::parse(name, email).inspect_err(|err| {
            logging::app_error(&ctx, Layer::Usecase, "Rejected user input", err);
        })?;

        let user = User::unsaved(new_user.name, new_user.email, Utc::now());
        let user = self.users.create(&ctx, user).await.map_err(|err| {
            let err = AppError::from_user_store("failed to create user", err);
            logging::app_error(&ctx, Layer::Usecase, "Failed to create user in repository", &err);
            err
        })?;

        span.set_attribute(KeyValue::new("user.id", user.id));
        logging::info(
            &ctx,
            Layer::Usecase,
            format_args!("User {} created, setting cache", user.id),
        );
        self.populate_cache(&ctx, &span, &user).await;

        Ok(user)
    }

    /// Cache-aside read: cache first, then the store, then a best-effort cache fill.
    pub async fn get_user(&self, ctx: &RequestContext, id: UserId) -> Result<User, AppError> {
        let (ctx, span) = ctx.start_span(
            "usecase.get_user",
            SpanKind::Internal,
            vec![KeyValue::new("user.id", id)],
        );
        logging::info(&ctx, Layer::Usecase, format_args!("Getting user by ID {id}"));

        if let Some(user) = self.read_cache(&ctx, id).await {
            span.set_attributes([
                KeyValue::new("cache.hit", true),
                KeyValue::new("data.source", "cache"),
                KeyValue::new("user.name", user.name.clone()),
                KeyValue::new("user.email", user.email.clone()),
            ]);
            logging::info(&ctx, Layer::Usecase, format_args!("User {id} found in cache"));
            return Ok(user);
        }

        span.set_attributes([
            KeyValue::new("cache.hit", false),
            KeyValue::new("data.source", "database"),
        ]);
        logging::info(
            &ctx,
            Layer::Usecase,
            format_args!("Cache miss, fetching user {id} from database"),
        );

        let user = self.users.find_by_id(&ctx, id).await.map_err(|err| {
            let err = AppError::from_user_store("failed to get user", err);
            logging::app_error(&ctx, Layer::Usecase, "Failed to get user from repository", &err);
            err
        })?;

        span.set_attributes([
            KeyValue::new("user.name", user.name.clone()),
            KeyValue::new("user.email", user.email.clone()),
        ]);
        self.populate_cache(&ctx, &span, &user).await;

        Ok(user)
    }

    /// Newest users first, at most [`crate::ports::USER_LIST_LIMIT`].
    pub async fn get_all_users(&self, ctx: &RequestContext) -> Result<Vec<User>, AppError> {
        let (ctx, span) = ctx.start_span(
            "usecase.get_all_users",
            SpanKind::Internal,
            vec![KeyValue::new("data.source", "database")],
        );
        logging::info(&ctx, Layer::Usecase, "Fetching all users");

        let users = self.users.find_all(&ctx).await.map_err(|err| {
            let err = AppError::from_user_store("failed to get users", err);
            logging::app_error(
                &ctx,
                Layer::Usecase,
                "Failed to fetch users from repository",
                &err,
            );
            err
        })?;

        span.set_attributes([
            KeyValue::new("users.count", users.len() as i64),
            KeyValue::new("query.success", true),
        ]);
        logging::info(
            &ctx,
            Layer::Usecase,
            format_args!("Fetched {} users", users.len()),
        );

        Ok(users)
    }

    /// Panics a few frames below the use case boundary.
    ///
    /// Backs the `/api/panic` demonstration endpoint that exercises the
    /// recovery middleware.
    pub async fn test_panic(&self, ctx: &RequestContext) -> Result<(), AppError> {
        let (ctx, _span) = ctx.start_span("usecase.test_panic", SpanKind::Internal, vec![]);
        logging::warn(&ctx, Layer::Usecase, "About to panic on purpose");
        let users: Vec<User> = Vec::new();
        let first = deep_lookup(&users, 0);
        logging::info(&ctx, Layer::Usecase, format_args!("unreachable: {}", first.name));
        Ok(())
    }

    /// Returns `None` on a miss, on a cache failure and on an undecodable entry.
    async fn read_cache(&self, ctx: &RequestContext, id: UserId) -> Option<User> {
        let key = user_cache_key(id);
        match self.cache.get(ctx, &key).await {
            Ok(CacheLookup::Hit(payload)) => match serde_json::from_str::<User>(&payload) {
                Ok(user) => {
                    metrics::record_cache_lookup(CacheLookupResult::Hit);
                    Some(user)
                }
                Err(e) => {
                    metrics::record_cache_lookup(CacheLookupResult::Error);
                    logging::warn(
                        ctx,
                        Layer::Usecase,
                        format_args!("Discarding undecodable cache entry {key}: {e}"),
                    );
                    None
                }
            },
            Ok(CacheLookup::Miss) => {
                metrics::record_cache_lookup(CacheLookupResult::Miss);
                None
            }
            Err(e) => {
                metrics::record_cache_lookup(CacheLookupResult::Error);
                logging::warn(
                    ctx,
                    Layer::Usecase,
                    format_args!("Cache read for {key} failed, falling back to database: {e}"),
                );
                None
            }
        }
    }

    async fn populate_cache(&self, ctx: &RequestContext, span: &SpanScope, user: &User) {
        let key = user_cache_key(user.id);
        let payload = match serde_json::to_string(user) {
            Ok(payload) => payload,
            Err(e) => {
                span.set_attribute(KeyValue::new("cache.set", false));
                logging::error(ctx, Layer::Usecase, "Failed to encode user for cache", &e, true);
                return;
            }
        };

        match self.cache.set(ctx, &key, &payload).await {
            Ok(()) => {
                span.set_attribute(KeyValue::new("cache.set", true));
                logging::info(ctx, Layer::Usecase, format_args!("User cached under {key}"));
            }
            Err(e) => {
                span.set_attributes([
                    KeyValue::new("cache.set", false),
                    KeyValue::new("cache.error", e.to_string()),
                ]);
                logging::error(ctx, Layer::Usecase, "Failed to set user cache", &e, true);
            }
        }
    }
}

fn deep_lookup(users: &[User], index: usize) -> &User {
    &users[index]
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        adapters::{MemoryCacheRepository, MemoryUserRepository},
        ports::{
            CacheError, CacheResult, UserRepositoryError, UserRepositoryResult,
        },
    };

    /// Counts lookups on top of the in-memory store.
    struct SpyUsers {
        inner: MemoryUserRepository,
        find_by_id_calls: AtomicUsize,
    }

    #[async_trait]
    impl UserRepository for SpyUsers {
        fn backend(&self) -> &'static str {
            "spy_db"
        }

        async fn create(&self, ctx: &RequestContext, user: User) -> UserRepositoryResult<User> {
            self.inner.create(ctx, user).await
        }

        async fn find_by_id(&self, ctx: &RequestContext, id: UserId) -> UserRepositoryResult<User> {
            self.find_by_id_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.find_by_id(ctx, id).await
        }

        async fn find_all(&self, ctx: &RequestContext) -> UserRepositoryResult<Vec<User>> {
            self.inner.find_all(ctx).await
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl CacheRepository for BrokenCache {
        fn backend(&self) -> &'static str {
            "broken_cache"
        }

        async fn set(&self, _ctx: &RequestContext, _key: &str, _value: &str) -> CacheResult<()> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn get(&self, _ctx: &RequestContext, _key: &str) -> CacheResult<CacheLookup> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn delete(&self, _ctx: &RequestContext, _key: &str) -> CacheResult<()> {
            Err(CacheError::Backend("connection refused".into()))
        }
    }

    struct BrokenUsers;

    #[async_trait]
    impl UserRepository for BrokenUsers {
        fn backend(&self) -> &'static str {
            "broken_db"
        }

        async fn create(&self, _ctx: &RequestContext, _user: User) -> UserRepositoryResult<User> {
            Err(UserRepositoryError::Backend("disk full".into()))
        }

        async fn find_by_id(&self, _ctx: &RequestContext, _id: UserId) -> UserRepositoryResult<User> {
            Err(UserRepositoryError::Backend("connection reset".into()))
        }

        async fn find_all(&self, _ctx: &RequestContext) -> UserRepositoryResult<Vec<User>> {
            Err(UserRepositoryError::Backend("connection reset".into()))
        }
    }

    fn spy_usecase() -> (UserUseCase, Arc<SpyUsers>, Arc<MemoryCacheRepository>) {
        let users = Arc::new(SpyUsers {
            inner: MemoryUserRepository::new(),
            find_by_id_calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(MemoryCacheRepository::new());
        (
            UserUseCase::new(users.clone(), cache.clone()),
            users,
            cache,
        )
    }

    #[tokio::test]
    async fn test_create_user_assigns_id_and_timestamp() {
        let (usecase, _, cache) = spy_usecase();
        let ctx = RequestContext::default();

        let before = Utc::now();
        let user = usecase
            .create_user(&ctx, "Alice", "alice@example.com")
            .await
            .unwrap();
        let after = Utc::now();

        assert!(user.id > 0);
        assert_eq!(user.name, "Alice");
        assert!(user.created_at >= before && user.created_at <= after);
        assert!(cache.get(&ctx, &user_cache_key(user.id)).await.unwrap().is_hit());
    }

    #[tokio::test]
    async fn test_get_user_after_miss_is_served_from_cache() {
        let (usecase, users, cache) = spy_usecase();
        let ctx = RequestContext::default();

        let created = usecase
            .create_user(&ctx, "Bob", "bob@example.com")
            .await
            .unwrap();
        cache.delete(&ctx, &user_cache_key(created.id)).await.unwrap();

        let first = usecase.get_user(&ctx, created.id).await.unwrap();
        let second = usecase.get_user(&ctx, created.id).await.unwrap();

        assert_eq!(first, created);
        assert_eq!(second, created);
        assert_eq!(users.find_by_id_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found_and_not_cached() {
        let (usecase, _, cache) = spy_usecase();
        let ctx = RequestContext::default();

        let err = usecase.get_user(&ctx, 999_999).await.unwrap_err();
        assert_eq!(err, AppError::NotFound { id: 999_999 });
        assert!(!err.notify());
        assert_eq!(
            cache.get(&ctx, &user_cache_key(999_999)).await.unwrap(),
            CacheLookup::Miss
        );
    }

    #[tokio::test]
    async fn test_undecodable_cache_entry_is_a_miss() {
        let (usecase, users, cache) = spy_usecase();
        let ctx = RequestContext::default();

        let created = usecase
            .create_user(&ctx, "Carol", "carol@example.com")
            .await
            .unwrap();
        cache
            .set(&ctx, &user_cache_key(created.id), "{not json")
            .await
            .unwrap();

        let user = usecase.get_user(&ctx, created.id).await.unwrap();
        assert_eq!(user, created);
        assert_eq!(users.find_by_id_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_failures_do_not_fail_operations() {
        let usecase = UserUseCase::new(Arc::new(MemoryUserRepository::new()), Arc::new(BrokenCache));
        let ctx = RequestContext::default();

        let created = usecase
            .create_user(&ctx, "Dave", "dave@example.com")
            .await
            .unwrap();
        let fetched = usecase.get_user(&ctx, created.id).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_store_failures_are_internal() {
        let usecase = UserUseCase::new(Arc::new(BrokenUsers), Arc::new(MemoryCacheRepository::new()));
        let ctx = RequestContext::default();

        let err = usecase.get_all_users(&ctx).await.unwrap_err();
        assert!(err.notify());
        assert_eq!(
            err.to_string(),
            "failed to get users: user store failure: connection reset"
        );

        let err = usecase
            .create_user(&ctx, "Erin", "erin@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal { .. }));
    }

    #[tokio::test]
    async fn test_validation_and_conflict_are_expected_errors() {
        let (usecase, _, _) = spy_usecase();
        let ctx = RequestContext::default();

        let err = usecase.create_user(&ctx, "", "x@example.com").await.unwrap_err();
        assert!(matches!(err, AppError::Validation { field: "name", .. }));

        usecase
            .create_user(&ctx, "Frank", "frank@example.com")
            .await
            .unwrap();
        let err = usecase
            .create_user(&ctx, "Frank Two", "frank@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(!err.notify());
    }

    #[tokio::test]
    async fn test_get_all_users_is_stable() {
        let (usecase, _, _) = spy_usecase();
        let ctx = RequestContext::default();
        for i in 0..3 {
            usecase
                .create_user(&ctx, &format!("User {i}"), &format!("user{i}@example.com"))
                .await
                .unwrap();
        }

        let first = usecase.get_all_users(&ctx).await.unwrap();
        let second = usecase.get_all_users(&ctx).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }
}
