pub mod demo_handler;
pub mod http_handler;
pub mod memory_cache_repository;
pub mod memory_user_repository;
pub mod middleware;
pub mod problem;
pub mod recovery;
pub mod response;
pub mod router;
pub mod traced_cache_repository;
pub mod traced_user_repository;

use std::sync::Arc;

/// Re-export commonly used types from adapters
pub use memory_cache_repository::MemoryCacheRepository;
pub use memory_user_repository::MemoryUserRepository;
pub use middleware::{CorsPolicy, RequestCtx};
pub use problem::{ProblemDetail, ProblemType};
pub use recovery::{install_panic_hook, recovery_middleware};
pub use response::ApiResponse;
pub use router::{AppState, build_router};
pub use traced_cache_repository::TracedCacheRepository;
pub use traced_user_repository::TracedUserRepository;

use crate::core::context::RepositoryLocator;

/// Locator over fresh in-memory stores, optionally wrapped in the tracing
/// decorators.
pub fn in_memory_locator(traced: bool) -> RepositoryLocator {
    in_memory_stores(traced).0
}

/// Like [`in_memory_locator`], also handing back the undecorated cache so the
/// caller can run its purge task.
pub fn in_memory_stores(traced: bool) -> (RepositoryLocator, MemoryCacheRepository) {
    let users = Arc::new(MemoryUserRepository::new());
    let cache = MemoryCacheRepository::new();
    let shared = Arc::new(cache.clone());
    let locator = if traced {
        RepositoryLocator::new(
            Arc::new(TracedUserRepository::new(users)),
            Arc::new(TracedCacheRepository::with_ttl(shared, cache.ttl())),
        )
    } else {
        RepositoryLocator::new(users, shared)
    };
    (locator, cache)
}
