use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::context::RequestContext;

/// Time-to-live applied to every entry written through [`CacheRepository::set`].
pub const CACHE_TTL: Duration = Duration::from_secs(300);

/// Error type for cache operations. A miss is not an error, see [`CacheLookup`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CacheError {
    /// The cache backend could not be reached or rejected the command
    #[error("cache failure: {0}")]
    Backend(String),

    /// The request owning this operation was cancelled before it ran
    #[error("cache operation cancelled")]
    Cancelled,
}

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Outcome of a successful cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(String),
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

/// CacheRepository defines the port (interface) for the key-value cache
#[async_trait]
pub trait CacheRepository: Send + Sync + 'static {
    /// Short identifier of the backing store, used to name spans (`<backend>.<operation>`).
    fn backend(&self) -> &'static str;

    /// Store `value` under `key` with the fixed [`CACHE_TTL`].
    async fn set(&self, ctx: &RequestContext, key: &str, value: &str) -> CacheResult<()>;

    /// Read `key`. Absent or expired keys resolve to [`CacheLookup::Miss`].
    async fn get(&self, ctx: &RequestContext, key: &str) -> CacheResult<CacheLookup>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, ctx: &RequestContext, key: &str) -> CacheResult<()>;
}
