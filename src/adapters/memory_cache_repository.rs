//! In-process key-value cache with per-entry expiry.
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use scc::HashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    core::context::RequestContext,
    ports::{CACHE_TTL, CacheError, CacheLookup, CacheRepository, CacheResult},
};

/// How often [`MemoryCacheRepository::spawn_purge_task`] sweeps by default.
pub const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Clone)]
pub struct MemoryCacheRepository {
    entries: Arc<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl MemoryCacheRepository {
    pub fn new() -> Self {
        Self::with_ttl(CACHE_TTL)
    }

    /// Cache with a non-default entry lifetime.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drop every expired entry, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        let removed_ref = &mut removed;
        self.entries
            .retain_async(|_, entry| {
                let keep = !entry.is_expired(now);
                if !keep {
                    *removed_ref += 1;
                }
                keep
            })
            .await;
        removed
    }

    /// Number of resident entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sweep expired entries every `every` until `stop` is cancelled.
    ///
    /// Reads only evict the key they touch, so keys that are written and never
    /// read again are reclaimed here.
    pub fn spawn_purge_task(&self, every: Duration, stop: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = cache.purge_expired().await;
                        if removed > 0 {
                            tracing::debug!(removed, "Purged expired cache entries");
                        }
                    }
                }
            }
        })
    }
}

impl Default for MemoryCacheRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_active(ctx: &RequestContext) -> CacheResult<()> {
    if ctx.is_cancelled() {
        return Err(CacheError::Cancelled);
    }
    Ok(())
}

#[async_trait]
impl CacheRepository for MemoryCacheRepository {
    fn backend(&self) -> &'static str {
        "memory_cache"
    }

    async fn set(&self, ctx: &RequestContext, key: &str, value: &str) -> CacheResult<()> {
        ensure_active(ctx)?;

        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: Instant::now() + self.ttl,
        };
        self.entries
            .entry_async(key.to_string())
            .await
            .and_modify(|existing| *existing = entry.clone())
            .or_insert(entry);
        Ok(())
    }

    async fn get(&self, ctx: &RequestContext, key: &str) -> CacheResult<CacheLookup> {
        ensure_active(ctx)?;

        let key = key.to_string();
        let Some(entry) = self.entries.get_async(&key).await.map(|e| e.get().clone()) else {
            return Ok(CacheLookup::Miss);
        };

        if entry.is_expired(Instant::now()) {
            self.entries.remove_async(&key).await;
            return Ok(CacheLookup::Miss);
        }
        Ok(CacheLookup::Hit(entry.value))
    }

    async fn delete(&self, ctx: &RequestContext, key: &str) -> CacheResult<()> {
        ensure_active(ctx)?;

        self.entries.remove_async(&key.to_string()).await;
        Ok(())
    }
}
