use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use tinyurl_core::{CacheClient, CacheError, Context};
use tokio::sync::Mutex;
use tracing::{debug, trace};
use typed_builder::TypedBuilder;

use crate::error::Result;

/// A stored value together with the TTL it was written with.
#[derive(Debug, Clone)]
struct Entry {
    bytes: Arc<[u8]>,
    ttl: Option<Duration>,
}

/// Expires each entry after the TTL it was written with. Updates keep the
/// remaining lifetime, matching Redis `INCR` semantics.
struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// An in-process [`CacheClient`] backed by Moka.
///
/// Suited to single-node deployments and tests; entries live in this process
/// only and expire individually according to the TTL they were written with.
#[derive(Clone)]
pub struct MokaCacheClient {
    cache: Cache<String, Entry>,
    // Serializes read-modify-write increments.
    counter_lock: Arc<Mutex<()>>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for MokaCacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaCacheClient")
            .field("entries", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl MokaCacheClient {
    /// Creates a client with a default maximum capacity of 10,000 entries.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Creates a client holding at most `max_capacity` entries.
    pub fn with_capacity(max_capacity: u64) -> Self {
        MokaCacheConfig::builder()
            .max_capacity(max_capacity)
            .build()
            .into()
    }

    /// Returns a builder for creating a custom configuration.
    pub fn builder() -> MokaCacheConfigBuilder {
        MokaCacheConfig::builder()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Unavailable("client closed".to_string()));
        }
        Ok(())
    }
}

impl Default for MokaCacheClient {
    fn default() -> Self {
        Self::new()
    }
}

fn entry(value: &[u8], ttl: Duration) -> Entry {
    Entry {
        bytes: Arc::from(value),
        ttl: (!ttl.is_zero()).then_some(ttl),
    }
}

#[async_trait]
impl CacheClient for MokaCacheClient {
    async fn get(&self, ctx: &Context, key: &str) -> Result<Vec<u8>> {
        self.ensure_open()?;
        trace!(key, "Fetching value from Moka cache");

        match ctx.run(self.cache.get(key)).await? {
            Some(entry) => {
                debug!(key, "Cache hit in Moka");
                Ok(entry.bytes.to_vec())
            }
            None => {
                trace!(key, "Cache miss in Moka");
                Err(CacheError::NotFound)
            }
        }
    }

    async fn set_if_absent(
        &self,
        ctx: &Context,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool> {
        self.ensure_open()?;
        trace!(key, ttl = ?ttl, "Storing value in Moka cache");

        let stored = ctx
            .run(self.cache.entry(key.to_string()).or_insert(entry(value, ttl)))
            .await?;
        debug!(key, stored = stored.is_fresh(), "Wrote value to Moka cache");
        Ok(stored.is_fresh())
    }

    async fn delete(&self, ctx: &Context, key: &str) -> Result<()> {
        self.ensure_open()?;
        ctx.run(self.cache.invalidate(key)).await?;
        debug!(key, "Removed value from Moka cache (if present)");
        Ok(())
    }

    async fn increment(&self, ctx: &Context, key: &str) -> Result<i64> {
        self.ensure_open()?;

        ctx.run(async {
            let _guard = self.counter_lock.lock().await;
            let (current, ttl) = match self.cache.get(key).await {
                Some(entry) => {
                    let value = std::str::from_utf8(&entry.bytes)
                        .ok()
                        .and_then(|s| s.parse::<i64>().ok())
                        .ok_or_else(|| {
                            CacheError::Unavailable(format!(
                                "value at '{key}' is not an integer"
                            ))
                        })?;
                    (value, entry.ttl)
                }
                None => (0, None),
            };

            let next = current.checked_add(1).ok_or_else(|| {
                CacheError::Unavailable(format!("increment of '{key}' would overflow"))
            })?;
            let bytes = next.to_string().into_bytes();
            self.cache
                .insert(
                    key.to_string(),
                    Entry {
                        bytes: Arc::from(bytes),
                        ttl,
                    },
                )
                .await;
            Ok::<_, CacheError>(next)
        })
        .await?
    }

    async fn ping(&self, _ctx: &Context) -> Result<()> {
        self.ensure_open()
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.cache.invalidate_all();
            debug!("Closed Moka cache client");
        }
        Ok(())
    }
}

/// Configuration for creating a [`MokaCacheClient`] with custom settings.
#[derive(Debug, TypedBuilder, Default)]
pub struct MokaCacheConfig {
    /// Maximum number of entries the cache can hold.
    #[builder(default, setter(strip_option))]
    max_capacity: Option<u64>,
}

impl From<MokaCacheConfig> for MokaCacheClient {
    fn from(config: MokaCacheConfig) -> Self {
        let mut builder = Cache::builder().expire_after(EntryExpiry);

        if let Some(capacity) = config.max_capacity {
            builder = builder.max_capacity(capacity);
        }

        MokaCacheClient {
            cache: builder.build(),
            counter_lock: Arc::new(Mutex::new(())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let cache = MokaCacheClient::new();
        let ctx = Context::background();

        assert_eq!(cache.get(&ctx, "missing").await, Err(CacheError::NotFound));
    }

    #[tokio::test]
    async fn set_if_absent_then_get() {
        let cache = MokaCacheClient::new();
        let ctx = Context::background();

        assert!(cache.set_if_absent(&ctx, "k", b"first", TTL).await.unwrap());
        assert_eq!(cache.get(&ctx, "k").await.unwrap(), b"first".to_vec());
    }

    #[tokio::test]
    async fn set_if_absent_keeps_first_writer() {
        let cache = MokaCacheClient::new();
        let ctx = Context::background();

        assert!(cache.set_if_absent(&ctx, "k", b"first", TTL).await.unwrap());
        assert!(!cache.set_if_absent(&ctx, "k", b"second", TTL).await.unwrap());
        assert_eq!(cache.get(&ctx, "k").await.unwrap(), b"first".to_vec());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let cache = MokaCacheClient::new();
        let ctx = Context::background();

        cache.set_if_absent(&ctx, "k", b"v", TTL).await.unwrap();
        cache.delete(&ctx, "k").await.unwrap();
        cache.delete(&ctx, "k").await.unwrap();
        assert_eq!(cache.get(&ctx, "k").await, Err(CacheError::NotFound));
    }

    #[tokio::test]
    async fn entries_expire_after_their_ttl() {
        let cache = MokaCacheClient::new();
        let ctx = Context::background();

        cache
            .set_if_absent(&ctx, "short", b"v", Duration::from_millis(50))
            .await
            .unwrap();
        cache.set_if_absent(&ctx, "long", b"v", TTL).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(cache.get(&ctx, "short").await, Err(CacheError::NotFound));
        assert!(cache.get(&ctx, "long").await.is_ok());
    }

    #[tokio::test]
    async fn increment_starts_from_zero() {
        let cache = MokaCacheClient::new();
        let ctx = Context::background();

        assert_eq!(cache.increment(&ctx, "counter").await.unwrap(), 1);
        assert_eq!(cache.increment(&ctx, "counter").await.unwrap(), 2);
        assert_eq!(cache.get(&ctx, "counter").await.unwrap(), b"2".to_vec());
    }

    #[tokio::test]
    async fn increment_rejects_non_integer_values() {
        let cache = MokaCacheClient::new();
        let ctx = Context::background();

        cache.set_if_absent(&ctx, "k", b"{}", TTL).await.unwrap();
        assert!(matches!(
            cache.increment(&ctx, "k").await,
            Err(CacheError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let cache = MokaCacheClient::new();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.increment(&Context::background(), "hits").await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let ctx = Context::background();
        assert_eq!(cache.increment(&ctx, "hits").await.unwrap(), 21);
    }

    #[tokio::test]
    async fn canceled_context_short_circuits() {
        let cache = MokaCacheClient::new();
        let ctx = Context::background();
        ctx.cancel();

        assert_eq!(cache.get(&ctx, "k").await, Err(CacheError::Canceled));
    }

    #[tokio::test]
    async fn closed_client_is_unavailable() {
        let cache = MokaCacheClient::new();
        let ctx = Context::background();

        cache.close().await.unwrap();
        assert!(matches!(
            cache.get(&ctx, "k").await,
            Err(CacheError::Unavailable(_))
        ));
        assert!(cache.ping(&ctx).await.is_err());
    }
}
