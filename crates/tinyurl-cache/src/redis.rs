use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tinyurl_core::{CacheClient, CacheError, Context, MetricSink};
use tracing::{debug, trace, warn};

use crate::error::{map_redis_error, Result};

/// A Redis-backed [`CacheClient`].
///
/// Values are stored as raw bytes under the caller-supplied key; no prefix is
/// added. Writes use `SET NX` so the first writer for a key wins.
#[derive(Clone)]
pub struct RedisCacheClient {
    conn: MultiplexedConnection,
    metrics: Arc<dyn MetricSink>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for RedisCacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheClient")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RedisCacheClient {
    /// Creates a client over an existing multiplexed connection.
    pub fn new(conn: MultiplexedConnection, metrics: Arc<dyn MetricSink>) -> Self {
        Self {
            conn,
            metrics,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Opens a connection to the Redis server at `url`.
    ///
    /// Failures here are construction errors (`CacheError::Connect`).
    pub async fn connect(url: &str, metrics: Arc<dyn MetricSink>) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Connect(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Connect(e.to_string()))?;
        debug!("Connected to Redis cache");
        Ok(Self::new(conn, metrics))
    }

    /// A connection handle, or `Unavailable` once the client was closed.
    fn conn(&self) -> Result<MultiplexedConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Unavailable("client closed".to_string()));
        }
        Ok(self.conn.clone())
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl CacheClient for RedisCacheClient {
    async fn get(&self, ctx: &Context, key: &str) -> Result<Vec<u8>> {
        trace!(key, "Fetching value from Redis cache");
        let mut conn = self.conn()?;

        match ctx.run(conn.get::<_, Option<Vec<u8>>>(key)).await? {
            Ok(Some(data)) => {
                self.metrics.cache_hit(key);
                debug!(key, "Cache hit in Redis");
                Ok(data)
            }
            Ok(None) => {
                self.metrics.cache_miss(key);
                trace!(key, "Cache miss in Redis");
                Err(CacheError::NotFound)
            }
            Err(e) => {
                self.metrics
                    .cache_error(key, &format!("failed to read redis key: {e}"));
                warn!(key, error = %e, "Redis error on get");
                Err(map_redis_error("failed to fetch value from Redis", e))
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
        trace!(key, ttl = ?ttl, "Storing value in Redis cache");
        let mut conn = self.conn()?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        // Redis rejects a zero expiry, so a zero TTL stores without one.
        if !ttl.is_zero() {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }

        match ctx.run(cmd.query_async::<Option<String>>(&mut conn)).await? {
            Ok(reply) => {
                let stored = reply.is_some();
                debug!(key, stored, "Wrote value to Redis cache");
                Ok(stored)
            }
            Err(e) => {
                self.metrics
                    .cache_error(key, &format!("failed to write value into key: {e}"));
                warn!(key, error = %e, "Failed to cache value in Redis");
                Err(map_redis_error("failed to write value to Redis", e))
            }
        }
    }

    async fn delete(&self, ctx: &Context, key: &str) -> Result<()> {
        trace!(key, "Removing value from Redis cache");
        let mut conn = self.conn()?;

        match ctx.run(conn.del::<_, ()>(key)).await? {
            Ok(()) => {
                debug!(key, "Removed value from Redis cache");
                Ok(())
            }
            Err(e) => {
                self.metrics
                    .cache_error(key, &format!("failed to delete redis key: {e}"));
                warn!(key, error = %e, "Failed to remove value from Redis cache");
                Err(map_redis_error("failed to delete value from Redis", e))
            }
        }
    }

    async fn increment(&self, ctx: &Context, key: &str) -> Result<i64> {
        let mut conn = self.conn()?;

        match ctx.run(conn.incr::<_, _, i64>(key, 1)).await? {
            Ok(current) => Ok(current),
            Err(e) => {
                self.metrics
                    .cache_error(key, &format!("failed to increment redis key: {e}"));
                warn!(key, error = %e, "Failed to increment Redis key");
                Err(map_redis_error("failed to increment value in Redis", e))
            }
        }
    }

    async fn ping(&self, ctx: &Context) -> Result<()> {
        let mut conn = self.conn()?;
        ctx.run(redis::cmd("PING").query_async::<String>(&mut conn))
            .await?
            .map(|_| ())
            .map_err(|e| map_redis_error("failed to ping Redis", e))
    }

    async fn close(&self) -> Result<()> {
        // The multiplexed connection is released once the last handle drops;
        // closing only stops this client from issuing further commands.
        if self.closed.swap(true, Ordering::AcqRel) {
            trace!("Redis cache client already closed");
        } else {
            debug!("Closed Redis cache client");
        }
        Ok(())
    }
}
