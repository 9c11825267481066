use std::time::Duration;

use tracing::debug;

/// Sink for data-access observability signals.
///
/// The data-access layer only calls this interface; exporting the points to a
/// metrics backend is the sink's business.
pub trait MetricSink: Send + Sync + 'static {
    /// A read served from the cache. `elapsed` covers lookup and decoding.
    fn memory_hit(&self, key: &str, elapsed: Duration);

    /// A read that fell through to the database. `elapsed` covers the cache
    /// lookup, the fetch, and the cache write-back.
    fn memory_miss(&self, key: &str, elapsed: Duration);

    /// A cache entry existed but could not be decoded.
    fn memory_invalid(&self, key: &str);

    /// Caching was not enabled for the read.
    fn memory_bypassed(&self);

    fn cache_hit(&self, key: &str);

    fn cache_miss(&self, key: &str);

    fn cache_error(&self, key: &str, message: &str);

    fn db_query(&self, query: &str, elapsed: Duration);

    fn db_error(&self, query: &str, message: &str);
}

/// Discards every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricSink for NoopMetrics {
    fn memory_hit(&self, _key: &str, _elapsed: Duration) {}
    fn memory_miss(&self, _key: &str, _elapsed: Duration) {}
    fn memory_invalid(&self, _key: &str) {}
    fn memory_bypassed(&self) {}
    fn cache_hit(&self, _key: &str) {}
    fn cache_miss(&self, _key: &str) {}
    fn cache_error(&self, _key: &str, _message: &str) {}
    fn db_query(&self, _query: &str, _elapsed: Duration) {}
    fn db_error(&self, _query: &str, _message: &str) {}
}

/// Emits every signal as a structured `tracing` event under the
/// `tinyurl::metric` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

impl MetricSink for TracingMetrics {
    fn memory_hit(&self, key: &str, elapsed: Duration) {
        debug!(target: "tinyurl::metric", metric = "memory.hit", key, latency_ms = millis(elapsed));
    }

    fn memory_miss(&self, key: &str, elapsed: Duration) {
        debug!(
            target: "tinyurl::metric",
            metric = "memory.miss",
            key,
            latency_ms = millis(elapsed)
        );
    }

    fn memory_invalid(&self, key: &str) {
        debug!(target: "tinyurl::metric", metric = "memory.invalid", key);
    }

    fn memory_bypassed(&self) {
        debug!(target: "tinyurl::metric", metric = "memory.bypassed");
    }

    fn cache_hit(&self, key: &str) {
        debug!(target: "tinyurl::metric", metric = "cache.hit", key);
    }

    fn cache_miss(&self, key: &str) {
        debug!(target: "tinyurl::metric", metric = "cache.miss", key);
    }

    fn cache_error(&self, key: &str, message: &str) {
        debug!(target: "tinyurl::metric", metric = "cache.error", key, message);
    }

    fn db_query(&self, query: &str, elapsed: Duration) {
        debug!(target: "tinyurl::metric", metric = "db.query", query, latency_ms = millis(elapsed));
    }

    fn db_error(&self, query: &str, message: &str) {
        debug!(target: "tinyurl::metric", metric = "db.error", query, message);
    }
}
