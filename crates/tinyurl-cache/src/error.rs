use tinyurl_core::CacheError;

/// Type alias for cache results.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Maps a Redis client failure into the cache taxonomy.
///
/// A missing key is not a Redis error (it is a `nil` reply, surfaced as
/// `CacheError::NotFound` at the call site), and cancellation comes from the
/// request context, so everything reaching this function is `Unavailable`.
pub fn map_redis_error(operation: &str, err: redis::RedisError) -> CacheError {
    CacheError::Unavailable(format!("{operation}: {err}"))
}
