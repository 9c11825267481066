//! Key-value cache clients for the tinyurl data-access layer.
//!
//! Both clients implement [`tinyurl_core::CacheClient`]: [`RedisCacheClient`]
//! for shared deployments and [`MokaCacheClient`] for a single process.

pub mod error;
pub mod moka;
pub mod redis;

pub use error::{map_redis_error, Result};
pub use moka::{MokaCacheClient, MokaCacheConfig};
pub use redis::RedisCacheClient;
