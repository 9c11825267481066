//! Core types and contracts for the tinyurl data-access layer.
//!
//! This crate holds everything the storage, cache and shortener crates share:
//! the error taxonomy, the relational and key-value backend contracts, the
//! request context with its cache policy, the base-62 codec, the `ShortUrl`
//! model and the cursor pagination codec.

pub mod backend;
pub mod base62;
pub mod cache;
pub mod context;
pub mod error;
pub mod metric;
pub mod model;
pub mod pagination;

pub use backend::{
    CacheClient, IsolationLevel, Record, SqlClient, SqlReader, SqlTransaction, SqlValue, TxOptions,
};
pub use cache::{CacheKey, CachePolicy, CacheScope};
pub use context::Context;
pub use error::{CacheError, CacheResult, CloseError, DbError, DbResult, Interrupted};
pub use metric::{MetricSink, NoopMetrics, TracingMetrics};
pub use model::ShortUrl;
pub use pagination::{Cursor, Direction, Page, Pagination, PaginationError};
