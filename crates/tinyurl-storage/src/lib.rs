//! Relational storage for tinyurl: the PostgreSQL client and the
//! read-through cache decorator that sits in front of it.

pub mod cached;
pub mod error;
pub mod postgres;

pub use cached::CachedReader;
pub use error::map_sqlx_error;
pub use postgres::{PostgresClient, PostgresConfig, PostgresTransaction, SCHEMA};
