//! Contracts for the relational store and the key-value cache.
//!
//! Callers above this layer never handle driver connections, rows or errors.
//! The one exception is [`Record`], which names sqlx's `FromRow<PgRow>` so
//! that PostgreSQL, the only relational backend, can decode rows directly.
//! Every operation takes the request [`Context`] and returns a taxonomy error
//! from [`crate::error`].

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::FromRow;

use crate::context::Context;
use crate::error::{CacheResult, DbResult};

/// A destination type for relational reads.
///
/// Rows must be decodable from the database and round-trip through JSON so the
/// read-through cache can store them.
pub trait Record:
    Serialize + DeserializeOwned + for<'r> FromRow<'r, PgRow> + Send + Unpin + 'static
{
}

impl<T> Record for T where
    T: Serialize + DeserializeOwned + for<'r> FromRow<'r, PgRow> + Send + Unpin + 'static
{
}

/// A bind argument for a relational statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Isolation level requested when opening a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IsolationLevel::ReadCommitted => f.write_str("READ COMMITTED"),
            IsolationLevel::RepeatableRead => f.write_str("REPEATABLE READ"),
            IsolationLevel::Serializable => f.write_str("SERIALIZABLE"),
        }
    }
}

/// Options for [`SqlClient::begin_transaction`].
///
/// The default keeps the backend's own isolation level and access mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
}

impl TxOptions {
    /// The `SET TRANSACTION` statement these options require, if any.
    pub fn set_transaction_statement(&self) -> Option<String> {
        let mut modes = Vec::new();
        if let Some(level) = self.isolation {
            modes.push(format!("ISOLATION LEVEL {level}"));
        }
        if self.read_only {
            modes.push("READ ONLY".to_string());
        }
        if modes.is_empty() {
            None
        } else {
            Some(format!("SET TRANSACTION {}", modes.join(", ")))
        }
    }
}

/// Read side of a relational client.
#[async_trait]
pub trait SqlReader: Send + Sync + 'static {
    /// Runs `query` and decodes every returned row.
    async fn fetch_many<T: Record>(
        &self,
        ctx: &Context,
        query: &str,
        args: &[SqlValue],
    ) -> DbResult<Vec<T>>;

    /// Runs `query` and decodes the first row. No rows is `DbError::NotFound`.
    async fn fetch_one<T: Record>(
        &self,
        ctx: &Context,
        query: &str,
        args: &[SqlValue],
    ) -> DbResult<T>;

    async fn ping(&self, ctx: &Context) -> DbResult<()>;

    /// Releases the connections held by this reader.
    async fn close(&self) -> DbResult<()>;
}

/// A relational client able to write and open transactions.
#[async_trait]
pub trait SqlClient: SqlReader {
    type Transaction: SqlTransaction;

    /// Runs a statement that returns no rows; yields the number of rows affected.
    async fn execute(&self, ctx: &Context, query: &str, args: &[SqlValue]) -> DbResult<u64>;

    /// Opens a transaction. The caller must commit or roll it back.
    async fn begin_transaction(
        &self,
        ctx: &Context,
        options: TxOptions,
    ) -> DbResult<Self::Transaction>;
}

/// An open relational transaction. Statements run strictly in call order.
#[async_trait]
pub trait SqlTransaction: Send + 'static {
    async fn fetch_many<T: Record>(
        &mut self,
        ctx: &Context,
        query: &str,
        args: &[SqlValue],
    ) -> DbResult<Vec<T>>;

    async fn fetch_one<T: Record>(
        &mut self,
        ctx: &Context,
        query: &str,
        args: &[SqlValue],
    ) -> DbResult<T>;

    async fn execute(&mut self, ctx: &Context, query: &str, args: &[SqlValue]) -> DbResult<u64>;

    async fn commit(&mut self) -> DbResult<()>;

    /// Rolls back the transaction. Calling it after commit or rollback has no effect.
    async fn rollback(&mut self) -> DbResult<()>;
}

/// A key-value cache client.
#[async_trait]
pub trait CacheClient: Send + Sync + 'static {
    /// Returns the raw bytes stored under `key`; a missing key is `CacheError::NotFound`.
    async fn get(&self, ctx: &Context, key: &str) -> CacheResult<Vec<u8>>;

    /// Stores `value` under `key` only if the key holds nothing yet.
    ///
    /// Returns whether the value was stored. The first successful writer wins,
    /// so a slow request never clobbers a fresher concurrent entry.
    async fn set_if_absent(
        &self,
        ctx: &Context,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> CacheResult<bool>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn delete(&self, ctx: &Context, key: &str) -> CacheResult<()>;

    /// Atomically increments the integer under `key`, starting from zero.
    async fn increment(&self, ctx: &Context, key: &str) -> CacheResult<i64>;

    async fn ping(&self, ctx: &Context) -> CacheResult<()>;

    async fn close(&self) -> CacheResult<()>;
}

/// Lets a shared or type-erased client (`Arc<dyn CacheClient>`) stand in for a
/// concrete one.
#[async_trait]
impl<C: CacheClient + ?Sized> CacheClient for std::sync::Arc<C> {
    async fn get(&self, ctx: &Context, key: &str) -> CacheResult<Vec<u8>> {
        (**self).get(ctx, key).await
    }

    async fn set_if_absent(
        &self,
        ctx: &Context,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> CacheResult<bool> {
        (**self).set_if_absent(ctx, key, value, ttl).await
    }

    async fn delete(&self, ctx: &Context, key: &str) -> CacheResult<()> {
        (**self).delete(ctx, key).await
    }

    async fn increment(&self, ctx: &Context, key: &str) -> CacheResult<i64> {
        (**self).increment(ctx, key).await
    }

    async fn ping(&self, ctx: &Context) -> CacheResult<()> {
        (**self).ping(ctx).await
    }

    async fn close(&self) -> CacheResult<()> {
        (**self).close().await
    }
}
