use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::{Query, QueryAs};
use sqlx::{PgConnection, PgPool, Postgres};
use tinyurl_core::{
    Context, DbError, DbResult, MetricSink, Record, SqlClient, SqlReader, SqlTransaction, SqlValue,
    TxOptions,
};
use tracing::{debug, trace, warn};
use typed_builder::TypedBuilder;

use crate::error::map_sqlx_error;

/// DDL for the `urls` table. Every statement is idempotent.
pub const SCHEMA: &str = include_str!("../ddl/postgres/urls.sql");

const BEGIN: &str = "START TRANSACTION;";
const COMMIT: &str = "COMMIT TRANSACTION;";
const ROLLBACK: &str = "ROLLBACK;";

/// Connection settings for [`PostgresClient::connect`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct PostgresConfig {
    #[builder(setter(into))]
    url: String,
    #[builder(default = 5)]
    max_connections: u32,
    #[builder(default = Duration::from_secs(5))]
    acquire_timeout: Duration,
}

/// A [`SqlClient`] over a sqlx PostgreSQL pool.
///
/// Every statement is reported to the metric sink: `db_query` always, and
/// `db_error` for failures other than a missing row.
#[derive(Clone)]
pub struct PostgresClient {
    pool: PgPool,
    metrics: Arc<dyn MetricSink>,
}

impl std::fmt::Debug for PostgresClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresClient")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl PostgresClient {
    /// Creates a client from an existing connection pool.
    pub fn new(pool: PgPool, metrics: Arc<dyn MetricSink>) -> Self {
        Self { pool, metrics }
    }

    /// Creates a client by opening a new connection pool.
    pub async fn connect(config: &PostgresConfig, metrics: Arc<dyn MetricSink>) -> DbResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| DbError::Connect(e.to_string()))?;
        debug!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self::new(pool, metrics))
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the `urls` table and its indexes if they do not exist yet.
    pub async fn migrate(&self, ctx: &Context) -> DbResult<()> {
        let started = Instant::now();
        let result = run(ctx, sqlx::raw_sql(SCHEMA).execute(&self.pool))
            .await
            .map(|_| ());
        track(self.metrics.as_ref(), "MIGRATE urls", started, &result);
        result
    }
}

/// Races a driver future against the context and maps both failure kinds.
async fn run<T, F>(ctx: &Context, fut: F) -> DbResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    ctx.run(fut).await?.map_err(map_sqlx_error)
}

fn track<T>(metrics: &dyn MetricSink, query: &str, started: Instant, result: &DbResult<T>) {
    metrics.db_query(query, started.elapsed());

    match result {
        Ok(_) | Err(DbError::NotFound) => {}
        Err(err) => {
            warn!(query, error = %err, "PostgreSQL statement failed");
            metrics.db_error(query, &err.to_string());
        }
    }
}

fn bind<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &'q [SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for arg in args {
        query = match arg {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(value) => query.bind(*value),
            SqlValue::Int(value) => query.bind(*value),
            SqlValue::Text(value) => query.bind(value.as_str()),
        };
    }
    query
}

fn bind_as<'q, T>(
    mut query: QueryAs<'q, Postgres, T, PgArguments>,
    args: &'q [SqlValue],
) -> QueryAs<'q, Postgres, T, PgArguments> {
    for arg in args {
        query = match arg {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(value) => query.bind(*value),
            SqlValue::Int(value) => query.bind(*value),
            SqlValue::Text(value) => query.bind(value.as_str()),
        };
    }
    query
}

#[async_trait]
impl SqlReader for PostgresClient {
    async fn fetch_many<T: Record>(
        &self,
        ctx: &Context,
        query: &str,
        args: &[SqlValue],
    ) -> DbResult<Vec<T>> {
        trace!(query, args = args.len(), "Fetching rows from PostgreSQL");
        let started = Instant::now();
        let result = run(
            ctx,
            bind_as(sqlx::query_as::<_, T>(query), args).fetch_all(&self.pool),
        )
        .await;
        track(self.metrics.as_ref(), query, started, &result);
        result
    }

    async fn fetch_one<T: Record>(
        &self,
        ctx: &Context,
        query: &str,
        args: &[SqlValue],
    ) -> DbResult<T> {
        trace!(query, args = args.len(), "Fetching row from PostgreSQL");
        let started = Instant::now();
        let result = run(
            ctx,
            bind_as(sqlx::query_as::<_, T>(query), args).fetch_one(&self.pool),
        )
        .await;
        track(self.metrics.as_ref(), query, started, &result);
        result
    }

    async fn ping(&self, ctx: &Context) -> DbResult<()> {
        run(ctx, sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map(|_| ())
    }

    async fn close(&self) -> DbResult<()> {
        self.pool.close().await;
        debug!("Closed PostgreSQL pool");
        Ok(())
    }
}

#[async_trait]
impl SqlClient for PostgresClient {
    type Transaction = PostgresTransaction;

    async fn execute(&self, ctx: &Context, query: &str, args: &[SqlValue]) -> DbResult<u64> {
        trace!(query, args = args.len(), "Executing statement on PostgreSQL");
        let started = Instant::now();
        let result = run(ctx, bind(sqlx::query(query), args).execute(&self.pool))
            .await
            .map(|done| done.rows_affected());
        track(self.metrics.as_ref(), query, started, &result);
        result
    }

    async fn begin_transaction(
        &self,
        ctx: &Context,
        options: TxOptions,
    ) -> DbResult<PostgresTransaction> {
        let started = Instant::now();
        let result = async {
            let mut tx = run(ctx, self.pool.begin()).await?;
            if let Some(statement) = options.set_transaction_statement() {
                run(ctx, sqlx::query(&statement).execute(&mut *tx)).await?;
            }
            Ok::<_, DbError>(tx)
        }
        .await;
        track(self.metrics.as_ref(), BEGIN, started, &result);

        Ok(PostgresTransaction {
            tx: Some(result?),
            metrics: self.metrics.clone(),
        })
    }
}

/// An open PostgreSQL transaction.
///
/// Dropping it without committing rolls it back.
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
    metrics: Arc<dyn MetricSink>,
}

impl std::fmt::Debug for PostgresTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTransaction")
            .field("open", &self.tx.is_some())
            .finish_non_exhaustive()
    }
}

impl PostgresTransaction {
    fn conn(&mut self) -> DbResult<&mut PgConnection> {
        self.tx.as_deref_mut().ok_or_else(|| {
            DbError::backend(std::io::Error::other("transaction already finished"))
        })
    }
}

#[async_trait]
impl SqlTransaction for PostgresTransaction {
    async fn fetch_many<T: Record>(
        &mut self,
        ctx: &Context,
        query: &str,
        args: &[SqlValue],
    ) -> DbResult<Vec<T>> {
        let started = Instant::now();
        let conn = self.conn()?;
        let result = run(
            ctx,
            bind_as(sqlx::query_as::<_, T>(query), args).fetch_all(conn),
        )
        .await;
        track(self.metrics.as_ref(), query, started, &result);
        result
    }

    async fn fetch_one<T: Record>(
        &mut self,
        ctx: &Context,
        query: &str,
        args: &[SqlValue],
    ) -> DbResult<T> {
        let started = Instant::now();
        let conn = self.conn()?;
        let result = run(
            ctx,
            bind_as(sqlx::query_as::<_, T>(query), args).fetch_one(conn),
        )
        .await;
        track(self.metrics.as_ref(), query, started, &result);
        result
    }

    async fn execute(&mut self, ctx: &Context, query: &str, args: &[SqlValue]) -> DbResult<u64> {
        let started = Instant::now();
        let conn = self.conn()?;
        let result = run(ctx, bind(sqlx::query(query), args).execute(conn))
            .await
            .map(|done| done.rows_affected());
        track(self.metrics.as_ref(), query, started, &result);
        result
    }

    async fn commit(&mut self) -> DbResult<()> {
        let Some(tx) = self.tx.take() else {
            return Err(DbError::backend(std::io::Error::other(
                "transaction already finished",
            )));
        };

        let started = Instant::now();
        let result = tx.commit().await.map_err(map_sqlx_error);
        track(self.metrics.as_ref(), COMMIT, started, &result);
        result
    }

    async fn rollback(&mut self) -> DbResult<()> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };

        let started = Instant::now();
        let result = tx.rollback().await.map_err(map_sqlx_error);
        track(self.metrics.as_ref(), ROLLBACK, started, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS urls"));
        assert!(SCHEMA.contains("id BIGSERIAL PRIMARY KEY"));
    }

    #[test]
    fn config_defaults() {
        let config = PostgresConfig::builder()
            .url("postgres://localhost/tinyurl")
            .build();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
    }
}
