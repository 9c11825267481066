use std::fmt::{Display, Formatter};

use tinyurl_core::{
    CloseError, Context, Cursor, DbError, DbResult, ShortUrl, SqlClient, SqlReader,
    SqlTransaction, SqlValue, TxOptions,
};
use tracing::{debug, trace, warn};

const INSERT_URL: &str = "INSERT INTO urls (target, code) VALUES ($1, '') \
                          RETURNING id, target, code, created_at, updated_at";
const SET_CODE: &str = "UPDATE urls SET code = $1 WHERE id = $2";
const SELECT_URLS: &str = "SELECT id, code, target, created_at, updated_at FROM urls";
const SELECT_URL_BY_ID: &str =
    "SELECT id, code, target, created_at, updated_at FROM urls WHERE id = $1";

/// A dependency that failed a readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    PrimaryDatabase,
    Memory,
}

impl Dependency {
    /// Machine-readable reason reported by readiness probes.
    pub fn reason(&self) -> &'static str {
        match self {
            Dependency::PrimaryDatabase => "db_primary_unavailable",
            Dependency::Memory => "memory_unavailable",
        }
    }
}

impl Display for Dependency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

impl std::error::Error for Dependency {}

/// Data access for short URLs.
///
/// Writes go to the primary client `D`; reads go through `M`, typically a
/// [`CachedReader`](tinyurl_storage::CachedReader) over a replica, so they
/// honor the cache policy carried by the request context.
#[derive(Debug, Clone)]
pub struct UrlRepository<D, M> {
    db: D,
    memory: M,
}

impl<D: SqlClient, M: SqlReader> UrlRepository<D, M> {
    pub fn new(db: D, memory: M) -> Self {
        Self { db, memory }
    }

    /// Returns a reference to the primary client.
    pub fn db(&self) -> &D {
        &self.db
    }

    /// Returns a reference to the read client.
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Stores `target` and derives its short code from the assigned id.
    ///
    /// The insert and the code update run in one transaction: either both
    /// are committed or neither is. A failed rollback is logged and never
    /// replaces the error that triggered it.
    pub async fn create(&self, ctx: &Context, target: &str) -> DbResult<ShortUrl> {
        let mut tx = self.db.begin_transaction(ctx, TxOptions::default()).await?;

        let url = match insert_with_code(ctx, &mut tx, target).await {
            Ok(url) => url,
            Err(e) => {
                rollback(&mut tx).await;
                return Err(e);
            }
        };

        if let Err(e) = tx.commit().await {
            rollback(&mut tx).await;
            return Err(e);
        }

        debug!(id = url.id, code = %url.code, "Created short url");
        Ok(url)
    }

    /// Lists up to `limit` URLs, newest first, bounded by `cursor`.
    pub async fn list(
        &self,
        ctx: &Context,
        limit: usize,
        cursor: Cursor,
    ) -> DbResult<Vec<ShortUrl>> {
        let limit = SqlValue::Int(i64::try_from(limit).unwrap_or(i64::MAX));

        match cursor.bound {
            Some(bound) => {
                // Ids are BIGINT; larger bounds saturate.
                let bound = SqlValue::Int(i64::try_from(bound).unwrap_or(i64::MAX));
                let query = format!(
                    "{SELECT_URLS} WHERE id {} $1 ORDER BY id DESC LIMIT $2",
                    cursor.direction.operator()
                );
                trace!(query = %query, "Listing urls from cursor");
                self.memory.fetch_many(ctx, &query, &[bound, limit]).await
            }
            None => {
                let query = format!("{SELECT_URLS} ORDER BY id DESC LIMIT $1");
                trace!(query = %query, "Listing first page of urls");
                self.memory.fetch_many(ctx, &query, &[limit]).await
            }
        }
    }

    /// Fetches a URL by id; a missing row is `DbError::NotFound`.
    pub async fn get_by_id(&self, ctx: &Context, id: i64) -> DbResult<ShortUrl> {
        self.memory
            .fetch_one(ctx, SELECT_URL_BY_ID, &[id.into()])
            .await
    }

    /// Checks the primary database, then the read path.
    pub async fn ping(&self, ctx: &Context) -> Result<(), Dependency> {
        if let Err(e) = self.db.ping(ctx).await {
            warn!(error = %e, "Primary database is not available");
            return Err(Dependency::PrimaryDatabase);
        }

        if let Err(e) = self.memory.ping(ctx).await {
            warn!(error = %e, "Read path is not available");
            return Err(Dependency::Memory);
        }

        Ok(())
    }

    /// Closes both clients, reporting every failure.
    pub async fn close(&self) -> Result<(), CloseError> {
        let mut errors = CloseError::default();
        errors.collect(self.memory.close().await);
        errors.collect(self.db.close().await);
        errors.into_result()
    }
}

async fn insert_with_code<T: SqlTransaction>(
    ctx: &Context,
    tx: &mut T,
    target: &str,
) -> DbResult<ShortUrl> {
    let mut url: ShortUrl = tx.fetch_one(ctx, INSERT_URL, &[target.into()]).await?;

    url.code = ShortUrl::code_for(url.id)
        .ok_or_else(|| DbError::InvalidData(format!("store assigned negative id {}", url.id)))?;

    tx.execute(ctx, SET_CODE, &[url.code.as_str().into(), url.id.into()])
        .await?;
    Ok(url)
}

async fn rollback<T: SqlTransaction>(tx: &mut T) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "Failed to roll back transaction");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tinyurl_core::Direction;
    use tinyurl_test_infra::fake::{FakeSqlClient, TxEvent};

    type Repository = UrlRepository<FakeSqlClient, FakeSqlClient>;

    fn repository() -> (Repository, FakeSqlClient, FakeSqlClient) {
        let db = FakeSqlClient::new();
        let memory = FakeSqlClient::new();
        (UrlRepository::new(db.clone(), memory.clone()), db, memory)
    }

    fn inserted(id: i64) -> serde_json::Value {
        json!({ "id": id, "code": "", "target": "https://example.com" })
    }

    fn begin() -> TxEvent {
        TxEvent::Begin(TxOptions::default())
    }

    #[tokio::test]
    async fn create_assigns_code_from_id() {
        let (repo, db, _) = repository();
        db.push_row(inserted(9999)).push_affected(1);

        let url = repo
            .create(&Context::background(), "https://example.com")
            .await
            .unwrap();

        assert_eq!(url.id, 9999);
        assert_eq!(url.code, "2bH");
        assert!(url.has_consistent_code());

        let calls = db.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].query, INSERT_URL);
        assert_eq!(calls[0].args, vec![SqlValue::Text("https://example.com".into())]);
        assert_eq!(calls[1].query, SET_CODE);
        assert_eq!(
            calls[1].args,
            vec![SqlValue::Text("2bH".into()), SqlValue::Int(9999)]
        );
        assert!(calls.iter().all(|c| c.in_transaction));
        assert_eq!(db.events(), vec![begin(), TxEvent::Commit]);
    }

    #[tokio::test]
    async fn create_fails_without_cleanup_when_begin_fails() {
        let (repo, db, _) = repository();
        db.fail_begin(DbError::Connect("refused".into()));

        let err = repo
            .create(&Context::background(), "https://example.com")
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::Connect(_)));
        assert!(db.events().is_empty());
        assert!(db.calls().is_empty());
    }

    #[tokio::test]
    async fn insert_failure_rolls_back() {
        let (repo, db, _) = repository();
        db.push_error(DbError::Connect("connection reset".into()));

        let err = repo
            .create(&Context::background(), "https://example.com")
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::Connect(_)));
        assert_eq!(db.calls().len(), 1);
        assert_eq!(db.events(), vec![begin(), TxEvent::Rollback]);
    }

    #[tokio::test]
    async fn update_failure_rolls_back() {
        let (repo, db, _) = repository();
        db.push_row(inserted(1))
            .push_error(DbError::InvalidData("bad".into()));

        let err = repo
            .create(&Context::background(), "https://example.com")
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::InvalidData(_)));
        assert_eq!(db.events(), vec![begin(), TxEvent::Rollback]);
    }

    #[tokio::test]
    async fn commit_failure_rolls_back() {
        let (repo, db, _) = repository();
        db.push_row(inserted(1)).push_affected(1);
        db.fail_commit(DbError::Connect("gone".into()));

        let err = repo
            .create(&Context::background(), "https://example.com")
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::Connect(_)));
        assert_eq!(db.events(), vec![begin(), TxEvent::Commit, TxEvent::Rollback]);
    }

    #[tokio::test]
    async fn rollback_failure_does_not_mask_cause() {
        let (repo, db, _) = repository();
        db.push_error(DbError::Connect("insert failed".into()));
        db.fail_rollback(DbError::InvalidData("rollback failed".into()));

        let err = repo
            .create(&Context::background(), "https://example.com")
            .await
            .unwrap_err();

        match err {
            DbError::Connect(message) => assert_eq!(message, "insert failed"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn negative_id_is_rejected_and_rolled_back() {
        let (repo, db, _) = repository();
        db.push_row(inserted(-4));

        let err = repo
            .create(&Context::background(), "https://example.com")
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::InvalidData(_)));
        assert_eq!(db.calls().len(), 1);
        assert_eq!(db.events(), vec![begin(), TxEvent::Rollback]);
    }

    #[tokio::test]
    async fn list_first_page_reads_through_memory() {
        let (repo, db, memory) = repository();
        memory.push_rows([inserted(2), inserted(1)]);

        let urls = repo
            .list(&Context::background(), 5, Cursor::first_page())
            .await
            .unwrap();

        assert_eq!(urls.len(), 2);
        assert!(db.calls().is_empty());
        let calls = memory.calls();
        assert_eq!(
            calls[0].query,
            "SELECT id, code, target, created_at, updated_at FROM urls ORDER BY id DESC LIMIT $1"
        );
        assert_eq!(calls[0].args, vec![SqlValue::Int(5)]);
    }

    #[tokio::test]
    async fn list_with_cursor_bounds_ids() {
        let (repo, _, memory) = repository();

        repo.list(&Context::background(), 50, Cursor::new(Direction::After, 8888))
            .await
            .unwrap();
        repo.list(&Context::background(), 50, Cursor::new(Direction::Before, u64::MAX))
            .await
            .unwrap();

        let calls = memory.calls();
        assert!(calls[0].query.contains("WHERE id > $1 ORDER BY id DESC LIMIT $2"));
        assert_eq!(calls[0].args, vec![SqlValue::Int(8888), SqlValue::Int(50)]);
        assert!(calls[1].query.contains("WHERE id < $1"));
        assert_eq!(calls[1].args[0], SqlValue::Int(i64::MAX));
    }

    #[tokio::test]
    async fn get_by_id_reports_missing_rows() {
        let (repo, _, memory) = repository();

        let err = repo.get_by_id(&Context::background(), 42).await.unwrap_err();

        assert!(matches!(err, DbError::NotFound));
        assert_eq!(memory.calls()[0].query, SELECT_URL_BY_ID);
        assert_eq!(memory.calls()[0].args, vec![SqlValue::Int(42)]);
    }

    #[tokio::test]
    async fn ping_names_the_failing_dependency() {
        let (repo, db, memory) = repository();
        let ctx = Context::background();

        assert_eq!(repo.ping(&ctx).await, Ok(()));

        memory.fail_ping(DbError::Connect("replica down".into()));
        assert_eq!(repo.ping(&ctx).await, Err(Dependency::Memory));

        db.fail_ping(DbError::Connect("primary down".into()));
        assert_eq!(repo.ping(&ctx).await, Err(Dependency::PrimaryDatabase));
    }

    #[tokio::test]
    async fn close_releases_both_clients() {
        let (repo, db, memory) = repository();
        db.fail_close(DbError::Connect("primary".into()));

        let err = repo.close().await.unwrap_err();

        assert_eq!(err.failures().len(), 1);
        assert!(db.is_closed());
        assert!(memory.is_closed());
    }
}
