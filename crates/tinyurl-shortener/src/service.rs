use std::time::Duration;

use serde::Serialize;
use tinyurl_core::{
    CacheKey, CachePolicy, CloseError, Context, Cursor, Pagination, ShortUrl, SqlClient, SqlReader,
};
use tracing::debug;
use url::Url;

use crate::error::{Result, ShortenerError};
use crate::repository::UrlRepository;

/// How long service reads stay in the cache.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Budget for a readiness check.
pub const READY_TIMEOUT: Duration = Duration::from_millis(200);

/// Readiness report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

/// Use cases over short URLs.
///
/// Reads attach a cache policy (key and TTL) to the request context; whether
/// the policy is used is still up to the caller, which opts in with
/// [`Context::with_cache`]. Creation never touches the cache.
#[derive(Debug, Clone)]
pub struct UrlService<D, M> {
    repository: UrlRepository<D, M>,
    cache_key: CacheKey,
}

impl<D: SqlClient, M: SqlReader> UrlService<D, M> {
    pub fn new(repository: UrlRepository<D, M>) -> Self {
        Self {
            repository,
            cache_key: CacheKey::new(["url", "service"]),
        }
    }

    pub fn repository(&self) -> &UrlRepository<D, M> {
        &self.repository
    }

    /// Shortens `target` after checking it is an absolute http(s) URL.
    pub async fn create(&self, ctx: &Context, target: &str) -> Result<ShortUrl> {
        validate_url(target)?;
        Ok(self.repository.create(ctx, target).await?)
    }

    /// Lists a page of URLs, newest first.
    pub async fn list(
        &self,
        ctx: &Context,
        limit: usize,
        cursor: Cursor,
    ) -> Result<Pagination<ShortUrl>> {
        let key = self
            .cache_key
            .with("list")
            .with(limit)
            .with(cursor.direction)
            .with_opt(cursor.bound);
        let ctx = ctx.with_cache_policy(CachePolicy::new(key.to_string(), CACHE_TTL));

        let items = self.repository.list(&ctx, limit, cursor).await?;
        debug!(count = items.len(), cursor = ?cursor.token(), "Listed urls");
        Ok(Pagination::new(items, limit, cursor.bound))
    }

    /// Lists the page addressed by a raw cursor token.
    pub async fn list_from_token(
        &self,
        ctx: &Context,
        limit: usize,
        token: Option<&str>,
    ) -> Result<Pagination<ShortUrl>> {
        let cursor = Cursor::parse(token)?;
        self.list(ctx, limit, cursor).await
    }

    pub async fn get_by_id(&self, ctx: &Context, id: i64) -> Result<ShortUrl> {
        let key = self.cache_key.with("id").with(id);
        let ctx = ctx.with_cache_policy(CachePolicy::new(key.to_string(), CACHE_TTL));
        Ok(self.repository.get_by_id(&ctx, id).await?)
    }

    /// Checks every dependency within [`READY_TIMEOUT`].
    pub async fn ready(&self, ctx: &Context) -> Health {
        let ctx = ctx.with_timeout(READY_TIMEOUT);
        match self.repository.ping(&ctx).await {
            Ok(()) => Health {
                status: "ready",
                reason: None,
            },
            Err(dependency) => Health {
                status: "not_ready",
                reason: Some(dependency.reason()),
            },
        }
    }

    pub async fn close(&self) -> std::result::Result<(), CloseError> {
        self.repository.close().await
    }
}

fn validate_url(target: &str) -> Result<()> {
    if target.is_empty() {
        return Err(ShortenerError::InvalidUrl(
            "URL cannot be empty".to_string(),
        ));
    }

    let url = Url::parse(target)
        .map_err(|e| ShortenerError::InvalidUrl(format!("{target}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ShortenerError::InvalidUrl(format!(
            "URL scheme must be http or https: {}",
            url.scheme()
        )));
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(ShortenerError::InvalidUrl(format!(
            "URL must have a host: {target}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tinyurl_core::{DbError, Direction, SqlValue};
    use tinyurl_storage::CachedReader;
    use tinyurl_test_infra::fake::{CacheOp, FakeCacheClient, FakeMetrics, FakeSqlClient};

    type Service = UrlService<FakeSqlClient, CachedReader<FakeSqlClient, FakeCacheClient>>;

    struct Fixture {
        db: FakeSqlClient,
        replica: FakeSqlClient,
        cache: FakeCacheClient,
        service: Service,
    }

    fn fixture() -> Fixture {
        let db = FakeSqlClient::new();
        let replica = FakeSqlClient::new();
        let cache = FakeCacheClient::new();
        let memory = CachedReader::new(replica.clone(), cache.clone(), FakeMetrics::new().sink());
        Fixture {
            service: UrlService::new(UrlRepository::new(db.clone(), memory)),
            db,
            replica,
            cache,
        }
    }

    fn row(id: i64) -> serde_json::Value {
        json!({
            "id": id,
            "code": ShortUrl::code_for(id),
            "target": format!("https://example.com/{id}"),
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z",
        })
    }

    #[test]
    fn accepts_http_and_https_urls() {
        assert!(validate_url("https://example.com/a?b=c").is_ok());
        assert!(validate_url("http://localhost:8080").is_ok());
    }

    #[test]
    fn rejects_invalid_urls() {
        for target in ["", "example.com", "ftp://example.com", "https://", "mailto:a@b.c"] {
            assert!(
                matches!(validate_url(target), Err(ShortenerError::InvalidUrl(_))),
                "{target} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn create_rejects_invalid_target_before_touching_storage() {
        let f = fixture();

        let err = f
            .service
            .create(&Context::background(), "not a url")
            .await
            .unwrap_err();

        assert!(matches!(err, ShortenerError::InvalidUrl(_)));
        assert!(f.db.events().is_empty());
    }

    #[tokio::test]
    async fn create_never_writes_the_cache() {
        let f = fixture();
        f.db.push_row(json!({ "id": 1, "code": "", "target": "https://example.com" }))
            .push_affected(1);

        let ctx = Context::background().with_cache();
        let url = f.service.create(&ctx, "https://example.com").await.unwrap();

        assert_eq!(url.code, "1");
        assert_eq!(f.cache.calls(CacheOp::SetIfAbsent), 0);
        assert_eq!(f.cache.calls(CacheOp::Delete), 0);
    }

    #[tokio::test]
    async fn get_by_id_caches_under_service_key() {
        let f = fixture();
        f.replica.push_row(row(9999));
        let ctx = Context::background().with_cache();

        let first = f.service.get_by_id(&ctx, 9999).await.unwrap();
        let second = f.service.get_by_id(&ctx, 9999).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.code, "2bH");
        assert_eq!(f.replica.calls().len(), 1);
        assert_eq!(f.cache.ttl("url:service:id:9999"), Some(CACHE_TTL));
    }

    #[tokio::test]
    async fn reads_bypass_cache_unless_enabled() {
        let f = fixture();
        f.replica.push_row(row(1)).push_row(row(1));
        let ctx = Context::background();

        f.service.get_by_id(&ctx, 1).await.unwrap();
        f.service.get_by_id(&ctx, 1).await.unwrap();

        assert_eq!(f.replica.calls().len(), 2);
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn get_by_id_maps_missing_rows() {
        let f = fixture();

        let err = f
            .service
            .get_by_id(&Context::background().with_cache(), 5)
            .await
            .unwrap_err();

        assert!(matches!(err, ShortenerError::NotFound));
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn list_keys_cache_by_direction_and_cursor() {
        let f = fixture();
        f.replica.push_rows([row(3)]).push_rows([row(9)]);
        let ctx = Context::background().with_cache();

        f.service
            .list(&ctx, 10, Cursor::first_page())
            .await
            .unwrap();
        f.service
            .list(&ctx, 10, Cursor::new(Direction::After, 5))
            .await
            .unwrap();

        assert!(f.cache.value("url:service:list:10:<:nil").is_some());
        assert!(f.cache.value("url:service:list:10:>:5").is_some());
    }

    #[tokio::test]
    async fn list_caches_each_page_size_separately() {
        let f = fixture();
        f.replica
            .push_rows([row(5), row(4)])
            .push_rows((1..=5).rev().map(row));
        let ctx = Context::background().with_cache();

        let short = f
            .service
            .list(&ctx, 2, Cursor::first_page())
            .await
            .unwrap();
        let full = f
            .service
            .list(&ctx, 5, Cursor::first_page())
            .await
            .unwrap();

        assert_eq!(short.items().len(), 2);
        assert_eq!(full.items().len(), 5);
        let page = full.page(|u| u64::try_from(u.id).unwrap_or(0));
        assert_eq!(page.next.as_deref(), Some("<1"));
        assert_eq!(f.replica.calls().len(), 2);
        assert!(f.cache.value("url:service:list:2:<:nil").is_some());
        assert!(f.cache.value("url:service:list:5:<:nil").is_some());
    }

    #[tokio::test]
    async fn create_then_fetch_returns_the_same_url() {
        let f = fixture();
        let created = row(9999);
        let mut inserted = created.clone();
        inserted["code"] = json!("");
        f.db.push_row(inserted).push_affected(1);
        f.replica.push_row(created);
        let ctx = Context::background().with_cache();

        let url = f.service.create(&ctx, "https://example.com/9999").await.unwrap();
        let fetched = f.service.get_by_id(&ctx, url.id).await.unwrap();

        assert_eq!(url.code, "2bH");
        assert_eq!(fetched, url);
    }

    #[tokio::test]
    async fn full_last_page_links_to_an_empty_next_page() {
        let f = fixture();
        f.replica
            .push_rows((1..=5).rev().map(row))
            .push_rows(std::iter::empty());
        let ctx = Context::background().with_cache();

        let first = f
            .service
            .list(&ctx, 5, Cursor::first_page())
            .await
            .unwrap();
        let page = first.page(|u| u64::try_from(u.id).unwrap_or(0));
        assert_eq!(page.size, 5);
        assert_eq!(page.next.as_deref(), Some("<1"));
        assert_eq!(page.previous, None);

        let second = f
            .service
            .list_from_token(&ctx, 5, page.next.as_deref())
            .await
            .unwrap();
        let page = second.page(|u| u64::try_from(u.id).unwrap_or(0));
        assert_eq!(page.size, 0);
        assert_eq!(page.next, None);
        assert_eq!(page.previous, None);
        assert_eq!(
            f.replica.calls()[1].args,
            vec![SqlValue::Int(1), SqlValue::Int(5)]
        );
    }

    #[tokio::test]
    async fn malformed_cursor_is_rejected() {
        let f = fixture();

        let err = f
            .service
            .list_from_token(&Context::background(), 5, Some("<!!"))
            .await
            .unwrap_err();

        assert!(matches!(err, ShortenerError::InvalidCursor(_)));
        assert!(f.replica.calls().is_empty());
    }

    #[tokio::test]
    async fn list_surfaces_storage_errors() {
        let f = fixture();
        f.replica.push_error(DbError::Connect("replica down".into()));

        let err = f
            .service
            .list(&Context::background(), 5, Cursor::first_page())
            .await
            .unwrap_err();

        assert!(matches!(err, ShortenerError::Storage(DbError::Connect(_))));
    }

    #[tokio::test]
    async fn readiness_reports_the_failing_dependency() {
        let f = fixture();
        let ctx = Context::background();

        assert_eq!(
            f.service.ready(&ctx).await,
            Health {
                status: "ready",
                reason: None
            }
        );

        f.db.fail_ping(DbError::Connect("down".into()));
        let health = f.service.ready(&ctx).await;
        assert_eq!(health.status, "not_ready");
        assert_eq!(health.reason, Some("db_primary_unavailable"));
    }
}
