mod cli;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::{CacheBackendArg, Command, LogFormatArg, CLI};
use clap::Parser;
use serde::Serialize;
use tinyurl_cache::{MokaCacheClient, RedisCacheClient};
use tinyurl_core::{CacheClient, Context, MetricSink, TracingMetrics};
use tinyurl_shortener::{UrlRepository, UrlService};
use tinyurl_storage::{CachedReader, PostgresClient, PostgresConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type Service = UrlService<PostgresClient, CachedReader<PostgresClient, Arc<dyn CacheClient>>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CLI::try_parse()?;
    init_tracing(config.log_format);

    info!(
        cache_backend = %config.cache,
        replica = config.database_replica_url.is_some(),
        "starting tinyurl"
    );

    let metrics: Arc<dyn MetricSink> = Arc::new(TracingMetrics);
    let primary_config = database_config(&config, &config.database_url);
    let primary = PostgresClient::connect(&primary_config, metrics.clone()).await?;

    let replica = match &config.database_replica_url {
        Some(url) => connect_replica(&config, url, &primary, metrics.clone()).await,
        None => primary.clone(),
    };

    let cache: Arc<dyn CacheClient> = match config.cache {
        CacheBackendArg::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or("redis url is required when cache backend is redis")?;
            Arc::new(RedisCacheClient::connect(url, metrics.clone()).await?)
        }
        CacheBackendArg::Memory | CacheBackendArg::None => Arc::new(MokaCacheClient::new()),
    };

    let memory = CachedReader::new(replica, cache, metrics);
    let service = UrlService::new(UrlRepository::new(primary, memory));

    let ctx = request_context(&config);
    let result = run(&service, &ctx, config.command).await;

    if let Err(e) = service.close().await {
        warn!(error = %e, "Failed to release connections");
    }

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

fn init_tracing(format: LogFormatArg) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormatArg::Text => builder.init(),
        LogFormatArg::Json => builder.json().init(),
    }
}

/// Falls back to the primary when the replica cannot be reached.
async fn connect_replica(
    config: &CLI,
    url: &str,
    primary: &PostgresClient,
    metrics: Arc<dyn MetricSink>,
) -> PostgresClient {
    match PostgresClient::connect(&database_config(config, url), metrics).await {
        Ok(replica) => replica,
        Err(e) => {
            warn!(error = %e, "Replica is not available, reading from primary");
            primary.clone()
        }
    }
}

fn database_config(config: &CLI, url: &str) -> PostgresConfig {
    PostgresConfig::builder()
        .url(url)
        .max_connections(config.max_connections)
        .build()
}

/// Builds the context for one command: cancelled on Ctrl-C, bounded by the
/// configured timeout, and caching reads unless the cache is disabled.
fn request_context(config: &CLI) -> Context {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight work");
            on_signal.cancel();
        }
    });

    let mut ctx = Context::background().with_cancellation(token);
    if let Some(ms) = config.timeout_ms {
        ctx = ctx.with_timeout(Duration::from_millis(ms));
    }
    if config.cache != CacheBackendArg::None {
        ctx = ctx.with_cache();
    }
    ctx
}

async fn run(
    service: &Service,
    ctx: &Context,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Create { target } => print_json(&service.create(ctx, &target).await?)?,
        Command::Get { id } => print_json(&service.get_by_id(ctx, id).await?)?,
        Command::List { cursor, limit } => {
            let pagination = service
                .list_from_token(ctx, limit, cursor.as_deref())
                .await?;
            let body = pagination.encode(|url| u64::try_from(url.id).unwrap_or_default())?;
            write_stdout(&body)?;
        }
        Command::Ping => {
            let health = service.ready(ctx).await;
            print_json(&health)?;
            if let Some(reason) = health.reason {
                return Err(format!("not ready: {reason}").into());
            }
        }
        Command::Migrate => {
            service.repository().db().migrate(ctx).await?;
            info!("Schema is up to date");
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> std::io::Result<()> {
    write_stdout(&serde_json::to_vec(value)?)
}

fn write_stdout(body: &[u8]) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(body)?;
    stdout.write_all(b"\n")
}
