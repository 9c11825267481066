use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::{Display, Formatter};
use tinyurl_shortener::DEFAULT_PAGE_SIZE;

pub const DATABASE_URL_ENV: &str = "TINYURL_DATABASE_URL";
pub const DATABASE_REPLICA_URL_ENV: &str = "TINYURL_DATABASE_REPLICA_URL";
pub const CACHE_BACKEND_ENV: &str = "TINYURL_CACHE";
pub const REDIS_URL_ENV: &str = "TINYURL_REDIS_URL";
pub const MAX_CONNECTIONS_ENV: &str = "TINYURL_MAX_CONNECTIONS";
pub const LOG_FORMAT_ENV: &str = "TINYURL_LOG_FORMAT";
pub const TIMEOUT_MS_ENV: &str = "TINYURL_TIMEOUT_MS";

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheBackendArg {
    #[value(name = "none")]
    None,
    #[value(name = "memory")]
    Memory,
    #[value(name = "redis")]
    Redis,
}

impl Display for CacheBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheBackendArg::None => write!(f, "none"),
            CacheBackendArg::Memory => write!(f, "memory"),
            CacheBackendArg::Redis => write!(f, "redis"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    #[value(name = "text")]
    Text,
    #[value(name = "json")]
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "tinyurl", about = "Create and read short URLs")]
pub struct CLI {
    #[arg(long, env = DATABASE_URL_ENV)]
    pub database_url: String,

    /// Read replica; reads use the primary when unset or unreachable.
    #[arg(long, env = DATABASE_REPLICA_URL_ENV)]
    pub database_replica_url: Option<String>,

    #[arg(
        long,
        env = CACHE_BACKEND_ENV,
        value_enum,
        default_value_t = CacheBackendArg::Memory
    )]
    pub cache: CacheBackendArg,

    #[arg(long, env = REDIS_URL_ENV, required_if_eq("cache", "redis"))]
    pub redis_url: Option<String>,

    #[arg(long, env = MAX_CONNECTIONS_ENV, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,

    /// Deadline for the whole command, in milliseconds.
    #[arg(long, env = TIMEOUT_MS_ENV)]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shorten a URL.
    Create { target: String },
    /// Fetch a short URL by id.
    Get { id: i64 },
    /// List short URLs, newest first.
    List {
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: usize,
    },
    /// Report readiness of the database and the read path.
    Ping,
    /// Create the schema if it does not exist.
    Migrate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let cli = CLI::try_parse_from(["tinyurl", "--database-url", "postgres://db", "ping"])
            .unwrap();

        assert_eq!(cli.cache, CacheBackendArg::Memory);
        assert_eq!(cli.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(cli.log_format, LogFormatArg::Text);
        assert!(matches!(cli.command, Command::Ping));
    }

    #[test]
    fn redis_cache_requires_url() {
        let result = CLI::try_parse_from([
            "tinyurl",
            "--database-url",
            "postgres://db",
            "--cache",
            "redis",
            "ping",
        ]);

        assert!(result.is_err());
    }

    #[test]
    fn list_takes_cursor_and_limit() {
        let cli = CLI::try_parse_from([
            "tinyurl",
            "--database-url",
            "postgres://db",
            "list",
            "--cursor",
            "<2bH",
            "--limit",
            "10",
        ])
        .unwrap();

        match cli.command {
            Command::List { cursor, limit } => {
                assert_eq!(cursor.as_deref(), Some("<2bH"));
                assert_eq!(limit, 10);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
