use thiserror::Error;
use tinyurl_core::{DbError, PaginationError};

/// Result type for shortener operations.
pub type Result<T> = std::result::Result<T, ShortenerError>;

#[derive(Debug, Error)]
pub enum ShortenerError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    InvalidCursor(#[from] PaginationError),
    #[error("url not found")]
    NotFound,
    #[error("storage error: {0}")]
    Storage(#[source] DbError),
}

impl From<DbError> for ShortenerError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::NotFound => Self::NotFound,
            other => Self::Storage(other),
        }
    }
}
