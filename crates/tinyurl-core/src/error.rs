use thiserror::Error;

/// Result type for relational backend operations.
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Result type for key-value backend operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Reason a context-bound operation was abandoned before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Errors surfaced by relational clients.
///
/// Cancellation and deadline expiry are kept as their own variants so callers
/// can tell a client-abandoned request apart from a real backend failure.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("db resource not found")]
    NotFound,
    #[error("db operation canceled")]
    Canceled,
    #[error("db operation deadline exceeded")]
    DeadlineExceeded,
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("db connection failed: {0}")]
    Connect(String),
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl DbError {
    /// Wraps any backend error without losing its diagnostic detail.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }

    /// Whether the error comes from the caller abandoning the request.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }
}

impl From<Interrupted> for DbError {
    fn from(value: Interrupted) -> Self {
        match value {
            Interrupted::Canceled => Self::Canceled,
            Interrupted::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

/// Errors surfaced by key-value clients.
///
/// Anything that is not a missing key or an interruption collapses into
/// `Unavailable`: a cache failure is never fatal to the caller, so the exact
/// cause only matters for logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache key not found")]
    NotFound,
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache operation canceled")]
    Canceled,
    #[error("cache operation deadline exceeded")]
    DeadlineExceeded,
    #[error("cache connection failed: {0}")]
    Connect(String),
}

impl CacheError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }
}

impl From<Interrupted> for CacheError {
    fn from(value: Interrupted) -> Self {
        match value {
            Interrupted::Canceled => Self::Canceled,
            Interrupted::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

/// Aggregate of every failure observed while releasing a group of resources.
#[derive(Debug, Default)]
pub struct CloseError {
    failures: Vec<Box<dyn std::error::Error + Send + Sync>>,
}

impl CloseError {
    /// Records a failed release if `result` is an error.
    pub fn collect<E>(&mut self, result: std::result::Result<(), E>)
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Err(err) = result {
            self.failures.push(Box::new(err));
        }
    }

    pub fn failures(&self) -> &[Box<dyn std::error::Error + Send + Sync>] {
        &self.failures
    }

    /// `Ok(())` when every release succeeded, otherwise the aggregate.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for CloseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to close {} resource(s)", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CloseError {}
