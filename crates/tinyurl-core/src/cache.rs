use std::fmt::Display;
use std::time::Duration;

/// How a single read should be cached: under which key and for how long.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub key: String,
}

impl CachePolicy {
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            ttl,
            key: key.into(),
        }
    }
}

/// Caching state carried by a [`Context`](crate::Context).
///
/// The default is disabled with an empty policy, so reads bypass the cache
/// unless a caller explicitly opts in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheScope {
    pub enabled: bool,
    pub policy: CachePolicy,
}

impl CacheScope {
    /// Caching switched on with an empty policy.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            policy: CachePolicy::default(),
        }
    }
}

/// Builds cache keys as a stable `:`-joined composition of a namespace and
/// operation parameters.
///
/// ```
/// use tinyurl_core::CacheKey;
///
/// let base = CacheKey::new(["url", "service"]);
/// assert_eq!(base.with("id").with(42).to_string(), "url:service:id:42");
/// assert_eq!(base.with("list").with_opt(None::<u64>).to_string(), "url:service:list:nil");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    parts: Vec<String>,
}

impl CacheKey {
    pub fn new<I, S>(namespace: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: namespace.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns a new key with `part` appended.
    pub fn with(&self, part: impl Display) -> Self {
        let mut parts = self.parts.clone();
        parts.push(part.to_string());
        Self { parts }
    }

    /// Appends an optional parameter; `None` renders as `nil`.
    pub fn with_opt<T: Display>(&self, part: Option<T>) -> Self {
        match part {
            Some(value) => self.with(value),
            None => self.with("nil"),
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.parts.join(":"))
    }
}
