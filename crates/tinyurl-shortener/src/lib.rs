//! URL shortener on top of the tinyurl data-access layer.
//!
//! [`UrlRepository`] owns the SQL: the transactional create path and the
//! cached read path. [`UrlService`] validates input and decides how reads are
//! cached. The `tinyurl` binary wires both to PostgreSQL and a cache backend.

pub mod error;
pub mod repository;
pub mod service;

pub use error::{Result, ShortenerError};
pub use repository::{Dependency, UrlRepository};
pub use service::{Health, UrlService, CACHE_TTL, DEFAULT_PAGE_SIZE};
