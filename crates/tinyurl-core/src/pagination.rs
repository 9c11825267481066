//! Cursor-based pagination over identifier-ordered result sets.
//!
//! Results are always ordered by identifier descending. A cursor token is a
//! direction marker followed by the base-62 encoding of a boundary identifier:
//! `<` pages toward older items (ids below the bound), `>` toward newer items
//! (ids above the bound).

use std::fmt::Display;

use serde::Serialize;
use thiserror::Error;

use crate::base62::{self, Base62Error};

/// Name of the query parameter carrying the cursor token.
pub const CURSOR_PARAM: &str = "cursor";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaginationError {
    #[error("invalid cursor '{cursor}': {source}")]
    InvalidCursor {
        cursor: String,
        #[source]
        source: Base62Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Identifiers lower than the bound (older items).
    Before,
    /// Identifiers greater than the bound (newer items).
    After,
}

impl Direction {
    fn from_marker(marker: char) -> Self {
        match marker {
            '>' => Direction::After,
            _ => Direction::Before,
        }
    }

    /// The comparison operator selecting identifiers in this direction.
    pub fn operator(&self) -> &'static str {
        match self {
            Direction::Before => "<",
            Direction::After => ">",
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.operator())
    }
}

/// A decoded pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cursor {
    pub direction: Direction,
    /// `None` requests the first page, newest items first.
    pub bound: Option<u64>,
}

impl Default for Cursor {
    fn default() -> Self {
        Self::first_page()
    }
}

impl Cursor {
    pub fn first_page() -> Self {
        Self {
            direction: Direction::Before,
            bound: None,
        }
    }

    pub fn new(direction: Direction, bound: u64) -> Self {
        Self {
            direction,
            bound: Some(bound),
        }
    }

    /// Decodes a cursor token.
    ///
    /// An absent or empty token is the first page. Otherwise the first
    /// character picks the direction (`>` for after, anything else for before)
    /// and the rest must be a base-62 identifier.
    pub fn parse(token: Option<&str>) -> Result<Self, PaginationError> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Ok(Self::first_page());
        };

        let mut chars = token.chars();
        let direction = chars.next().map_or(Direction::Before, Direction::from_marker);
        let bound =
            base62::decode(chars.as_str()).map_err(|source| PaginationError::InvalidCursor {
                cursor: token.to_string(),
                source,
            })?;

        Ok(Self::new(direction, bound))
    }

    /// Decodes the `cursor` parameter of a URL query string.
    pub fn from_query(query: &str) -> Result<Self, PaginationError> {
        let token = url::form_urlencoded::parse(query.as_bytes())
            .find(|(name, _)| name == CURSOR_PARAM)
            .map(|(_, value)| value.into_owned());
        Self::parse(token.as_deref())
    }

    /// The token for this cursor, or `None` for the first page.
    pub fn token(&self) -> Option<String> {
        self.bound.map(|bound| encode_token(self.direction, bound))
    }
}

fn encode_token(direction: Direction, bound: u64) -> String {
    format!("{direction}{}", base62::encode(bound))
}

/// Page metadata emitted alongside a result set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Page {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
    pub size: usize,
}

/// A page of results together with the request that produced it.
#[derive(Debug, Clone)]
pub struct Pagination<T> {
    items: Vec<T>,
    limit: usize,
    cursor: Option<u64>,
}

#[derive(Serialize)]
struct Encoded<'a, T> {
    items: &'a [T],
    page: Page,
}

impl<T> Pagination<T> {
    /// `cursor` is the bound of the inbound request, if it had one.
    pub fn new(items: Vec<T>, limit: usize, cursor: Option<u64>) -> Self {
        Self {
            items,
            limit,
            cursor,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Computes the page metadata, using `key` to position boundary items.
    ///
    /// `next` is set whenever the page is full, even if no older rows remain;
    /// `previous` is set whenever the request itself was cursor-bound.
    pub fn page<F>(&self, key: F) -> Page
    where
        F: Fn(&T) -> u64,
    {
        let mut page = Page {
            size: self.items.len(),
            ..Page::default()
        };

        if let (Some(first), Some(last)) = (self.items.first(), self.items.last()) {
            if self.items.len() >= self.limit {
                page.next = Some(encode_token(Direction::Before, key(last)));
            }
            if self.cursor.is_some() {
                page.previous = Some(encode_token(Direction::After, key(first)));
            }
        }

        page
    }

    /// Encodes `{"items": [...], "page": {...}}` as JSON.
    pub fn encode<F>(&self, key: F) -> serde_json::Result<Vec<u8>>
    where
        T: Serialize,
        F: Fn(&T) -> u64,
    {
        serde_json::to_vec(&Encoded {
            items: &self.items,
            page: self.page(key),
        })
    }
}
