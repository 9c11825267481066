use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

use crate::base62;

/// A shortened URL as stored in the `urls` table.
///
/// `code` is always the base-62 encoding of `id`; it is never chosen
/// independently. Timestamps are `None` until the row has been persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortUrl {
    pub id: i64,
    pub code: String,
    pub target: String,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
}

impl ShortUrl {
    /// The short code for a store-assigned identifier.
    ///
    /// Returns `None` for negative identifiers, which the store never assigns.
    pub fn code_for(id: i64) -> Option<String> {
        u64::try_from(id).ok().map(base62::encode)
    }

    /// Whether `code` matches the identifier it was derived from.
    pub fn has_consistent_code(&self) -> bool {
        Self::code_for(self.id).is_some_and(|code| code == self.code)
    }
}

impl<'r> FromRow<'r, PgRow> for ShortUrl {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let created_at: Option<jiff_sqlx::Timestamp> = row.try_get("created_at")?;
        let updated_at: Option<jiff_sqlx::Timestamp> = row.try_get("updated_at")?;

        Ok(Self {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            target: row.try_get("target")?,
            created_at: created_at.map(|ts| ts.to_jiff()),
            updated_at: updated_at.map(|ts| ts.to_jiff()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(id: i64, code: &str) -> ShortUrl {
        ShortUrl {
            id,
            code: code.to_string(),
            target: "https://example.com".to_string(),
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn code_is_base62_of_id() {
        assert_eq!(ShortUrl::code_for(0).as_deref(), Some("0"));
        assert_eq!(ShortUrl::code_for(1).as_deref(), Some("1"));
        assert_eq!(ShortUrl::code_for(9999).as_deref(), Some("2bH"));
        assert_eq!(
            ShortUrl::code_for(i64::MAX),
            Some(base62::encode(i64::MAX as u64))
        );
    }

    #[test]
    fn negative_ids_have_no_code() {
        assert_eq!(ShortUrl::code_for(-1), None);
    }

    #[test]
    fn code_decodes_back_to_id() {
        for id in [0, 1, 62, 9999, i64::MAX] {
            let code = ShortUrl::code_for(id).unwrap();
            assert_eq!(base62::decode(&code).unwrap(), id as u64);
        }
    }

    #[test]
    fn consistency_check() {
        assert!(url(9999, "2bH").has_consistent_code());
        assert!(!url(9999, "").has_consistent_code());
        assert!(!url(1, "2").has_consistent_code());
    }

    #[test]
    fn json_round_trip_keeps_timestamps() {
        let mut original = url(5, "5");
        original.created_at = Some(Timestamp::from_second(1_700_000_000).unwrap());
        let json = serde_json::to_vec(&original).unwrap();
        let decoded: ShortUrl = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded, original);
    }
}
