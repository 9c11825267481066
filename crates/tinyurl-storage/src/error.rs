use tinyurl_core::DbError;

/// Maps a sqlx failure into the relational error taxonomy.
///
/// Decoding problems mean the stored row does not fit the destination type,
/// so they surface as `InvalidData`; everything unrecognized keeps the driver
/// error as its source.
pub fn map_sqlx_error(err: sqlx::Error) -> DbError {
    match err {
        sqlx::Error::RowNotFound => DbError::NotFound,
        err @ (sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)) => DbError::InvalidData(err.to_string()),
        other => DbError::backend(other),
    }
}
