//! Base-62 codec for short codes and cursor tokens.
//!
//! Uses the `[0-9A-Za-z]` alphabet, so `0` encodes to `"0"` and `9999` to
//! `"2bH"`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Base62Error {
    #[error("base62 input is empty")]
    Empty,
    #[error("invalid base62 input '{0}'")]
    Invalid(String),
    #[error("base62 input '{0}' does not fit in 64 bits")]
    Overflow(String),
}

/// Encodes `value` as base-62.
pub fn encode(value: u64) -> String {
    base62::encode(value)
}

/// Decodes a base-62 string back into the integer it encodes.
pub fn decode(input: &str) -> Result<u64, Base62Error> {
    if input.is_empty() {
        return Err(Base62Error::Empty);
    }

    let value = base62::decode(input).map_err(|e| match e {
        base62::DecodeError::ArithmeticOverflow => Base62Error::Overflow(input.to_string()),
        _ => Base62Error::Invalid(input.to_string()),
    })?;

    u64::try_from(value).map_err(|_| Base62Error::Overflow(input.to_string()))
}
