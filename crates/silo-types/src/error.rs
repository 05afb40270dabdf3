use thiserror::Error;

/// Errors from parsing identifiers and prefixes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid id length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid abbreviation {0:?}: must be 1..=40 hex characters")]
    InvalidPrefix(String),
}
