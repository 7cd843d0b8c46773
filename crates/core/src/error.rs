//! Errors raised while interpreting external input.

use thiserror::Error;

/// A submission payload could not be decoded.
///
/// Decode failures are terminal for the message that caused them: the
/// ingestion side logs them and leaves redelivery to the broker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload bytes were not valid UTF-8.
    #[error("payload is not valid utf-8: {0}")]
    Utf8(String),

    /// The payload was not a JSON object with the expected integer fields.
    #[error("payload is not a valid submission: {0}")]
    Json(String),
}

/// An identifier could not be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid identifier: {0}")]
pub struct IdError(pub String);
