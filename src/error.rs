//! Error types for payload encoding, decoding and rendering.

use thiserror::Error;

/// Errors raised while building a payload or rendering it.
///
/// Everything except `RenderingUnavailable` is an input error: the caller has
/// to fix the request, retrying the same input fails the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PixError {
    #[error("field {tag} value is {len} characters long, maximum is 99")]
    FieldTooLong { tag: String, len: usize },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),

    #[error("field {tag} contains characters outside printable ASCII")]
    InvalidCharacters { tag: String },

    #[error("invalid tag {0:?}: expected exactly two decimal digits")]
    InvalidTag(String),

    #[error("QR rendering unavailable: {0}")]
    RenderingUnavailable(String),
}

/// Errors raised while reading a payload back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload contains non-ASCII data")]
    NotAscii,

    #[error("truncated TLV header at offset {offset}")]
    TruncatedHeader { offset: usize },

    #[error("invalid TLV tag or length at offset {offset}")]
    InvalidLength { offset: usize },

    #[error("field {tag} at offset {offset} claims {len} bytes but only {remaining} remain")]
    TruncatedValue {
        tag: String,
        offset: usize,
        len: usize,
        remaining: usize,
    },

    #[error("unexpected field order: expected {expected}, found {found}")]
    UnexpectedField { expected: String, found: String },

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("checksum mismatch: computed {computed}, payload carries {found}")]
    ChecksumMismatch { computed: String, found: String },
}
