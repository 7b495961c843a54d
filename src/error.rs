//! Error types for token generation.
//!
//! The pipeline itself is total: every arithmetic step wraps. The only
//! failures come from inputs that cannot be turned into the payload bytes
//! unambiguously, or from reading the wall clock.

use std::str::Utf8Error;
use std::time::SystemTimeError;

/// Errors produced while building a token.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// A raw input field is not valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    InputEncoding {
        field: &'static str,
        #[source]
        source: Utf8Error,
    },

    /// A text value is longer than the 4-byte length prefix can describe.
    #[error("field {tag} is too large to encode ({len} bytes)")]
    FieldTooLarge { tag: u8, len: usize },

    /// The field count does not fit the single count byte.
    #[error("payload has {0} fields, at most 255 can be encoded")]
    TooManyFields(usize),

    /// The system clock reports a time before the Unix epoch.
    #[error("system clock is before the Unix epoch")]
    Timestamp(#[from] SystemTimeError),
}
