//! # Protocol Errors
//!
//! Errors raised by the wire codec itself, independent of any transport.

use thiserror::Error;

/// Result type for codec operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Failures detected while encoding or decoding the wire format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Malformed frame: bad length line, missing terminator, unknown status.
    #[error("invalid response: {0}")]
    Framing(String),

    /// Text could not be converted under the configured encoding policy.
    #[error("encoding error: {0}")]
    Encoding(String),
}
