//! Error types for the control protocol.

use thiserror::Error;

/// Errors that can occur while building commands or parsing replies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// File name cannot be embedded in the statement carrying it.
    #[error("invalid file name {name:?}: {reason}")]
    InvalidFileName {
        /// The offending name.
        name: String,
        /// What made it unusable.
        reason: &'static str,
    },

    /// Encoded command exceeds the interpreter's line buffer.
    #[error("command too long: max {max} bytes, got {actual}")]
    LineTooLong { max: usize, actual: usize },

    /// Malformed or unexpected reply text.
    #[error("failed to parse reply: {0}")]
    Parse(String),
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
