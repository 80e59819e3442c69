//! Error taxonomy for device operations.

use thiserror::Error;
use tilemgr_protocol::ProtocolError;

/// Errors surfaced by transports and device operations.
///
/// Every error aborts the current operation; nothing is retried
/// internally. Retrying a whole push, listing or remove is the caller's
/// decision.
#[derive(Debug, Error)]
pub enum Error {
    /// The endpoint could not be opened or reached.
    #[error("cannot open {endpoint}: {source}")]
    Connect {
        /// The endpoint as given on the command line.
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Echoed bytes differ from the bytes just written, or the echo read
    /// came up short. Host and device are no longer in lockstep.
    #[error(
        "echo check failed at byte {index}: sent {:?}, got {:?}",
        String::from_utf8_lossy(expected),
        String::from_utf8_lossy(received)
    )]
    Desync {
        /// Index of the first differing byte.
        index: usize,
        /// Bytes that were written.
        expected: Vec<u8>,
        /// Bytes accumulated before the mismatch.
        received: Vec<u8>,
    },

    /// No bytes arrived within the read deadline while a reply was
    /// expected.
    #[error("timed out waiting for {waiting_for}")]
    Timeout {
        /// What the reply was for.
        waiting_for: &'static str,
    },

    /// The device-reported digest does not match the locally computed one.
    /// The destination file is left as the device produced it.
    #[error("digest mismatch after push: expected {expected}, device reported {actual}")]
    Integrity {
        /// Hex digest computed locally before chunking.
        expected: String,
        /// Hex digest the device reported.
        actual: String,
    },

    /// Malformed or unexpected reply while parsing.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Serial port failure.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for device operations.
pub type Result<T> = std::result::Result<T, Error>;
