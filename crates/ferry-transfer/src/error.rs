//! Error types for ferry transfers.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Terminal outcome of a failed transfer session.
///
/// Nothing is retried: every variant ends the session it came from.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The holder could not resolve the requested identifier.
    #[error("resource not found: {identifier}")]
    ResourceNotFound { identifier: String },

    /// A message arrived out of the expected order or with the wrong shape.
    #[error("protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// Reassembly finished but the output digest differs from the announced one.
    /// The output file is left on disk.
    #[error("checksum mismatch: expected {expected}, got {actual} (output kept at {})", output.display())]
    ChecksumMismatch {
        expected: String,
        actual: String,
        output: PathBuf,
    },

    /// The connection dropped or a read/write on it failed.
    #[error("channel failure: {0}")]
    Channel(#[source] std::io::Error),

    /// Local file I/O failed (reading the source or writing the output).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The counterpart did not answer within the configured step timeout.
    #[error("timed out after {0:?} waiting on peer")]
    Timeout(Duration),

    /// The session's cancellation token fired.
    #[error("transfer cancelled")]
    Cancelled,

    /// Invalid transfer configuration.
    #[error("invalid config: {0}")]
    Config(String),
}

impl TransferError {
    pub(crate) fn violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
