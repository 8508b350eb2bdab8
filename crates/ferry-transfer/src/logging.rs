/// Structured transfer logging.
///
/// Sender and receiver report lifecycle and per-chunk events through a
/// `TransferLogger`, tagged with the session id they belong to.

use std::fmt;

use uuid::Uuid;

/// Structured log entry for a transfer operation.
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub component: &'static str,
    pub session_id: Uuid,
    pub event: TransferEvent,
}

/// Transfer events that can be logged.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Sender: identifier received from the requester
    RequestReceived { identifier: String },
    /// Receiver: identifier sent to the holder
    RequestSent { identifier: String },
    /// Sender: identifier could not be resolved
    ResourceNotFound { identifier: String },
    /// Sender: count and checksum computed
    ManifestComputed {
        chunk_count: u64,
        checksum: String,
        total_bytes: u64,
    },
    /// Receiver: count and checksum acknowledged
    ManifestReceived { chunk_count: u64, checksum: String },
    /// Sender: chunk acknowledged by the receiver
    ChunkSent { sequence: u64, size: usize },
    /// Receiver: chunk stored and acknowledged
    ChunkReceived { sequence: u64, size: usize },
    /// Receiver: reassembled output written to disk
    OutputWritten { path: String, bytes: u64 },
    /// Receiver: output digest compared with the announced one
    Verified { checksum_match: bool },
    /// Transfer complete
    TransferComplete {
        total_bytes: u64,
        chunk_count: u64,
        duration_ms: u64,
    },
    /// Error occurred
    Error { message: String },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestReceived { identifier } => {
                write!(f, "request_received identifier={:?}", identifier)
            }
            Self::RequestSent { identifier } => {
                write!(f, "request_sent identifier={:?}", identifier)
            }
            Self::ResourceNotFound { identifier } => {
                write!(f, "resource_not_found identifier={:?}", identifier)
            }
            Self::ManifestComputed { chunk_count, checksum, total_bytes } => {
                write!(f, "manifest_computed chunks={} checksum={} bytes={}", chunk_count, checksum, total_bytes)
            }
            Self::ManifestReceived { chunk_count, checksum } => {
                write!(f, "manifest_received chunks={} checksum={}", chunk_count, checksum)
            }
            Self::ChunkSent { sequence, size } => {
                write!(f, "chunk_sent seq={} size={}", sequence, size)
            }
            Self::ChunkReceived { sequence, size } => {
                write!(f, "chunk_received seq={} size={}", sequence, size)
            }
            Self::OutputWritten { path, bytes } => {
                write!(f, "output_written path={} bytes={}", path, bytes)
            }
            Self::Verified { checksum_match } => {
                write!(f, "verified checksum_match={}", checksum_match)
            }
            Self::TransferComplete { total_bytes, chunk_count, duration_ms } => {
                write!(f, "transfer_complete bytes={} chunks={} duration_ms={}", total_bytes, chunk_count, duration_ms)
            }
            Self::Error { message } => {
                write!(f, "error: {}", message)
            }
        }
    }
}

/// Trait for transfer logging. Implementations can forward to `tracing`,
/// collect entries for inspection, or discard them.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        // Info for lifecycle events, debug for per-chunk spam
        match &entry.event {
            TransferEvent::ChunkSent { .. } | TransferEvent::ChunkReceived { .. } => {
                tracing::debug!(
                    component = entry.component,
                    session_id = %entry.session_id,
                    "{}",
                    entry.event,
                );
            }
            TransferEvent::ResourceNotFound { .. }
            | TransferEvent::Verified { checksum_match: false }
            | TransferEvent::Error { .. } => {
                tracing::warn!(
                    component = entry.component,
                    session_id = %entry.session_id,
                    "{}",
                    entry.event,
                );
            }
            _ => {
                tracing::info!(
                    component = entry.component,
                    session_id = %entry.session_id,
                    "{}",
                    entry.event,
                );
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}

/// Logger that keeps events in memory so tests can inspect them.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingLogger {
    events: std::sync::Mutex<Vec<TransferEvent>>,
}

#[cfg(test)]
impl RecordingLogger {
    pub(crate) fn events(&self) -> Vec<TransferEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl TransferLogger for RecordingLogger {
    fn log(&self, entry: TransferLog) {
        self.events.lock().unwrap().push(entry.event);
    }
}
