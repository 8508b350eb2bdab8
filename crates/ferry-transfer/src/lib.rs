//! Ferry: lock-step single-file transfer over a reliable byte stream.
//!
//! A requester names a file; the holder answers with the chunk count and
//! SHA-256 checksum of that file, then streams numbered chunks, each one
//! acknowledged before the next is sent. The requester reassembles the
//! chunks in sequence order and verifies the checksum of what it wrote.
//!
//! - `sender` / `receiver`: the two session roles
//! - `protocol`: length-prefixed frame codec
//! - `channel`: one message per step, with timeout and cancellation
//! - `chunker`, `reassembly`, `checksum`: splitting, rebuilding, verifying
//! - `storage`: identifier-to-file mapping on both sides

pub mod channel;
pub mod checksum;
pub mod chunker;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod reassembly;
pub mod receiver;
pub mod sender;
pub mod storage;

// Re-export key types for convenience.
pub use chunker::{Chunk, Chunker};
pub use config::TransferConfig;
pub use error::{Result, TransferError};
pub use logging::{NullLogger, TracingLogger, TransferLogger};
pub use protocol::{Message, TransferManifest};
pub use reassembly::ReassemblyBuffer;
pub use receiver::{ReceiveResult, ReceiverSession, ReceiverState, run_receiver};
pub use sender::{SendResult, SenderSession, SenderState, run_sender};
pub use storage::Storage;
