//! Requester side of a session.
//!
//! ```text
//! Connecting -> SendingRequest -> AwaitingCount -> AwaitingChecksum
//!     -> ReceivingChunks(0..n) -> Verifying -> Complete | Failed
//! ```
//!
//! Chunks must arrive in strictly increasing sequence order and carry at
//! most `chunk_size` payload bytes. Anything else, or a dropped connection,
//! fails the session before any output is written.
//! A checksum mismatch fails it after the output has been written.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::Channel;
use crate::checksum;
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::logging::{TransferEvent, TransferLog, TransferLogger};
use crate::protocol::{Message, TransferManifest};
use crate::reassembly::ReassemblyBuffer;
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Connecting,
    SendingRequest,
    AwaitingCount,
    AwaitingChecksum,
    ReceivingChunks(u64),
    Verifying,
    Complete,
    Failed,
}

/// Summary of a verified transfer.
#[derive(Debug, Clone)]
pub struct ReceiveResult {
    pub session_id: Uuid,
    pub identifier: String,
    pub output_path: PathBuf,
    pub manifest: TransferManifest,
    pub total_bytes: u64,
    pub duration: Duration,
}

pub struct ReceiverSession<S> {
    channel: Channel<S>,
    chunk_size: usize,
    session_id: Uuid,
    state: ReceiverState,
    logger: Arc<dyn TransferLogger>,
}

impl<S> ReceiverSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already connected stream.
    pub fn new(
        stream: S,
        config: &TransferConfig,
        cancel: CancellationToken,
        logger: Arc<dyn TransferLogger>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            channel: Channel::new(stream, config, cancel),
            chunk_size: config.chunk_size,
            session_id: Uuid::new_v4(),
            state: ReceiverState::Connecting,
            logger,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Request `identifier` and write the verified copy into `storage`.
    pub async fn run(&mut self, identifier: &str, storage: &Storage) -> Result<ReceiveResult> {
        let result = self.drive(identifier, storage).await;
        match &result {
            Ok(_) => self.transition(ReceiverState::Complete),
            Err(e) => {
                self.transition(ReceiverState::Failed);
                self.log(TransferEvent::Error {
                    message: e.to_string(),
                });
            }
        }
        self.channel.close().await;
        result
    }

    async fn drive(&mut self, identifier: &str, storage: &Storage) -> Result<ReceiveResult> {
        let start = Instant::now();

        self.transition(ReceiverState::SendingRequest);
        self.channel
            .send(&Message::Request {
                identifier: identifier.to_string(),
            })
            .await?;
        self.log(TransferEvent::RequestSent {
            identifier: identifier.to_string(),
        });

        self.transition(ReceiverState::AwaitingCount);
        let chunk_count = match self.channel.recv().await? {
            Message::ChunkCount(count) => count,
            Message::NotFound => {
                return Err(TransferError::ResourceNotFound {
                    identifier: identifier.to_string(),
                });
            }
            other => {
                return Err(TransferError::violation(format!(
                    "expected chunk count, got {}",
                    other.kind()
                )));
            }
        };
        self.channel.send(&Message::Ack).await?;

        self.transition(ReceiverState::AwaitingChecksum);
        let checksum = match self.channel.recv().await? {
            Message::Checksum(checksum) => checksum,
            other => {
                return Err(TransferError::violation(format!(
                    "expected checksum, got {}",
                    other.kind()
                )));
            }
        };
        self.channel.send(&Message::Ack).await?;

        let manifest = TransferManifest {
            chunk_count,
            checksum,
        };
        self.log(TransferEvent::ManifestReceived {
            chunk_count,
            checksum: manifest.checksum.clone(),
        });

        let mut buffer = ReassemblyBuffer::new();
        for expected in 0..chunk_count {
            self.transition(ReceiverState::ReceivingChunks(expected));
            let chunk = match self.channel.recv().await? {
                Message::Chunk(chunk) => chunk,
                other => {
                    return Err(TransferError::violation(format!(
                        "expected chunk {}, got {}",
                        expected,
                        other.kind()
                    )));
                }
            };
            if chunk.sequence != expected {
                return Err(TransferError::violation(format!(
                    "chunk {} arrived while expecting chunk {}",
                    chunk.sequence, expected
                )));
            }
            if chunk.payload.len() > self.chunk_size {
                return Err(TransferError::violation(format!(
                    "chunk {} carries {} bytes, limit is {}",
                    chunk.sequence,
                    chunk.payload.len(),
                    self.chunk_size
                )));
            }

            let sequence = chunk.sequence;
            let size = chunk.payload.len();
            buffer.insert(chunk)?;
            self.channel.send(&Message::Ack).await?;
            self.log(TransferEvent::ChunkReceived { sequence, size });
        }

        self.transition(ReceiverState::Verifying);
        let total_bytes = buffer.total_bytes();
        let data = buffer.assemble(chunk_count)?;
        let output_path = storage.write_output(identifier, &data).await?;
        self.log(TransferEvent::OutputWritten {
            path: output_path.display().to_string(),
            bytes: total_bytes,
        });

        // Digest what actually landed on disk, not the in-memory copy.
        let actual = checksum::digest_file(&output_path).await?;
        let checksum_match = actual == manifest.checksum;
        self.log(TransferEvent::Verified { checksum_match });
        if !checksum_match {
            return Err(TransferError::ChecksumMismatch {
                expected: manifest.checksum,
                actual,
                output: output_path,
            });
        }

        let duration = start.elapsed();
        self.log(TransferEvent::TransferComplete {
            total_bytes,
            chunk_count,
            duration_ms: duration.as_millis() as u64,
        });

        Ok(ReceiveResult {
            session_id: self.session_id,
            identifier: identifier.to_string(),
            output_path,
            manifest,
            total_bytes,
            duration,
        })
    }

    fn transition(&mut self, next: ReceiverState) {
        tracing::trace!(session_id = %self.session_id, "receiver {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn log(&self, event: TransferEvent) {
        self.logger.log(TransferLog {
            component: "receiver",
            session_id: self.session_id,
            event,
        });
    }
}

/// Run the requester side of one session over an already connected `stream`.
pub async fn run_receiver<S>(
    stream: S,
    identifier: &str,
    storage: &Storage,
    config: &TransferConfig,
    cancel: CancellationToken,
    logger: Arc<dyn TransferLogger>,
) -> Result<ReceiveResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ReceiverSession::new(stream, config, cancel, logger)?
        .run(identifier, storage)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;
    use crate::logging::{NullLogger, RecordingLogger};
    use tokio::io::DuplexStream;

    async fn output_storage(name: &str) -> (PathBuf, Storage) {
        let dir = std::env::temp_dir().join(format!("ferry-receiver-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let storage = Storage::new(&dir).await.unwrap();
        (dir, storage)
    }

    /// A hand-driven holder talking to the session under test.
    fn holder(stream: DuplexStream) -> Channel<DuplexStream> {
        let config = TransferConfig::default().with_step_timeout(Duration::from_secs(5));
        Channel::new(stream, &config, CancellationToken::new())
    }

    fn spawn_receiver(
        stream: DuplexStream,
        identifier: &'static str,
        storage: Storage,
        logger: Arc<dyn TransferLogger>,
    ) -> tokio::task::JoinHandle<(Result<ReceiveResult>, ReceiverState)> {
        tokio::spawn(async move {
            let mut session = ReceiverSession::new(
                stream,
                &TransferConfig::default(),
                CancellationToken::new(),
                logger,
            )
            .unwrap();
            let result = session.run(identifier, &storage).await;
            (result, session.state())
        })
    }

    /// Answer the request with a manifest and acknowledge-wait after each message.
    async fn announce(peer: &mut Channel<DuplexStream>, identifier: &str, chunk_count: u64, checksum: String) {
        assert_eq!(
            peer.recv().await.unwrap(),
            Message::Request {
                identifier: identifier.into()
            }
        );
        peer.send(&Message::ChunkCount(chunk_count)).await.unwrap();
        peer.expect_ack("chunk count").await.unwrap();
        peer.send(&Message::Checksum(checksum)).await.unwrap();
        peer.expect_ack("checksum").await.unwrap();
    }

    #[tokio::test]
    async fn reassembles_hello_world() {
        let (dir, storage) = output_storage("hello").await;
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let logger = Arc::new(RecordingLogger::default());
        let receiver = spawn_receiver(theirs, "sample.txt", storage, logger.clone());

        let mut peer = holder(ours);
        announce(&mut peer, "sample.txt", 3, checksum::digest_bytes(b"hello world")).await;
        for (seq, payload) in [(0u64, &b"hell"[..]), (1, &b"o wo"[..]), (2, &b"rld"[..])] {
            peer.send(&Message::Chunk(Chunk::new(seq, payload))).await.unwrap();
            peer.expect_ack("chunk").await.unwrap();
        }

        let (result, state) = receiver.await.unwrap();
        let result = result.unwrap();
        assert_eq!(state, ReceiverState::Complete);
        assert_eq!(result.output_path, dir.join("received_sample.txt"));
        assert_eq!(result.total_bytes, 11);
        assert_eq!(std::fs::read(&result.output_path).unwrap(), b"hello world");

        let events = logger.events();
        assert!(events
            .iter()
            .any(|e| matches!(e, TransferEvent::Verified { checksum_match: true })));
        let received = events
            .iter()
            .filter(|e| matches!(e, TransferEvent::ChunkReceived { .. }))
            .count();
        assert_eq!(received, 3);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn zero_chunks_writes_empty_output() {
        let (dir, storage) = output_storage("empty").await;
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let receiver = spawn_receiver(theirs, "empty.bin", storage, Arc::new(NullLogger));

        let mut peer = holder(ours);
        announce(&mut peer, "empty.bin", 0, checksum::digest_bytes(b"")).await;

        let (result, state) = receiver.await.unwrap();
        let result = result.unwrap();
        assert_eq!(state, ReceiverState::Complete);
        assert_eq!(std::fs::read(&result.output_path).unwrap(), b"");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn not_found_fails_without_output() {
        let (dir, storage) = output_storage("notfound").await;
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let logger = Arc::new(RecordingLogger::default());
        let receiver = spawn_receiver(theirs, "ghost.txt", storage, logger.clone());

        let mut peer = holder(ours);
        peer.recv().await.unwrap();
        peer.send(&Message::NotFound).await.unwrap();
        drop(peer);

        let (result, state) = receiver.await.unwrap();
        assert!(matches!(result, Err(TransferError::ResourceNotFound { .. })));
        assert_eq!(state, ReceiverState::Failed);
        assert!(!dir.join("received_ghost.txt").exists());
        assert!(!logger
            .events()
            .iter()
            .any(|e| matches!(e, TransferEvent::Verified { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn garbage_instead_of_count_is_violation() {
        let (dir, storage) = output_storage("garbage").await;
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let receiver = spawn_receiver(theirs, "a.txt", storage, Arc::new(NullLogger));

        let mut peer = holder(ours);
        peer.recv().await.unwrap();
        peer.send(&Message::Checksum(checksum::digest_bytes(b"x")))
            .await
            .unwrap();

        let (result, state) = receiver.await.unwrap();
        assert!(matches!(result, Err(TransferError::ProtocolViolation { .. })));
        assert_eq!(state, ReceiverState::Failed);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn out_of_order_chunk_aborts() {
        let (dir, storage) = output_storage("order").await;
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let receiver = spawn_receiver(theirs, "sample.txt", storage, Arc::new(NullLogger));

        let mut peer = holder(ours);
        announce(&mut peer, "sample.txt", 3, checksum::digest_bytes(b"hello world")).await;
        peer.send(&Message::Chunk(Chunk::new(0, &b"hell"[..]))).await.unwrap();
        peer.expect_ack("chunk 0").await.unwrap();
        peer.send(&Message::Chunk(Chunk::new(2, &b"rld"[..]))).await.unwrap();

        let (result, state) = receiver.await.unwrap();
        let err = result.unwrap_err();
        assert!(matches!(err, TransferError::ProtocolViolation { .. }));
        assert!(err.to_string().contains("expecting chunk 1"));
        assert_eq!(state, ReceiverState::Failed);
        assert!(!dir.join("received_sample.txt").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn chunk_larger_than_chunk_size_aborts() {
        let (dir, storage) = output_storage("oversize").await;
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let config = TransferConfig::default().with_chunk_size(4);

        let receiver = tokio::spawn(async move {
            run_receiver(
                theirs,
                "big.bin",
                &storage,
                &config,
                CancellationToken::new(),
                Arc::new(NullLogger),
            )
            .await
        });

        let data = vec![7u8; 4096];
        let mut peer = holder(ours);
        announce(&mut peer, "big.bin", 1, checksum::digest_bytes(&data)).await;
        peer.send(&Message::Chunk(Chunk::new(0, data))).await.unwrap();

        let err = receiver.await.unwrap().unwrap_err();
        assert!(matches!(err, TransferError::ProtocolViolation { .. }));
        assert!(err.to_string().contains("4096 bytes, limit is 4"));
        assert!(!dir.join("received_big.bin").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn disconnect_mid_loop_is_channel_failure() {
        let (dir, storage) = output_storage("drop").await;
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let receiver = spawn_receiver(theirs, "sample.txt", storage, Arc::new(NullLogger));

        let mut peer = holder(ours);
        announce(&mut peer, "sample.txt", 3, checksum::digest_bytes(b"hello world")).await;
        peer.send(&Message::Chunk(Chunk::new(0, &b"hell"[..]))).await.unwrap();
        peer.expect_ack("chunk 0").await.unwrap();
        drop(peer);

        let (result, state) = receiver.await.unwrap();
        assert!(matches!(result, Err(TransferError::Channel(_))));
        assert_eq!(state, ReceiverState::Failed);
        assert!(!dir.join("received_sample.txt").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn corrupted_payload_is_kept_but_reported() {
        let (dir, storage) = output_storage("corrupt").await;
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let receiver = spawn_receiver(theirs, "sample.txt", storage, Arc::new(NullLogger));

        let mut peer = holder(ours);
        announce(&mut peer, "sample.txt", 3, checksum::digest_bytes(b"hello world")).await;
        // Second chunk altered in transit.
        for (seq, payload) in [(0u64, &b"hell"[..]), (1, &b"o_wo"[..]), (2, &b"rld"[..])] {
            peer.send(&Message::Chunk(Chunk::new(seq, payload))).await.unwrap();
            peer.expect_ack("chunk").await.unwrap();
        }

        let (result, state) = receiver.await.unwrap();
        match result {
            Err(TransferError::ChecksumMismatch {
                expected,
                actual,
                output,
            }) => {
                assert_eq!(expected, checksum::digest_bytes(b"hello world"));
                assert_eq!(actual, checksum::digest_bytes(b"hello_world"));
                assert_eq!(std::fs::read(&output).unwrap(), b"hello_world");
            }
            other => panic!("expected checksum mismatch, got {:?}", other),
        }
        assert_eq!(state, ReceiverState::Failed);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn cancelled_while_waiting_for_chunk() {
        let (dir, storage) = output_storage("cancel").await;
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let cancel = CancellationToken::new();
        let session_cancel = cancel.clone();

        let receiver = tokio::spawn(async move {
            run_receiver(
                theirs,
                "sample.txt",
                &storage,
                &TransferConfig::default(),
                session_cancel,
                Arc::new(NullLogger),
            )
            .await
        });

        let mut peer = holder(ours);
        announce(&mut peer, "sample.txt", 2, checksum::digest_bytes(b"ab")).await;
        cancel.cancel();

        let result = receiver.await.unwrap();
        assert!(matches!(result, Err(TransferError::Cancelled)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn stalled_holder_times_out() {
        let (dir, storage) = output_storage("stall").await;
        let (_ours, theirs) = tokio::io::duplex(64 * 1024);
        let config = TransferConfig::default().with_step_timeout(Duration::from_millis(50));

        let result = run_receiver(
            theirs,
            "sample.txt",
            &storage,
            &config,
            CancellationToken::new(),
            Arc::new(NullLogger),
        )
        .await;
        assert!(matches!(result, Err(TransferError::Timeout(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
