//! Holder side of a session.
//!
//! ```text
//! AwaitingRequest -> Resolving -> AnnouncingCount -> AnnouncingChecksum
//!     -> StreamingChunks(0..n) -> Complete
//! ```
//!
//! Every outgoing message waits for its acknowledgment before the next one
//! is sent; at most one message is in flight.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::Channel;
use crate::checksum;
use crate::chunker::{Chunk, Chunker};
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::logging::{TransferEvent, TransferLog, TransferLogger};
use crate::protocol::{Message, TransferManifest};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    AwaitingRequest,
    Resolving,
    AnnouncingCount,
    AnnouncingChecksum,
    StreamingChunks(u64),
    Complete,
}

/// Summary of a completed send.
#[derive(Debug, Clone)]
pub struct SendResult {
    pub session_id: Uuid,
    pub identifier: String,
    pub manifest: TransferManifest,
    pub total_bytes: u64,
    pub duration: Duration,
}

/// Compute the manifest and the chunk list from one copy of the source, so
/// the announced checksum always describes the bytes that get streamed.
pub async fn prepare(chunker: &Chunker, source: &Bytes) -> io::Result<(TransferManifest, Vec<Chunk>)> {
    let checksum = checksum::digest(&source[..]).await?;
    let chunks = chunker.split(source);
    let manifest = TransferManifest {
        chunk_count: chunks.len() as u64,
        checksum,
    };
    Ok((manifest, chunks))
}

pub struct SenderSession<S> {
    channel: Channel<S>,
    chunker: Chunker,
    session_id: Uuid,
    state: SenderState,
    logger: Arc<dyn TransferLogger>,
}

impl<S> SenderSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        config: &TransferConfig,
        cancel: CancellationToken,
        logger: Arc<dyn TransferLogger>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            channel: Channel::new(stream, config, cancel),
            chunker: Chunker::new(config.chunk_size)?,
            session_id: Uuid::new_v4(),
            state: SenderState::AwaitingRequest,
            logger,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Serve one request from `storage`, then close the write side.
    pub async fn run(&mut self, storage: &Storage) -> Result<SendResult> {
        let result = self.drive(storage).await;
        match &result {
            Ok(_) => self.transition(SenderState::Complete),
            // Already reported when it happened.
            Err(TransferError::ResourceNotFound { .. }) => {}
            Err(e) => self.log(TransferEvent::Error {
                message: e.to_string(),
            }),
        }
        self.channel.close().await;
        result
    }

    async fn drive(&mut self, storage: &Storage) -> Result<SendResult> {
        let start = Instant::now();

        let identifier = match self.channel.recv().await? {
            Message::Request { identifier } => identifier,
            other => {
                return Err(TransferError::violation(format!(
                    "expected request, got {}",
                    other.kind()
                )));
            }
        };
        self.log(TransferEvent::RequestReceived {
            identifier: identifier.clone(),
        });

        self.transition(SenderState::Resolving);
        let Some(source) = storage.read_source(&identifier).await? else {
            self.log(TransferEvent::ResourceNotFound {
                identifier: identifier.clone(),
            });
            self.channel.send(&Message::NotFound).await?;
            return Err(TransferError::ResourceNotFound { identifier });
        };

        let (manifest, chunks) = prepare(&self.chunker, &source).await?;
        self.log(TransferEvent::ManifestComputed {
            chunk_count: manifest.chunk_count,
            checksum: manifest.checksum.clone(),
            total_bytes: source.len() as u64,
        });

        self.transition(SenderState::AnnouncingCount);
        self.channel
            .send(&Message::ChunkCount(manifest.chunk_count))
            .await?;
        self.channel.expect_ack("chunk count").await?;

        self.transition(SenderState::AnnouncingChecksum);
        self.channel
            .send(&Message::Checksum(manifest.checksum.clone()))
            .await?;
        self.channel.expect_ack("checksum").await?;

        for chunk in chunks {
            let sequence = chunk.sequence;
            let size = chunk.payload.len();
            self.transition(SenderState::StreamingChunks(sequence));
            self.channel.send(&Message::Chunk(chunk)).await?;
            self.channel
                .expect_ack(&format!("chunk {}", sequence))
                .await?;
            self.log(TransferEvent::ChunkSent { sequence, size });
        }

        let duration = start.elapsed();
        self.log(TransferEvent::TransferComplete {
            total_bytes: source.len() as u64,
            chunk_count: manifest.chunk_count,
            duration_ms: duration.as_millis() as u64,
        });

        Ok(SendResult {
            session_id: self.session_id,
            identifier,
            manifest,
            total_bytes: source.len() as u64,
            duration,
        })
    }

    fn transition(&mut self, next: SenderState) {
        tracing::trace!(session_id = %self.session_id, "sender {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn log(&self, event: TransferEvent) {
        self.logger.log(TransferLog {
            component: "sender",
            session_id: self.session_id,
            event,
        });
    }
}

/// Run the holder side of one session over `stream`.
pub async fn run_sender<S>(
    stream: S,
    storage: &Storage,
    config: &TransferConfig,
    cancel: CancellationToken,
    logger: Arc<dyn TransferLogger>,
) -> Result<SendResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    SenderSession::new(stream, config, cancel, logger)?
        .run(storage)
        .await
}
