//! Framed message channel over an ordered, reliable byte stream.
//!
//! Each `send`/`recv` is one protocol step. Every step races the session's
//! cancellation token and, when configured, a per-step timeout.

use std::future::Future;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::protocol::Message;

pub struct Channel<S> {
    stream: S,
    step_timeout: Option<Duration>,
    max_frame_size: usize,
    cancel: CancellationToken,
    write_buf: BytesMut,
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, config: &TransferConfig, cancel: CancellationToken) -> Self {
        Self {
            stream,
            step_timeout: config.step_timeout,
            max_frame_size: config.max_frame_size,
            cancel,
            write_buf: BytesMut::new(),
        }
    }

    /// Write one message as a single frame.
    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        self.write_buf.clear();
        msg.encode_into(&mut self.write_buf);

        let cancel = self.cancel.clone();
        let stream = &mut self.stream;
        let frame = &self.write_buf;
        guarded(&cancel, self.step_timeout, async move {
            stream.write_all(frame).await.map_err(TransferError::Channel)?;
            stream.flush().await.map_err(TransferError::Channel)
        })
        .await
    }

    /// Wait for the next message from the counterpart.
    pub async fn recv(&mut self) -> Result<Message> {
        let cancel = self.cancel.clone();
        let frame = guarded(
            &cancel,
            self.step_timeout,
            read_frame(&mut self.stream, self.max_frame_size),
        )
        .await?;
        Message::decode(frame)
    }

    /// Wait for an acknowledgment; anything else is a protocol violation.
    pub async fn expect_ack(&mut self, after: &str) -> Result<()> {
        match self.recv().await? {
            Message::Ack => Ok(()),
            other => Err(TransferError::violation(format!(
                "expected ack after {}, got {}",
                after,
                other.kind()
            ))),
        }
    }

    /// Flush and shut down the write side. Errors are ignored: the peer may
    /// already be gone once the exchange is over.
    pub async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Run one step, giving up on cancellation or when the step timeout expires.
async fn guarded<T>(
    cancel: &CancellationToken,
    step_timeout: Option<Duration>,
    step: impl Future<Output = Result<T>>,
) -> Result<T> {
    let bounded = async {
        match step_timeout {
            Some(limit) => tokio::time::timeout(limit, step)
                .await
                .map_err(|_| TransferError::Timeout(limit))?,
            None => step.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        result = bounded => result,
    }
}

/// Read one length-prefixed frame, returning the type byte and body.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_frame_size: usize) -> Result<Bytes> {
    let frame_len = reader.read_u32().await.map_err(TransferError::Channel)? as usize;

    if frame_len == 0 || frame_len > max_frame_size {
        return Err(TransferError::violation(format!(
            "invalid frame length {} (limit {})",
            frame_len, max_frame_size
        )));
    }

    let mut frame = BytesMut::zeroed(frame_len);
    reader
        .read_exact(&mut frame)
        .await
        .map_err(TransferError::Channel)?;
    Ok(frame.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;

    fn pair(config: &TransferConfig) -> (Channel<tokio::io::DuplexStream>, Channel<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (
            Channel::new(a, config, CancellationToken::new()),
            Channel::new(b, config, CancellationToken::new()),
        )
    }

    #[tokio::test]
    async fn messages_cross_in_order() {
        let config = TransferConfig::default();
        let (mut left, mut right) = pair(&config);

        left.send(&Message::ChunkCount(2)).await.unwrap();
        left.send(&Message::Chunk(Chunk::new(0, &b"ab"[..]))).await.unwrap();

        assert_eq!(right.recv().await.unwrap(), Message::ChunkCount(2));
        assert_eq!(
            right.recv().await.unwrap(),
            Message::Chunk(Chunk::new(0, &b"ab"[..]))
        );

        right.send(&Message::Ack).await.unwrap();
        left.expect_ack("chunk 0").await.unwrap();
    }

    #[tokio::test]
    async fn peer_drop_is_channel_failure() {
        let config = TransferConfig::default();
        let (left, mut right) = pair(&config);
        drop(left);

        assert!(matches!(right.recv().await, Err(TransferError::Channel(_))));
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let mut config = TransferConfig::default().with_chunk_size(4);
        config.max_frame_size = 16;
        let (mut left, mut right) = pair(&config);

        left.send(&Message::Chunk(Chunk::new(0, vec![0u8; 32])))
            .await
            .unwrap();
        assert!(matches!(
            right.recv().await,
            Err(TransferError::ProtocolViolation { .. })
        ));
    }

    #[tokio::test]
    async fn zero_length_frame_rejected() {
        let (mut raw, other) = tokio::io::duplex(64);
        let mut channel = Channel::new(other, &TransferConfig::default(), CancellationToken::new());

        raw.write_all(&[0, 0, 0, 0]).await.unwrap();
        assert!(matches!(
            channel.recv().await,
            Err(TransferError::ProtocolViolation { .. })
        ));
    }

    #[tokio::test]
    async fn unexpected_message_instead_of_ack() {
        let config = TransferConfig::default();
        let (mut left, mut right) = pair(&config);

        right.send(&Message::ChunkCount(1)).await.unwrap();
        let err = left.expect_ack("checksum").await.unwrap_err();
        assert!(err.to_string().contains("expected ack after checksum"));
    }

    #[tokio::test]
    async fn step_timeout_fires_on_silent_peer() {
        let config = TransferConfig::default().with_step_timeout(Duration::from_millis(50));
        let (_left, mut right) = pair(&config);

        assert!(matches!(
            right.recv().await,
            Err(TransferError::Timeout(d)) if d == Duration::from_millis(50)
        ));
    }

    #[tokio::test]
    async fn cancellation_aborts_pending_read() {
        let (_a, b) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let mut channel = Channel::new(b, &TransferConfig::default(), cancel.clone());

        let waiter = tokio::spawn(async move { channel.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(TransferError::Cancelled)));
    }
}
