//! Wire format for ferry sessions.
//!
//! Every message is one length-prefixed frame:
//!
//! ```text
//! [0..4]   Frame length (u32 BE), counting the type byte and body
//! [4]      Message type
//! [5..]    Body
//! ```
//!
//! | Type | Message     | Body                                        |
//! |------|-------------|---------------------------------------------|
//! | 0x01 | Request     | UTF-8 file identifier                       |
//! | 0x02 | ChunkCount  | decimal integer as ASCII                    |
//! | 0x03 | Checksum    | 64 lowercase hex characters (SHA-256)       |
//! | 0x10 | Chunk       | sequence number (u64 BE) then raw payload   |
//! | 0x11 | Ack         | literal `ACK`                               |
//! | 0x7F | NotFound    | literal `ERROR: File not found`             |
//!
//! The chunk sequence number is a fixed-width field, so payload bytes can
//! never be mistaken for framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::checksum::DIGEST_HEX_LEN;
use crate::chunker::Chunk;
use crate::error::{Result, TransferError};

/// Size of the frame length prefix.
pub const FRAME_LEN_PREFIX: usize = 4;

/// Size of the fixed sequence-number header inside a chunk record.
pub const SEQUENCE_HEADER: usize = 8;

/// Type byte plus sequence header: frame bytes a chunk record adds to its payload.
pub const CHUNK_RECORD_OVERHEAD: usize = 1 + SEQUENCE_HEADER;

// Frame types
pub const FRAME_REQUEST: u8 = 0x01;
pub const FRAME_CHUNK_COUNT: u8 = 0x02;
pub const FRAME_CHECKSUM: u8 = 0x03;
pub const FRAME_CHUNK: u8 = 0x10;
pub const FRAME_ACK: u8 = 0x11;
pub const FRAME_NOT_FOUND: u8 = 0x7F;

/// Acknowledgment token.
pub const ACK_TOKEN: &[u8; 3] = b"ACK";

/// Notice sent when the requested identifier cannot be resolved.
pub const NOT_FOUND_NOTICE: &str = "ERROR: File not found";

/// The chunk count and checksum describing a source, fixed before streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferManifest {
    pub chunk_count: u64,
    pub checksum: String,
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request { identifier: String },
    ChunkCount(u64),
    Checksum(String),
    Chunk(Chunk),
    Ack,
    NotFound,
}

impl Message {
    /// Short name for logs and violation reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::ChunkCount(_) => "chunk count",
            Self::Checksum(_) => "checksum",
            Self::Chunk(_) => "chunk",
            Self::Ack => "ack",
            Self::NotFound => "not-found notice",
        }
    }

    /// Frame length (type byte + body), i.e. the value of the length prefix.
    pub fn frame_len(&self) -> usize {
        1 + match self {
            Self::Request { identifier } => identifier.len(),
            Self::ChunkCount(count) => count.to_string().len(),
            Self::Checksum(checksum) => checksum.len(),
            Self::Chunk(chunk) => SEQUENCE_HEADER + chunk.payload.len(),
            Self::Ack => ACK_TOKEN.len(),
            Self::NotFound => NOT_FOUND_NOTICE.len(),
        }
    }

    /// Append the full frame, length prefix included, to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(FRAME_LEN_PREFIX + self.frame_len());
        buf.put_u32(self.frame_len() as u32);
        match self {
            Self::Request { identifier } => {
                buf.put_u8(FRAME_REQUEST);
                buf.put_slice(identifier.as_bytes());
            }
            Self::ChunkCount(count) => {
                buf.put_u8(FRAME_CHUNK_COUNT);
                buf.put_slice(count.to_string().as_bytes());
            }
            Self::Checksum(checksum) => {
                buf.put_u8(FRAME_CHECKSUM);
                buf.put_slice(checksum.as_bytes());
            }
            Self::Chunk(chunk) => {
                buf.put_u8(FRAME_CHUNK);
                buf.put_u64(chunk.sequence);
                buf.put_slice(&chunk.payload);
            }
            Self::Ack => {
                buf.put_u8(FRAME_ACK);
                buf.put_slice(ACK_TOKEN);
            }
            Self::NotFound => {
                buf.put_u8(FRAME_NOT_FOUND);
                buf.put_slice(NOT_FOUND_NOTICE.as_bytes());
            }
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode a frame with its length prefix already stripped.
    pub fn decode(mut frame: Bytes) -> Result<Self> {
        if frame.is_empty() {
            return Err(TransferError::violation("empty frame"));
        }
        let msg_type = frame.get_u8();
        let body = frame;

        match msg_type {
            // Identifiers are opaque: an empty or undecodable one is still a
            // request, and resolving it is the holder's business.
            FRAME_REQUEST => Ok(Self::Request {
                identifier: String::from_utf8_lossy(&body).into_owned(),
            }),
            FRAME_CHUNK_COUNT => decode_count(&body).map(Self::ChunkCount),
            FRAME_CHECKSUM => decode_checksum(&body).map(Self::Checksum),
            FRAME_CHUNK => {
                if body.len() < SEQUENCE_HEADER {
                    return Err(TransferError::violation(format!(
                        "chunk record too short: {} bytes",
                        body.len()
                    )));
                }
                let mut body = body;
                let sequence = body.get_u64();
                Ok(Self::Chunk(Chunk {
                    sequence,
                    payload: body,
                }))
            }
            FRAME_ACK => {
                if &body[..] != ACK_TOKEN {
                    return Err(TransferError::violation("malformed acknowledgment"));
                }
                Ok(Self::Ack)
            }
            FRAME_NOT_FOUND => Ok(Self::NotFound),
            other => Err(TransferError::violation(format!(
                "unknown frame type 0x{:02x}",
                other
            ))),
        }
    }
}

fn decode_count(body: &[u8]) -> Result<u64> {
    if body.is_empty() || !body.iter().all(u8::is_ascii_digit) {
        return Err(TransferError::violation(format!(
            "chunk count is not a decimal integer: {:?}",
            String::from_utf8_lossy(body)
        )));
    }
    // All-ASCII digits, so the only possible failure is overflow.
    std::str::from_utf8(body)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TransferError::violation("chunk count out of range"))
}

fn decode_checksum(body: &[u8]) -> Result<String> {
    let well_formed = body.len() == DIGEST_HEX_LEN
        && body
            .iter()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b));
    if !well_formed {
        return Err(TransferError::violation(format!(
            "checksum is not a {}-character hex digest",
            DIGEST_HEX_LEN
        )));
    }
    // Validated as ASCII above.
    Ok(String::from_utf8_lossy(body).into_owned())
}
