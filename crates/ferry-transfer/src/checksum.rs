//! SHA-256 integrity digests over raw file bytes.
//!
//! The digest never sees wire framing or chunk boundaries: sender and
//! receiver both hash the plain file content.

use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read buffer used when hashing a stream (64 KB).
pub const READ_BUF_SIZE: usize = 64 * 1024;

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Incremental SHA-256 accumulator producing a lowercase hex digest.
#[derive(Clone, Default)]
pub struct Checksum {
    hasher: Sha256,
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Hash everything `source` yields with bounded working memory.
pub async fn digest<R: AsyncRead + Unpin>(mut source: R) -> io::Result<String> {
    let mut checksum = Checksum::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        checksum.update(&buf[..n]);
    }
    Ok(checksum.finalize())
}

/// Hash the file at `path`.
pub async fn digest_file(path: impl AsRef<Path>) -> io::Result<String> {
    let file = tokio::fs::File::open(path).await?;
    digest(file).await
}

pub fn digest_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
