//! Transfer configuration.
//!
//! Everything a session needs is passed in at construction time; nothing is
//! read from globals once a session is running.

use std::time::Duration;

use crate::error::{Result, TransferError};
use crate::protocol::CHUNK_RECORD_OVERHEAD;

/// Default chunk size: 1 KB of payload per chunk record.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Largest payload the default frame limit admits (16 MB).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Default frame limit: a maximum-size chunk record plus its header.
pub const DEFAULT_MAX_FRAME_SIZE: usize = MAX_CHUNK_SIZE + CHUNK_RECORD_OVERHEAD;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Payload bytes per chunk. The sending side splits at this size; the
    /// receiving side rejects any chunk that carries more.
    pub chunk_size: usize,
    /// Upper bound on each wait for the counterpart. `None` waits forever.
    pub step_timeout: Option<Duration>,
    /// Largest frame (type byte + body) accepted off the wire.
    pub max_frame_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            step_timeout: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl TransferConfig {
    /// Build a config from `FERRY_CHUNK_SIZE`, `FERRY_STEP_TIMEOUT_MS` and
    /// `FERRY_MAX_FRAME_SIZE`, falling back to defaults for unset variables.
    ///
    /// A timeout of 0 means no timeout.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let number = |key: &str| parse_number(key, lookup(key));

        let chunk_size = number("FERRY_CHUNK_SIZE")?
            .map(|v| v as usize)
            .unwrap_or(defaults.chunk_size);
        let step_timeout = number("FERRY_STEP_TIMEOUT_MS")?
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis);
        let max_frame_size = number("FERRY_MAX_FRAME_SIZE")?
            .map(|v| v as usize)
            .unwrap_or(defaults.max_frame_size);

        let config = Self {
            chunk_size,
            step_timeout,
            max_frame_size,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(TransferError::Config("chunk size must be positive".into()));
        }
        if self.chunk_size + CHUNK_RECORD_OVERHEAD > self.max_frame_size {
            return Err(TransferError::Config(format!(
                "chunk size {} does not fit in max frame size {}",
                self.chunk_size, self.max_frame_size
            )));
        }
        if self.step_timeout == Some(Duration::ZERO) {
            return Err(TransferError::Config(
                "step timeout must be positive (omit it to wait forever)".into(),
            ));
        }
        Ok(())
    }
}

fn parse_number(key: &str, raw: Option<String>) -> Result<Option<u64>> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| TransferError::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(None),
    }
}
