//! Transfer tuning knobs gathered into one immutable record.
//!
//! Every constant that shapes a session (chunking, windowing, timeouts,
//! retry caps, deadlines) lives here so endpoints share a single source of
//! truth and tests can tighten or redirect behavior without global state.
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{CHUNK_SIZE, DATA_HEADER_SIZE, MAX_DATAGRAM};

/// Configuration errors detected before a session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroChunkSize,
    ChunkExceedsDatagram { chunk: usize, datagram: usize },
    ZeroWindow,
    ZeroRetries,
    ZeroTimeout,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ZeroChunkSize => write!(f, "chunk size must be nonzero"),
            ConfigError::ChunkExceedsDatagram { chunk, datagram } => write!(
                f,
                "chunk of {} bytes plus header does not fit a {} byte datagram",
                chunk, datagram
            ),
            ConfigError::ZeroWindow => write!(f, "window must admit at least one packet"),
            ConfigError::ZeroRetries => write!(f, "retry budget must be nonzero"),
            ConfigError::ZeroTimeout => write!(f, "timeouts must be nonzero"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Immutable per-session tuning. Construct once, pass by reference.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Payload bytes per data packet.
    pub chunk_size: usize,
    /// Largest datagram either endpoint will send or accept.
    pub max_datagram: usize,
    /// Base retransmission timeout before RTT adaptation.
    pub base_timeout: Duration,
    /// Base sliding-window size before RTT adaptation.
    pub window: usize,
    /// Per-packet (and per-handshake) retry budget.
    pub max_retries: u32,
    /// Wall-clock deadline for the whole transfer on the sender.
    pub max_transfer_time: Duration,
    /// Receiver gives up after this long without hearing a datagram
    /// (doubled once a high-RTT probe has been seen).
    pub quiescence_timeout: Duration,
    /// Receiver socket poll interval while watching for quiescence.
    pub poll_timeout: Duration,
    /// Requested OS send/receive buffer size; best effort.
    pub socket_buffer: usize,
    /// Number of RTT probes issued before settling on a session mode.
    pub probe_attempts: u32,
    /// How long each RTT probe waits for its echo.
    pub probe_timeout: Duration,
    /// Directory the receiver writes `received_<name>` into.
    pub output_dir: PathBuf,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_datagram: MAX_DATAGRAM,
            base_timeout: Duration::from_millis(200),
            window: 32,
            max_retries: 25,
            max_transfer_time: Duration::from_secs(120),
            quiescence_timeout: Duration::from_secs(120),
            poll_timeout: Duration::from_millis(500),
            socket_buffer: 256 * 1024,
            probe_attempts: 3,
            probe_timeout: Duration::from_secs(1),
            output_dir: PathBuf::from("."),
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.chunk_size + DATA_HEADER_SIZE > self.max_datagram {
            return Err(ConfigError::ChunkExceedsDatagram {
                chunk: self.chunk_size,
                datagram: self.max_datagram,
            });
        }
        if self.window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if self.base_timeout.is_zero()
            || self.probe_timeout.is_zero()
            || self.poll_timeout.is_zero()
            || self.quiescence_timeout.is_zero()
            || self.max_transfer_time.is_zero()
        {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}
