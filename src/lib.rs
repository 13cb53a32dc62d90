//! # URFT
//!
//! Point-to-point reliable file transfer over UDP: a sliding-window sender
//! with adaptive pacing and retransmission, an in-order reassembly receiver
//! with duplicate suppression, RTT-derived session modes, and an MD5
//! integrity check gating success.
//!
//! The wire protocol is deliberately small:
//!
//! - header announcement: ASCII `name:size[:hexdigest]`, answered by
//!   `HEADER_ACK`
//! - optional `RTT_PROBE` / `RTT_ACK` latency probes
//! - data packets: `seq:u32 | total:u32` (big-endian) followed by up to
//!   1024 payload bytes; every one is acknowledged by a 4-byte ACK
//! - a payloadless packet with `seq == total` terminates the stream
//!
//! ## Quick start
//!
//! ```no_run
//! use urft::{Receiver, TransferConfig, send_file};
//!
//! // Receiver side
//! let receiver = Receiver::bind("0.0.0.0:9000".parse().unwrap(), TransferConfig::default())?;
//! let stats = receiver.run()?;
//! println!("wrote {}", stats.output_path.display());
//!
//! // Sender side
//! send_file(
//!     std::path::Path::new("photo.jpg"),
//!     "192.0.2.10:9000".parse().unwrap(),
//!     &TransferConfig::default(),
//! )?;
//! # Ok::<(), urft::TransferError>(())
//! ```

pub mod config;
pub mod digest;
pub mod mode;
pub mod pacing;
pub mod receiver;
pub mod reliability;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod stats;
pub mod wire;

pub use config::{ConfigError, TransferConfig};
pub use mode::SessionMode;
pub use receiver::{IntegrityError, Receiver};
pub use sender::send_file;
pub use socket::{SocketError, UdpSocket};
pub use stats::{ReceiverStats, SenderStats};
pub use wire::{FileHeader, WireError};

/// Unified error type for a transfer session.
#[derive(Debug)]
pub enum TransferError {
    Socket(SocketError),
    Wire(WireError),
    Config(ConfigError),
    Io(std::io::Error),
    /// Header retries exhausted without a HEADER_ACK.
    HeaderTimeout,
    /// A single sequence number ran out of its retry budget.
    PacketExhausted { seq: u32, retries: u32 },
    /// Wall-clock deadline for the whole transfer exceeded.
    TransferDeadline,
    /// The receiver heard nothing for its whole quiescence window.
    ReceiverTimeout,
    /// Peer reset before enough of the file arrived to finalize.
    PeerReset,
    /// The assembled file failed digest (or size) verification.
    Integrity(IntegrityError),
    /// More chunks than a sequence number can address.
    FileTooLarge { chunks: u64 },
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferError::Socket(e) => write!(f, "socket error: {}", e),
            TransferError::Wire(e) => write!(f, "wire error: {}", e),
            TransferError::Config(e) => write!(f, "config error: {}", e),
            TransferError::Io(e) => write!(f, "IO error: {}", e),
            TransferError::HeaderTimeout => {
                write!(f, "no HEADER_ACK after exhausting header retries")
            }
            TransferError::PacketExhausted { seq, retries } => {
                write!(f, "chunk {} unacknowledged after {} retries", seq, retries)
            }
            TransferError::TransferDeadline => write!(f, "transfer deadline exceeded"),
            TransferError::ReceiverTimeout => write!(f, "receiver timed out waiting for data"),
            TransferError::PeerReset => write!(f, "connection reset by peer"),
            TransferError::Integrity(e) => write!(f, "integrity failure: {}", e),
            TransferError::FileTooLarge { chunks } => {
                write!(f, "file needs {} chunks, beyond the sequence space", chunks)
            }
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Socket(e) => Some(e),
            TransferError::Wire(e) => Some(e),
            TransferError::Config(e) => Some(e),
            TransferError::Io(e) => Some(e),
            TransferError::Integrity(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SocketError> for TransferError {
    fn from(err: SocketError) -> Self {
        TransferError::Socket(err)
    }
}

impl From<WireError> for TransferError {
    fn from(err: WireError) -> Self {
        TransferError::Wire(err)
    }
}

impl From<ConfigError> for TransferError {
    fn from(err: ConfigError) -> Self {
        TransferError::Config(err)
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Io(err)
    }
}
