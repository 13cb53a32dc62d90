// stats.rs - Consolidated transfer statistics types
use std::path::PathBuf;
use std::time::Duration;

use crate::mode::SessionMode;

/// Counters accumulated by one sending session.
#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    /// Fresh data packets put on the wire (excludes retransmissions).
    pub packets_sent: u64,
    /// Timeout-driven retransmissions.
    pub retransmits: u64,
    /// ACKs that removed a packet from the window.
    pub acks_received: u64,
    /// ACKs for sequences no longer (or never) in the window.
    pub stale_acks: u64,
    /// Payload bytes handed to the socket, first transmissions only.
    pub bytes_sent: u64,
    /// Round-trip time measured by the first successful probe, if any.
    pub probe_rtt: Option<Duration>,
    /// Mode the session locked in after probing.
    pub mode: SessionMode,
    pub elapsed: Duration,
}

/// Counters accumulated by one receiving session.
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    /// Data packets that decoded successfully.
    pub packets_received: u64,
    /// Packets suppressed as duplicates (re-ACKed, never rewritten).
    pub duplicates: u64,
    /// Packets dropped for a nonsense sequence or total field.
    pub invalid: u64,
    /// Payload bytes written to the output file.
    pub bytes_written: u64,
    /// High-water mark of the out-of-order buffer.
    pub peak_buffered: usize,
    /// Whether a probe pushed this session into high-RTT operation.
    pub high_rtt: bool,
    /// True when no digest was offered and only the size was checked.
    pub size_only_verified: bool,
    /// True when a peer reset forced best-effort finalization.
    pub finalized_on_reset: bool,
    /// Where the assembled file was written.
    pub output_path: PathBuf,
    pub elapsed: Duration,
}

/// Raw socket-level counters kept by the [`crate::socket::UdpSocket`] wrapper.
#[derive(Debug, Clone, Default)]
pub struct SocketStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}
