//! Receiver half of a transfer.
//!
//! Binds the well-known endpoint, answers the header handshake and RTT
//! probes, reassembles the stream in order while acknowledging every data
//! packet, and verifies the result against the announced digest (or size,
//! when no digest was offered).
use log::{debug, info, warn};
use std::fs::{self, File};
use std::net::SocketAddr;
use std::path::Path;
use std::thread;
use std::time::Instant;

use crate::config::TransferConfig;
use crate::digest;
use crate::mode::SessionMode;
use crate::reliability::{Accepted, Reassembler};
use crate::socket::{SocketError, UdpSocket};
use crate::stats::ReceiverStats;
use crate::wire::{self, FileHeader};
use crate::TransferError;

/// Upper bound on a believable chunk count; anything larger is treated as a
/// corrupt field and replaced by the size-derived expectation.
const MAX_REASONABLE_PACKETS: u32 = 100_000;

/// Integrity verdicts that fail a completed session. The partial or
/// mismatched file is left on disk for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    DigestMismatch { expected: String, actual: String },
    SizeMismatch { expected: u64, actual: u64 },
}

impl std::fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityError::DigestMismatch { expected, actual } => {
                write!(f, "digest mismatch: expected {}, computed {}", expected, actual)
            }
            IntegrityError::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch: expected {} bytes, wrote {}", expected, actual)
            }
        }
    }
}

impl std::error::Error for IntegrityError {}

/// One-shot transfer receiver bound to a local UDP endpoint.
pub struct Receiver {
    socket: UdpSocket,
    config: TransferConfig,
    high_rtt: bool,
}

/// One received datagram during the header wait, reduced to owned data.
enum HeaderEvent {
    Probe(SocketAddr),
    Header(FileHeader, SocketAddr),
    Junk,
    Timeout,
}

/// One received datagram while streaming, reduced to owned data.
enum StreamEvent {
    Probe(SocketAddr),
    Packet { seq: u32, total: u32, payload: Vec<u8> },
    Junk,
    Timeout,
    Reset,
}

impl Receiver {
    pub fn bind(addr: SocketAddr, config: TransferConfig) -> Result<Self, TransferError> {
        config.validate()?;
        let socket = UdpSocket::bind(addr, config.socket_buffer)?;
        Ok(Self {
            socket,
            config,
            high_rtt: false,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.socket.local_addr()
    }

    /// Serve exactly one transfer to completion and verify it.
    pub fn run(mut self) -> Result<ReceiverStats, TransferError> {
        let start = Instant::now();
        let mut stats = ReceiverStats::default();

        info!("listening on {}", self.local_addr()?);
        let (header, client) = self.await_header()?;
        info!(
            "receiving {:?} ({} bytes) from {}",
            header.name(),
            header.size(),
            client
        );

        let output_path = self
            .config
            .output_dir
            .join(format!("received_{}", header.name()));
        let file = File::create(&output_path)?;
        stats.output_path = output_path.clone();

        self.stream(&header, client, file, &mut stats)?;

        stats.high_rtt = self.high_rtt;
        self.verify(&header, &output_path, &mut stats)?;
        stats.elapsed = start.elapsed();

        let rate = stats.bytes_written as f64
            / (1024.0 * 1024.0)
            / stats.elapsed.as_secs_f64().max(1e-6);
        info!(
            "wrote {} ({} bytes in {:.2}s, {:.2} MiB/s)",
            output_path.display(),
            stats.bytes_written,
            stats.elapsed.as_secs_f64(),
            rate
        );
        Ok(stats)
    }

    /// Wait for the transfer announcement, echoing any RTT probes.
    fn await_header(&mut self) -> Result<(FileHeader, SocketAddr), TransferError> {
        self.socket.set_read_timeout(self.config.poll_timeout)?;
        let mut last_activity = Instant::now();

        loop {
            if last_activity.elapsed() > self.config.quiescence_timeout {
                return Err(TransferError::ReceiverTimeout);
            }

            let event = match self.socket.recv_from() {
                Ok((data, addr)) => {
                    if data == wire::RTT_PROBE {
                        HeaderEvent::Probe(addr)
                    } else {
                        match FileHeader::decode(data) {
                            Ok(header) => HeaderEvent::Header(header, addr),
                            Err(_) => HeaderEvent::Junk,
                        }
                    }
                }
                Err(SocketError::TimedOut) | Err(SocketError::ConnectionReset) => {
                    HeaderEvent::Timeout
                }
                Err(e) => return Err(e.into()),
            };

            match event {
                HeaderEvent::Probe(addr) => {
                    self.answer_probe(addr)?;
                    last_activity = Instant::now();
                }
                HeaderEvent::Header(header, addr) => {
                    self.socket.send_to(wire::HEADER_ACK, addr)?;
                    return Ok((header, addr));
                }
                HeaderEvent::Junk => {
                    debug!("ignoring datagram that is not a header");
                    last_activity = Instant::now();
                }
                HeaderEvent::Timeout => {}
            }
        }
    }

    /// Receive data packets until the termination marker (or a peer reset
    /// late enough to finalize anyway).
    fn stream(
        &mut self,
        header: &FileHeader,
        client: SocketAddr,
        mut file: File,
        stats: &mut ReceiverStats,
    ) -> Result<(), TransferError> {
        let expected_total = header.total_chunks();
        let mut reasm: Option<Reassembler> = None;
        let mut last_activity = Instant::now();
        let mut last_logged_pct = 0.0;
        self.socket.set_read_timeout(self.config.poll_timeout)?;

        loop {
            let quiescence = if self.high_rtt {
                self.config.quiescence_timeout * 2
            } else {
                self.config.quiescence_timeout
            };
            if last_activity.elapsed() > quiescence {
                return Err(TransferError::ReceiverTimeout);
            }

            let event = match self.socket.recv_from() {
                Ok((data, addr)) => {
                    if data == wire::RTT_PROBE {
                        StreamEvent::Probe(addr)
                    } else {
                        match wire::decode_data(data) {
                            Ok(packet) => StreamEvent::Packet {
                                seq: packet.seq,
                                total: packet.total,
                                payload: packet.payload.to_vec(),
                            },
                            Err(_) => StreamEvent::Junk,
                        }
                    }
                }
                Err(SocketError::TimedOut) => StreamEvent::Timeout,
                Err(SocketError::ConnectionReset) => StreamEvent::Reset,
                Err(e) => return Err(e.into()),
            };

            match event {
                StreamEvent::Timeout => continue,
                StreamEvent::Reset => {
                    if let Some(r) = &reasm {
                        if reset_completes(r.expected(), r.total()) {
                            warn!(
                                "peer reset with {}/{} chunks received; finalizing best-effort",
                                r.expected(),
                                r.total()
                            );
                            stats.finalized_on_reset = true;
                            break;
                        }
                    }
                    return Err(TransferError::PeerReset);
                }
                StreamEvent::Junk => {
                    debug!("dropping malformed datagram");
                    last_activity = Instant::now();
                }
                StreamEvent::Probe(addr) => {
                    self.answer_probe(addr)?;
                    last_activity = Instant::now();
                }
                StreamEvent::Packet { seq, total, payload } => {
                    last_activity = Instant::now();
                    stats.packets_received += 1;

                    let total = match sanitize_total(total, expected_total) {
                        Some(total) => total,
                        None => {
                            warn!("dropping packet with unusable total field");
                            stats.invalid += 1;
                            continue;
                        }
                    };

                    let r = reasm.get_or_insert_with(|| {
                        let bound = bind_total(total, expected_total);
                        info!("expecting {} chunks", bound);
                        Reassembler::new(bound)
                    });

                    if seq == r.total() && total == r.total() {
                        info!("termination marker received; acknowledging");
                        let session_total = r.total();
                        self.send_termination_acks(client, session_total)?;
                        break;
                    }
                    if seq >= r.total() {
                        warn!("dropping invalid sequence {} (total {})", seq, r.total());
                        stats.invalid += 1;
                        continue;
                    }

                    match r.accept(seq, &payload, &mut file)? {
                        Accepted::Delivered { .. } => {
                            let pct =
                                100.0 * f64::from(r.expected()) / f64::from(r.total().max(1));
                            if pct - last_logged_pct >= 5.0 {
                                info!("progress {:.1}% ({} buffered)", pct, r.buffered());
                                last_logged_pct = pct;
                            }
                        }
                        Accepted::Buffered => {}
                        Accepted::Duplicate => stats.duplicates += 1,
                        Accepted::OutOfRange => {
                            stats.invalid += 1;
                            continue;
                        }
                    }
                    self.socket.send_to(&wire::encode_ack(seq), client)?;
                }
            }
        }

        if let Some(r) = &reasm {
            stats.peak_buffered = r.peak_buffered();
        }
        file.sync_all()?;
        Ok(())
    }

    fn answer_probe(&mut self, addr: SocketAddr) -> Result<(), SocketError> {
        self.socket.send_to(wire::RTT_ACK, addr)?;
        if !self.high_rtt {
            info!("RTT probe observed; widening timeouts");
            self.high_rtt = true;
        }
        Ok(())
    }

    /// Burst the termination ACK; the counterpart of the sender's marker
    /// burst, sized by the receiver's own mode.
    fn send_termination_acks(&mut self, client: SocketAddr, total: u32) -> Result<(), SocketError> {
        let mode = if self.high_rtt {
            SessionMode::HighRtt
        } else {
            SessionMode::Standard
        };
        let plan = mode.termination();
        let ack = wire::encode_ack(total);
        for _ in 0..plan.repeats {
            self.socket.send_to(&ack, client)?;
            thread::sleep(plan.emit_delay);
        }
        Ok(())
    }

    fn verify(
        &self,
        header: &FileHeader,
        path: &Path,
        stats: &mut ReceiverStats,
    ) -> Result<(), TransferError> {
        let written = fs::metadata(path)?.len();
        stats.bytes_written = written;

        match header.digest() {
            Some(expected) => {
                let actual = digest::file_md5(path)?;
                if actual.eq_ignore_ascii_case(expected) {
                    info!("digest verified ({})", actual);
                    Ok(())
                } else {
                    warn!("digest mismatch: expected {}, computed {}", expected, actual);
                    Err(TransferError::Integrity(IntegrityError::DigestMismatch {
                        expected: expected.to_string(),
                        actual,
                    }))
                }
            }
            None => {
                stats.size_only_verified = true;
                if written == header.size() {
                    info!("size verified ({} bytes, no digest offered)", written);
                    Ok(())
                } else {
                    Err(TransferError::Integrity(IntegrityError::SizeMismatch {
                        expected: header.size(),
                        actual: written,
                    }))
                }
            }
        }
    }
}

/// Replace or reject a nonsense total field. `expected` is the chunk count
/// derived from the announced file size; zero is legitimate only when the
/// announced size is also zero (the whole session is just a termination).
fn sanitize_total(field: u32, expected: u64) -> Option<u32> {
    let suspicious = field > MAX_REASONABLE_PACKETS || (field == 0 && expected != 0);
    if !suspicious {
        return Some(field);
    }
    if expected > 0 && expected < u64::from(MAX_REASONABLE_PACKETS) {
        warn!("replacing invalid packet total {} with size-derived {}", field, expected);
        Some(expected as u32)
    } else {
        None
    }
}

/// Decide the session's chunk count from the first sanitized total field.
/// A field that strays more than 50% from the size-derived expectation loses
/// to the expectation.
fn bind_total(field: u32, expected: u64) -> u32 {
    if expected > 0 && expected < u64::from(MAX_REASONABLE_PACKETS) {
        let expected = expected as u32;
        if u64::from(field.abs_diff(expected)) * 2 > u64::from(expected) {
            warn!(
                "packet total {} diverges from size-derived {}; trusting the size",
                field, expected
            );
            return expected;
        }
    }
    field
}

/// A peer reset counts as completion once at least 90% of the chunks are in.
fn reset_completes(expected_seq: u32, total: u32) -> bool {
    total > 0 && u64::from(expected_seq) * 10 >= u64::from(total) * 9
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sanitize_total_passes_reasonable_values() {
        assert_eq!(sanitize_total(1, 1), Some(1));
        assert_eq!(sanitize_total(1024, 1024), Some(1024));
        assert_eq!(sanitize_total(100_000, 1024), Some(100_000));
    }

    #[test]
    fn test_sanitize_total_replaces_with_expectation() {
        assert_eq!(sanitize_total(0, 1024), Some(1024));
        assert_eq!(sanitize_total(100_001, 1024), Some(1024));
        assert_eq!(sanitize_total(u32::MAX, 7), Some(7));
    }

    #[test]
    fn test_sanitize_total_drops_when_no_expectation_helps() {
        // Zero-size header: nothing to substitute.
        assert_eq!(sanitize_total(100_001, 0), None);
        // Expectation itself is unusable.
        assert_eq!(sanitize_total(0, 200_000), None);
    }

    #[test]
    fn test_sanitize_total_zero_byte_session() {
        // total == 0 with a zero-size announcement is the true chunk count,
        // so the {0, 0} termination marker can end an empty transfer.
        assert_eq!(sanitize_total(0, 0), Some(0));
    }

    #[test]
    fn test_bind_total_prefers_expectation_on_divergence() {
        assert_eq!(bind_total(1024, 1024), 1024);
        // Within 50% of the expectation: the field wins.
        assert_eq!(bind_total(1100, 1024), 1100);
        assert_eq!(bind_total(700, 1024), 700);
        // Outside 50%: the size-derived count wins.
        assert_eq!(bind_total(50, 1024), 1024);
        assert_eq!(bind_total(4000, 1024), 1024);
    }

    #[test]
    fn test_bind_total_without_usable_expectation() {
        assert_eq!(bind_total(42, 0), 42);
        assert_eq!(bind_total(42, 500_000), 42);
    }

    #[test]
    fn test_reset_completes_at_ninety_percent() {
        assert!(!reset_completes(0, 100));
        assert!(!reset_completes(89, 100));
        assert!(reset_completes(90, 100));
        assert!(reset_completes(100, 100));
        assert!(!reset_completes(0, 0), "empty session never reset-completes");
    }

    #[test]
    fn test_verify_digest_and_size_paths() {
        let dir = std::env::temp_dir();
        let path = dir.join("urft_verify_test.bin");
        let data = b"the quick brown fox";
        File::create(&path).unwrap().write_all(data).unwrap();

        let config = TransferConfig {
            output_dir: dir.clone(),
            ..Default::default()
        };
        let receiver = Receiver::bind("127.0.0.1:0".parse().unwrap(), config).unwrap();

        let good = FileHeader::new(
            "f".into(),
            data.len() as u64,
            Some(crate::digest::md5_hex(data)),
        )
        .unwrap();
        let mut stats = ReceiverStats::default();
        assert!(receiver.verify(&good, &path, &mut stats).is_ok());
        assert!(!stats.size_only_verified);

        let bad_digest = FileHeader::new(
            "f".into(),
            data.len() as u64,
            Some("00000000000000000000000000000000".into()),
        )
        .unwrap();
        assert!(matches!(
            receiver.verify(&bad_digest, &path, &mut stats),
            Err(TransferError::Integrity(IntegrityError::DigestMismatch { .. }))
        ));

        let size_only = FileHeader::new("f".into(), data.len() as u64, None).unwrap();
        let mut stats = ReceiverStats::default();
        assert!(receiver.verify(&size_only, &path, &mut stats).is_ok());
        assert!(stats.size_only_verified);

        let wrong_size = FileHeader::new("f".into(), 1, None).unwrap();
        assert!(matches!(
            receiver.verify(&wrong_size, &path, &mut stats),
            Err(TransferError::Integrity(IntegrityError::SizeMismatch { .. }))
        ));

        let _ = fs::remove_file(&path);
    }
}
