//! Sender half of a transfer.
//!
//! Drives the session through its states: header synchronization, RTT
//! probing, windowed streaming under the pacing policy, and the termination
//! handshake. All state lives on this one thread; the only suspension points
//! are timed receives and the termination pacing sleeps.
use log::{debug, info, warn};
use std::fs::File;
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::TransferConfig;
use crate::digest;
use crate::mode::SessionMode;
use crate::pacing::{self, Progress};
use crate::reliability::SendWindow;
use crate::socket::{SocketError, UdpSocket};
use crate::stats::SenderStats;
use crate::wire::{self, FileHeader, WireError};
use crate::TransferError;

/// Transfer one file to the receiver listening at `server`.
pub fn send_file(
    path: &Path,
    server: SocketAddr,
    config: &TransferConfig,
) -> Result<SenderStats, TransferError> {
    config.validate()?;
    let start = Instant::now();

    let size = std::fs::metadata(path)?.len();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TransferError::Wire(WireError::InvalidName(path.display().to_string())))?;

    info!("hashing {} ({} bytes)", path.display(), size);
    let file_digest = digest::file_md5(path)?;
    let header = FileHeader::new(name.to_string(), size, Some(file_digest))?;

    let total_chunks = size.div_ceil(config.chunk_size as u64);
    let total = u32::try_from(total_chunks)
        .map_err(|_| TransferError::FileTooLarge { chunks: total_chunks })?;

    let socket = UdpSocket::bind(unspecified_for(server), config.socket_buffer)?;
    let mut stats = SenderStats::default();
    let mut session = Session {
        socket,
        server,
        config,
        start,
        mode: SessionMode::Standard,
        effective_window: config.window,
        effective_timeout: config.base_timeout,
    };

    session.sync_header(&header)?;
    let rtt = session.probe_rtt()?;
    session.adopt_mode(rtt);
    stats.probe_rtt = rtt;
    stats.mode = session.mode;

    let mut window = SendWindow::new(total);
    let mut chunks = ChunkReader::new(File::open(path)?, config.chunk_size);
    debug!("file split into {} chunks", total);

    session.stream(&mut window, &mut chunks, &mut stats)?;
    session.terminate(total)?;

    stats.elapsed = start.elapsed();
    info!(
        "sent {} bytes in {:.2}s ({} packets, {} retransmits)",
        size,
        stats.elapsed.as_secs_f64(),
        stats.packets_sent,
        stats.retransmits
    );
    Ok(stats)
}

/// Everything a running send session needs besides the window itself.
struct Session<'a> {
    socket: UdpSocket,
    server: SocketAddr,
    config: &'a TransferConfig,
    start: Instant,
    mode: SessionMode,
    effective_window: usize,
    effective_timeout: Duration,
}

/// What one timed receive produced, reduced to owned data.
enum Event {
    Ack(u32),
    Junk,
    Timeout,
    Reset,
}

impl Session<'_> {
    /// Announce the transfer and wait for the receiver's HEADER_ACK.
    fn sync_header(&mut self, header: &FileHeader) -> Result<(), TransferError> {
        let encoded = header.encode();
        self.socket.set_read_timeout(self.config.base_timeout)?;

        for attempt in 1..=self.config.max_retries {
            self.socket.send_to(&encoded, self.server)?;
            match self.socket.recv_from() {
                Ok((data, _)) if data == wire::HEADER_ACK => return Ok(()),
                Ok(_) => debug!("unexpected datagram during header sync"),
                Err(SocketError::TimedOut) => {
                    debug!("header timeout, retry {}/{}", attempt, self.config.max_retries)
                }
                Err(SocketError::ConnectionReset) => {
                    debug!("reset during header sync, retry {}", attempt)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(TransferError::HeaderTimeout)
    }

    /// Measure the round trip. Only the first successful probe counts.
    fn probe_rtt(&mut self) -> Result<Option<Duration>, TransferError> {
        self.socket.set_read_timeout(self.config.probe_timeout)?;
        for _ in 0..self.config.probe_attempts {
            let sent = Instant::now();
            self.socket.send_to(wire::RTT_PROBE, self.server)?;
            match self.socket.recv_from() {
                Ok((data, _)) if data == wire::RTT_ACK => return Ok(Some(sent.elapsed())),
                Ok(_) => debug!("unexpected datagram during RTT probe"),
                Err(SocketError::TimedOut) => {}
                Err(SocketError::ConnectionReset) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Fix the session mode and derived knobs. Immutable from here on.
    fn adopt_mode(&mut self, rtt: Option<Duration>) {
        let measured = rtt.unwrap_or(Duration::ZERO);
        self.mode = SessionMode::from_rtt(measured);
        self.effective_window = self.mode.effective_window(self.config.window);
        self.effective_timeout = self
            .mode
            .effective_timeout(self.config.base_timeout, measured);
        match rtt {
            Some(rtt) => info!(
                "measured RTT {:?}: {:?} mode, window {}, timeout {:?}",
                rtt, self.mode, self.effective_window, self.effective_timeout
            ),
            None => info!("no probe answered; staying in standard mode"),
        }
    }

    /// Sliding-window streaming until every chunk is acknowledged.
    fn stream(
        &mut self,
        window: &mut SendWindow,
        chunks: &mut ChunkReader,
        stats: &mut SenderStats,
    ) -> Result<(), TransferError> {
        if window.is_complete() {
            return Ok(()); // empty file: nothing but the termination exchange
        }
        self.socket.set_read_timeout(self.effective_timeout)?;
        let mut last_logged_pct = 0.0;

        while !window.is_complete() {
            let elapsed = self.start.elapsed();
            if elapsed > self.config.max_transfer_time {
                return Err(TransferError::TransferDeadline);
            }
            let progress = Progress::new(
                elapsed,
                self.config.max_transfer_time,
                window.base(),
                window.total(),
            );

            let burst = pacing::burst_cap(self.mode, &progress);
            let mut sent = 0;
            while sent < burst && self.send_fresh(window, chunks, stats)? {
                sent += 1;
            }

            let event = match self.socket.recv_from() {
                Ok((data, _)) => match wire::decode_ack(data) {
                    Ok(seq) => Event::Ack(seq),
                    Err(_) => Event::Junk,
                },
                Err(SocketError::TimedOut) => Event::Timeout,
                Err(SocketError::ConnectionReset) => Event::Reset,
                Err(e) => return Err(e.into()),
            };

            match event {
                Event::Ack(seq) => {
                    if window.on_ack(seq) {
                        stats.acks_received += 1;

                        let pct = 100.0 * f64::from(window.base()) / f64::from(window.total());
                        if pct - last_logged_pct >= 10.0 {
                            info!("progress {:.1}% ({} in flight)", pct, window.in_flight());
                            last_logged_pct = pct;
                        }

                        // Near the deadline, each ACK may pull a few extra
                        // packets forward while the window sits half empty.
                        if progress.remaining_pct() < 40.0
                            && window.in_flight() < self.effective_window / 2
                        {
                            for _ in 0..3 {
                                if !self.send_fresh(window, chunks, stats)? {
                                    break;
                                }
                            }
                        }
                    } else {
                        stats.stale_acks += 1;
                        debug!("stale ack {}", seq);
                    }
                }
                Event::Junk => debug!("ignoring undecodable ack datagram"),
                Event::Timeout => self.retransmit_due(window, &progress, stats)?,
                Event::Reset => warn!("peer reported reset; relying on retransmission"),
            }
        }
        Ok(())
    }

    /// Emit one fresh packet if the window and the file allow it.
    fn send_fresh(
        &mut self,
        window: &mut SendWindow,
        chunks: &mut ChunkReader,
        stats: &mut SenderStats,
    ) -> Result<bool, TransferError> {
        if !window.can_send(self.effective_window) {
            return Ok(false);
        }
        let Some(chunk) = chunks.next_chunk()? else {
            return Ok(false);
        };
        let datagram = wire::encode_data(window.next(), window.total(), &chunk);
        self.socket.send_to(&datagram, self.server)?;
        stats.packets_sent += 1;
        stats.bytes_sent += chunk.len() as u64;
        window.record_sent(datagram, Instant::now());
        Ok(true)
    }

    /// Resend every packet whose dynamic timeout has elapsed.
    fn retransmit_due(
        &mut self,
        window: &mut SendWindow,
        progress: &Progress,
        stats: &mut SenderStats,
    ) -> Result<(), TransferError> {
        let now = Instant::now();
        let (mode, base, effective) = (self.mode, self.config.base_timeout, self.effective_timeout);
        let due = window.due_for_retry(now, |_, retries| {
            pacing::retry_timeout(mode, base, effective, retries, progress)
        });

        for seq in due {
            if let Some(entry) = window.entry(seq) {
                if entry.retries >= self.config.max_retries {
                    return Err(TransferError::PacketExhausted {
                        seq,
                        retries: entry.retries,
                    });
                }
                self.socket.send_to(&entry.datagram, self.server)?;
            }
            let retries = window.mark_retransmitted(seq, now);
            stats.retransmits += 1;
            if retries <= 1 || retries % 5 == 0 {
                debug!("timeout: resent chunk {} (retry {})", seq, retries);
            }
        }
        Ok(())
    }

    /// Repeatedly emit the termination marker until its ACK comes back.
    fn terminate(&mut self, total: u32) -> Result<(), TransferError> {
        let plan = self.mode.termination();
        let marker = wire::encode_data(total, total, &[]);
        self.socket.set_read_timeout(plan.ack_timeout)?;
        info!("streaming done; sending termination marker");

        for _ in 0..self.config.max_retries {
            if self.start.elapsed() > self.config.max_transfer_time {
                return Err(TransferError::TransferDeadline);
            }
            for _ in 0..plan.repeats {
                self.socket.send_to(&marker, self.server)?;
                thread::sleep(plan.emit_delay);
            }

            let ack = match self.socket.recv_from() {
                Ok((data, _)) => wire::decode_ack(data).ok(),
                Err(SocketError::TimedOut) => {
                    if !plan.settle_delay.is_zero() {
                        thread::sleep(plan.settle_delay);
                    }
                    None
                }
                Err(SocketError::ConnectionReset) => None,
                Err(e) => return Err(e.into()),
            };
            if ack == Some(total) {
                info!("termination acknowledged");
                return Ok(());
            }
        }
        Err(TransferError::PacketExhausted {
            seq: total,
            retries: self.config.max_retries,
        })
    }
}

/// Sequential reader yielding chunks of at most `chunk_size` bytes.
/// Chunk bytes live on in the window entries, so the file is read only once.
struct ChunkReader {
    file: File,
    chunk_size: usize,
}

impl ChunkReader {
    fn new(file: File, chunk_size: usize) -> Self {
        Self { file, chunk_size }
    }

    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            let n = self.file.read(&mut chunk[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        chunk.truncate(filled);
        Ok(Some(chunk))
    }
}

fn unspecified_for(peer: SocketAddr) -> SocketAddr {
    match peer {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        File::create(&path).unwrap().write_all(data).unwrap();
        path
    }

    #[test]
    fn test_chunk_reader_partial_tail() {
        let data: Vec<u8> = (0..2049u32).map(|i| (i % 251) as u8).collect();
        let path = temp_file("urft_chunks_tail.bin", &data);

        let mut reader = ChunkReader::new(File::open(&path).unwrap(), 1024);
        let sizes: Vec<usize> = std::iter::from_fn(|| reader.next_chunk().unwrap())
            .map(|c| c.len())
            .collect();
        assert_eq!(sizes, vec![1024, 1024, 1]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_chunk_reader_exact_multiple() {
        let path = temp_file("urft_chunks_exact.bin", &vec![7u8; 2048]);

        let mut reader = ChunkReader::new(File::open(&path).unwrap(), 1024);
        assert_eq!(reader.next_chunk().unwrap().unwrap().len(), 1024);
        assert_eq!(reader.next_chunk().unwrap().unwrap().len(), 1024);
        assert!(reader.next_chunk().unwrap().is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_chunk_reader_empty_file() {
        let path = temp_file("urft_chunks_empty.bin", &[]);
        let mut reader = ChunkReader::new(File::open(&path).unwrap(), 1024);
        assert!(reader.next_chunk().unwrap().is_none());
        let _ = std::fs::remove_file(&path);
    }
}
