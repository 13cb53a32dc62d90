//! Datagram socket wrapper: blocking-with-timeout I/O, enlarged OS buffers,
//! and per-socket statistics.
use std::io::{Error as IoError, ErrorKind};
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::stats::SocketStats;
use crate::wire::MAX_DATAGRAM;

/// Errors that can occur during socket operations.
#[derive(Debug)]
pub enum SocketError {
    Io(IoError),
    /// The current read timeout elapsed with nothing to receive.
    TimedOut,
    /// The peer's stack reported a hard reset (platform-specific).
    ConnectionReset,
}

impl std::fmt::Display for SocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketError::Io(e) => write!(f, "IO error: {}", e),
            SocketError::TimedOut => write!(f, "receive timed out"),
            SocketError::ConnectionReset => write!(f, "connection reset by peer"),
        }
    }
}

impl std::error::Error for SocketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SocketError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for SocketError {
    fn from(err: IoError) -> Self {
        match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => SocketError::TimedOut,
            ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused => {
                SocketError::ConnectionReset
            }
            _ => SocketError::Io(err),
        }
    }
}

/// UDP socket with a datagram-sized receive buffer and send/receive counters.
pub struct UdpSocket {
    socket: StdUdpSocket,
    recv_buffer: Vec<u8>,
    stats: SocketStats,
}

impl UdpSocket {
    /// Bind to `addr`, requesting `buffer_size` bytes for each OS buffer.
    /// The request is best effort: a stack that refuses it only costs a
    /// warning, not the session.
    pub fn bind(addr: SocketAddr, buffer_size: usize) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let raw = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        if let Err(e) = raw.set_recv_buffer_size(buffer_size) {
            log::warn!("could not raise receive buffer to {} bytes: {}", buffer_size, e);
        }
        if let Err(e) = raw.set_send_buffer_size(buffer_size) {
            log::warn!("could not raise send buffer to {} bytes: {}", buffer_size, e);
        }
        raw.bind(&addr.into())?;

        Ok(Self {
            socket: raw.into(),
            recv_buffer: vec![0u8; MAX_DATAGRAM],
            stats: SocketStats::default(),
        })
    }

    /// Returns the local address this socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.socket.local_addr()?)
    }

    /// Sends one datagram to a specific address.
    pub fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> Result<usize, SocketError> {
        let sent = self.socket.send_to(data, addr)?;
        self.stats.bytes_sent += sent as u64;
        self.stats.packets_sent += 1;
        Ok(sent)
    }

    /// Receives one datagram, blocking up to the current read timeout.
    pub fn recv_from(&mut self) -> Result<(&[u8], SocketAddr), SocketError> {
        match self.socket.recv_from(&mut self.recv_buffer) {
            Ok((len, addr)) => {
                self.stats.bytes_received += len as u64;
                self.stats.packets_received += 1;
                Ok((&self.recv_buffer[..len], addr))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Bounds how long the next receives may block. Must be nonzero.
    pub fn set_read_timeout(&self, dur: Duration) -> Result<(), SocketError> {
        self.socket.set_read_timeout(Some(dur))?;
        Ok(())
    }

    /// Returns socket statistics.
    pub fn stats(&self) -> &SocketStats {
        &self.stats
    }
}
