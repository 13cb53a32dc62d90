//! Network impairment relay for tests.
//!
//! A relay thread sits between the two endpoints and forwards datagrams with
//! configurable loss, added latency, ACK duplication, and a reverse-release
//! reorder buffer. It is test tooling only; sessions never depend on it.
use std::collections::BinaryHeap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::wire::MAX_DATAGRAM;

/// Impairments applied by the relay. Defaults to a transparent pipe.
#[derive(Debug, Clone, Copy)]
pub struct SimulationConfig {
    /// Independent drop probability per datagram, both directions.
    pub loss: f64,
    /// Added one-way latency in each direction.
    pub latency: Duration,
    /// Extra copies of every upstream-to-client datagram (ACK duplication).
    pub ack_duplicates: u32,
    /// Hold this many client-to-upstream datagrams and release them in
    /// reverse. Zero disables reordering. Releases bypass `latency`.
    pub reorder_window: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            loss: 0.0,
            latency: Duration::ZERO,
            ack_duplicates: 0,
            reorder_window: 0,
        }
    }
}

/// A running relay. The first non-upstream peer to send through it is
/// adopted as the client for the rest of its life.
pub struct Relay {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Relay {
    pub fn start(upstream: SocketAddr, config: SimulationConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        socket.set_read_timeout(Some(Duration::from_millis(2)))?;
        let local_addr = socket.local_addr()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = thread::spawn(move || relay_loop(socket, upstream, config, flag));

        Ok(Self {
            local_addr,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Address endpoints should talk to instead of the real peer.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Delayed {
    due: Instant,
    dest: SocketAddr,
    datagram: Vec<u8>,
}

// BinaryHeap is a max-heap; reverse the ordering to pop the earliest due.
impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}
impl Eq for Delayed {}
impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.due.cmp(&self.due)
    }
}

fn relay_loop(
    socket: UdpSocket,
    upstream: SocketAddr,
    config: SimulationConfig,
    shutdown: Arc<AtomicBool>,
) {
    let mut client: Option<SocketAddr> = None;
    let mut delayed: BinaryHeap<Delayed> = BinaryHeap::new();
    let mut reorder_batch: Vec<Vec<u8>> = Vec::new();
    let mut last_buffered = Instant::now();
    let mut buf = [0u8; MAX_DATAGRAM];

    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        while delayed.peek().is_some_and(|d| d.due <= now) {
            if let Some(d) = delayed.pop() {
                let _ = socket.send_to(&d.datagram, d.dest);
            }
        }

        // A stalled partial batch would deadlock a window-limited sender;
        // release it after a quiet period.
        if !reorder_batch.is_empty() && last_buffered.elapsed() > Duration::from_millis(100) {
            release_reversed(&socket, upstream, &mut reorder_batch);
        }

        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(_) => continue,
        };
        let datagram = buf[..len].to_vec();

        if src == upstream {
            let Some(dest) = client else { continue };
            if rand::random::<f64>() < config.loss {
                continue;
            }
            let due = Instant::now() + config.latency;
            for _ in 0..=config.ack_duplicates {
                delayed.push(Delayed {
                    due,
                    dest,
                    datagram: datagram.clone(),
                });
            }
        } else {
            client = Some(src);
            if rand::random::<f64>() < config.loss {
                continue;
            }
            if config.reorder_window > 0 {
                reorder_batch.push(datagram);
                last_buffered = Instant::now();
                if reorder_batch.len() >= config.reorder_window {
                    release_reversed(&socket, upstream, &mut reorder_batch);
                }
            } else {
                delayed.push(Delayed {
                    due: Instant::now() + config.latency,
                    dest: upstream,
                    datagram,
                });
            }
        }
    }
}

fn release_reversed(socket: &UdpSocket, upstream: SocketAddr, batch: &mut Vec<Vec<u8>>) {
    while let Some(datagram) = batch.pop() {
        let _ = socket.send_to(&datagram, upstream);
    }
}
