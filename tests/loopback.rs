//! End-to-end transfers over loopback, clean and impaired.
//!
//! Each test runs a real receiver on its own thread and a real sender on the
//! test thread, then compares the files byte for byte. Impaired cases route
//! the sender through the [`urft::simulator::Relay`].
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::RngCore;
use urft::simulator::{Relay, SimulationConfig};
use urft::{send_file, Receiver, ReceiverStats, SessionMode, TransferConfig, TransferError};

fn test_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("urft_test_{}", name));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Deterministic content; the prime modulus keeps chunk boundaries distinct.
fn patterned_file(dir: &Path, name: &str, size: usize) -> PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    fs::write(&path, &data).unwrap();
    path
}

fn random_file(dir: &Path, name: &str, size: usize) -> PathBuf {
    let path = dir.join(name);
    let mut data = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut data);
    fs::write(&path, data).unwrap();
    path
}

fn spawn_receiver(dir: &Path) -> (SocketAddr, JoinHandle<Result<ReceiverStats, TransferError>>) {
    let config = TransferConfig {
        output_dir: dir.to_path_buf(),
        ..TransferConfig::default()
    };
    let receiver = Receiver::bind("127.0.0.1:0".parse().unwrap(), config).unwrap();
    let addr = receiver.local_addr().unwrap();
    (addr, thread::spawn(move || receiver.run()))
}

fn assert_files_match(input: &Path, output: &Path) {
    let sent = fs::read(input).unwrap();
    let received = fs::read(output).unwrap();
    assert_eq!(sent.len(), received.len(), "file sizes differ");
    assert_eq!(sent, received, "file contents differ");
}

#[test]
fn lossless_one_mib_transfer() {
    let _ = env_logger::try_init();
    let dir = test_dir("lossless");
    let input = random_file(&dir, "payload.bin", 1024 * 1024);

    let (addr, receiver) = spawn_receiver(&dir);
    let stats = send_file(&input, addr, &TransferConfig::default()).unwrap();
    let recv = receiver.join().unwrap().unwrap();

    assert_eq!(stats.packets_sent, 1024);
    assert_eq!(stats.retransmits, 0, "loopback needs no retransmission");
    assert_eq!(stats.mode, SessionMode::Standard);
    assert_eq!(recv.duplicates, 0);
    assert!(!recv.size_only_verified);
    assert_files_match(&input, &recv.output_path);
}

#[test]
fn zero_byte_file_completes_with_handshakes_only() {
    let _ = env_logger::try_init();
    let dir = test_dir("empty");
    let input = patterned_file(&dir, "empty.bin", 0);

    let (addr, receiver) = spawn_receiver(&dir);
    let stats = send_file(&input, addr, &TransferConfig::default()).unwrap();
    let recv = receiver.join().unwrap().unwrap();

    assert_eq!(stats.packets_sent, 0, "no data packets for an empty file");
    assert_eq!(recv.bytes_written, 0);
    assert_files_match(&input, &recv.output_path);
}

#[test]
fn single_byte_file() {
    let _ = env_logger::try_init();
    let dir = test_dir("onebyte");
    let input = patterned_file(&dir, "one.bin", 1);

    let (addr, receiver) = spawn_receiver(&dir);
    let stats = send_file(&input, addr, &TransferConfig::default()).unwrap();
    let recv = receiver.join().unwrap().unwrap();

    assert_eq!(stats.packets_sent, 1);
    assert_eq!(stats.bytes_sent, 1);
    assert_files_match(&input, &recv.output_path);
}

#[test]
fn exact_chunk_multiple_has_no_short_tail() {
    let _ = env_logger::try_init();
    let dir = test_dir("exact");
    let input = patterned_file(&dir, "exact.bin", 4096);

    let (addr, receiver) = spawn_receiver(&dir);
    let stats = send_file(&input, addr, &TransferConfig::default()).unwrap();
    let recv = receiver.join().unwrap().unwrap();

    assert_eq!(stats.packets_sent, 4, "4096 bytes is exactly 4 full chunks");
    assert_files_match(&input, &recv.output_path);
}

#[test]
fn five_percent_loss_at_fifty_ms_rtt_recovers_by_retransmission() {
    let _ = env_logger::try_init();
    let dir = test_dir("loss");
    let input = patterned_file(&dir, "lossy.bin", 256 * 1024);

    let (addr, receiver) = spawn_receiver(&dir);
    // 25ms each way: a 50ms round trip, below the high-RTT threshold.
    let relay = Relay::start(
        addr,
        SimulationConfig {
            loss: 0.05,
            latency: Duration::from_millis(25),
            ..Default::default()
        },
    )
    .unwrap();

    let stats = send_file(&input, relay.local_addr(), &TransferConfig::default()).unwrap();
    let recv = receiver.join().unwrap().unwrap();

    assert_eq!(
        stats.mode,
        SessionMode::Standard,
        "a 50ms round trip must not leave standard mode"
    );
    assert!(stats.retransmits >= 1, "5% loss must force retransmission");
    assert_files_match(&input, &recv.output_path);
}

#[test]
fn reverse_reordering_is_absorbed_by_the_buffer() {
    let _ = env_logger::try_init();
    let dir = test_dir("reorder");
    let input = patterned_file(&dir, "reordered.bin", 128 * 1024);

    let (addr, receiver) = spawn_receiver(&dir);
    let relay = Relay::start(
        addr,
        SimulationConfig {
            reorder_window: 8,
            ..Default::default()
        },
    )
    .unwrap();

    let stats = send_file(&input, relay.local_addr(), &TransferConfig::default()).unwrap();
    let recv = receiver.join().unwrap().unwrap();

    // Each reversed batch of 8 makes the receiver park up to 7 packets
    // before the gap at the front of the batch closes.
    assert!(
        recv.peak_buffered >= 4,
        "reverse batches should pile up out-of-order arrivals, saw {}",
        recv.peak_buffered
    );
    assert!(stats.packets_sent >= 128);
    assert_files_match(&input, &recv.output_path);
}

#[test]
fn duplicated_acks_do_not_derail_the_window() {
    let _ = env_logger::try_init();
    let dir = test_dir("dupack");
    let input = patterned_file(&dir, "dupack.bin", 64 * 1024);

    let (addr, receiver) = spawn_receiver(&dir);
    let relay = Relay::start(
        addr,
        SimulationConfig {
            ack_duplicates: 4,
            ..Default::default()
        },
    )
    .unwrap();

    let stats = send_file(&input, relay.local_addr(), &TransferConfig::default()).unwrap();
    let recv = receiver.join().unwrap().unwrap();

    assert!(stats.stale_acks > 0, "duplicate ACKs should be seen and shrugged off");
    assert_eq!(
        stats.retransmits, 0,
        "duplicate ACKs must not trigger spurious retransmission"
    );
    assert_files_match(&input, &recv.output_path);
}

#[test]
fn added_latency_selects_high_rtt_mode() {
    let _ = env_logger::try_init();
    let dir = test_dir("highrtt");
    let input = patterned_file(&dir, "slow.bin", 32 * 1024);

    let (addr, receiver) = spawn_receiver(&dir);
    let relay = Relay::start(
        addr,
        SimulationConfig {
            latency: Duration::from_millis(55),
            ..Default::default()
        },
    )
    .unwrap();

    let stats = send_file(&input, relay.local_addr(), &TransferConfig::default()).unwrap();
    let recv = receiver.join().unwrap().unwrap();

    assert_eq!(stats.mode, SessionMode::HighRtt);
    assert!(stats.probe_rtt.unwrap() > Duration::from_millis(100));
    assert!(recv.high_rtt, "receiver should have latched its probe flag");
    assert_files_match(&input, &recv.output_path);
}

#[test]
fn extreme_latency_with_loss_selects_extreme_mode() {
    let _ = env_logger::try_init();
    let dir = test_dir("extremertt");
    let input = patterned_file(&dir, "glacial.bin", 32 * 1024);

    let (addr, receiver) = spawn_receiver(&dir);
    // 125ms each way: a 250ms round trip, past the extreme threshold.
    let relay = Relay::start(
        addr,
        SimulationConfig {
            latency: Duration::from_millis(125),
            loss: 0.10,
            ..Default::default()
        },
    )
    .unwrap();

    // Extra probe attempts keep the mode assertion stable under 10% loss.
    let config = TransferConfig {
        probe_attempts: 5,
        ..TransferConfig::default()
    };
    let stats = send_file(&input, relay.local_addr(), &config).unwrap();
    let recv = receiver.join().unwrap().unwrap();

    assert_eq!(stats.mode, SessionMode::ExtremeRtt);
    assert!(stats.probe_rtt.unwrap() > Duration::from_millis(200));
    assert!(recv.high_rtt, "receiver should have latched its probe flag");
    assert_files_match(&input, &recv.output_path);
}
