//! Reliable-delivery cores: the sender's sliding window and the receiver's
//! in-order reassembler with duplicate suppression.
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// A packet in flight: its encoded bytes, when it last hit the wire, and how
/// many times it has been retransmitted.
#[derive(Debug)]
pub struct WindowEntry {
    pub datagram: Vec<u8>,
    pub last_send: Instant,
    pub retries: u32,
}

/// Sliding window over chunk sequence numbers.
///
/// Invariants: `base <= next <= total`; every in-flight entry has a sequence
/// number in `base..next`; `base` is the smallest unacknowledged sequence.
#[derive(Debug)]
pub struct SendWindow {
    entries: HashMap<u32, WindowEntry>,
    base: u32,
    next: u32,
    total: u32,
}

impl SendWindow {
    pub fn new(total: u32) -> Self {
        Self {
            entries: HashMap::new(),
            base: 0,
            next: 0,
            total,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn next(&self) -> u32 {
        self.next
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn in_flight(&self) -> usize {
        self.entries.len()
    }

    /// All chunks acknowledged.
    pub fn is_complete(&self) -> bool {
        self.base == self.total
    }

    /// Room for a fresh packet under the given window limit.
    pub fn can_send(&self, window_limit: usize) -> bool {
        self.entries.len() < window_limit && self.next < self.total
    }

    /// Track a freshly sent packet and advance `next`. Returns its sequence.
    pub fn record_sent(&mut self, datagram: Vec<u8>, now: Instant) -> u32 {
        let seq = self.next;
        self.entries.insert(
            seq,
            WindowEntry {
                datagram,
                last_send: now,
                retries: 0,
            },
        );
        self.next += 1;
        seq
    }

    /// Process an acknowledgment. Returns false for stale or duplicate ACKs,
    /// which leave the window untouched.
    pub fn on_ack(&mut self, seq: u32) -> bool {
        if self.entries.remove(&seq).is_none() {
            return false;
        }
        while self.base < self.next && !self.entries.contains_key(&self.base) {
            self.base += 1;
        }
        true
    }

    pub fn entry(&self, seq: u32) -> Option<&WindowEntry> {
        self.entries.get(&seq)
    }

    /// Sequence numbers whose retry timeout has elapsed, per the supplied
    /// policy (a function of sequence and current retry count).
    pub fn due_for_retry(
        &self,
        now: Instant,
        mut timeout_for: impl FnMut(u32, u32) -> Duration,
    ) -> SmallVec<[u32; 8]> {
        let mut due: SmallVec<[u32; 8]> = SmallVec::new();
        for (&seq, entry) in &self.entries {
            if now.duration_since(entry.last_send) > timeout_for(seq, entry.retries) {
                due.push(seq);
            }
        }
        due
    }

    /// Bump the retry counter after a retransmission. Returns the new count.
    pub fn mark_retransmitted(&mut self, seq: u32, now: Instant) -> u32 {
        match self.entries.get_mut(&seq) {
            Some(entry) => {
                entry.last_send = now;
                entry.retries += 1;
                entry.retries
            }
            None => 0,
        }
    }
}

/// Outcome of offering one data packet to the reassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// Written in order; `drained` buffered successors followed it out.
    Delivered { drained: usize },
    /// Ahead of the watermark; parked until the gap fills.
    Buffered,
    /// Already written or already parked. Re-acknowledge, never rewrite.
    Duplicate,
    /// Sequence number at or beyond the declared total.
    OutOfRange,
}

/// In-order reassembly with duplicate suppression.
///
/// Everything below the `expected` watermark has been written exactly once;
/// the buffer holds only out-of-order arrivals above it, so the watermark
/// plus the buffered keys stand in for an unbounded delivered-set.
#[derive(Debug)]
pub struct Reassembler {
    expected: u32,
    total: u32,
    buffer: BTreeMap<u32, Vec<u8>>,
    peak_buffered: usize,
}

impl Reassembler {
    pub fn new(total: u32) -> Self {
        Self {
            expected: 0,
            total,
            buffer: BTreeMap::new(),
            peak_buffered: 0,
        }
    }

    /// Next sequence number the output file is waiting on.
    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// High-water mark of the out-of-order buffer.
    pub fn peak_buffered(&self) -> usize {
        self.peak_buffered
    }

    pub fn is_complete(&self) -> bool {
        self.expected == self.total
    }

    fn is_delivered(&self, seq: u32) -> bool {
        seq < self.expected || self.buffer.contains_key(&seq)
    }

    /// Offer a data packet. In-order payloads are written to `out`
    /// immediately, followed by any buffered packets they unblock.
    pub fn accept<W: Write>(
        &mut self,
        seq: u32,
        payload: &[u8],
        out: &mut W,
    ) -> io::Result<Accepted> {
        if seq >= self.total {
            return Ok(Accepted::OutOfRange);
        }
        if self.is_delivered(seq) {
            return Ok(Accepted::Duplicate);
        }

        if seq > self.expected {
            self.buffer.insert(seq, payload.to_vec());
            self.peak_buffered = self.peak_buffered.max(self.buffer.len());
            return Ok(Accepted::Buffered);
        }

        out.write_all(payload)?;
        self.expected += 1;

        let mut drained = 0;
        while let Some(parked) = self.buffer.remove(&self.expected) {
            out.write_all(&parked)?;
            self.expected += 1;
            drained += 1;
        }
        Ok(Accepted::Delivered { drained })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(len: usize) -> Vec<u8> {
        vec![0u8; len]
    }

    #[test]
    fn test_window_fills_and_advances() {
        let now = Instant::now();
        let mut window = SendWindow::new(4);

        assert!(window.can_send(32));
        for seq in 0..4 {
            assert_eq!(window.record_sent(datagram(8), now), seq);
        }
        assert!(!window.can_send(32), "no chunks left to send");
        assert_eq!(window.in_flight(), 4);

        assert!(window.on_ack(0));
        assert_eq!(window.base(), 1);
        assert!(window.on_ack(1));
        assert_eq!(window.base(), 2);
        assert!(window.on_ack(3));
        // Base stalls on the still-unacked sequence 2.
        assert_eq!(window.base(), 2);
        assert!(window.on_ack(2));
        assert_eq!(window.base(), 4);
        assert!(window.is_complete());
    }

    #[test]
    fn test_window_respects_limit() {
        let now = Instant::now();
        let mut window = SendWindow::new(100);
        for _ in 0..32 {
            window.record_sent(datagram(8), now);
        }
        assert!(!window.can_send(32));
        window.on_ack(0);
        assert!(window.can_send(32));
    }

    #[test]
    fn test_duplicate_acks_are_inert() {
        let now = Instant::now();
        let mut window = SendWindow::new(3);
        for _ in 0..3 {
            window.record_sent(datagram(8), now);
        }

        assert!(window.on_ack(1));
        for _ in 0..5 {
            assert!(!window.on_ack(1), "replayed ACK must not change state");
        }
        assert_eq!(window.base(), 0);
        assert_eq!(window.in_flight(), 2);

        // ACKs for sequences never sent are equally inert.
        assert!(!window.on_ack(99));
        assert_eq!(window.base(), 0);
    }

    #[test]
    fn test_base_never_outruns_next() {
        let now = Instant::now();
        let mut window = SendWindow::new(10);
        window.record_sent(datagram(8), now);
        window.record_sent(datagram(8), now);

        window.on_ack(0);
        window.on_ack(1);
        assert_eq!(window.base(), 2);
        assert_eq!(window.next(), 2);
        assert!(!window.is_complete(), "8 chunks remain unsent");
    }

    #[test]
    fn test_due_for_retry_selects_only_overdue() {
        let now = Instant::now();
        let mut window = SendWindow::new(3);
        for _ in 0..3 {
            window.record_sent(datagram(8), now);
        }
        window.mark_retransmitted(1, now + Duration::from_millis(500));

        let later = now + Duration::from_millis(300);
        let due = window.due_for_retry(later, |_, _| Duration::from_millis(200));
        let mut due: Vec<u32> = due.into_vec();
        due.sort_unstable();
        assert_eq!(due, vec![0, 2], "freshly resent packet 1 is not due");

        assert_eq!(window.mark_retransmitted(0, later), 1);
        assert_eq!(window.mark_retransmitted(0, later), 2);
    }

    #[test]
    fn test_reassembler_in_order() {
        let mut out = Vec::new();
        let mut reasm = Reassembler::new(3);

        assert_eq!(
            reasm.accept(0, b"aa", &mut out).unwrap(),
            Accepted::Delivered { drained: 0 }
        );
        assert_eq!(
            reasm.accept(1, b"bb", &mut out).unwrap(),
            Accepted::Delivered { drained: 0 }
        );
        assert_eq!(
            reasm.accept(2, b"cc", &mut out).unwrap(),
            Accepted::Delivered { drained: 0 }
        );
        assert_eq!(out, b"aabbcc");
        assert!(reasm.is_complete());
    }

    #[test]
    fn test_reassembler_reorders_and_drains() {
        let mut out = Vec::new();
        let mut reasm = Reassembler::new(4);

        assert_eq!(reasm.accept(3, b"dd", &mut out).unwrap(), Accepted::Buffered);
        assert_eq!(reasm.accept(1, b"bb", &mut out).unwrap(), Accepted::Buffered);
        assert_eq!(reasm.accept(2, b"cc", &mut out).unwrap(), Accepted::Buffered);
        assert!(out.is_empty(), "nothing written while the gap is open");
        assert_eq!(reasm.buffered(), 3);

        assert_eq!(
            reasm.accept(0, b"aa", &mut out).unwrap(),
            Accepted::Delivered { drained: 3 }
        );
        assert_eq!(out, b"aabbccdd");
        assert_eq!(reasm.buffered(), 0);
        assert_eq!(reasm.peak_buffered(), 3);
        assert!(reasm.is_complete());
    }

    #[test]
    fn test_reassembler_suppresses_duplicates() {
        let mut out = Vec::new();
        let mut reasm = Reassembler::new(3);

        reasm.accept(0, b"aa", &mut out).unwrap();
        assert_eq!(reasm.accept(0, b"XX", &mut out).unwrap(), Accepted::Duplicate);

        reasm.accept(2, b"cc", &mut out).unwrap();
        assert_eq!(
            reasm.accept(2, b"YY", &mut out).unwrap(),
            Accepted::Duplicate,
            "buffered packets are deduplicated too"
        );

        reasm.accept(1, b"bb", &mut out).unwrap();
        assert_eq!(out, b"aabbcc", "no payload written twice");
    }

    #[test]
    fn test_reassembler_rejects_out_of_range() {
        let mut out = Vec::new();
        let mut reasm = Reassembler::new(3);

        assert_eq!(reasm.accept(3, b"zz", &mut out).unwrap(), Accepted::OutOfRange);
        assert_eq!(reasm.accept(900, b"zz", &mut out).unwrap(), Accepted::OutOfRange);
        assert!(out.is_empty());
    }

    #[test]
    fn test_reassembler_replay_any_order_is_idempotent() {
        // Deliver every packet three times in a scrambled order; the output
        // must come out identical to a single in-order pass.
        let payloads: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 16]).collect();
        let mut out = Vec::new();
        let mut reasm = Reassembler::new(8);

        let order = [5usize, 2, 7, 0, 3, 6, 1, 4];
        for round in 0..3 {
            for &i in &order {
                let rotated = order[(i + round) % order.len()];
                reasm
                    .accept(rotated as u32, &payloads[rotated], &mut out)
                    .unwrap();
            }
        }

        let expected: Vec<u8> = payloads.concat();
        assert_eq!(out, expected);
        assert!(reasm.is_complete());
    }

    #[test]
    fn test_reassembler_monotone_watermark() {
        let mut out = Vec::new();
        let mut reasm = Reassembler::new(5);
        let mut last = reasm.expected();

        for seq in [4u32, 0, 2, 1, 2, 0, 3] {
            reasm.accept(seq, b"x", &mut out).unwrap();
            assert!(reasm.expected() >= last);
            last = reasm.expected();
        }
        assert_eq!(reasm.expected(), 5);
    }
}
