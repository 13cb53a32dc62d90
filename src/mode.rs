//! Session modes derived from the measured round-trip time.
//!
//! The sender fixes its mode from the first successful probe and never
//! revisits it; the receiver only ever latches a sticky high-RTT flag. Each
//! mode selects the effective window, base timeout, and termination plan.
use std::time::Duration;

/// RTT above this enters high-RTT operation.
pub const HIGH_RTT_THRESHOLD: Duration = Duration::from_millis(100);
/// RTT above this enters extreme operation (implies high).
pub const EXTREME_RTT_THRESHOLD: Duration = Duration::from_millis(200);

const HIGH_WINDOW_CAP: usize = 128;
const EXTREME_WINDOW_CAP: usize = 192;
const HIGH_TIMEOUT_FLOOR: Duration = Duration::from_millis(500);
const EXTREME_TIMEOUT_FLOOR: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Standard,
    HighRtt,
    ExtremeRtt,
}

impl SessionMode {
    pub fn from_rtt(rtt: Duration) -> Self {
        if rtt > EXTREME_RTT_THRESHOLD {
            SessionMode::ExtremeRtt
        } else if rtt > HIGH_RTT_THRESHOLD {
            SessionMode::HighRtt
        } else {
            SessionMode::Standard
        }
    }

    /// True for both high and extreme operation.
    pub fn is_high(self) -> bool {
        self != SessionMode::Standard
    }

    /// Effective sliding-window size for this mode.
    pub fn effective_window(self, base_window: usize) -> usize {
        match self {
            SessionMode::Standard => base_window,
            SessionMode::HighRtt => (base_window * 4).min(HIGH_WINDOW_CAP),
            SessionMode::ExtremeRtt => (base_window * 6).min(EXTREME_WINDOW_CAP),
        }
    }

    /// Effective base timeout, scaled from the measured RTT with a floor.
    pub fn effective_timeout(self, base_timeout: Duration, rtt: Duration) -> Duration {
        match self {
            SessionMode::Standard => base_timeout,
            SessionMode::HighRtt => (rtt * 2).max(HIGH_TIMEOUT_FLOOR),
            SessionMode::ExtremeRtt => (rtt * 3).max(EXTREME_TIMEOUT_FLOOR),
        }
    }

    /// Knobs for the end-of-stream handshake.
    pub fn termination(self) -> TerminationPlan {
        match self {
            SessionMode::Standard => TerminationPlan {
                repeats: 3,
                emit_delay: Duration::from_millis(10),
                ack_timeout: Duration::from_secs(1),
                settle_delay: Duration::ZERO,
            },
            SessionMode::HighRtt => TerminationPlan {
                repeats: 10,
                emit_delay: Duration::from_millis(20),
                ack_timeout: Duration::from_secs(3),
                settle_delay: Duration::from_millis(100),
            },
            SessionMode::ExtremeRtt => TerminationPlan {
                repeats: 20,
                emit_delay: Duration::from_millis(50),
                ack_timeout: Duration::from_secs(5),
                settle_delay: Duration::from_millis(200),
            },
        }
    }
}

/// How the termination marker (or its ACK) is emitted and awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPlan {
    /// Copies of the marker/ACK emitted per attempt.
    pub repeats: u32,
    /// Spacing between copies within one attempt.
    pub emit_delay: Duration,
    /// How long the sender waits for the matching ACK per attempt.
    pub ack_timeout: Duration,
    /// Pause after a failed attempt before trying again.
    pub settle_delay: Duration,
}
