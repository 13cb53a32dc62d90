//! Deadline-driven pacing policy.
//!
//! Burst caps and per-packet retry timeouts are pure functions of the session
//! mode, how far into the wall-clock budget the transfer is, and how much of
//! the file has been acknowledged. Keeping them table-driven and socket-free
//! makes the whole policy directly unit-testable.
use std::time::Duration;

use crate::mode::SessionMode;

/// Where the transfer stands relative to its wall-clock budget.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    elapsed_pct: f64,
    progress_pct: f64,
}

impl Progress {
    pub fn new(elapsed: Duration, deadline: Duration, acked: u32, total: u32) -> Self {
        let elapsed_pct = if deadline.is_zero() {
            100.0
        } else {
            100.0 * elapsed.as_secs_f64() / deadline.as_secs_f64()
        };
        let progress_pct = if total == 0 {
            100.0
        } else {
            100.0 * f64::from(acked) / f64::from(total)
        };
        Self {
            elapsed_pct,
            progress_pct,
        }
    }

    pub fn remaining_pct(&self) -> f64 {
        100.0 - self.elapsed_pct
    }

    pub fn progress_pct(&self) -> f64 {
        self.progress_pct
    }

    /// How far behind schedule the transfer is, in percentage points.
    pub fn deficit(&self) -> f64 {
        self.elapsed_pct - self.progress_pct
    }
}

/// Maximum number of fresh packets to emit in one iteration.
///
/// Tiers escalate as the deadline closes in or progress falls behind it;
/// extreme-RTT sessions double the tier (twice, once the budget is half
/// spent) to keep long pipes full.
pub fn burst_cap(mode: SessionMode, progress: &Progress) -> usize {
    let remaining = progress.remaining_pct();
    let deficit = progress.deficit();
    let high = mode.is_high();

    let mut cap = if remaining < 20.0 && progress.progress_pct() > 75.0 {
        if high {
            192
        } else {
            128
        }
    } else if deficit > 15.0 || remaining < 30.0 {
        if high {
            96
        } else {
            64
        }
    } else if deficit > 10.0 || remaining < 50.0 {
        if high {
            48
        } else {
            32
        }
    } else if deficit > 5.0 || remaining < 70.0 {
        if high {
            24
        } else {
            16
        }
    } else if high {
        12
    } else {
        8
    };

    if mode == SessionMode::ExtremeRtt {
        cap *= 2;
        if remaining < 50.0 {
            cap *= 2;
        }
    }
    cap
}

/// Retry timeout for an in-flight packet at the given retry count.
///
/// The per-mode backoff ladders grow from the effective base timeout, then
/// the deadline policy compresses the result (strongest match first) so late
/// transfers retransmit aggressively.
pub fn retry_timeout(
    mode: SessionMode,
    base_timeout: Duration,
    effective_timeout: Duration,
    retries: u32,
    progress: &Progress,
) -> Duration {
    let backoff = match mode {
        SessionMode::ExtremeRtt => match retries {
            0 => effective_timeout,
            1..=3 => effective_timeout.mul_f64(1.1f64.powi(retries as i32)),
            _ => effective_timeout.mul_f64(1.2f64.powi(retries.saturating_sub(3).min(3) as i32)),
        },
        SessionMode::HighRtt => match retries {
            0 => effective_timeout,
            1..=3 => effective_timeout.mul_f64(1.2f64.powi(retries as i32)),
            _ => effective_timeout.mul_f64(1.5f64.powi(retries.saturating_sub(3).min(3) as i32)),
        },
        SessionMode::Standard => match retries {
            0..=1 => base_timeout.mul_f64(0.8),
            2..=3 => base_timeout,
            _ => base_timeout.mul_f64(1.05f64.powi(retries.saturating_sub(3) as i32)),
        },
    };

    let remaining = progress.remaining_pct();
    if remaining < 20.0 && progress.progress_pct() > 75.0 {
        base_timeout.mul_f64(0.1)
    } else if remaining < 25.0 {
        base_timeout.mul_f64(0.15)
    } else if remaining < 50.0 {
        base_timeout.mul_f64(0.2).max(backoff.mul_f64(0.4))
    } else {
        backoff
    }
}
