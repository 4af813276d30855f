//! # Urgency Clock
//!
//! Monotonic millisecond clock driving every timer in the reliability layer:
//! ack deadlines, resend-request backoff, and the flusher's decision to emit
//! an otherwise-empty packet.
//!
//! The clock is a trait so timer behavior is deterministic under test. The
//! production implementation anchors a `quanta::Instant` epoch at
//! construction.

use quanta::Instant;
use std::sync::atomic::{AtomicU64, Ordering};

/// Milliseconds on the urgency clock.
pub type Millis = u64;

/// Monotonic millisecond clock.
pub trait UrgencyClock: Send + Sync {
    /// Milliseconds elapsed since the clock's epoch.
    fn now_ms(&self) -> Millis;
}

// ─── Production Clock ───────────────────────────────────────────────────────

/// Epoch-anchored monotonic clock.
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl UrgencyClock for MonotonicClock {
    fn now_ms(&self) -> Millis {
        self.epoch.elapsed().as_millis() as Millis
    }
}

// ─── Manual Clock ───────────────────────────────────────────────────────────

/// Clock advanced explicitly by the caller. Safe to share across threads;
/// used by tests and simulations to script timer scenarios.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the clock at a given instant.
    pub fn at(ms: Millis) -> Self {
        ManualClock {
            now: AtomicU64::new(ms),
        }
    }

    /// Advance the clock by `ms` milliseconds.
    pub fn advance(&self, ms: Millis) {
        self.now.fetch_add(ms, Ordering::Release);
    }

    /// Jump the clock to an absolute instant.
    pub fn set(&self, ms: Millis) {
        self.now.store(ms, Ordering::Release);
    }
}

impl UrgencyClock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.load(Ordering::Acquire)
    }
}
