//! Simulated clock.
//!
//! Time only moves when someone calls [`SimClock::advance`]. Engines never
//! read the wall clock; TTLs, visibility timeouts, delays, and scan
//! durations are all deadlines compared against this clock when an engine
//! is queried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A cloneable simulated clock with millisecond resolution.
///
/// Clones share the same underlying counter, so the orchestrator can hand
/// one clone to every engine and advance them all at once.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now_ms: Arc<AtomicU64>,
}

impl SimClock {
    /// Create a clock starting at `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Current simulated time in milliseconds.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::Acquire)
    }

    /// Current simulated time in whole seconds.
    #[inline]
    pub fn now_secs(&self) -> u64 {
        self.now_ms() / 1000
    }

    /// Advance by a duration.
    pub fn advance(&self, by: Duration) {
        self.advance_ms(by.as_millis() as u64);
    }

    /// Advance by `ms` milliseconds.
    #[inline]
    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_given_time() {
        let clock = SimClock::new(1_500);
        assert_eq!(clock.now_ms(), 1_500);
        assert_eq!(clock.now_secs(), 1);
    }

    #[test]
    fn advance_moves_forward() {
        let clock = SimClock::new(0);
        clock.advance(Duration::from_secs(2));
        clock.advance_ms(250);
        assert_eq!(clock.now_ms(), 2_250);
    }

    #[test]
    fn clones_share_time() {
        let clock = SimClock::new(0);
        let other = clock.clone();
        clock.advance_ms(10);
        assert_eq!(other.now_ms(), 10);
    }
}
