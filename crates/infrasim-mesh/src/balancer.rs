//! Destination selection and outlier ejection.

use std::collections::HashMap;

use serde::Serialize;

/// Smooth weighted round-robin (the nginx algorithm).
///
/// Each pick adds every candidate's weight to its running score, selects
/// the highest score and subtracts the total weight from it. Over any
/// window of `total` picks each candidate is chosen exactly `weight` times,
/// interleaved rather than in bursts.
#[derive(Debug, Default)]
pub struct SmoothWeighted {
    current: Vec<i64>,
}

impl SmoothWeighted {
    /// Pick an index among `weights`, skipping candidates for which
    /// `eligible` is false. Returns `None` when nothing is eligible.
    pub fn pick(&mut self, weights: &[u32], eligible: impl Fn(usize) -> bool) -> Option<usize> {
        if self.current.len() != weights.len() {
            self.current = vec![0; weights.len()];
        }
        let mut total = 0i64;
        let mut best: Option<usize> = None;
        for (i, weight) in weights.iter().enumerate() {
            if !eligible(i) {
                continue;
            }
            let weight = i64::from(*weight);
            self.current[i] += weight;
            total += weight;
            if best.is_none_or(|b| self.current[i] > self.current[b]) {
                best = Some(i);
            }
        }
        let chosen = best?;
        self.current[chosen] -= total;
        Some(chosen)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutlierState {
    pub consecutive_errors: u32,
    pub ejections: u32,
    /// Ejected until this simulated time.
    pub ejected_until_ms: Option<u64>,
}

/// Per-host consecutive error tracking.
#[derive(Debug, Default)]
pub struct OutlierTracker {
    hosts: HashMap<String, OutlierState>,
}

impl OutlierTracker {
    pub fn is_ejected(&self, host: &str, now_ms: u64) -> bool {
        self.hosts
            .get(host)
            .and_then(|s| s.ejected_until_ms)
            .is_some_and(|until| now_ms < until)
    }

    /// Record a response. Returns true when this response ejected the host.
    /// Ejection time grows linearly with the number of times the host has
    /// been ejected.
    pub fn observe(
        &mut self,
        host: &str,
        server_error: bool,
        threshold: u32,
        base_ejection_ms: u64,
        now_ms: u64,
    ) -> bool {
        let state = self.hosts.entry(host.to_string()).or_default();
        if !server_error {
            state.consecutive_errors = 0;
            return false;
        }
        state.consecutive_errors += 1;
        if threshold == 0 || state.consecutive_errors < threshold {
            return false;
        }
        state.consecutive_errors = 0;
        state.ejections += 1;
        state.ejected_until_ms = Some(now_ms + base_ejection_ms * u64::from(state.ejections));
        true
    }

    pub fn state(&self, host: &str) -> Option<&OutlierState> {
        self.hosts.get(host)
    }

    pub fn clear(&mut self) {
        self.hosts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smooth_wrr_distribution() {
        let mut wrr = SmoothWeighted::default();
        let mut counts = [0; 3];
        for _ in 0..100 {
            counts[wrr.pick(&[50, 30, 20], |_| true).unwrap()] += 1;
        }
        assert_eq!(counts, [50, 30, 20]);
    }

    #[test]
    fn smooth_wrr_interleaves() {
        let mut wrr = SmoothWeighted::default();
        let picks: Vec<usize> = (0..4).map(|_| wrr.pick(&[3, 1], |_| true).unwrap()).collect();
        assert_eq!(picks, vec![0, 0, 1, 0]);
    }

    #[test]
    fn ineligible_candidates_are_skipped() {
        let mut wrr = SmoothWeighted::default();
        for _ in 0..10 {
            assert_eq!(wrr.pick(&[90, 10], |i| i == 1), Some(1));
        }
        assert_eq!(wrr.pick(&[90, 10], |_| false), None);
    }

    #[test]
    fn ejection_after_consecutive_errors() {
        let mut tracker = OutlierTracker::default();
        assert!(!tracker.observe("a", true, 3, 1_000, 0));
        assert!(!tracker.observe("a", true, 3, 1_000, 0));
        assert!(tracker.observe("a", true, 3, 1_000, 0));
        assert!(tracker.is_ejected("a", 999));
        assert!(!tracker.is_ejected("a", 1_000));

        // Second ejection lasts twice as long.
        for _ in 0..3 {
            tracker.observe("a", true, 3, 1_000, 5_000);
        }
        assert!(tracker.is_ejected("a", 6_999));
        assert!(!tracker.is_ejected("a", 7_000));
    }

    #[test]
    fn success_resets_streak() {
        let mut tracker = OutlierTracker::default();
        tracker.observe("a", true, 2, 1_000, 0);
        tracker.observe("a", false, 2, 1_000, 0);
        assert!(!tracker.observe("a", true, 2, 1_000, 0));
        assert_eq!(tracker.state("a").unwrap().consecutive_errors, 1);
    }
}
