//! Vulnerability scans.
//!
//! A scan is recorded once, when requested, with its own queue and run
//! durations. Its status is derived from the clock on every read, so a scan
//! needs no timer to finish: `pending` until the queue delay elapses,
//! `running` for the scan duration, then `completed` or `error`.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VulnerabilityCounts {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl VulnerabilityCounts {
    /// Counts for an artifact, derived from its digest so the same image
    /// always scans the same way.
    pub fn for_digest(digest: &str) -> Self {
        let hash = Sha256::digest(digest.as_bytes());
        Self {
            critical: u32::from(hash[0] % 3),
            high: u32::from(hash[1] % 6),
            medium: u32::from(hash[2] % 12),
            low: u32::from(hash[3] % 20),
        }
    }

    pub fn total(&self) -> u32 {
        self.critical + self.high + self.medium + self.low
    }

    /// Highest severity with at least one finding.
    pub fn severity(&self) -> Severity {
        if self.critical > 0 {
            Severity::Critical
        } else if self.high > 0 {
            Severity::High
        } else if self.medium > 0 {
            Severity::Medium
        } else if self.low > 0 {
            Severity::Low
        } else {
            Severity::None
        }
    }

    pub fn add(&mut self, other: &Self) {
        self.critical += other.critical;
        self.high += other.high;
        self.medium += other.medium;
        self.low += other.low;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ScanStatus {
    pub fn in_progress(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// One requested scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub requested_at_ms: u64,
    pub queued_ms: u64,
    pub duration_ms: u64,
    /// Findings, reported once the scan completes.
    pub counts: VulnerabilityCounts,
    /// Set when the scan is bound to fail; surfaced once it stops running.
    pub failure: Option<String>,
    /// Whether the finished scan has been logged.
    #[serde(skip)]
    pub(crate) announced: bool,
}

impl ScanRecord {
    pub fn new(now_ms: u64, queued_ms: u64, duration_ms: u64, digest: &str) -> Self {
        Self {
            requested_at_ms: now_ms,
            queued_ms,
            duration_ms,
            counts: VulnerabilityCounts::for_digest(digest),
            failure: None,
            announced: false,
        }
    }

    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    pub fn started_at_ms(&self) -> u64 {
        self.requested_at_ms + self.queued_ms
    }

    pub fn finished_at_ms(&self) -> u64 {
        self.started_at_ms() + self.duration_ms
    }

    pub fn status(&self, now_ms: u64) -> ScanStatus {
        if now_ms < self.started_at_ms() {
            ScanStatus::Pending
        } else if now_ms < self.finished_at_ms() {
            ScanStatus::Running
        } else if self.failure.is_some() {
            ScanStatus::Error
        } else {
            ScanStatus::Completed
        }
    }

    pub fn report(&self, now_ms: u64) -> ScanReport {
        let status = self.status(now_ms);
        let counts = (status == ScanStatus::Completed).then_some(self.counts);
        ScanReport {
            status,
            severity: counts.map(|c| c.severity()),
            counts,
            requested_at_ms: self.requested_at_ms,
            finished_at_ms: (!status.in_progress()).then(|| self.finished_at_ms()),
            error: (status == ScanStatus::Error).then(|| self.failure.clone()).flatten(),
        }
    }
}

/// Point-in-time view of a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub status: ScanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts: Option<VulnerabilityCounts>,
    pub requested_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_the_clock() {
        let scan = ScanRecord::new(1_000, 2_000, 10_000, "sha256:abc");
        assert_eq!(scan.status(1_000), ScanStatus::Pending);
        assert_eq!(scan.status(2_999), ScanStatus::Pending);
        assert_eq!(scan.status(3_000), ScanStatus::Running);
        assert_eq!(scan.status(12_999), ScanStatus::Running);
        assert_eq!(scan.status(13_000), ScanStatus::Completed);
    }

    #[test]
    fn failing_scan_ends_in_error() {
        let scan = ScanRecord::new(0, 0, 5, "sha256:abc").failing("too large");
        assert_eq!(scan.status(4), ScanStatus::Running);
        let report = scan.report(5);
        assert_eq!(report.status, ScanStatus::Error);
        assert_eq!(report.error.as_deref(), Some("too large"));
        assert!(report.counts.is_none());
    }

    #[test]
    fn counts_are_deterministic() {
        let a = VulnerabilityCounts::for_digest("sha256:1234");
        assert_eq!(a, VulnerabilityCounts::for_digest("sha256:1234"));
        assert!(a.critical < 3 && a.high < 6 && a.medium < 12 && a.low < 20);
    }

    #[test]
    fn severity_is_highest_bucket() {
        let counts = VulnerabilityCounts {
            critical: 0,
            high: 0,
            medium: 2,
            low: 7,
        };
        assert_eq!(counts.severity(), Severity::Medium);
        assert_eq!(VulnerabilityCounts::default().severity(), Severity::None);
        assert!(Severity::Critical > Severity::High);
    }

    #[test]
    fn report_hides_counts_until_completed() {
        let scan = ScanRecord::new(0, 10, 10, "sha256:abc");
        assert!(scan.report(15).counts.is_none());
        let done = scan.report(20);
        assert_eq!(done.counts, Some(scan.counts));
        assert_eq!(done.finished_at_ms, Some(20));
    }
}
