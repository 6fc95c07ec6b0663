//! Per-service traffic counters.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceCounters {
    pub request_count: u64,
    pub error_count: u64,
    pub total_latency_ms: f64,
}

impl ServiceCounters {
    pub fn record(&mut self, latency_ms: f64, is_error: bool) {
        self.request_count += 1;
        self.total_latency_ms += latency_ms;
        if is_error {
            self.error_count += 1;
        }
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.total_latency_ms / self.request_count as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub name: String,
    pub namespace: String,
    pub pod_count: u32,
    pub healthy_pod_count: u32,
    pub request_count: u64,
    pub error_count: u64,
    pub average_latency_ms: f64,
    /// Error share (0.0–1.0) of the requests served.
    pub error_rate: f64,
    /// True while outlier detection keeps the service out of rotation.
    pub ejected: bool,
}

/// Totals across every service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshStats {
    pub total_requests: u64,
    pub total_errors: u64,
    /// Mean latency in milliseconds, 0 when no requests were recorded.
    pub average_latency: f64,
    pub services: Vec<ServiceStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_of_nothing_is_zero() {
        assert_eq!(ServiceCounters::default().average_latency_ms(), 0.0);
    }

    #[test]
    fn record_accumulates() {
        let mut c = ServiceCounters::default();
        c.record(10.0, false);
        c.record(20.0, true);
        assert_eq!(c.request_count, 2);
        assert_eq!(c.error_count, 1);
        assert_eq!(c.average_latency_ms(), 15.0);
    }
}
