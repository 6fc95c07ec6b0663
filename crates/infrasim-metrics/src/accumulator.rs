//! Metrics accumulator: per-engine counters and latency samples.
//!
//! Counters are monotonic between resets. Latency samples live in a
//! bounded ring so memory stays flat no matter how long a simulation runs;
//! percentiles are computed over whatever the ring currently holds.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default number of latency samples retained for percentile computation.
pub const DEFAULT_LATENCY_CAPACITY: usize = 1024;

/// Per-operation counters.
#[derive(Debug, Clone, Default, PartialEq)]
struct OpCounter {
    calls: u64,
    errors: u64,
    total_latency_us: u64,
}

/// Monotonic counters plus a bounded latency buffer for one engine.
#[derive(Debug, Clone)]
pub struct MetricsAccumulator {
    /// Simulated time (ms) at which the current window started.
    window_started_ms: u64,
    /// Operation name → counters.
    ops: BTreeMap<String, OpCounter>,
    total_ops: u64,
    errors: u64,
    hits: u64,
    misses: u64,
    bytes_in: u64,
    bytes_out: u64,
    total_latency_us: u64,
    /// Latency samples (microseconds), oldest first.
    latencies: VecDeque<u64>,
    latency_capacity: usize,
}

impl MetricsAccumulator {
    /// Create an accumulator whose window starts at `now_ms`.
    pub fn new(now_ms: u64) -> Self {
        Self::with_capacity(now_ms, DEFAULT_LATENCY_CAPACITY)
    }

    /// Create an accumulator retaining at most `capacity` latency samples.
    pub fn with_capacity(now_ms: u64, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window_started_ms: now_ms,
            ops: BTreeMap::new(),
            total_ops: 0,
            errors: 0,
            hits: 0,
            misses: 0,
            bytes_in: 0,
            bytes_out: 0,
            total_latency_us: 0,
            latencies: VecDeque::with_capacity(capacity),
            latency_capacity: capacity,
        }
    }

    /// Record one executed operation.
    pub fn record(&mut self, op: &str, latency_us: u64, ok: bool) {
        let counter = self.ops.entry(op.to_ascii_lowercase()).or_default();
        counter.calls += 1;
        counter.total_latency_us += latency_us;
        if !ok {
            counter.errors += 1;
            self.errors += 1;
        }
        self.total_ops += 1;
        self.total_latency_us += latency_us;

        if self.latencies.len() == self.latency_capacity {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency_us);
    }

    /// Record a keyspace (or cache) hit.
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    /// Record a keyspace (or cache) miss.
    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    /// Record network traffic attributed to one operation.
    pub fn record_bytes(&mut self, bytes_in: u64, bytes_out: u64) {
        self.bytes_in += bytes_in;
        self.bytes_out += bytes_out;
    }

    /// Total operations recorded since the last reset.
    pub fn total_ops(&self) -> u64 {
        self.total_ops
    }

    /// Hits and misses since the last reset.
    pub fn hits_and_misses(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Derive a point-in-time snapshot. Does not mutate anything.
    pub fn snapshot(&self, now_ms: u64) -> MetricsSnapshot {
        let elapsed_ms = now_ms.saturating_sub(self.window_started_ms);
        // A window shorter than one second reports ops-per-second as if it
        // were a full second.
        let window_secs = (elapsed_ms as f64 / 1000.0).max(1.0);
        let throughput = self.total_ops as f64 / window_secs;

        let error_rate = if self.total_ops > 0 {
            self.errors as f64 / self.total_ops as f64
        } else {
            0.0
        };

        let lookups = self.hits + self.misses;
        let hit_rate = if lookups > 0 {
            self.hits as f64 / lookups as f64
        } else {
            0.0
        };

        let avg_latency_ms = if self.total_ops > 0 {
            self.total_latency_us as f64 / self.total_ops as f64 / 1000.0
        } else {
            0.0
        };

        let samples: Vec<u64> = self.latencies.iter().copied().collect();
        let (latency_p50_ms, latency_p99_ms) = compute_percentiles(&samples);

        let command_stats = self
            .ops
            .iter()
            .map(|(name, c)| CommandStat {
                command: name.clone(),
                calls: c.calls,
                errors: c.errors,
                total_usec: c.total_latency_us,
                usec_per_call: if c.calls > 0 {
                    c.total_latency_us as f64 / c.calls as f64
                } else {
                    0.0
                },
            })
            .collect();

        MetricsSnapshot {
            window_secs: elapsed_ms as f64 / 1000.0,
            total_ops: self.total_ops,
            throughput,
            latency_p50_ms,
            latency_p99_ms,
            avg_latency_ms,
            error_count: self.errors,
            error_rate,
            hit_count: self.hits,
            miss_count: self.misses,
            hit_rate,
            network_bytes_in: self.bytes_in,
            network_bytes_out: self.bytes_out,
            command_stats,
        }
    }

    /// Zero every counter and start a new window at `now_ms`.
    pub fn reset(&mut self, now_ms: u64) {
        let capacity = self.latency_capacity;
        *self = Self::with_capacity(now_ms, capacity);
        debug!(now_ms, "metrics accumulator reset");
    }
}

/// Per-command statistics, mirroring Redis `INFO commandstats`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandStat {
    pub command: String,
    pub calls: u64,
    pub errors: u64,
    pub total_usec: u64,
    pub usec_per_call: f64,
}

/// Point-in-time metrics derived from an accumulator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    /// Simulated seconds since the window started.
    pub window_secs: f64,
    pub total_ops: u64,
    /// Operations per simulated second.
    pub throughput: f64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    pub avg_latency_ms: f64,
    pub error_count: u64,
    /// Error rate (0.0–1.0).
    pub error_rate: f64,
    pub hit_count: u64,
    pub miss_count: u64,
    /// hits / (hits + misses), 0.0 when there were no lookups.
    pub hit_rate: f64,
    pub network_bytes_in: u64,
    pub network_bytes_out: u64,
    pub command_stats: Vec<CommandStat>,
}

impl MetricsSnapshot {
    /// Look up the statistics for one command (case-insensitive).
    pub fn command(&self, name: &str) -> Option<&CommandStat> {
        let name = name.to_ascii_lowercase();
        self.command_stats.iter().find(|c| c.command == name)
    }
}

/// A snapshot labelled with the component it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentSnapshot {
    pub component_id: String,
    pub kind: String,
    pub snapshot: MetricsSnapshot,
}

/// Compute P50 and P99 latency from unsorted samples in microseconds.
///
/// Returns (p50_ms, p99_ms). If empty, returns (0.0, 0.0).
pub fn compute_percentiles(latencies: &[u64]) -> (f64, f64) {
    if latencies.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();

    let p50_idx = (sorted.len() as f64 * 0.50) as usize;
    let p99_idx = (sorted.len() as f64 * 0.99) as usize;

    let p50 = sorted[p50_idx.min(sorted.len() - 1)] as f64 / 1000.0;
    let p99 = sorted[p99_idx.min(sorted.len() - 1)] as f64 / 1000.0;

    (p50, p99)
}
