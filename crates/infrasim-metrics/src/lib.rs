//! infrasim-metrics — observability for simulated components.
//!
//! Every engine owns one [`MetricsAccumulator`]. Operations are recorded
//! as they execute; snapshots (throughput, latency percentiles, hit rate,
//! error rate) are derived lazily when a caller asks for them.
//!
//! # Architecture
//!
//! ```text
//! MetricsAccumulator
//!   ├── record() / record_hit() / record_miss() / record_bytes()
//!   ├── snapshot(now_ms) → MetricsSnapshot   (pure, idempotent)
//!   └── reset(now_ms)                        (zeroes counters only)
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for scraping
//! ```

pub mod accumulator;
pub mod prometheus;

pub use accumulator::{
    compute_percentiles, CommandStat, ComponentSnapshot, MetricsAccumulator, MetricsSnapshot,
    DEFAULT_LATENCY_CAPACITY,
};
pub use prometheus::render_prometheus;
