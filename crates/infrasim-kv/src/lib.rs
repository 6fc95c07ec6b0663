//! infrasim-kv — a Redis-like key-value engine.
//!
//! Reproduces the observable behavior of a single Redis node closely
//! enough to drive an operational dashboard:
//!
//! - typed values (string, hash, list, set, sorted set, stream)
//! - lazy TTL expiry on every read, plus an active sweep on `tick()`
//! - `maxmemory` enforcement with all eight eviction policies
//! - keyspace hit/miss accounting
//! - pub/sub with exact and glob-pattern subscriptions
//! - a bounded slowlog fed by a deterministic per-command cost model
//!
//! # Architecture
//!
//! ```text
//! KvEngine (RoutingEngine)
//!   ├── execute_as(client, cmd, args) → commands::dispatch
//!   ├── Keyspace   ← entries, TTL, LRU/LFU bookkeeping, eviction candidates
//!   ├── PubSub     ← channel/pattern registries, client mailboxes
//!   ├── Slowlog    ← bounded ring of slow commands
//!   └── MetricsAccumulator
//! ```

pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod keyspace;
pub mod pubsub;
pub mod slowlog;
pub mod value;

pub use config::{EvictionPolicy, KvConfig, SeedKey};
pub use engine::{ClientInfo, KeyEntry, KvEngine, KvMetrics};
pub use error::{KvError, KvResult};
pub use pubsub::{ChannelInfo, PatternInfo, PubSubInfo, PubSubMessage};
pub use slowlog::SlowlogEntry;
pub use value::{Value, ValueType};
