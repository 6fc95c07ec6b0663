//! Key-value node configuration.

use serde::{Deserialize, Serialize};

use infrasim_core::units::deserialize_bytes;

use crate::value::ValueType;

/// What to do when a write would push memory past `max_memory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Reject the write.
    #[default]
    Noeviction,
    AllkeysLru,
    VolatileLru,
    AllkeysLfu,
    VolatileLfu,
    AllkeysRandom,
    VolatileRandom,
    /// Evict the key with the nearest expiry.
    VolatileTtl,
}

impl EvictionPolicy {
    /// Whether only keys with a TTL are eligible.
    pub fn volatile_only(&self) -> bool {
        matches!(
            self,
            Self::VolatileLru | Self::VolatileLfu | Self::VolatileRandom | Self::VolatileTtl
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Noeviction => "noeviction",
            Self::AllkeysLru => "allkeys-lru",
            Self::VolatileLru => "volatile-lru",
            Self::AllkeysLfu => "allkeys-lfu",
            Self::VolatileLfu => "volatile-lfu",
            Self::AllkeysRandom => "allkeys-random",
            Self::VolatileRandom => "volatile-random",
            Self::VolatileTtl => "volatile-ttl",
        }
    }
}

/// A key declared on the node, created when the engine is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedKey {
    pub key: String,
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub value: serde_json::Value,
    /// Seconds until expiry; -1 never expires.
    #[serde(default = "default_ttl")]
    pub ttl: i64,
}

fn default_ttl() -> i64 {
    -1
}

/// Configuration for a key-value node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvConfig {
    /// Memory budget in bytes; 0 means unlimited.
    #[serde(deserialize_with = "deserialize_bytes")]
    pub max_memory: u64,
    pub max_memory_policy: EvictionPolicy,
    /// Commands whose simulated execution exceeds this are slowlogged.
    pub slowlog_threshold_ms: u64,
    pub slowlog_max_len: usize,
    /// Messages retained per subscriber mailbox.
    pub mailbox_capacity: usize,
    /// Seed for the `*-random` eviction policies.
    pub seed: u64,
    pub keys: Vec<SeedKey>,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            max_memory: 0,
            max_memory_policy: EvictionPolicy::Noeviction,
            slowlog_threshold_ms: 10,
            slowlog_max_len: 128,
            mailbox_capacity: 256,
            seed: 0,
            keys: Vec::new(),
        }
    }
}
