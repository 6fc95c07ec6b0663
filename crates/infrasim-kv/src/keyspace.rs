//! Keyspace with lazy TTL expiry and eviction bookkeeping.
//!
//! Each entry tracks when it expires, a logical access sequence (for LRU)
//! and an access count (for LFU). Expired entries are removed the moment a
//! read notices them; [`Keyspace::purge_expired`] is the active sweep run
//! on `tick()`.
//!
//! The keyspace is **not internally synchronized**; the owning engine is
//! single-threaded.

use std::collections::HashMap;

use rand::Rng;
use rand::rngs::StdRng;

use crate::config::EvictionPolicy;
use crate::value::{entry_size, Value};

/// One stored key.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: Value,
    pub created_at_ms: u64,
    /// Absolute expiry in simulated ms; `None` never expires.
    pub expires_at_ms: Option<u64>,
    /// Logical access sequence number, larger is more recent.
    pub last_access: u64,
    pub access_count: u64,
    pub size_bytes: u64,
}

impl Entry {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms >= at)
    }

    /// Remaining TTL in seconds, `-1` when the key never expires.
    pub fn ttl_secs(&self, now_ms: u64) -> i64 {
        match self.expires_at_ms {
            None => -1,
            Some(at) => (at.saturating_sub(now_ms) as i64 + 500) / 1000,
        }
    }

    /// Remaining TTL in milliseconds, `-1` when the key never expires.
    pub fn ttl_ms(&self, now_ms: u64) -> i64 {
        match self.expires_at_ms {
            None => -1,
            Some(at) => at.saturating_sub(now_ms) as i64,
        }
    }
}

/// Key → entry map plus memory and expiry accounting.
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: HashMap<String, Entry>,
    used_memory: u64,
    access_seq: u64,
    expired_keys: u64,
    evicted_keys: u64,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a live key, touching its LRU/LFU state.
    ///
    /// Returns `None` on miss or expiry; expired keys are removed.
    pub fn lookup(&mut self, key: &str, now_ms: u64) -> Option<&mut Entry> {
        if self.expire_if_due(key, now_ms) {
            return None;
        }
        self.access_seq += 1;
        let seq = self.access_seq;
        let entry = self.entries.get_mut(key)?;
        entry.last_access = seq;
        entry.access_count += 1;
        Some(entry)
    }

    /// Look up a live key without touching it or removing anything.
    pub fn peek(&self, key: &str, now_ms: u64) -> Option<&Entry> {
        self.entries.get(key).filter(|e| !e.is_expired(now_ms))
    }

    /// Remove `key` if its TTL has elapsed. Returns true if it was removed.
    pub fn expire_if_due(&mut self, key: &str, now_ms: u64) -> bool {
        let due = self.entries.get(key).is_some_and(|e| e.is_expired(now_ms));
        if due {
            self.remove(key);
            self.expired_keys += 1;
            tracing::debug!(%key, "key expired");
        }
        due
    }

    /// Insert or replace a key. `expires_at_ms` is stored as given.
    pub fn insert(&mut self, key: &str, value: Value, expires_at_ms: Option<u64>, now_ms: u64) {
        let size_bytes = entry_size(key, &value);
        self.access_seq += 1;
        let (created_at_ms, access_count) = match self.entries.get(key) {
            Some(old) if !old.is_expired(now_ms) => (old.created_at_ms, old.access_count),
            _ => (now_ms, 0),
        };
        let entry = Entry {
            value,
            created_at_ms,
            expires_at_ms,
            last_access: self.access_seq,
            access_count: access_count + 1,
            size_bytes,
        };
        if let Some(old) = self.entries.insert(key.to_string(), entry) {
            self.used_memory -= old.size_bytes;
        }
        self.used_memory += size_bytes;
    }

    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.used_memory -= entry.size_bytes;
        Some(entry)
    }

    /// Set or clear the expiry of a live key. Returns false if the key is absent.
    pub fn set_expiry(&mut self, key: &str, expires_at_ms: Option<u64>) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at_ms = expires_at_ms;
                true
            }
            None => false,
        }
    }

    /// Active expiry sweep. Returns the number of keys removed.
    pub fn purge_expired(&mut self, now_ms: u64) -> usize {
        let due: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now_ms))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &due {
            self.remove(key);
        }
        self.expired_keys += due.len() as u64;
        due.len()
    }

    /// Pick the key the given policy would evict next, never `exclude`.
    pub fn eviction_candidate(
        &self,
        policy: EvictionPolicy,
        exclude: &str,
        rng: &mut StdRng,
    ) -> Option<String> {
        let mut eligible: Vec<(&String, &Entry)> = self
            .entries
            .iter()
            .filter(|(k, e)| k.as_str() != exclude && (!policy.volatile_only() || e.expires_at_ms.is_some()))
            .collect();
        if eligible.is_empty() {
            return None;
        }

        let chosen = match policy {
            EvictionPolicy::Noeviction => return None,
            EvictionPolicy::AllkeysLru | EvictionPolicy::VolatileLru => {
                eligible.into_iter().min_by_key(|(_, e)| e.last_access)
            }
            EvictionPolicy::AllkeysLfu | EvictionPolicy::VolatileLfu => eligible
                .into_iter()
                .min_by_key(|(_, e)| (e.access_count, e.last_access)),
            EvictionPolicy::VolatileTtl => eligible
                .into_iter()
                .min_by_key(|(_, e)| (e.expires_at_ms.unwrap_or(u64::MAX), e.last_access)),
            EvictionPolicy::AllkeysRandom | EvictionPolicy::VolatileRandom => {
                // HashMap order is unstable; sort so a seeded rng is deterministic.
                eligible.sort_by(|a, b| a.0.cmp(b.0));
                let idx = rng.random_range(0..eligible.len());
                Some(eligible.swap_remove(idx))
            }
        };
        chosen.map(|(k, _)| k.clone())
    }

    /// Evict a key chosen by policy. Counts toward `evicted_keys`.
    pub fn evict(&mut self, key: &str) -> Option<Entry> {
        let entry = self.remove(key)?;
        self.evicted_keys += 1;
        tracing::debug!(%key, size = entry.size_bytes, "key evicted");
        Some(entry)
    }

    /// Remove every key. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.used_memory = 0;
        n
    }

    /// Live keys at `now_ms`, sorted.
    pub fn live_keys(&self, now_ms: u64) -> Vec<(&String, &Entry)> {
        let mut keys: Vec<(&String, &Entry)> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now_ms))
            .collect();
        keys.sort_by(|a, b| a.0.cmp(b.0));
        keys
    }

    /// Size of the stored entry for `key`, or 0.
    pub fn size_of(&self, key: &str) -> u64 {
        self.entries.get(key).map(|e| e.size_bytes).unwrap_or(0)
    }

    pub fn used_memory(&self) -> u64 {
        self.used_memory
    }

    /// Number of stored entries, including ones whose TTL elapsed but that
    /// no read has noticed yet.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of keys whose TTL has not elapsed at `now_ms`.
    pub fn live_count(&self, now_ms: u64) -> usize {
        self.entries.values().filter(|e| !e.is_expired(now_ms)).count()
    }

    /// Zero the expired/evicted counters.
    pub fn reset_counters(&mut self) {
        self.expired_keys = 0;
        self.evicted_keys = 0;
    }

    pub fn expired_keys(&self) -> u64 {
        self.expired_keys
    }

    pub fn evicted_keys(&self) -> u64 {
        self.evicted_keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    // ── Lookup and TTL ───────────────────────────────────────────────

    #[test]
    fn lookup_returns_live_entry() {
        let mut ks = Keyspace::new();
        ks.insert("foo", s("bar"), None, 0);
        assert_eq!(ks.lookup("foo", 10).unwrap().value, s("bar"));
    }

    #[test]
    fn lookup_after_ttl_removes_key() {
        let mut ks = Keyspace::new();
        ks.insert("temp", s("x"), Some(1_000), 0);
        assert!(ks.lookup("temp", 999).is_some());
        assert!(ks.lookup("temp", 1_000).is_none());
        assert!(ks.is_empty());
        assert_eq!(ks.expired_keys(), 1);
        assert_eq!(ks.used_memory(), 0);
    }

    #[test]
    fn peek_does_not_remove() {
        let mut ks = Keyspace::new();
        ks.insert("temp", s("x"), Some(1_000), 0);
        assert!(ks.peek("temp", 2_000).is_none());
        assert_eq!(ks.len(), 1);
    }

    #[test]
    fn ttl_reporting() {
        let mut ks = Keyspace::new();
        ks.insert("a", s("x"), Some(10_000), 0);
        ks.insert("b", s("x"), None, 0);
        assert_eq!(ks.peek("a", 2_000).unwrap().ttl_secs(2_000), 8);
        assert_eq!(ks.peek("a", 2_000).unwrap().ttl_ms(2_000), 8_000);
        assert_eq!(ks.peek("b", 2_000).unwrap().ttl_secs(2_000), -1);
    }

    #[test]
    fn purge_expired_sweeps_all_due_keys() {
        let mut ks = Keyspace::new();
        ks.insert("a", s("x"), Some(100), 0);
        ks.insert("b", s("x"), Some(200), 0);
        ks.insert("c", s("x"), None, 0);
        assert_eq!(ks.purge_expired(150), 1);
        assert_eq!(ks.purge_expired(500), 1);
        assert_eq!(ks.len(), 1);
        assert_eq!(ks.expired_keys(), 2);
    }

    // ── Memory accounting ────────────────────────────────────────────

    #[test]
    fn replace_updates_memory() {
        let mut ks = Keyspace::new();
        ks.insert("k", s("short"), None, 0);
        let first = ks.used_memory();
        ks.insert("k", s("a much longer value"), None, 0);
        assert!(ks.used_memory() > first);
        ks.remove("k");
        assert_eq!(ks.used_memory(), 0);
    }

    // ── Eviction candidates ──────────────────────────────────────────

    #[test]
    fn lru_picks_least_recently_accessed() {
        let mut ks = Keyspace::new();
        ks.insert("a", s("1"), None, 0);
        ks.insert("b", s("2"), None, 0);
        ks.insert("c", s("3"), None, 0);
        ks.lookup("a", 0);

        let victim = ks.eviction_candidate(EvictionPolicy::AllkeysLru, "", &mut rng());
        assert_eq!(victim.as_deref(), Some("b"));
    }

    #[test]
    fn lfu_picks_least_frequently_accessed() {
        let mut ks = Keyspace::new();
        ks.insert("hot", s("1"), None, 0);
        ks.insert("cold", s("2"), None, 0);
        for _ in 0..5 {
            ks.lookup("hot", 0);
        }
        ks.lookup("cold", 0);

        let victim = ks.eviction_candidate(EvictionPolicy::AllkeysLfu, "", &mut rng());
        assert_eq!(victim.as_deref(), Some("cold"));
    }

    #[test]
    fn volatile_policies_skip_persistent_keys() {
        let mut ks = Keyspace::new();
        ks.insert("persistent", s("1"), None, 0);
        assert!(ks
            .eviction_candidate(EvictionPolicy::VolatileLru, "", &mut rng())
            .is_none());

        ks.insert("session", s("2"), Some(60_000), 0);
        let victim = ks.eviction_candidate(EvictionPolicy::VolatileLru, "", &mut rng());
        assert_eq!(victim.as_deref(), Some("session"));
    }

    #[test]
    fn volatile_ttl_picks_nearest_expiry() {
        let mut ks = Keyspace::new();
        ks.insert("later", s("1"), Some(60_000), 0);
        ks.insert("sooner", s("2"), Some(5_000), 0);
        ks.insert("never", s("3"), None, 0);

        let victim = ks.eviction_candidate(EvictionPolicy::VolatileTtl, "", &mut rng());
        assert_eq!(victim.as_deref(), Some("sooner"));
    }

    #[test]
    fn random_is_deterministic_for_a_seed() {
        let mut ks = Keyspace::new();
        for i in 0..20 {
            ks.insert(&format!("k{i}"), s("v"), None, 0);
        }
        let a = ks.eviction_candidate(EvictionPolicy::AllkeysRandom, "", &mut rng());
        let b = ks.eviction_candidate(EvictionPolicy::AllkeysRandom, "", &mut rng());
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn candidate_never_the_excluded_key() {
        let mut ks = Keyspace::new();
        ks.insert("only", s("1"), None, 0);
        assert!(ks
            .eviction_candidate(EvictionPolicy::AllkeysLru, "only", &mut rng())
            .is_none());
    }

    #[test]
    fn evict_counts() {
        let mut ks = Keyspace::new();
        ks.insert("a", s("1"), None, 0);
        ks.evict("a");
        assert_eq!(ks.evicted_keys(), 1);
        assert!(ks.is_empty());
    }
}
