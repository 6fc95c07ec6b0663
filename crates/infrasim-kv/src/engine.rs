//! The key-value engine: state, client bookkeeping, and the command loop.
//!
//! Every command goes through [`KvEngine::execute_as`], which resolves the
//! calling client, dispatches to a handler in [`crate::commands`], prices
//! the command with a deterministic cost model, and feeds the metrics
//! accumulator and the slowlog.

use std::any::Any;
use std::collections::BTreeMap;

use infrasim_core::{
    decode_config, CommandResult, ComponentKind, CoreError, CoreResult, EngineContext,
    Reconfigure, RoutingEngine, SimClock,
};
use infrasim_metrics::{MetricsAccumulator, MetricsSnapshot};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{EvictionPolicy, KvConfig, SeedKey};
use crate::error::{KvError, KvResult};
use crate::keyspace::{Entry, Keyspace};
use crate::pubsub::{PubSub, PubSubInfo, PubSubMessage};
use crate::slowlog::{Slowlog, SlowlogEntry};
use crate::value::{entry_size, Value, ValueType};

/// Client handle used by [`RoutingEngine::execute`].
pub const DEFAULT_CLIENT: &str = "default";

/// Fixed cost of dispatching any command, in simulated microseconds.
const BASE_COST_US: u64 = 20;
/// Cost per element a command touches (keys scanned, list items returned).
const PER_ELEMENT_COST_US: u64 = 2;
/// One microsecond per this many bytes moved over the wire.
const BYTES_PER_US: u64 = 64;

/// A connected client as reported by `CLIENT LIST` and the metrics panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: u64,
    /// Caller-side handle passed to `execute_as`.
    pub handle: String,
    /// Name set through `CLIENT SETNAME`.
    pub name: String,
    pub addr: String,
    pub connected_at_ms: u64,
    pub last_active_ms: u64,
    pub last_command: String,
    pub commands_processed: u64,
    pub subscriptions: usize,
}

/// One key as listed by [`KvEngine::all_keys`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub key: String,
    #[serde(rename = "type")]
    pub key_type: ValueType,
    pub value: serde_json::Value,
    /// Seconds remaining; -1 never expires.
    pub ttl: i64,
    pub size_bytes: u64,
}

/// Full metrics view of a key-value node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvMetrics {
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    pub slowlog: Vec<SlowlogEntry>,
    pub connected_clients: Vec<ClientInfo>,
    pub used_memory: u64,
    pub max_memory: u64,
    pub eviction_policy: EvictionPolicy,
    pub key_count: usize,
    pub expired_keys: u64,
    pub evicted_keys: u64,
}

/// A simulated Redis node.
pub struct KvEngine {
    pub(crate) component_id: String,
    pub(crate) clock: SimClock,
    pub(crate) config: KvConfig,
    pub(crate) keyspace: Keyspace,
    pub(crate) pubsub: PubSub,
    pub(crate) slowlog: Slowlog,
    pub(crate) metrics: MetricsAccumulator,
    pub(crate) clients: BTreeMap<String, ClientInfo>,
    next_client_id: u64,
    pub(crate) rng: StdRng,
    /// Elements touched by the command currently executing.
    pub(crate) work: u64,
    pub(crate) total_commands: u64,
}

impl KvEngine {
    /// Build an engine and seed the keys declared in `config`.
    pub fn new(ctx: EngineContext, config: KvConfig) -> KvResult<Self> {
        let now = ctx.clock.now_ms();
        let mut engine = Self {
            component_id: ctx.component_id,
            clock: ctx.clock,
            keyspace: Keyspace::new(),
            pubsub: PubSub::new(config.mailbox_capacity),
            slowlog: Slowlog::new(config.slowlog_threshold_ms, config.slowlog_max_len),
            metrics: MetricsAccumulator::new(now),
            clients: BTreeMap::new(),
            next_client_id: 1,
            rng: StdRng::seed_from_u64(config.seed),
            work: 0,
            total_commands: 0,
            config,
        };
        engine.seed_keys()?;
        debug!(
            component = %engine.component_id,
            keys = engine.keyspace.len(),
            max_memory = engine.config.max_memory,
            policy = engine.config.max_memory_policy.as_str(),
            "key-value engine created"
        );
        Ok(engine)
    }

    /// Build an engine from a topology node's raw JSON config.
    pub fn from_node(ctx: EngineContext, config: &serde_json::Value) -> CoreResult<Self> {
        let component_id = ctx.component_id.clone();
        let config: KvConfig = decode_config(&component_id, config)?;
        Self::new(ctx, config).map_err(|e| CoreError::invalid_config(&component_id, e))
    }

    /// Insert declared keys that do not exist yet.
    fn seed_keys(&mut self) -> KvResult<()> {
        let now = self.clock.now_ms();
        let seeds = self.config.keys.clone();
        for seed in seeds {
            if self.keyspace.peek(&seed.key, now).is_some() {
                continue;
            }
            let value = seed_value(&seed)?;
            let expires_at = (seed.ttl > 0).then(|| now + seed.ttl as u64 * 1000);
            self.keyspace.insert(&seed.key, value, expires_at, now);
        }
        Ok(())
    }

    pub fn config(&self) -> &KvConfig {
        &self.config
    }

    /// Execute a command on behalf of the client identified by `client`.
    ///
    /// Unknown handles connect a new client on first use.
    pub fn execute_as(&mut self, client: &str, command: &str, args: &[String]) -> CommandResult {
        let now = self.clock.now_ms();
        let name = command.to_ascii_uppercase();
        let client_id = self.touch_client(client, &name, now);

        self.work = 0;
        let result = self.dispatch(client_id, &name, args);
        self.total_commands += 1;

        let bytes_in = wire_size_in(command, args);
        let bytes_out = match &result {
            Ok(value) => wire_size_out(value),
            Err(e) => e.to_string().len() as u64 + 3,
        };
        let cost_us =
            BASE_COST_US + self.work * PER_ELEMENT_COST_US + (bytes_in + bytes_out) / BYTES_PER_US;

        self.metrics.record(&name, cost_us, result.is_ok());
        self.metrics.record_bytes(bytes_in, bytes_out);

        let mut logged_command = Vec::with_capacity(args.len() + 1);
        logged_command.push(name.clone());
        logged_command.extend(args.iter().cloned());
        let (addr, client_name) = self
            .clients
            .get(client)
            .map(|c| (c.addr.clone(), c.name.clone()))
            .unwrap_or_default();
        if self
            .slowlog
            .observe(now / 1000, cost_us, logged_command, &addr, &client_name)
        {
            warn!(
                component = %self.component_id,
                command = %name,
                duration_us = cost_us,
                "slow command"
            );
        }

        if let Err(e) = &result {
            debug!(component = %self.component_id, command = %name, error = %e, "command failed");
        }
        CommandResult::from_result(result)
    }

    fn touch_client(&mut self, handle: &str, command: &str, now: u64) -> u64 {
        if !self.clients.contains_key(handle) {
            let id = self.next_client_id;
            self.next_client_id += 1;
            self.clients.insert(
                handle.to_string(),
                ClientInfo {
                    id,
                    handle: handle.to_string(),
                    name: String::new(),
                    addr: format!("127.0.0.1:{}", 50000 + id),
                    connected_at_ms: now,
                    last_active_ms: now,
                    last_command: String::new(),
                    commands_processed: 0,
                    subscriptions: 0,
                },
            );
            debug!(component = %self.component_id, client = %handle, id, "client connected");
        }
        match self.clients.get_mut(handle) {
            Some(c) => {
                c.last_active_ms = now;
                c.last_command = command.to_ascii_lowercase();
                c.commands_processed += 1;
                c.id
            }
            None => 0,
        }
    }

    pub(crate) fn client_by_id_mut(&mut self, id: u64) -> Option<&mut ClientInfo> {
        self.clients.values_mut().find(|c| c.id == id)
    }

    pub(crate) fn sync_subscription_count(&mut self, id: u64) {
        let count = self.pubsub.subscription_count(id);
        if let Some(client) = self.client_by_id_mut(id) {
            client.subscriptions = count;
        }
    }

    // ── Keyspace access used by the handlers ─────────────────────────

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Read access: touches LRU/LFU state and counts a hit or a miss.
    pub(crate) fn read_entry(&mut self, key: &str) -> Option<&Entry> {
        let now = self.clock.now_ms();
        self.work += 1;
        match self.keyspace.lookup(key, now) {
            Some(entry) => {
                self.metrics.record_hit();
                Some(&*entry)
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Metadata access: expires the key if due but does not count a hit or
    /// miss and does not touch LRU/LFU state.
    pub(crate) fn peek_entry(&mut self, key: &str) -> Option<&Entry> {
        let now = self.clock.now_ms();
        self.keyspace.expire_if_due(key, now);
        self.keyspace.peek(key, now)
    }

    /// Load a copy of a key's value for modification.
    ///
    /// Returns `Ok(None)` when the key does not exist and
    /// [`KvError::WrongType`] when `extract` rejects the stored type.
    pub(crate) fn load_for_write<T>(
        &mut self,
        key: &str,
        extract: impl FnOnce(Value) -> Option<T>,
    ) -> KvResult<Option<(T, Option<u64>)>> {
        let now = self.clock.now_ms();
        self.work += 1;
        match self.keyspace.lookup(key, now) {
            None => Ok(None),
            Some(entry) => {
                let expires_at = entry.expires_at_ms;
                let value = entry.value.clone();
                extract(value)
                    .map(|v| Some((v, expires_at)))
                    .ok_or(KvError::WrongType)
            }
        }
    }

    /// Store a value, evicting other keys first if the memory budget
    /// requires it. Under `noeviction` an over-budget write fails with
    /// [`KvError::OutOfMemory`] and nothing is evicted.
    pub(crate) fn store(
        &mut self,
        key: &str,
        value: Value,
        expires_at_ms: Option<u64>,
    ) -> KvResult<()> {
        let now = self.clock.now_ms();
        self.reserve(key, entry_size(key, &value))?;
        self.keyspace.insert(key, value, expires_at_ms, now);
        Ok(())
    }

    /// Store a collection value, deleting the key instead when it is empty.
    pub(crate) fn store_or_remove(
        &mut self,
        key: &str,
        value: Value,
        expires_at_ms: Option<u64>,
    ) -> KvResult<()> {
        if value.is_empty() {
            self.keyspace.remove(key);
            Ok(())
        } else {
            self.store(key, value, expires_at_ms)
        }
    }

    fn reserve(&mut self, key: &str, new_size: u64) -> KvResult<()> {
        let max = self.config.max_memory;
        if max == 0 {
            return Ok(());
        }
        let policy = self.config.max_memory_policy;
        if new_size > max {
            return Err(KvError::OutOfMemory);
        }
        loop {
            let current = self.keyspace.size_of(key);
            let projected = self.keyspace.used_memory() - current + new_size;
            if projected <= max {
                return Ok(());
            }
            if policy == EvictionPolicy::Noeviction {
                debug!(
                    component = %self.component_id,
                    %key,
                    used = self.keyspace.used_memory(),
                    max,
                    "write rejected under noeviction"
                );
                return Err(KvError::OutOfMemory);
            }
            let Some(victim) = self.keyspace.eviction_candidate(policy, key, &mut self.rng) else {
                return Err(KvError::OutOfMemory);
            };
            self.keyspace.evict(&victim);
            self.work += 1;
        }
    }

    /// Check that a multi-key write can fit before any part of it is
    /// stored. Under `noeviction` a batch that would overflow is rejected
    /// whole.
    pub(crate) fn reserve_batch(&self, entries: &[(&str, u64)]) -> KvResult<()> {
        let max = self.config.max_memory;
        if max == 0 {
            return Ok(());
        }
        let mut sizes: BTreeMap<&str, u64> = BTreeMap::new();
        for &(key, size) in entries {
            if size > max {
                return Err(KvError::OutOfMemory);
            }
            sizes.insert(key, size);
        }
        if self.config.max_memory_policy != EvictionPolicy::Noeviction {
            return Ok(());
        }
        let replaced: u64 = sizes.keys().map(|k| self.keyspace.size_of(k)).sum();
        let added: u64 = sizes.values().sum();
        let projected = self.keyspace.used_memory().saturating_sub(replaced) + added;
        if projected > max {
            debug!(
                component = %self.component_id,
                keys = sizes.len(),
                used = self.keyspace.used_memory(),
                max,
                "batch write rejected under noeviction"
            );
            return Err(KvError::OutOfMemory);
        }
        Ok(())
    }

    // ── Public queries ───────────────────────────────────────────────

    /// Every live key with its value and remaining TTL, sorted by key.
    pub fn all_keys(&self) -> Vec<KeyEntry> {
        let now = self.clock.now_ms();
        self.keyspace
            .live_keys(now)
            .into_iter()
            .map(|(key, entry)| KeyEntry {
                key: key.clone(),
                key_type: entry.value.value_type(),
                value: entry.value.to_json(),
                ttl: entry.ttl_secs(now),
                size_bytes: entry.size_bytes,
            })
            .collect()
    }

    pub fn pubsub_info(&self) -> PubSubInfo {
        self.pubsub.info()
    }

    /// Drain the messages delivered to `client` since the last call.
    pub fn take_messages(&mut self, client: &str) -> Vec<PubSubMessage> {
        match self.clients.get(client) {
            Some(info) => {
                let id = info.id;
                self.pubsub.take_messages(id)
            }
            None => Vec::new(),
        }
    }

    pub fn connected_clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self.clients.values().cloned().collect();
        clients.sort_by_key(|c| c.id);
        clients
    }

    /// Drop a client and all its subscriptions.
    pub fn disconnect(&mut self, client: &str) -> bool {
        let Some(info) = self.clients.remove(client) else {
            return false;
        };
        for channel in self.pubsub.channels_of(info.id) {
            self.pubsub.unsubscribe(info.id, &channel);
        }
        for pattern in self.pubsub.patterns_of(info.id) {
            self.pubsub.punsubscribe(info.id, &pattern);
        }
        self.pubsub.take_messages(info.id);
        debug!(component = %self.component_id, %client, "client disconnected");
        true
    }

    /// Live key count, used memory and eviction counters alongside the
    /// accumulator snapshot. Pure.
    pub fn get_metrics(&self) -> KvMetrics {
        let now = self.clock.now_ms();
        KvMetrics {
            snapshot: self.metrics.snapshot(now),
            slowlog: self.slowlog.get(self.slowlog.len()),
            connected_clients: self.connected_clients(),
            used_memory: self.keyspace.used_memory(),
            max_memory: self.config.max_memory,
            eviction_policy: self.config.max_memory_policy,
            key_count: self.keyspace.live_count(now),
            expired_keys: self.keyspace.expired_keys(),
            evicted_keys: self.keyspace.evicted_keys(),
        }
    }

    pub fn used_memory(&self) -> u64 {
        self.keyspace.used_memory()
    }

    pub fn key_count(&self) -> usize {
        self.keyspace.live_count(self.clock.now_ms())
    }
}

impl RoutingEngine for KvEngine {
    fn kind(&self) -> ComponentKind {
        ComponentKind::KeyValue
    }

    fn component_id(&self) -> &str {
        &self.component_id
    }

    fn execute(&mut self, command: &str, args: &[String]) -> CommandResult {
        self.execute_as(DEFAULT_CLIENT, command, args)
    }

    fn tick(&mut self) {
        let purged = self.keyspace.purge_expired(self.clock.now_ms());
        if purged > 0 {
            debug!(component = %self.component_id, purged, "active expiry sweep");
        }
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.clock.now_ms())
    }

    fn reset_stats(&mut self) {
        self.metrics.reset(self.clock.now_ms());
        self.keyspace.reset_counters();
    }

    fn reconfigure(&mut self, config: &serde_json::Value) -> CoreResult<Reconfigure> {
        let new: KvConfig = decode_config(&self.component_id, config)?;
        for seed in &new.keys {
            seed_value(seed).map_err(|e| CoreError::invalid_config(&self.component_id, e))?;
        }
        if new.seed != self.config.seed {
            self.rng = StdRng::seed_from_u64(new.seed);
        }
        self.slowlog.configure(new.slowlog_threshold_ms, new.slowlog_max_len);
        self.pubsub.set_mailbox_capacity(new.mailbox_capacity);
        self.config = new;
        self.seed_keys()
            .map_err(|e| CoreError::invalid_config(&self.component_id, e))?;
        debug!(
            component = %self.component_id,
            max_memory = self.config.max_memory,
            policy = self.config.max_memory_policy.as_str(),
            "key-value engine reconfigured"
        );
        Ok(Reconfigure::Applied)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn seed_value(seed: &SeedKey) -> KvResult<Value> {
    Value::from_json(seed.value_type, &seed.value).map_err(|e| match e {
        KvError::InvalidSeed { reason, .. } => KvError::InvalidSeed {
            key: seed.key.clone(),
            reason,
        },
        other => other,
    })
}

/// Approximate RESP request size: array header plus one bulk per part.
fn wire_size_in(command: &str, args: &[String]) -> u64 {
    let parts = args.len() as u64 + 1;
    let payload: u64 = command.len() as u64 + args.iter().map(|a| a.len() as u64).sum::<u64>();
    payload + parts * 8 + 4
}

fn wire_size_out(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::Null => 5,
        serde_json::Value::String(s) => s.len() as u64 + 8,
        serde_json::Value::Array(items) => 4 + items.iter().map(wire_size_out).sum::<u64>(),
        serde_json::Value::Object(map) => {
            4 + map
                .iter()
                .map(|(k, v)| k.len() as u64 + 8 + wire_size_out(v))
                .sum::<u64>()
        }
        other => other.to_string().len() as u64 + 3,
    }
}
