//! The queue engine: the queue catalog plus the send/receive/delete API.
//!
//! Deadlines (delay, visibility, retention, redrive) are resolved by
//! [`QueueEngine::resolve`] at the start of every mutating call and on
//! `tick()`. Resolution is idempotent: resolving twice at the same
//! simulated time changes nothing the second time.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};

use infrasim_core::{
    decode_config, CommandResult, ComponentKind, CoreError, CoreResult, EngineContext,
    Reconfigure, RoutingEngine, SimClock,
};
use infrasim_metrics::{MetricsAccumulator, MetricsSnapshot};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{QueueConfig, QueueKind, QueuePatch, QueueSpec};
use crate::error::{QueueError, QueueResult};
use crate::ids::{content_dedup_id, IdGen};
use crate::queue::{Message, MessageInfo, Queue, QueueMetrics, ReceivedMessage};
use crate::validation::validate_spec;

const SEND_COST_US: u64 = 8_000;
const RECEIVE_COST_US: u64 = 10_000;
const DELETE_COST_US: u64 = 5_000;
const ADMIN_COST_US: u64 = 20_000;
/// Additional cost per KiB of payload moved.
const PER_KIB_COST_US: u64 = 40;

/// Upper bound on messages per receive call.
pub const MAX_RECEIVE_BATCH: usize = 10;

/// A message to send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub body: String,
    /// Declared size; defaults to the body plus attribute bytes.
    pub size_bytes: Option<u64>,
    pub attributes: BTreeMap<String, String>,
    pub group_id: Option<String>,
    pub dedup_id: Option<String>,
}

impl SendRequest {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn dedup(mut self, dedup_id: impl Into<String>) -> Self {
        self.dedup_id = Some(dedup_id.into());
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }

    fn effective_size(&self) -> u64 {
        self.size_bytes.unwrap_or_else(|| {
            let attrs: usize = self.attributes.iter().map(|(k, v)| k.len() + v.len()).sum();
            (self.body.len() + attrs) as u64
        })
    }
}

/// Outcome of a send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
    /// True when the send was suppressed as a duplicate and `message_id`
    /// is the id of the original message.
    pub deduplicated: bool,
}

/// A simulated SQS endpoint holding any number of queues.
pub struct QueueEngine {
    component_id: String,
    clock: SimClock,
    config: QueueConfig,
    queues: BTreeMap<String, Queue>,
    /// Queues that came from node config rather than runtime commands.
    declared: BTreeSet<String>,
    ids: IdGen,
    metrics: MetricsAccumulator,
}

impl QueueEngine {
    /// Build an engine and create the queues declared in `config`.
    pub fn new(ctx: EngineContext, config: QueueConfig) -> QueueResult<Self> {
        let now = ctx.clock.now_ms();
        let mut engine = Self {
            ids: IdGen::new(&ctx.component_id),
            component_id: ctx.component_id,
            clock: ctx.clock,
            queues: BTreeMap::new(),
            declared: BTreeSet::new(),
            metrics: MetricsAccumulator::new(now),
            config: config.clone(),
        };
        engine.check_declared(&config.queues, &[])?;
        engine.apply_declared(&config.queues)?;
        debug!(
            component = %engine.component_id,
            queues = engine.queues.len(),
            "queue engine created"
        );
        Ok(engine)
    }

    pub fn from_node(ctx: EngineContext, config: &serde_json::Value) -> CoreResult<Self> {
        let component_id = ctx.component_id.clone();
        let config: QueueConfig = decode_config(&component_id, config)?;
        Self::new(ctx, config).map_err(|e| CoreError::invalid_config(&component_id, e))
    }

    /// Validate a declared queue list against the queues that would exist
    /// once `removed` are dropped. Nothing is mutated.
    fn check_declared(&self, specs: &[QueueSpec], removed: &[String]) -> QueueResult<()> {
        let mut kinds: BTreeMap<&str, QueueKind> = self
            .queues
            .iter()
            .filter(|(name, _)| !removed.contains(name))
            .map(|(name, queue)| (name.as_str(), queue.kind()))
            .collect();
        for spec in specs {
            let next = match self.queues.get(&spec.name) {
                Some(current) => current.spec.patched(&QueuePatch::from_spec(spec)),
                None => spec.clone(),
            };
            validate_spec(&next)?;
            kinds.insert(spec.name.as_str(), next.kind());
        }
        for spec in specs {
            let Some(dlq) = &spec.dead_letter_queue else {
                continue;
            };
            let target = kinds
                .get(dlq.as_str())
                .ok_or_else(|| QueueError::QueueDoesNotExist(dlq.clone()))?;
            let source = kinds.get(spec.name.as_str()).copied().unwrap_or(spec.kind());
            if *target != source {
                return Err(QueueError::InvalidAttribute {
                    attribute: "dead_letter_queue".into(),
                    reason: format!(
                        "a {} queue needs a {} dead-letter queue",
                        source.as_str(),
                        source.as_str()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Create or update declared queues. Redrive targets are attached in a
    /// second pass so a queue may name a dead-letter queue declared after it.
    /// Callers run `check_declared` first.
    fn apply_declared(&mut self, specs: &[QueueSpec]) -> QueueResult<()> {
        for spec in specs {
            if self.queues.contains_key(&spec.name) {
                let patch = QueuePatch {
                    dead_letter_queue: None,
                    ..QueuePatch::from_spec(spec)
                };
                self.update_queue(&spec.name, &patch)?;
            } else {
                let without_redrive = QueueSpec {
                    dead_letter_queue: None,
                    ..spec.clone()
                };
                self.create_queue(without_redrive)?;
            }
            self.declared.insert(spec.name.clone());
        }
        for spec in specs {
            let patch = QueuePatch {
                dead_letter_queue: Some(spec.dead_letter_queue.clone()),
                ..QueuePatch::default()
            };
            self.update_queue(&spec.name, &patch)?;
        }
        Ok(())
    }

    pub fn queue_url_for(&self, name: &str) -> String {
        format!(
            "https://sqs.{}.amazonaws.com/{}/{}",
            self.config.region, self.config.account_id, name
        )
    }

    fn queue_mut(&mut self, name: &str) -> QueueResult<&mut Queue> {
        self.queues
            .get_mut(name)
            .ok_or_else(|| QueueError::QueueDoesNotExist(name.to_string()))
    }

    fn record(&mut self, op: &str, cost_us: u64, ok: bool) {
        self.metrics.record(op, cost_us, ok);
    }

    fn payload_cost(bytes: u64) -> u64 {
        bytes / 1024 * PER_KIB_COST_US
    }

    /// Check that a redrive target exists and matches the source kind.
    fn check_redrive(&self, spec: &QueueSpec) -> QueueResult<()> {
        let Some(dlq) = &spec.dead_letter_queue else {
            return Ok(());
        };
        let target = self
            .queues
            .get(dlq)
            .ok_or_else(|| QueueError::QueueDoesNotExist(dlq.clone()))?;
        if target.kind() != spec.kind() {
            return Err(QueueError::InvalidAttribute {
                attribute: "dead_letter_queue".into(),
                reason: format!(
                    "a {} queue needs a {} dead-letter queue",
                    spec.kind().as_str(),
                    spec.kind().as_str()
                ),
            });
        }
        Ok(())
    }

    // ── Deadline resolution ──────────────────────────────────────────

    /// Apply every deadline due at the current simulated time: retention,
    /// visibility expiry and redrive.
    pub fn resolve(&mut self) {
        let now = self.clock.now_ms();
        let mut redrives: Vec<(String, String, Vec<Message>)> = Vec::new();

        for (name, queue) in self.queues.iter_mut() {
            let dropped = queue.expire_retention(now);
            if dropped > 0 {
                debug!(component = %self.component_id, queue = %name, dropped, "retention expired messages");
            }
            let target = queue
                .spec
                .dead_letter_queue
                .clone()
                .filter(|dlq| dlq != name);
            let moved = queue.release_expired(now, target.is_some());
            if let Some(dlq) = target {
                if !moved.is_empty() {
                    redrives.push((name.clone(), dlq, moved));
                }
            }
        }

        for (source, dlq, messages) in redrives {
            let count = messages.len();
            match self.queues.get_mut(&dlq) {
                Some(target) => {
                    for message in messages {
                        target.accept_redrive(message, now);
                    }
                    debug!(component = %self.component_id, %source, %dlq, count, "messages redriven");
                }
                None => {
                    // Target vanished; put the messages back as available.
                    warn!(component = %self.component_id, %source, %dlq, "dead-letter queue missing");
                    if let Some(queue) = self.queues.get_mut(&source) {
                        for message in messages {
                            queue.accept_redrive(message, now);
                        }
                    }
                }
            }
        }
    }

    // ── Queue lifecycle ──────────────────────────────────────────────

    /// Create a queue. Returns its URL.
    pub fn create_queue(&mut self, spec: QueueSpec) -> QueueResult<String> {
        let result = self.try_create_queue(spec);
        self.record("create_queue", ADMIN_COST_US, result.is_ok());
        result
    }

    fn try_create_queue(&mut self, spec: QueueSpec) -> QueueResult<String> {
        validate_spec(&spec)?;
        if self.queues.contains_key(&spec.name) {
            return Err(QueueError::QueueAlreadyExists(spec.name));
        }
        self.check_redrive(&spec)?;
        let url = self.queue_url_for(&spec.name);
        let now = self.clock.now_ms();
        info!(
            component = %self.component_id,
            queue = %spec.name,
            kind = spec.kind().as_str(),
            "queue created"
        );
        self.queues
            .insert(spec.name.clone(), Queue::new(spec, url.clone(), now));
        Ok(url)
    }

    /// Delete a queue and its messages. Refused while another queue uses
    /// it as a dead-letter queue.
    pub fn delete_queue(&mut self, name: &str) -> QueueResult<()> {
        let result = self.try_delete_queue(name);
        self.record("delete_queue", ADMIN_COST_US, result.is_ok());
        result
    }

    fn try_delete_queue(&mut self, name: &str) -> QueueResult<()> {
        if !self.queues.contains_key(name) {
            return Err(QueueError::QueueDoesNotExist(name.to_string()));
        }
        if let Some(source) = self
            .queues
            .values()
            .find(|q| q.spec.name != name && q.spec.dead_letter_queue.as_deref() == Some(name))
        {
            return Err(QueueError::QueueInUse {
                queue: name.to_string(),
                source_queue: source.spec.name.clone(),
            });
        }
        self.queues.remove(name);
        self.declared.remove(name);
        info!(component = %self.component_id, queue = %name, "queue deleted");
        Ok(())
    }

    /// Remove every message. Returns how many were removed.
    pub fn purge_queue(&mut self, name: &str) -> QueueResult<usize> {
        let result = self.queue_mut(name).map(Queue::purge);
        self.record("purge_queue", ADMIN_COST_US, result.is_ok());
        if let Ok(n) = result {
            debug!(component = %self.component_id, queue = %name, purged = n, "queue purged");
        }
        result
    }

    /// Queue names, sorted, optionally filtered by prefix.
    pub fn list_queues(&self, prefix: Option<&str>) -> Vec<String> {
        self.queues
            .keys()
            .filter(|n| prefix.is_none_or(|p| n.starts_with(p)))
            .cloned()
            .collect()
    }

    pub fn get_queue_url(&self, name: &str) -> QueueResult<String> {
        self.queues
            .get(name)
            .map(|q| q.url.clone())
            .ok_or_else(|| QueueError::QueueDoesNotExist(name.to_string()))
    }

    /// Apply an attribute patch. Validation runs against the patched
    /// attributes before anything changes.
    pub fn update_queue(&mut self, name: &str, patch: &QueuePatch) -> QueueResult<QueueSpec> {
        let current = self
            .queues
            .get(name)
            .ok_or_else(|| QueueError::QueueDoesNotExist(name.to_string()))?;
        let next = current.spec.patched(patch);
        validate_spec(&next)?;
        self.check_redrive(&next)?;
        let queue = self.queue_mut(name)?;
        queue.spec = next.clone();
        debug!(component = %self.component_id, queue = %name, "queue attributes updated");
        Ok(next)
    }

    // ── Messages ─────────────────────────────────────────────────────

    pub fn send_message(&mut self, queue_name: &str, request: SendRequest) -> QueueResult<SendOutcome> {
        self.resolve();
        let size = request.effective_size();
        let result = self.try_send(queue_name, request, size);
        self.record("send_message", SEND_COST_US + Self::payload_cost(size), result.is_ok());
        if result.is_ok() {
            self.metrics.record_bytes(size, 0);
        }
        result
    }

    fn try_send(&mut self, queue_name: &str, request: SendRequest, size: u64) -> QueueResult<SendOutcome> {
        let now = self.clock.now_ms();
        let queue = self
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| QueueError::QueueDoesNotExist(queue_name.to_string()))?;

        if size > queue.spec.max_message_size {
            return Err(QueueError::MessageTooLarge {
                size,
                max: queue.spec.max_message_size,
            });
        }

        let dedup_id = match queue.kind() {
            QueueKind::Fifo => {
                if request.group_id.is_none() {
                    return Err(QueueError::MissingGroupId(queue_name.to_string()));
                }
                let dedup_id = match (&request.dedup_id, queue.spec.dedup_enabled) {
                    (Some(id), _) => id.clone(),
                    (None, true) => content_dedup_id(&request.body),
                    (None, false) => return Err(QueueError::MissingDedupId(queue_name.to_string())),
                };
                if let Some(original) = queue.find_duplicate(&dedup_id, now) {
                    queue.counters.deduplicated += 1;
                    debug!(
                        component = %self.component_id,
                        queue = %queue_name,
                        %dedup_id,
                        "duplicate send suppressed"
                    );
                    return Ok(SendOutcome {
                        message_id: original,
                        sequence_number: None,
                        deduplicated: true,
                    });
                }
                Some(dedup_id)
            }
            QueueKind::Standard => request.dedup_id.clone(),
        };

        let message_id = self.ids.message_id(queue_name);
        let message = Message {
            id: message_id.clone(),
            body: request.body,
            size_bytes: size,
            attributes: request.attributes,
            group_id: request.group_id,
            dedup_id: if queue.kind() == QueueKind::Fifo { dedup_id } else { None },
            sequence_number: None,
            enqueued_at_ms: now,
            visible_at_ms: now,
            receive_count: 0,
            delay_until_ms: None,
            receipt_handle: None,
            first_received_at_ms: None,
        };
        let sequence_number = queue.enqueue(message, now);
        Ok(SendOutcome {
            message_id,
            sequence_number,
            deduplicated: false,
        })
    }

    /// Receive up to `max` messages (clamped to 1..=10), hiding them for
    /// `visibility_sec` or the queue's visibility timeout.
    pub fn receive_message(
        &mut self,
        queue_name: &str,
        max: usize,
        visibility_sec: Option<u64>,
    ) -> QueueResult<Vec<ReceivedMessage>> {
        self.resolve();
        let now = self.clock.now_ms();
        let result = match self.queues.get_mut(queue_name) {
            Some(queue) => {
                let visibility = visibility_sec.unwrap_or(queue.spec.visibility_timeout_sec);
                Ok(queue.receive(max.clamp(1, MAX_RECEIVE_BATCH), visibility, now, &mut self.ids))
            }
            None => Err(QueueError::QueueDoesNotExist(queue_name.to_string())),
        };
        let bytes: u64 = result
            .as_ref()
            .map(|msgs| msgs.iter().map(|m| m.body.len() as u64).sum())
            .unwrap_or(0);
        self.record("receive_message", RECEIVE_COST_US + Self::payload_cost(bytes), result.is_ok());
        match &result {
            Ok(msgs) if msgs.is_empty() => self.metrics.record_miss(),
            Ok(_) => self.metrics.record_hit(),
            Err(_) => {}
        }
        self.metrics.record_bytes(0, bytes);
        result
    }

    pub fn delete_message(&mut self, queue_name: &str, receipt: &str) -> QueueResult<()> {
        self.resolve();
        let result = self.queue_mut(queue_name).and_then(|q| q.delete(receipt)).map(|_| ());
        self.record("delete_message", DELETE_COST_US, result.is_ok());
        result
    }

    /// Delete by receipt handle alone, searching every queue.
    pub fn delete_by_receipt(&mut self, receipt: &str) -> QueueResult<String> {
        self.resolve();
        let owner = self
            .queues
            .iter()
            .find(|(_, q)| q.has_receipt(receipt))
            .map(|(name, _)| name.clone());
        let result = match owner {
            Some(name) => self.queue_mut(&name).and_then(|q| q.delete(receipt)).map(|_| name),
            None => Err(QueueError::ReceiptHandleInvalid(receipt.to_string())),
        };
        self.record("delete_message", DELETE_COST_US, result.is_ok());
        result
    }

    pub fn change_message_visibility(
        &mut self,
        queue_name: &str,
        receipt: &str,
        visibility_sec: u64,
    ) -> QueueResult<()> {
        self.resolve();
        let now = self.clock.now_ms();
        let result = if visibility_sec > 12 * 60 * 60 {
            Err(QueueError::InvalidAttribute {
                attribute: "visibility_timeout".into(),
                reason: "must be between 0 and 43200".into(),
            })
        } else {
            self.queue_mut(queue_name)
                .and_then(|q| q.change_visibility(receipt, visibility_sec, now))
        };
        self.record("change_message_visibility", DELETE_COST_US, result.is_ok());
        result
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Metrics for one queue, with deadlines resolved first.
    pub fn get_queue_metrics(&mut self, name: &str) -> QueueResult<QueueMetrics> {
        self.resolve();
        let now = self.clock.now_ms();
        self.queues
            .get(name)
            .map(|q| q.metrics(now))
            .ok_or_else(|| QueueError::QueueDoesNotExist(name.to_string()))
    }

    pub fn get_all_queue_metrics(&mut self) -> Vec<QueueMetrics> {
        self.resolve();
        let now = self.clock.now_ms();
        self.queues.values().map(|q| q.metrics(now)).collect()
    }

    /// Messages currently stored in a queue, in enqueue order.
    pub fn peek_messages(&mut self, name: &str) -> QueueResult<Vec<MessageInfo>> {
        self.resolve();
        let now = self.clock.now_ms();
        self.queues
            .get(name)
            .map(|q| q.messages(now))
            .ok_or_else(|| QueueError::QueueDoesNotExist(name.to_string()))
    }

    pub fn queue(&self, name: &str) -> Option<&Queue> {
        self.queues.get(name)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    // ── Command surface ──────────────────────────────────────────────

    fn run_command(&mut self, command: &str, args: &[String]) -> QueueResult<serde_json::Value> {
        let arity = |min: usize, max: usize| {
            if args.len() < min || args.len() > max {
                Err(QueueError::WrongArity(command.to_ascii_lowercase()))
            } else {
                Ok(())
            }
        };
        match command {
            "SEND" => {
                arity(2, 4)?;
                let mut request = SendRequest::new(args[1].clone());
                if let Some(group) = args.get(2) {
                    request = request.group(group.clone());
                }
                if let Some(dedup) = args.get(3) {
                    request = request.dedup(dedup.clone());
                }
                let outcome = self.send_message(&args[0], request)?;
                Ok(serde_json::Value::from(outcome.message_id))
            }
            "RECEIVE" => {
                arity(1, 2)?;
                let max = match args.get(1) {
                    Some(raw) => raw
                        .parse::<usize>()
                        .map_err(|_| QueueError::InvalidAttribute {
                            attribute: "max_messages".into(),
                            reason: format!("'{raw}' is not a number"),
                        })?,
                    None => 1,
                };
                let messages = self.receive_message(&args[0], max, None)?;
                Ok(serde_json::to_value(messages).unwrap_or_default())
            }
            "DEL" | "DELETE" => {
                arity(1, 2)?;
                match args {
                    [receipt] => self.delete_by_receipt(receipt).map(|_| serde_json::Value::from(1)),
                    [queue, receipt, ..] => self
                        .delete_message(queue, receipt)
                        .map(|_| serde_json::Value::from(1)),
                    [] => Err(QueueError::WrongArity(command.to_ascii_lowercase())),
                }
            }
            "PURGE" => {
                arity(1, 1)?;
                self.purge_queue(&args[0]).map(serde_json::Value::from)
            }
            "CREATE" => {
                arity(1, 2)?;
                let mut spec = QueueSpec::new(args[0].clone());
                if let Some(kind) = args.get(1) {
                    spec.kind = Some(match kind.to_ascii_lowercase().as_str() {
                        "fifo" => QueueKind::Fifo,
                        "standard" => QueueKind::Standard,
                        other => {
                            return Err(QueueError::InvalidAttribute {
                                attribute: "kind".into(),
                                reason: format!("unknown queue kind '{other}'"),
                            });
                        }
                    });
                }
                self.create_queue(spec).map(serde_json::Value::from)
            }
            "DROP" => {
                arity(1, 1)?;
                self.delete_queue(&args[0]).map(|_| serde_json::Value::from("OK"))
            }
            "LIST" => {
                arity(0, 1)?;
                Ok(serde_json::Value::from(
                    self.list_queues(args.first().map(String::as_str)),
                ))
            }
            "URL" => {
                arity(1, 1)?;
                self.get_queue_url(&args[0]).map(serde_json::Value::from)
            }
            "METRICS" => {
                arity(1, 1)?;
                let metrics = self.get_queue_metrics(&args[0])?;
                Ok(serde_json::to_value(metrics).unwrap_or_default())
            }
            _ => Err(QueueError::UnknownCommand(command.to_ascii_lowercase())),
        }
    }
}

impl RoutingEngine for QueueEngine {
    fn kind(&self) -> ComponentKind {
        ComponentKind::MessageQueue
    }

    fn component_id(&self) -> &str {
        &self.component_id
    }

    /// `SEND queue body [group] [dedup]`, `RECEIVE queue [max]`,
    /// `DEL [queue] receipt`, `PURGE queue`, `CREATE name [fifo]`,
    /// `DROP name`, `LIST [prefix]`, `URL name`, `METRICS name`.
    fn execute(&mut self, command: &str, args: &[String]) -> CommandResult {
        let command = command.to_ascii_uppercase();
        let result = self.run_command(&command, args);
        if let Err(e) = &result {
            debug!(component = %self.component_id, %command, error = %e, "queue command failed");
        }
        CommandResult::from_result(result)
    }

    fn tick(&mut self) {
        self.resolve();
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.clock.now_ms())
    }

    fn reset_stats(&mut self) {
        self.metrics.reset(self.clock.now_ms());
        for queue in self.queues.values_mut() {
            queue.counters = Default::default();
        }
    }

    fn reconfigure(&mut self, config: &serde_json::Value) -> CoreResult<Reconfigure> {
        let new: QueueConfig = decode_config(&self.component_id, config)?;
        if new.region != self.config.region || new.account_id != self.config.account_id {
            return Ok(Reconfigure::RequiresRebuild);
        }

        // Declared queues that disappeared from the config are dropped;
        // renaming a queue in config is a delete plus a create.
        let wanted: BTreeSet<&str> = new.queues.iter().map(|q| q.name.as_str()).collect();
        let stale: Vec<String> = self
            .declared
            .iter()
            .filter(|n| !wanted.contains(n.as_str()))
            .cloned()
            .collect();
        self.check_declared(&new.queues, &stale)
            .map_err(|e| CoreError::invalid_config(&self.component_id, e))?;

        for name in stale {
            // Surviving queues lose their redrive target with it.
            for queue in self.queues.values_mut() {
                if queue.spec.dead_letter_queue.as_deref() == Some(name.as_str()) {
                    queue.spec.dead_letter_queue = None;
                }
            }
            self.queues.remove(&name);
            self.declared.remove(&name);
            info!(component = %self.component_id, queue = %name, "declared queue removed");
        }

        self.apply_declared(&new.queues)
            .map_err(|e| CoreError::invalid_config(&self.component_id, e))?;
        self.config = new;
        Ok(Reconfigure::Applied)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MessageState;

    fn engine() -> (QueueEngine, SimClock) {
        let clock = SimClock::new(0);
        let engine =
            QueueEngine::new(EngineContext::new("sqs-1", clock.clone()), QueueConfig::default())
                .unwrap();
        (engine, clock)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    #[test]
    fn create_list_url_delete() {
        let (mut e, _) = engine();
        let url = e.create_queue(QueueSpec::new("orders")).unwrap();
        assert_eq!(url, "https://sqs.us-east-1.amazonaws.com/000000000000/orders");
        e.create_queue(QueueSpec::new("payments")).unwrap();
        assert_eq!(e.list_queues(None), vec!["orders", "payments"]);
        assert_eq!(e.list_queues(Some("ord")), vec!["orders"]);
        assert_eq!(e.get_queue_url("orders").unwrap(), url);
        e.delete_queue("orders").unwrap();
        assert!(matches!(
            e.get_queue_url("orders"),
            Err(QueueError::QueueDoesNotExist(_))
        ));
    }

    #[test]
    fn duplicate_and_invalid_names_are_refused() {
        let (mut e, _) = engine();
        e.create_queue(QueueSpec::new("orders")).unwrap();
        assert!(matches!(
            e.create_queue(QueueSpec::new("orders")),
            Err(QueueError::QueueAlreadyExists(_))
        ));
        assert!(matches!(
            e.create_queue(QueueSpec::new("bad name")),
            Err(QueueError::InvalidQueueName { .. })
        ));
        assert_eq!(e.list_queues(None).len(), 1);
    }

    #[test]
    fn dead_letter_queue_guarded() {
        let (mut e, _) = engine();
        assert!(e
            .create_queue(QueueSpec::new("jobs").with_dead_letter_queue("missing", 3))
            .is_err());
        e.create_queue(QueueSpec::new("jobs-dlq")).unwrap();
        e.create_queue(QueueSpec::new("jobs").with_dead_letter_queue("jobs-dlq", 3))
            .unwrap();
        assert!(matches!(
            e.delete_queue("jobs-dlq"),
            Err(QueueError::QueueInUse { .. })
        ));
        e.create_queue(QueueSpec::new("fifo-dlq.fifo")).unwrap();
        assert!(e
            .update_queue(
                "jobs",
                &QueuePatch {
                    dead_letter_queue: Some(Some("fifo-dlq.fifo".into())),
                    ..QueuePatch::default()
                }
            )
            .is_err());
    }

    #[test]
    fn declared_queues_may_reference_later_dlq() {
        let config = QueueConfig {
            queues: vec![
                QueueSpec::new("jobs").with_dead_letter_queue("jobs-dlq", 2),
                QueueSpec::new("jobs-dlq"),
            ],
            ..QueueConfig::default()
        };
        let e = QueueEngine::new(EngineContext::new("s", SimClock::new(0)), config).unwrap();
        assert_eq!(
            e.queue("jobs").unwrap().spec().dead_letter_queue.as_deref(),
            Some("jobs-dlq")
        );
    }

    #[test]
    fn update_validates_before_applying() {
        let (mut e, _) = engine();
        e.create_queue(QueueSpec::new("q")).unwrap();
        let bad = QueuePatch {
            delay_sec: Some(10_000),
            ..QueuePatch::default()
        };
        assert!(e.update_queue("q", &bad).is_err());
        assert_eq!(e.queue("q").unwrap().spec().delay_sec, 0);

        let good = QueuePatch {
            visibility_timeout_sec: Some(5),
            ..QueuePatch::default()
        };
        assert_eq!(e.update_queue("q", &good).unwrap().visibility_timeout_sec, 5);
    }

    // ── Send / receive / delete ──────────────────────────────────────

    #[test]
    fn send_receive_delete() {
        let (mut e, _) = engine();
        e.create_queue(QueueSpec::new("q")).unwrap();
        let sent = e
            .send_message("q", SendRequest::new("hello").attribute("type", "greeting"))
            .unwrap();
        assert!(!sent.deduplicated);

        let got = e.receive_message("q", 10, None).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].message_id, sent.message_id);
        assert_eq!(got[0].attributes["type"], "greeting");
        assert_eq!(got[0].receive_count, 1);

        e.delete_message("q", &got[0].receipt_handle).unwrap();
        let metrics = e.get_queue_metrics("q").unwrap();
        assert_eq!(metrics.approximate_messages, 0);
        assert_eq!(metrics.approximate_messages_not_visible, 0);
        assert_eq!(metrics.counters.deleted, 1);
        assert!(e.delete_message("q", &got[0].receipt_handle).is_err());
    }

    #[test]
    fn oversized_message_rejected() {
        let (mut e, _) = engine();
        e.create_queue(QueueSpec::new("q")).unwrap();
        let result = e.send_message("q", SendRequest::new("x").size(256 * 1024 + 1));
        assert!(matches!(result, Err(QueueError::MessageTooLarge { .. })));
        assert_eq!(e.get_queue_metrics("q").unwrap().approximate_messages, 0);
    }

    #[test]
    fn send_to_missing_queue_fails() {
        let (mut e, _) = engine();
        assert!(e.send_message("nope", SendRequest::new("x")).is_err());
    }

    #[test]
    fn delay_hides_message_until_due() {
        let (mut e, clock) = engine();
        e.create_queue(QueueSpec::new("q").with_delay(10)).unwrap();
        e.send_message("q", SendRequest::new("later")).unwrap();
        let metrics = e.get_queue_metrics("q").unwrap();
        assert_eq!(metrics.approximate_messages_delayed, 1);
        assert_eq!(metrics.approximate_messages, 0);
        assert!(e.receive_message("q", 1, None).unwrap().is_empty());

        clock.advance_ms(10_000);
        assert_eq!(e.receive_message("q", 1, None).unwrap().len(), 1);
    }

    #[test]
    fn visibility_timeout_returns_message() {
        let (mut e, clock) = engine();
        e.create_queue(QueueSpec::new("q").with_visibility_timeout(1)).unwrap();
        e.send_message("q", SendRequest::new("work")).unwrap();
        e.receive_message("q", 1, None).unwrap();
        assert_eq!(e.get_queue_metrics("q").unwrap().approximate_messages_not_visible, 1);

        clock.advance_ms(2_000);
        let metrics = e.get_queue_metrics("q").unwrap();
        assert_eq!(metrics.approximate_messages, 1);
        assert_eq!(metrics.approximate_messages_not_visible, 0);
        let peek = e.peek_messages("q").unwrap();
        assert_eq!(peek[0].state, MessageState::Available);
        assert_eq!(peek[0].receive_count, 1);

        let again = e.receive_message("q", 1, None).unwrap();
        assert_eq!(again[0].receive_count, 2);
    }

    #[test]
    fn change_visibility_extends_and_releases() {
        let (mut e, clock) = engine();
        e.create_queue(QueueSpec::new("q").with_visibility_timeout(5)).unwrap();
        e.send_message("q", SendRequest::new("work")).unwrap();
        let receipt = e.receive_message("q", 1, None).unwrap()[0].receipt_handle.clone();

        e.change_message_visibility("q", &receipt, 60).unwrap();
        clock.advance_ms(10_000);
        assert_eq!(e.get_queue_metrics("q").unwrap().approximate_messages_not_visible, 1);

        e.change_message_visibility("q", &receipt, 0).unwrap();
        assert_eq!(e.get_queue_metrics("q").unwrap().approximate_messages, 1);
        assert!(e.change_message_visibility("q", &receipt, 50_000).is_err());
    }

    #[test]
    fn redrive_once_receive_count_exceeds_max() {
        let (mut e, clock) = engine();
        e.create_queue(QueueSpec::new("dlq")).unwrap();
        e.create_queue(
            QueueSpec::new("jobs")
                .with_visibility_timeout(1)
                .with_dead_letter_queue("dlq", 2),
        )
        .unwrap();
        let sent = e.send_message("jobs", SendRequest::new("poison")).unwrap();

        for _ in 0..2 {
            assert_eq!(e.receive_message("jobs", 1, None).unwrap().len(), 1);
            clock.advance_ms(1_000);
        }
        // Received exactly max_receive_count times: still redelivered.
        assert_eq!(e.get_queue_metrics("jobs").unwrap().approximate_messages, 1);
        assert_eq!(e.get_queue_metrics("dlq").unwrap().approximate_messages, 0);

        assert_eq!(e.receive_message("jobs", 1, None).unwrap()[0].receive_count, 3);
        clock.advance_ms(1_000);

        let jobs = e.get_queue_metrics("jobs").unwrap();
        assert_eq!(jobs.approximate_messages, 0);
        assert_eq!(jobs.counters.redriven, 1);
        let dlq = e.get_queue_metrics("dlq").unwrap();
        assert_eq!(dlq.approximate_messages, 1);

        let dead = e.receive_message("dlq", 1, None).unwrap();
        assert_eq!(dead[0].message_id, sent.message_id);
        assert_eq!(dead[0].receive_count, 1);
    }

    // ── FIFO ─────────────────────────────────────────────────────────

    #[test]
    fn fifo_requires_group_and_dedup() {
        let (mut e, _) = engine();
        e.create_queue(QueueSpec::new("q.fifo")).unwrap();
        assert!(matches!(
            e.send_message("q.fifo", SendRequest::new("x")),
            Err(QueueError::MissingGroupId(_))
        ));
        assert!(matches!(
            e.send_message("q.fifo", SendRequest::new("x").group("g")),
            Err(QueueError::MissingDedupId(_))
        ));
    }

    #[test]
    fn fifo_dedup_within_window() {
        let (mut e, clock) = engine();
        e.create_queue(QueueSpec::new("q.fifo")).unwrap();
        let first = e
            .send_message("q.fifo", SendRequest::new("a").group("g").dedup("d1"))
            .unwrap();
        let second = e
            .send_message("q.fifo", SendRequest::new("b").group("g").dedup("d1"))
            .unwrap();
        assert!(second.deduplicated);
        assert_eq!(second.message_id, first.message_id);
        let metrics = e.get_queue_metrics("q.fifo").unwrap();
        assert_eq!(metrics.approximate_messages, 1);
        assert_eq!(metrics.counters.deduplicated, 1);

        clock.advance_ms(5 * 60 * 1000);
        let third = e
            .send_message("q.fifo", SendRequest::new("c").group("g").dedup("d1"))
            .unwrap();
        assert!(!third.deduplicated);
        assert_eq!(e.get_queue_metrics("q.fifo").unwrap().approximate_messages, 2);
    }

    #[test]
    fn fifo_content_dedup() {
        let (mut e, _) = engine();
        e.create_queue(QueueSpec::new("q.fifo").with_dedup(true)).unwrap();
        let a = e.send_message("q.fifo", SendRequest::new("same").group("g")).unwrap();
        let b = e.send_message("q.fifo", SendRequest::new("same").group("g")).unwrap();
        assert_eq!(a.message_id, b.message_id);
        assert!(b.deduplicated);
    }

    #[test]
    fn fifo_group_order() {
        let (mut e, _) = engine();
        e.create_queue(QueueSpec::new("q.fifo").with_dedup(true)).unwrap();
        for body in ["1", "2", "3"] {
            e.send_message("q.fifo", SendRequest::new(body).group("g")).unwrap();
        }
        let first = e.receive_message("q.fifo", 1, None).unwrap();
        assert_eq!(first[0].body, "1");
        assert!(e.receive_message("q.fifo", 1, None).unwrap().is_empty());
        e.delete_message("q.fifo", &first[0].receipt_handle).unwrap();
        assert_eq!(e.receive_message("q.fifo", 1, None).unwrap()[0].body, "2");
    }

    // ── Commands and metrics ─────────────────────────────────────────

    #[test]
    fn command_surface() {
        let (mut e, _) = engine();
        let args = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(e.execute("CREATE", &args(&["tasks"])).success);
        assert!(e.execute("SEND", &args(&["tasks", "do-it"])).success);
        let received = e.execute("RECEIVE", &args(&["tasks"]));
        let receipt = received.value.unwrap()[0]["receipt_handle"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(e.execute("DEL", &[receipt]).as_i64(), Some(1));
        assert_eq!(
            e.execute("LIST", &[]).value.unwrap(),
            serde_json::json!(["tasks"])
        );
        assert!(!e.execute("FROB", &[]).success);
        assert!(!e.execute("SEND", &args(&["missing", "x"])).success);
    }

    #[test]
    fn engine_metrics_and_reset() {
        let (mut e, _) = engine();
        e.create_queue(QueueSpec::new("q")).unwrap();
        e.send_message("q", SendRequest::new("x")).unwrap();
        e.receive_message("q", 1, None).unwrap();
        e.receive_message("q", 1, None).unwrap();
        let snapshot = e.metrics();
        assert_eq!(snapshot.hit_count, 1);
        assert_eq!(snapshot.miss_count, 1);
        assert!(snapshot.latency_p50_ms > 0.0);

        e.reset_stats();
        let first = e.metrics();
        e.reset_stats();
        assert_eq!(first, e.metrics());
        assert_eq!(first.total_ops, 0);
        let metrics = e.get_queue_metrics("q").unwrap();
        assert_eq!(metrics.counters.sent, 0);
        assert_eq!(metrics.approximate_messages_not_visible, 1);
    }

    #[test]
    fn reconfigure_renames_declared_queue() {
        let clock = SimClock::new(0);
        let config = QueueConfig {
            queues: vec![QueueSpec::new("old")],
            ..QueueConfig::default()
        };
        let mut e = QueueEngine::new(EngineContext::new("s", clock), config).unwrap();
        e.create_queue(QueueSpec::new("runtime")).unwrap();
        e.send_message("runtime", SendRequest::new("keep")).unwrap();

        let outcome = e
            .reconfigure(&serde_json::json!({"queues": [{"name": "new"}]}))
            .unwrap();
        assert_eq!(outcome, Reconfigure::Applied);
        assert_eq!(e.list_queues(None), vec!["new", "runtime"]);
        assert_eq!(e.get_queue_metrics("runtime").unwrap().approximate_messages, 1);

        let outcome = e
            .reconfigure(&serde_json::json!({"region": "eu-west-1"}))
            .unwrap();
        assert_eq!(outcome, Reconfigure::RequiresRebuild);
    }

    #[test]
    fn rejected_reconfigure_changes_nothing() {
        let clock = SimClock::new(0);
        let config = QueueConfig {
            queues: vec![QueueSpec::new("a"), QueueSpec::new("b")],
            ..QueueConfig::default()
        };
        let mut e = QueueEngine::new(EngineContext::new("s", clock), config).unwrap();
        e.send_message("b", SendRequest::new("keep")).unwrap();

        let result = e.reconfigure(&serde_json::json!({"queues": [
            {"name": "a", "visibility_timeout_sec": 99},
            {"name": "bad name!"}
        ]}));
        assert!(result.is_err());
        assert_eq!(e.list_queues(None), vec!["a", "b"]);
        assert_eq!(e.queue("a").unwrap().spec().visibility_timeout_sec, 30);
        assert_eq!(e.get_queue_metrics("b").unwrap().approximate_messages, 1);
    }

    #[test]
    fn reconfigure_rejects_dead_letter_queue_being_removed() {
        let clock = SimClock::new(0);
        let config = QueueConfig {
            queues: vec![QueueSpec::new("jobs"), QueueSpec::new("dlq")],
            ..QueueConfig::default()
        };
        let mut e = QueueEngine::new(EngineContext::new("s", clock), config).unwrap();

        let result = e.reconfigure(&serde_json::json!({"queues": [
            {"name": "jobs", "dead_letter_queue": "dlq", "max_receive_count": 3}
        ]}));
        assert!(result.is_err());
        assert_eq!(e.list_queues(None), vec!["dlq", "jobs"]);
        assert_eq!(e.queue("jobs").unwrap().spec().dead_letter_queue, None);

        let result = e.reconfigure(&serde_json::json!({"queues": [
            {"name": "jobs", "dead_letter_queue": "dlq.fifo"},
            {"name": "dlq.fifo"}
        ]}));
        assert!(result.is_err());
        assert_eq!(e.list_queues(None), vec!["dlq", "jobs"]);
    }
}
