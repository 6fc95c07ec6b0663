//! One queue: its messages, dedup window and counters.
//!
//! Message state is never stored as a flag. Whether a message is
//! available, in flight or delayed is derived from its deadlines and the
//! current simulated time, so the approximate counts can't drift from the
//! messages they describe.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::{QueueKind, QueueSpec};
use crate::error::{QueueError, QueueResult};
use crate::ids::IdGen;

/// Window during which a FIFO dedup id suppresses repeats.
pub const DEDUP_WINDOW_MS: u64 = 5 * 60 * 1000;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Where a message is in its lifecycle at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Available,
    InFlight,
    Delayed,
}

/// A stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub body: String,
    pub size_bytes: u64,
    pub attributes: BTreeMap<String, String>,
    pub group_id: Option<String>,
    pub dedup_id: Option<String>,
    /// FIFO sequence number.
    pub sequence_number: Option<u64>,
    pub enqueued_at_ms: u64,
    /// In-flight deadline; meaningful only while `receipt_handle` is set.
    pub visible_at_ms: u64,
    pub receive_count: u32,
    pub delay_until_ms: Option<u64>,
    pub receipt_handle: Option<String>,
    pub first_received_at_ms: Option<u64>,
}

impl Message {
    pub fn state(&self, now_ms: u64) -> MessageState {
        if self.receipt_handle.is_some() && now_ms < self.visible_at_ms {
            MessageState::InFlight
        } else if self.delay_until_ms.is_some_and(|d| now_ms < d) {
            MessageState::Delayed
        } else {
            MessageState::Available
        }
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub attributes: BTreeMap<String, String>,
    pub receive_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
    pub sent_at_ms: u64,
}

/// A message as shown by the queue browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub message_id: String,
    pub body: String,
    pub size_bytes: u64,
    pub state: MessageState,
    pub receive_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub enqueued_at_ms: u64,
}

/// Monotonic per-queue counters, zeroed by `reset_stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounters {
    pub sent: u64,
    pub received: u64,
    pub deleted: u64,
    pub deduplicated: u64,
    /// Messages moved out to the dead-letter queue.
    pub redriven: u64,
    /// Messages dropped after the retention period.
    pub expired: u64,
    pub empty_receives: u64,
}

/// Point-in-time view of one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub name: String,
    pub url: String,
    pub kind: QueueKind,
    pub approximate_messages: usize,
    pub approximate_messages_not_visible: usize,
    pub approximate_messages_delayed: usize,
    pub oldest_message_age_secs: u64,
    pub visibility_timeout_sec: u64,
    pub delay_sec: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_queue: Option<String>,
    #[serde(flatten)]
    pub counters: QueueCounters,
}

#[derive(Debug, Clone)]
struct DedupRecord {
    message_id: String,
    accepted_at_ms: u64,
}

/// A queue and everything it owns.
#[derive(Debug)]
pub struct Queue {
    pub(crate) spec: QueueSpec,
    pub(crate) url: String,
    pub(crate) created_at_ms: u64,
    messages: VecDeque<Message>,
    dedup: HashMap<String, DedupRecord>,
    next_sequence: u64,
    pub(crate) counters: QueueCounters,
}

impl Queue {
    pub(crate) fn new(spec: QueueSpec, url: String, now_ms: u64) -> Self {
        Self {
            spec,
            url,
            created_at_ms: now_ms,
            messages: VecDeque::new(),
            dedup: HashMap::new(),
            next_sequence: 1,
            counters: QueueCounters::default(),
        }
    }

    pub fn spec(&self) -> &QueueSpec {
        &self.spec
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> QueueKind {
        self.spec.kind()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The message id accepted under `dedup_id` within the window, if any.
    pub(crate) fn find_duplicate(&mut self, dedup_id: &str, now_ms: u64) -> Option<String> {
        self.dedup
            .retain(|_, r| now_ms < r.accepted_at_ms + DEDUP_WINDOW_MS);
        self.dedup.get(dedup_id).map(|r| r.message_id.clone())
    }

    /// Append a new message. Applies the queue delay and assigns FIFO
    /// sequence numbers.
    pub(crate) fn enqueue(&mut self, mut message: Message, now_ms: u64) -> Option<u64> {
        if self.spec.delay_sec > 0 {
            message.delay_until_ms = Some(now_ms + self.spec.delay_sec * 1000);
        }
        message.enqueued_at_ms = now_ms;
        message.visible_at_ms = now_ms;
        if self.kind() == QueueKind::Fifo {
            message.sequence_number = Some(self.next_sequence);
            self.next_sequence += 1;
        }
        if let Some(dedup_id) = &message.dedup_id {
            self.dedup.insert(
                dedup_id.clone(),
                DedupRecord {
                    message_id: message.id.clone(),
                    accepted_at_ms: now_ms,
                },
            );
        }
        let sequence = message.sequence_number;
        self.messages.push_back(message);
        self.counters.sent += 1;
        sequence
    }

    /// Accept a message redriven from another queue. Keeps its id,
    /// original enqueue time and attributes; it is available immediately.
    pub(crate) fn accept_redrive(&mut self, mut message: Message, now_ms: u64) {
        message.receipt_handle = None;
        message.receive_count = 0;
        message.delay_until_ms = None;
        message.visible_at_ms = now_ms;
        message.sequence_number = match self.kind() {
            QueueKind::Fifo => {
                let seq = self.next_sequence;
                self.next_sequence += 1;
                Some(seq)
            }
            QueueKind::Standard => None,
        };
        self.messages.push_back(message);
    }

    /// Deliver up to `max` available messages.
    ///
    /// FIFO queues deliver in enqueue order within a group, and a group
    /// with a message in flight (or still delayed) is skipped entirely.
    pub(crate) fn receive(
        &mut self,
        max: usize,
        visibility_sec: u64,
        now_ms: u64,
        ids: &mut IdGen,
    ) -> Vec<ReceivedMessage> {
        let fifo = self.kind() == QueueKind::Fifo;
        let mut blocked: HashSet<String> = HashSet::new();
        let mut delivered = Vec::new();

        for message in self.messages.iter_mut() {
            if delivered.len() >= max {
                break;
            }
            let state = message.state(now_ms);
            if fifo {
                let group = message.group_id.clone().unwrap_or_default();
                if blocked.contains(&group) {
                    continue;
                }
                if state != MessageState::Available {
                    blocked.insert(group);
                    continue;
                }
            } else if state != MessageState::Available {
                continue;
            }

            let receipt = ids.receipt_handle(&message.id);
            message.receipt_handle = Some(receipt.clone());
            message.visible_at_ms = now_ms + visibility_sec * 1000;
            message.receive_count += 1;
            message.first_received_at_ms.get_or_insert(now_ms);
            delivered.push(ReceivedMessage {
                message_id: message.id.clone(),
                receipt_handle: receipt,
                body: message.body.clone(),
                attributes: message.attributes.clone(),
                receive_count: message.receive_count,
                group_id: message.group_id.clone(),
                sequence_number: message.sequence_number,
                sent_at_ms: message.enqueued_at_ms,
            });
        }

        self.counters.received += delivered.len() as u64;
        if delivered.is_empty() {
            self.counters.empty_receives += 1;
        }
        delivered
    }

    fn position_of_receipt(&self, receipt: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt))
    }

    /// Whether some message currently carries `receipt`.
    pub(crate) fn has_receipt(&self, receipt: &str) -> bool {
        self.position_of_receipt(receipt).is_some()
    }

    pub(crate) fn delete(&mut self, receipt: &str) -> QueueResult<Message> {
        let idx = self
            .position_of_receipt(receipt)
            .ok_or_else(|| QueueError::ReceiptHandleInvalid(receipt.to_string()))?;
        let message = self
            .messages
            .remove(idx)
            .ok_or_else(|| QueueError::ReceiptHandleInvalid(receipt.to_string()))?;
        self.counters.deleted += 1;
        Ok(message)
    }

    pub(crate) fn change_visibility(
        &mut self,
        receipt: &str,
        visibility_sec: u64,
        now_ms: u64,
    ) -> QueueResult<()> {
        let idx = self
            .position_of_receipt(receipt)
            .ok_or_else(|| QueueError::ReceiptHandleInvalid(receipt.to_string()))?;
        let message = &mut self.messages[idx];
        if message.state(now_ms) != MessageState::InFlight {
            return Err(QueueError::MessageNotInflight(receipt.to_string()));
        }
        message.visible_at_ms = now_ms + visibility_sec * 1000;
        Ok(())
    }

    pub(crate) fn purge(&mut self) -> usize {
        let n = self.messages.len();
        self.messages.clear();
        n
    }

    /// Drop messages older than the retention period.
    pub(crate) fn expire_retention(&mut self, now_ms: u64) -> usize {
        let retention_ms = self.spec.retention_days * DAY_MS;
        let before = self.messages.len();
        self.messages
            .retain(|m| now_ms < m.enqueued_at_ms + retention_ms);
        let dropped = before - self.messages.len();
        self.counters.expired += dropped as u64;
        dropped
    }

    /// Return in-flight messages whose visibility deadline has passed to
    /// the available pool. Messages received more than
    /// `max_receive_count` times are removed and returned for redrive when
    /// `redrive` is true.
    pub(crate) fn release_expired(&mut self, now_ms: u64, redrive: bool) -> Vec<Message> {
        let max_receive = self.spec.max_receive_count;
        let mut moved = Vec::new();
        let mut kept = VecDeque::with_capacity(self.messages.len());
        for mut message in self.messages.drain(..) {
            let expired = message.receipt_handle.is_some() && now_ms >= message.visible_at_ms;
            if expired {
                message.receipt_handle = None;
                if redrive && message.receive_count > max_receive {
                    moved.push(message);
                    continue;
                }
            }
            kept.push_back(message);
        }
        self.messages = kept;
        self.counters.redriven += moved.len() as u64;
        moved
    }

    pub(crate) fn messages(&self, now_ms: u64) -> Vec<MessageInfo> {
        self.messages
            .iter()
            .map(|m| MessageInfo {
                message_id: m.id.clone(),
                body: m.body.clone(),
                size_bytes: m.size_bytes,
                state: m.state(now_ms),
                receive_count: m.receive_count,
                group_id: m.group_id.clone(),
                enqueued_at_ms: m.enqueued_at_ms,
            })
            .collect()
    }

    /// Counts derived by scanning message state at `now_ms`.
    pub fn metrics(&self, now_ms: u64) -> QueueMetrics {
        let mut available = 0;
        let mut in_flight = 0;
        let mut delayed = 0;
        for message in &self.messages {
            match message.state(now_ms) {
                MessageState::Available => available += 1,
                MessageState::InFlight => in_flight += 1,
                MessageState::Delayed => delayed += 1,
            }
        }
        let oldest = self
            .messages
            .iter()
            .map(|m| m.enqueued_at_ms)
            .min()
            .map(|t| now_ms.saturating_sub(t) / 1000)
            .unwrap_or(0);
        QueueMetrics {
            name: self.spec.name.clone(),
            url: self.url.clone(),
            kind: self.kind(),
            approximate_messages: available,
            approximate_messages_not_visible: in_flight,
            approximate_messages_delayed: delayed,
            oldest_message_age_secs: oldest,
            visibility_timeout_sec: self.spec.visibility_timeout_sec,
            delay_sec: self.spec.delay_sec,
            dead_letter_queue: self.spec.dead_letter_queue.clone(),
            counters: self.counters.clone(),
        }
    }
}
