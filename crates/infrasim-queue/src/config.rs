//! Queue node configuration and per-queue attributes.

use serde::{Deserialize, Serialize};

/// Default per-message size limit (256 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    #[default]
    Standard,
    Fifo,
}

impl QueueKind {
    /// Infer the kind from the `.fifo` name suffix.
    pub fn from_name(name: &str) -> Self {
        if name.ends_with(".fifo") {
            Self::Fifo
        } else {
            Self::Standard
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Fifo => "fifo",
        }
    }
}

/// Attributes of one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSpec {
    pub name: String,
    /// `None` infers the kind from the name suffix.
    pub kind: Option<QueueKind>,
    pub visibility_timeout_sec: u64,
    pub retention_days: u64,
    pub delay_sec: u64,
    pub max_receive_count: u32,
    /// Name of the queue that receives messages past `max_receive_count`.
    pub dead_letter_queue: Option<String>,
    /// Content-based deduplication (FIFO only).
    pub dedup_enabled: bool,
    pub max_message_size: u64,
}

impl Default for QueueSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: None,
            visibility_timeout_sec: 30,
            retention_days: 4,
            delay_sec: 0,
            max_receive_count: 10,
            dead_letter_queue: None,
            dedup_enabled: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl QueueSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind.unwrap_or_else(|| QueueKind::from_name(&self.name))
    }

    pub fn with_visibility_timeout(mut self, secs: u64) -> Self {
        self.visibility_timeout_sec = secs;
        self
    }

    pub fn with_delay(mut self, secs: u64) -> Self {
        self.delay_sec = secs;
        self
    }

    pub fn with_dead_letter_queue(mut self, dlq: impl Into<String>, max_receive_count: u32) -> Self {
        self.dead_letter_queue = Some(dlq.into());
        self.max_receive_count = max_receive_count;
        self
    }

    pub fn with_dedup(mut self, enabled: bool) -> Self {
        self.dedup_enabled = enabled;
        self
    }

    /// Apply a patch, returning the updated attributes.
    pub fn patched(&self, patch: &QueuePatch) -> Self {
        let mut next = self.clone();
        if let Some(v) = patch.visibility_timeout_sec {
            next.visibility_timeout_sec = v;
        }
        if let Some(v) = patch.retention_days {
            next.retention_days = v;
        }
        if let Some(v) = patch.delay_sec {
            next.delay_sec = v;
        }
        if let Some(v) = patch.max_receive_count {
            next.max_receive_count = v;
        }
        if let Some(v) = &patch.dead_letter_queue {
            next.dead_letter_queue = v.clone();
        }
        if let Some(v) = patch.dedup_enabled {
            next.dedup_enabled = v;
        }
        if let Some(v) = patch.max_message_size {
            next.max_message_size = v;
        }
        next
    }
}

/// A partial attribute update (`updateQueue`). Absent fields are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuePatch {
    pub visibility_timeout_sec: Option<u64>,
    pub retention_days: Option<u64>,
    pub delay_sec: Option<u64>,
    pub max_receive_count: Option<u32>,
    /// `Some(None)` (JSON `null`) removes the redrive policy.
    #[serde(deserialize_with = "deserialize_some")]
    pub dead_letter_queue: Option<Option<String>>,
    pub dedup_enabled: Option<bool>,
    pub max_message_size: Option<u64>,
}

/// Distinguish an explicit `null` from an absent field.
fn deserialize_some<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl QueuePatch {
    /// A patch that sets every attribute of `spec`.
    pub fn from_spec(spec: &QueueSpec) -> Self {
        Self {
            visibility_timeout_sec: Some(spec.visibility_timeout_sec),
            retention_days: Some(spec.retention_days),
            delay_sec: Some(spec.delay_sec),
            max_receive_count: Some(spec.max_receive_count),
            dead_letter_queue: Some(spec.dead_letter_queue.clone()),
            dedup_enabled: Some(spec.dedup_enabled),
            max_message_size: Some(spec.max_message_size),
        }
    }
}

/// Configuration for a queue node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub region: String,
    pub account_id: String,
    /// Queues created when the engine is built.
    pub queues: Vec<QueueSpec>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            account_id: "000000000000".to_string(),
            queues: Vec::new(),
        }
    }
}
