//! Bounded log of executed statements.
//!
//! An entry's status is derived from the clock: a successful statement is
//! `running` until its simulated duration has elapsed, then `completed`.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub id: u64,
    pub text: String,
    /// Operation class (`select`, `insert`, `create`, ...).
    pub kind: String,
    pub started_at_ms: u64,
    pub duration_ms: f64,
    pub rows_read: u64,
    pub rows_written: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryLogEntry {
    pub fn status(&self, now_ms: u64) -> QueryStatus {
        if self.error.is_some() {
            QueryStatus::Failed
        } else if (now_ms as f64) < self.started_at_ms as f64 + self.duration_ms {
            QueryStatus::Running
        } else {
            QueryStatus::Completed
        }
    }
}

/// A log entry with its status resolved at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    #[serde(flatten)]
    pub entry: QueryLogEntry,
    pub status: QueryStatus,
}

#[derive(Debug)]
pub struct QueryLog {
    entries: VecDeque<QueryLogEntry>,
    capacity: usize,
    next_id: u64,
}

impl QueryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            next_id: 1,
        }
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Append an entry, assigning its id. The oldest entry is dropped when
    /// the log is full.
    pub fn append(&mut self, mut entry: QueryLogEntry) -> u64 {
        entry.id = self.next_id;
        self.next_id += 1;
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        let id = entry.id;
        self.entries.push_back(entry);
        id
    }

    /// The most recent `limit` entries, newest first.
    pub fn recent(&self, limit: usize, now_ms: u64) -> Vec<QueryRecord> {
        self.entries
            .iter()
            .rev()
            .take(limit)
            .map(|e| QueryRecord {
                entry: e.clone(),
                status: e.status(now_ms),
            })
            .collect()
    }

    pub fn running(&self, now_ms: u64) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status(now_ms) == QueryStatus::Running)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
