//! Bounded slowlog, newest entry first on read.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// One slow command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowlogEntry {
    pub id: u64,
    /// Simulated time the command ran, in seconds.
    pub timestamp: u64,
    pub duration_us: u64,
    /// Command name followed by its arguments.
    pub command: Vec<String>,
    pub client_addr: String,
    pub client_name: String,
}

#[derive(Debug)]
pub struct Slowlog {
    entries: VecDeque<SlowlogEntry>,
    max_len: usize,
    threshold_us: u64,
    next_id: u64,
}

impl Slowlog {
    pub fn new(threshold_ms: u64, max_len: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len,
            threshold_us: threshold_ms * 1000,
            next_id: 0,
        }
    }

    pub fn configure(&mut self, threshold_ms: u64, max_len: usize) {
        self.threshold_us = threshold_ms * 1000;
        self.max_len = max_len;
        self.entries.truncate(max_len);
    }

    /// Log the command if `duration_us` exceeds the threshold.
    /// Returns true if it was logged.
    pub fn observe(
        &mut self,
        timestamp: u64,
        duration_us: u64,
        command: Vec<String>,
        client_addr: &str,
        client_name: &str,
    ) -> bool {
        if duration_us <= self.threshold_us || self.max_len == 0 {
            return false;
        }
        let entry = SlowlogEntry {
            id: self.next_id,
            timestamp,
            duration_us,
            command,
            client_addr: client_addr.to_string(),
            client_name: client_name.to_string(),
        };
        self.next_id += 1;
        self.entries.push_front(entry);
        self.entries.truncate(self.max_len);
        true
    }

    /// Up to `count` most recent entries, newest first.
    pub fn get(&self, count: usize) -> Vec<SlowlogEntry> {
        self.entries.iter().take(count).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}
