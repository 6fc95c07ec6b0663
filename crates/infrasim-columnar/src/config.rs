//! Columnar node configuration and table declarations.

use std::fmt;

use serde::{Deserialize, Serialize};

use infrasim_core::units::deserialize_bytes;

/// Table storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TableEngine {
    #[default]
    MergeTree,
    ReplacingMergeTree,
    SummingMergeTree,
    AggregatingMergeTree,
    CollapsingMergeTree,
    ReplicatedMergeTree,
    Distributed,
    Memory,
    Log,
    TinyLog,
}

impl TableEngine {
    const ALL: [TableEngine; 10] = [
        Self::MergeTree,
        Self::ReplacingMergeTree,
        Self::SummingMergeTree,
        Self::AggregatingMergeTree,
        Self::CollapsingMergeTree,
        Self::ReplicatedMergeTree,
        Self::Distributed,
        Self::Memory,
        Self::Log,
        Self::TinyLog,
    ];

    /// Case-insensitive lookup by engine name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(name))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MergeTree => "MergeTree",
            Self::ReplacingMergeTree => "ReplacingMergeTree",
            Self::SummingMergeTree => "SummingMergeTree",
            Self::AggregatingMergeTree => "AggregatingMergeTree",
            Self::CollapsingMergeTree => "CollapsingMergeTree",
            Self::ReplicatedMergeTree => "ReplicatedMergeTree",
            Self::Distributed => "Distributed",
            Self::Memory => "Memory",
            Self::Log => "Log",
            Self::TinyLog => "TinyLog",
        }
    }

    /// Whether the engine belongs to the MergeTree family (partitioned storage).
    pub fn is_merge_tree(&self) -> bool {
        self.as_str().ends_with("MergeTree")
    }
}

impl fmt::Display for TableEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

/// A table declared on the node, created when the engine is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSpec {
    pub name: String,
    pub engine: TableEngine,
    pub columns: Vec<Column>,
    pub rows: u64,
    #[serde(deserialize_with = "deserialize_bytes")]
    pub size_bytes: u64,
    pub partitions: u32,
}

impl Default for TableSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            engine: TableEngine::MergeTree,
            columns: Vec::new(),
            rows: 0,
            size_bytes: 0,
            partitions: 1,
        }
    }
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_rows(mut self, rows: u64, size_bytes: u64) -> Self {
        self.rows = rows;
        self.size_bytes = size_bytes;
        self
    }
}

/// Configuration for a columnar node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnarConfig {
    pub database: String,
    pub tables: Vec<TableSpec>,
    /// Simulated scan speed; drives SELECT latency.
    pub scan_rows_per_ms: u64,
    /// Simulated ingest speed; drives INSERT latency.
    pub insert_rows_per_ms: u64,
    /// Entries retained in the query log.
    pub query_log_capacity: usize,
}

impl Default for ColumnarConfig {
    fn default() -> Self {
        Self {
            database: "default".to_string(),
            tables: Vec::new(),
            scan_rows_per_ms: 100_000,
            insert_rows_per_ms: 20_000,
            query_log_capacity: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_names_are_case_insensitive() {
        assert_eq!(TableEngine::from_name("mergetree"), Some(TableEngine::MergeTree));
        assert_eq!(TableEngine::from_name("TinyLog"), Some(TableEngine::TinyLog));
        assert_eq!(TableEngine::from_name("InnoDB"), None);
        assert!(TableEngine::ReplacingMergeTree.is_merge_tree());
        assert!(!TableEngine::Memory.is_merge_tree());
    }

    #[test]
    fn parses_node_config() {
        let cfg: ColumnarConfig = serde_json::from_value(serde_json::json!({
            "database": "analytics",
            "tables": [
                {"name": "events", "rows": 1000000, "size_bytes": "64mb", "partitions": 12},
                {"name": "sessions", "engine": "ReplacingMergeTree"}
            ]
        }))
        .unwrap();
        assert_eq!(cfg.database, "analytics");
        assert_eq!(cfg.tables[0].size_bytes, 64 * 1024 * 1024);
        assert_eq!(cfg.tables[1].engine, TableEngine::ReplacingMergeTree);
        assert_eq!(cfg.tables[1].partitions, 1);
        assert_eq!(cfg.scan_rows_per_ms, 100_000);
    }
}
