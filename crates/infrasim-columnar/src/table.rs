//! The table catalog of one database.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{Column, TableEngine, TableSpec};
use crate::error::{ColumnarError, ColumnarResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub database: String,
    pub engine: TableEngine,
    pub columns: Vec<Column>,
    pub row_count: u64,
    pub size_bytes: u64,
    pub partition_count: u32,
    /// Partitioned MergeTree tables gain a partition per insert batch.
    #[serde(default)]
    pub partitioned: bool,
    pub created_at_ms: u64,
    pub modified_at_ms: u64,
}

impl Table {
    pub fn from_spec(database: &str, spec: &TableSpec, now_ms: u64) -> Self {
        Self {
            name: spec.name.clone(),
            database: database.to_string(),
            engine: spec.engine,
            columns: spec.columns.clone(),
            row_count: spec.rows,
            size_bytes: spec.size_bytes,
            partition_count: spec.partitions.max(1),
            partitioned: spec.engine.is_merge_tree() && spec.partitions > 1,
            created_at_ms: now_ms,
            modified_at_ms: now_ms,
        }
    }

    /// Average stored bytes per row, 0 for an empty table.
    pub fn bytes_per_row(&self) -> u64 {
        self.size_bytes.checked_div(self.row_count).unwrap_or(0)
    }

    pub(crate) fn append(&mut self, rows: u64, bytes: u64, now_ms: u64) {
        self.row_count += rows;
        self.size_bytes += bytes;
        self.modified_at_ms = now_ms;
    }

    pub(crate) fn truncate(&mut self, now_ms: u64) {
        self.row_count = 0;
        self.size_bytes = 0;
        self.modified_at_ms = now_ms;
    }
}

/// Tables of one database, keyed by name.
#[derive(Debug, Default)]
pub struct Catalog {
    database: String,
    tables: BTreeMap<String, Table>,
}

impl Catalog {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            tables: BTreeMap::new(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn unknown(&self, name: &str) -> ColumnarError {
        ColumnarError::UnknownTable {
            database: self.database.clone(),
            table: name.to_string(),
        }
    }

    pub fn create(&mut self, table: Table) -> ColumnarResult<()> {
        if self.tables.contains_key(&table.name) {
            return Err(ColumnarError::TableExists {
                database: self.database.clone(),
                table: table.name,
            });
        }
        self.tables.insert(table.name.clone(), table);
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> ColumnarResult<Table> {
        self.tables.remove(name).ok_or_else(|| self.unknown(name))
    }

    pub fn get(&self, name: &str) -> ColumnarResult<&Table> {
        self.tables.get(name).ok_or_else(|| self.unknown(name))
    }

    pub fn get_mut(&mut self, name: &str) -> ColumnarResult<&mut Table> {
        match self.tables.get_mut(name) {
            Some(table) => Ok(table),
            None => Err(ColumnarError::UnknownTable {
                database: self.database.clone(),
                table: name.to_string(),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn total_rows(&self) -> u64 {
        self.tables.values().map(|t| t.row_count).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.tables.values().map(|t| t.size_bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_get_drop() {
        let mut catalog = Catalog::new("default");
        catalog
            .create(Table::from_spec("default", &TableSpec::new("events").with_rows(10, 640), 0))
            .unwrap();
        assert_eq!(catalog.get("events").unwrap().bytes_per_row(), 64);
        assert!(matches!(
            catalog.create(Table::from_spec("default", &TableSpec::new("events"), 0)),
            Err(ColumnarError::TableExists { .. })
        ));
        catalog.drop_table("events").unwrap();
        assert_eq!(
            catalog.get("events").unwrap_err().to_string(),
            "Code: 60. DB::Exception: Table default.events does not exist. (UNKNOWN_TABLE)"
        );
    }

    #[test]
    fn totals_and_truncate() {
        let mut catalog = Catalog::new("default");
        catalog
            .create(Table::from_spec("default", &TableSpec::new("a").with_rows(5, 50), 0))
            .unwrap();
        catalog
            .create(Table::from_spec("default", &TableSpec::new("b").with_rows(7, 70), 0))
            .unwrap();
        assert_eq!(catalog.total_rows(), 12);
        assert_eq!(catalog.total_bytes(), 120);
        catalog.get_mut("a").unwrap().truncate(5);
        assert_eq!(catalog.total_rows(), 7);
        assert_eq!(catalog.get("a").unwrap().bytes_per_row(), 0);
    }
}
