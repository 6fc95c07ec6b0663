//! infrasim-columnar — a ClickHouse-like columnar engine.
//!
//! Statements are classified, not executed. `CREATE TABLE` and `DROP TABLE`
//! change the catalog; `INSERT` grows a table's row and byte counters;
//! everything else is accounted as a read against the tables it names,
//! with latency proportional to the rows scanned. Every statement lands in
//! a bounded query log whose `running`/`completed` status is derived from
//! the simulated clock.

pub mod config;
pub mod engine;
pub mod error;
pub mod query_log;
pub mod sql;
pub mod table;

pub use config::{Column, ColumnarConfig, TableEngine, TableSpec};
pub use engine::{ColumnarEngine, ColumnarMetrics, QueryCounters, QueryResult};
pub use error::{ColumnarError, ColumnarResult};
pub use query_log::{QueryLogEntry, QueryRecord, QueryStatus};
pub use sql::{Statement, StatementParser, TableRef};
pub use table::{Catalog, Table};
