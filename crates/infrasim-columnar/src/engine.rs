//! The columnar engine: statement accounting over a table catalog.

use std::any::Any;

use infrasim_core::{
    decode_config, CommandResult, ComponentKind, CoreError, CoreResult, EngineContext,
    Reconfigure, RoutingEngine, SimClock,
};
use infrasim_metrics::{MetricsAccumulator, MetricsSnapshot};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ColumnarConfig, TableSpec};
use crate::error::{ColumnarError, ColumnarResult};
use crate::query_log::{QueryLog, QueryLogEntry, QueryRecord};
use crate::sql::{Statement, StatementParser, TableRef};
use crate::table::{Catalog, Table};

const PARSE_COST_US: u64 = 200;
const CREATE_COST_US: u64 = 8_000;
const DROP_COST_US: u64 = 4_000;
const TRUNCATE_COST_US: u64 = 3_000;
const INSERT_BASE_US: u64 = 1_500;
const SELECT_BASE_US: u64 = 500;
const MISC_COST_US: u64 = 300;

/// Database holding the read-only introspection tables.
const SYSTEM_DATABASE: &str = "system";

/// Outcome of one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub query_id: u64,
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    pub rows_read: u64,
    pub bytes_read: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a successfully accounted statement did.
#[derive(Debug, Default)]
struct Accounted {
    cost_us: u64,
    rows_affected: Option<u64>,
    rows_read: u64,
    bytes_read: u64,
    rows_written: u64,
    bytes_written: u64,
    data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCounters {
    pub total_queries: u64,
    pub failed_queries: u64,
    pub rows_read: u64,
    pub bytes_read: u64,
    pub rows_written: u64,
    pub bytes_written: u64,
}

/// Everything the columnar panel shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnarMetrics {
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    pub database: String,
    pub table_count: usize,
    pub total_rows: u64,
    pub total_bytes: u64,
    pub running_queries: usize,
    #[serde(flatten)]
    pub counters: QueryCounters,
    pub qps: f64,
}

pub struct ColumnarEngine {
    component_id: String,
    clock: SimClock,
    config: ColumnarConfig,
    parser: StatementParser,
    catalog: Catalog,
    log: QueryLog,
    counters: QueryCounters,
    metrics: MetricsAccumulator,
}

impl ColumnarEngine {
    pub fn new(ctx: EngineContext, config: ColumnarConfig) -> ColumnarResult<Self> {
        let now = ctx.clock.now_ms();
        let mut engine = Self {
            component_id: ctx.component_id,
            clock: ctx.clock,
            parser: StatementParser::new()?,
            catalog: Catalog::new(config.database.clone()),
            log: QueryLog::new(config.query_log_capacity),
            counters: QueryCounters::default(),
            metrics: MetricsAccumulator::new(now),
            config,
        };
        let declared = engine.config.tables.clone();
        engine.declare_tables(&declared)?;
        debug!(
            component = %engine.component_id,
            database = %engine.catalog.database(),
            tables = engine.catalog.len(),
            "columnar engine created"
        );
        Ok(engine)
    }

    pub fn from_node(ctx: EngineContext, config: &serde_json::Value) -> CoreResult<Self> {
        let component_id = ctx.component_id.clone();
        let config: ColumnarConfig = decode_config(&component_id, config)?;
        Self::new(ctx, config).map_err(|e| CoreError::invalid_config(&component_id, e))
    }

    /// Create declared tables that do not exist yet.
    fn declare_tables(&mut self, specs: &[TableSpec]) -> ColumnarResult<()> {
        let now = self.clock.now_ms();
        for spec in specs {
            if spec.name.is_empty() {
                return Err(ColumnarError::Syntax("declared table has no name".into()));
            }
            if !self.catalog.contains(&spec.name) {
                self.catalog
                    .create(Table::from_spec(self.catalog.database(), spec, now))?;
            }
        }
        Ok(())
    }

    /// Run one statement, log it and return its outcome. Never panics and
    /// never leaves the catalog half-changed.
    pub fn execute_query(&mut self, text: &str) -> QueryResult {
        let now = self.clock.now_ms();
        let parsed = self.parser.parse(text);
        let op = parsed.as_ref().map_or("invalid", Statement::op_name);
        let outcome = parsed.and_then(|stmt| self.account(stmt, now));

        let (cost_us, error) = match &outcome {
            Ok(done) => (done.cost_us, None),
            Err(e) => (PARSE_COST_US, Some(e.to_string())),
        };
        let latency_ms = cost_us as f64 / 1000.0;
        self.metrics.record(op, cost_us, outcome.is_ok());
        self.metrics.record_bytes(text.len() as u64, 0);
        self.counters.total_queries += 1;

        let done = match outcome {
            Ok(done) => done,
            Err(_) => {
                self.counters.failed_queries += 1;
                Accounted::default()
            }
        };
        self.counters.rows_read += done.rows_read;
        self.counters.bytes_read += done.bytes_read;
        self.counters.rows_written += done.rows_written;
        self.counters.bytes_written += done.bytes_written;
        self.metrics.record_bytes(done.bytes_written, done.bytes_read);

        let query_id = self.log.append(QueryLogEntry {
            id: 0,
            text: text.trim().to_string(),
            kind: op.to_string(),
            started_at_ms: now,
            duration_ms: latency_ms,
            rows_read: done.rows_read,
            rows_written: done.rows_written,
            error: error.clone(),
        });
        if let Some(err) = &error {
            debug!(component = %self.component_id, query_id, error = %err, "query failed");
        }

        QueryResult {
            success: error.is_none(),
            query_id,
            latency_ms,
            rows_affected: done.rows_affected,
            rows_read: done.rows_read,
            bytes_read: done.bytes_read,
            data: done.data,
            error,
        }
    }

    fn resolve_database(&self, target: &TableRef) -> ColumnarResult<()> {
        match target.database.as_deref() {
            Some(db) if db != self.catalog.database() => {
                Err(ColumnarError::UnknownDatabase(db.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Rows and bytes visible to a read of `source`.
    fn scan_size(&self, source: &TableRef) -> ColumnarResult<(u64, u64)> {
        if source.database.as_deref() == Some(SYSTEM_DATABASE) {
            let rows = match source.table.as_str() {
                "tables" => self.catalog.len() as u64,
                "query_log" => self.log.len() as u64,
                "databases" => 2,
                _ => {
                    return Err(ColumnarError::UnknownTable {
                        database: SYSTEM_DATABASE.to_string(),
                        table: source.table.clone(),
                    });
                }
            };
            return Ok((rows, rows * 128));
        }
        self.resolve_database(source)?;
        let table = self.catalog.get(&source.table)?;
        Ok((table.row_count, table.size_bytes))
    }

    fn scan_cost_us(&self, rows: u64) -> u64 {
        rows * 1000 / self.config.scan_rows_per_ms.max(1)
    }

    fn account(&mut self, stmt: Statement, now: u64) -> ColumnarResult<Accounted> {
        match stmt {
            Statement::CreateTable {
                target,
                if_not_exists,
                engine,
                columns,
                partitioned,
            } => {
                self.resolve_database(&target)?;
                if self.catalog.contains(&target.table) && if_not_exists {
                    return Ok(Accounted {
                        cost_us: MISC_COST_US,
                        ..Accounted::default()
                    });
                }
                let spec = TableSpec {
                    name: target.table.clone(),
                    engine,
                    columns,
                    ..TableSpec::default()
                };
                let mut table = Table::from_spec(self.catalog.database(), &spec, now);
                if partitioned && engine.is_merge_tree() {
                    table.partitioned = true;
                    table.partition_count = 0;
                }
                self.catalog.create(table)?;
                info!(component = %self.component_id, table = %target.table, %engine, "table created");
                Ok(Accounted {
                    cost_us: CREATE_COST_US,
                    ..Accounted::default()
                })
            }
            Statement::DropTable { target, if_exists } => {
                self.resolve_database(&target)?;
                if !self.catalog.contains(&target.table) && if_exists {
                    return Ok(Accounted {
                        cost_us: MISC_COST_US,
                        ..Accounted::default()
                    });
                }
                let dropped = self.catalog.drop_table(&target.table)?;
                info!(component = %self.component_id, table = %dropped.name, rows = dropped.row_count, "table dropped");
                Ok(Accounted {
                    cost_us: DROP_COST_US,
                    ..Accounted::default()
                })
            }
            Statement::TruncateTable { target, if_exists } => {
                self.resolve_database(&target)?;
                if !self.catalog.contains(&target.table) && if_exists {
                    return Ok(Accounted {
                        cost_us: MISC_COST_US,
                        ..Accounted::default()
                    });
                }
                self.catalog.get_mut(&target.table)?.truncate(now);
                Ok(Accounted {
                    cost_us: TRUNCATE_COST_US,
                    ..Accounted::default()
                })
            }
            Statement::Insert { target, rows, bytes } => {
                self.resolve_database(&target)?;
                let cost_us =
                    INSERT_BASE_US + rows * 1000 / self.config.insert_rows_per_ms.max(1);
                self.insert_into(&target, rows, bytes, now)?;
                Ok(Accounted {
                    cost_us,
                    rows_affected: Some(rows),
                    rows_written: rows,
                    bytes_written: bytes,
                    ..Accounted::default()
                })
            }
            Statement::InsertSelect { target, sources } => {
                self.resolve_database(&target)?;
                self.catalog.get(&target.table)?;
                let mut rows = 0;
                let mut bytes = 0;
                for source in &sources {
                    let (r, b) = self.scan_size(source)?;
                    rows += r;
                    bytes += b;
                }
                let cost_us = INSERT_BASE_US
                    + self.scan_cost_us(rows)
                    + rows * 1000 / self.config.insert_rows_per_ms.max(1);
                self.insert_into(&target, rows, bytes, now)?;
                Ok(Accounted {
                    cost_us,
                    rows_affected: Some(rows),
                    rows_read: rows,
                    bytes_read: bytes,
                    rows_written: rows,
                    bytes_written: bytes,
                    data: None,
                })
            }
            Statement::Select {
                sources,
                aggregate,
                limit,
            } => {
                let mut rows = 0;
                let mut bytes = 0;
                for source in &sources {
                    let (r, b) = self.scan_size(source)?;
                    rows += r;
                    bytes += b;
                }
                // A plain LIMIT query stops reading early; aggregates scan everything.
                let rows_read = match (aggregate, limit) {
                    (false, Some(limit)) => rows.min(limit),
                    _ => rows,
                };
                let bytes_read = if rows == 0 { 0 } else { bytes * rows_read / rows };
                let mut scan_us = self.scan_cost_us(rows_read);
                if aggregate {
                    scan_us += scan_us / 4;
                }
                let returned = if sources.is_empty() || aggregate {
                    1
                } else {
                    rows_read
                };
                Ok(Accounted {
                    cost_us: SELECT_BASE_US + scan_us,
                    rows_affected: Some(returned),
                    rows_read,
                    bytes_read,
                    ..Accounted::default()
                })
            }
            Statement::ShowTables => Ok(Accounted {
                cost_us: MISC_COST_US,
                rows_affected: Some(self.catalog.len() as u64),
                data: Some(serde_json::Value::from(self.catalog.names())),
                ..Accounted::default()
            }),
            Statement::Other { .. } => Ok(Accounted {
                cost_us: MISC_COST_US,
                ..Accounted::default()
            }),
        }
    }

    fn insert_into(&mut self, target: &TableRef, rows: u64, bytes: u64, now: u64) -> ColumnarResult<()> {
        let table = self.catalog.get_mut(&target.table)?;
        table.append(rows, bytes, now);
        // Each insert batch lands in a new partition.
        if table.partitioned && rows > 0 {
            table.partition_count += 1;
        }
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn tables(&self) -> Vec<Table> {
        self.catalog.tables().cloned().collect()
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.catalog.get(name).ok()
    }

    /// The most recent `limit` statements, newest first.
    pub fn query_log(&self, limit: usize) -> Vec<QueryRecord> {
        self.log.recent(limit, self.clock.now_ms())
    }

    pub fn get_metrics(&self) -> ColumnarMetrics {
        let now = self.clock.now_ms();
        let snapshot = self.metrics.snapshot(now);
        ColumnarMetrics {
            qps: snapshot.throughput,
            snapshot,
            database: self.catalog.database().to_string(),
            table_count: self.catalog.len(),
            total_rows: self.catalog.total_rows(),
            total_bytes: self.catalog.total_bytes(),
            running_queries: self.log.running(now),
            counters: self.counters.clone(),
        }
    }

    pub fn config(&self) -> &ColumnarConfig {
        &self.config
    }
}

/// Leading keywords accepted as a bare statement by `execute`.
const SQL_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "INSERT", "CREATE", "DROP", "TRUNCATE", "SHOW", "ALTER", "OPTIMIZE",
    "DESCRIBE", "DESC", "SET", "EXPLAIN",
];

impl RoutingEngine for ColumnarEngine {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Columnar
    }

    fn component_id(&self) -> &str {
        &self.component_id
    }

    /// `QUERY <sql...>`, a bare statement (`SELECT ...`), `TABLES`, or
    /// `LOG [n]`.
    fn execute(&mut self, command: &str, args: &[String]) -> CommandResult {
        let upper = command.to_ascii_uppercase();
        let sql = match upper.as_str() {
            "QUERY" => args.join(" "),
            "TABLES" => return CommandResult::from_serialize(Ok::<_, ColumnarError>(self.tables())),
            "LOG" => {
                let limit = args.first().and_then(|n| n.parse().ok()).unwrap_or(20);
                return CommandResult::from_serialize(Ok::<_, ColumnarError>(self.query_log(limit)));
            }
            kw if SQL_KEYWORDS.contains(&kw) => {
                let mut parts = vec![command.to_string()];
                parts.extend(args.iter().cloned());
                parts.join(" ")
            }
            _ => return CommandResult::err(ColumnarError::UnknownCommand(command.to_string())),
        };
        let result = self.execute_query(&sql);
        match &result.error {
            Some(error) => CommandResult::err(error),
            None => CommandResult::from_serialize(Ok::<_, ColumnarError>(result)),
        }
    }

    /// Query status is derived from the clock when read; nothing is due.
    fn tick(&mut self) {}

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.clock.now_ms())
    }

    fn reset_stats(&mut self) {
        self.metrics.reset(self.clock.now_ms());
        self.counters = QueryCounters::default();
    }

    fn reconfigure(&mut self, config: &serde_json::Value) -> CoreResult<Reconfigure> {
        let new: ColumnarConfig = decode_config(&self.component_id, config)?;
        if new.database != self.config.database {
            return Ok(Reconfigure::RequiresRebuild);
        }
        self.declare_tables(&new.tables)
            .map_err(|e| CoreError::invalid_config(&self.component_id, e))?;
        self.log.set_capacity(new.query_log_capacity);
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
    use crate::query_log::QueryStatus;

    fn engine_with(config: ColumnarConfig) -> (ColumnarEngine, SimClock) {
        let clock = SimClock::new(0);
        let engine = ColumnarEngine::new(EngineContext::new("ch-1", clock.clone()), config).unwrap();
        (engine, clock)
    }

    fn engine() -> (ColumnarEngine, SimClock) {
        engine_with(ColumnarConfig::default())
    }

    // ── Catalog statements ───────────────────────────────────────────

    #[test]
    fn create_and_drop_table() {
        let (mut e, _) = engine();
        let r = e.execute_query("CREATE TABLE events (id UInt64, ts DateTime) ENGINE = MergeTree ORDER BY id");
        assert!(r.success, "{:?}", r.error);
        assert_eq!(e.tables().len(), 1);
        assert_eq!(e.table("events").unwrap().columns.len(), 2);

        let dup = e.execute_query("CREATE TABLE events (id UInt64)");
        assert!(!dup.success);
        assert!(dup.error.unwrap().contains("TABLE_ALREADY_EXISTS"));
        assert!(e.execute_query("CREATE TABLE IF NOT EXISTS events (id UInt64)").success);

        assert!(e.execute_query("DROP TABLE events").success);
        assert!(e.tables().is_empty());
        let missing = e.execute_query("DROP TABLE events");
        assert!(missing.error.unwrap().contains("UNKNOWN_TABLE"));
        assert!(e.execute_query("DROP TABLE IF EXISTS events").success);
    }

    #[test]
    fn wrong_database_is_rejected() {
        let (mut e, _) = engine();
        let r = e.execute_query("CREATE TABLE other.t (x UInt8)");
        assert_eq!(
            r.error.as_deref(),
            Some("Code: 81. DB::Exception: Database other does not exist. (UNKNOWN_DATABASE)")
        );
        assert!(e.execute_query("CREATE TABLE default.t (x UInt8)").success);
    }

    // ── Reads and writes ─────────────────────────────────────────────

    #[test]
    fn insert_grows_counters() {
        let (mut e, _) = engine();
        e.execute_query("CREATE TABLE t (id UInt64, name String)");
        let r = e.execute_query("INSERT INTO t VALUES (1, 'a'), (2, 'b'), (3, 'c')");
        assert!(r.success);
        assert_eq!(r.rows_affected, Some(3));
        let table = e.table("t").unwrap();
        assert_eq!(table.row_count, 3);
        assert!(table.size_bytes > 0);
        assert!(!e.execute_query("INSERT INTO missing VALUES (1)").success);
    }

    #[test]
    fn select_latency_scales_with_table_size() {
        let config = ColumnarConfig {
            tables: vec![
                TableSpec::new("small").with_rows(1_000, 64_000),
                TableSpec::new("big").with_rows(50_000_000, 3_200_000_000),
            ],
            ..ColumnarConfig::default()
        };
        let (mut e, _) = engine_with(config);
        let small = e.execute_query("SELECT count() FROM small");
        let big = e.execute_query("SELECT count() FROM big");
        assert!(small.success && big.success);
        assert!(big.latency_ms > small.latency_ms * 10.0);
        assert_eq!(big.rows_read, 50_000_000);
        assert_eq!(big.rows_affected, Some(1));

        let limited = e.execute_query("SELECT * FROM big LIMIT 100");
        assert_eq!(limited.rows_read, 100);
        assert_eq!(limited.bytes_read, 6_400);
    }

    #[test]
    fn select_unknown_table_fails() {
        let (mut e, _) = engine();
        let r = e.execute_query("SELECT * FROM nowhere");
        assert!(!r.success);
        assert!(r.latency_ms > 0.0);
        assert!(e.execute_query("SELECT 1").success);
        assert!(e.execute_query("SELECT name FROM system.tables").success);
    }

    #[test]
    fn partitioned_table_gains_partitions() {
        let (mut e, _) = engine();
        e.execute_query("CREATE TABLE p (d Date, v UInt8) ENGINE = MergeTree PARTITION BY d ORDER BY d");
        assert_eq!(e.table("p").unwrap().partition_count, 0);
        e.execute_query("INSERT INTO p VALUES ('2024-01-01', 1)");
        e.execute_query("INSERT INTO p VALUES ('2024-01-02', 2)");
        assert_eq!(e.table("p").unwrap().partition_count, 2);

        e.execute_query("CREATE TABLE m (v UInt8) ENGINE = Memory");
        e.execute_query("INSERT INTO m VALUES (1)");
        assert_eq!(e.table("m").unwrap().partition_count, 1);
    }

    #[test]
    fn insert_select_copies_rows() {
        let config = ColumnarConfig {
            tables: vec![TableSpec::new("src").with_rows(500, 5_000), TableSpec::new("dst")],
            ..ColumnarConfig::default()
        };
        let (mut e, _) = engine_with(config);
        let r = e.execute_query("INSERT INTO dst SELECT * FROM src");
        assert_eq!(r.rows_affected, Some(500));
        assert_eq!(e.table("dst").unwrap().size_bytes, 5_000);
    }

    #[test]
    fn truncate_keeps_table() {
        let config = ColumnarConfig {
            tables: vec![TableSpec::new("t").with_rows(10, 100)],
            ..ColumnarConfig::default()
        };
        let (mut e, _) = engine_with(config);
        assert!(e.execute_query("TRUNCATE TABLE t").success);
        assert_eq!(e.table("t").unwrap().row_count, 0);
    }

    // ── Query log and metrics ────────────────────────────────────────

    #[test]
    fn query_log_status_follows_clock() {
        let config = ColumnarConfig {
            tables: vec![TableSpec::new("big").with_rows(10_000_000, 1)],
            ..ColumnarConfig::default()
        };
        let (mut e, clock) = engine_with(config);
        let r = e.execute_query("SELECT * FROM big");
        e.execute_query("SELECT * FROM nope");
        let log = e.query_log(10);
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].status, QueryStatus::Failed);
        assert_eq!(log[1].status, QueryStatus::Running);
        assert_eq!(e.get_metrics().running_queries, 1);

        clock.advance_ms(r.latency_ms.ceil() as u64);
        assert_eq!(e.query_log(10)[1].status, QueryStatus::Completed);
        assert_eq!(e.get_metrics().running_queries, 0);
    }

    #[test]
    fn metrics_and_reset() {
        let (mut e, clock) = engine();
        e.execute_query("CREATE TABLE t (x UInt8)");
        e.execute_query("INSERT INTO t VALUES (1), (2)");
        e.execute_query("SELECT x FROM missing");
        clock.advance_ms(1_000);

        let m = e.get_metrics();
        assert_eq!(m.counters.total_queries, 3);
        assert_eq!(m.counters.failed_queries, 1);
        assert_eq!(m.counters.rows_written, 2);
        assert_eq!(m.table_count, 1);
        assert!(m.qps > 0.0);
        assert!(m.snapshot.avg_latency_ms > 0.0);
        assert_eq!(e.get_metrics(), m);

        e.reset_stats();
        let first = e.metrics();
        e.reset_stats();
        assert_eq!(first, e.metrics());
        assert_eq!(e.get_metrics().counters, QueryCounters::default());
        assert_eq!(e.table("t").unwrap().row_count, 2);
        assert_eq!(e.query_log(10).len(), 3);
    }

    // ── Engine contract ──────────────────────────────────────────────

    #[test]
    fn execute_accepts_bare_statements() {
        let (mut e, _) = engine();
        let args = |s: &str| s.split(' ').map(String::from).collect::<Vec<_>>();
        assert!(e.execute("CREATE", &args("TABLE t (x UInt8)")).success);
        assert!(e.execute("QUERY", &args("INSERT INTO t VALUES (1)")).success);
        let r = e.execute("SELECT", &args("* FROM t"));
        assert_eq!(r.value.unwrap()["rows_read"], 1);
        assert!(!e.execute("SELECT", &args("* FROM nope")).success);
        assert!(!e.execute("FROB", &[]).success);
        assert_eq!(e.execute("TABLES", &[]).value.unwrap()[0]["name"], "t");
    }

    #[test]
    fn reconfigure_adds_tables_and_keeps_data() {
        let (mut e, _) = engine();
        e.execute_query("CREATE TABLE t (x UInt8)");
        e.execute_query("INSERT INTO t VALUES (1)");
        let outcome = e
            .reconfigure(&serde_json::json!({"tables": [{"name": "extra"}], "query_log_capacity": 1}))
            .unwrap();
        assert_eq!(outcome, Reconfigure::Applied);
        assert_eq!(e.tables().len(), 2);
        assert_eq!(e.table("t").unwrap().row_count, 1);
        assert_eq!(e.query_log(10).len(), 1);
        assert_eq!(
            e.reconfigure(&serde_json::json!({"database": "other"})).unwrap(),
            Reconfigure::RequiresRebuild
        );
    }

    #[test]
    fn from_node_rejects_bad_config() {
        let err = ColumnarEngine::from_node(
            EngineContext::new("ch-1", SimClock::new(0)),
            &serde_json::json!({"tables": [{"name": "a"}, {"name": ""}]}),
        );
        assert!(err.is_err());
    }
}
