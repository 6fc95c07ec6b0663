//! Statement classification.
//!
//! Only enough SQL is understood to account for a query: which tables it
//! touches, how many rows an INSERT carries, and whether it changes the
//! catalog. Nothing is evaluated.

use regex::Regex;

use crate::config::{Column, TableEngine};
use crate::error::{ColumnarError, ColumnarResult};

/// A possibly database-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub database: Option<String>,
    pub table: String,
}

impl TableRef {
    fn parse(raw: &str) -> Self {
        let clean: String = raw.chars().filter(|c| *c != '`' && *c != '"').collect();
        match clean.split_once('.') {
            Some((db, table)) => Self {
                database: Some(db.to_string()),
                table: table.to_string(),
            },
            None => Self {
                database: None,
                table: clean,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    CreateTable {
        target: TableRef,
        if_not_exists: bool,
        engine: TableEngine,
        columns: Vec<Column>,
        partitioned: bool,
    },
    DropTable {
        target: TableRef,
        if_exists: bool,
    },
    TruncateTable {
        target: TableRef,
        if_exists: bool,
    },
    /// `INSERT INTO t VALUES (...), (...)`; `bytes` is the size of the
    /// VALUES payload.
    Insert {
        target: TableRef,
        rows: u64,
        bytes: u64,
    },
    /// `INSERT INTO t SELECT ... FROM s`
    InsertSelect {
        target: TableRef,
        sources: Vec<TableRef>,
    },
    Select {
        sources: Vec<TableRef>,
        aggregate: bool,
        limit: Option<u64>,
    },
    ShowTables,
    /// Anything else (SET, OPTIMIZE, ALTER, DESCRIBE, ...), keyed by its
    /// leading keyword.
    Other { keyword: String },
}

impl Statement {
    /// Short operation name used for command statistics.
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::CreateTable { .. } => "create",
            Self::DropTable { .. } => "drop",
            Self::TruncateTable { .. } => "truncate",
            Self::Insert { .. } | Self::InsertSelect { .. } => "insert",
            Self::Select { .. } => "select",
            Self::ShowTables => "show",
            Self::Other { .. } => "other",
        }
    }
}

/// Compiled statement patterns.
#[derive(Debug)]
pub struct StatementParser {
    create: Regex,
    engine: Regex,
    partition: Regex,
    drop: Regex,
    truncate: Regex,
    insert: Regex,
    from: Regex,
    limit: Regex,
    aggregate: Regex,
    show_tables: Regex,
}

const IDENT: &str = r"[`\x22]?[A-Za-z_][\w]*[`\x22]?(?:\.[`\x22]?[A-Za-z_][\w]*[`\x22]?)?";

impl StatementParser {
    pub fn new() -> ColumnarResult<Self> {
        Ok(Self {
            create: Regex::new(&format!(
                r"(?is)^CREATE\s+TABLE\s+(IF\s+NOT\s+EXISTS\s+)?({IDENT})"
            ))?,
            engine: Regex::new(r"(?i)\bENGINE\s*=\s*(\w+)")?,
            partition: Regex::new(r"(?i)\bPARTITION\s+BY\b")?,
            drop: Regex::new(&format!(r"(?is)^DROP\s+TABLE\s+(IF\s+EXISTS\s+)?({IDENT})\s*$"))?,
            truncate: Regex::new(&format!(
                r"(?is)^TRUNCATE\s+(?:TABLE\s+)?(IF\s+EXISTS\s+)?({IDENT})\s*$"
            ))?,
            insert: Regex::new(&format!(
                r"(?is)^INSERT\s+INTO\s+({IDENT})\s*(?:\([^)]*\))?\s*(VALUES|SELECT|FORMAT)\b(.*)$"
            ))?,
            from: Regex::new(&format!(r"(?i)\b(?:FROM|JOIN)\s+({IDENT})"))?,
            limit: Regex::new(r"(?i)\bLIMIT\s+(\d+)")?,
            aggregate: Regex::new(
                r"(?i)\b(?:count|sum|avg|min|max|uniq|uniqExact|quantile\w*|groupArray|any)\s*\(|\bGROUP\s+BY\b",
            )?,
            show_tables: Regex::new(r"(?i)^SHOW\s+TABLES\b")?,
        })
    }

    pub fn parse(&self, text: &str) -> ColumnarResult<Statement> {
        let sql = text.trim().trim_end_matches(';').trim();
        if sql.is_empty() {
            return Err(ColumnarError::EmptyQuery);
        }
        let mut words = sql.split_whitespace();
        let keyword = words.next().unwrap_or_default().to_ascii_uppercase();
        let object = words.next().unwrap_or_default().to_ascii_uppercase();

        match keyword.as_str() {
            "CREATE" if self.create.is_match(sql) => self.parse_create(sql),
            "DROP" if object == "TABLE" => self.parse_drop(sql),
            "TRUNCATE" => {
                let caps = self
                    .truncate
                    .captures(sql)
                    .ok_or_else(|| syntax(sql, "expected TRUNCATE TABLE <name>"))?;
                Ok(Statement::TruncateTable {
                    target: TableRef::parse(&caps[2]),
                    if_exists: caps.get(1).is_some(),
                })
            }
            "INSERT" => self.parse_insert(sql),
            "SELECT" | "WITH" => Ok(self.parse_select(sql)),
            "SHOW" if self.show_tables.is_match(sql) => Ok(Statement::ShowTables),
            _ => Ok(Statement::Other { keyword }),
        }
    }

    fn parse_create(&self, sql: &str) -> ColumnarResult<Statement> {
        let caps = self
            .create
            .captures(sql)
            .ok_or_else(|| syntax(sql, "expected CREATE TABLE <name>"))?;
        let target = TableRef::parse(&caps[2]);
        let rest = &sql[caps.get(0).map_or(0, |m| m.end())..];

        let columns = match rest.trim_start().strip_prefix('(') {
            Some(body) => {
                let inner = balanced(body).ok_or_else(|| syntax(sql, "unbalanced parentheses"))?;
                parse_columns(inner)
            }
            None => Vec::new(),
        };
        let engine = match self.engine.captures(rest) {
            Some(m) => TableEngine::from_name(&m[1])
                .ok_or_else(|| ColumnarError::UnknownEngine(m[1].to_string()))?,
            None => TableEngine::default(),
        };
        Ok(Statement::CreateTable {
            target,
            if_not_exists: caps.get(1).is_some(),
            engine,
            columns,
            partitioned: self.partition.is_match(rest),
        })
    }

    fn parse_drop(&self, sql: &str) -> ColumnarResult<Statement> {
        let caps = self
            .drop
            .captures(sql)
            .ok_or_else(|| syntax(sql, "expected DROP TABLE <name>"))?;
        Ok(Statement::DropTable {
            target: TableRef::parse(&caps[2]),
            if_exists: caps.get(1).is_some(),
        })
    }

    fn parse_insert(&self, sql: &str) -> ColumnarResult<Statement> {
        let caps = self
            .insert
            .captures(sql)
            .ok_or_else(|| syntax(sql, "expected INSERT INTO <table> VALUES"))?;
        let target = TableRef::parse(&caps[1]);
        match caps[2].to_ascii_uppercase().as_str() {
            "SELECT" => Ok(Statement::InsertSelect {
                target,
                sources: self.sources(&caps[3]),
            }),
            "VALUES" => {
                let payload = caps[3].trim();
                let rows = count_tuples(payload).ok_or_else(|| syntax(sql, "malformed VALUES list"))?;
                if rows == 0 {
                    return Err(syntax(sql, "VALUES list is empty"));
                }
                Ok(Statement::Insert {
                    target,
                    rows,
                    bytes: payload.len() as u64,
                })
            }
            // FORMAT <name> followed by inline rows, one per line.
            _ => {
                let payload = caps[3].trim();
                let rows = payload.lines().skip(1).filter(|l| !l.trim().is_empty()).count() as u64;
                Ok(Statement::Insert {
                    target,
                    rows,
                    bytes: payload.len() as u64,
                })
            }
        }
    }

    fn parse_select(&self, sql: &str) -> Statement {
        Statement::Select {
            sources: self.sources(sql),
            aggregate: self.aggregate.is_match(sql),
            limit: self
                .limit
                .captures(sql)
                .and_then(|c| c[1].parse::<u64>().ok()),
        }
    }

    fn sources(&self, sql: &str) -> Vec<TableRef> {
        let mut out: Vec<TableRef> = Vec::new();
        for caps in self.from.captures_iter(sql) {
            let table = TableRef::parse(&caps[1]);
            if !out.contains(&table) {
                out.push(table);
            }
        }
        out
    }
}

fn syntax(sql: &str, reason: &str) -> ColumnarError {
    let head: String = sql.chars().take(40).collect();
    ColumnarError::Syntax(format!("{reason} near '{head}'"))
}

/// Given text just after an opening parenthesis, return the text up to
/// the matching close.
fn balanced(body: &str) -> Option<&str> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth == 0 {
                    return Some(&body[..i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split a column list on top-level commas into `name type` pairs.
fn parse_columns(body: &str) -> Vec<Column> {
    let mut columns = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut push = |part: &str| {
        let part = part.trim();
        if let Some((name, data_type)) = part.split_once(char::is_whitespace) {
            let name = name.trim_matches(|c| c == '`' || c == '"');
            // Skip INDEX/PROJECTION/CONSTRAINT clauses.
            if !matches!(
                name.to_ascii_uppercase().as_str(),
                "INDEX" | "PROJECTION" | "CONSTRAINT" | "PRIMARY"
            ) {
                columns.push(Column {
                    name: name.to_string(),
                    data_type: data_type.trim().to_string(),
                });
            }
        }
    };
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    push(&body[start..]);
    columns
}

/// Count the top-level `( ... )` tuples of a VALUES payload. `None` when the
/// parentheses do not balance.
fn count_tuples(payload: &str) -> Option<u64> {
    let mut depth = 0i64;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut tuples = 0u64;
    for c in payload.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => {
                if depth == 0 {
                    tuples += 1;
                }
                depth += 1;
            }
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0 && quote.is_none()).then_some(tuples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> StatementParser {
        StatementParser::new().unwrap()
    }

    fn table(name: &str) -> TableRef {
        TableRef {
            database: None,
            table: name.to_string(),
        }
    }

    // ── DDL ──────────────────────────────────────────────────────────

    #[test]
    fn create_table_with_columns_and_engine() {
        let stmt = parser()
            .parse(
                "CREATE TABLE IF NOT EXISTS events (id UInt64, price Decimal(10, 2), ts DateTime) \
                 ENGINE = ReplacingMergeTree() PARTITION BY toYYYYMM(ts) ORDER BY id;",
            )
            .unwrap();
        match stmt {
            Statement::CreateTable {
                target,
                if_not_exists,
                engine,
                columns,
                partitioned,
            } => {
                assert_eq!(target, table("events"));
                assert!(if_not_exists);
                assert_eq!(engine, TableEngine::ReplacingMergeTree);
                assert_eq!(columns.len(), 3);
                assert_eq!(columns[1].data_type, "Decimal(10, 2)");
                assert!(partitioned);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn create_defaults_to_merge_tree() {
        let stmt = parser().parse("create table analytics.t (x UInt8)").unwrap();
        match stmt {
            Statement::CreateTable { target, engine, .. } => {
                assert_eq!(target.database.as_deref(), Some("analytics"));
                assert_eq!(engine, TableEngine::MergeTree);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn create_with_unknown_engine_fails() {
        assert!(matches!(
            parser().parse("CREATE TABLE t (x UInt8) ENGINE = InnoDB"),
            Err(ColumnarError::UnknownEngine(_))
        ));
    }

    #[test]
    fn drop_and_truncate() {
        assert_eq!(
            parser().parse("DROP TABLE IF EXISTS `events`").unwrap(),
            Statement::DropTable {
                target: table("events"),
                if_exists: true
            }
        );
        assert!(parser().parse("DROP TABLE").is_err());
        assert_eq!(
            parser().parse("DROP DATABASE scratch").unwrap(),
            Statement::Other {
                keyword: "DROP".into()
            }
        );
        assert_eq!(
            parser().parse("TRUNCATE TABLE events").unwrap(),
            Statement::TruncateTable {
                target: table("events"),
                if_exists: false
            }
        );
    }

    // ── INSERT ───────────────────────────────────────────────────────

    #[test]
    fn insert_counts_tuples() {
        let stmt = parser()
            .parse("INSERT INTO events (id, name) VALUES (1, 'a'), (2, 'b (x)'), (3, 'it''s')")
            .unwrap();
        match stmt {
            Statement::Insert { target, rows, bytes } => {
                assert_eq!(target, table("events"));
                assert_eq!(rows, 3);
                assert!(bytes > 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn insert_with_unbalanced_values_fails() {
        assert!(parser().parse("INSERT INTO t VALUES (1, 2").is_err());
        assert!(parser().parse("INSERT INTO t VALUES").is_err());
    }

    #[test]
    fn insert_select_lists_sources() {
        let stmt = parser()
            .parse("INSERT INTO daily SELECT * FROM events JOIN users ON events.uid = users.id")
            .unwrap();
        assert_eq!(
            stmt,
            Statement::InsertSelect {
                target: table("daily"),
                sources: vec![table("events"), table("users")],
            }
        );
    }

    // ── SELECT and others ────────────────────────────────────────────

    #[test]
    fn select_detects_aggregates_and_limit() {
        let stmt = parser()
            .parse("SELECT count() FROM events WHERE ts > now() - 3600")
            .unwrap();
        assert_eq!(
            stmt,
            Statement::Select {
                sources: vec![table("events")],
                aggregate: true,
                limit: None
            }
        );
        let stmt = parser().parse("select * from events limit 10").unwrap();
        assert_eq!(
            stmt,
            Statement::Select {
                sources: vec![table("events")],
                aggregate: false,
                limit: Some(10)
            }
        );
    }

    #[test]
    fn select_without_tables() {
        assert_eq!(
            parser().parse("SELECT 1").unwrap(),
            Statement::Select {
                sources: vec![],
                aggregate: false,
                limit: None
            }
        );
    }

    #[test]
    fn other_statements_keep_keyword() {
        assert_eq!(parser().parse("SHOW TABLES").unwrap(), Statement::ShowTables);
        assert_eq!(
            parser().parse("OPTIMIZE TABLE events FINAL").unwrap(),
            Statement::Other {
                keyword: "OPTIMIZE".into()
            }
        );
        assert_eq!(parser().parse("  ;  "), Err(ColumnarError::EmptyQuery));
    }
}
