//! In-memory session implementation for development and testing
//!
//! Understands just enough CQL to host the tracking table and simple test
//! tables: `CREATE TABLE`, `DROP TABLE`, `TRUNCATE`, `INSERT ... VALUES` and
//! `SELECT cols FROM table`. Every other statement is accepted and logged.
//! `INSERT` replaces the row with the same primary key, as CQL upserts do.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

use super::{CqlValue, Row, Session, SessionError, SessionResult};

static CREATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*CREATE\s+TABLE\s+(IF\s+NOT\s+EXISTS\s+)?([\w.]+)").expect("valid regex")
});
static DROP_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*DROP\s+TABLE\s+(IF\s+EXISTS\s+)?([\w.]+)\s*$").expect("valid regex")
});
static TRUNCATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*TRUNCATE\s+(TABLE\s+)?([\w.]+)\s*$").expect("valid regex")
});
static INSERT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*INSERT\s+INTO\s+([\w.]+)\s*\(([^)]*)\)\s*VALUES\s*\((.*)\)\s*$")
        .expect("valid regex")
});
static PRIMARY_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)PRIMARY\s+KEY").expect("valid regex"));
static SELECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*SELECT\s+(.+?)\s+FROM\s+([\w.]+)\s*$").expect("valid regex")
});

/// In-memory session
#[derive(Debug, Default)]
pub struct MemorySession {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    primary_keys: RwLock<HashMap<String, Vec<String>>>,
    executed: RwLock<Vec<String>>,
    failures: RwLock<Vec<String>>,
    latency: Option<Duration>,
    schema_agreements: AtomicUsize,
}

impl MemorySession {
    /// Create a new empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation, to exercise deadlines
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail every statement containing `pattern` until cleared
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.failures.write().push(pattern.into());
    }

    pub fn clear_failures(&self) {
        self.failures.write().clear();
    }

    /// Statements executed successfully, in order
    pub fn executed(&self) -> Vec<String> {
        self.executed.read().clone()
    }

    /// Number of successfully executed statements containing `pattern`
    pub fn executed_matching(&self, pattern: &str) -> usize {
        self.executed
            .read()
            .iter()
            .filter(|statement| statement.contains(pattern))
            .count()
    }

    /// Rows of a table, `None` if the table does not exist
    pub fn rows(&self, table: &str) -> Option<Vec<Row>> {
        self.tables.read().get(&table_key(table)).cloned()
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.tables.read().contains_key(&table_key(table))
    }

    /// Number of schema agreement waits requested so far
    pub fn schema_agreement_count(&self) -> usize {
        self.schema_agreements.load(Ordering::Relaxed)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_failures(&self, statement: &str) -> SessionResult<()> {
        let failures = self.failures.read();
        match failures.iter().find(|pattern| statement.contains(pattern.as_str())) {
            Some(pattern) => Err(SessionError::Execution(format!(
                "injected failure matching '{}'",
                pattern
            ))),
            None => Ok(()),
        }
    }

    fn apply(&self, statement: &str, values: &[CqlValue]) -> SessionResult<Vec<Row>> {
        if let Some(caps) = CREATE_TABLE.captures(statement) {
            let table = table_key(&caps[2]);
            let mut tables = self.tables.write();
            if tables.contains_key(&table) {
                if caps.get(1).is_none() {
                    return Err(SessionError::Execution(format!(
                        "Table {} already exists",
                        table
                    )));
                }
            } else {
                self.primary_keys
                    .write()
                    .insert(table.clone(), primary_key(statement));
                tables.insert(table, Vec::new());
            }
            return Ok(Vec::new());
        }

        if let Some(caps) = DROP_TABLE.captures(statement) {
            let table = table_key(&caps[2]);
            self.primary_keys.write().remove(&table);
            if self.tables.write().remove(&table).is_none() && caps.get(1).is_none() {
                return Err(unconfigured(&table));
            }
            return Ok(Vec::new());
        }

        if let Some(caps) = TRUNCATE.captures(statement) {
            let table = table_key(&caps[2]);
            let mut tables = self.tables.write();
            let rows = tables.get_mut(&table).ok_or_else(|| unconfigured(&table))?;
            rows.clear();
            return Ok(Vec::new());
        }

        if let Some(caps) = INSERT.captures(statement) {
            let table = table_key(&caps[1]);
            let row = build_row(&caps[2], &caps[3], values)?;
            let mut tables = self.tables.write();
            let rows = tables.get_mut(&table).ok_or_else(|| unconfigured(&table))?;
            let keys = self.primary_keys.read();
            let key = keys.get(&table).map(Vec::as_slice).unwrap_or_default();
            match rows.iter_mut().find(|existing| same_key(existing, &row, key)) {
                Some(existing) => *existing = row,
                None => rows.push(row),
            }
            return Ok(Vec::new());
        }

        if let Some(caps) = SELECT.captures(statement) {
            let table = table_key(&caps[2]);
            let tables = self.tables.read();
            let rows = tables.get(&table).ok_or_else(|| unconfigured(&table))?;
            return project(rows, caps[1].trim());
        }

        Ok(Vec::new())
    }

    fn run(&self, statement: &str, values: &[CqlValue]) -> SessionResult<Vec<Row>> {
        self.check_failures(statement)?;
        let rows = self.apply(statement, values)?;
        self.executed.write().push(statement.to_string());
        tracing::trace!(statement, "Memory session executed statement");
        Ok(rows)
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn execute(&self, statement: &str, values: &[CqlValue]) -> SessionResult<()> {
        self.simulate_latency().await;
        self.run(statement, values).map(|_| ())
    }

    async fn query(&self, statement: &str, values: &[CqlValue]) -> SessionResult<Vec<Row>> {
        self.simulate_latency().await;
        self.run(statement, values)
    }

    async fn await_schema_agreement(&self) -> SessionResult<()> {
        self.simulate_latency().await;
        self.schema_agreements.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Primary key columns of a `CREATE TABLE` statement, partition and clustering
fn primary_key(statement: &str) -> Vec<String> {
    let Some(found) = PRIMARY_KEY.find(statement) else {
        return Vec::new();
    };

    let rest = statement[found.end()..].trim_start();
    if let Some(rest) = rest.strip_prefix('(') {
        let mut depth = 1usize;
        let mut columns = String::new();
        for c in rest.chars() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => columns.push(c),
            }
        }
        return columns
            .split(',')
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
    }

    // inline `k int PRIMARY KEY`
    let definition = statement[..found.start()]
        .rsplit(|c| c == ',' || c == '(')
        .next()
        .unwrap_or_default();
    definition
        .split_whitespace()
        .next()
        .map(|column| vec![column.to_lowercase()])
        .unwrap_or_default()
}

fn same_key(existing: &Row, row: &Row, key: &[String]) -> bool {
    !key.is_empty()
        && key
            .iter()
            .all(|column| matches!((existing.get(column), row.get(column)), (Ok(a), Ok(b)) if a == b))
}

fn table_key(table: &str) -> String {
    table.to_lowercase()
}

fn unconfigured(table: &str) -> SessionError {
    SessionError::Execution(format!("unconfigured table {}", table))
}

fn build_row(columns: &str, literals: &str, values: &[CqlValue]) -> SessionResult<Row> {
    let columns: Vec<String> = columns
        .split(',')
        .map(|c| c.trim().to_lowercase())
        .collect();
    let literals = split_top_level(literals);

    if columns.len() != literals.len() {
        return Err(SessionError::Execution(format!(
            "{} columns but {} values",
            columns.len(),
            literals.len()
        )));
    }

    let mut bound = values.iter();
    let mut row = Row::new();
    for (column, literal) in columns.into_iter().zip(literals) {
        let value = if literal == "?" {
            bound
                .next()
                .cloned()
                .ok_or_else(|| SessionError::Execution("not enough bound values".to_string()))?
        } else {
            parse_literal(&literal)
        };
        row = row.with(column, value);
    }

    if bound.next().is_some() {
        return Err(SessionError::Execution("too many bound values".to_string()));
    }
    Ok(row)
}

fn parse_literal(literal: &str) -> CqlValue {
    if literal.eq_ignore_ascii_case("null") {
        return CqlValue::Null;
    }
    if let Some(text) = literal.strip_prefix('\'').and_then(|l| l.strip_suffix('\'')) {
        return CqlValue::Text(text.replace("''", "'"));
    }
    if let Ok(int) = literal.parse::<i32>() {
        return CqlValue::Int(int);
    }
    if let Ok(big) = literal.parse::<i64>() {
        return CqlValue::BigInt(big);
    }
    match literal.to_ascii_lowercase().as_str() {
        "true" => CqlValue::Boolean(true),
        "false" => CqlValue::Boolean(false),
        _ => CqlValue::Text(literal.to_string()),
    }
}

/// Split on commas outside parentheses and quotes
fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quote = false;

    for c in text.chars() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '(' if !in_quote => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_quote => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if !in_quote && depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }

    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn project(rows: &[Row], selection: &str) -> SessionResult<Vec<Row>> {
    if selection == "*" {
        return Ok(rows.to_vec());
    }

    let columns: Vec<String> = selection
        .split(',')
        .map(|c| c.trim().to_lowercase())
        .collect();

    Ok(rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| {
                    let value = row.get(column).cloned().unwrap_or(CqlValue::Null);
                    (column.clone(), value)
                })
                .collect::<Row>()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_insert_select() {
        let session = MemorySession::new();
        session
            .execute("CREATE TABLE IF NOT EXISTS ks.items (k int, v text, PRIMARY KEY (k))", &[])
            .await
            .unwrap();
        session
            .execute("CREATE TABLE IF NOT EXISTS ks.items (k int PRIMARY KEY)", &[])
            .await
            .unwrap();

        session
            .execute("INSERT INTO ks.items (k, v) VALUES (?, ?)", &[CqlValue::Int(1), "one".into()])
            .await
            .unwrap();
        session
            .execute("INSERT INTO ks.items (k, v) VALUES (2, 'it''s, two')", &[])
            .await
            .unwrap();

        let rows = session.query("SELECT k, v FROM ks.items", &[]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_int("k").unwrap(), 1);
        assert_eq!(rows[1].get_text("v").unwrap(), "it's, two");
        assert_eq!(session.rows("KS.ITEMS").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_function_call_literals_stay_intact() {
        let session = MemorySession::new();
        session
            .execute("CREATE TABLE t (k int, id timeuuid, PRIMARY KEY (k, id))", &[])
            .await
            .unwrap();
        session
            .execute("INSERT INTO t (k, id) VALUES (0, now())", &[])
            .await
            .unwrap();

        let rows = session.rows("t").unwrap();
        assert_eq!(rows[0].get_text("id").unwrap(), "now()");
    }

    #[tokio::test]
    async fn test_insert_upserts_on_primary_key() {
        let session = MemorySession::new();
        session
            .execute(
                "CREATE TABLE IF NOT EXISTS history (name text, checksum text, PRIMARY KEY (name))",
                &[],
            )
            .await
            .unwrap();

        let insert = "INSERT INTO history (name, checksum) VALUES (?, ?)";
        session.execute(insert, &["0.cql".into(), "a".into()]).await.unwrap();
        session.execute(insert, &["0.cql".into(), "b".into()]).await.unwrap();
        session.execute(insert, &["1.cql".into(), "c".into()]).await.unwrap();

        let rows = session.rows("history").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_text("checksum").unwrap(), "b");
    }

    #[test]
    fn test_primary_key_forms() {
        assert_eq!(
            primary_key("CREATE TABLE t (a int, b int, c text, PRIMARY KEY ((a, b), c))"),
            vec!["a", "b", "c"]
        );
        assert_eq!(
            primary_key("CREATE TABLE t (\n  testint int,\n  PRIMARY KEY(testint, testuuid)\n)"),
            vec!["testint", "testuuid"]
        );
        assert_eq!(primary_key("CREATE TABLE t (k int PRIMARY KEY, v text)"), vec!["k"]);
        assert!(primary_key("CREATE TABLE t (k int)").is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_table() {
        let session = MemorySession::new();
        let err = session.query("SELECT name FROM missing", &[]).await.unwrap_err();
        assert_eq!(err, SessionError::Execution("unconfigured table missing".to_string()));

        assert!(session.execute("DROP TABLE IF EXISTS missing", &[]).await.is_ok());
        assert!(session.execute("TRUNCATE missing", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_bound_value_mismatch() {
        let session = MemorySession::new();
        session.execute("CREATE TABLE t (k int PRIMARY KEY)", &[]).await.unwrap();
        assert!(session.execute("INSERT INTO t (k) VALUES (?)", &[]).await.is_err());
        assert!(session
            .execute("INSERT INTO t (k) VALUES (?)", &[CqlValue::Int(1), CqlValue::Int(2)])
            .await
            .is_err());
        assert!(session.execute("CREATE TABLE t (k int PRIMARY KEY)", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failures_are_not_logged() {
        let session = MemorySession::new();
        session.fail_on("boom");

        assert!(session.execute("SELECT boom FROM nowhere", &[]).await.is_err());
        session.execute("ALTER KEYSPACE ks WITH durable_writes = true", &[]).await.unwrap();
        assert_eq!(session.executed().len(), 1);

        session.clear_failures();
        session.execute("CREATE TABLE boom (k int PRIMARY KEY)", &[]).await.unwrap();
        assert_eq!(session.executed_matching("boom"), 1);
    }

    #[tokio::test]
    async fn test_schema_agreement_counter() {
        let session = MemorySession::new();
        session.await_schema_agreement().await.unwrap();
        session.await_schema_agreement().await.unwrap();
        assert_eq!(session.schema_agreement_count(), 2);
    }
}
