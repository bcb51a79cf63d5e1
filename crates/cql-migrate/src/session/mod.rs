//! Target Session - Abstract CQL session consumed by the migration engine
//!
//! The engine never talks to a driver directly; it executes statements and
//! reads the tracking table through [`Session`]. Any driver wrapper that can
//! run a CQL statement with bound values can be plugged in.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::MemorySession;

/// Errors reported by a target session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    #[error("Column '{column}' has unexpected type: expected {expected}")]
    UnexpectedType {
        column: String,
        expected: &'static str,
    },

    #[error("Schema agreement not reached: {0}")]
    SchemaAgreement(String),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Abstract CQL session
#[async_trait]
pub trait Session: Send + Sync {
    /// Execute a statement with bound values
    async fn execute(&self, statement: &str, values: &[CqlValue]) -> SessionResult<()>;

    /// Execute a query and return all result rows
    async fn query(&self, statement: &str, values: &[CqlValue]) -> SessionResult<Vec<Row>>;

    /// Wait until every node reports the same schema version
    async fn await_schema_agreement(&self) -> SessionResult<()> {
        Ok(())
    }
}

/// CQL value for parameter binding and row decoding
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    Null,
    Boolean(bool),
    Int(i32),
    BigInt(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl CqlValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, CqlValue::Null)
    }

    /// CQL type name, as used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            CqlValue::Null => "null",
            CqlValue::Boolean(_) => "boolean",
            CqlValue::Int(_) => "int",
            CqlValue::BigInt(_) => "bigint",
            CqlValue::Text(_) => "text",
            CqlValue::Timestamp(_) => "timestamp",
        }
    }
}

impl fmt::Display for CqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlValue::Null => write!(f, "null"),
            CqlValue::Boolean(b) => write!(f, "{}", b),
            CqlValue::Int(i) => write!(f, "{}", i),
            CqlValue::BigInt(i) => write!(f, "{}", i),
            CqlValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            CqlValue::Timestamp(ts) => write!(f, "'{}'", ts.to_rfc3339()),
        }
    }
}

impl From<&str> for CqlValue {
    fn from(value: &str) -> Self {
        CqlValue::Text(value.to_string())
    }
}

impl From<String> for CqlValue {
    fn from(value: String) -> Self {
        CqlValue::Text(value)
    }
}

impl From<i32> for CqlValue {
    fn from(value: i32) -> Self {
        CqlValue::Int(value)
    }
}

impl From<i64> for CqlValue {
    fn from(value: i64) -> Self {
        CqlValue::BigInt(value)
    }
}

impl From<bool> for CqlValue {
    fn from(value: bool) -> Self {
        CqlValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for CqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        CqlValue::Timestamp(value)
    }
}

/// One result row, columns addressable by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: HashMap<String, CqlValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column value
    pub fn with(mut self, column: impl Into<String>, value: impl Into<CqlValue>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    /// Raw column value
    pub fn get(&self, column: &str) -> SessionResult<&CqlValue> {
        self.columns
            .get(column)
            .ok_or_else(|| SessionError::ColumnNotFound(column.to_string()))
    }

    pub fn get_text(&self, column: &str) -> SessionResult<String> {
        match self.get(column)? {
            CqlValue::Text(s) => Ok(s.clone()),
            _ => Err(unexpected(column, "text")),
        }
    }

    pub fn get_int(&self, column: &str) -> SessionResult<i32> {
        match self.get(column)? {
            CqlValue::Int(i) => Ok(*i),
            _ => Err(unexpected(column, "int")),
        }
    }

    /// Timestamp column; null decodes to `None`
    pub fn get_timestamp(&self, column: &str) -> SessionResult<Option<DateTime<Utc>>> {
        match self.get(column)? {
            CqlValue::Timestamp(ts) => Ok(Some(*ts)),
            CqlValue::Null => Ok(None),
            _ => Err(unexpected(column, "timestamp")),
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

impl FromIterator<(String, CqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, CqlValue)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

fn unexpected(column: &str, expected: &'static str) -> SessionError {
    SessionError::UnexpectedType {
        column: column.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_typed_access() {
        let now = Utc::now();
        let row = Row::new()
            .with("name", "0.cql")
            .with("done", 3i32)
            .with("end_time", now)
            .with("start_time", CqlValue::Null);

        assert_eq!(row.get_text("name").unwrap(), "0.cql");
        assert_eq!(row.get_int("done").unwrap(), 3);
        assert_eq!(row.get_timestamp("end_time").unwrap(), Some(now));
        assert_eq!(row.get_timestamp("start_time").unwrap(), None);
        assert_eq!(row.column_count(), 4);

        assert_eq!(
            row.get_int("name").unwrap_err(),
            SessionError::UnexpectedType {
                column: "name".to_string(),
                expected: "int"
            }
        );
        assert_eq!(
            row.get("missing").unwrap_err(),
            SessionError::ColumnNotFound("missing".to_string())
        );
    }

    #[test]
    fn test_value_display_quotes_text() {
        assert_eq!(CqlValue::from("it's").to_string(), "'it''s'");
        assert_eq!(CqlValue::Int(7).to_string(), "7");
        assert!(CqlValue::Null.is_null());
        assert_eq!(CqlValue::BigInt(1).type_name(), "bigint");
    }
}
