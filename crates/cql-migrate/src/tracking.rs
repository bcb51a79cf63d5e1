//! Applied-state store - the tracking table recording applied migrations
//!
//! Records are append-only: a row is inserted once, after its unit was fully
//! applied, and never updated or deleted by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{MigrationUnit, NameOrder};
use crate::context::RunContext;
use crate::error::{MigrateError, MigrateResult};
use crate::session::{CqlValue, Row, Session, SessionResult};

/// One applied migration as stored in the tracking table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRecord {
    pub name: String,
    pub checksum: String,
    /// Number of statements executed for the unit
    pub done: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl AppliedRecord {
    fn from_row(row: &Row) -> SessionResult<Self> {
        Ok(Self {
            name: row.get_text("name")?,
            checksum: row.get_text("checksum")?,
            done: row.get_int("done")?,
            started_at: row.get_timestamp("start_time")?,
            applied_at: row.get_timestamp("end_time")?,
        })
    }
}

/// Tracking table bound to a session
pub struct TrackingTable<'a> {
    session: &'a dyn Session,
    table: &'a str,
    order: &'a NameOrder,
}

impl<'a> TrackingTable<'a> {
    /// `table` must already be a validated identifier
    pub fn new(session: &'a dyn Session, table: &'a str, order: &'a NameOrder) -> Self {
        Self {
            session,
            table,
            order,
        }
    }

    pub fn table(&self) -> &str {
        self.table
    }

    /// Create the tracking table if it does not exist
    pub async fn ensure(&self, ctx: &RunContext) -> MigrateResult<()> {
        let sql = create_table_sql(self.table);
        ctx.run(self.session.execute(&sql, &[]))
            .await?
            .map_err(MigrateError::tracking("create tracking table"))?;

        tracing::debug!(table = %self.table, "Ensured tracking table");
        Ok(())
    }

    /// Every applied record, in apply order
    pub async fn list(&self, ctx: &RunContext) -> MigrateResult<Vec<AppliedRecord>> {
        let sql = select_records_sql(self.table);
        let rows = ctx
            .run(self.session.query(&sql, &[]))
            .await?
            .map_err(MigrateError::tracking("read tracking table"))?;

        let mut records = rows
            .iter()
            .map(AppliedRecord::from_row)
            .collect::<SessionResult<Vec<_>>>()
            .map_err(MigrateError::tracking("decode tracking table"))?;

        records.sort_by(|a, b| self.order.compare(&a.name, &b.name));
        Ok(records)
    }

    /// Append the record for a fully applied unit
    pub async fn record(
        &self,
        ctx: &RunContext,
        unit: &MigrationUnit,
        checksum: &str,
        done: i32,
        started_at: DateTime<Utc>,
    ) -> MigrateResult<AppliedRecord> {
        let record = AppliedRecord {
            name: unit.name.clone(),
            checksum: checksum.to_string(),
            done,
            started_at: Some(started_at),
            applied_at: Some(Utc::now()),
        };

        let sql = insert_record_sql(self.table);
        let values = [
            CqlValue::from(record.name.as_str()),
            CqlValue::from(record.checksum.as_str()),
            CqlValue::Int(record.done),
            CqlValue::Timestamp(started_at),
            record.applied_at.map_or(CqlValue::Null, CqlValue::Timestamp),
        ];

        ctx.run(self.session.execute(&sql, &values))
            .await?
            .map_err(MigrateError::tracking("record migration"))?;
        Ok(record)
    }
}

fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (name text, checksum text, done int, start_time timestamp, end_time timestamp, PRIMARY KEY (name))",
        table
    )
}

fn select_records_sql(table: &str) -> String {
    format!(
        "SELECT name, checksum, done, start_time, end_time FROM {}",
        table
    )
}

fn insert_record_sql(table: &str) -> String {
    format!(
        "INSERT INTO {} (name, checksum, done, start_time, end_time) VALUES (?, ?, ?, ?, ?)",
        table
    )
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::session::{MemorySession, SessionError};

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let session = MemorySession::new();
        let order = NameOrder::default();
        let tracking = TrackingTable::new(&session, "cql_migrations", &order);
        let ctx = RunContext::new();

        tracking.ensure(&ctx).await.unwrap();
        tracking.ensure(&ctx).await.unwrap();
        assert!(session.table_exists("cql_migrations"));
        assert!(tracking.list(&ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_and_list_in_order() {
        let session = MemorySession::new();
        let order = NameOrder::Natural;
        let tracking = TrackingTable::new(&session, "cql_migrations", &order);
        let ctx = RunContext::new();
        tracking.ensure(&ctx).await.unwrap();

        for name in ["10.cql", "2.cql", "1.cql"] {
            let unit = MigrationUnit::new(name, format!("-- {}", name));
            let checksum = unit.checksum();
            let record = tracking
                .record(&ctx, &unit, &checksum, 1, Utc::now())
                .await
                .unwrap();
            assert_eq!(record.checksum, checksum);
            assert!(record.applied_at.is_some());
        }

        let names: Vec<String> = tracking
            .list(&ctx)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["1.cql", "2.cql", "10.cql"]);
    }

    #[tokio::test]
    async fn test_failures_name_the_operation() {
        let session = MemorySession::new();
        let order = NameOrder::default();
        let tracking = TrackingTable::new(&session, "cql_migrations", &order);
        let ctx = RunContext::new();

        // table never created
        let err = tracking.list(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            MigrateError::TrackingTable {
                operation: "read tracking table",
                source: SessionError::Execution(_),
            }
        ));

        session.fail_on("CREATE TABLE");
        let err = tracking.ensure(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("create tracking table"));
    }
}
