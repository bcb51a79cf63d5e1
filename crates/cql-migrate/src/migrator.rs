//! Migrator - Computes pending migrations and applies them in order
//!
//! A run validates the applied prefix against the catalog before anything is
//! executed. Records that do not match the catalog (the database is ahead,
//! names diverge or content changed after it was applied) fail the run.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::callback::{Callback, CallbackEvent};
use crate::catalog::{Catalog, CatalogSource, MigrationUnit, NameOrder};
use crate::config::{MigrateConfig, SchemaAgreement};
use crate::context::RunContext;
use crate::error::{MigrateError, MigrateResult};
use crate::lexer::{split_bytes, ParsedItem};
use crate::session::Session;
use crate::tracking::{AppliedRecord, TrackingTable};

/// Result of an apply run
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    /// Units applied by this run, in order
    pub applied: Vec<String>,
    /// Units that were already applied
    pub skipped: usize,
    pub elapsed: Duration,
}

impl ApplyReport {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn is_up_to_date(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Migration engine
///
/// ```
/// use cql_migrate::{MemoryCatalog, MemorySession, Migrator, RunContext};
///
/// # tokio_test::block_on(async {
/// let session = MemorySession::new();
/// let catalog = MemoryCatalog::from_embedded(&[
///     ("0.cql", "CREATE TABLE users (id int PRIMARY KEY, name text);"),
/// ]);
///
/// let migrator = Migrator::new();
/// let ctx = RunContext::new();
/// assert_eq!(migrator.pending(&ctx, &session, &catalog).await.unwrap().len(), 1);
///
/// let report = migrator.apply(&ctx, &session, &catalog).await.unwrap();
/// assert_eq!(report.applied, vec!["0.cql"]);
/// assert!(migrator.pending(&ctx, &session, &catalog).await.unwrap().is_empty());
/// # });
/// ```
#[derive(Clone, Default)]
pub struct Migrator {
    config: MigrateConfig,
    order: NameOrder,
    callback: Option<Arc<dyn Callback>>,
}

struct Plan {
    applied: usize,
    pending: Vec<MigrationUnit>,
}

impl Migrator {
    /// Create a migrator with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: MigrateConfig) -> Self {
        self.config = config;
        self
    }

    /// Order in which catalog names are applied
    pub fn with_order(mut self, order: NameOrder) -> Self {
        self.order = order;
        self
    }

    /// Handler for lifecycle events and `-- CALL` directives
    pub fn with_callback(mut self, callback: impl Callback + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    pub fn order(&self) -> &NameOrder {
        &self.order
    }

    /// Units not applied yet, in apply order
    ///
    /// Creates the tracking table if missing but never executes or records
    /// migration content.
    pub async fn pending(
        &self,
        ctx: &RunContext,
        session: &dyn Session,
        catalog: &dyn CatalogSource,
    ) -> MigrateResult<Vec<MigrationUnit>> {
        self.config.validate()?;
        let ctx = ctx.or_timeout(*self.config.get_timeout());
        let tracking = self.tracking(session);

        let plan = self.plan(&ctx, &tracking, catalog).await?;
        Ok(plan.pending)
    }

    /// Records of every applied unit, in apply order
    pub async fn applied(
        &self,
        ctx: &RunContext,
        session: &dyn Session,
    ) -> MigrateResult<Vec<AppliedRecord>> {
        self.config.validate()?;
        let ctx = ctx.or_timeout(*self.config.get_timeout());
        let tracking = self.tracking(session);

        tracking.ensure(&ctx).await?;
        tracking.list(&ctx).await
    }

    /// Apply every pending unit in order
    pub async fn apply(
        &self,
        ctx: &RunContext,
        session: &dyn Session,
        catalog: &dyn CatalogSource,
    ) -> MigrateResult<ApplyReport> {
        let start_time = Instant::now();
        self.config.validate()?;
        let ctx = ctx.or_timeout(*self.config.get_timeout());
        let tracking = self.tracking(session);

        let plan = self.plan(&ctx, &tracking, catalog).await?;
        if plan.pending.is_empty() {
            tracing::debug!(applied = plan.applied, "No pending migrations");
        }

        let mut applied = Vec::with_capacity(plan.pending.len());
        for unit in &plan.pending {
            if *self.config.get_schema_agreement() == SchemaAgreement::BeforeEachFile {
                self.await_schema_agreement(&ctx, session).await?;
            }

            let unit_start = Instant::now();
            let done = self.apply_unit(&ctx, session, &tracking, unit).await?;
            tracing::info!(
                migration = %unit.name,
                statements = done,
                elapsed_ms = unit_start.elapsed().as_millis() as u64,
                "Applied migration"
            );
            applied.push(unit.name.clone());
        }

        if *self.config.get_schema_agreement() == SchemaAgreement::AfterAll {
            self.await_schema_agreement(&ctx, session).await?;
        }

        let report = ApplyReport {
            applied,
            skipped: plan.applied,
            elapsed: start_time.elapsed(),
        };
        tracing::info!(
            applied = report.applied.len(),
            skipped = report.skipped,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Migration run complete"
        );
        Ok(report)
    }

    fn tracking<'a>(&'a self, session: &'a dyn Session) -> TrackingTable<'a> {
        TrackingTable::new(session, self.config.get_table(), &self.order)
    }

    async fn plan(
        &self,
        ctx: &RunContext,
        tracking: &TrackingTable<'_>,
        catalog: &dyn CatalogSource,
    ) -> MigrateResult<Plan> {
        tracking.ensure(ctx).await?;
        let records = tracking.list(ctx).await?;

        let catalog = Catalog::new(catalog, self.config.get_extension(), &self.order);
        let mut units = ctx.run(catalog.list()).await??;

        check_consistency(&records, &units)?;

        let pending = units.split_off(records.len());
        tracing::debug!(
            applied = records.len(),
            pending = pending.len(),
            "Computed pending migrations"
        );
        Ok(Plan {
            applied: records.len(),
            pending,
        })
    }

    /// Execute one unit and record it; returns the number of statements run
    async fn apply_unit(
        &self,
        ctx: &RunContext,
        session: &dyn Session,
        tracking: &TrackingTable<'_>,
        unit: &MigrationUnit,
    ) -> MigrateResult<i32> {
        let started_at = Utc::now();
        let checksum = unit.checksum();

        self.emit(
            ctx,
            session,
            CallbackEvent::BeforeMigration {
                migration: unit.name.clone(),
            },
        )
        .await?;

        let items = split_bytes(&unit.content).map_err(|source| MigrateError::Parse {
            migration: unit.name.clone(),
            source,
        })?;

        let mut done = 0i32;
        for item in items {
            match item {
                ParsedItem::Statement(statement) => {
                    if *self.config.get_schema_agreement() == SchemaAgreement::BeforeEachStatement {
                        self.await_schema_agreement(ctx, session).await?;
                    }

                    tracing::debug!(migration = %unit.name, index = done, "Executing statement");
                    let result = ctx.run(session.execute(&statement, &[])).await?;
                    result.map_err(|source| MigrateError::Execution {
                        migration: unit.name.clone(),
                        index: done as usize,
                        statement,
                        source,
                    })?;
                    done += 1;
                }
                ParsedItem::Callback(name) => {
                    self.emit(
                        ctx,
                        session,
                        CallbackEvent::CallComment {
                            migration: unit.name.clone(),
                            name,
                        },
                    )
                    .await?;
                }
                ParsedItem::Comment(_) => {}
            }
        }

        self.emit(
            ctx,
            session,
            CallbackEvent::AfterMigration {
                migration: unit.name.clone(),
            },
        )
        .await?;

        tracking.record(ctx, unit, &checksum, done, started_at).await?;
        Ok(done)
    }

    async fn emit(
        &self,
        ctx: &RunContext,
        session: &dyn Session,
        event: CallbackEvent,
    ) -> MigrateResult<()> {
        let Some(callback) = &self.callback else {
            return Ok(());
        };

        ctx.run(callback.call(session, &event))
            .await?
            .map_err(|source| MigrateError::Callback {
                migration: event.migration().to_string(),
                event: event.kind(),
                name: event.name().map(str::to_string),
                source,
            })
    }

    async fn await_schema_agreement(
        &self,
        ctx: &RunContext,
        session: &dyn Session,
    ) -> MigrateResult<()> {
        ctx.run(session.await_schema_agreement())
            .await?
            .map_err(MigrateError::SchemaAgreement)
    }
}

impl fmt::Debug for Migrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("config", &self.config)
            .field("order", &self.order)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Applied records must be a prefix of the catalog with matching checksums
fn check_consistency(records: &[AppliedRecord], units: &[MigrationUnit]) -> MigrateResult<()> {
    if units.len() < records.len() {
        tracing::warn!(
            applied = records.len(),
            available = units.len(),
            "Database is ahead of the migration catalog"
        );
        return Err(MigrateError::Ahead {
            applied: records.len(),
            available: units.len(),
        });
    }

    for (position, (record, unit)) in records.iter().zip(units).enumerate() {
        if record.name != unit.name {
            tracing::warn!(
                position,
                expected = %unit.name,
                found = %record.name,
                "Applied migrations diverge from the catalog"
            );
            return Err(MigrateError::Inconsistent {
                position,
                expected: unit.name.clone(),
                found: record.name.clone(),
            });
        }

        let current = unit.checksum();
        if record.checksum != current {
            tracing::warn!(migration = %unit.name, "Applied migration was modified");
            return Err(MigrateError::Tampered {
                name: unit.name.clone(),
                recorded: record.checksum.clone(),
                current,
            });
        }
    }
    Ok(())
}
