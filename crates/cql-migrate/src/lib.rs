//! # cql-migrate
//!
//! Versioned schema migrations for Cassandra and ScyllaDB clusters.
//!
//! ## Features
//!
//! - **Exactly once**: every migration file is applied once, in order, and recorded in a tracking table
//! - **Tamper detection**: applied files are checksummed; edits to them fail the run
//! - **Divergence checks**: a database ahead of, or out of step with, the catalog is a hard error
//! - **Callbacks**: lifecycle hooks and `-- CALL <name>;` directives for data migrations
//! - **Pluggable**: any CQL driver through the [`Session`] trait, any file source through [`CatalogSource`]
//! - **Cancellable**: every run honours a cancellation token and an optional deadline
//!
//! ## Quick Start
//!
//! ```rust
//! use cql_migrate::{apply, pending, MemoryCatalog, MemorySession, RunContext};
//!
//! # tokio_test::block_on(async {
//! let session = MemorySession::new();
//! let catalog = MemoryCatalog::from_embedded(&[
//!     ("0.cql", "CREATE TABLE users (id int PRIMARY KEY, name text);"),
//!     ("1.cql", "-- seed data\nINSERT INTO users (id, name) VALUES (1, 'ada');"),
//! ]);
//! let ctx = RunContext::new();
//!
//! assert_eq!(pending(&ctx, &session, &catalog).await.unwrap().len(), 2);
//!
//! let report = apply(&ctx, &session, &catalog).await.unwrap();
//! assert_eq!(report.applied, vec!["0.cql", "1.cql"]);
//! assert_eq!(session.rows("users").unwrap().len(), 1);
//! # });
//! ```

pub mod callback;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod lexer;
pub mod migrator;
pub mod session;
pub mod tracking;

pub use callback::*;
pub use catalog::*;
pub use config::*;
pub use context::RunContext;
pub use error::{MigrateError, MigrateResult};
pub use lexer::*;
pub use migrator::{ApplyReport, Migrator};
pub use session::*;
pub use tracking::{AppliedRecord, TrackingTable};

/// Units not applied yet, using the default [`Migrator`]
pub async fn pending(
    ctx: &RunContext,
    session: &dyn Session,
    catalog: &dyn CatalogSource,
) -> MigrateResult<Vec<MigrationUnit>> {
    Migrator::default().pending(ctx, session, catalog).await
}

/// Apply every pending unit, using the default [`Migrator`]
pub async fn apply(
    ctx: &RunContext,
    session: &dyn Session,
    catalog: &dyn CatalogSource,
) -> MigrateResult<ApplyReport> {
    Migrator::default().apply(ctx, session, catalog).await
}
