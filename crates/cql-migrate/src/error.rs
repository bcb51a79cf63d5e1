//! Error types for the migration engine
//!
//! Every failure aborts the run and is returned to the caller; nothing is
//! retried by the engine.

use thiserror::Error;

use crate::callback::{BoxError, EventKind};
use crate::catalog::CatalogError;
use crate::lexer::ParseError;
use crate::session::SessionError;

/// Migration run errors
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Failed to parse migration {migration}: {source}")]
    Parse {
        migration: String,
        #[source]
        source: ParseError,
    },

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Tracking table error: failed to {operation}: {source}")]
    TrackingTable {
        operation: &'static str,
        #[source]
        source: SessionError,
    },

    #[error("Database is ahead of the catalog: {applied} migrations applied but only {available} found")]
    Ahead { applied: usize, available: usize },

    #[error("Inconsistent migrations at position {position}: expected {expected}, applied {found}")]
    Inconsistent {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("Migration {name} has been tampered with: recorded checksum {recorded}, catalog checksum {current}")]
    Tampered {
        name: String,
        recorded: String,
        current: String,
    },

    #[error("Migration {migration} failed at statement {index}: {source}")]
    Execution {
        migration: String,
        index: usize,
        statement: String,
        #[source]
        source: SessionError,
    },

    #[error("Callback {event:?}{} for migration {migration} failed: {source}", directive_suffix(.name))]
    Callback {
        migration: String,
        event: EventKind,
        name: Option<String>,
        #[source]
        source: BoxError,
    },

    #[error("Schema agreement failed: {0}")]
    SchemaAgreement(#[source] SessionError),

    #[error("Migration run cancelled")]
    Cancelled,

    #[error("Migration run deadline exceeded")]
    DeadlineExceeded,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

impl MigrateError {
    /// Errors raised before any migration content is executed
    pub fn is_divergence(&self) -> bool {
        matches!(
            self,
            MigrateError::Ahead { .. } | MigrateError::Inconsistent { .. } | MigrateError::Tampered { .. }
        )
    }

    /// Whether the run was interrupted by cancellation or its deadline
    pub fn is_interrupted(&self) -> bool {
        matches!(self, MigrateError::Cancelled | MigrateError::DeadlineExceeded)
    }

    pub(crate) fn tracking(operation: &'static str) -> impl FnOnce(SessionError) -> Self {
        move |source| MigrateError::TrackingTable { operation, source }
    }
}

fn directive_suffix(name: &Option<String>) -> String {
    name.as_deref()
        .map(|name| format!(" '{}'", name))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divergence_messages_name_the_problem() {
        let ahead = MigrateError::Ahead {
            applied: 4,
            available: 2,
        };
        let message = ahead.to_string();
        assert!(message.contains("ahead"));
        assert!(message.contains('4') && message.contains('2'));
        assert!(ahead.is_divergence());

        let tampered = MigrateError::Tampered {
            name: "3.cql".to_string(),
            recorded: "abc".to_string(),
            current: "def".to_string(),
        };
        assert!(tampered.to_string().contains("tampered"));
        assert!(tampered.to_string().contains("3.cql"));
    }

    #[test]
    fn test_callback_message_includes_directive_name() {
        let err = MigrateError::Callback {
            migration: "4.cql".to_string(),
            event: EventKind::CallComment,
            name: Some("Foo".to_string()),
            source: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "Callback CallComment 'Foo' for migration 4.cql failed: boom"
        );
        assert!(!err.is_interrupted());
        assert!(MigrateError::Cancelled.is_interrupted());
    }
}
