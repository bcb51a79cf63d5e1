//! Migrator configuration types and builders

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use service_builder::builder;
use std::time::Duration;

use crate::error::{MigrateError, MigrateResult};

/// Cassandra/Scylla limit on table and keyspace name length
pub const MAX_IDENTIFIER_LENGTH: usize = 48;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid regex"));

/// When to wait for schema agreement across the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaAgreement {
    /// Never wait
    Disabled,
    /// Once, after every pending unit has been applied
    #[default]
    AfterAll,
    /// Before applying each unit
    BeforeEachFile,
    /// Before executing each statement
    BeforeEachStatement,
}

/// Configuration for the migrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[builder]
pub struct MigrateConfig {
    /// Tracking table name, optionally keyspace-qualified
    #[builder(default = "\"cql_migrations\".to_string()", getter)]
    pub table: String,

    /// Extension of migration files (empty = every file)
    #[builder(default = "\"cql\".to_string()", getter)]
    pub extension: String,

    /// Schema agreement mode
    #[builder(default = "SchemaAgreement::AfterAll", getter)]
    pub schema_agreement: SchemaAgreement,

    /// Overall run timeout, applied when the caller sets no deadline
    #[builder(default = "None", getter)]
    pub timeout: Option<Duration>,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            table: "cql_migrations".to_string(),
            extension: "cql".to_string(),
            schema_agreement: SchemaAgreement::AfterAll,
            timeout: None,
        }
    }
}

impl MigrateConfig {
    /// Check the configuration before it touches a cluster
    pub fn validate(&self) -> MigrateResult<()> {
        validate_table_name(&self.table)?;

        if self.extension.starts_with('.') {
            return Err(MigrateError::Configuration(format!(
                "Extension '{}' must not start with a dot",
                self.extension
            )));
        }
        if self.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(MigrateError::Configuration(
                "Timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl MigrateConfigBuilder {
    /// Create a development configuration with a short timeout
    pub fn development() -> Self {
        MigrateConfigBuilder::new()
            .table("cql_migrations_dev".to_string())
            .timeout(Some(Duration::from_secs(60)))
    }

    /// Create a production configuration waiting for agreement before each unit
    pub fn production() -> Self {
        MigrateConfigBuilder::new()
            .schema_agreement(SchemaAgreement::BeforeEachFile)
            .timeout(Some(Duration::from_secs(1800)))
    }

    /// Create a testing configuration with no agreement waits
    pub fn testing() -> Self {
        MigrateConfigBuilder::new()
            .schema_agreement(SchemaAgreement::Disabled)
            .timeout(Some(Duration::from_secs(10)))
    }
}

/// Validate a tracking table name, `table` or `keyspace.table`
pub fn validate_table_name(name: &str) -> MigrateResult<()> {
    if name.is_empty() {
        return Err(MigrateError::Configuration(
            "Table name cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(MigrateError::Configuration(format!(
            "Table name '{}' has more than one keyspace qualifier",
            name
        )));
    }

    for part in parts {
        if part.len() > MAX_IDENTIFIER_LENGTH {
            return Err(MigrateError::Configuration(format!(
                "Identifier '{}' is too long (max {} characters)",
                part, MAX_IDENTIFIER_LENGTH
            )));
        }
        if !IDENTIFIER.is_match(part) {
            return Err(MigrateError::Configuration(format!(
                "Identifier '{}' must start with a letter and contain only letters, digits and underscores",
                part
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_migrate_config() {
        let config = MigrateConfig::default();
        assert_eq!(config.table, "cql_migrations");
        assert_eq!(config.extension, "cql");
        assert_eq!(config.schema_agreement, SchemaAgreement::AfterAll);
        assert!(config.timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_migrate_config_builder() {
        let config = MigrateConfigBuilder::new()
            .table("app.schema_history".to_string())
            .timeout(Some(Duration::from_secs(30)))
            .build()
            .expect("Failed to build config");

        assert_eq!(config.get_table(), "app.schema_history");
        assert_eq!(*config.get_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.get_extension(), "cql"); // Default
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        let development = MigrateConfigBuilder::development()
            .build()
            .expect("Failed to build config");
        assert_eq!(development.get_table(), "cql_migrations_dev");

        let production = MigrateConfigBuilder::production()
            .build()
            .expect("Failed to build config");
        assert_eq!(
            *production.get_schema_agreement(),
            SchemaAgreement::BeforeEachFile
        );

        let testing = MigrateConfigBuilder::testing()
            .build()
            .expect("Failed to build config");
        assert_eq!(*testing.get_schema_agreement(), SchemaAgreement::Disabled);
        assert_eq!(*testing.get_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("cql_migrations").is_ok());
        assert!(validate_table_name("ks.cql_migrations").is_ok());

        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("1table").is_err());
        assert!(validate_table_name("table-name").is_err());
        assert!(validate_table_name("a.b.c").is_err());
        assert!(validate_table_name("users; DROP TABLE users").is_err());
        assert!(validate_table_name(&"t".repeat(49)).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let config = MigrateConfig {
            extension: ".cql".to_string(),
            ..MigrateConfig::default()
        };
        assert!(matches!(config.validate(), Err(MigrateError::Configuration(_))));

        let config = MigrateConfig {
            timeout: Some(Duration::ZERO),
            ..MigrateConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
