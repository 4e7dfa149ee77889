//! Settings for the fluent-rs migration engine.
//!
//! [`Settings`] holds the database aliases the engine migrates, the name of
//! the reserved ledger table, and logging options. There is no global
//! settings instance: callers load a value (see
//! [`settings_loader`](crate::settings_loader)) and pass it explicitly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The default name of the ledger table.
pub const DEFAULT_LEDGER_TABLE: &str = "_fluent_migrations";

/// Storage configuration for one database identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// The storage engine: `"memory"` or `"sqlite"`.
    pub engine: String,
    /// The database name (a file path for `SQLite`, `:memory:` for in-memory).
    pub name: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            engine: "memory".to_string(),
            name: ":memory:".to_string(),
        }
    }
}

impl DatabaseSettings {
    /// Creates settings for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Creates settings for a `SQLite` database at the given path.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            engine: "sqlite".to_string(),
            name: path.into(),
        }
    }
}

/// The complete set of engine settings.
///
/// # Examples
///
/// ```
/// use fluent_rs_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert_eq!(settings.ledger_table, "_fluent_migrations");
/// assert!(settings.databases.contains_key("default"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Whether debug mode is enabled (pretty logs instead of JSON).
    pub debug: bool,
    /// The log level filter (e.g. "info", "fluent_rs_db_migrations=debug").
    pub log_level: String,
    /// The reserved table that stores the migration ledger.
    pub ledger_table: String,
    /// Database configurations, keyed by database identifier.
    pub databases: HashMap<String, DatabaseSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut databases = HashMap::new();
        databases.insert("default".to_string(), DatabaseSettings::default());

        Self {
            debug: true,
            log_level: "info".to_string(),
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            databases,
        }
    }
}
