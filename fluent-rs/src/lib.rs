//! # fluent-rs
//!
//! Schema migrations for Rust, organized as named steps per database.
//!
//! This is the meta-crate that re-exports all sub-crates for convenient access.
//! You can depend on `fluent-rs` to get the whole engine, or depend on
//! individual crates for finer-grained control.
//!
//! ## Quick start
//!
//! ```
//! use fluent_rs::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut registry = MigrationRegistry::new();
//! registry
//!     .register(
//!         MigrationStep::auto_derived(
//!             "CreateGalaxy",
//!             ModelDescriptor::new("galaxies")
//!                 .id()
//!                 .field("name", FieldType::String, [FieldConstraint::Required]),
//!         ),
//!         "default",
//!     )
//!     .unwrap();
//!
//! let runner = MigrationRunner::from_settings(registry, &Settings::default()).unwrap();
//! let report = runner.run(RunRequest::forward()).await.unwrap();
//! assert!(report.is_success());
//! # }
//! ```

/// Core error types, settings, and logging.
pub use fluent_rs_core as core;

/// Values, rows, field definitions, and the schema builder.
#[cfg(feature = "db")]
pub use fluent_rs_db as db;

/// Storage drivers: in-memory and `SQLite`.
pub use fluent_rs_db_backends as db_backends;

/// Migration registry, ledger, and runner.
#[cfg(feature = "db-migrations")]
pub use fluent_rs_db_migrations as db_migrations;

/// The commonly used types in one import.
pub mod prelude {
    pub use fluent_rs_core::logging::setup_logging;
    pub use fluent_rs_core::{FluentError, FluentResult, MigrationPhase, Settings};
    pub use fluent_rs_db_backends::{DatabaseBackend, DatabaseId, Databases, MemoryBackend};

    #[cfg(feature = "sqlite")]
    pub use fluent_rs_db_backends::SqliteBackend;

    #[cfg(feature = "db")]
    pub use fluent_rs_db::{
        FieldConstraint, FieldDefinition, FieldType, Filter, OnDelete, Row, SchemaBuilder, Value,
    };

    #[cfg(feature = "db-migrations")]
    pub use fluent_rs_db_migrations::{
        Connection, Migration, MigrationRegistry, MigrationRunner, MigrationStep,
        ModelDescriptor, RunReport, RunRequest, RunScope,
    };

    pub use async_trait::async_trait;
}
