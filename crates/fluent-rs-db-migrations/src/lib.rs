//! # fluent-rs-db-migrations
//!
//! The migration engine for fluent-rs. Applies and reverts ordered schema
//! and data changes, records what ran in a ledger table inside each migrated
//! store, and reports partial failures per database.
//!
//! ## Architecture
//!
//! - [`MigrationStep`] is a named unit with `prepare` / `revert`, either
//!   auto-derived from a [`ModelDescriptor`] or a custom [`Migration`].
//! - [`MigrationRegistry`] holds steps per [`DatabaseId`] in registration order.
//! - [`MigrationLedger`] persists applied names, batches, and apply order.
//! - [`MigrationRunner`] computes the pending set and executes it, one task
//!   per database.
//!
//! ## Module Overview
//!
//! - [`migration`] - `Migration` trait, `MigrationStep`, `ModelDescriptor`
//! - [`connection`] - `Connection` handle passed to every step
//! - [`registry`] - `MigrationRegistry`
//! - [`ledger`] - `MigrationLedger`, `LedgerEntry`
//! - [`executor`] - `MigrationRunner`, `RunRequest`, `RunReport`
//!
//! [`DatabaseId`]: fluent_rs_db_backends::DatabaseId

#![allow(clippy::result_large_err)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::significant_drop_tightening)]

pub mod connection;
pub mod executor;
pub mod ledger;
pub mod migration;
pub mod registry;

// Re-export key types at the crate root.
pub use connection::Connection;
pub use executor::{
    DatabaseReport, DatabaseStatus, MigrationPlan, MigrationRunner, PlannedStep, RunMode,
    RunReport, RunRequest, RunScope, StepFailure, StepState, StepStatus,
};
pub use ledger::{LedgerEntry, MigrationLedger};
pub use migration::{Migration, MigrationStep, ModelDescriptor};
pub use registry::MigrationRegistry;
