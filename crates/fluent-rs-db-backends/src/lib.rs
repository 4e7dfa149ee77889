//! # fluent-rs-db-backends
//!
//! Storage drivers consumed by the fluent-rs migration engine. The engine
//! only talks to the [`DatabaseBackend`] trait; it never parses driver
//! syntax.
//!
//! Provided backends:
//! - [`MemoryBackend`] - in-process tables, records every schema statement
//! - `SqliteBackend` - `rusqlite`-based, behind the `sqlite` feature
//!
//! [`Databases`] maps each [`DatabaseId`] to the backend it migrates.

#![allow(clippy::result_large_err)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::module_name_repetitions)]

pub mod base;
pub mod databases;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use base::DatabaseBackend;
pub use databases::{DatabaseId, Databases};
pub use memory::MemoryBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
