//! # fluent-rs-core
//!
//! Core types shared by every fluent-rs crate: the [`FluentError`] type,
//! migration settings and their loaders, and tracing-based logging setup.
//! This crate has no framework dependencies.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`settings`] - Engine settings (databases, ledger table, logging)
//! - [`settings_loader`] - Loading settings from TOML, JSON, and the environment
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{ErrorCategory, FluentError, FluentResult, MigrationPhase};
pub use settings::{DatabaseSettings, Settings};
