//! Core error types for fluent-rs.
//!
//! [`FluentError`] covers every failure the migration engine can surface:
//! registration conflicts, schema builder violations, storage driver
//! failures, ledger inconsistencies, and configuration problems. Step-level
//! failures are wrapped in [`FluentError::StepFailed`] so an operator always
//! sees which migration, phase, and batch produced the underlying error.

use std::fmt;

use thiserror::Error;

/// The phase of a migration step in which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationPhase {
    /// The forward (`prepare`) direction.
    Prepare,
    /// The backward (`revert`) direction.
    Revert,
    /// The ledger write after a step ran; the step's changes are in place
    /// but unrecorded.
    Record,
}

impl MigrationPhase {
    /// Returns the lowercase phase name used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Revert => "revert",
            Self::Record => "record",
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad classification of a [`FluentError`].
///
/// Callers use this to decide whether an error is fatal to boot
/// (`Registration`), fatal to one migration (`Schema`), or an operational
/// failure that can be fixed and re-run (`Driver`, `Ledger`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Raised while registering migrations.
    Registration,
    /// Raised while building a schema change-set.
    Schema,
    /// Raised by the storage driver, or by a step while talking to it.
    Driver,
    /// The ledger disagrees with the registry.
    Ledger,
    /// The run request itself is invalid.
    Request,
    /// Settings are missing or malformed.
    Configuration,
}

/// The primary error type for fluent-rs.
#[derive(Error, Debug)]
pub enum FluentError {
    // ── Registration ─────────────────────────────────────────────────

    /// A migration with this name is already registered for the database.
    #[error("Duplicate migration name '{name}' for database '{database}'")]
    DuplicateName {
        /// The database identifier.
        database: String,
        /// The conflicting migration name.
        name: String,
    },

    // ── Schema builder ───────────────────────────────────────────────

    /// The same field was added twice in one schema builder session.
    #[error("Duplicate field '{field}' in schema '{table}'")]
    DuplicateField {
        /// The table being built.
        table: String,
        /// The duplicated field name.
        field: String,
    },

    /// A field was both added and removed in the same change-set.
    #[error("Field '{field}' is both added and removed in schema '{table}'")]
    ConflictingField {
        /// The table being built.
        table: String,
        /// The conflicting field name.
        field: String,
    },

    /// A table or column name is not a valid identifier.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    // ── Driver ───────────────────────────────────────────────────────

    /// A generic storage driver error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// An operational storage error (connection failure, etc.).
    #[error("Operational error: {0}")]
    OperationalError(String),

    /// A migration step failed. Wraps the underlying error with context.
    #[error("Migration '{name}' failed during {phase} (batch {batch}): {source}")]
    StepFailed {
        /// The migration name.
        name: String,
        /// The phase that failed.
        phase: MigrationPhase,
        /// The batch the step belongs to.
        batch: i64,
        /// The underlying error.
        #[source]
        source: Box<FluentError>,
    },

    /// A step was asked to revert but provides no revert logic.
    #[error("Migration '{name}' does not implement revert")]
    RevertNotImplemented {
        /// The migration name.
        name: String,
    },

    // ── Ledger ───────────────────────────────────────────────────────

    /// The ledger references a migration that is not registered.
    #[error("Ledger inconsistency on '{database}': applied migration '{name}' is not registered")]
    LedgerInconsistency {
        /// The database identifier.
        database: String,
        /// The unregistered migration name.
        name: String,
    },

    // ── Run requests ─────────────────────────────────────────────────

    /// A named migration is not registered for the database.
    #[error("Unknown migration '{name}' for database '{database}'")]
    UnknownMigration {
        /// The database identifier.
        database: String,
        /// The requested migration name.
        name: String,
    },

    /// No backend is configured for the database identifier.
    #[error("Unknown database: {0}")]
    UnknownDatabase(String),

    /// The mode/scope combination is not meaningful.
    #[error("Invalid run request: {0}")]
    InvalidRunRequest(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl FluentError {
    /// Classifies this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DuplicateName { .. } => ErrorCategory::Registration,
            Self::DuplicateField { .. }
            | Self::ConflictingField { .. }
            | Self::InvalidIdentifier(_) => ErrorCategory::Schema,
            Self::DatabaseError(_)
            | Self::OperationalError(_)
            | Self::RevertNotImplemented { .. }
            | Self::IoError(_) => ErrorCategory::Driver,
            Self::StepFailed { source, .. } => source.category(),
            Self::LedgerInconsistency { .. } => ErrorCategory::Ledger,
            Self::UnknownMigration { .. }
            | Self::UnknownDatabase(_)
            | Self::InvalidRunRequest(_) => ErrorCategory::Request,
            Self::ConfigurationError(_) | Self::SerializationError(_) => {
                ErrorCategory::Configuration
            }
        }
    }

    /// Wraps this error with the step context it occurred in.
    pub fn in_step(self, name: impl Into<String>, phase: MigrationPhase, batch: i64) -> Self {
        Self::StepFailed {
            name: name.into(),
            phase,
            batch,
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, unwrapping any [`FluentError::StepFailed`] layers.
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// A convenience type alias for `Result<T, FluentError>`.
pub type FluentResult<T> = Result<T, FluentError>;
