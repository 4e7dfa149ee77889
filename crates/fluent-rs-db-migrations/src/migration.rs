//! Migration steps.
//!
//! A [`MigrationStep`] is the unit the runner executes. It comes in two
//! shapes:
//!
//! - [`MigrationStep::AutoDerived`] creates a table from a
//!   [`ModelDescriptor`] and drops it on revert.
//! - [`MigrationStep::Custom`] wraps a user-defined [`Migration`].
//!
//! ```
//! use fluent_rs_db::fields::{FieldConstraint, FieldType};
//! use fluent_rs_db_migrations::migration::{MigrationStep, ModelDescriptor};
//!
//! let galaxy = ModelDescriptor::new("galaxies")
//!     .id()
//!     .field("name", FieldType::String, [FieldConstraint::Required]);
//! let step = MigrationStep::auto_derived("CreateGalaxy", galaxy);
//! assert_eq!(step.name(), "CreateGalaxy");
//! assert!(step.reversible());
//! ```

use std::fmt;
use std::sync::Arc;

use fluent_rs_core::{FluentError, FluentResult};
use fluent_rs_db::fields::{FieldConstraint, FieldDefinition, FieldType};
use fluent_rs_db::schema::{SchemaBuilder, SchemaChangeSet};

use crate::connection::Connection;

/// A user-defined migration.
///
/// Implementors provide `prepare`; `revert` defaults to an error so that a
/// forgotten revert is reported rather than silently skipped. A migration
/// that cannot be undone on purpose returns `false` from
/// [`reversible`](Self::reversible): the runner then never calls `revert`
/// and only removes the ledger entry.
#[async_trait::async_trait]
pub trait Migration: Send + Sync {
    /// The unique name of this migration within its database.
    fn name(&self) -> &str;

    /// Applies the change.
    async fn prepare(&self, conn: &Connection) -> FluentResult<()>;

    /// Undoes the change.
    async fn revert(&self, _conn: &Connection) -> FluentResult<()> {
        Err(FluentError::RevertNotImplemented {
            name: self.name().to_string(),
        })
    }

    /// Returns whether this migration can be reverted.
    fn reversible(&self) -> bool {
        true
    }
}

/// A storage-neutral description of a model's table.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    /// The table (schema) name.
    pub schema: String,
    /// The fields, in declaration order.
    pub fields: Vec<FieldDefinition>,
    /// Table-level unique constraints.
    pub unique_constraints: Vec<Vec<String>>,
}

impl ModelDescriptor {
    /// Creates a descriptor with no fields.
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            fields: Vec::new(),
            unique_constraints: Vec::new(),
        }
    }

    /// Adds a field.
    pub fn field(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        constraints: impl IntoIterator<Item = FieldConstraint>,
    ) -> Self {
        self.fields
            .push(FieldDefinition::with_constraints(name, field_type, constraints));
        self
    }

    /// Adds the conventional `id` UUID primary key.
    pub fn id(self) -> Self {
        self.field(
            "id",
            FieldType::Uuid,
            [FieldConstraint::Identifier { auto: false }],
        )
    }

    /// Adds a unique constraint over the given fields.
    pub fn unique<S: Into<String>>(mut self, on: impl IntoIterator<Item = S>) -> Self {
        self.unique_constraints
            .push(on.into_iter().map(Into::into).collect());
        self
    }

    /// Maps the descriptor onto the change-set that creates its table.
    ///
    /// # Errors
    ///
    /// Returns the schema builder's error for duplicate fields or an empty
    /// table name.
    pub fn to_change_set(&self) -> FluentResult<SchemaChangeSet> {
        let builder = self
            .fields
            .iter()
            .cloned()
            .fold(SchemaBuilder::new(self.schema.clone()), SchemaBuilder::add_field);
        self.unique_constraints
            .iter()
            .fold(builder, |b, on| b.unique(on.iter().cloned()))
            .build()
    }
}

/// A registered unit of migration.
#[derive(Clone)]
pub enum MigrationStep {
    /// Creates the model's table on prepare, drops it on revert.
    AutoDerived {
        /// The step name.
        name: String,
        /// The model whose table is managed.
        model: ModelDescriptor,
    },
    /// A user-defined migration.
    Custom(Arc<dyn Migration>),
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoDerived { name, model } => f
                .debug_struct("AutoDerived")
                .field("name", name)
                .field("schema", &model.schema)
                .finish(),
            Self::Custom(migration) => f.debug_tuple("Custom").field(&migration.name()).finish(),
        }
    }
}

impl MigrationStep {
    /// Creates an auto-derived step for `model`.
    pub fn auto_derived(name: impl Into<String>, model: ModelDescriptor) -> Self {
        Self::AutoDerived {
            name: name.into(),
            model,
        }
    }

    /// Wraps a custom migration.
    pub fn custom(migration: impl Migration + 'static) -> Self {
        Self::Custom(Arc::new(migration))
    }

    /// The step name.
    pub fn name(&self) -> &str {
        match self {
            Self::AutoDerived { name, .. } => name,
            Self::Custom(migration) => migration.name(),
        }
    }

    /// Whether the step can be reverted.
    pub fn reversible(&self) -> bool {
        match self {
            Self::AutoDerived { .. } => true,
            Self::Custom(migration) => migration.reversible(),
        }
    }

    /// Applies the step.
    pub async fn prepare(&self, conn: &Connection) -> FluentResult<()> {
        match self {
            Self::AutoDerived { model, .. } => conn.create(&model.to_change_set()?).await,
            Self::Custom(migration) => migration.prepare(conn).await,
        }
    }

    /// Reverts the step.
    pub async fn revert(&self, conn: &Connection) -> FluentResult<()> {
        match self {
            Self::AutoDerived { model, .. } => conn.drop_table(&model.schema).await,
            Self::Custom(migration) => migration.revert(conn).await,
        }
    }
}

impl<M: Migration + 'static> From<M> for MigrationStep {
    fn from(migration: M) -> Self {
        Self::custom(migration)
    }
}
