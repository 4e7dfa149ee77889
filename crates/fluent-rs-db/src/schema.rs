//! The schema builder and the change-sets it produces.
//!
//! A [`SchemaBuilder`] accumulates field operations for one logical table and
//! [`build`](SchemaBuilder::build)s an immutable [`SchemaChangeSet`]. The
//! builder never touches a database: a storage driver consumes the
//! change-set through `create_table` / `alter_table`.
//!
//! ```
//! use fluent_rs_db::fields::{FieldConstraint, FieldType};
//! use fluent_rs_db::schema::SchemaBuilder;
//!
//! let changes = SchemaBuilder::new("galaxies")
//!     .id()
//!     .field("name", FieldType::String, [FieldConstraint::Required])
//!     .build()
//!     .unwrap();
//! assert_eq!(changes.table(), "galaxies");
//! assert_eq!(changes.operations().len(), 2);
//! ```

use std::collections::HashSet;

use fluent_rs_core::{FluentError, FluentResult};

use crate::fields::{FieldConstraint, FieldDefinition, FieldType};

/// A single field-level schema operation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOperation {
    /// Add a field.
    Add(FieldDefinition),
    /// Remove a field.
    Remove {
        /// The field name.
        name: String,
    },
    /// Change a field's type.
    Alter {
        /// The field name.
        name: String,
        /// The new type.
        field_type: FieldType,
    },
}

impl FieldOperation {
    /// Returns the name of the field this operation targets.
    pub fn field_name(&self) -> &str {
        match self {
            Self::Add(field) => &field.name,
            Self::Remove { name } | Self::Alter { name, .. } => name,
        }
    }

    /// Returns a human-readable description of this operation.
    pub fn describe(&self) -> String {
        match self {
            Self::Add(field) => format!("add field {} ({})", field.name, field.field_type),
            Self::Remove { name } => format!("remove field {name}"),
            Self::Alter { name, field_type } => format!("alter field {name} to {field_type}"),
        }
    }
}

/// An immutable, ordered set of field operations for one table.
///
/// Operations are applied in declaration order. A change-set never adds and
/// removes the same field.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaChangeSet {
    table: String,
    if_not_exists: bool,
    operations: Vec<FieldOperation>,
    unique_constraints: Vec<Vec<String>>,
}

impl SchemaChangeSet {
    /// The table this change-set applies to.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether `create_table` should succeed silently when the table exists.
    pub fn if_not_exists(&self) -> bool {
        self.if_not_exists
    }

    /// The field operations, in declaration order.
    pub fn operations(&self) -> &[FieldOperation] {
        &self.operations
    }

    /// Table-level unique constraints (each a list of field names).
    pub fn unique_constraints(&self) -> &[Vec<String>] {
        &self.unique_constraints
    }

    /// Iterates over the fields added by this change-set.
    pub fn added_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.operations.iter().filter_map(|op| match op {
            FieldOperation::Add(field) => Some(field),
            _ => None,
        })
    }

    /// Returns `true` if there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.unique_constraints.is_empty()
    }
}

/// Accumulates field operations for one table.
///
/// Violations (a field added twice, or both added and removed) are
/// remembered and reported by [`build`](Self::build), so a chain of builder
/// calls never needs intermediate `?`.
#[derive(Debug)]
pub struct SchemaBuilder {
    table: String,
    if_not_exists: bool,
    operations: Vec<FieldOperation>,
    unique_constraints: Vec<Vec<String>>,
    added: HashSet<String>,
    removed: HashSet<String>,
    error: Option<FluentError>,
}

impl SchemaBuilder {
    /// Starts a builder for the given table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            if_not_exists: false,
            operations: Vec::new(),
            unique_constraints: Vec::new(),
            added: HashSet::new(),
            removed: HashSet::new(),
            error: None,
        }
    }

    /// Appends an add-field operation.
    pub fn field(
        self,
        name: impl Into<String>,
        field_type: FieldType,
        constraints: impl IntoIterator<Item = FieldConstraint>,
    ) -> Self {
        self.add_field(FieldDefinition::with_constraints(name, field_type, constraints))
    }

    /// Appends an add-field operation for a prepared definition.
    pub fn add_field(mut self, field: FieldDefinition) -> Self {
        if !self.added.insert(field.name.clone()) {
            self.fail(FluentError::DuplicateField {
                table: self.table.clone(),
                field: field.name.clone(),
            });
        } else if self.removed.contains(&field.name) {
            self.fail(FluentError::ConflictingField {
                table: self.table.clone(),
                field: field.name.clone(),
            });
        }
        self.operations.push(FieldOperation::Add(field));
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

    /// Appends a remove-field operation.
    pub fn delete_field(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if self.added.contains(&name) {
            self.fail(FluentError::ConflictingField {
                table: self.table.clone(),
                field: name.clone(),
            });
        }
        self.removed.insert(name.clone());
        self.operations.push(FieldOperation::Remove { name });
        self
    }

    /// Appends an alter-field operation changing the field's type.
    pub fn update_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.operations.push(FieldOperation::Alter {
            name: name.into(),
            field_type,
        });
        self
    }

    /// Adds a table-level unique constraint over the given fields.
    pub fn unique<S: Into<String>>(mut self, on: impl IntoIterator<Item = S>) -> Self {
        self.unique_constraints
            .push(on.into_iter().map(Into::into).collect());
        self
    }

    /// Makes `create_table` a no-op when the table already exists.
    pub fn ignore_existing(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    /// Produces the immutable change-set.
    ///
    /// # Errors
    ///
    /// Returns the first violation recorded while building:
    /// [`FluentError::DuplicateField`] or [`FluentError::ConflictingField`],
    /// or [`FluentError::InvalidIdentifier`] for an empty table name.
    pub fn build(self) -> FluentResult<SchemaChangeSet> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.table.trim().is_empty() {
            return Err(FluentError::InvalidIdentifier(
                "schema table name is empty".to_string(),
            ));
        }
        Ok(SchemaChangeSet {
            table: self.table,
            if_not_exists: self.if_not_exists,
            operations: self.operations,
            unique_constraints: self.unique_constraints,
        })
    }

    fn fail(&mut self, err: FluentError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}
