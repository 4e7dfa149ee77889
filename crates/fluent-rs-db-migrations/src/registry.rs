//! The migration registry.
//!
//! Steps are registered per [`DatabaseId`] at startup. Registration order is
//! forward execution order, and revert order is its exact reverse.

use std::collections::HashMap;
use std::sync::Arc;

use fluent_rs_core::{FluentError, FluentResult};
use fluent_rs_db_backends::DatabaseId;

use crate::migration::MigrationStep;

/// An ordered collection of migration steps keyed by database and name.
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    databases: Vec<DatabaseId>,
    steps: HashMap<DatabaseId, Vec<Arc<MigrationStep>>>,
}

impl MigrationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `step` to the chain of `database`.
    ///
    /// # Errors
    ///
    /// Returns [`FluentError::DuplicateName`] if a step with the same name is
    /// already registered for `database`.
    pub fn register(
        &mut self,
        step: impl Into<MigrationStep>,
        database: impl Into<DatabaseId>,
    ) -> FluentResult<()> {
        let step = step.into();
        let database = database.into();
        if self.contains(&database, step.name()) {
            return Err(FluentError::DuplicateName {
                database: database.to_string(),
                name: step.name().to_string(),
            });
        }
        tracing::debug!(database = %database, migration = step.name(), "registered migration");
        if !self.steps.contains_key(&database) {
            self.databases.push(database.clone());
        }
        self.steps.entry(database).or_default().push(Arc::new(step));
        Ok(())
    }

    /// Iterates over the steps of `database` in registration order.
    pub fn all_steps(&self, database: &DatabaseId) -> impl Iterator<Item = &Arc<MigrationStep>> {
        self.steps.get(database).into_iter().flatten()
    }

    /// Returns the databases with registered steps, in first-registration order.
    pub fn databases(&self) -> &[DatabaseId] {
        &self.databases
    }

    /// Looks up a step by name.
    pub fn get(&self, database: &DatabaseId, name: &str) -> Option<&Arc<MigrationStep>> {
        self.all_steps(database).find(|step| step.name() == name)
    }

    /// Returns whether `name` is registered for `database`.
    pub fn contains(&self, database: &DatabaseId, name: &str) -> bool {
        self.get(database, name).is_some()
    }

    /// Returns the total number of registered steps.
    pub fn len(&self) -> usize {
        self.steps.values().map(Vec::len).sum()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
