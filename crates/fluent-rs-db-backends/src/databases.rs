//! Database identifiers and the backend registry.
//!
//! A [`DatabaseId`] names one logical database. [`Databases`] maps each
//! identifier to the [`DatabaseBackend`] that stores it, and can be built
//! from the `databases` section of [`Settings`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use fluent_rs_core::{DatabaseSettings, FluentError, FluentResult, Settings};
use serde::{Deserialize, Serialize};

use crate::base::DatabaseBackend;
use crate::memory::MemoryBackend;

/// The identifier of a logical database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabaseId(String);

impl DatabaseId {
    /// Creates an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DatabaseId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DatabaseId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A set of named storage backends.
#[derive(Clone, Default)]
pub struct Databases {
    backends: BTreeMap<DatabaseId, Arc<dyn DatabaseBackend>>,
}

impl fmt::Debug for Databases {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.backends.iter().map(|(id, b)| (id, b.vendor())))
            .finish()
    }
}

impl Databases {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the backend for `id`.
    pub fn register(&mut self, id: impl Into<DatabaseId>, backend: Arc<dyn DatabaseBackend>) {
        self.backends.insert(id.into(), backend);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, id: impl Into<DatabaseId>, backend: Arc<dyn DatabaseBackend>) -> Self {
        self.register(id, backend);
        self
    }

    /// Returns the backend for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`FluentError::UnknownDatabase`] if nothing is registered.
    pub fn get(&self, id: &DatabaseId) -> FluentResult<Arc<dyn DatabaseBackend>> {
        self.backends
            .get(id)
            .cloned()
            .ok_or_else(|| FluentError::UnknownDatabase(id.to_string()))
    }

    /// Returns whether `id` is registered.
    pub fn contains(&self, id: &DatabaseId) -> bool {
        self.backends.contains_key(id)
    }

    /// Returns all registered identifiers, sorted.
    pub fn ids(&self) -> Vec<DatabaseId> {
        self.backends.keys().cloned().collect()
    }

    /// Returns the number of registered databases.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Returns `true` if no database is registered.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Opens a backend for every entry in `settings.databases`.
    ///
    /// # Errors
    ///
    /// Returns [`FluentError::ConfigurationError`] for an unknown engine (or
    /// `"sqlite"` without the `sqlite` feature), or the driver's error if a
    /// database cannot be opened.
    pub fn from_settings(settings: &Settings) -> FluentResult<Self> {
        let mut databases = Self::new();
        for (id, config) in &settings.databases {
            databases.register(id.as_str(), open_backend(id, config)?);
        }
        Ok(databases)
    }
}

fn open_backend(id: &str, config: &DatabaseSettings) -> FluentResult<Arc<dyn DatabaseBackend>> {
    match config.engine.as_str() {
        "memory" => Ok(Arc::new(MemoryBackend::new())),
        #[cfg(feature = "sqlite")]
        "sqlite" => Ok(Arc::new(crate::sqlite::SqliteBackend::open(&config.name)?)),
        #[cfg(not(feature = "sqlite"))]
        "sqlite" => Err(FluentError::ConfigurationError(format!(
            "Database '{id}' uses the sqlite engine, which requires the 'sqlite' feature"
        ))),
        other => Err(FluentError::ConfigurationError(format!(
            "Database '{id}' has unknown engine '{other}'"
        ))),
    }
}
