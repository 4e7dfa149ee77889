//! The connection handle passed to migration steps.

use std::fmt;
use std::sync::Arc;

use fluent_rs_core::FluentResult;
use fluent_rs_db::row::{Filter, Row};
use fluent_rs_db::schema::{SchemaBuilder, SchemaChangeSet};
use fluent_rs_db::value::Value;
use fluent_rs_db_backends::{DatabaseBackend, DatabaseId};

/// A handle to one migrated database.
///
/// Every `prepare` / `revert` receives a `Connection`. It is cheap to clone
/// and forwards to the database's [`DatabaseBackend`].
#[derive(Clone)]
pub struct Connection {
    database: DatabaseId,
    backend: Arc<dyn DatabaseBackend>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("database", &self.database)
            .field("vendor", &self.backend.vendor())
            .finish()
    }
}

impl Connection {
    /// Creates a connection for `database` backed by `backend`.
    pub fn new(database: impl Into<DatabaseId>, backend: Arc<dyn DatabaseBackend>) -> Self {
        Self {
            database: database.into(),
            backend,
        }
    }

    /// The database this connection migrates.
    pub fn database(&self) -> &DatabaseId {
        &self.database
    }

    /// The underlying storage driver.
    pub fn backend(&self) -> &Arc<dyn DatabaseBackend> {
        &self.backend
    }

    /// Starts a schema builder for `table`.
    pub fn schema(&self, table: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(table)
    }

    /// Creates the change-set's table.
    pub async fn create(&self, changes: &SchemaChangeSet) -> FluentResult<()> {
        self.backend.create_table(changes.table(), changes).await
    }

    /// Applies the change-set to its existing table.
    pub async fn update(&self, changes: &SchemaChangeSet) -> FluentResult<()> {
        self.backend.alter_table(changes.table(), changes).await
    }

    /// Drops `table`.
    pub async fn drop_table(&self, table: &str) -> FluentResult<()> {
        self.backend.drop_table(table).await
    }

    /// Returns whether `table` exists.
    pub async fn has_table(&self, table: &str) -> FluentResult<bool> {
        self.backend.has_table(table).await
    }

    /// Runs a raw driver statement.
    pub async fn execute(&self, statement: &str, params: &[Value]) -> FluentResult<u64> {
        self.backend.execute(statement, params).await
    }

    /// Returns the rows of `table` matching `filter`.
    pub async fn query(&self, table: &str, filter: &Filter) -> FluentResult<Vec<Row>> {
        self.backend.query(table, filter).await
    }

    /// Inserts a row into `table`.
    pub async fn insert(&self, table: &str, row: Row) -> FluentResult<()> {
        self.backend.insert(table, row).await
    }

    /// Deletes the rows of `table` matching `filter`.
    pub async fn delete(&self, table: &str, filter: &Filter) -> FluentResult<u64> {
        self.backend.delete(table, filter).await
    }
}
