//! The storage driver trait.
//!
//! [`DatabaseBackend`] is the narrow interface the migration engine consumes.
//! Schema changes arrive as [`SchemaChangeSet`]s, bookkeeping rows as
//! [`Row`]s with an equality [`Filter`], and anything else as an opaque
//! statement string passed straight to the driver.

use fluent_rs_core::{FluentError, FluentResult};
use fluent_rs_db::row::{Filter, Row};
use fluent_rs_db::schema::{FieldOperation, SchemaChangeSet};
use fluent_rs_db::value::Value;

/// The core trait for storage drivers.
///
/// All methods are async because storage operations are I/O-bound. Drivers
/// built on synchronous libraries (like `rusqlite`) run their work on
/// `spawn_blocking` to keep the async interface.
#[async_trait::async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Returns the vendor name (e.g., "sqlite", "memory").
    fn vendor(&self) -> &str;

    /// Executes a raw statement that does not return rows.
    ///
    /// Returns the number of rows affected.
    async fn execute(&self, statement: &str, params: &[Value]) -> FluentResult<u64>;

    /// Creates a table from a change-set containing only add operations.
    async fn create_table(&self, table: &str, changes: &SchemaChangeSet) -> FluentResult<()>;

    /// Applies a change-set's operations, in order, to an existing table.
    async fn alter_table(&self, table: &str, changes: &SchemaChangeSet) -> FluentResult<()>;

    /// Drops a table. Fails if the table does not exist.
    async fn drop_table(&self, table: &str) -> FluentResult<()>;

    /// Returns whether a table exists.
    async fn has_table(&self, table: &str) -> FluentResult<bool>;

    /// Returns every row of `table` matching `filter`, in storage order.
    async fn query(&self, table: &str, filter: &Filter) -> FluentResult<Vec<Row>>;

    /// Inserts one row.
    async fn insert(&self, table: &str, row: Row) -> FluentResult<()>;

    /// Deletes every row of `table` matching `filter`, returning the count.
    async fn delete(&self, table: &str, filter: &Filter) -> FluentResult<u64>;
}

/// Rejects change-sets that cannot describe a new table.
///
/// A table being created has no existing fields to remove or alter.
pub fn ensure_create_only_adds(table: &str, changes: &SchemaChangeSet) -> FluentResult<()> {
    if let Some(op) = changes
        .operations()
        .iter()
        .find(|op| !matches!(op, FieldOperation::Add(_)))
    {
        return Err(FluentError::DatabaseError(format!(
            "Cannot create table '{table}' with operation: {}",
            op.describe()
        )));
    }
    if changes.added_fields().next().is_none() {
        return Err(FluentError::DatabaseError(format!(
            "Cannot create table '{table}' without fields"
        )));
    }
    Ok(())
}
