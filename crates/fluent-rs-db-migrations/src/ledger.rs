//! The migration ledger.
//!
//! The ledger records which migrations are applied, per database, in a
//! reserved table inside that database (default `_fluent_migrations`). Each
//! entry carries the batch it was applied in and a per-database `sequence`
//! fixing the exact apply order, which reverts walk backwards.
//!
//! The table is created on first use.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fluent_rs_core::settings::DEFAULT_LEDGER_TABLE;
use fluent_rs_core::{FluentError, FluentResult};
use fluent_rs_db::fields::{FieldConstraint, FieldType};
use fluent_rs_db::row::{Filter, Row};
use fluent_rs_db::schema::{SchemaBuilder, SchemaChangeSet};
use fluent_rs_db::value::Value;
use fluent_rs_db_backends::{DatabaseBackend, DatabaseId, Databases};
use serde::{Deserialize, Serialize};

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// The database the migration was applied to.
    pub database: DatabaseId,
    /// The migration name.
    pub name: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
    /// The batch (forward run) the migration belongs to.
    pub batch: i64,
    /// The apply counter within the database.
    pub sequence: i64,
}

impl LedgerEntry {
    fn from_row(database: &DatabaseId, row: &Row) -> FluentResult<Self> {
        Ok(Self {
            database: database.clone(),
            name: row.get("name")?,
            applied_at: row.get("applied_at")?,
            batch: row.get("batch")?,
            sequence: row.get("sequence")?,
        })
    }

    fn to_row(&self) -> Row {
        Row::from_pairs([
            ("name", Value::from(self.name.as_str())),
            ("batch", Value::Int(self.batch)),
            ("sequence", Value::Int(self.sequence)),
            ("applied_at", Value::DateTime(self.applied_at)),
        ])
    }
}

/// Reads and writes the ledger table of each database.
// TODO: add an advisory lock row so two runner processes cannot migrate the
// same database concurrently.
#[derive(Debug, Clone)]
pub struct MigrationLedger {
    table: String,
    databases: Databases,
}

impl MigrationLedger {
    /// Creates a ledger over `databases` using the default table name.
    pub fn new(databases: Databases) -> Self {
        Self::with_table(databases, DEFAULT_LEDGER_TABLE)
    }

    /// Creates a ledger stored in `table`.
    pub fn with_table(databases: Databases, table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            databases,
        }
    }

    /// The ledger table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    fn schema(&self) -> FluentResult<SchemaChangeSet> {
        SchemaBuilder::new(self.table.clone())
            .field(
                "name",
                FieldType::String,
                [FieldConstraint::Required, FieldConstraint::Unique],
            )
            .field("batch", FieldType::Int64, [FieldConstraint::Required])
            .field("sequence", FieldType::Int64, [FieldConstraint::Required])
            .field("applied_at", FieldType::DateTime, [FieldConstraint::Required])
            .ignore_existing()
            .build()
    }

    /// Returns the database's backend with the ledger table in place.
    async fn backend(&self, database: &DatabaseId) -> FluentResult<Arc<dyn DatabaseBackend>> {
        let backend = self.databases.get(database)?;
        if !backend.has_table(&self.table).await? {
            tracing::debug!(database = %database, table = %self.table, "creating ledger table");
            backend.create_table(&self.table, &self.schema()?).await?;
        }
        Ok(backend)
    }

    /// Returns every entry of `database`, in apply order.
    pub async fn entries(&self, database: &DatabaseId) -> FluentResult<Vec<LedgerEntry>> {
        let backend = self.backend(database).await?;
        let rows = backend.query(&self.table, &Filter::all()).await?;
        let mut entries = rows
            .iter()
            .map(|row| LedgerEntry::from_row(database, row))
            .collect::<FluentResult<Vec<_>>>()?;
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    /// Returns the entry for `name`, if applied.
    pub async fn get(
        &self,
        database: &DatabaseId,
        name: &str,
    ) -> FluentResult<Option<LedgerEntry>> {
        let backend = self.backend(database).await?;
        let rows = backend
            .query(&self.table, &Filter::all().where_eq("name", name))
            .await?;
        rows.first()
            .map(|row| LedgerEntry::from_row(database, row))
            .transpose()
    }

    /// Returns whether `name` is applied on `database`.
    pub async fn is_applied(&self, database: &DatabaseId, name: &str) -> FluentResult<bool> {
        Ok(self.get(database, name).await?.is_some())
    }

    /// Returns the applied names of `database`, in apply order.
    pub async fn applied_names(&self, database: &DatabaseId) -> FluentResult<Vec<String>> {
        Ok(self
            .entries(database)
            .await?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }

    /// Returns the newest batch, or `None` for an empty ledger.
    pub async fn latest_batch(&self, database: &DatabaseId) -> FluentResult<Option<i64>> {
        Ok(self.entries(database).await?.iter().map(|e| e.batch).max())
    }

    /// Returns the batch id a new forward run would use.
    pub async fn next_batch(&self, database: &DatabaseId) -> FluentResult<i64> {
        Ok(self.latest_batch(database).await?.map_or(1, |b| b + 1))
    }

    /// Returns the distinct batches of `database`, newest first.
    pub async fn batches(&self, database: &DatabaseId) -> FluentResult<Vec<i64>> {
        let mut batches: Vec<i64> = self
            .entries(database)
            .await?
            .iter()
            .map(|e| e.batch)
            .collect();
        batches.sort_unstable_by(|a, b| b.cmp(a));
        batches.dedup();
        Ok(batches)
    }

    /// Returns the names applied in `batch`, in apply order.
    pub async fn applied_in_batch(
        &self,
        database: &DatabaseId,
        batch: i64,
    ) -> FluentResult<Vec<String>> {
        Ok(self
            .entries(database)
            .await?
            .into_iter()
            .filter(|e| e.batch == batch)
            .map(|e| e.name)
            .collect())
    }

    /// Records `name` as applied in `batch`.
    ///
    /// # Errors
    ///
    /// Returns [`FluentError::LedgerInconsistency`] if `name` is already
    /// applied, or the driver's error if the write fails.
    pub async fn mark_applied(
        &self,
        database: &DatabaseId,
        name: &str,
        batch: i64,
    ) -> FluentResult<LedgerEntry> {
        let entries = self.entries(database).await?;
        if entries.iter().any(|e| e.name == name) {
            return Err(FluentError::LedgerInconsistency {
                database: database.to_string(),
                name: name.to_string(),
            });
        }
        let entry = LedgerEntry {
            database: database.clone(),
            name: name.to_string(),
            applied_at: Utc::now(),
            batch,
            sequence: entries.iter().map(|e| e.sequence).max().unwrap_or(0) + 1,
        };
        self.databases
            .get(database)?
            .insert(&self.table, entry.to_row())
            .await?;
        tracing::debug!(
            database = %database,
            migration = name,
            batch,
            sequence = entry.sequence,
            "ledger entry recorded"
        );
        Ok(entry)
    }

    /// Removes the entry for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`FluentError::LedgerInconsistency`] if `name` was not applied.
    pub async fn mark_reverted(&self, database: &DatabaseId, name: &str) -> FluentResult<()> {
        let backend = self.backend(database).await?;
        let removed = backend
            .delete(&self.table, &Filter::all().where_eq("name", name))
            .await?;
        if removed == 0 {
            return Err(FluentError::LedgerInconsistency {
                database: database.to_string(),
                name: name.to_string(),
            });
        }
        tracing::debug!(database = %database, migration = name, "ledger entry removed");
        Ok(())
    }
}
