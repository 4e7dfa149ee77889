//! In-process storage backend.
//!
//! [`MemoryBackend`] keeps tables in a `tokio::sync::Mutex`-guarded map and
//! enforces the constraints the schema builder can express: required
//! columns, identifier and unique values, and unknown columns. Every schema
//! statement is appended to an execution log readable through
//! [`MemoryBackend::executed`], which tests use to observe what a migration
//! actually ran.
//!
//! Cloning a `MemoryBackend` shares its state.

use std::collections::BTreeMap;
use std::sync::Arc;

use fluent_rs_core::{FluentError, FluentResult};
use fluent_rs_db::fields::FieldDefinition;
use fluent_rs_db::row::{Filter, Row};
use fluent_rs_db::schema::{FieldOperation, SchemaChangeSet};
use fluent_rs_db::value::Value;
use tokio::sync::Mutex;

use crate::base::{ensure_create_only_adds, DatabaseBackend};

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<FieldDefinition>,
    unique_constraints: Vec<Vec<String>>,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn column(&self, name: &str) -> Option<&FieldDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn apply(&mut self, table: &str, op: &FieldOperation) -> FluentResult<()> {
        match op {
            FieldOperation::Add(field) => {
                if self.column(&field.name).is_some() {
                    return Err(FluentError::DatabaseError(format!(
                        "duplicate column name: {table}.{}",
                        field.name
                    )));
                }
                let fill = field.default().cloned().unwrap_or(Value::Null);
                if fill.is_null() && field.is_required() && !self.rows.is_empty() {
                    return Err(FluentError::DatabaseError(format!(
                        "Cannot add NOT NULL column {table}.{} without a default",
                        field.name
                    )));
                }
                for row in &mut self.rows {
                    row.set(field.name.clone(), fill.clone());
                }
                self.columns.push(field.clone());
            }
            FieldOperation::Remove { name } => {
                let idx = self
                    .columns
                    .iter()
                    .position(|c| c.name == *name)
                    .ok_or_else(|| {
                        FluentError::DatabaseError(format!("no such column: {table}.{name}"))
                    })?;
                self.columns.remove(idx);
                for row in &mut self.rows {
                    row.remove(name);
                }
                self.unique_constraints
                    .retain(|cols| !cols.iter().any(|c| c == name));
            }
            FieldOperation::Alter { name, field_type } => {
                let column = self
                    .columns
                    .iter_mut()
                    .find(|c| c.name == *name)
                    .ok_or_else(|| {
                        FluentError::DatabaseError(format!("no such column: {table}.{name}"))
                    })?;
                column.field_type = field_type.clone();
            }
        }
        Ok(())
    }

    fn add_unique(&mut self, table: &str, on: &[String]) -> FluentResult<()> {
        if let Some(missing) = on.iter().find(|c| self.column(c).is_none()) {
            return Err(FluentError::DatabaseError(format!(
                "no such column: {table}.{missing}"
            )));
        }
        self.unique_constraints.push(on.to_vec());
        Ok(())
    }

    /// Orders the row's values by column and fills defaults.
    fn normalize(&self, table: &str, mut row: Row) -> FluentResult<Row> {
        if let Some(unknown) = row.columns().iter().find(|c| self.column(c).is_none()) {
            return Err(FluentError::DatabaseError(format!(
                "table {table} has no column named {unknown}"
            )));
        }
        let mut columns = Vec::with_capacity(self.columns.len());
        let mut values = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let value = row
                .remove(&column.name)
                .or_else(|| column.default().cloned())
                .unwrap_or(Value::Null);
            if value.is_null() && column.is_required() {
                return Err(FluentError::DatabaseError(format!(
                    "NOT NULL constraint failed: {table}.{}",
                    column.name
                )));
            }
            columns.push(column.name.clone());
            values.push(value);
        }
        Ok(Row::new(columns, values))
    }

    fn check_unique(&self, table: &str, row: &Row) -> FluentResult<()> {
        let single = self
            .columns
            .iter()
            .filter(|c| c.is_unique() || c.identifier().is_some())
            .map(|c| vec![c.name.clone()]);
        for group in single.chain(self.unique_constraints.iter().cloned()) {
            let candidate: Vec<&Value> = group.iter().filter_map(|c| row.get_value(c)).collect();
            if candidate.iter().any(|v| v.is_null()) {
                continue;
            }
            let clash = self.rows.iter().any(|existing| {
                group
                    .iter()
                    .map(|c| existing.get_value(c))
                    .zip(&candidate)
                    .all(|(a, b)| a == Some(*b))
            });
            if clash {
                return Err(FluentError::DatabaseError(format!(
                    "UNIQUE constraint failed: {table}.{}",
                    group.join(", ")
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    executed: Vec<String>,
}

impl MemoryState {
    fn table(&self, table: &str) -> FluentResult<&MemoryTable> {
        self.tables
            .get(table)
            .ok_or_else(|| FluentError::DatabaseError(format!("no such table: {table}")))
    }
}

/// An in-memory storage backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every schema statement and raw statement run so far, in order.
    pub async fn executed(&self) -> Vec<String> {
        self.state.lock().await.executed.clone()
    }

    /// Returns the names of all existing tables, sorted.
    pub async fn table_names(&self) -> Vec<String> {
        self.state.lock().await.tables.keys().cloned().collect()
    }

    /// Returns the column names of a table, in declaration order.
    pub async fn columns(&self, table: &str) -> FluentResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .table(table)?
            .columns
            .iter()
            .map(|c| c.name.clone())
            .collect())
    }
}

#[async_trait::async_trait]
impl DatabaseBackend for MemoryBackend {
    fn vendor(&self) -> &str {
        "memory"
    }

    async fn execute(&self, statement: &str, params: &[Value]) -> FluentResult<u64> {
        tracing::debug!(statement, params = params.len(), "memory execute");
        self.state.lock().await.executed.push(statement.to_string());
        Ok(0)
    }

    async fn create_table(&self, table: &str, changes: &SchemaChangeSet) -> FluentResult<()> {
        ensure_create_only_adds(table, changes)?;
        let mut state = self.state.lock().await;
        if state.tables.contains_key(table) {
            if changes.if_not_exists() {
                return Ok(());
            }
            return Err(FluentError::DatabaseError(format!(
                "table {table} already exists"
            )));
        }

        let mut created = MemoryTable::default();
        for op in changes.operations() {
            created.apply(table, op)?;
        }
        for on in changes.unique_constraints() {
            created.add_unique(table, on)?;
        }
        state.tables.insert(table.to_string(), created);
        state.executed.push(format!("create table {table}"));
        Ok(())
    }

    async fn alter_table(&self, table: &str, changes: &SchemaChangeSet) -> FluentResult<()> {
        let mut state = self.state.lock().await;
        // Changes apply to a copy so a failing operation leaves the table intact.
        let mut altered = state.table(table)?.clone();
        for op in changes.operations() {
            altered.apply(table, op)?;
        }
        for on in changes.unique_constraints() {
            altered.add_unique(table, on)?;
        }
        state.tables.insert(table.to_string(), altered);

        let described: Vec<String> = changes
            .operations()
            .iter()
            .map(FieldOperation::describe)
            .chain(
                changes
                    .unique_constraints()
                    .iter()
                    .map(|on| format!("add unique ({})", on.join(", "))),
            )
            .collect();
        state
            .executed
            .push(format!("alter table {table}: {}", described.join("; ")));
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> FluentResult<()> {
        let mut state = self.state.lock().await;
        if state.tables.remove(table).is_none() {
            return Err(FluentError::DatabaseError(format!("no such table: {table}")));
        }
        state.executed.push(format!("drop table {table}"));
        Ok(())
    }

    async fn has_table(&self, table: &str) -> FluentResult<bool> {
        Ok(self.state.lock().await.tables.contains_key(table))
    }

    async fn query(&self, table: &str, filter: &Filter) -> FluentResult<Vec<Row>> {
        let state = self.state.lock().await;
        Ok(state
            .table(table)?
            .rows
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    async fn insert(&self, table: &str, row: Row) -> FluentResult<()> {
        let mut state = self.state.lock().await;
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| FluentError::DatabaseError(format!("no such table: {table}")))?;
        let row = target.normalize(table, row)?;
        target.check_unique(table, &row)?;
        target.rows.push(row);
        Ok(())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> FluentResult<u64> {
        let mut state = self.state.lock().await;
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| FluentError::DatabaseError(format!("no such table: {table}")))?;
        let before = target.rows.len();
        target.rows.retain(|row| !filter.matches(row));
        Ok((before - target.rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluent_rs_db::fields::{FieldConstraint, FieldType};
    use fluent_rs_db::schema::SchemaBuilder;

    fn galaxies() -> SchemaChangeSet {
        SchemaBuilder::new("galaxies")
            .id()
            .field("name", FieldType::String, [FieldConstraint::Required])
            .build()
            .unwrap()
    }

    fn galaxy(id: &str, name: &str) -> Row {
        Row::from_pairs([("id", Value::from(id)), ("name", Value::from(name))])
    }

    #[tokio::test]
    async fn test_create_and_has_table() {
        let backend = MemoryBackend::new();
        assert!(!backend.has_table("galaxies").await.unwrap());
        backend.create_table("galaxies", &galaxies()).await.unwrap();
        assert!(backend.has_table("galaxies").await.unwrap());
        assert_eq!(backend.columns("galaxies").await.unwrap(), vec!["id", "name"]);
        assert_eq!(backend.executed().await, vec!["create table galaxies"]);
    }

    #[tokio::test]
    async fn test_create_existing_table_fails() {
        let backend = MemoryBackend::new();
        backend.create_table("galaxies", &galaxies()).await.unwrap();
        let err = backend.create_table("galaxies", &galaxies()).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_create_ignore_existing() {
        let backend = MemoryBackend::new();
        backend.create_table("galaxies", &galaxies()).await.unwrap();
        let changes = SchemaBuilder::new("galaxies")
            .id()
            .ignore_existing()
            .build()
            .unwrap();
        backend.create_table("galaxies", &changes).await.unwrap();
        assert_eq!(backend.columns("galaxies").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_drop_missing_table_fails() {
        let backend = MemoryBackend::new();
        assert!(backend.drop_table("galaxies").await.is_err());
    }

    #[tokio::test]
    async fn test_insert_query_delete() {
        let backend = MemoryBackend::new();
        backend.create_table("galaxies", &galaxies()).await.unwrap();
        backend.insert("galaxies", galaxy("a", "Milky Way")).await.unwrap();
        backend.insert("galaxies", galaxy("b", "Andromeda")).await.unwrap();

        let all = backend.query("galaxies", &Filter::all()).await.unwrap();
        assert_eq!(all.len(), 2);
        let one = backend
            .query("galaxies", &Filter::all().where_eq("name", "Andromeda"))
            .await
            .unwrap();
        assert_eq!(one[0].get::<String>("id").unwrap(), "b");

        let deleted = backend
            .delete("galaxies", &Filter::all().where_eq("id", "a"))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(backend.query("galaxies", &Filter::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_enforces_constraints() {
        let backend = MemoryBackend::new();
        backend.create_table("galaxies", &galaxies()).await.unwrap();
        backend.insert("galaxies", galaxy("a", "Milky Way")).await.unwrap();

        let duplicate = backend.insert("galaxies", galaxy("a", "Other")).await;
        assert!(duplicate.unwrap_err().to_string().contains("UNIQUE"));

        let missing = backend
            .insert("galaxies", Row::from_pairs([("id", Value::from("c"))]))
            .await;
        assert!(missing.unwrap_err().to_string().contains("NOT NULL"));

        let unknown = backend
            .insert(
                "galaxies",
                Row::from_pairs([
                    ("id", Value::from("d")),
                    ("name", Value::from("x")),
                    ("mass", Value::Int(1)),
                ]),
            )
            .await;
        assert!(unknown.unwrap_err().to_string().contains("mass"));
    }

    #[tokio::test]
    async fn test_composite_unique() {
        let backend = MemoryBackend::new();
        let changes = SchemaBuilder::new("stars")
            .field("name", FieldType::String, [])
            .field("galaxy", FieldType::String, [])
            .unique(["name", "galaxy"])
            .build()
            .unwrap();
        backend.create_table("stars", &changes).await.unwrap();
        let star = |name: &str, galaxy: &str| {
            Row::from_pairs([("name", Value::from(name)), ("galaxy", Value::from(galaxy))])
        };
        backend.insert("stars", star("Sun", "Milky Way")).await.unwrap();
        backend.insert("stars", star("Sun", "Andromeda")).await.unwrap();
        assert!(backend.insert("stars", star("Sun", "Milky Way")).await.is_err());
    }

    #[tokio::test]
    async fn test_alter_table() {
        let backend = MemoryBackend::new();
        backend.create_table("galaxies", &galaxies()).await.unwrap();
        backend.insert("galaxies", galaxy("a", "Milky Way")).await.unwrap();

        let changes = SchemaBuilder::new("galaxies")
            .field("mass", FieldType::Int64, [FieldConstraint::Default(Value::Int(0))])
            .delete_field("name")
            .build()
            .unwrap();
        backend.alter_table("galaxies", &changes).await.unwrap();

        assert_eq!(backend.columns("galaxies").await.unwrap(), vec!["id", "mass"]);
        let rows = backend.query("galaxies", &Filter::all()).await.unwrap();
        assert_eq!(rows[0].get::<i64>("mass").unwrap(), 0);
        assert!(rows[0].get_value("name").is_none());
        assert_eq!(
            backend.executed().await[1],
            "alter table galaxies: add field mass (int64); remove field name"
        );
    }

    #[tokio::test]
    async fn test_failed_alter_leaves_table_intact() {
        let backend = MemoryBackend::new();
        backend.create_table("galaxies", &galaxies()).await.unwrap();
        let changes = SchemaBuilder::new("galaxies")
            .field("mass", FieldType::Int64, [])
            .delete_field("radius")
            .build()
            .unwrap();
        assert!(backend.alter_table("galaxies", &changes).await.is_err());
        assert_eq!(backend.columns("galaxies").await.unwrap(), vec!["id", "name"]);
        assert_eq!(backend.executed().await.len(), 1);
    }

    #[tokio::test]
    async fn test_add_required_column_to_populated_table() {
        let backend = MemoryBackend::new();
        backend.create_table("galaxies", &galaxies()).await.unwrap();
        backend.insert("galaxies", galaxy("a", "Milky Way")).await.unwrap();
        let changes = SchemaBuilder::new("galaxies")
            .field("mass", FieldType::Int64, [FieldConstraint::Required])
            .build()
            .unwrap();
        assert!(backend.alter_table("galaxies", &changes).await.is_err());
    }

    #[tokio::test]
    async fn test_execute_is_logged() {
        let backend = MemoryBackend::new();
        let affected = backend.execute("VACUUM", &[]).await.unwrap();
        assert_eq!(affected, 0);
        assert_eq!(backend.executed().await, vec!["VACUUM"]);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let backend = MemoryBackend::new();
        let other = backend.clone();
        backend.create_table("galaxies", &galaxies()).await.unwrap();
        assert_eq!(other.table_names().await, vec!["galaxies"]);
    }
}
