//! SQLite storage backend using `rusqlite`.
//!
//! This module provides the [`SqliteBackend`] which implements the
//! [`DatabaseBackend`](crate::base::DatabaseBackend) trait using `rusqlite`
//! wrapped in `tokio::task::spawn_blocking` for async compatibility.
//!
//! Features:
//! - WAL mode and foreign keys enabled on open
//! - In-memory database support via `:memory:` path (great for testing)
//! - Schema change-sets rendered to DDL and run in a single transaction
//! - Identifiers validated before they are interpolated into SQL

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use fluent_rs_core::{FluentError, FluentResult};
use fluent_rs_db::fields::{FieldDefinition, FieldType};
use fluent_rs_db::row::{Filter, Row};
use fluent_rs_db::schema::{FieldOperation, SchemaChangeSet};
use fluent_rs_db::value::Value;
use regex::Regex;
use tokio::sync::Mutex;

use crate::base::{ensure_create_only_adds, DatabaseBackend};

/// A SQLite storage backend.
///
/// Uses `rusqlite` for database access with a `Mutex`-based concurrency
/// model. All operations are run via `tokio::task::spawn_blocking` to
/// avoid blocking the async runtime.
pub struct SqliteBackend {
    /// The path to the database file (or ":memory:").
    path: PathBuf,
    /// The connection, guarded by an async mutex.
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteBackend {
    /// Opens a SQLite database at the given path.
    ///
    /// If the path is `:memory:`, an in-memory database is created.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: impl Into<PathBuf>) -> FluentResult<Self> {
        let path = path.into();
        let conn = if path.to_str() == Some(":memory:") {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&path)
        }
        .map_err(|e| FluentError::OperationalError(format!("SQLite open failed: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| FluentError::OperationalError(format!("Failed to set pragmas: {e}")))?;

        tracing::debug!(path = %path.display(), "opened sqlite database");
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database (convenience constructor).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn memory() -> FluentResult<Self> {
        Self::open(":memory:")
    }

    /// Returns the database file path.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Runs `f` against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> FluentResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> FluentResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| FluentError::DatabaseError(format!("Task join error: {e}")))?
    }

    /// Runs DDL statements atomically.
    async fn run_ddl(&self, statements: Vec<String>) -> FluentResult<()> {
        for sql in &statements {
            tracing::debug!(sql = %sql, "sqlite ddl");
        }
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(db_error)?;
            for sql in &statements {
                tx.execute(sql, []).map_err(db_error)?;
            }
            tx.commit().map_err(db_error)
        })
        .await
    }

    /// Converts a `rusqlite::Row` to our generic `Row`.
    fn convert_row(sqlite_row: &rusqlite::Row<'_>, column_names: &[String]) -> FluentResult<Row> {
        let mut values = Vec::with_capacity(column_names.len());
        for i in 0..column_names.len() {
            let value = match sqlite_row.get_ref(i).map_err(db_error)? {
                rusqlite::types::ValueRef::Null => Value::Null,
                rusqlite::types::ValueRef::Integer(v) => Value::Int(v),
                rusqlite::types::ValueRef::Real(v) => Value::Float(v),
                rusqlite::types::ValueRef::Text(b) => {
                    Value::String(String::from_utf8_lossy(b).to_string())
                }
                rusqlite::types::ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
            };
            values.push(value);
        }
        Ok(Row::new(column_names.to_vec(), values))
    }
}

fn db_error(e: rusqlite::Error) -> FluentError {
    FluentError::DatabaseError(format!("{e}"))
}

/// Maps a `Value` onto a SQLite storage class.
fn to_sqlite(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Int(v) => Sql::Integer(*v),
        Value::Float(v) => Sql::Real(*v),
        Value::String(s) => Sql::Text(s.clone()),
        Value::Bytes(b) => Sql::Blob(b.clone()),
        Value::Date(d) => Sql::Text(d.to_string()),
        Value::DateTime(dt) => Sql::Text(dt.to_rfc3339()),
        Value::Uuid(u) => Sql::Text(u.to_string()),
        Value::Json(j) => Sql::Text(j.to_string()),
    }
}

fn bind(params: &[Value]) -> Vec<rusqlite::types::Value> {
    params.iter().map(to_sqlite).collect()
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

/// Validates and double-quotes an identifier.
fn quote(ident: &str) -> FluentResult<String> {
    if identifier_pattern().is_match(ident) {
        Ok(format!("\"{ident}\""))
    } else {
        Err(FluentError::InvalidIdentifier(ident.to_string()))
    }
}

/// Returns the SQLite type name for a field type.
fn sqlite_type_sql(field_type: &FieldType) -> String {
    match field_type {
        FieldType::Bool
        | FieldType::Int8
        | FieldType::Int16
        | FieldType::Int32
        | FieldType::Int64 => "INTEGER".to_string(),
        FieldType::Float | FieldType::Double => "REAL".to_string(),
        FieldType::String
        | FieldType::Uuid
        | FieldType::Date
        | FieldType::DateTime
        | FieldType::Json
        | FieldType::Array(_)
        | FieldType::Enum { .. } => "TEXT".to_string(),
        FieldType::Data => "BLOB".to_string(),
        FieldType::Custom(raw) => raw.clone(),
    }
}

/// Renders a value as a SQL literal for DEFAULT clauses.
fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => i64::from(*b).to_string(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{byte:02X}")).collect();
            format!("X'{hex}'")
        }
        other => match to_sqlite(other) {
            rusqlite::types::Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            _ => "NULL".to_string(),
        },
    }
}

/// Renders one column definition.
fn column_sql(field: &FieldDefinition) -> FluentResult<String> {
    let mut sql = format!("{} {}", quote(&field.name)?, sqlite_type_sql(&field.field_type));
    match field.identifier() {
        Some(true) => sql.push_str(" PRIMARY KEY AUTOINCREMENT"),
        Some(false) => sql.push_str(" PRIMARY KEY NOT NULL"),
        None if field.is_required() => sql.push_str(" NOT NULL"),
        None => {}
    }
    if field.is_unique() && field.identifier().is_none() {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = field.default() {
        sql.push_str(" DEFAULT ");
        sql.push_str(&literal(default));
    }
    if let Some((table, column, on_delete)) = field.reference() {
        sql.push_str(&format!(
            " REFERENCES {} ({}) ON DELETE {}",
            quote(table)?,
            quote(column)?,
            on_delete.as_sql()
        ));
    }
    if let FieldType::Enum { cases, .. } = &field.field_type {
        let allowed: Vec<String> = cases
            .iter()
            .map(|c| literal(&Value::String(c.clone())))
            .collect();
        sql.push_str(&format!(
            " CHECK ({} IN ({}))",
            quote(&field.name)?,
            allowed.join(", ")
        ));
    }
    Ok(sql)
}

/// Renders a unique index over `columns`.
fn unique_index_sql(table: &str, columns: &[String], if_not_exists: bool) -> FluentResult<String> {
    let quoted = columns
        .iter()
        .map(|c| quote(c))
        .collect::<FluentResult<Vec<_>>>()?;
    let index = quote(&format!("{table}_{}_uniq", columns.join("_")))?;
    let guard = if if_not_exists { "IF NOT EXISTS " } else { "" };
    Ok(format!(
        "CREATE UNIQUE INDEX {guard}{index} ON {} ({})",
        quote(table)?,
        quoted.join(", ")
    ))
}

fn create_table_sql(table: &str, changes: &SchemaChangeSet) -> FluentResult<Vec<String>> {
    let columns = changes
        .added_fields()
        .map(column_sql)
        .collect::<FluentResult<Vec<_>>>()?;
    let guard = if changes.if_not_exists() {
        "IF NOT EXISTS "
    } else {
        ""
    };
    let mut statements = vec![format!(
        "CREATE TABLE {guard}{} ({})",
        quote(table)?,
        columns.join(", ")
    )];
    for on in changes.unique_constraints() {
        statements.push(unique_index_sql(table, on, changes.if_not_exists())?);
    }
    Ok(statements)
}

fn alter_table_sql(table: &str, changes: &SchemaChangeSet) -> FluentResult<Vec<String>> {
    let quoted_table = quote(table)?;
    let mut statements = Vec::new();
    for op in changes.operations() {
        match op {
            FieldOperation::Add(field) => statements.push(format!(
                "ALTER TABLE {quoted_table} ADD COLUMN {}",
                column_sql(field)?
            )),
            FieldOperation::Remove { name } => statements.push(format!(
                "ALTER TABLE {quoted_table} DROP COLUMN {}",
                quote(name)?
            )),
            FieldOperation::Alter { name, field_type } => {
                return Err(FluentError::DatabaseError(format!(
                    "SQLite cannot change the type of {table}.{name} to {field_type}"
                )));
            }
        }
    }
    for on in changes.unique_constraints() {
        statements.push(unique_index_sql(table, on, false)?);
    }
    Ok(statements)
}

fn where_sql(filter: &Filter) -> FluentResult<(String, Vec<rusqlite::types::Value>)> {
    if filter.conditions().is_empty() {
        return Ok((String::new(), Vec::new()));
    }
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    for (column, value) in filter.conditions() {
        if value.is_null() {
            clauses.push(format!("{} IS NULL", quote(column)?));
        } else {
            clauses.push(format!("{} = ?", quote(column)?));
            params.push(to_sqlite(value));
        }
    }
    Ok((format!(" WHERE {}", clauses.join(" AND ")), params))
}

#[async_trait::async_trait]
impl DatabaseBackend for SqliteBackend {
    fn vendor(&self) -> &str {
        "sqlite"
    }

    async fn execute(&self, statement: &str, params: &[Value]) -> FluentResult<u64> {
        let sql = statement.to_string();
        let params = bind(params);
        self.with_conn(move |conn| {
            let count = conn
                .execute(&sql, rusqlite::params_from_iter(params))
                .map_err(db_error)?;
            Ok(count as u64)
        })
        .await
    }

    async fn create_table(&self, table: &str, changes: &SchemaChangeSet) -> FluentResult<()> {
        ensure_create_only_adds(table, changes)?;
        self.run_ddl(create_table_sql(table, changes)?).await
    }

    async fn alter_table(&self, table: &str, changes: &SchemaChangeSet) -> FluentResult<()> {
        self.run_ddl(alter_table_sql(table, changes)?).await
    }

    async fn drop_table(&self, table: &str) -> FluentResult<()> {
        self.run_ddl(vec![format!("DROP TABLE {}", quote(table)?)])
            .await
    }

    async fn has_table(&self, table: &str) -> FluentResult<bool> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [&table],
                    |row| row.get(0),
                )
                .map_err(db_error)?;
            Ok(count > 0)
        })
        .await
    }

    async fn query(&self, table: &str, filter: &Filter) -> FluentResult<Vec<Row>> {
        let (where_clause, params) = where_sql(filter)?;
        let sql = format!("SELECT * FROM {}{where_clause} ORDER BY rowid", quote(table)?);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(db_error)?;
            let column_names: Vec<String> =
                stmt.column_names().into_iter().map(String::from).collect();
            let mut raw_rows = stmt
                .query(rusqlite::params_from_iter(params))
                .map_err(db_error)?;

            let mut rows = Vec::new();
            while let Some(row) = raw_rows.next().map_err(db_error)? {
                rows.push(Self::convert_row(row, &column_names)?);
            }
            Ok(rows)
        })
        .await
    }

    async fn insert(&self, table: &str, row: Row) -> FluentResult<()> {
        let columns = row
            .columns()
            .iter()
            .map(|c| quote(c))
            .collect::<FluentResult<Vec<_>>>()?;
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote(table)?,
            columns.join(", ")
        );
        self.execute(&sql, row.values()).await.map(|_| ())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> FluentResult<u64> {
        let (where_clause, params) = where_sql(filter)?;
        let sql = format!("DELETE FROM {}{where_clause}", quote(table)?);
        self.with_conn(move |conn| {
            let count = conn
                .execute(&sql, rusqlite::params_from_iter(params))
                .map_err(db_error)?;
            Ok(count as u64)
        })
        .await
    }
}
