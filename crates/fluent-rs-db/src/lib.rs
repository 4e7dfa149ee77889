//! # fluent-rs-db
//!
//! Backend-agnostic building blocks shared by the storage drivers and the
//! migration engine.
//!
//! ## Module Overview
//!
//! - [`value`] - The [`Value`](value::Value) enum
//! - [`row`] - [`Row`](row::Row), [`FromValue`](row::FromValue), and the equality [`Filter`](row::Filter)
//! - [`fields`] - Field types, constraints, and definitions
//! - [`schema`] - [`SchemaBuilder`](schema::SchemaBuilder) and the immutable
//!   [`SchemaChangeSet`](schema::SchemaChangeSet) it produces

// - result_large_err: FluentError is the crate-wide error type and is used consistently
// - return_self_not_must_use: builder pattern methods are self-documenting
// - missing_const_for_fn: accessors may grow logic
#![allow(clippy::result_large_err)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::use_self)]

pub mod fields;
pub mod row;
pub mod schema;
pub mod value;

pub use fields::{FieldConstraint, FieldDefinition, FieldType, OnDelete};
pub use row::{Filter, FromValue, Row};
pub use schema::{FieldOperation, SchemaBuilder, SchemaChangeSet};
pub use value::Value;
