//! Field types and definitions used by the schema builder.
//!
//! A [`FieldDefinition`] is the storage-neutral description of one column:
//! its name, its [`FieldType`], and any [`FieldConstraint`]s. Drivers decide
//! how each type maps onto their native column types.

use std::fmt;

use crate::value::Value;

/// The data type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// Boolean (true/false).
    Bool,
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit floating-point number.
    Float,
    /// 64-bit floating-point number.
    Double,
    /// Unlimited-length text.
    String,
    /// UUID.
    Uuid,
    /// Date without time.
    Date,
    /// Date and time.
    DateTime,
    /// Raw binary data.
    Data,
    /// JSON document.
    Json,
    /// Homogeneous array of another type.
    Array(Box<FieldType>),
    /// A named enumeration with a fixed set of cases.
    Enum {
        /// The enumeration name.
        name: String,
        /// The allowed cases.
        cases: Vec<String>,
    },
    /// A driver-specific type passed through verbatim.
    Custom(String),
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int8 => write!(f, "int8"),
            Self::Int16 => write!(f, "int16"),
            Self::Int32 => write!(f, "int32"),
            Self::Int64 => write!(f, "int64"),
            Self::Float => write!(f, "float"),
            Self::Double => write!(f, "double"),
            Self::String => write!(f, "string"),
            Self::Uuid => write!(f, "uuid"),
            Self::Date => write!(f, "date"),
            Self::DateTime => write!(f, "datetime"),
            Self::Data => write!(f, "data"),
            Self::Json => write!(f, "json"),
            Self::Array(inner) => write!(f, "array<{inner}>"),
            Self::Enum { name, .. } => write!(f, "enum<{name}>"),
            Self::Custom(raw) => write!(f, "{raw}"),
        }
    }
}

/// Behavior when a referenced row is deleted (ON DELETE action).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDelete {
    /// Delete all referencing rows.
    Cascade,
    /// Prevent deletion while referencing rows exist.
    Restrict,
    /// Set the referencing column to NULL.
    SetNull,
    /// Take no action.
    #[default]
    NoAction,
}

impl OnDelete {
    /// Returns the SQL keyword for this action.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::Restrict => "RESTRICT",
            Self::SetNull => "SET NULL",
            Self::NoAction => "NO ACTION",
        }
    }
}

/// A column-level constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldConstraint {
    /// The column may not be NULL.
    Required,
    /// The column is the primary key. `auto` requests a store-generated value.
    Identifier {
        /// Whether the store generates the value.
        auto: bool,
    },
    /// The column value must be unique.
    Unique,
    /// The column references a column of another table.
    References {
        /// The referenced table.
        table: String,
        /// The referenced column.
        column: String,
        /// What happens when the referenced row is deleted.
        on_delete: OnDelete,
    },
    /// Default value for new rows.
    Default(Value),
}

/// The complete definition of one field.
///
/// # Examples
///
/// ```
/// use fluent_rs_db::fields::{FieldConstraint, FieldDefinition, FieldType};
///
/// let field = FieldDefinition::new("name", FieldType::String).required();
/// assert!(field.is_required());
/// assert_eq!(field.constraints, vec![FieldConstraint::Required]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    /// The field (column) name.
    pub name: String,
    /// The data type.
    pub field_type: FieldType,
    /// Column constraints, in declaration order.
    pub constraints: Vec<FieldConstraint>,
}

impl FieldDefinition {
    /// Creates a field with no constraints.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            constraints: Vec::new(),
        }
    }

    /// Creates a field with the given constraints.
    pub fn with_constraints(
        name: impl Into<String>,
        field_type: FieldType,
        constraints: impl IntoIterator<Item = FieldConstraint>,
    ) -> Self {
        Self {
            name: name.into(),
            field_type,
            constraints: constraints.into_iter().collect(),
        }
    }

    /// Adds a constraint.
    pub fn constraint(mut self, constraint: FieldConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Marks the field NOT NULL.
    pub fn required(self) -> Self {
        self.constraint(FieldConstraint::Required)
    }

    /// Marks the field UNIQUE.
    pub fn unique(self) -> Self {
        self.constraint(FieldConstraint::Unique)
    }

    /// Sets a default value.
    pub fn default_value(self, value: impl Into<Value>) -> Self {
        self.constraint(FieldConstraint::Default(value.into()))
    }

    /// Adds a foreign-key reference.
    pub fn references(
        self,
        table: impl Into<String>,
        column: impl Into<String>,
        on_delete: OnDelete,
    ) -> Self {
        self.constraint(FieldConstraint::References {
            table: table.into(),
            column: column.into(),
            on_delete,
        })
    }

    /// Returns whether the field is NOT NULL. Identifiers are implicitly required.
    pub fn is_required(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| matches!(c, FieldConstraint::Required | FieldConstraint::Identifier { .. }))
    }

    /// Returns the identifier constraint's `auto` flag, if this is the primary key.
    pub fn identifier(&self) -> Option<bool> {
        self.constraints.iter().find_map(|c| match c {
            FieldConstraint::Identifier { auto } => Some(*auto),
            _ => None,
        })
    }

    /// Returns whether the field carries a UNIQUE constraint.
    pub fn is_unique(&self) -> bool {
        self.constraints.contains(&FieldConstraint::Unique)
    }

    /// Returns the default value, if any.
    pub fn default(&self) -> Option<&Value> {
        self.constraints.iter().find_map(|c| match c {
            FieldConstraint::Default(v) => Some(v),
            _ => None,
        })
    }

    /// Returns the foreign-key target, if any.
    pub fn reference(&self) -> Option<(&str, &str, OnDelete)> {
        self.constraints.iter().find_map(|c| match c {
            FieldConstraint::References {
                table,
                column,
                on_delete,
            } => Some((table.as_str(), column.as_str(), *on_delete)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_display() {
        assert_eq!(FieldType::String.to_string(), "string");
        assert_eq!(
            FieldType::Array(Box::new(FieldType::Int64)).to_string(),
            "array<int64>"
        );
        assert_eq!(
            FieldType::Enum {
                name: "planet_type".into(),
                cases: vec!["gas".into(), "rocky".into()],
            }
            .to_string(),
            "enum<planet_type>"
        );
    }

    #[test]
    fn test_identifier_is_required() {
        let field = FieldDefinition::with_constraints(
            "id",
            FieldType::Uuid,
            [FieldConstraint::Identifier { auto: false }],
        );
        assert!(field.is_required());
        assert_eq!(field.identifier(), Some(false));
    }

    #[test]
    fn test_builder_helpers() {
        let field = FieldDefinition::new("galaxy_id", FieldType::Uuid)
            .required()
            .references("galaxies", "id", OnDelete::Cascade);
        assert!(field.is_required());
        assert!(!field.is_unique());
        assert_eq!(field.reference(), Some(("galaxies", "id", OnDelete::Cascade)));
        assert_eq!(field.identifier(), None);
    }

    #[test]
    fn test_default_value() {
        let field = FieldDefinition::new("mass", FieldType::Int64).default_value(0_i64);
        assert_eq!(field.default(), Some(&Value::Int(0)));
        assert!(!field.is_required());
    }

    #[test]
    fn test_on_delete_sql() {
        assert_eq!(OnDelete::Cascade.as_sql(), "CASCADE");
        assert_eq!(OnDelete::default(), OnDelete::NoAction);
    }
}
