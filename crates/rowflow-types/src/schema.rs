//! Row schemas: ordered field descriptors that travel alongside rows.
//!
//! A schema is established for a queue before (or with) the first row
//! and is immutable for the life of that queue. Steps resolve field
//! positions by name against the schema exactly once, on their first
//! row.

use serde::{Deserialize, Serialize};

/// Semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Date,
    /// Unconstrained; used for null literals and pass-through fields.
    Any,
}

/// A single field descriptor: name, semantic type, display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: FieldType,
    /// Optional display/format hint (e.g. a date format string).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

fn default_field_type() -> FieldType {
    FieldType::String
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            format: None,
        }
    }
}

/// Ordered sequence of field descriptors for one queue's rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSchema {
    pub fields: Vec<Field>,
}

impl RowSchema {
    #[must_use]
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of the named field, if present.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    #[must_use]
    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// Append a field, returning its position.
    pub fn push(&mut self, field: Field) -> usize {
        self.fields.push(field);
        self.fields.len() - 1
    }

    /// Builder-style append, used when declaring source schemas.
    #[must_use]
    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_of_resolves_by_name() {
        let schema = RowSchema::default()
            .with_field(Field::new("id", FieldType::Integer))
            .with_field(Field::new("name", FieldType::String));
        assert_eq!(schema.index_of("id"), Some(0));
        assert_eq!(schema.index_of("name"), Some(1));
        assert_eq!(schema.index_of("missing"), None);
        assert_eq!(schema.len(), 2);
    }

    #[test]
    fn field_type_defaults_to_string_in_serde() {
        let f: Field = serde_json::from_str(r#"{"name": "city"}"#).unwrap();
        assert_eq!(f.field_type, FieldType::String);
        assert!(f.format.is_none());
    }
}
