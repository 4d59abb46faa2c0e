use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::{SchemaError, SchemaViolation};
use crate::row::Row;
use crate::value::FieldType;

/// A column definition. `id` is stable across additive schema changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
    #[serde(default)]
    pub required: bool,
}

impl Field {
    pub fn required(id: u32, name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            id,
            name: name.into(),
            ty,
            required: true,
        }
    }

    pub fn optional(id: u32, name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            id,
            name: name.into(),
            ty,
            required: false,
        }
    }
}

/// Ordered list of uniquely identified fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Field>", into = "Vec<Field>")]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Result<Self, SchemaError> {
        let mut ids = HashSet::with_capacity(fields.len());
        let mut names = HashSet::with_capacity(fields.len());
        for f in &fields {
            if !ids.insert(f.id) {
                return Err(SchemaError::DuplicateId { id: f.id });
            }
            if !names.insert(f.name.as_str()) {
                return Err(SchemaError::DuplicateName {
                    name: f.name.clone(),
                });
            }
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_id(&self, id: u32) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Resolve a column, failing with `UnknownColumn`.
    pub fn require(&self, name: &str) -> Result<&Field, SchemaError> {
        self.field(name).ok_or_else(|| SchemaError::UnknownColumn {
            name: name.to_string(),
        })
    }

    /// Check that `row` has exactly this schema's fields, in order, with
    /// matching types and no nulls in required fields.
    pub fn validate(&self, row: &Row) -> Result<(), SchemaViolation> {
        let mut cells = row.iter();
        for (position, field) in self.fields.iter().enumerate() {
            let Some((name, value)) = cells.next() else {
                return Err(SchemaViolation::MissingField {
                    field: field.name.clone(),
                });
            };

            if name != field.name {
                return Err(if self.field(name).is_some() {
                    SchemaViolation::FieldOrder {
                        position,
                        expected: field.name.clone(),
                        found: name.to_string(),
                    }
                } else {
                    SchemaViolation::UnexpectedField {
                        field: name.to_string(),
                    }
                });
            }

            match value.field_type() {
                None if field.required => {
                    return Err(SchemaViolation::NullRequired {
                        field: field.name.clone(),
                    });
                }
                Some(found) if found != field.ty => {
                    return Err(SchemaViolation::TypeMismatch {
                        field: field.name.clone(),
                        expected: field.ty,
                        found,
                    });
                }
                _ => {}
            }
        }

        match cells.next() {
            Some((name, _)) => Err(SchemaViolation::UnexpectedField {
                field: name.to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl TryFrom<Vec<Field>> for Schema {
    type Error = SchemaError;

    fn try_from(fields: Vec<Field>) -> Result<Self, Self::Error> {
        Schema::new(fields)
    }
}

impl From<Schema> for Vec<Field> {
    fn from(schema: Schema) -> Self {
        schema.fields
    }
}
