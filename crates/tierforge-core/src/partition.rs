//! Deterministic partitioning of rows.
//!
//! A [`PartitionSpec`] is an ordered list of `(column, transform)` pairs. The
//! partition path of a row joins one `name=value` segment per pair, e.g.
//! `id=1/id_bucket=3`. Nulls render as `null`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SchemaError;
use crate::row::Row;
use crate::schema::Schema;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    Identity,
    Bucket(u32),
}

impl Transform {
    fn apply(&self, value: &Value) -> Option<String> {
        match self {
            Transform::Identity => (!value.is_null()).then(|| value.to_string()),
            Transform::Bucket(n) => {
                bucket(value, *n).map(|b| b.to_string())
            }
        }
    }
}

/// CRC32 of the value's canonical bytes, modulo `buckets`.
pub fn bucket(value: &Value, buckets: u32) -> Option<u32> {
    let bytes = value.hash_bytes()?;
    Some(crc32fast::hash(&bytes) % buckets.max(1))
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Identity => f.write_str("identity"),
            Transform::Bucket(n) => write!(f, "bucket[{n}]"),
        }
    }
}

impl FromStr for Transform {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("identity") {
            return Ok(Transform::Identity);
        }
        s.strip_prefix("bucket[")
            .and_then(|rest| rest.strip_suffix(']'))
            .and_then(|n| n.trim().parse::<u32>().ok())
            .map(Transform::Bucket)
            .ok_or_else(|| SchemaError::InvalidTransform(s.to_string()))
    }
}

impl Serialize for Transform {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Transform {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionField {
    pub column: String,
    pub transform: Transform,
}

impl PartitionField {
    fn segment_name(&self) -> String {
        match self.transform {
            Transform::Identity => self.column.clone(),
            Transform::Bucket(_) => format!("{}_bucket", self.column),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionSpec {
    fields: Vec<PartitionField>,
}

impl PartitionSpec {
    pub fn unpartitioned() -> Self {
        Self::default()
    }

    pub fn identity(mut self, column: impl Into<String>) -> Self {
        self.fields.push(PartitionField {
            column: column.into(),
            transform: Transform::Identity,
        });
        self
    }

    pub fn bucket(mut self, column: impl Into<String>, buckets: u32) -> Self {
        self.fields.push(PartitionField {
            column: column.into(),
            transform: Transform::Bucket(buckets),
        });
        self
    }

    pub fn push(&mut self, field: PartitionField) {
        self.fields.push(field);
    }

    pub fn fields(&self) -> &[PartitionField] {
        &self.fields
    }

    pub fn is_unpartitioned(&self) -> bool {
        self.fields.is_empty()
    }

    /// Every column must exist and every bucket count must be positive.
    pub fn validate(&self, schema: &Schema) -> Result<(), SchemaError> {
        for f in &self.fields {
            schema.require(&f.column)?;
            if f.transform == Transform::Bucket(0) {
                return Err(SchemaError::InvalidBucket {
                    column: f.column.clone(),
                });
            }
        }
        Ok(())
    }

    /// Partition path for `row`; empty for an unpartitioned table.
    pub fn partition_path(&self, row: &Row) -> String {
        self.fields
            .iter()
            .map(|f| {
                let value = f
                    .transform
                    .apply(row.value(&f.column))
                    .unwrap_or_else(|| "null".to_string());
                format!("{}={}", f.segment_name(), value)
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use crate::value::FieldType;

    #[test]
    fn transform_parse_and_display() {
        assert_eq!("bucket[10]".parse::<Transform>().unwrap(), Transform::Bucket(10));
        assert_eq!("identity".parse::<Transform>().unwrap(), Transform::Identity);
        assert!("bucket[x]".parse::<Transform>().is_err());
        assert!("truncate[4]".parse::<Transform>().is_err());
        assert_eq!(Transform::Bucket(10).to_string(), "bucket[10]");
    }

    #[test]
    fn bucketing_is_deterministic_and_in_range() {
        for id in 0..100i64 {
            let b = bucket(&Value::Int(id), 10).unwrap();
            assert!(b < 10);
            assert_eq!(bucket(&Value::Int(id), 10), Some(b));
        }
        assert_eq!(bucket(&Value::Null, 10), None);
    }

    #[test]
    fn partition_path_renders_each_segment() {
        let spec = PartitionSpec::unpartitioned().identity("id").bucket("id", 10);
        let row = Row::new().with("id", 1);
        let expected_bucket = bucket(&Value::Int(1), 10).unwrap();
        assert_eq!(
            spec.partition_path(&row),
            format!("id=1/id_bucket={expected_bucket}")
        );

        let null_row = Row::new().with("id", Option::<i64>::None);
        assert_eq!(spec.partition_path(&null_row), "id=null/id_bucket=null");
        assert_eq!(PartitionSpec::unpartitioned().partition_path(&row), "");
    }

    #[test]
    fn validate_against_schema() {
        let schema =
            Schema::new(vec![Field::required(1, "id", FieldType::Integer)]).unwrap();
        assert!(PartitionSpec::unpartitioned().bucket("id", 10).validate(&schema).is_ok());
        assert_eq!(
            PartitionSpec::unpartitioned().bucket("PartyId", 10).validate(&schema),
            Err(SchemaError::UnknownColumn { name: "PartyId".into() })
        );
        assert_eq!(
            PartitionSpec::unpartitioned().bucket("id", 0).validate(&schema),
            Err(SchemaError::InvalidBucket { column: "id".into() })
        );
    }
}
