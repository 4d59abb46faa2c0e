use serde::{Deserialize, Serialize};
use tierforge_core::{Field, PartitionField, PartitionSpec, Schema, SchemaError};

/// Table declaration provisioned at start-up.
///
/// # Example
///
/// ```yaml
/// tables:
///   - name: silver_address
///     fields:
///       - { id: 1, name: AddressId, type: integer, required: true }
///       - { id: 2, name: PartyId, type: integer, required: true }
///       - { id: 3, name: streetNo, type: integer }
///     partition:
///       - { column: PartyId, transform: "bucket[10]" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCfg {
    pub name: String,
    pub fields: Vec<Field>,
    #[serde(default)]
    pub partition: Vec<PartitionField>,
}

impl TableCfg {
    pub fn schema(&self) -> Result<Schema, SchemaError> {
        Schema::new(self.fields.clone())
    }

    pub fn partition_spec(&self) -> PartitionSpec {
        let mut spec = PartitionSpec::unpartitioned();
        for f in &self.partition {
            spec.push(f.clone());
        }
        spec
    }

    /// Schema and partition spec, validated against each other.
    pub fn definition(&self) -> Result<(Schema, PartitionSpec), SchemaError> {
        let schema = self.schema()?;
        let spec = self.partition_spec();
        spec.validate(&schema)?;
        Ok((schema, spec))
    }
}
