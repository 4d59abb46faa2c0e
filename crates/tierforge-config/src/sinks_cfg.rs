use serde::{Deserialize, Serialize};

/// One entry of the sink registry: a projection rule paired with the table
/// it writes and the location of its offset state.
///
/// # Example
///
/// ```yaml
/// sinks:
///   - id: silver_identity
///     target: silver_identity
///     checkpoint_location: ./state/silver_identity
///     projection:
///       type: select
///       columns: [id, firstName, lastName]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkCfg {
    /// Unique identifier; also the writer id used for idempotent commits.
    pub id: String,

    /// Target table. Must differ from the source table and from every other
    /// sink's target.
    pub target: String,

    /// Directory holding this sink's offset state.
    /// Required unless the checkpoint backend is `memory`.
    #[serde(default, alias = "checkpointLocation")]
    pub checkpoint_location: Option<String>,

    pub projection: ProjectionCfg,
}

/// Projection rule definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProjectionCfg {
    /// Copy (and optionally rename) a subset of source columns.
    ///
    /// ```yaml
    /// projection:
    ///   type: select
    ///   columns:
    ///     - id
    ///     - { from: firstName, to: first_name }
    /// ```
    Select { columns: Vec<ColumnMap> },

    /// Fan one source row out into one row per embedded entity ("slot").
    ///
    /// Each output row carries the parent key, a synthesized key
    /// `parent * slots.len() + slot_index` and the slot's mapped columns.
    /// A slot whose mapped columns are all null produces no row.
    ///
    /// ```yaml
    /// projection:
    ///   type: split
    ///   key_column: AddressId
    ///   parent: { from: id, to: PartyId }
    ///   slots:
    ///     - columns:
    ///         - { from: streetNo1, to: streetNo }
    ///         - { from: cityName1, to: cityName }
    ///     - columns:
    ///         - { from: streetNo2, to: streetNo }
    ///         - { from: cityName2, to: cityName }
    /// ```
    Split {
        key_column: String,
        parent: ColumnMap,
        slots: Vec<SlotCfg>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotCfg {
    pub columns: Vec<ColumnMap>,
}

/// Source column to target column mapping. A bare string keeps the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnMap {
    Same(String),
    Renamed { from: String, to: String },
}

impl ColumnMap {
    pub fn renamed(from: impl Into<String>, to: impl Into<String>) -> Self {
        ColumnMap::Renamed {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn source(&self) -> &str {
        match self {
            ColumnMap::Same(name) => name,
            ColumnMap::Renamed { from, .. } => from,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            ColumnMap::Same(name) => name,
            ColumnMap::Renamed { to, .. } => to,
        }
    }
}

impl From<&str> for ColumnMap {
    fn from(name: &str) -> Self {
        ColumnMap::Same(name.to_string())
    }
}
