//! Common data types for cutflow

use serde::{Deserialize, Serialize};

/// Ordinal of a partition (input file) within a record source.
pub type PartitionId = usize;

/// Position of a column within one partition's column table.
///
/// Column positions are only stable within a partition; readers must be
/// rebound whenever the cursor crosses into another partition.
pub type ColumnIndex = usize;

/// Shape of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// One value per record.
    Scalar,
    /// A variable number of values (instances) per record.
    Jagged,
}

/// Name and shape of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name as referenced from expressions.
    pub name: String,
    /// Scalar or jagged.
    pub kind: ColumnKind,
}

/// Columns known to a record source, used to validate expressions at
/// configuration time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnInfo>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column. A column that is already present keeps its first kind.
    pub fn with_column(mut self, name: impl Into<String>, kind: ColumnKind) -> Self {
        self.push(name, kind);
        self
    }

    /// Add a column in place. Returns the kind now registered for `name`.
    pub fn push(&mut self, name: impl Into<String>, kind: ColumnKind) -> ColumnKind {
        let name = name.into();
        if let Some(existing) = self.find(&name) {
            return existing.kind;
        }
        self.columns.push(ColumnInfo { name, kind });
        kind
    }

    /// Find a column by name.
    pub fn find(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Kind of column `name`, if present.
    pub fn kind(&self, name: &str) -> Option<ColumnKind> {
        self.find(name).map(|c| c.kind)
    }

    /// All columns in registration order.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// List all column names.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
