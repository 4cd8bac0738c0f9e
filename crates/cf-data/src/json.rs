//! JSON form of a [`Dataset`].
//!
//! ```json
//! {"partitions": [
//!   {"name": "ttH.root", "columns": {"weight": [1.0, 0.5], "jet_pt": [[40.0, 25.0], []]}}
//! ]}
//! ```
//!
//! A column given as a flat array is scalar; an array of arrays is jagged.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use cf_core::Result;
use serde::{Deserialize, Serialize};

use crate::column::Column;
use crate::dataset::{Dataset, Partition};

#[derive(Debug, Serialize, Deserialize)]
struct DatasetDoc {
    partitions: Vec<PartitionDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PartitionDoc {
    #[serde(default)]
    name: String,
    #[serde(default)]
    columns: BTreeMap<String, ColumnDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ColumnDoc {
    Scalar(Vec<f64>),
    Jagged(Vec<Vec<f64>>),
}

impl From<ColumnDoc> for Column {
    fn from(doc: ColumnDoc) -> Self {
        match doc {
            ColumnDoc::Scalar(v) => Column::scalar(v),
            ColumnDoc::Jagged(rows) => Column::jagged(rows),
        }
    }
}

impl From<&Column> for ColumnDoc {
    fn from(col: &Column) -> Self {
        match col {
            Column::Scalar(v) => ColumnDoc::Scalar(v.clone()),
            Column::Jagged(j) => ColumnDoc::Jagged(
                (0..j.n_entries())
                    .map(|r| j.flat[j.offsets[r]..j.offsets[r + 1]].to_vec())
                    .collect(),
            ),
        }
    }
}

impl Dataset {
    /// Parse a dataset from a JSON string.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let doc: DatasetDoc = serde_json::from_str(text)?;
        Self::from_doc(doc)
    }

    /// Parse a dataset from a reader.
    pub fn from_json_reader(reader: impl Read) -> Result<Self> {
        let doc: DatasetDoc = serde_json::from_reader(reader)?;
        Self::from_doc(doc)
    }

    /// Read a dataset from a JSON file. Partitions without a name are named
    /// after the file and their position.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut doc: DatasetDoc = serde_json::from_str(&text)?;
        for (i, part) in doc.partitions.iter_mut().enumerate() {
            if part.name.is_empty() {
                part.name = format!("{}#{}", path.display(), i);
            }
        }
        Self::from_doc(doc)
    }

    /// Serialize to a JSON string.
    pub fn to_json_string(&self) -> Result<String> {
        let doc = DatasetDoc {
            partitions: self
                .partitions()
                .iter()
                .map(|p| PartitionDoc {
                    name: p.name.clone(),
                    columns: p.columns.iter().map(|(n, c)| (n.clone(), c.into())).collect(),
                })
                .collect(),
        };
        Ok(serde_json::to_string(&doc)?)
    }

    fn from_doc(doc: DatasetDoc) -> Result<Self> {
        let partitions = doc
            .partitions
            .into_iter()
            .map(|p| {
                p.columns
                    .into_iter()
                    .fold(Partition::new(p.name), |part, (n, c)| part.with_column(n, c.into()))
            })
            .collect();
        Dataset::new(partitions)
    }
}
