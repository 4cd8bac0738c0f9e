//! Partitioned dataset and its cursor.

use std::ops::Range;

use cf_core::{
    ColumnIndex, Error, PartitionId, RecordCursor, RecordSource, RecordView, Result, Schema,
};

use crate::column::Column;

/// One partition (input file) of a [`Dataset`].
#[derive(Debug, Clone, Default)]
pub struct Partition {
    /// Partition name (usually the file it was read from).
    pub name: String,
    /// Named columns; all must hold the same number of records.
    pub columns: Vec<(String, Column)>,
}

impl Partition {
    /// Create an empty partition.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), columns: Vec::new() }
    }

    /// Add a column (replaces an existing column of the same name).
    pub fn with_column(mut self, name: impl Into<String>, column: Column) -> Self {
        let name = name.into();
        if let Some(slot) = self.columns.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = column;
        } else {
            self.columns.push((name, column));
        }
        self
    }

    /// Number of records (0 for a partition without columns).
    pub fn n_entries(&self) -> usize {
        self.columns.first().map(|(_, c)| c.n_entries()).unwrap_or(0)
    }

    /// Find a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    fn validate(&self) -> Result<()> {
        let n = self.n_entries();
        for (name, col) in &self.columns {
            if col.n_entries() != n {
                return Err(Error::Data(format!(
                    "partition '{}': column '{}' has {} entries, expected {}",
                    self.name,
                    name,
                    col.n_entries(),
                    n
                )));
            }
        }
        Ok(())
    }
}

/// An ordered collection of partitions addressed by global entry number.
#[derive(Debug, Clone)]
pub struct Dataset {
    partitions: Vec<Partition>,
    offsets: Vec<u64>,
    schema: Schema,
}

impl Dataset {
    /// Build a dataset, validating column lengths and kinds.
    ///
    /// The schema is the union of all partitions' columns. A column that is
    /// scalar in one partition and jagged in another is rejected.
    pub fn new(partitions: Vec<Partition>) -> Result<Self> {
        let mut schema = Schema::new();
        let mut offsets = Vec::with_capacity(partitions.len() + 1);
        offsets.push(0u64);
        for part in &partitions {
            part.validate()?;
            for (name, col) in &part.columns {
                let registered = schema.push(name.clone(), col.kind());
                if registered != col.kind() {
                    return Err(Error::Data(format!(
                        "column '{}' is {:?} in partition '{}' but {:?} elsewhere",
                        name,
                        col.kind(),
                        part.name,
                        registered
                    )));
                }
            }
            let last = *offsets.last().unwrap_or(&0);
            offsets.push(last + part.n_entries() as u64);
        }
        log::debug!(
            "dataset: {} partitions, {} entries, {} columns",
            partitions.len(),
            offsets.last().copied().unwrap_or(0),
            schema.len()
        );
        Ok(Self { partitions, offsets, schema })
    }

    /// All partitions in order.
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Partition containing global entry `entry`.
    pub fn partition_of(&self, entry: u64) -> Option<PartitionId> {
        if entry >= self.entry_count() {
            return None;
        }
        // offsets is sorted; the last offset <= entry marks the partition.
        // Empty partitions share an offset with their successor and are skipped.
        Some(self.offsets.partition_point(|&o| o <= entry) - 1)
    }

    /// Open a concrete cursor over `range`.
    pub fn dataset_cursor(&self, range: Range<u64>) -> DatasetCursor<'_> {
        DatasetCursor { dataset: self, range, partition: None, local: 0 }
    }
}

impl RecordSource for Dataset {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn entry_count(&self) -> u64 {
        self.offsets.last().copied().unwrap_or(0)
    }

    fn partition_offsets(&self) -> Vec<u64> {
        self.offsets.clone()
    }

    fn cursor(&self, range: Range<u64>) -> Box<dyn RecordCursor + '_> {
        Box::new(self.dataset_cursor(range))
    }
}

/// Cursor over a global entry range of a [`Dataset`].
#[derive(Debug, Clone)]
pub struct DatasetCursor<'a> {
    dataset: &'a Dataset,
    range: Range<u64>,
    partition: Option<PartitionId>,
    local: usize,
}

impl DatasetCursor<'_> {
    fn current(&self) -> Option<&Partition> {
        self.partition.map(|p| &self.dataset.partitions[p])
    }

    fn column(&self, index: ColumnIndex) -> Option<&Column> {
        self.current().and_then(|p| p.columns.get(index)).map(|(_, c)| c)
    }
}

impl RecordView for DatasetCursor<'_> {
    fn column_index(&self, name: &str) -> Option<ColumnIndex> {
        self.current()?.columns.iter().position(|(n, _)| n == name)
    }

    fn instance_count(&self, column: ColumnIndex) -> Option<usize> {
        self.column(column)?.instance_count(self.local)
    }

    fn value(&self, column: ColumnIndex, instance: usize) -> f64 {
        self.column(column).map(|c| c.value(self.local, instance)).unwrap_or(0.0)
    }
}

impl RecordCursor for DatasetCursor<'_> {
    fn load(&mut self, entry: u64) -> Option<u64> {
        if !self.range.contains(&entry) {
            return None;
        }
        let p = self.dataset.partition_of(entry)?;
        self.partition = Some(p);
        self.local = (entry - self.dataset.offsets[p]) as usize;
        Some(self.local as u64)
    }

    fn current_partition(&self) -> Option<PartitionId> {
        self.partition
    }

    fn partition_label(&self) -> String {
        match self.current() {
            Some(p) => format!("partition {} ('{}')", self.partition.unwrap_or(0), p.name),
            None => "no partition".to_string(),
        }
    }
}
