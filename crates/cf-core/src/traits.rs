//! Record-source traits
//!
//! The engine never touches concrete storage. It reads the current record
//! through [`RecordView`], walks an entry range with a [`RecordCursor`], and
//! asks a [`RecordSource`] for independent cursors when it splits a run
//! across workers.

use std::ops::Range;

use crate::types::{ColumnIndex, PartitionId, Schema};

/// Read access to the record a cursor currently points at.
pub trait RecordView {
    /// Resolve a column name in the current partition.
    fn column_index(&self, name: &str) -> Option<ColumnIndex>;

    /// Number of instances of a jagged column in the current record.
    ///
    /// Returns `None` for scalar columns.
    fn instance_count(&self, column: ColumnIndex) -> Option<usize>;

    /// Value of `column` at `instance` in the current record.
    ///
    /// Scalar columns ignore `instance`. Out-of-range instances read as `0.0`.
    fn value(&self, column: ColumnIndex, instance: usize) -> f64;
}

/// Sequential cursor over a global entry range.
pub trait RecordCursor: RecordView {
    /// Load global entry `entry`. Returns the partition-local index, or `None`
    /// past the end of the cursor's range.
    fn load(&mut self, entry: u64) -> Option<u64>;

    /// Partition of the loaded record (`None` before the first load).
    fn current_partition(&self) -> Option<PartitionId>;

    /// Human-readable label of the current partition, for logging.
    fn partition_label(&self) -> String {
        match self.current_partition() {
            Some(p) => format!("partition {p}"),
            None => "no partition".to_string(),
        }
    }
}

/// A partitioned, randomly addressable record store.
pub trait RecordSource: Send + Sync {
    /// Columns available for expressions.
    fn schema(&self) -> &Schema;

    /// Total number of records across all partitions.
    fn entry_count(&self) -> u64;

    /// Cumulative partition boundaries: `offsets[p]..offsets[p + 1]` is the
    /// global entry range of partition `p`. Length is `n_partitions + 1`.
    fn partition_offsets(&self) -> Vec<u64>;

    /// Open an independent cursor restricted to `range` (global entries).
    fn cursor(&self, range: Range<u64>) -> Box<dyn RecordCursor + '_>;

    /// Number of partitions.
    fn partition_count(&self) -> usize {
        self.partition_offsets().len().saturating_sub(1)
    }
}
