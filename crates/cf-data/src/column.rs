//! Column storage: scalar vectors and flat+offsets jagged arrays.

/// A jagged (variable-length) column: flat values + per-entry offsets.
///
/// `offsets` has length `n_entries + 1`. Entry `i` has values
/// `flat[offsets[i]..offsets[i+1]]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JaggedCol {
    /// Flat array of all values across all entries.
    pub flat: Vec<f64>,
    /// Entry boundaries: `offsets.len() == n_entries + 1`.
    pub offsets: Vec<usize>,
}

impl JaggedCol {
    /// Build from one `Vec` per entry.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        let mut offsets = Vec::with_capacity(rows.len() + 1);
        offsets.push(0);
        let mut flat = Vec::with_capacity(rows.iter().map(Vec::len).sum());
        for row in rows {
            flat.extend(row);
            offsets.push(flat.len());
        }
        Self { flat, offsets }
    }

    /// Get element `index` of entry `row`. Returns `oor` for out-of-range.
    pub fn get(&self, row: usize, index: usize, oor: f64) -> f64 {
        let start = self.offsets[row];
        let end = self.offsets[row + 1];
        let len = end - start;
        if index >= len { oor } else { self.flat[start + index] }
    }

    /// Number of instances in entry `row`.
    pub fn row_len(&self, row: usize) -> usize {
        self.offsets[row + 1] - self.offsets[row]
    }

    /// Number of entries.
    pub fn n_entries(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }
}

/// One column of a partition.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// One value per record.
    Scalar(Vec<f64>),
    /// Variable number of values per record.
    Jagged(JaggedCol),
}

impl Column {
    /// Scalar column from values.
    pub fn scalar(values: Vec<f64>) -> Self {
        Column::Scalar(values)
    }

    /// Jagged column from one `Vec` per record.
    pub fn jagged(rows: Vec<Vec<f64>>) -> Self {
        Column::Jagged(JaggedCol::from_rows(rows))
    }

    /// Number of records stored.
    pub fn n_entries(&self) -> usize {
        match self {
            Column::Scalar(v) => v.len(),
            Column::Jagged(j) => j.n_entries(),
        }
    }

    /// Shape of this column.
    pub fn kind(&self) -> cf_core::ColumnKind {
        match self {
            Column::Scalar(_) => cf_core::ColumnKind::Scalar,
            Column::Jagged(_) => cf_core::ColumnKind::Jagged,
        }
    }

    /// Instance count at `row` (`None` for scalar columns).
    pub fn instance_count(&self, row: usize) -> Option<usize> {
        match self {
            Column::Scalar(_) => None,
            Column::Jagged(j) => Some(j.row_len(row)),
        }
    }

    /// Value at (`row`, `instance`); out-of-range instances read as `0.0`.
    pub fn value(&self, row: usize, instance: usize) -> f64 {
        match self {
            Column::Scalar(v) => v[row],
            Column::Jagged(j) => j.get(row, instance, 0.0),
        }
    }
}
