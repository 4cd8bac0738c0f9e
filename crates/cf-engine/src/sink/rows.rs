//! Row-writing sink: one output row per filled instance.

use std::any::Any;

use serde::Serialize;
use serde_json::json;

use cf_core::{Error, Result};

use super::{FillCore, InstanceMask, Sink, merge_source};
use crate::library::{EvalContext, ExprLibrary};
use crate::reweight::ReweightSpec;

/// One derived row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    /// Column values, in column order.
    pub values: Vec<f64>,
    /// Entry weight.
    pub weight: f64,
    /// Cut category of the instance.
    pub category: usize,
}

/// Writes named expression values plus the entry weight for every filled
/// instance. The first column drives the instance count.
#[derive(Debug)]
pub struct RowWriter {
    name: String,
    columns: Vec<String>,
    core: FillCore,
    rows: Vec<Row>,
}

impl RowWriter {
    /// Empty writer; add columns with [`RowWriter::add_column`].
    pub fn new(library: &mut ExprLibrary, name: impl Into<String>, reweight: Option<&ReweightSpec>) -> Result<Self> {
        let core = FillCore::new(library, &[], reweight)?;
        Ok(Self { name: name.into(), columns: Vec::new(), core, rows: Vec::new() })
    }

    /// Add an output column computed by `expr`.
    ///
    /// Column names are unique; `weight` and `category` are reserved.
    pub fn add_column(&mut self, library: &mut ExprLibrary, name: &str, expr: &str) -> Result<()> {
        if name == "weight" || name == "category" {
            return Err(Error::Config(format!("row writer '{}': column name '{name}' is reserved", self.name)));
        }
        if self.columns.iter().any(|c| c == name) {
            return Err(Error::DuplicateName(format!("{}.{name}", self.name)));
        }
        if !self.rows.is_empty() {
            return Err(Error::Config(format!("row writer '{}': cannot add columns after filling", self.name)));
        }
        self.core.push_expr(library, expr)?;
        self.columns.push(name.to_string());
        Ok(())
    }

    /// Output column names (without `weight` and `category`).
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows written so far.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }
}

impl Sink for RowWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "rows"
    }

    fn fill(&mut self, ctx: &mut EvalContext<'_>, weights: &[f64], mask: &InstanceMask) {
        let RowWriter { core, rows, .. } = self;
        core.for_each_instance(ctx, weights, mask, |_, values, weight, category| {
            rows.push(Row { values: values.to_vec(), weight, category });
        });
    }

    fn thread_clone(&self, library: &mut ExprLibrary) -> Result<Box<dyn Sink>> {
        Ok(Box::new(RowWriter {
            name: self.name.clone(),
            columns: self.columns.clone(),
            core: self.core.rebind_to(library)?,
            rows: Vec::new(),
        }))
    }

    fn thread_merge(&mut self, other: &dyn Sink) -> Result<()> {
        let other: &RowWriter = merge_source(&*self, other)?;
        if other.columns != self.columns {
            return Err(Error::Config(format!("row writer '{}': cannot merge different columns", self.name)));
        }
        self.rows.extend_from_slice(&other.rows);
        self.core.absorb_count(&other.core);
        Ok(())
    }

    fn reset_count(&mut self) {
        self.core.reset_count();
    }

    fn count(&self) -> u64 {
        self.core.count()
    }

    fn release(&self, library: &mut ExprLibrary) {
        self.core.release(library);
    }

    fn snapshot(&self) -> serde_json::Value {
        json!({
            "kind": self.kind(),
            "name": self.name,
            "count": self.count(),
            "columns": self.columns,
            "rows": self.rows,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::library::testing::Record;
    use cf_core::ColumnKind;

    fn record() -> Record {
        Record {
            columns: vec![
                ("pt", ColumnKind::Jagged, vec![10.0, 20.0]),
                ("run", ColumnKind::Scalar, vec![7.0]),
            ],
        }
    }

    #[test]
    fn writes_one_row_per_instance() {
        let rec = record();
        let mut lib = ExprLibrary::new(Arc::new(rec.schema()));
        let mut w = RowWriter::new(&mut lib, "rows", None).unwrap();
        w.add_column(&mut lib, "pt", "pt").unwrap();
        w.add_column(&mut lib, "run", "run").unwrap();
        lib.rebind_all(&rec).unwrap();
        let mut ctx = EvalContext::new(&mut lib, &rec);
        w.fill(&mut ctx, &[0.5], &InstanceMask::Instances(vec![-1, 3]));

        assert_eq!(w.rows(), &[Row { values: vec![20.0, 7.0], weight: 0.5, category: 3 }]);
        assert_eq!(w.count(), 1);
        assert_eq!(w.snapshot()["columns"][1], "run");
    }

    #[test]
    fn column_names_are_checked() {
        let rec = record();
        let mut lib = ExprLibrary::new(Arc::new(rec.schema()));
        let mut w = RowWriter::new(&mut lib, "rows", None).unwrap();
        w.add_column(&mut lib, "pt", "pt").unwrap();
        assert!(matches!(w.add_column(&mut lib, "pt", "run"), Err(Error::DuplicateName(_))));
        assert!(matches!(w.add_column(&mut lib, "weight", "run"), Err(Error::Config(_))));
        assert!(matches!(w.add_column(&mut lib, "eta", "eta"), Err(Error::Compile { .. })));
        assert_eq!(w.columns(), &["pt".to_string()]);
    }

    #[test]
    fn merge_appends_rows() {
        let rec = record();
        let mut lib = ExprLibrary::new(Arc::new(rec.schema()));
        let mut w = RowWriter::new(&mut lib, "rows", None).unwrap();
        w.add_column(&mut lib, "run", "run").unwrap();
        let mut wlib = ExprLibrary::new(Arc::new(rec.schema()));
        let mut clone = w.thread_clone(&mut wlib).unwrap();
        wlib.rebind_all(&rec).unwrap();
        {
            let mut ctx = EvalContext::new(&mut wlib, &rec);
            clone.fill(&mut ctx, &[1.0], &InstanceMask::Record(0));
            clone.fill(&mut ctx, &[1.0], &InstanceMask::Record(0));
        }
        w.thread_merge(clone.as_ref()).unwrap();
        assert_eq!(w.rows().len(), 2);
        assert_eq!(w.count(), 2);
    }

    #[test]
    fn rows_stop_at_shortest_column() {
        let rec = Record {
            columns: vec![
                ("pt", ColumnKind::Jagged, vec![10.0, 20.0, 30.0]),
                ("eta", ColumnKind::Jagged, vec![1.5]),
            ],
        };
        let mut lib = ExprLibrary::new(Arc::new(rec.schema()));
        let mut w = RowWriter::new(&mut lib, "rows", None).unwrap();
        w.add_column(&mut lib, "pt", "pt").unwrap();
        w.add_column(&mut lib, "eta", "eta").unwrap();
        lib.rebind_all(&rec).unwrap();
        let mut ctx = EvalContext::new(&mut lib, &rec);
        w.fill(&mut ctx, &[1.0], &InstanceMask::Record(0));

        assert_eq!(w.rows(), &[Row { values: vec![10.0, 1.5], weight: 1.0, category: 0 }]);
        assert_eq!(w.count(), 1);
    }
}
