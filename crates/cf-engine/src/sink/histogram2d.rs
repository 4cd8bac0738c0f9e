//! Two-dimensional weighted histogram sink.

use std::any::Any;

use serde::Serialize;
use serde_json::json;

use cf_core::{Error, Result};

use super::{FillCore, InstanceMask, Sink, merge_source};
use crate::axis::Axis;
use crate::library::{EvalContext, ExprLibrary};
use crate::reweight::ReweightSpec;

/// Accumulated contents of one category; bins are row-major with y varying
/// fastest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilledHistogram2D {
    /// Bin contents.
    pub bin_content: Vec<f64>,
    /// Sum of weights squared per bin.
    pub sumw2: Vec<f64>,
    /// Sum of weights of entries outside either axis.
    pub out_of_range: f64,
    /// Entries that landed in a bin.
    pub entries: u64,
}

impl FilledHistogram2D {
    fn empty(n: usize) -> Self {
        Self { bin_content: vec![0.0; n], sumw2: vec![0.0; n], out_of_range: 0.0, entries: 0 }
    }

    fn add(&mut self, other: &FilledHistogram2D) {
        for (a, b) in self.bin_content.iter_mut().zip(&other.bin_content) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        self.out_of_range += other.out_of_range;
        self.entries += other.entries;
    }
}

/// Histogram of an `(x, y)` expression pair, split by cut category.
#[derive(Debug)]
pub struct Histogram2D {
    name: String,
    x_axis: Axis,
    y_axis: Axis,
    core: FillCore,
    categories: Vec<FilledHistogram2D>,
}

impl Histogram2D {
    /// Histogram `x_expr` against `y_expr`. The x expression drives the
    /// instance count.
    pub fn new(
        library: &mut ExprLibrary,
        name: impl Into<String>,
        (x_axis, x_expr): (Axis, &str),
        (y_axis, y_expr): (Axis, &str),
        reweight: Option<&ReweightSpec>,
    ) -> Result<Self> {
        let core = FillCore::new(library, &[x_expr, y_expr], reweight)?;
        Ok(Self { name: name.into(), x_axis, y_axis, core, categories: Vec::new() })
    }

    /// Contents of one category.
    pub fn category(&self, category: usize) -> Option<&FilledHistogram2D> {
        self.categories.get(category)
    }

    /// Content of bin `(ix, iy)` in `category`.
    pub fn bin(&self, category: usize, ix: usize, iy: usize) -> f64 {
        self.category(category)
            .map_or(0.0, |h| h.bin_content[ix * self.y_axis.n_bins() + iy])
    }

    fn n_cells(&self) -> usize {
        self.x_axis.n_bins() * self.y_axis.n_bins()
    }
}

fn category_slot(
    categories: &mut Vec<FilledHistogram2D>,
    n_cells: usize,
    category: usize,
) -> &mut FilledHistogram2D {
    if category >= categories.len() {
        categories.resize_with(category + 1, || FilledHistogram2D::empty(n_cells));
    }
    &mut categories[category]
}

impl Sink for Histogram2D {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "histogram2d"
    }

    fn fill(&mut self, ctx: &mut EvalContext<'_>, weights: &[f64], mask: &InstanceMask) {
        let n_cells = self.n_cells();
        let Histogram2D { x_axis, y_axis, core, categories, .. } = self;
        core.for_each_instance(ctx, weights, mask, |_, values, w, cat| {
            let (x, y) = (values[0], values[1]);
            let h = category_slot(categories, n_cells, cat);
            match (x_axis.find_bin(x), y_axis.find_bin(y)) {
                (Some(ix), Some(iy)) => {
                    let b = ix * y_axis.n_bins() + iy;
                    h.bin_content[b] += w;
                    h.sumw2[b] += w * w;
                    h.entries += 1;
                }
                _ => h.out_of_range += w,
            }
        });
    }

    fn thread_clone(&self, library: &mut ExprLibrary) -> Result<Box<dyn Sink>> {
        Ok(Box::new(Histogram2D {
            name: self.name.clone(),
            x_axis: self.x_axis.clone(),
            y_axis: self.y_axis.clone(),
            core: self.core.rebind_to(library)?,
            categories: Vec::new(),
        }))
    }

    fn thread_merge(&mut self, other: &dyn Sink) -> Result<()> {
        let other: &Histogram2D = merge_source(&*self, other)?;
        if other.x_axis != self.x_axis || other.y_axis != self.y_axis {
            return Err(Error::Config(format!("histogram '{}': cannot merge different binning", self.name)));
        }
        let n_cells = self.n_cells();
        for (cat, h) in other.categories.iter().enumerate() {
            category_slot(&mut self.categories, n_cells, cat).add(h);
        }
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
            "expr": self.core.texts(),
            "count": self.count(),
            "x_edges": self.x_axis.edges(),
            "y_edges": self.y_axis.edges(),
            "categories": self.categories,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
