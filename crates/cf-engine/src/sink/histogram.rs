//! One-dimensional weighted histogram sink.

use std::any::Any;

use serde::{Deserialize, Serialize};
use serde_json::json;

use cf_core::{Error, Result};

use super::{FillCore, InstanceMask, Sink, merge_source};
use crate::axis::Axis;
use crate::library::{EvalContext, ExprLibrary};
use crate::reweight::ReweightSpec;

/// Where values beyond the upper edge go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowMode {
    /// Separate underflow/overflow accumulators.
    #[default]
    Default,
    /// The last bin is the overflow bin: anything at or above its low edge
    /// lands there.
    Dedicated,
    /// Values at or above the upper edge are folded into the last bin.
    MergeLast,
}

/// Accumulated contents of one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilledHistogram {
    /// Bin contents (sum of weights per bin).
    pub bin_content: Vec<f64>,
    /// Sum of weights squared per bin.
    pub sumw2: Vec<f64>,
    /// Underflow sum of weights.
    pub underflow: f64,
    /// Overflow sum of weights. Stays empty under `OverflowMode::MergeLast`.
    pub overflow: f64,
    /// Underflow sum of weights squared.
    pub underflow_sumw2: f64,
    /// Overflow sum of weights squared (before optional folding).
    pub overflow_sumw2: f64,
    /// Entries that landed in a bin.
    pub entries: u64,
}

impl FilledHistogram {
    fn empty(n_bins: usize) -> Self {
        Self {
            bin_content: vec![0.0; n_bins],
            sumw2: vec![0.0; n_bins],
            underflow: 0.0,
            overflow: 0.0,
            underflow_sumw2: 0.0,
            overflow_sumw2: 0.0,
            entries: 0,
        }
    }

    fn add_to_bin(&mut self, bin: usize, weight: f64) {
        self.bin_content[bin] += weight;
        self.sumw2[bin] += weight * weight;
        self.entries += 1;
    }

    fn fill(&mut self, axis: &Axis, mode: OverflowMode, val: f64, weight: f64) {
        let last = axis.n_bins() - 1;
        if mode == OverflowMode::Dedicated && val >= axis.last_low_edge() {
            self.add_to_bin(last, weight);
            return;
        }
        if val < axis.lo() {
            self.underflow += weight;
            self.underflow_sumw2 += weight * weight;
            return;
        }
        if val >= axis.hi() {
            if mode == OverflowMode::MergeLast {
                self.add_to_bin(last, weight);
            } else {
                self.overflow += weight;
                self.overflow_sumw2 += weight * weight;
            }
            return;
        }
        if let Some(b) = axis.find_bin(val) {
            self.add_to_bin(b, weight);
        }
    }

    fn add(&mut self, other: &FilledHistogram) {
        for (a, b) in self.bin_content.iter_mut().zip(&other.bin_content) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        self.underflow_sumw2 += other.underflow_sumw2;
        self.overflow_sumw2 += other.overflow_sumw2;
        self.entries += other.entries;
    }

    /// Sum of in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.bin_content.iter().sum()
    }
}

/// Histogram of one expression, split by cut category.
#[derive(Debug)]
pub struct Histogram1D {
    name: String,
    axis: Axis,
    overflow: OverflowMode,
    core: FillCore,
    categories: Vec<FilledHistogram>,
}

impl Histogram1D {
    /// Histogram `expr` on `axis`, optionally reweighted per sink.
    pub fn new(
        library: &mut ExprLibrary,
        name: impl Into<String>,
        axis: Axis,
        expr: &str,
        reweight: Option<&ReweightSpec>,
    ) -> Result<Self> {
        let core = FillCore::new(library, &[expr], reweight)?;
        Ok(Self { name: name.into(), axis, overflow: OverflowMode::Default, core, categories: Vec::new() })
    }

    /// Set the overflow mode.
    pub fn with_overflow(mut self, mode: OverflowMode) -> Self {
        self.overflow = mode;
        self
    }

    /// Binning.
    pub fn axis(&self) -> &Axis {
        &self.axis
    }

    /// Overflow mode.
    pub fn overflow_mode(&self) -> OverflowMode {
        self.overflow
    }

    /// Contents per category (index = category).
    pub fn categories(&self) -> &[FilledHistogram] {
        &self.categories
    }

    /// Contents of one category.
    pub fn category(&self, category: usize) -> Option<&FilledHistogram> {
        self.categories.get(category)
    }

    /// Sum over all categories.
    pub fn total(&self) -> FilledHistogram {
        let mut total = FilledHistogram::empty(self.axis.n_bins());
        for h in &self.categories {
            total.add(h);
        }
        total
    }
}

fn category_slot(
    categories: &mut Vec<FilledHistogram>,
    n_bins: usize,
    category: usize,
) -> &mut FilledHistogram {
    if category >= categories.len() {
        categories.resize_with(category + 1, || FilledHistogram::empty(n_bins));
    }
    &mut categories[category]
}

impl Sink for Histogram1D {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "histogram1d"
    }

    fn fill(&mut self, ctx: &mut EvalContext<'_>, weights: &[f64], mask: &InstanceMask) {
        let Histogram1D { name, axis, overflow, core, categories } = self;
        core.for_each_instance(ctx, weights, mask, |_, values, w, cat| {
            let val = values[0];
            log::trace!("{name}: fill {val} w={w} cat={cat}");
            category_slot(categories, axis.n_bins(), cat).fill(axis, *overflow, val, w);
        });
    }

    fn thread_clone(&self, library: &mut ExprLibrary) -> Result<Box<dyn Sink>> {
        Ok(Box::new(Histogram1D {
            name: self.name.clone(),
            axis: self.axis.clone(),
            overflow: self.overflow,
            core: self.core.rebind_to(library)?,
            categories: Vec::new(),
        }))
    }

    fn thread_merge(&mut self, other: &dyn Sink) -> Result<()> {
        let other: &Histogram1D = merge_source(&*self, other)?;
        if other.axis != self.axis {
            return Err(Error::Config(format!("histogram '{}': cannot merge different binning", self.name)));
        }
        let n_bins = self.axis.n_bins();
        for (cat, h) in other.categories.iter().enumerate() {
            category_slot(&mut self.categories, n_bins, cat).add(h);
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
            "edges": self.axis.edges(),
            "overflow_mode": self.overflow,
            "categories": self.categories,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
