//! Aggregation targets fed by cuts.
//!
//! Every sink follows the same fill protocol, implemented once in
//! [`FillCore::for_each_instance`]:
//!
//! 1. The record offers as many instances as the shortest jagged source
//!    among the value expressions and the sink reweight (the primary, first
//!    expression when none is jagged); a per-instance selection mask
//!    truncates that count. Single-valued sources pair with every instance.
//! 2. Instances the cut did not select (category < 0) are skipped.
//! 3. The entry weight is the record weight vector at the instance index,
//!    reusing the vector's last entry past its end, times the sink's own
//!    reweight if it has one.
//! 4. The sink counter advances once per filled instance.
//!
//! Workers fill private clones ([`Sink::thread_clone`]); the engine folds
//! them back with [`Sink::thread_merge`] in whatever order they finish.

mod histogram;
mod histogram2d;
mod rows;

pub use histogram::{FilledHistogram, Histogram1D, OverflowMode};
pub use histogram2d::{FilledHistogram2D, Histogram2D};
pub use rows::{Row, RowWriter};

use std::any::Any;

use cf_core::{Error, Result};

use crate::evaluable::Evaluable;
use crate::library::{EvalContext, ExprLibrary};
use crate::reweight::{Reweight, ReweightSpec};

/// Which instances of the current record a cut selected, and under which
/// category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceMask {
    /// A single-valued predicate passed: every instance belongs to one category.
    Record(usize),
    /// Per-instance categories; negative entries are not selected.
    Instances(Vec<i32>),
}

impl Default for InstanceMask {
    fn default() -> Self {
        InstanceMask::Record(0)
    }
}

impl InstanceMask {
    /// Upper bound on instance indices, if the mask is per-instance.
    pub fn limit(&self) -> Option<usize> {
        match self {
            InstanceMask::Record(_) => None,
            InstanceMask::Instances(cats) => Some(cats.len()),
        }
    }

    /// Category of `instance`, or `None` if it was not selected.
    pub fn category(&self, instance: usize) -> Option<usize> {
        match self {
            InstanceMask::Record(cat) => Some(*cat),
            InstanceMask::Instances(cats) => {
                cats.get(instance).and_then(|&c| usize::try_from(c).ok())
            }
        }
    }

    /// True if at least one instance is selected.
    pub fn any(&self) -> bool {
        match self {
            InstanceMask::Record(_) => true,
            InstanceMask::Instances(cats) => cats.iter().any(|&c| c >= 0),
        }
    }
}

/// An aggregation target owned by a cut.
pub trait Sink: Send {
    /// Name, unique within the owning cut.
    fn name(&self) -> &str;

    /// Short kind tag (`"histogram1d"`, ...).
    fn kind(&self) -> &'static str;

    /// Aggregate the current record.
    fn fill(&mut self, ctx: &mut EvalContext<'_>, weights: &[f64], mask: &InstanceMask);

    /// Empty accumulator of the same shape with expressions registered in
    /// `library`.
    fn thread_clone(&self, library: &mut ExprLibrary) -> Result<Box<dyn Sink>>;

    /// Fold a clone's contents into `self`.
    fn thread_merge(&mut self, other: &dyn Sink) -> Result<()>;

    /// Zero the fill counter.
    fn reset_count(&mut self);

    /// Number of filled instances.
    fn count(&self) -> u64;

    /// Give back every library reference this sink holds.
    fn release(&self, library: &mut ExprLibrary);

    /// Serializable view of the aggregate.
    fn snapshot(&self) -> serde_json::Value;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

/// Downcast `other` to the concrete type of the merge target.
pub(crate) fn merge_source<'a, T: 'static>(target: &dyn Sink, other: &'a dyn Sink) -> Result<&'a T> {
    other.as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::Config(format!(
            "cannot merge {} '{}' into {} '{}'",
            other.kind(),
            other.name(),
            target.kind(),
            target.name()
        ))
    })
}

/// Value expressions, optional reweight and fill counter shared by every sink.
#[derive(Debug, Clone)]
pub struct FillCore {
    exprs: Vec<Evaluable>,
    reweight: Option<Reweight>,
    counter: u64,
    values: Vec<f64>,
}

impl FillCore {
    /// Register `exprs` (and the reweight's expressions) in `library`.
    pub fn new(
        library: &mut ExprLibrary,
        exprs: &[&str],
        reweight: Option<&ReweightSpec>,
    ) -> Result<Self> {
        let mut core =
            FillCore { exprs: Vec::with_capacity(exprs.len()), reweight: None, counter: 0, values: Vec::new() };
        for text in exprs {
            if let Err(e) = core.push_expr(library, text) {
                core.release(library);
                return Err(e);
            }
        }
        if let Some(spec) = reweight {
            match spec.compile(library) {
                Ok(rw) => core.reweight = Some(rw),
                Err(e) => {
                    core.release(library);
                    return Err(e);
                }
            }
        }
        Ok(core)
    }

    /// Append a value expression.
    pub fn push_expr(&mut self, library: &mut ExprLibrary, text: &str) -> Result<()> {
        self.exprs.push(Evaluable::formula(library, text)?);
        Ok(())
    }

    /// Source texts of the value expressions.
    pub fn texts(&self) -> Vec<&str> {
        self.exprs.iter().filter_map(Evaluable::text).collect()
    }

    /// Per-sink reweight, if any.
    pub fn reweight(&self) -> Option<&Reweight> {
        self.reweight.as_ref()
    }

    /// Same expressions registered in `library`, counter at zero.
    pub fn rebind_to(&self, library: &mut ExprLibrary) -> Result<Self> {
        let exprs = self.exprs.iter().map(|e| e.rebind_to(library)).collect::<Result<Vec<_>>>()?;
        let reweight = self.reweight.as_ref().map(|r| r.rebind_to(library)).transpose()?;
        Ok(FillCore { exprs, reweight, counter: 0, values: Vec::new() })
    }

    /// Give back every library reference.
    pub fn release(&self, library: &mut ExprLibrary) {
        self.exprs.iter().for_each(|e| e.release(library));
        if let Some(rw) = &self.reweight {
            rw.release(library);
        }
    }

    /// Filled instance count.
    pub fn count(&self) -> u64 {
        self.counter
    }

    /// Zero the counter.
    pub fn reset_count(&mut self) {
        self.counter = 0;
    }

    /// Add a merged clone's counter.
    pub fn absorb_count(&mut self, other: &FillCore) {
        self.counter += other.counter;
    }

    /// Number of instances the current record offers: the shortest jagged
    /// source, or the primary expression's multiplicity when every source
    /// is single-valued.
    fn instance_count(exprs: &[Evaluable], reweight: Option<&Reweight>, ctx: &mut EvalContext<'_>) -> usize {
        let mut primary = 1;
        let mut shortest: Option<usize> = None;
        for (k, e) in exprs.iter().enumerate() {
            let m = e.ndata(ctx);
            if k == 0 {
                primary = m;
            }
            if !e.is_single_valued(ctx.library) {
                shortest = Some(shortest.map_or(m, |s| s.min(m)));
            }
        }
        if let Some(rw) = reweight.filter(|rw| !rw.is_single_valued(ctx.library)) {
            let m = rw.ndata(ctx);
            shortest = Some(shortest.map_or(m, |s| s.min(m)));
        }
        shortest.unwrap_or(primary)
    }

    /// Run the fill protocol, calling `f(instance, values, entry_weight, category)`
    /// for each instance to aggregate. `values` holds one entry per value
    /// expression.
    pub fn for_each_instance(
        &mut self,
        ctx: &mut EvalContext<'_>,
        weights: &[f64],
        mask: &InstanceMask,
        mut f: impl FnMut(usize, &[f64], f64, usize),
    ) {
        let Some(&last_weight) = weights.last() else {
            return;
        };
        let FillCore { exprs, reweight, counter, values } = self;
        let mut n = Self::instance_count(exprs, reweight.as_ref(), ctx);
        if let Some(limit) = mask.limit() {
            n = n.min(limit);
        }
        for i in 0..n {
            let Some(category) = mask.category(i) else {
                continue;
            };
            *counter += 1;
            let mut w = weights.get(i).copied().unwrap_or(last_weight);
            if let Some(rw) = reweight.as_ref() {
                let at = if rw.is_single_valued(ctx.library) { 0 } else { i };
                w *= rw.evaluate(ctx, at);
            }
            values.clear();
            for e in exprs.iter() {
                values.push(e.eval_broadcast(ctx, i));
            }
            f(i, values, w, category);
        }
    }
}
