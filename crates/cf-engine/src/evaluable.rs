//! Per-instance numeric sources used by cuts and reweights.
//!
//! An [`Evaluable`] is either a constant, a formula registered in the
//! worker's [`ExprLibrary`], or a pair of caller-supplied functions reading
//! the current record directly.

use std::fmt;
use std::sync::Arc;

use cf_core::{RecordView, Result};

use crate::library::{EvalContext, ExprId, ExprLibrary};

/// Value of the current record at an instance index.
pub type InstanceFn = Arc<dyn Fn(&dyn RecordView, usize) -> f64 + Send + Sync>;

/// Instance count of the current record.
pub type CountFn = Arc<dyn Fn(&dyn RecordView) -> usize + Send + Sync>;

/// A numeric source with a per-record multiplicity.
#[derive(Clone)]
pub enum Evaluable {
    /// Same value for every record; multiplicity 1.
    Constant(f64),
    /// Formula registered in a library.
    Formula {
        /// Source text (used to re-register in another library).
        text: String,
        /// Handle in the owning library.
        id: ExprId,
    },
    /// Direct computation. Without a count function the multiplicity is 1.
    Function {
        /// Per-instance value.
        value: InstanceFn,
        /// Per-record instance count.
        count: Option<CountFn>,
    },
}

impl Evaluable {
    /// Register `text` in `library` and wrap the handle.
    pub fn formula(library: &mut ExprLibrary, text: &str) -> Result<Self> {
        let id = library.get_expression(text)?;
        Ok(Evaluable::Formula { text: text.to_string(), id })
    }

    /// Wrap a direct computation.
    pub fn function(
        value: impl Fn(&dyn RecordView, usize) -> f64 + Send + Sync + 'static,
        count: Option<CountFn>,
    ) -> Self {
        Evaluable::Function { value: Arc::new(value), count }
    }

    /// Source text for formulas.
    pub fn text(&self) -> Option<&str> {
        match self {
            Evaluable::Formula { text, .. } => Some(text),
            _ => None,
        }
    }

    /// True when the multiplicity is 1 for every record.
    pub fn is_single_valued(&self, library: &ExprLibrary) -> bool {
        match self {
            Evaluable::Constant(_) => true,
            Evaluable::Formula { id, .. } => !library.expr(*id).is_jagged(),
            Evaluable::Function { count, .. } => count.is_none(),
        }
    }

    /// Instance count for the current record.
    pub fn ndata(&self, ctx: &mut EvalContext<'_>) -> usize {
        match self {
            Evaluable::Constant(_) => 1,
            Evaluable::Formula { id, .. } => ctx.multiplicity(*id),
            Evaluable::Function { count: Some(count), .. } => count(ctx.view),
            Evaluable::Function { count: None, .. } => 1,
        }
    }

    /// Value at `instance` for the current record.
    pub fn eval(&self, ctx: &mut EvalContext<'_>, instance: usize) -> f64 {
        match self {
            Evaluable::Constant(v) => *v,
            Evaluable::Formula { id, .. } => ctx.value_at(*id, instance),
            Evaluable::Function { value, .. } => value(ctx.view, instance),
        }
    }

    /// Value at `instance`, reading single-valued sources at instance 0 so
    /// they pair with every instance of a jagged one.
    pub fn eval_broadcast(&self, ctx: &mut EvalContext<'_>, instance: usize) -> f64 {
        let at = if self.is_single_valued(ctx.library) { 0 } else { instance };
        self.eval(ctx, at)
    }

    /// Establish the multiplicity and the first instance's value.
    pub fn preload(&self, ctx: &mut EvalContext<'_>) {
        if let Evaluable::Formula { id, .. } = self {
            if ctx.multiplicity(*id) > 0 {
                ctx.value_at(*id, 0);
            }
        }
    }

    /// Re-register this source in another library (worker clone).
    pub fn rebind_to(&self, library: &mut ExprLibrary) -> Result<Self> {
        match self {
            Evaluable::Formula { text, .. } => Self::formula(library, text),
            other => Ok(other.clone()),
        }
    }

    /// Give back the library reference held by a formula.
    pub fn release(&self, library: &mut ExprLibrary) {
        if let Evaluable::Formula { id, .. } = self {
            library.release(*id);
        }
    }
}

impl fmt::Debug for Evaluable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evaluable::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Evaluable::Formula { text, id } => {
                f.debug_struct("Formula").field("text", text).field("id", id).finish()
            }
            Evaluable::Function { count, .. } => f
                .debug_struct("Function")
                .field("counted", &count.is_some())
                .finish_non_exhaustive(),
        }
    }
}
