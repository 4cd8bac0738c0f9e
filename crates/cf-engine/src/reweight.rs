//! Per-instance multiplicative weight corrections.
//!
//! A [`ReweightSpec`] describes a reweight in terms of expression text and is
//! library-independent; [`ReweightSpec::compile`] registers its expressions in
//! a worker's library and yields a [`Reweight`] ready for evaluation.

use std::sync::Arc;

use cf_core::{Error, Result};

use crate::evaluable::{CountFn, Evaluable, InstanceFn};
use crate::library::{EvalContext, ExprLibrary};
use crate::lookup::{BinnedLookup, Curve, LookupSource, RefFunction};

/// Library-independent description of a reweight.
#[derive(Clone)]
pub enum ReweightSpec {
    /// Weight equals the expression value.
    Raw(String),
    /// Step-function lookup over 1–3 dimension expressions.
    Binned {
        /// Lookup table.
        table: Arc<BinnedLookup>,
        /// One expression per table axis.
        dims: Vec<String>,
    },
    /// Interpolated 1-D curve.
    Interpolated {
        /// Reference curve.
        curve: Arc<Curve>,
        /// Dimension expression.
        dim: String,
    },
    /// Continuous function of 1–3 dimension expressions.
    Functional {
        /// Reference function.
        function: Arc<RefFunction>,
        /// One expression per function variable.
        dims: Vec<String>,
    },
    /// Caller-supplied computation.
    Custom {
        /// Per-instance weight.
        value: InstanceFn,
        /// Per-record instance count (1 when absent).
        count: Option<CountFn>,
    },
    /// Product of two reweights; multiplicity from the first.
    Factorized(Box<ReweightSpec>, Box<ReweightSpec>),
}

impl std::fmt::Debug for ReweightSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReweightSpec::Raw(e) => f.debug_tuple("Raw").field(e).finish(),
            ReweightSpec::Binned { dims, .. } => f.debug_struct("Binned").field("dims", dims).finish(),
            ReweightSpec::Interpolated { dim, .. } => {
                f.debug_struct("Interpolated").field("dim", dim).finish()
            }
            ReweightSpec::Functional { dims, .. } => {
                f.debug_struct("Functional").field("dims", dims).finish()
            }
            ReweightSpec::Custom { .. } => f.write_str("Custom"),
            ReweightSpec::Factorized(a, b) => f.debug_tuple("Factorized").field(a).field(b).finish(),
        }
    }
}

impl ReweightSpec {
    /// Raw expression reweight.
    pub fn raw(expr: impl Into<String>) -> Self {
        ReweightSpec::Raw(expr.into())
    }

    /// Binned lookup reweight.
    pub fn binned(table: BinnedLookup, dims: &[&str]) -> Self {
        ReweightSpec::Binned {
            table: Arc::new(table),
            dims: dims.iter().map(|d| d.to_string()).collect(),
        }
    }

    /// Interpolated curve reweight.
    pub fn interpolated(curve: Curve, dim: impl Into<String>) -> Self {
        ReweightSpec::Interpolated { curve: Arc::new(curve), dim: dim.into() }
    }

    /// Function reweight.
    pub fn functional(function: RefFunction, dims: &[&str]) -> Self {
        ReweightSpec::Functional {
            function: Arc::new(function),
            dims: dims.iter().map(|d| d.to_string()).collect(),
        }
    }

    /// Product of two reweights.
    pub fn factorized(first: ReweightSpec, second: ReweightSpec) -> Self {
        ReweightSpec::Factorized(Box::new(first), Box::new(second))
    }

    /// Register every expression in `library` and build the reweight.
    ///
    /// Dimension-count mismatches are configuration errors; bad expression
    /// text is a compile error. Nothing stays registered on failure.
    pub fn compile(&self, library: &mut ExprLibrary) -> Result<Reweight> {
        match self {
            ReweightSpec::Raw(text) => Ok(Reweight::Raw(Evaluable::formula(library, text)?)),
            ReweightSpec::Binned { table, dims } => {
                check_dims("binned", table.ndim(), dims.len())?;
                lookup(library, dims, LookupSource::Binned(table.clone()))
            }
            ReweightSpec::Interpolated { curve, dim } => lookup(
                library,
                std::slice::from_ref(dim),
                LookupSource::Interpolated(curve.clone()),
            ),
            ReweightSpec::Functional { function, dims } => {
                check_dims("functional", function.ndim(), dims.len())?;
                lookup(library, dims, LookupSource::Functional(function.clone()))
            }
            ReweightSpec::Custom { value, count } => Ok(Reweight::Raw(Evaluable::Function {
                value: value.clone(),
                count: count.clone(),
            })),
            ReweightSpec::Factorized(a, b) => {
                let first = a.compile(library)?;
                match b.compile(library) {
                    Ok(second) => Ok(Reweight::Factorized(Box::new(first), Box::new(second))),
                    Err(e) => {
                        first.release(library);
                        Err(e)
                    }
                }
            }
        }
    }
}

fn check_dims(kind: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(Error::Config(format!(
            "{kind} reweight source has {expected} dimensions but {got} expressions were given"
        )));
    }
    Ok(())
}

fn lookup(library: &mut ExprLibrary, dims: &[String], source: LookupSource) -> Result<Reweight> {
    let mut compiled = Vec::with_capacity(dims.len());
    for d in dims {
        match Evaluable::formula(library, d) {
            Ok(e) => compiled.push(e),
            Err(err) => {
                compiled.iter().for_each(|e| e.release(library));
                return Err(err);
            }
        }
    }
    Ok(Reweight::Lookup { dims: compiled, source })
}

/// A reweight bound to one library.
#[derive(Debug, Clone)]
pub enum Reweight {
    /// Constant weight 1.
    Unit,
    /// Weight equals the source value.
    Raw(Evaluable),
    /// Dimension values looked up in a reference object.
    Lookup {
        /// Dimension sources; the first drives the multiplicity.
        dims: Vec<Evaluable>,
        /// Reference object.
        source: LookupSource,
    },
    /// Product of two reweights; multiplicity from the first.
    Factorized(Box<Reweight>, Box<Reweight>),
}

impl Reweight {
    /// Instance count for the current record: the driving dimension's
    /// multiplicity, or 1 when nothing drives it.
    pub fn ndata(&self, ctx: &mut EvalContext<'_>) -> usize {
        match self {
            Reweight::Unit => 1,
            Reweight::Raw(e) => e.ndata(ctx),
            Reweight::Lookup { dims, .. } => dims.first().map_or(1, |d| d.ndata(ctx)),
            Reweight::Factorized(first, _) => first.ndata(ctx),
        }
    }

    /// Weight at `instance`. Call only for `instance < ndata()`.
    pub fn evaluate(&self, ctx: &mut EvalContext<'_>, instance: usize) -> f64 {
        match self {
            Reweight::Unit => 1.0,
            Reweight::Raw(e) => e.eval(ctx, instance),
            Reweight::Lookup { dims, source } => {
                let mut point = [0.0f64; 3];
                for (slot, d) in point.iter_mut().zip(dims) {
                    *slot = d.eval_broadcast(ctx, instance);
                }
                source.eval(&point[..dims.len()])
            }
            Reweight::Factorized(a, b) => {
                let other = if b.is_single_valued(ctx.library) { 0 } else { instance };
                a.evaluate(ctx, instance) * b.evaluate(ctx, other)
            }
        }
    }

    /// True when every record yields exactly one weight.
    pub fn is_single_valued(&self, library: &ExprLibrary) -> bool {
        match self {
            Reweight::Unit => true,
            Reweight::Raw(e) => e.is_single_valued(library),
            Reweight::Lookup { dims, .. } => dims.iter().all(|d| d.is_single_valued(library)),
            Reweight::Factorized(a, _) => a.is_single_valued(library),
        }
    }

    /// Strategy tag for logging and reports.
    pub fn tag(&self) -> &'static str {
        match self {
            Reweight::Unit => "unit",
            Reweight::Raw(_) => "raw",
            Reweight::Lookup { source, .. } => source.tag(),
            Reweight::Factorized(..) => "factorized",
        }
    }

    /// Copy this reweight into another library (worker clone).
    pub fn rebind_to(&self, library: &mut ExprLibrary) -> Result<Reweight> {
        Ok(match self {
            Reweight::Unit => Reweight::Unit,
            Reweight::Raw(e) => Reweight::Raw(e.rebind_to(library)?),
            Reweight::Lookup { dims, source } => Reweight::Lookup {
                dims: dims.iter().map(|d| d.rebind_to(library)).collect::<Result<_>>()?,
                source: source.clone(),
            },
            Reweight::Factorized(a, b) => {
                Reweight::Factorized(Box::new(a.rebind_to(library)?), Box::new(b.rebind_to(library)?))
            }
        })
    }

    /// Give back every library reference this reweight holds.
    pub fn release(&self, library: &mut ExprLibrary) {
        match self {
            Reweight::Unit => {}
            Reweight::Raw(e) => e.release(library),
            Reweight::Lookup { dims, .. } => dims.iter().for_each(|d| d.release(library)),
            Reweight::Factorized(a, b) => {
                a.release(library);
                b.release(library);
            }
        }
    }
}
