//! Per-worker expression library with per-record value caching.
//!
//! # Design decisions
//!
//! - **Arena**: compiled expressions live in a `Vec` owned by the library and
//!   are addressed by [`ExprId`]. Cuts, sinks and reweights hold ids, never
//!   the expressions themselves, so they stay `Send` and cheap to clone.
//! - **Dedup key**: exact source text. Two spellings of the same formula are
//!   two entries.
//! - **Invalidation**: [`ExprLibrary::invalidate_all`] clears every cache at
//!   record start. Nothing survives from one record to the next.
//! - **Laziness**: multiplicity and per-instance values are computed on first
//!   access within a record and memoized until the next invalidation.
//! - **Bindings**: column positions are partition-local; the engine calls
//!   [`ExprLibrary::rebind_all`] at every partition crossing.
//! - **Slot reuse**: an expression whose last reference is released leaves
//!   the text index, and its slot is handed to the next new expression. The
//!   arena grows only with the peak number of live expressions.
//! - **Scope**: one library per worker. Libraries are never shared between
//!   threads.

use std::collections::HashMap;
use std::sync::Arc;

use cf_core::{ColumnIndex, Error, RecordView, Result, Schema};

use crate::expr::{CompiledExpr, Leaves};

/// Handle to an expression registered in an [`ExprLibrary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(usize);

impl ExprId {
    /// Position of this expression in its library.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Cache counters, cumulative over the library's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Value lookups answered from the cache.
    pub hits: u64,
    /// Value lookups that evaluated the expression.
    pub misses: u64,
    /// Number of `invalidate_all` calls.
    pub invalidations: u64,
}

/// One expression plus its per-record cache.
#[derive(Debug, Clone)]
struct CachedExpr {
    expr: CompiledExpr,
    /// Column positions in the current partition, parallel to `required_columns`.
    bindings: Vec<Option<ColumnIndex>>,
    /// Live references (cuts, sinks, reweights) holding this id.
    refs: usize,
    ndata: Option<usize>,
    values: Vec<Option<f64>>,
}

struct BoundLeaves<'a> {
    bindings: &'a [Option<ColumnIndex>],
    view: &'a dyn RecordView,
}

impl Leaves for BoundLeaves<'_> {
    fn len(&self, var: usize) -> usize {
        match self.bindings[var] {
            Some(col) => self.view.instance_count(col).unwrap_or(1),
            None => 0,
        }
    }

    fn get(&self, var: usize, instance: usize) -> f64 {
        match self.bindings[var] {
            Some(col) => self.view.value(col, instance),
            None => 0.0,
        }
    }
}

/// Registry of compiled expressions, deduplicated by source text.
#[derive(Debug, Clone)]
pub struct ExprLibrary {
    schema: Arc<Schema>,
    slots: Vec<CachedExpr>,
    by_text: HashMap<String, ExprId>,
    /// Slots with no live reference, ready for reuse.
    free: Vec<usize>,
    stats: CacheStats,
}

impl ExprLibrary {
    /// Create an empty library compiling against `schema`.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            slots: Vec::new(),
            by_text: HashMap::new(),
            free: Vec::new(),
            stats: CacheStats::default(),
        }
    }

    /// Schema expressions are validated against.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Return the handle for `text`, compiling it on first request.
    ///
    /// Identical text always yields the identical id. Every successful call
    /// takes a reference that [`ExprLibrary::release`] gives back.
    pub fn get_expression(&mut self, text: &str) -> Result<ExprId> {
        if let Some(&id) = self.by_text.get(text) {
            self.slots[id.0].refs += 1;
            return Ok(id);
        }
        let expr = CompiledExpr::compile(text, &self.schema)?;
        let n_vars = expr.required_columns.len();
        let slot = CachedExpr { expr, bindings: vec![None; n_vars], refs: 1, ndata: None, values: Vec::new() };
        let id = match self.free.pop() {
            Some(index) => {
                self.slots[index] = slot;
                ExprId(index)
            }
            None => {
                self.slots.push(slot);
                ExprId(self.slots.len() - 1)
            }
        };
        self.by_text.insert(text.to_string(), id);
        Ok(id)
    }

    /// Drop one reference to `id`. Unreferenced expressions are skipped by
    /// rebinding, so a removed cut cannot fail a run over a column it used.
    ///
    /// Once the last reference is gone `id` is dead: its slot may be handed
    /// to a different expression by a later [`ExprLibrary::get_expression`].
    pub fn release(&mut self, id: ExprId) {
        let Some(slot) = self.slots.get_mut(id.0) else {
            return;
        };
        if slot.refs == 0 {
            return;
        }
        slot.refs -= 1;
        if slot.refs == 0 {
            self.by_text.remove(slot.expr.text());
            slot.ndata = None;
            slot.values.clear();
            self.free.push(id.0);
        }
    }

    /// Compiled expression behind `id`.
    pub fn expr(&self, id: ExprId) -> &CompiledExpr {
        &self.slots[id.0].expr
    }

    /// Source text of `id`.
    pub fn text(&self, id: ExprId) -> &str {
        self.slots[id.0].expr.text()
    }

    /// Number of arena slots, free ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the arena has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of expressions with at least one live reference.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.refs > 0).count()
    }

    /// Cache counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Clear every expression's cache. Called once per record before any
    /// evaluation.
    pub fn invalidate_all(&mut self) {
        for slot in &mut self.slots {
            slot.ndata = None;
            slot.values.clear();
        }
        self.stats.invalidations += 1;
    }

    /// Resolve every live expression's columns in the partition `view`
    /// currently points at.
    ///
    /// A referenced column missing from the partition is a data error.
    pub fn rebind_all(&mut self, view: &dyn RecordView) -> Result<()> {
        for slot in self.slots.iter_mut().filter(|s| s.refs > 0) {
            for (var, name) in slot.expr.required_columns.iter().enumerate() {
                let col = view.column_index(name).ok_or_else(|| {
                    Error::Data(format!(
                        "column '{}' used by \"{}\" is missing",
                        name,
                        slot.expr.text()
                    ))
                })?;
                slot.bindings[var] = Some(col);
            }
            slot.ndata = None;
            slot.values.clear();
        }
        Ok(())
    }

    /// Instance count of `id` for the current record.
    pub fn multiplicity(&mut self, id: ExprId, view: &dyn RecordView) -> usize {
        let CachedExpr { expr, bindings, ndata, values, .. } = &mut self.slots[id.0];
        if let Some(n) = *ndata {
            return n;
        }
        let n = expr.multiplicity(&BoundLeaves { bindings: bindings.as_slice(), view });
        *ndata = Some(n);
        values.clear();
        values.resize(n, None);
        n
    }

    /// Value of `id` at `instance` for the current record.
    ///
    /// The multiplicity is established first if it has not been queried yet.
    /// Instances at or beyond the multiplicity read as `0.0`.
    pub fn value_at(&mut self, id: ExprId, instance: usize, view: &dyn RecordView) -> f64 {
        let n = self.multiplicity(id, view);
        if instance >= n {
            return 0.0;
        }
        let CachedExpr { expr, bindings, values, .. } = &mut self.slots[id.0];
        if let Some(v) = values[instance] {
            self.stats.hits += 1;
            return v;
        }
        let v = expr.eval_instance(&BoundLeaves { bindings: bindings.as_slice(), view }, instance);
        values[instance] = Some(v);
        self.stats.misses += 1;
        v
    }

    /// Whether `instance` of `id` has been evaluated since the last invalidation.
    pub fn is_cached(&self, id: ExprId, instance: usize) -> bool {
        self.slots[id.0].values.get(instance).is_some_and(|v| v.is_some())
    }
}

/// The current record as seen by one worker: its library plus the cursor.
pub struct EvalContext<'a> {
    /// Worker-private expression library.
    pub library: &'a mut ExprLibrary,
    /// Current record.
    pub view: &'a dyn RecordView,
}

impl<'a> EvalContext<'a> {
    /// Bundle a library and a record view.
    pub fn new(library: &'a mut ExprLibrary, view: &'a dyn RecordView) -> Self {
        Self { library, view }
    }

    /// Instance count of `id`.
    pub fn multiplicity(&mut self, id: ExprId) -> usize {
        self.library.multiplicity(id, self.view)
    }

    /// Value of `id` at `instance`.
    pub fn value_at(&mut self, id: ExprId, instance: usize) -> f64 {
        self.library.value_at(id, instance, self.view)
    }
}
