//! Run orchestration.
//!
//! The [`Engine`] owns the cuts (the unnamed global filter first, then named
//! cuts in insertion order), the weight and reweight settings and the prescale
//! policy. [`Engine::execute`] walks the source once per worker range:
//!
//! 1. On a partition crossing, rebind every live expression and the weight /
//!    prescale-key columns, and resolve the partition's weight and reweight
//!    overrides.
//! 2. Apply the prescale, then invalidate the expression cache.
//! 3. Evaluate the global filter; records failing it cost nothing further.
//! 4. Build the weight vector (input weight × partition weight × reweight).
//! 5. Fill the global filter's sinks, then evaluate every named cut
//!    independently and fill those that pass.
//!
//! The first K-1 ranges run on scoped threads and the last range on the
//! calling thread, each against a private clone of the pipeline. Clones are
//! built and merged back under the engine's lock, and only once every range
//! finished cleanly: an aborted run leaves the engine's sinks as they were.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;

use log::{debug, info, trace, warn};
use serde::Serialize;

use cf_core::{ColumnIndex, Error, PartitionId, RecordCursor, RecordSource, RecordView, Result};

use crate::cut::{Categorization, Cut};
use crate::evaluable::{CountFn, Evaluable};
use crate::library::{EvalContext, ExprLibrary};
use crate::partition::plan_ranges;
use crate::reweight::{Reweight, ReweightSpec};
use crate::sink::Sink;

/// How a named cut assigns categories to selected instances.
///
/// When both are given the expression wins and the predicates are ignored.
#[derive(Debug, Clone, Default)]
pub struct CategorySpec {
    /// Expression evaluated to an integer category.
    pub expression: Option<String>,
    /// Per-category predicates; the first nonzero one names the category.
    pub predicates: Vec<String>,
}

#[derive(Debug, Clone)]
struct Override<T> {
    value: T,
    exclusive: bool,
}

/// Weight and prescale settings. Read-only while a run is in progress.
#[derive(Debug, Clone)]
struct WeightSettings {
    weight_column: Option<String>,
    global_weight: f64,
    partition_weights: BTreeMap<PartitionId, Override<f64>>,
    prescale: u64,
    prescale_key: Option<String>,
}

impl Default for WeightSettings {
    fn default() -> Self {
        Self {
            weight_column: None,
            global_weight: 1.0,
            partition_weights: BTreeMap::new(),
            prescale: 1,
            prescale_key: None,
        }
    }
}

/// Everything one worker mutates: its library and the objects holding ids
/// into it.
struct Pipeline {
    library: ExprLibrary,
    cuts: Vec<Cut>,
    global_reweight: Option<Reweight>,
    partition_reweights: BTreeMap<PartitionId, Override<Reweight>>,
}

impl Pipeline {
    fn thread_clone(&self) -> Result<Pipeline> {
        let mut library = ExprLibrary::new(self.library.schema().clone());
        let cuts = self.cuts.iter().map(|c| c.thread_clone(&mut library)).collect::<Result<_>>()?;
        let global_reweight =
            self.global_reweight.as_ref().map(|r| r.rebind_to(&mut library)).transpose()?;
        let mut partition_reweights = BTreeMap::new();
        for (&p, o) in &self.partition_reweights {
            let value = o.value.rebind_to(&mut library)?;
            partition_reweights.insert(p, Override { value, exclusive: o.exclusive });
        }
        Ok(Pipeline { library, cuts, global_reweight, partition_reweights })
    }

    fn merge_from(&mut self, other: &Pipeline) -> Result<()> {
        for (cut, theirs) in self.cuts.iter_mut().zip(&other.cuts) {
            cut.thread_merge(theirs)?;
        }
        Ok(())
    }

    fn reset_counts(&mut self) {
        self.cuts.iter_mut().for_each(Cut::reset_count);
    }
}

/// Which reweight applies in the current partition.
#[derive(Debug, Clone, Copy, Default)]
enum ActiveReweight {
    #[default]
    Off,
    Global,
    Partition {
        id: PartitionId,
        with_global: bool,
    },
}

/// Per-partition state resolved at every crossing.
#[derive(Debug, Clone, Copy)]
struct PartitionBinding {
    weight_col: Option<ColumnIndex>,
    key_col: Option<ColumnIndex>,
    partition_weight: f64,
    reweight: ActiveReweight,
}

/// Post-run counters for one cut.
#[derive(Debug, Clone, Serialize)]
pub struct CutReport {
    /// Cut name (empty for the global filter).
    pub name: String,
    /// Records that passed.
    pub passed: u64,
    /// Sink snapshots.
    pub sinks: Vec<serde_json::Value>,
}

/// Summary of the last run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Records read from the source.
    pub records: u64,
    /// Every cut, global filter first.
    pub cuts: Vec<CutReport>,
}

/// The aggregation engine.
pub struct Engine {
    source: Arc<dyn RecordSource>,
    pipeline: Pipeline,
    settings: WeightSettings,
    lock: Mutex<()>,
    total_records: u64,
}

impl Engine {
    /// Engine over `source` with a pass-everything global filter.
    pub fn new(source: Arc<dyn RecordSource>) -> Self {
        let library = ExprLibrary::new(Arc::new(source.schema().clone()));
        Self {
            source,
            pipeline: Pipeline {
                library,
                cuts: vec![Cut::new("", None)],
                global_reweight: None,
                partition_reweights: BTreeMap::new(),
            },
            settings: WeightSettings::default(),
            lock: Mutex::new(()),
            total_records: 0,
        }
    }

    /// Record source.
    pub fn source(&self) -> &Arc<dyn RecordSource> {
        &self.source
    }

    /// Expression library of the calling thread.
    pub fn library(&self) -> &ExprLibrary {
        &self.pipeline.library
    }

    // ── Cuts ────────────────────────────────────────────────────

    /// Set the global filter expression. An empty string passes everything.
    pub fn set_filter(&mut self, expr: &str) -> Result<()> {
        let predicate = if expr.trim().is_empty() {
            None
        } else {
            Some(Evaluable::formula(&mut self.pipeline.library, expr)?)
        };
        let Pipeline { library, cuts, .. } = &mut self.pipeline;
        cuts[0].set_predicate(library, predicate);
        Ok(())
    }

    /// Add a named cut selecting instances where `expr` is nonzero.
    pub fn add_cut(&mut self, name: &str, expr: &str) -> Result<()> {
        self.add_categorized_cut(name, expr, CategorySpec::default())
    }

    /// Add a named cut with categorized instances.
    pub fn add_categorized_cut(&mut self, name: &str, expr: &str, categories: CategorySpec) -> Result<()> {
        self.check_new_cut_name(name)?;
        let library = &mut self.pipeline.library;
        let predicate = Evaluable::formula(library, expr)?;
        let categorization = match compile_categories(library, name, &categories) {
            Ok(c) => c,
            Err(e) => {
                predicate.release(library);
                return Err(e);
            }
        };
        let cut = Cut::new(name, Some(predicate)).with_categorization(categorization);
        debug!("added cut '{name}': {expr}");
        self.pipeline.cuts.push(cut);
        Ok(())
    }

    /// Add a named cut backed by a direct computation instead of a formula.
    pub fn add_cut_fn(
        &mut self,
        name: &str,
        predicate: impl Fn(&dyn RecordView, usize) -> f64 + Send + Sync + 'static,
        count: Option<CountFn>,
    ) -> Result<()> {
        self.check_new_cut_name(name)?;
        self.pipeline.cuts.push(Cut::new(name, Some(Evaluable::function(predicate, count))));
        Ok(())
    }

    /// Remove a named cut and its sinks.
    pub fn remove_cut(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Config("the global filter cannot be removed".into()));
        }
        let Pipeline { library, cuts, .. } = &mut self.pipeline;
        let pos = cuts
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let cut = cuts.remove(pos);
        cut.release(library);
        debug!("removed cut '{name}'");
        Ok(())
    }

    fn check_new_cut_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Config("named cuts need a non-empty name; use set_filter for the global filter".into()));
        }
        if self.pipeline.cuts.iter().any(|c| c.name() == name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Cut by name (`""` is the global filter).
    pub fn cut(&self, name: &str) -> Result<&Cut> {
        self.pipeline
            .cuts
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// All cuts, global filter first.
    pub fn cuts(&self) -> &[Cut] {
        &self.pipeline.cuts
    }

    // ── Sinks ───────────────────────────────────────────────────

    /// Register a sink under `cut`. `build` receives the library the sink's
    /// expressions must be registered in.
    pub fn add_sink<F>(&mut self, cut: &str, build: F) -> Result<()>
    where
        F: FnOnce(&mut ExprLibrary) -> Result<Box<dyn Sink>>,
    {
        let Pipeline { library, cuts, .. } = &mut self.pipeline;
        let target = cuts
            .iter_mut()
            .find(|c| c.name() == cut)
            .ok_or_else(|| Error::NotFound(cut.to_string()))?;
        let sink = build(library)?;
        if target.sink(sink.name()).is_some() {
            sink.release(library);
            return Err(Error::DuplicateName(format!("{cut}/{}", sink.name())));
        }
        debug!("added {} '{}' under cut '{cut}'", sink.kind(), sink.name());
        target.add_sink(sink)
    }

    /// Typed access to a sink.
    pub fn sink<T: Sink + 'static>(&self, cut: &str, name: &str) -> Result<&T> {
        let sink = self
            .cut(cut)?
            .sink(name)
            .ok_or_else(|| Error::NotFound(format!("{cut}/{name}")))?;
        sink.as_any().downcast_ref::<T>().ok_or_else(|| {
            Error::NotFound(format!("{cut}/{name} as {}", std::any::type_name::<T>()))
        })
    }

    // ── Weights ─────────────────────────────────────────────────

    /// Read a per-record input weight from `column` (or stop doing so).
    pub fn set_weight_column(&mut self, column: Option<&str>) {
        self.settings.weight_column = column.map(str::to_string);
    }

    /// Set the global constant weight, or a partition's override.
    ///
    /// An exclusive partition weight replaces the global one; otherwise the
    /// two multiply.
    pub fn set_constant_weight(&mut self, weight: f64, partition: Option<PartitionId>, exclusive: bool) -> Result<()> {
        match partition {
            None => self.settings.global_weight = weight,
            Some(p) => {
                self.check_partition(p)?;
                self.settings.partition_weights.insert(p, Override { value: weight, exclusive });
            }
        }
        Ok(())
    }

    /// Set (or clear, with `None`) the global reweight or a partition's
    /// override.
    pub fn set_reweight(
        &mut self,
        spec: Option<&ReweightSpec>,
        partition: Option<PartitionId>,
        exclusive: bool,
    ) -> Result<()> {
        if let Some(p) = partition {
            self.check_partition(p)?;
        }
        let Pipeline { library, global_reweight, partition_reweights, .. } = &mut self.pipeline;
        let compiled = spec.map(|s| s.compile(library)).transpose()?;
        let old = match partition {
            None => std::mem::replace(global_reweight, compiled),
            Some(p) => match compiled {
                Some(value) => partition_reweights.insert(p, Override { value, exclusive }).map(|o| o.value),
                None => partition_reweights.remove(&p).map(|o| o.value),
            },
        };
        if let Some(old) = old {
            old.release(library);
        }
        Ok(())
    }

    /// Process only records whose key (the `key` column, or the global entry
    /// number) is divisible by `factor`. A factor of 1 disables prescaling.
    pub fn set_prescale(&mut self, factor: u64, key: Option<&str>) -> Result<()> {
        if factor == 0 {
            return Err(Error::Config("prescale factor must be positive".into()));
        }
        self.settings.prescale = factor;
        self.settings.prescale_key = key.map(str::to_string);
        Ok(())
    }

    fn check_partition(&self, p: PartitionId) -> Result<()> {
        let n = self.source.partition_count();
        if p >= n {
            return Err(Error::Config(format!("partition {p} does not exist ({n} partitions)")));
        }
        Ok(())
    }

    // ── Execution ───────────────────────────────────────────────

    /// Run over `n_entries` records (all when `None`) starting at `first_entry`,
    /// split across `workers` threads. Returns the number of records read.
    ///
    /// Counters are reset first. A data error in any worker aborts the run
    /// before anything is merged.
    pub fn execute(&mut self, n_entries: Option<u64>, first_entry: u64, workers: usize) -> Result<u64> {
        let total = self.source.entry_count();
        let start = first_entry.min(total);
        let end = n_entries.map_or(total, |n| start.saturating_add(n).min(total));
        let whole = n_entries.is_none() && first_entry == 0;
        let ranges = plan_ranges(&self.source.partition_offsets(), start..end, workers, whole);

        self.pipeline.reset_counts();
        self.total_records = 0;
        info!(
            "processing entries {start}..{end} on {} worker(s), {} cut(s)",
            ranges.len().max(1),
            self.pipeline.cuts.len()
        );

        let source: &dyn RecordSource = self.source.as_ref();
        let read = run_ranges(source, &mut self.pipeline, &self.settings, &self.lock, &ranges)?;

        self.total_records = read;
        info!("read {read} records; global filter passed {}", self.pipeline.cuts[0].count());
        for cut in &self.pipeline.cuts[1..] {
            info!("cut '{}': {} passed", cut.name(), cut.count());
        }
        Ok(read)
    }

    /// Records read by the last run.
    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    /// Counters and sink snapshots of the last run.
    pub fn report(&self) -> RunReport {
        RunReport {
            records: self.total_records,
            cuts: self
                .pipeline
                .cuts
                .iter()
                .map(|c| CutReport {
                    name: c.name().to_string(),
                    passed: c.count(),
                    sinks: c.sinks().iter().map(|s| s.snapshot()).collect(),
                })
                .collect(),
        }
    }
}

fn compile_categories(library: &mut ExprLibrary, cut: &str, spec: &CategorySpec) -> Result<Categorization> {
    if let Some(expr) = &spec.expression {
        if !spec.predicates.is_empty() {
            warn!("cut '{cut}': category expression given, ignoring {} category predicates", spec.predicates.len());
        }
        return Ok(Categorization::Expression(Evaluable::formula(library, expr)?));
    }
    if spec.predicates.is_empty() {
        return Ok(Categorization::None);
    }
    let mut preds = Vec::with_capacity(spec.predicates.len());
    for p in &spec.predicates {
        match Evaluable::formula(library, p) {
            Ok(e) => preds.push(e),
            Err(e) => {
                preds.iter().for_each(|p| p.release(library));
                return Err(e);
            }
        }
    }
    Ok(Categorization::Predicates(preds))
}

fn run_ranges(
    source: &dyn RecordSource,
    pipeline: &mut Pipeline,
    settings: &WeightSettings,
    lock: &Mutex<()>,
    ranges: &[Range<u64>],
) -> Result<u64> {
    let Some((own, others)) = ranges.split_last() else {
        return Ok(0);
    };
    let (mut local, clones) = {
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let local = pipeline.thread_clone()?;
        let clones = others.iter().map(|_| pipeline.thread_clone()).collect::<Result<Vec<_>>>()?;
        (local, clones)
    };

    let finished = thread::scope(|scope| -> Result<Vec<_>> {
        let (tx, rx) = mpsc::channel();
        for (i, (range, mut worker)) in others.iter().cloned().zip(clones).enumerate() {
            let tx = tx.clone();
            thread::Builder::new().name(format!("cutflow-worker-{i}")).spawn_scoped(scope, move || {
                debug!("worker {i}: entries {}..{}", range.start, range.end);
                let mut cursor = source.cursor(range.clone());
                let result = run_range(&mut worker, settings, cursor.as_mut(), range);
                drop(cursor);
                if let Err(e) = tx.send((i, result.map(|n| (worker, n)))) {
                    warn!("worker {i}: result not collected: {e}");
                }
            })?;
        }
        drop(tx);

        let own_result = {
            let mut cursor = source.cursor(own.clone());
            run_range(&mut local, settings, cursor.as_mut(), own.clone())
        };
        let mut finished: Vec<_> = rx.iter().collect();
        finished.push((others.len(), own_result.map(|n| (local, n))));
        Ok(finished)
    })?;

    let mut done = Vec::with_capacity(finished.len());
    for (i, result) in finished {
        done.push((i, result?));
    }
    let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
    let mut read = 0;
    for (i, (worker, n)) in done {
        pipeline.merge_from(&worker)?;
        read += n;
        debug!("range {i}: merged {n} records");
    }
    Ok(read)
}

/// The sequential per-record loop over one range.
fn run_range(
    pipeline: &mut Pipeline,
    settings: &WeightSettings,
    cursor: &mut (dyn RecordCursor + '_),
    range: Range<u64>,
) -> Result<u64> {
    let Pipeline { library, cuts, global_reweight, partition_reweights } = pipeline;
    let Some((filter, named)) = cuts.split_first_mut() else {
        return Ok(0);
    };
    let mut bound: Option<Option<PartitionId>> = None;
    let mut binding = PartitionBinding {
        weight_col: None,
        key_col: None,
        partition_weight: settings.global_weight,
        reweight: ActiveReweight::Off,
    };
    let mut weights = Vec::new();
    let mut read = 0u64;

    for entry in range {
        if cursor.load(entry).is_none() {
            break;
        }
        read += 1;

        let partition = cursor.current_partition();
        if bound != Some(partition) {
            debug!("entering {}", cursor.partition_label());
            library.rebind_all(&*cursor)?;
            binding = bind_partition(settings, global_reweight.is_some(), partition_reweights, &*cursor)?;
            bound = Some(partition);
        }
        let view: &dyn RecordView = &*cursor;

        if settings.prescale > 1 {
            let key = match binding.key_col {
                Some(c) => prescale_key(view.value(c, 0), entry, &*cursor)?,
                None => entry,
            };
            if key % settings.prescale != 0 {
                continue;
            }
        }

        library.invalidate_all();
        let mut ctx = EvalContext::new(library, view);
        if !filter.evaluate(&mut ctx) {
            continue;
        }

        let common = binding.weight_col.map_or(1.0, |c| view.value(c, 0)) * binding.partition_weight;
        weights.clear();
        match binding.reweight {
            ActiveReweight::Off => weights.push(common),
            ActiveReweight::Global => {
                if let Some(rw) = global_reweight.as_ref() {
                    reweight_vector(&mut weights, &mut ctx, rw, None, common)?;
                }
            }
            ActiveReweight::Partition { id, with_global } => {
                if let Some(o) = partition_reweights.get(&id) {
                    let global = global_reweight.as_ref().filter(|_| with_global);
                    reweight_vector(&mut weights, &mut ctx, &o.value, global, common)?;
                }
            }
        }
        if weights.is_empty() {
            continue;
        }
        trace!("entry {entry}: weights {weights:?}");

        filter.fill_exprs(&mut ctx, &weights);
        for cut in named.iter_mut() {
            if cut.evaluate(&mut ctx) {
                cut.fill_exprs(&mut ctx, &weights);
            }
        }
    }
    Ok(read)
}

/// Key column values are truncated to `u64`. NaN, infinite and negative keys
/// are data errors.
fn prescale_key(value: f64, entry: u64, cursor: &dyn RecordCursor) -> Result<u64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value as u64)
    } else {
        Err(Error::Data(format!(
            "prescale key {value} at entry {entry} in {} is not a non-negative number",
            cursor.partition_label()
        )))
    }
}

fn bind_partition(
    settings: &WeightSettings,
    has_global_reweight: bool,
    partition_reweights: &BTreeMap<PartitionId, Override<Reweight>>,
    cursor: &dyn RecordCursor,
) -> Result<PartitionBinding> {
    let column = |name: &str, role: &str| {
        cursor.column_index(name).ok_or_else(|| {
            Error::Data(format!("{role} column '{name}' is missing in {}", cursor.partition_label()))
        })
    };
    let weight_col = settings.weight_column.as_deref().map(|n| column(n, "weight")).transpose()?;
    let key_col = match settings.prescale_key.as_deref() {
        Some(n) if settings.prescale > 1 => Some(column(n, "prescale key")?),
        _ => None,
    };

    let partition = cursor.current_partition();
    let partition_weight = match partition.and_then(|p| settings.partition_weights.get(&p)) {
        Some(o) if o.exclusive => o.value,
        Some(o) => o.value * settings.global_weight,
        None => settings.global_weight,
    };
    let reweight = match partition.and_then(|p| partition_reweights.get(&p).map(|o| (p, o.exclusive))) {
        Some((id, exclusive)) => ActiveReweight::Partition { id, with_global: !exclusive && has_global_reweight },
        None if has_global_reweight => ActiveReweight::Global,
        None => ActiveReweight::Off,
    };
    Ok(PartitionBinding { weight_col, key_col, partition_weight, reweight })
}

/// Fill `out` with one weight per reweight instance. A global factor must
/// have the same multiplicity unless one side is single-valued.
fn reweight_vector(
    out: &mut Vec<f64>,
    ctx: &mut EvalContext<'_>,
    reweight: &Reweight,
    global: Option<&Reweight>,
    common: f64,
) -> Result<()> {
    let m = reweight.ndata(ctx);
    let Some(global) = global else {
        for i in 0..m {
            out.push(reweight.evaluate(ctx, i) * common);
        }
        return Ok(());
    };
    let g = global.ndata(ctx);
    let own_single = reweight.is_single_valued(ctx.library);
    let global_single = global.is_single_valued(ctx.library);
    let n = if m == g || global_single {
        m
    } else if own_single {
        g
    } else {
        return Err(Error::Config(format!(
            "partition reweight has {m} instances but the global reweight has {g}"
        )));
    };
    for i in 0..n {
        let a = reweight.evaluate(ctx, if own_single { 0 } else { i });
        let b = global.evaluate(ctx, if global_single { 0 } else { i });
        out.push(a * b * common);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_data::{Column, Dataset, Partition};

    fn engine() -> Engine {
        let part = Partition::new("p0")
            .with_column("x", Column::scalar(vec![1.0, 2.0, 3.0]))
            .with_column("pt", Column::jagged(vec![vec![1.0], vec![], vec![2.0, 3.0]]));
        Engine::new(Arc::new(Dataset::new(vec![part]).unwrap()))
    }

    #[test]
    fn duplicate_cut_rejected() {
        let mut e = engine();
        e.add_cut("a", "x > 1").unwrap();
        let err = e.add_cut("a", "x > 2").unwrap_err();
        assert!(matches!(err, Error::DuplicateName(_)));
        assert!(err.is_config());
        assert_eq!(e.cuts().len(), 2);
    }

    #[test]
    fn compile_error_leaves_cut_list_unchanged() {
        let mut e = engine();
        let err = e.add_cut("a", "nope > 1").unwrap_err();
        assert!(matches!(err, Error::Compile { .. }));
        assert_eq!(e.cuts().len(), 1);
        assert_eq!(e.library().live_count(), 0);
    }

    #[test]
    fn remove_cut_rules() {
        let mut e = engine();
        e.add_cut("a", "x > 1").unwrap();
        assert!(matches!(e.remove_cut(""), Err(Error::Config(_))));
        assert!(matches!(e.remove_cut("b"), Err(Error::NotFound(_))));
        e.remove_cut("a").unwrap();
        assert_eq!(e.cuts().len(), 1);
        assert_eq!(e.library().live_count(), 0);
    }

    #[test]
    fn empty_cut_name_rejected() {
        let mut e = engine();
        assert!(matches!(e.add_cut("", "x > 1"), Err(Error::Config(_))));
    }

    #[test]
    fn zero_prescale_rejected() {
        let mut e = engine();
        assert!(matches!(e.set_prescale(0, None), Err(Error::Config(_))));
        e.set_prescale(2, Some("x")).unwrap();
    }

    #[test]
    fn unknown_partition_rejected() {
        let mut e = engine();
        assert!(e.set_constant_weight(2.0, Some(3), true).is_err());
        assert!(e.set_reweight(Some(&ReweightSpec::raw("x")), Some(1), true).is_err());
    }

    #[test]
    fn replacing_reweight_releases_old_expressions() {
        let mut e = engine();
        e.set_reweight(Some(&ReweightSpec::raw("x")), None, false).unwrap();
        e.set_reweight(Some(&ReweightSpec::raw("pt")), None, false).unwrap();
        assert_eq!(e.library().live_count(), 1);
        e.set_reweight(None, None, false).unwrap();
        assert_eq!(e.library().live_count(), 0);
    }

    #[test]
    fn filter_replacement() {
        let mut e = engine();
        e.set_filter("x > 1").unwrap();
        assert!(e.cut("").unwrap().predicate().is_some());
        assert!(e.set_filter("bogus(").is_err());
        assert_eq!(e.cut("").unwrap().predicate().and_then(|p| p.text()), Some("x > 1"));
        e.set_filter("").unwrap();
        assert!(e.cut("").unwrap().predicate().is_none());
        assert_eq!(e.library().live_count(), 0);
    }

    #[test]
    fn sink_added_to_unknown_cut() {
        let mut e = engine();
        let err = e.add_sink("missing", |_| unreachable!()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn execute_empty_range() {
        let mut e = engine();
        assert_eq!(e.execute(Some(0), 0, 4).unwrap(), 0);
        assert_eq!(e.execute(None, 10, 1).unwrap(), 0);
    }
}
