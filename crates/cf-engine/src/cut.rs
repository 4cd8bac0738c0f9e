//! Named per-instance filters owning their sinks.

use cf_core::{Error, Result};

use crate::evaluable::Evaluable;
use crate::library::{EvalContext, ExprLibrary};
use crate::sink::{InstanceMask, Sink};

/// How selected instances are assigned to categories.
#[derive(Debug, Clone, Default)]
pub enum Categorization {
    /// Every selected instance is category 0.
    #[default]
    None,
    /// A single expression evaluated to an integer category.
    Expression(Evaluable),
    /// The index of the first predicate that is nonzero at the instance.
    Predicates(Vec<Evaluable>),
}

impl Categorization {
    fn evaluables(&self) -> &[Evaluable] {
        match self {
            Categorization::None => &[],
            Categorization::Expression(e) => std::slice::from_ref(e),
            Categorization::Predicates(ps) => ps,
        }
    }

    fn category(&self, ctx: &mut EvalContext<'_>, instance: usize) -> i32 {
        match self {
            Categorization::None => 0,
            Categorization::Expression(e) => e.eval_broadcast(ctx, instance) as i32,
            Categorization::Predicates(ps) => ps
                .iter()
                .position(|p| p.eval_broadcast(ctx, instance) != 0.0)
                .map_or(-1, |c| c as i32),
        }
    }

    fn rebind_to(&self, library: &mut ExprLibrary) -> Result<Self> {
        Ok(match self {
            Categorization::None => Categorization::None,
            Categorization::Expression(e) => Categorization::Expression(e.rebind_to(library)?),
            Categorization::Predicates(ps) => Categorization::Predicates(
                ps.iter().map(|p| p.rebind_to(library)).collect::<Result<_>>()?,
            ),
        })
    }
}

/// A named filter. The unnamed cut is the global filter every record must
/// pass before anything else happens.
pub struct Cut {
    name: String,
    predicate: Option<Evaluable>,
    categorization: Categorization,
    sinks: Vec<Box<dyn Sink>>,
    counter: u64,
    mask: InstanceMask,
}

impl std::fmt::Debug for Cut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cut")
            .field("name", &self.name)
            .field("predicate", &self.predicate)
            .field("categorization", &self.categorization)
            .field("sinks", &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("counter", &self.counter)
            .finish()
    }
}

impl Cut {
    /// New cut; `None` passes every record with one implicit instance.
    pub fn new(name: impl Into<String>, predicate: Option<Evaluable>) -> Self {
        Self {
            name: name.into(),
            predicate,
            categorization: Categorization::None,
            sinks: Vec::new(),
            counter: 0,
            mask: InstanceMask::default(),
        }
    }

    /// Set how selected instances are categorized.
    pub fn with_categorization(mut self, categorization: Categorization) -> Self {
        self.categorization = categorization;
        self
    }

    /// Cut name (empty for the global filter).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Predicate, if one is configured.
    pub fn predicate(&self) -> Option<&Evaluable> {
        self.predicate.as_ref()
    }

    /// Records that passed and were dispatched to the sinks.
    pub fn count(&self) -> u64 {
        self.counter
    }

    /// Zero this cut's and its sinks' counters.
    pub fn reset_count(&mut self) {
        self.counter = 0;
        self.sinks.iter_mut().for_each(|s| s.reset_count());
    }

    /// Selection of the last evaluated record.
    pub fn mask(&self) -> &InstanceMask {
        &self.mask
    }

    /// Owned sinks, in registration order.
    pub fn sinks(&self) -> &[Box<dyn Sink>] {
        &self.sinks
    }

    /// Sink by name.
    pub fn sink(&self, name: &str) -> Option<&dyn Sink> {
        self.sinks.iter().find(|s| s.name() == name).map(|s| s.as_ref())
    }

    /// Attach a sink. Names are unique within a cut.
    pub fn add_sink(&mut self, sink: Box<dyn Sink>) -> Result<()> {
        if self.sinks.iter().any(|s| s.name() == sink.name()) {
            return Err(Error::DuplicateName(format!("{}/{}", self.name, sink.name())));
        }
        self.sinks.push(sink);
        Ok(())
    }

    /// Replace the predicate, handing the old one back to `library`.
    pub fn set_predicate(&mut self, library: &mut ExprLibrary, predicate: Option<Evaluable>) {
        if let Some(old) = self.predicate.take() {
            old.release(library);
        }
        self.predicate = predicate;
    }

    /// Decide the current record. Returns true if at least one instance is
    /// selected; the selection is kept for [`Cut::fill_exprs`].
    pub fn evaluate(&mut self, ctx: &mut EvalContext<'_>) -> bool {
        let Some(predicate) = &self.predicate else {
            let category = self.categorization.category(ctx, 0);
            if category < 0 {
                return false;
            }
            self.mask = InstanceMask::Record(category as usize);
            return true;
        };
        let n = predicate.ndata(ctx);
        for e in self.categorization.evaluables() {
            e.preload(ctx);
        }
        if predicate.is_single_valued(ctx.library) {
            if n == 0 || predicate.eval(ctx, 0) == 0.0 {
                return false;
            }
            let category = self.categorization.category(ctx, 0);
            if category < 0 {
                return false;
            }
            self.mask = InstanceMask::Record(category as usize);
            return true;
        }
        let mut categories = vec![-1i32; n];
        for (i, slot) in categories.iter_mut().enumerate() {
            if predicate.eval(ctx, i) != 0.0 {
                *slot = self.categorization.category(ctx, i);
            }
        }
        self.mask = InstanceMask::Instances(categories);
        self.mask.any()
    }

    /// Count the pass and dispatch every sink with the record's weights.
    pub fn fill_exprs(&mut self, ctx: &mut EvalContext<'_>, weights: &[f64]) {
        self.counter += 1;
        for sink in &mut self.sinks {
            sink.fill(ctx, weights, &self.mask);
        }
    }

    /// Empty copy with every expression registered in `library`.
    pub fn thread_clone(&self, library: &mut ExprLibrary) -> Result<Cut> {
        let predicate = self.predicate.as_ref().map(|p| p.rebind_to(library)).transpose()?;
        let sinks = self.sinks.iter().map(|s| s.thread_clone(library)).collect::<Result<_>>()?;
        Ok(Cut {
            name: self.name.clone(),
            predicate,
            categorization: self.categorization.rebind_to(library)?,
            sinks,
            counter: 0,
            mask: InstanceMask::default(),
        })
    }

    /// Fold a worker's clone back: counters add, sinks merge pairwise.
    pub fn thread_merge(&mut self, other: &Cut) -> Result<()> {
        for (sink, theirs) in self.sinks.iter_mut().zip(&other.sinks) {
            sink.thread_merge(theirs.as_ref())?;
        }
        self.counter += other.counter;
        Ok(())
    }

    /// Give back every library reference held by the cut and its sinks.
    pub fn release(&self, library: &mut ExprLibrary) {
        if let Some(p) = &self.predicate {
            p.release(library);
        }
        self.categorization.evaluables().iter().for_each(|e| e.release(library));
        self.sinks.iter().for_each(|s| s.release(library));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::axis::Axis;
    use crate::library::testing::Record;
    use crate::sink::Histogram1D;
    use cf_core::ColumnKind;

    fn record() -> Record {
        Record {
            columns: vec![
                ("pt", ColumnKind::Jagged, vec![5.0, 25.0, 40.0, 15.0, 30.0]),
                ("eta", ColumnKind::Jagged, vec![0.1, 2.0, 0.5]),
                ("met", ColumnKind::Scalar, vec![50.0]),
            ],
        }
    }

    fn cut(lib: &mut ExprLibrary, expr: &str) -> Cut {
        Cut::new("c", Some(Evaluable::formula(lib, expr).unwrap()))
    }

    #[test]
    fn no_predicate_passes_one_instance() {
        let rec = record();
        let mut lib = ExprLibrary::new(Arc::new(rec.schema()));
        let mut c = Cut::new("", None);
        let mut ctx = EvalContext::new(&mut lib, &rec);
        assert!(c.evaluate(&mut ctx));
        assert_eq!(c.mask(), &InstanceMask::Record(0));
    }

    #[test]
    fn single_valued_predicate_selects_record() {
        let rec = record();
        let mut lib = ExprLibrary::new(Arc::new(rec.schema()));
        let mut pass = cut(&mut lib, "met > 40");
        let mut fail = cut(&mut lib, "met > 60");
        lib.rebind_all(&rec).unwrap();
        let mut ctx = EvalContext::new(&mut lib, &rec);
        assert!(pass.evaluate(&mut ctx));
        assert_eq!(pass.mask(), &InstanceMask::Record(0));
        assert!(!fail.evaluate(&mut ctx));
    }

    #[test]
    fn per_instance_selection() {
        let rec = record();
        let mut lib = ExprLibrary::new(Arc::new(rec.schema()));
        let mut c = cut(&mut lib, "pt > 20");
        lib.rebind_all(&rec).unwrap();
        let mut ctx = EvalContext::new(&mut lib, &rec);
        assert!(c.evaluate(&mut ctx));
        assert_eq!(c.mask(), &InstanceMask::Instances(vec![-1, 0, 0, -1, 0]));
    }

    #[test]
    fn zero_multiplicity_is_no_pass() {
        let rec = Record { columns: vec![("pt", ColumnKind::Jagged, vec![])] };
        let mut lib = ExprLibrary::new(Arc::new(rec.schema()));
        let mut c = cut(&mut lib, "pt > 20");
        lib.rebind_all(&rec).unwrap();
        let mut ctx = EvalContext::new(&mut lib, &rec);
        assert!(!c.evaluate(&mut ctx));
    }

    #[test]
    fn category_expression_wins_over_predicates() {
        let rec = record();
        let mut lib = ExprLibrary::new(Arc::new(rec.schema()));
        let mut c = cut(&mut lib, "pt > 20").with_categorization(Categorization::Expression(
            Evaluable::formula(&mut lib, "pt > 35").unwrap(),
        ));
        lib.rebind_all(&rec).unwrap();
        let mut ctx = EvalContext::new(&mut lib, &rec);
        assert!(c.evaluate(&mut ctx));
        assert_eq!(c.mask(), &InstanceMask::Instances(vec![-1, 0, 1, -1, 0]));
    }

    #[test]
    fn category_predicates_first_match() {
        let rec = record();
        let mut lib = ExprLibrary::new(Arc::new(rec.schema()));
        let preds = vec![
            Evaluable::formula(&mut lib, "eta < 0.3").unwrap(),
            Evaluable::formula(&mut lib, "eta < 1").unwrap(),
        ];
        let mut c = cut(&mut lib, "eta < 5").with_categorization(Categorization::Predicates(preds));
        lib.rebind_all(&rec).unwrap();
        let mut ctx = EvalContext::new(&mut lib, &rec);
        assert!(c.evaluate(&mut ctx));
        assert_eq!(c.mask(), &InstanceMask::Instances(vec![0, -1, 1]));
    }

    #[test]
    fn categorization_is_preloaded() {
        let rec = record();
        let mut lib = ExprLibrary::new(Arc::new(rec.schema()));
        let cat = Evaluable::formula(&mut lib, "eta > 1").unwrap();
        let Evaluable::Formula { id, .. } = cat.clone() else { unreachable!() };
        let mut c = cut(&mut lib, "pt > 100").with_categorization(Categorization::Expression(cat));
        lib.rebind_all(&rec).unwrap();
        let mut ctx = EvalContext::new(&mut lib, &rec);
        assert!(!c.evaluate(&mut ctx));
        assert!(lib.is_cached(id, 0));
    }

    #[test]
    fn fill_counts_once_per_record() {
        let rec = record();
        let mut lib = ExprLibrary::new(Arc::new(rec.schema()));
        let mut c = cut(&mut lib, "pt > 20");
        let h = Histogram1D::new(&mut lib, "h", Axis::new(vec![0.0, 100.0]).unwrap(), "pt", None).unwrap();
        c.add_sink(Box::new(h)).unwrap();
        lib.rebind_all(&rec).unwrap();
        let mut ctx = EvalContext::new(&mut lib, &rec);
        assert!(c.evaluate(&mut ctx));
        c.fill_exprs(&mut ctx, &[1.0]);
        assert_eq!(c.count(), 1);
        assert_eq!(c.sink("h").unwrap().count(), 3);
    }

    #[test]
    fn duplicate_sink_rejected() {
        let rec = record();
        let mut lib = ExprLibrary::new(Arc::new(rec.schema()));
        let mut c = Cut::new("c", None);
        let axis = Axis::new(vec![0.0, 1.0]).unwrap();
        c.add_sink(Box::new(Histogram1D::new(&mut lib, "h", axis.clone(), "met", None).unwrap())).unwrap();
        let err = c
            .add_sink(Box::new(Histogram1D::new(&mut lib, "h", axis, "met", None).unwrap()))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName(_)));
        assert_eq!(c.sinks().len(), 1);
    }

    #[test]
    fn categorization_preloaded_without_instances() {
        let rec = Record {
            columns: vec![("pt", ColumnKind::Jagged, vec![]), ("eta", ColumnKind::Jagged, vec![0.1, 2.0])],
        };
        let mut lib = ExprLibrary::new(Arc::new(rec.schema()));
        let cat = Evaluable::formula(&mut lib, "eta > 1").unwrap();
        let Evaluable::Formula { id, .. } = cat.clone() else { unreachable!() };
        let mut c = cut(&mut lib, "pt > 20").with_categorization(Categorization::Expression(cat));
        lib.rebind_all(&rec).unwrap();
        let mut ctx = EvalContext::new(&mut lib, &rec);
        assert!(!c.evaluate(&mut ctx));
        assert!(lib.is_cached(id, 0));
        assert!(!lib.is_cached(id, 1));
    }

    #[test]
    fn single_valued_category_applies_to_every_instance() {
        let rec = record();
        let mut lib = ExprLibrary::new(Arc::new(rec.schema()));
        let mut c = cut(&mut lib, "pt > 20").with_categorization(Categorization::Expression(
            Evaluable::formula(&mut lib, "met > 40").unwrap(),
        ));
        lib.rebind_all(&rec).unwrap();
        let mut ctx = EvalContext::new(&mut lib, &rec);
        assert!(c.evaluate(&mut ctx));
        assert_eq!(c.mask(), &InstanceMask::Instances(vec![-1, 1, 1, -1, 1]));
    }

    #[test]
    fn shorter_fill_expression_bounds_the_instances() {
        let rec = record();
        let mut lib = ExprLibrary::new(Arc::new(rec.schema()));
        let mut c = cut(&mut lib, "pt > 0");
        let axis = Axis::new(vec![0.0, 1.0, 3.0]).unwrap();
        c.add_sink(Box::new(Histogram1D::new(&mut lib, "h", axis, "eta", None).unwrap())).unwrap();
        let eta = lib.get_expression("eta").unwrap();
        lib.release(eta);
        lib.rebind_all(&rec).unwrap();
        let mut ctx = EvalContext::new(&mut lib, &rec);
        assert!(c.evaluate(&mut ctx));
        assert_eq!(c.mask(), &InstanceMask::Instances(vec![0; 5]));
        c.fill_exprs(&mut ctx, &[1.0]);

        assert_eq!(c.sink("h").unwrap().count(), 3);
        assert_eq!(lib.multiplicity(eta, &rec), 3);
        assert!((0..3).all(|i| lib.is_cached(eta, i)));
        assert!(!lib.is_cached(eta, 3));
        assert!(!lib.is_cached(eta, 4));
    }
}
