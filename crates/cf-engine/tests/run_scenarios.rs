use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use cf_core::{Error, RecordView, Result};
use cf_data::{Column, Dataset, Partition};
use cf_engine::{
    Axis, CategorySpec, Engine, EvalContext, ExprLibrary, Histogram1D, InstanceMask, ReweightSpec,
    RowWriter, Sink,
};

/// Counts fill calls and filled instances; no expressions of its own.
struct Counter {
    name: String,
    fills: u64,
    instances: u64,
}

impl Counter {
    fn boxed(name: &str) -> Box<dyn Sink> {
        Box::new(Counter { name: name.to_string(), fills: 0, instances: 0 })
    }
}

impl Sink for Counter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "counter"
    }

    fn fill(&mut self, _ctx: &mut EvalContext<'_>, _weights: &[f64], mask: &InstanceMask) {
        self.fills += 1;
        self.instances += match mask {
            InstanceMask::Record(_) => 1,
            InstanceMask::Instances(c) => c.iter().filter(|&&c| c >= 0).count() as u64,
        };
    }

    fn thread_clone(&self, _library: &mut ExprLibrary) -> Result<Box<dyn Sink>> {
        Ok(Counter::boxed(&self.name))
    }

    fn thread_merge(&mut self, other: &dyn Sink) -> Result<()> {
        let other = other.as_any().downcast_ref::<Counter>().expect("counter");
        self.fills += other.fills;
        self.instances += other.instances;
        Ok(())
    }

    fn reset_count(&mut self) {
        self.fills = 0;
    }

    fn count(&self) -> u64 {
        self.fills
    }

    fn release(&self, _library: &mut ExprLibrary) {}

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({ "fills": self.fills, "instances": self.instances })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn ten_records() -> Arc<Dataset> {
    let part = Partition::new("p0")
        .with_column("idx", Column::scalar((0..10).map(f64::from).collect()))
        .with_column("pt", Column::jagged((0..10).map(|i| vec![f64::from(i) * 10.0]).collect()));
    Arc::new(Dataset::new(vec![part]).unwrap())
}

fn rows_sink(lib: &mut ExprLibrary, name: &str, columns: &[(&str, &str)]) -> Result<Box<dyn Sink>> {
    let mut w = RowWriter::new(lib, name, None)?;
    for (n, e) in columns {
        w.add_column(lib, n, e)?;
    }
    Ok(Box::new(w))
}

#[test]
fn scenario_ten_records_one_named_cut() {
    let mut engine = Engine::new(ten_records());
    engine.set_filter("true").unwrap();
    engine.add_cut("c1", "idx < 5").unwrap();
    engine.add_sink("c1", |_| Ok(Counter::boxed("n"))).unwrap();

    assert_eq!(engine.execute(None, 0, 1).unwrap(), 10);
    assert_eq!(engine.cut("").unwrap().count(), 10);
    assert_eq!(engine.cut("c1").unwrap().count(), 5);
    assert_eq!(engine.sink::<Counter>("c1", "n").unwrap().count(), 5);
    assert_eq!(engine.total_records(), 10);
}

#[test]
fn global_filter_failure_skips_everything() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let spec = ReweightSpec::Custom {
        value: Arc::new(move |_: &dyn RecordView, _: usize| {
            seen.fetch_add(1, Ordering::Relaxed);
            1.0
        }),
        count: None,
    };

    let mut engine = Engine::new(ten_records());
    engine.set_filter("idx > 100").unwrap();
    engine.set_reweight(Some(&spec), None, false).unwrap();
    engine.add_cut("all", "idx >= 0").unwrap();
    engine.add_sink("", |_| Ok(Counter::boxed("global"))).unwrap();
    engine.add_sink("all", |_| Ok(Counter::boxed("n"))).unwrap();

    assert_eq!(engine.execute(None, 0, 1).unwrap(), 10);
    assert_eq!(calls.load(Ordering::Relaxed), 0);
    assert_eq!(engine.cut("").unwrap().count(), 0);
    assert_eq!(engine.cut("all").unwrap().count(), 0);
    assert_eq!(engine.sink::<Counter>("all", "n").unwrap().count(), 0);
    assert_eq!(engine.sink::<Counter>("", "global").unwrap().count(), 0);
}

#[test]
fn cuts_are_independent_not_chained() {
    let mut engine = Engine::new(ten_records());
    engine.add_cut("low", "idx < 3").unwrap();
    engine.add_cut("high", "idx >= 3").unwrap();
    engine.add_cut("even", "idx % 2 == 0").unwrap();
    engine.execute(None, 0, 1).unwrap();
    assert_eq!(engine.cut("low").unwrap().count(), 3);
    assert_eq!(engine.cut("high").unwrap().count(), 7);
    assert_eq!(engine.cut("even").unwrap().count(), 5);
}

#[test]
fn weight_vector_broadcasts_last_entry() {
    let part = Partition::new("p0")
        .with_column("w", Column::jagged(vec![vec![1.0, 2.0, 3.0]]))
        .with_column("x", Column::jagged(vec![vec![10.0, 11.0, 12.0, 13.0, 14.0]]))
        .with_column("s", Column::scalar(vec![2.0]));
    let ds = Arc::new(Dataset::new(vec![part]).unwrap());

    let mut engine = Engine::new(ds.clone());
    engine.set_reweight(Some(&ReweightSpec::raw("w")), None, false).unwrap();
    engine.add_sink("", |lib| rows_sink(lib, "rows", &[("x", "x")])).unwrap();
    engine.execute(None, 0, 1).unwrap();
    let rows = engine.sink::<RowWriter>("", "rows").unwrap().rows();
    let weights: Vec<f64> = rows.iter().map(|r| r.weight).collect();
    assert_eq!(weights, vec![1.0, 2.0, 3.0, 3.0, 3.0]);

    let mut engine = Engine::new(ds);
    engine.set_reweight(Some(&ReweightSpec::raw("s")), None, false).unwrap();
    engine.add_sink("", |lib| rows_sink(lib, "rows", &[("x", "x")])).unwrap();
    engine.execute(None, 0, 1).unwrap();
    let rows = engine.sink::<RowWriter>("", "rows").unwrap().rows();
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|r| r.weight == 2.0));
}

#[test]
fn zero_multiplicity_reweight_skips_record() {
    let part = Partition::new("p0")
        .with_column("w", Column::jagged(vec![vec![], vec![0.5]]))
        .with_column("x", Column::scalar(vec![1.0, 2.0]));
    let mut engine = Engine::new(Arc::new(Dataset::new(vec![part]).unwrap()));
    engine.set_reweight(Some(&ReweightSpec::raw("w")), None, false).unwrap();
    engine.add_cut("any", "x > 0").unwrap();
    engine.execute(None, 0, 1).unwrap();
    assert_eq!(engine.cut("").unwrap().count(), 1);
    assert_eq!(engine.cut("any").unwrap().count(), 1);
}

#[test]
fn prescale_by_key_column() {
    let n = 30;
    let part = Partition::new("p0")
        .with_column("evt", Column::scalar((0..n).map(|i| f64::from(i + 100)).collect()));
    let mut engine = Engine::new(Arc::new(Dataset::new(vec![part]).unwrap()));
    engine.set_prescale(3, Some("evt")).unwrap();
    engine.add_sink("", |lib| rows_sink(lib, "rows", &[("evt", "evt")])).unwrap();

    assert_eq!(engine.execute(None, 0, 1).unwrap(), 30);
    let rows = engine.sink::<RowWriter>("", "rows").unwrap().rows();
    assert_eq!(rows.len(), 10);
    assert!(rows.iter().all(|r| (r.values[0] as u64) % 3 == 0));
    assert_eq!(engine.cut("").unwrap().count(), 10);
}

#[test]
fn prescale_rejects_unusable_keys() {
    for bad in [-3.0, f64::NAN] {
        let part = Partition::new("p0").with_column("evt", Column::scalar(vec![3.0, bad, 6.0]));
        let mut engine = Engine::new(Arc::new(Dataset::new(vec![part]).unwrap()));
        engine.set_prescale(3, Some("evt")).unwrap();
        engine.add_sink("", |_| Ok(Counter::boxed("n"))).unwrap();

        let err = engine.execute(None, 0, 1).unwrap_err();
        assert!(matches!(err, Error::Data(ref m) if m.contains("prescale key")), "{err}");
        assert_eq!(engine.sink::<Counter>("", "n").unwrap().fills, 0);
    }
}

#[test]
fn prescale_by_entry_number() {
    let mut engine = Engine::new(ten_records());
    engine.set_prescale(4, None).unwrap();
    engine.add_sink("", |lib| rows_sink(lib, "rows", &[("idx", "idx")])).unwrap();
    engine.execute(None, 0, 1).unwrap();
    let idx: Vec<f64> = engine.sink::<RowWriter>("", "rows").unwrap().rows().iter().map(|r| r.values[0]).collect();
    assert_eq!(idx, vec![0.0, 4.0, 8.0]);
}

#[test]
fn entry_window() {
    let mut engine = Engine::new(ten_records());
    engine.add_sink("", |lib| rows_sink(lib, "rows", &[("idx", "idx")])).unwrap();
    assert_eq!(engine.execute(Some(3), 4, 1).unwrap(), 3);
    let idx: Vec<f64> = engine.sink::<RowWriter>("", "rows").unwrap().rows().iter().map(|r| r.values[0]).collect();
    assert_eq!(idx, vec![4.0, 5.0, 6.0]);
    assert_eq!(engine.execute(Some(100), 8, 1).unwrap(), 2);
}

#[test]
fn counters_reset_between_runs() {
    let mut engine = Engine::new(ten_records());
    engine.add_cut("c1", "idx < 5").unwrap();
    engine.execute(None, 0, 1).unwrap();
    engine.execute(None, 0, 1).unwrap();
    assert_eq!(engine.cut("c1").unwrap().count(), 5);
}

fn two_partitions() -> Arc<Dataset> {
    let a = Partition::new("a")
        .with_column("w", Column::scalar(vec![1.0, 2.0]))
        .with_column("x", Column::jagged(vec![vec![1.0], vec![2.0, 3.0]]))
        .with_column("y", Column::jagged(vec![vec![10.0], vec![20.0, 30.0]]));
    let b = Partition::new("b")
        .with_column("w", Column::scalar(vec![3.0]))
        .with_column("x", Column::jagged(vec![vec![4.0]]))
        .with_column("y", Column::jagged(vec![vec![40.0]]));
    Arc::new(Dataset::new(vec![a, b]).unwrap())
}

fn row_weights(engine: &Engine) -> Vec<f64> {
    engine.sink::<RowWriter>("", "rows").unwrap().rows().iter().map(|r| r.weight).collect()
}

#[test]
fn partition_weight_overrides() {
    let mut engine = Engine::new(two_partitions());
    engine.set_weight_column(Some("w"));
    engine.set_constant_weight(2.0, None, false).unwrap();
    engine.set_constant_weight(0.5, Some(0), false).unwrap();
    engine.set_constant_weight(10.0, Some(1), true).unwrap();
    engine.add_sink("", |lib| rows_sink(lib, "rows", &[("w", "w")])).unwrap();
    engine.execute(None, 0, 1).unwrap();
    // partition 0: w * 0.5 * 2.0; partition 1: w * 10.0
    assert_eq!(row_weights(&engine), vec![1.0, 2.0, 30.0]);
}

#[test]
fn partition_reweight_overrides() {
    let mut engine = Engine::new(two_partitions());
    engine.set_reweight(Some(&ReweightSpec::raw("x")), None, false).unwrap();
    engine.set_reweight(Some(&ReweightSpec::raw("y")), Some(1), true).unwrap();
    engine.add_sink("", |lib| rows_sink(lib, "rows", &[("x", "x")])).unwrap();
    engine.execute(None, 0, 1).unwrap();
    assert_eq!(row_weights(&engine), vec![1.0, 2.0, 3.0, 40.0]);

    let mut engine = Engine::new(two_partitions());
    engine.set_reweight(Some(&ReweightSpec::raw("x")), None, false).unwrap();
    engine.set_reweight(Some(&ReweightSpec::raw("y")), Some(0), false).unwrap();
    engine.add_sink("", |lib| rows_sink(lib, "rows", &[("x", "x")])).unwrap();
    engine.execute(None, 0, 1).unwrap();
    assert_eq!(row_weights(&engine), vec![10.0, 40.0, 90.0, 4.0]);
}

#[test]
fn mismatched_reweight_multiplicities_are_rejected() {
    let part = Partition::new("p0")
        .with_column("a", Column::jagged(vec![vec![1.0, 2.0]]))
        .with_column("b", Column::jagged(vec![vec![1.0, 2.0, 3.0]]));
    let mut engine = Engine::new(Arc::new(Dataset::new(vec![part]).unwrap()));
    engine.set_reweight(Some(&ReweightSpec::raw("a")), None, false).unwrap();
    engine.set_reweight(Some(&ReweightSpec::raw("b")), Some(0), false).unwrap();
    let err = engine.execute(None, 0, 1).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
}

#[test]
fn missing_weight_column_is_data_error() {
    let a = || {
        Partition::new("a")
            .with_column("x", Column::scalar(vec![1.0]))
            .with_column("w", Column::scalar(vec![1.0]))
    };
    let b = || Partition::new("b").with_column("x", Column::scalar(vec![2.0]));

    for order in [[a(), b()], [b(), a()]] {
        let ds = Arc::new(Dataset::new(order.to_vec()).unwrap());
        for workers in [1, 2] {
            let mut engine = Engine::new(ds.clone());
            engine.add_sink("", |_| Ok(Counter::boxed("n"))).unwrap();
            engine.set_weight_column(Some("w"));
            let err = engine.execute(None, 0, workers).unwrap_err();
            assert!(matches!(err, Error::Data(_)), "workers={workers}: {err}");

            // nothing from the aborted run is kept
            let n = engine.sink::<Counter>("", "n").unwrap();
            assert_eq!((n.fills, n.instances), (0, 0), "workers={workers}");
            assert_eq!(engine.cut("").unwrap().count(), 0);

            engine.set_weight_column(None);
            assert_eq!(engine.execute(None, 0, workers).unwrap(), 2);
            let n = engine.sink::<Counter>("", "n").unwrap();
            assert_eq!((n.fills, n.instances), (2, 2), "workers={workers}");
        }
    }
}

#[test]
fn missing_expression_column_is_data_error() {
    let a = Partition::new("a").with_column("x", Column::scalar(vec![1.0])).with_column("y", Column::scalar(vec![1.0]));
    let b = Partition::new("b").with_column("x", Column::scalar(vec![2.0]));
    let mut engine = Engine::new(Arc::new(Dataset::new(vec![a, b]).unwrap()));
    engine.add_cut("uses_y", "y > 0").unwrap();
    assert!(matches!(engine.execute(None, 0, 1), Err(Error::Data(_))));

    engine.remove_cut("uses_y").unwrap();
    assert_eq!(engine.execute(None, 0, 1).unwrap(), 2);
}

#[test]
fn categorized_histogram() {
    let part = Partition::new("p0")
        .with_column("pt", Column::jagged(vec![vec![5.0, 15.0, 25.0], vec![35.0]]))
        .with_column("eta", Column::jagged(vec![vec![0.5, 2.0, 1.0], vec![3.0]]));
    let mut engine = Engine::new(Arc::new(Dataset::new(vec![part]).unwrap()));
    let categories = CategorySpec { expression: None, predicates: vec!["eta < 1.5".into(), "eta < 2.5".into()] };
    engine.add_categorized_cut("jets", "pt > 10", categories).unwrap();
    engine
        .add_sink("jets", |lib| Ok(Box::new(Histogram1D::new(lib, "pt", Axis::uniform(4, 0.0, 40.0)?, "pt", None)?)))
        .unwrap();
    engine.execute(None, 0, 1).unwrap();

    let h: &Histogram1D = engine.sink("jets", "pt").unwrap();
    assert_eq!(h.category(0).unwrap().bin_content, vec![0.0, 0.0, 1.0, 0.0]);
    assert_eq!(h.category(1).unwrap().bin_content, vec![0.0, 1.0, 0.0, 0.0]);
    // eta = 3.0 matches no category
    assert_eq!(h.count(), 2);
    assert_eq!(engine.cut("jets").unwrap().count(), 1);
}

#[test]
fn function_backed_cut() {
    let mut engine = Engine::new(ten_records());
    engine
        .add_cut_fn(
            "odd",
            |view: &dyn RecordView, _| {
                let c = view.column_index("idx").unwrap_or(0);
                (view.value(c, 0) as u64 % 2) as f64
            },
            None,
        )
        .unwrap();
    engine.execute(None, 0, 1).unwrap();
    assert_eq!(engine.cut("odd").unwrap().count(), 5);
}

#[test]
fn report_lists_every_cut() {
    let mut engine = Engine::new(ten_records());
    engine.add_cut("c1", "idx < 5").unwrap();
    engine.add_sink("c1", |_| Ok(Counter::boxed("n"))).unwrap();
    engine.execute(None, 0, 1).unwrap();
    let report = serde_json::to_value(engine.report()).unwrap();
    assert_eq!(report["records"], 10);
    assert_eq!(report["cuts"][0]["name"], "");
    assert_eq!(report["cuts"][1]["passed"], 5);
    assert_eq!(report["cuts"][1]["sinks"][0]["fills"], 5);
}
