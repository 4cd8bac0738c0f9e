//! # cf-engine
//!
//! Parallel cut/weight/fill aggregation over partitioned records.
//!
//! Records carry scalar and jagged columns. Named cuts select instances with
//! compiled expressions, each record gets a weight vector built from an input
//! weight column, constant weights and lookup-based reweights, and every
//! passing cut feeds its sinks (histograms, row writers). A run can be split
//! across worker threads; each worker fills private clones that are merged
//! back at the end.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use cf_data::{Column, Dataset, Partition};
//! use cf_engine::{Axis, Engine, Histogram1D};
//!
//! let part = Partition::new("sample")
//!     .with_column("met", Column::scalar(vec![12.0, 55.0, 80.0]))
//!     .with_column("jet_pt", Column::jagged(vec![vec![40.0], vec![25.0, 60.0], vec![]]));
//! let mut engine = Engine::new(Arc::new(Dataset::new(vec![part]).unwrap()));
//!
//! engine.set_filter("met > 20").unwrap();
//! engine.add_cut("hard_jets", "jet_pt > 30").unwrap();
//! engine
//!     .add_sink("hard_jets", |lib| {
//!         let axis = Axis::uniform(4, 0.0, 100.0)?;
//!         Ok(Box::new(Histogram1D::new(lib, "jet_pt", axis, "jet_pt", None)?))
//!     })
//!     .unwrap();
//!
//! assert_eq!(engine.execute(None, 0, 2).unwrap(), 3);
//! let h: &Histogram1D = engine.sink("hard_jets", "jet_pt").unwrap();
//! assert_eq!(h.total().entries, 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod axis;
pub mod config;
pub mod cut;
pub mod engine;
pub mod evaluable;
pub mod expr;
pub mod library;
pub mod lookup;
pub mod partition;
pub mod reweight;
pub mod sink;

pub use axis::Axis;
pub use config::RunConfig;
pub use cut::{Categorization, Cut};
pub use engine::{CategorySpec, CutReport, Engine, RunReport};
pub use evaluable::{CountFn, Evaluable, InstanceFn};
pub use expr::CompiledExpr;
pub use library::{CacheStats, EvalContext, ExprId, ExprLibrary};
pub use lookup::{BinnedLookup, Curve, LookupSource, RefFunction};
pub use reweight::{Reweight, ReweightSpec};
pub use sink::{Histogram1D, Histogram2D, InstanceMask, OverflowMode, RowWriter, Sink};
