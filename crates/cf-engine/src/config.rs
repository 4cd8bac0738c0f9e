//! JSON run configuration.
//!
//! A [`RunConfig`] describes a whole run (filter, weights, reweights,
//! prescale, cuts and sinks) and replays it through the [`Engine`] builder
//! API, so every validation rule of the programmatic interface applies.
//!
//! ```
//! use cf_engine::RunConfig;
//!
//! let cfg = RunConfig::from_json_str(r#"{
//!     "filter": "njet > 0",
//!     "cuts": [{ "name": "central", "expr": "abs(jet_eta) < 2.5" }],
//!     "sinks": [{
//!         "kind": "histogram1d", "name": "pt", "cut": "central",
//!         "expr": "jet_pt", "bins": { "n": 10, "lo": 0, "hi": 100 }
//!     }]
//! }"#).unwrap();
//! assert_eq!(cfg.cuts.len(), 1);
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use cf_core::{Error, PartitionId, Result};

use crate::axis::Axis;
use crate::engine::{CategorySpec, Engine};
use crate::library::ExprLibrary;
use crate::lookup::{BinnedLookup, Curve, RefFunction};
use crate::reweight::ReweightSpec;
use crate::sink::{Histogram1D, Histogram2D, OverflowMode, RowWriter, Sink};

/// Top-level run description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Global filter expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Per-record input weight column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_column: Option<String>,
    /// Constant weights.
    #[serde(default)]
    pub weights: Vec<WeightConfig>,
    /// Reweights.
    #[serde(default)]
    pub reweights: Vec<ReweightConfig>,
    /// Prescale policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescale: Option<PrescaleConfig>,
    /// Named cuts, in order.
    #[serde(default)]
    pub cuts: Vec<CutConfig>,
    /// Sinks.
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

/// A constant weight, global or for one partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightConfig {
    /// Weight value.
    pub value: f64,
    /// Partition index; global when absent.
    #[serde(default)]
    pub partition: Option<PartitionId>,
    /// Replace (true) or multiply (false) the global weight.
    #[serde(default = "default_true")]
    pub exclusive: bool,
}

/// A reweight, global or for one partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReweightConfig {
    /// Reweight source.
    pub source: ReweightSourceConfig,
    /// Partition index; global when absent.
    #[serde(default)]
    pub partition: Option<PartitionId>,
    /// Replace (true) or multiply (false) the global reweight.
    #[serde(default = "default_true")]
    pub exclusive: bool,
}

fn default_true() -> bool {
    true
}

/// Reweight strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ReweightSourceConfig {
    /// Weight equals the expression value.
    Raw {
        /// Weight expression.
        expr: String,
    },
    /// Step-function table.
    Binned {
        /// One expression per axis.
        dims: Vec<String>,
        /// Edges per axis.
        axes: Vec<Vec<f64>>,
        /// Row-major contents.
        contents: Vec<f64>,
    },
    /// Interpolated curve.
    Interpolated {
        /// Dimension expression.
        expr: String,
        /// `[x, y]` points.
        points: Vec<(f64, f64)>,
    },
    /// Function of `x`, `y`, `z`.
    Functional {
        /// One expression per variable.
        dims: Vec<String>,
        /// Function formula.
        formula: String,
    },
    /// Product of two reweights.
    Factorized {
        /// Drives the multiplicity.
        first: Box<ReweightSourceConfig>,
        /// Second factor.
        second: Box<ReweightSourceConfig>,
    },
}

impl ReweightSourceConfig {
    /// Build the library-independent reweight description.
    pub fn to_spec(&self) -> Result<ReweightSpec> {
        Ok(match self {
            ReweightSourceConfig::Raw { expr } => ReweightSpec::raw(expr.clone()),
            ReweightSourceConfig::Binned { dims, axes, contents } => {
                let axes = axes.iter().map(|e| Axis::new(e.clone())).collect::<Result<Vec<_>>>()?;
                ReweightSpec::Binned {
                    table: Arc::new(BinnedLookup::new(axes, contents.clone())?),
                    dims: dims.clone(),
                }
            }
            ReweightSourceConfig::Interpolated { expr, points } => {
                ReweightSpec::interpolated(Curve::new(points)?, expr.clone())
            }
            ReweightSourceConfig::Functional { dims, formula } => ReweightSpec::Functional {
                function: Arc::new(RefFunction::formula(formula, dims.len())?),
                dims: dims.clone(),
            },
            ReweightSourceConfig::Factorized { first, second } => {
                ReweightSpec::factorized(first.to_spec()?, second.to_spec()?)
            }
        })
    }
}

/// Prescale policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrescaleConfig {
    /// Keep records whose key is divisible by this.
    pub factor: u64,
    /// Key column; the global entry number when absent.
    #[serde(default)]
    pub key: Option<String>,
}

/// A named cut.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CutConfig {
    /// Unique name.
    pub name: String,
    /// Predicate expression.
    pub expr: String,
    /// Category expression.
    #[serde(default)]
    pub category: Option<String>,
    /// Category predicates.
    #[serde(default)]
    pub category_predicates: Vec<String>,
}

/// Histogram binning: explicit edges or a uniform range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BinningConfig {
    /// Explicit edges.
    Edges(Vec<f64>),
    /// `n` equal-width bins over `[lo, hi)`.
    Uniform {
        /// Number of bins.
        n: usize,
        /// Lower edge.
        lo: f64,
        /// Upper edge.
        hi: f64,
    },
}

impl BinningConfig {
    fn axis(&self) -> Result<Axis> {
        match self {
            BinningConfig::Edges(e) => Axis::new(e.clone()),
            BinningConfig::Uniform { n, lo, hi } => Axis::uniform(*n, *lo, *hi),
        }
    }
}

/// A named output column of a row writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnConfig {
    /// Column name.
    pub name: String,
    /// Column expression.
    pub expr: String,
}

/// Sink descriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum SinkConfig {
    /// One-dimensional histogram.
    Histogram1d {
        /// Sink name.
        name: String,
        /// Owning cut; the global filter when absent.
        #[serde(default)]
        cut: String,
        /// Value expression.
        expr: String,
        /// Binning.
        bins: BinningConfig,
        /// Overflow handling.
        #[serde(default)]
        overflow: OverflowMode,
        /// Per-sink reweight expression.
        #[serde(default)]
        reweight: Option<String>,
    },
    /// Two-dimensional histogram.
    Histogram2d {
        /// Sink name.
        name: String,
        /// Owning cut; the global filter when absent.
        #[serde(default)]
        cut: String,
        /// x expression.
        x: String,
        /// y expression.
        y: String,
        /// x binning.
        x_bins: BinningConfig,
        /// y binning.
        y_bins: BinningConfig,
        /// Per-sink reweight expression.
        #[serde(default)]
        reweight: Option<String>,
    },
    /// Row writer.
    Rows {
        /// Sink name.
        name: String,
        /// Owning cut; the global filter when absent.
        #[serde(default)]
        cut: String,
        /// Output columns.
        columns: Vec<ColumnConfig>,
        /// Per-sink reweight expression.
        #[serde(default)]
        reweight: Option<String>,
    },
}

impl SinkConfig {
    /// Owning cut name.
    pub fn cut(&self) -> &str {
        match self {
            SinkConfig::Histogram1d { cut, .. }
            | SinkConfig::Histogram2d { cut, .. }
            | SinkConfig::Rows { cut, .. } => cut,
        }
    }

    fn build(&self, library: &mut ExprLibrary) -> Result<Box<dyn Sink>> {
        match self {
            SinkConfig::Histogram1d { name, expr, bins, overflow, reweight, .. } => {
                let rw = reweight.as_ref().map(ReweightSpec::raw);
                let h = Histogram1D::new(library, name.clone(), bins.axis()?, expr, rw.as_ref())?;
                Ok(Box::new(h.with_overflow(*overflow)))
            }
            SinkConfig::Histogram2d { name, x, y, x_bins, y_bins, reweight, .. } => {
                let rw = reweight.as_ref().map(ReweightSpec::raw);
                let h = Histogram2D::new(
                    library,
                    name.clone(),
                    (x_bins.axis()?, x.as_str()),
                    (y_bins.axis()?, y.as_str()),
                    rw.as_ref(),
                )?;
                Ok(Box::new(h))
            }
            SinkConfig::Rows { name, columns, reweight, .. } => {
                let rw = reweight.as_ref().map(ReweightSpec::raw);
                let mut w = RowWriter::new(library, name.clone(), rw.as_ref())?;
                for c in columns {
                    if let Err(e) = w.add_column(library, &c.name, &c.expr) {
                        w.release(library);
                        return Err(e);
                    }
                }
                Ok(Box::new(w))
            }
        }
    }
}

impl RunConfig {
    /// Parse from a JSON string.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read a JSON file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Configure `engine` from this document, stopping at the first error.
    pub fn apply(&self, engine: &mut Engine) -> Result<()> {
        if let Some(filter) = &self.filter {
            engine.set_filter(filter)?;
        }
        engine.set_weight_column(self.weight_column.as_deref());
        for w in &self.weights {
            engine.set_constant_weight(w.value, w.partition, w.exclusive)?;
        }
        for r in &self.reweights {
            engine.set_reweight(Some(&r.source.to_spec()?), r.partition, r.exclusive)?;
        }
        if let Some(p) = &self.prescale {
            engine.set_prescale(p.factor, p.key.as_deref())?;
        }
        for c in &self.cuts {
            let categories = CategorySpec {
                expression: c.category.clone(),
                predicates: c.category_predicates.clone(),
            };
            engine.add_categorized_cut(&c.name, &c.expr, categories)?;
        }
        for s in &self.sinks {
            engine.add_sink(s.cut(), |library| s.build(library))?;
        }
        Ok(())
    }
}

impl std::str::FromStr for RunConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_json_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_data::{Column, Dataset, Partition};

    fn engine() -> Engine {
        let part = Partition::new("p")
            .with_column("x", Column::scalar(vec![0.5, 1.5, 2.5]))
            .with_column("pt", Column::jagged(vec![vec![10.0], vec![20.0, 30.0], vec![]]));
        Engine::new(Arc::new(Dataset::new(vec![part]).unwrap()))
    }

    #[test]
    fn parse_full_document() {
        let cfg: RunConfig = r#"{
            "filter": "x > 0",
            "weight_column": "x",
            "weights": [{ "value": 2.0 }, { "value": 0.5, "partition": 0, "exclusive": false }],
            "reweights": [{ "source": { "kind": "interpolated", "expr": "x", "points": [[0, 1], [3, 2]] } }],
            "prescale": { "factor": 2 },
            "cuts": [{ "name": "c1", "expr": "x > 1", "category_predicates": ["x < 2", "x >= 2"] }],
            "sinks": [
                { "kind": "histogram1d", "name": "h", "cut": "c1", "expr": "pt", "bins": [0, 50, 100], "overflow": "merge_last" },
                { "kind": "histogram2d", "name": "h2", "x": "x", "y": "pt",
                  "x_bins": { "n": 3, "lo": 0, "hi": 3 }, "y_bins": [0, 100] },
                { "kind": "rows", "name": "r", "columns": [{ "name": "x", "expr": "x" }], "reweight": "x" }
            ]
        }"#
        .parse()
        .unwrap();
        assert_eq!(cfg.weights.len(), 2);
        assert!(cfg.weights[0].exclusive);
        assert_eq!(cfg.sinks[1].cut(), "");

        let mut e = engine();
        cfg.apply(&mut e).unwrap();
        assert_eq!(e.cuts().len(), 2);
        assert_eq!(e.cut("c1").unwrap().sinks().len(), 1);
        assert_eq!(e.cut("").unwrap().sinks().len(), 2);
        let h: &Histogram1D = e.sink("c1", "h").unwrap();
        assert_eq!(h.overflow_mode(), OverflowMode::MergeLast);
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(RunConfig::from_json_str(r#"{ "filtre": "x" }"#).is_err());
        assert!(RunConfig::from_json_str(r#"{ "sinks": [{ "kind": "pie", "name": "p" }] }"#).is_err());
    }

    #[test]
    fn invalid_curve_is_config_error() {
        let cfg = RunConfig::from_json_str(
            r#"{ "reweights": [{ "source": { "kind": "interpolated", "expr": "x", "points": [[1, 1], [0, 2]] } }] }"#,
        )
        .unwrap();
        let err = cfg.apply(&mut engine()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn binned_and_functional_sources() {
        let binned = ReweightSourceConfig::Binned {
            dims: vec!["x".into()],
            axes: vec![vec![0.0, 1.0, 2.0]],
            contents: vec![2.0, 3.0],
        };
        assert!(matches!(binned.to_spec().unwrap(), ReweightSpec::Binned { .. }));
        let f = ReweightSourceConfig::Functional { dims: vec!["x".into(), "pt".into()], formula: "x * y".into() };
        assert!(matches!(f.to_spec().unwrap(), ReweightSpec::Functional { .. }));
        let bad = ReweightSourceConfig::Functional { dims: vec!["x".into()], formula: "y".into() };
        assert!(bad.to_spec().is_err());
    }

    #[test]
    fn sink_under_missing_cut() {
        let cfg = RunConfig::from_json_str(
            r#"{ "sinks": [{ "kind": "histogram1d", "name": "h", "cut": "nope", "expr": "x", "bins": [0, 1] }] }"#,
        )
        .unwrap();
        assert!(matches!(cfg.apply(&mut engine()), Err(Error::NotFound(_))));
    }

    #[test]
    fn rows_sink_with_bad_column_releases() {
        let cfg = RunConfig::from_json_str(
            r#"{ "sinks": [{ "kind": "rows", "name": "r", "columns": [
                { "name": "a", "expr": "x" }, { "name": "b", "expr": "missing" }
            ] }] }"#,
        )
        .unwrap();
        let mut e = engine();
        assert!(matches!(cfg.apply(&mut e), Err(Error::Compile { .. })));
        assert_eq!(e.library().live_count(), 0);
    }
}
