//! Reference objects a reweight can look values up in: binned tables,
//! interpolated curves and continuous functions of up to three variables.

use cf_core::{Error, Result};

use crate::axis::Axis;
use crate::expr::CompiledExpr;

/// Step function over 1–3 axes. Out-of-range inputs clamp to the edge bins.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedLookup {
    axes: Vec<Axis>,
    /// Row-major contents; the last axis varies fastest.
    contents: Vec<f64>,
}

impl BinnedLookup {
    /// Build a table from its axes and row-major contents.
    pub fn new(axes: Vec<Axis>, contents: Vec<f64>) -> Result<Self> {
        if axes.is_empty() || axes.len() > 3 {
            return Err(Error::Config(format!(
                "binned lookup supports 1 to 3 dimensions, got {}",
                axes.len()
            )));
        }
        let expected: usize = axes.iter().map(Axis::n_bins).product();
        if contents.len() != expected {
            return Err(Error::Config(format!(
                "binned lookup has {} contents, expected {}",
                contents.len(),
                expected
            )));
        }
        Ok(Self { axes, contents })
    }

    /// One-dimensional table.
    pub fn one_dim(edges: Vec<f64>, contents: Vec<f64>) -> Result<Self> {
        Self::new(vec![Axis::new(edges)?], contents)
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    /// Axes in order.
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Content of the (clamped) bin containing `point`; `point` holds one
    /// coordinate per axis.
    pub fn lookup(&self, point: &[f64]) -> f64 {
        let mut index = 0;
        for (axis, &x) in self.axes.iter().zip(point) {
            index = index * axis.n_bins() + axis.find_bin_clamped(x);
        }
        self.contents[index]
    }
}

/// Piecewise-linear curve through points with strictly increasing x.
/// Values beyond the domain clamp to the nearest endpoint's y.
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl Curve {
    /// Build from `(x, y)` points.
    pub fn new(points: &[(f64, f64)]) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::Config("interpolation source needs at least one point".into()));
        }
        if points.windows(2).any(|w| !(w[0].0 < w[1].0)) {
            return Err(Error::Config(
                "interpolation source must have x values in strictly increasing order".into(),
            ));
        }
        Ok(Self {
            xs: points.iter().map(|p| p.0).collect(),
            ys: points.iter().map(|p| p.1).collect(),
        })
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    /// Whether the curve has no points (never true for a constructed curve).
    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    /// Interpolated value at `x`.
    pub fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        let b = self.xs.partition_point(|&v| v <= x);
        if b == n {
            self.ys[n - 1]
        } else if b == 0 {
            self.ys[0]
        } else {
            let low = b - 1;
            let dlow = x - self.xs[low];
            let dhigh = self.xs[b] - x;
            (self.ys[low] * dhigh + self.ys[b] * dlow) / (self.xs[b] - self.xs[low])
        }
    }
}

/// Continuous reference function of 1–3 variables.
#[derive(Debug, Clone)]
pub enum RefFunction {
    /// The same value everywhere.
    Constant {
        /// Function value.
        value: f64,
        /// Declared number of variables.
        ndim: usize,
    },
    /// A formula in `x`, `y`, `z`.
    Formula {
        /// Compiled formula.
        expr: CompiledExpr,
        /// Declared number of variables.
        ndim: usize,
        /// For each required variable, its coordinate (0 = x, 1 = y, 2 = z).
        slots: Vec<usize>,
    },
}

const FUNCTION_VARS: [&str; 3] = ["x", "y", "z"];

impl RefFunction {
    /// Compile `text` as a function of the first `ndim` of `x`, `y`, `z`.
    pub fn formula(text: &str, ndim: usize) -> Result<Self> {
        if ndim == 0 || ndim > 3 {
            return Err(Error::Config(format!(
                "reference function supports 1 to 3 dimensions, got {ndim}"
            )));
        }
        let expr = CompiledExpr::compile_function(text, &FUNCTION_VARS[..ndim])?;
        let slots = expr
            .required_columns
            .iter()
            .map(|v| FUNCTION_VARS.iter().position(|f| f == v).unwrap_or(0))
            .collect();
        Ok(RefFunction::Formula { expr, ndim, slots })
    }

    /// Number of variables.
    pub fn ndim(&self) -> usize {
        match self {
            RefFunction::Constant { ndim, .. } | RefFunction::Formula { ndim, .. } => *ndim,
        }
    }

    /// Evaluate at `point` (one coordinate per dimension).
    pub fn eval(&self, point: &[f64]) -> f64 {
        match self {
            RefFunction::Constant { value, .. } => *value,
            RefFunction::Formula { expr, slots, .. } => {
                let mut row = [0.0f64; 3];
                for (j, &s) in slots.iter().enumerate() {
                    row[j] = point.get(s).copied().unwrap_or(0.0);
                }
                expr.eval_row(&row[..slots.len()])
            }
        }
    }
}

/// The lookup strategy behind a reweight.
#[derive(Debug, Clone)]
pub enum LookupSource {
    /// Step-function bins.
    Binned(std::sync::Arc<BinnedLookup>),
    /// Interpolated curve (1-D only).
    Interpolated(std::sync::Arc<Curve>),
    /// Continuous function.
    Functional(std::sync::Arc<RefFunction>),
}

impl LookupSource {
    /// Number of input dimensions the source expects.
    pub fn ndim(&self) -> usize {
        match self {
            LookupSource::Binned(b) => b.ndim(),
            LookupSource::Interpolated(_) => 1,
            LookupSource::Functional(f) => f.ndim(),
        }
    }

    /// Look up the weight for `point`.
    pub fn eval(&self, point: &[f64]) -> f64 {
        match self {
            LookupSource::Binned(b) => b.lookup(point),
            LookupSource::Interpolated(c) => c.eval(point[0]),
            LookupSource::Functional(f) => f.eval(point),
        }
    }

    /// Strategy tag for logging and reports.
    pub fn tag(&self) -> &'static str {
        match self {
            LookupSource::Binned(_) => "binned",
            LookupSource::Interpolated(_) => "interpolated",
            LookupSource::Functional(_) => "functional",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binned_clamps_to_edge_bins() {
        let table = BinnedLookup::one_dim(vec![0.0, 1.0, 2.0], vec![2.0, 3.0]).unwrap();
        assert_eq!(table.lookup(&[-5.0]), 2.0);
        assert_eq!(table.lookup(&[0.5]), 2.0);
        assert_eq!(table.lookup(&[1.5]), 3.0);
        assert_eq!(table.lookup(&[10.0]), 3.0);
    }

    #[test]
    fn binned_two_dims_row_major() {
        let table = BinnedLookup::new(
            vec![Axis::new(vec![0.0, 1.0, 2.0]).unwrap(), Axis::new(vec![0.0, 10.0, 20.0, 30.0]).unwrap()],
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        )
        .unwrap();
        assert_eq!(table.lookup(&[0.5, 15.0]), 2.0);
        assert_eq!(table.lookup(&[1.5, 25.0]), 6.0);
        assert_eq!(table.lookup(&[9.0, -1.0]), 4.0);
    }

    #[test]
    fn binned_rejects_bad_shapes() {
        assert!(BinnedLookup::one_dim(vec![0.0, 1.0], vec![1.0, 2.0]).is_err());
        assert!(BinnedLookup::new(vec![], vec![]).is_err());
    }

    #[test]
    fn curve_interpolates_and_clamps() {
        let c = Curve::new(&[(0.0, 1.0), (2.0, 3.0), (4.0, 3.0)]).unwrap();
        assert_eq!(c.eval(-1.0), 1.0);
        assert_eq!(c.eval(1.0), 2.0);
        assert_eq!(c.eval(3.0), 3.0);
        assert_eq!(c.eval(100.0), 3.0);
        assert_eq!(c.eval(2.0), 3.0);
    }

    #[test]
    fn curve_requires_increasing_x() {
        let err = Curve::new(&[(0.0, 1.0), (0.0, 2.0)]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(Curve::new(&[(1.0, 1.0), (0.5, 2.0)]).is_err());
        assert!(Curve::new(&[]).is_err());
    }

    #[test]
    fn function_formula() {
        let f = RefFunction::formula("1 + y * x", 2).unwrap();
        assert_eq!(f.ndim(), 2);
        assert!((f.eval(&[2.0, 3.0]) - 7.0).abs() < 1e-12);
        assert!(RefFunction::formula("z", 2).is_err());
        assert!(RefFunction::formula("x", 4).is_err());
    }

    #[test]
    fn source_dimensions() {
        let f = LookupSource::Functional(std::sync::Arc::new(RefFunction::Constant {
            value: 0.5,
            ndim: 1,
        }));
        assert_eq!(f.ndim(), 1);
        assert_eq!(f.eval(&[3.0]), 0.5);
        assert_eq!(f.tag(), "functional");
    }
}
