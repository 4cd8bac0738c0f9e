//! Bin edges shared by lookup tables and histogram sinks.

use cf_core::{Error, Result};

/// Strictly increasing bin edges (length = n_bins + 1).
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    edges: Vec<f64>,
}

impl Axis {
    /// Build from explicit edges.
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::Config(format!(
                "axis needs at least 2 edges, got {}",
                edges.len()
            )));
        }
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(Error::Config("axis edges must be finite".into()));
        }
        if edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Config("axis edges must be strictly increasing".into()));
        }
        Ok(Self { edges })
    }

    /// `n_bins` equal-width bins over `[lo, hi)`.
    pub fn uniform(n_bins: usize, lo: f64, hi: f64) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::Config("axis needs at least one bin".into()));
        }
        let width = (hi - lo) / n_bins as f64;
        Self::new((0..=n_bins).map(|i| lo + width * i as f64).collect())
    }

    /// Bin edges.
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Lower edge of the first bin.
    pub fn lo(&self) -> f64 {
        self.edges[0]
    }

    /// Upper edge of the last bin.
    pub fn hi(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    /// Lower edge of the last bin.
    pub fn last_low_edge(&self) -> f64 {
        self.edges[self.edges.len() - 2]
    }

    /// Find the bin index for a value.
    ///
    /// Returns `None` for underflow/overflow and NaN.
    pub fn find_bin(&self, val: f64) -> Option<usize> {
        if !(val >= self.lo() && val < self.hi()) {
            return None;
        }
        Some(self.edges.partition_point(|&e| e <= val) - 1)
    }

    /// Find the bin index, clamping out-of-range values to the edge bins.
    ///
    /// NaN maps to the first bin.
    pub fn find_bin_clamped(&self, val: f64) -> usize {
        let i = self.edges.partition_point(|&e| e <= val);
        i.saturating_sub(1).min(self.n_bins() - 1)
    }
}
