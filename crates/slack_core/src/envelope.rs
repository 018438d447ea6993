//! Hysteresis envelopes: the pair of force bounds `Fmax(x)` / `Fmin(x)`
//! bracketing the achievable coupler force at a relative displacement.

use crate::error::ConfigError;
use crate::grid::{column, interp_clamped, interp_extrapolate, sorted_union, UniformGrid};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Envelope tabulated on arbitrary (sorted, shared) displacement breakpoints.
///
/// Rows of `fmax`/`fmin` follow `x`, columns are coupler groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointEnvelope {
    pub x: Vec<f64>,
    pub fmax: DMatrix<f64>,
    pub fmin: DMatrix<f64>,
}

impl BreakpointEnvelope {
    /// Builds the table by interpolating each group's upper and lower curves
    /// (given as `(x, F)` polylines) onto the union of all their breakpoints.
    pub fn from_curves(upper: &[(Vec<f64>, Vec<f64>)], lower: &[(Vec<f64>, Vec<f64>)]) -> Self {
        debug_assert_eq!(upper.len(), lower.len());
        let x = sorted_union(
            upper
                .iter()
                .chain(lower.iter())
                .flat_map(|(xs, _)| xs.iter().copied()),
        );
        let groups = upper.len();
        let mut fmax = DMatrix::zeros(x.len(), groups);
        let mut fmin = DMatrix::zeros(x.len(), groups);
        for g in 0..groups {
            let (ux, uf) = &upper[g];
            let (lx, lf) = &lower[g];
            for (k, &xk) in x.iter().enumerate() {
                fmax[(k, g)] = interp_extrapolate(ux, uf, xk);
                fmin[(k, g)] = interp_extrapolate(lx, lf, xk);
            }
        }
        Self { x, fmax, fmin }
    }

    pub fn groups(&self) -> usize {
        self.fmax.ncols()
    }
}

/// Envelope sampled on one uniform displacement grid shared by every group.
///
/// Invariant: `fmax >= fmin` at every grid node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HysteresisEnvelope {
    grid: UniformGrid,
    fmax: DMatrix<f64>,
    fmin: DMatrix<f64>,
}

impl HysteresisEnvelope {
    /// Wraps tables already sampled on `grid`. Nodes where the lower bound
    /// exceeds the upper bound are clipped to the upper bound.
    pub fn new(
        grid: UniformGrid,
        fmax: DMatrix<f64>,
        mut fmin: DMatrix<f64>,
    ) -> Result<Self, ConfigError> {
        if fmax.nrows() != grid.len() {
            return Err(ConfigError::DimensionMismatch {
                what: "upper envelope rows",
                expected: grid.len(),
                actual: fmax.nrows(),
            });
        }
        if fmin.shape() != fmax.shape() {
            return Err(ConfigError::DimensionMismatch {
                what: "lower envelope rows",
                expected: fmax.nrows(),
                actual: fmin.nrows(),
            });
        }
        if fmax.ncols() == 0 {
            return Err(ConfigError::InvalidInput(
                "Envelope must describe at least one coupler group.".to_string(),
            ));
        }

        let mut clipped = 0usize;
        let mut worst = 0.0f64;
        for (lo, &hi) in fmin.iter_mut().zip(fmax.iter()) {
            if *lo > hi {
                worst = worst.max(*lo - hi);
                *lo = hi;
                clipped += 1;
            }
        }
        if clipped > 0 {
            log::debug!(
                "Clipped {} envelope nodes where Fmin exceeded Fmax (largest overlap {:e}).",
                clipped,
                worst
            );
        }

        Ok(Self { grid, fmax, fmin })
    }

    /// Re-grids a breakpoint table onto a uniform grid covering
    /// `[floor(x_first), ceil(x_last)]` with spacing `step`.
    pub fn from_breakpoints(table: &BreakpointEnvelope, step: f64) -> Result<Self, ConfigError> {
        let n = table.x.len();
        if n < 2 {
            return Err(ConfigError::InvalidInput(format!(
                "Envelope needs at least two displacement breakpoints, got {n}."
            )));
        }
        if table.fmax.nrows() != n || table.fmin.nrows() != n {
            return Err(ConfigError::DimensionMismatch {
                what: "envelope breakpoints",
                expected: n,
                actual: table.fmax.nrows(),
            });
        }
        let grid = UniformGrid::spanning(table.x[0], table.x[n - 1], step)?;
        let points = grid.points();
        let groups = table.groups();
        let mut fmax = DMatrix::zeros(grid.len(), groups);
        let mut fmin = DMatrix::zeros(grid.len(), groups);
        for g in 0..groups {
            let upper = column(&table.fmax, g);
            let lower = column(&table.fmin, g);
            for (k, &xk) in points.iter().enumerate() {
                fmax[(k, g)] = interp_extrapolate(&table.x, upper, xk);
                fmin[(k, g)] = interp_extrapolate(&table.x, lower, xk);
            }
        }
        Self::new(grid, fmax, fmin)
    }

    pub fn grid(&self) -> &UniformGrid {
        &self.grid
    }

    pub fn groups(&self) -> usize {
        self.fmax.ncols()
    }

    pub fn fmax(&self) -> &DMatrix<f64> {
        &self.fmax
    }

    pub fn fmin(&self) -> &DMatrix<f64> {
        &self.fmin
    }

    pub fn fmax_column(&self, group: usize) -> &[f64] {
        column(&self.fmax, group)
    }

    pub fn fmin_column(&self, group: usize) -> &[f64] {
        column(&self.fmin, group)
    }

    /// `(Fmin, Fmax)` of `group` at displacement `x`, extrapolating with the
    /// boundary slopes outside the grid.
    pub fn bounds(&self, group: usize, x: f64) -> (f64, f64) {
        let bracket = self.grid.bracket(x);
        (
            bracket.interpolate(self.fmin_column(group)),
            bracket.interpolate(self.fmax_column(group)),
        )
    }

    /// Displacement at which the upper (`rising`) or lower envelope of `group`
    /// reaches `force`.
    ///
    /// The table is made strictly increasing with a perturbation of a few ulps
    /// of its largest magnitude so flat segments still invert; queries outside
    /// the table return the end displacement.
    pub fn displacement_at(&self, group: usize, force: f64, rising: bool) -> f64 {
        let values = if rising {
            self.fmax_column(group)
        } else {
            self.fmin_column(group)
        };
        let scale = 2.0 * f64::EPSILON * max_abs(self.fmax_column(group));
        let forces = perturb_increasing(values, scale, 1);
        interp_clamped(&forces, &self.grid.points(), force)
    }
}

/// Adds `(k + offset) * scale` to the k-th value so non-decreasing tables
/// become strictly increasing.
pub(crate) fn perturb_increasing(values: &[f64], scale: f64, offset: usize) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(k, v)| v + (k + offset) as f64 * scale)
        .collect()
}

pub(crate) fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0f64, |acc, v| acc.max(v.abs()))
}
