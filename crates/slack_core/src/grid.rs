//! Table lookup helpers shared by the envelope builder, the steady-state
//! solver and the state derivative.
//!
//! Two flavours of table are used throughout the crate: arbitrary sorted
//! breakpoint tables (interpolated with [`interp_extrapolate`] or
//! [`interp_clamped`]) and tables sampled on a [`UniformGrid`], which allow an
//! O(1) bracket lookup.

use crate::error::ConfigError;
use crate::traits::Scalar;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Position of a query inside a table: the lower node of the bracketing
/// segment and the fractional offset from it.
///
/// `fraction` is left unclamped when the query falls outside the table so
/// that the boundary segment's slope is reused for extrapolation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket<T> {
    pub lower: usize,
    pub fraction: T,
}

impl<T: Scalar> Bracket<T> {
    /// Linear interpolation of `values` at this bracket.
    pub fn interpolate(&self, values: &[T]) -> T {
        let y0 = values[self.lower];
        let y1 = values[self.lower + 1];
        y0 * (T::one() - self.fraction) + y1 * self.fraction
    }
}

/// Linear interpolation over strictly increasing `xs` with linear
/// extrapolation past either end.
pub fn interp_extrapolate<T: Scalar>(xs: &[T], ys: &[T], x: T) -> T {
    debug_assert_eq!(xs.len(), ys.len());
    match xs.len() {
        0 => T::nan(),
        1 => ys[0],
        n => {
            // index of the first node strictly greater than x, kept inside [1, n-1]
            let upper = xs.partition_point(|&xi| xi <= x).clamp(1, n - 1);
            segment(xs, ys, upper - 1, x)
        }
    }
}

/// Linear interpolation over increasing `xs`, holding the end values outside
/// the table.
pub fn interp_clamped<T: Scalar>(xs: &[T], ys: &[T], x: T) -> T {
    debug_assert_eq!(xs.len(), ys.len());
    let n = xs.len();
    if n == 0 {
        return T::nan();
    }
    if x.is_nan() {
        return x;
    }
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[n - 1] {
        return ys[n - 1];
    }
    let upper = xs.partition_point(|&xi| xi <= x).clamp(1, n - 1);
    segment(xs, ys, upper - 1, x)
}

fn segment<T: Scalar>(xs: &[T], ys: &[T], lower: usize, x: T) -> T {
    let (x0, x1) = (xs[lower], xs[lower + 1]);
    let (y0, y1) = (ys[lower], ys[lower + 1]);
    let width = x1 - x0;
    if width == T::zero() {
        return y0;
    }
    y0 + (y1 - y0) * (x - x0) / width
}

/// Sorted, de-duplicated union of breakpoints.
pub fn sorted_union<I>(values: I) -> Vec<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut out: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
    out.sort_by(|a, b| a.total_cmp(b));
    out.dedup();
    out
}

/// A uniformly spaced, increasing sequence of nodes `start + i * step`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UniformGrid {
    start: f64,
    step: f64,
    len: usize,
}

impl UniformGrid {
    pub fn new(start: f64, step: f64, len: usize) -> Result<Self, ConfigError> {
        if !start.is_finite() {
            return Err(ConfigError::InvalidInput(
                "Grid start must be finite.".to_string(),
            ));
        }
        if !(step > 0.0) || !step.is_finite() {
            return Err(ConfigError::InvalidInput(format!(
                "Grid step must be positive and finite, got {step}."
            )));
        }
        if len < 2 {
            return Err(ConfigError::InvalidInput(format!(
                "Grid needs at least two nodes, got {len}."
            )));
        }
        Ok(Self { start, step, len })
    }

    /// Grid covering `[floor(lo), ceil(hi)]` with the given spacing.
    pub fn spanning(lo: f64, hi: f64, step: f64) -> Result<Self, ConfigError> {
        if !lo.is_finite() || !hi.is_finite() || hi < lo {
            return Err(ConfigError::InvalidInput(format!(
                "Cannot span a grid over [{lo}, {hi}]."
            )));
        }
        let start = lo.floor();
        let end = hi.ceil();
        let intervals = ((end - start) / step).round().max(1.0);
        Self::new(start, step, intervals as usize + 1)
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn end(&self) -> f64 {
        self.point(self.len - 1)
    }

    pub fn point(&self, index: usize) -> f64 {
        self.start + index as f64 * self.step
    }

    pub fn points(&self) -> Vec<f64> {
        (0..self.len).map(|i| self.point(i)).collect()
    }

    /// Locates the segment containing `x` in O(1).
    ///
    /// Queries outside the grid are attached to the first or last segment.
    /// A non-finite query yields a non-finite fraction.
    pub fn bracket(&self, x: f64) -> Bracket<f64> {
        let position = (x - self.start) / self.step;
        let floor = position.floor();
        let last = (self.len - 2) as f64;
        let (lower, base) = if floor < 0.0 {
            (0usize, 0.0)
        } else if floor > last {
            (self.len - 2, last)
        } else {
            (floor as usize, floor)
        };
        Bracket {
            lower,
            fraction: position - base,
        }
    }

    /// Interpolates a table sampled on this grid.
    pub fn interpolate(&self, values: &[f64], x: f64) -> f64 {
        self.bracket(x).interpolate(values)
    }
}

/// Borrow column `j` of a column-major matrix as a slice.
pub(crate) fn column(matrix: &DMatrix<f64>, j: usize) -> &[f64] {
    let rows = matrix.nrows();
    &matrix.as_slice()[j * rows..(j + 1) * rows]
}
