//! Rope forces: the quasi-static coupler forces that drive the train, sampled
//! on a uniform time grid with one column per coupler.

use crate::error::ConfigError;
use crate::grid::{column, interp_extrapolate};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Relative deviation from the first time step tolerated before a series is
/// reported as non-uniform.
const UNIFORMITY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RopeForceSeries {
    times: Vec<f64>,
    /// Rows follow `times`, columns are couplers.
    forces: DMatrix<f64>,
}

impl RopeForceSeries {
    /// Wraps a uniformly sampled series.
    ///
    /// Lookups assume the spacing of the first two samples holds throughout;
    /// a non-uniform series is accepted but logged.
    pub fn new(times: Vec<f64>, forces: DMatrix<f64>) -> Result<Self, ConfigError> {
        validate_times(&times)?;
        if forces.nrows() != times.len() {
            return Err(ConfigError::DimensionMismatch {
                what: "rope force rows",
                expected: times.len(),
                actual: forces.nrows(),
            });
        }
        if forces.ncols() == 0 {
            return Err(ConfigError::InvalidInput(
                "Rope forces must have at least one coupler column.".to_string(),
            ));
        }

        let step = times[1] - times[0];
        let worst = times
            .windows(2)
            .map(|w| ((w[1] - w[0]) - step).abs() / step)
            .fold(0.0f64, f64::max);
        if worst > UNIFORMITY_TOLERANCE {
            log::warn!(
                "Rope force series is not uniformly sampled (step deviates by {:.3e} of {}); lookups assume a constant step.",
                worst,
                step
            );
        }

        Ok(Self { times, forces })
    }

    /// Series starting at `start` with spacing `step`, one row of `forces` per sample.
    pub fn uniform(start: f64, step: f64, forces: DMatrix<f64>) -> Result<Self, ConfigError> {
        let times = (0..forces.nrows()).map(|k| start + k as f64 * step).collect();
        Self::new(times, forces)
    }

    /// Constant forces held over `[start, end]` with spacing `step`.
    pub fn constant(forces: &[f64], start: f64, end: f64, step: f64) -> Result<Self, ConfigError> {
        let samples = samples_between(start, end, step)?;
        let matrix = DMatrix::from_fn(samples, forces.len(), |_, j| forces[j]);
        Self::uniform(start, step, matrix)
    }

    /// Linearly interpolates (extrapolating at the ends) an arbitrarily
    /// sampled series onto `t_start, t_start + step, ...` until a sample
    /// reaches `t_end`.
    pub fn resample(
        times: &[f64],
        forces: &DMatrix<f64>,
        step: f64,
        t_start: f64,
        t_end: f64,
    ) -> Result<Self, ConfigError> {
        validate_times(times)?;
        if forces.nrows() != times.len() {
            return Err(ConfigError::DimensionMismatch {
                what: "rope force rows",
                expected: times.len(),
                actual: forces.nrows(),
            });
        }
        let samples = samples_between(t_start, t_end, step)?;
        let resampled = DMatrix::from_fn(samples, forces.ncols(), |k, j| {
            interp_extrapolate(times, column(forces, j), t_start + k as f64 * step)
        });
        Self::uniform(t_start, step, resampled)
    }

    /// Keeps only the given coupler columns, in order.
    pub fn select_couplers(&self, couplers: &[usize]) -> Result<Self, ConfigError> {
        if let Some(&bad) = couplers.iter().find(|&&c| c >= self.couplers()) {
            return Err(ConfigError::InvalidInput(format!(
                "Coupler column {bad} out of range for {} rope force columns.",
                self.couplers()
            )));
        }
        let forces = self.forces.select_columns(couplers.iter());
        Self::new(self.times.clone(), forces)
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn forces(&self) -> &DMatrix<f64> {
        &self.forces
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn couplers(&self) -> usize {
        self.forces.ncols()
    }

    pub fn step(&self) -> f64 {
        self.times[1] - self.times[0]
    }

    /// Index of the sample nearest to `t`, assuming a constant step.
    /// Times outside the series clamp to the first or last sample.
    pub fn sample_index(&self, t: f64) -> usize {
        let position = ((t - self.times[0]) / self.step()).round_ties_even();
        let last = self.len() - 1;
        if !(position > 0.0) {
            0
        } else if position >= last as f64 {
            last
        } else {
            position as usize
        }
    }

    pub fn force(&self, sample: usize, coupler: usize) -> f64 {
        self.forces[(sample, coupler)]
    }

    /// Inclusive sample range `[first, last]` with `t_start <= T <= t_end`.
    pub fn window(&self, t_start: f64, t_end: f64) -> Option<(usize, usize)> {
        let first = self.times.iter().position(|&t| t >= t_start)?;
        let last = self.times.iter().rposition(|&t| t <= t_end)?;
        (first <= last).then_some((first, last))
    }
}

fn validate_times(times: &[f64]) -> Result<(), ConfigError> {
    if times.len() < 2 {
        return Err(ConfigError::InvalidInput(format!(
            "Rope force series needs at least two samples, got {}.",
            times.len()
        )));
    }
    if times.iter().any(|t| !t.is_finite()) {
        return Err(ConfigError::InvalidInput(
            "Rope force times must be finite.".to_string(),
        ));
    }
    if times.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(ConfigError::InvalidInput(
            "Rope force times must be strictly increasing.".to_string(),
        ));
    }
    Ok(())
}

fn samples_between(start: f64, end: f64, step: f64) -> Result<usize, ConfigError> {
    if !(step > 0.0) || !step.is_finite() {
        return Err(ConfigError::InvalidInput(format!(
            "Sample step must be positive, got {step}."
        )));
    }
    if !start.is_finite() || !end.is_finite() || end <= start {
        return Err(ConfigError::InvalidInput(format!(
            "Cannot sample the interval [{start}, {end}]."
        )));
    }
    Ok(((end - start) / step).ceil() as usize + 1)
}
