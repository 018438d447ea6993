use crate::traits::DynamicalSystem;
use anyhow::{bail, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Added to the normalized norms so they never vanish.
const TINY: f64 = f64::MIN_POSITIVE;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ode23Settings {
    pub rtol: f64,
    pub atol: f64,
    /// Largest step as a fraction of the whole integration span.
    pub max_step_fraction: f64,
}

impl Default for Ode23Settings {
    fn default() -> Self {
        Self {
            rtol: 1e-2,
            atol: 1e-3,
            max_step_fraction: 0.1,
        }
    }
}

impl Ode23Settings {
    fn validate(&self) -> Result<()> {
        if !(self.rtol > 0.0) || !self.rtol.is_finite() {
            bail!("rtol must be positive.");
        }
        if !(self.atol > 0.0) || !self.atol.is_finite() {
            bail!("atol must be positive.");
        }
        if !(self.max_step_fraction > 0.0) || !self.max_step_fraction.is_finite() {
            bail!("max_step_fraction must be positive.");
        }
        Ok(())
    }
}

/// Step statistics of one integration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationStats {
    /// Set when the step size underflowed before the final time.
    pub failed: bool,
    /// Largest accepted step; zero if none was accepted.
    pub hmax: f64,
    /// Smallest accepted step; zero if none was accepted.
    pub hmin: f64,
    pub nsteps: usize,
    pub nfailed: usize,
}

/// States captured at the requested output times.
///
/// A failed run holds only the rows reached before the failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub times: Vec<f64>,
    /// One row per entry of `times`.
    pub states: DMatrix<f64>,
    pub stats: IntegrationStats,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Bogacki-Shampine 3(2) pair with first-same-as-last reuse and
/// infinity-norm error control.
pub struct Ode23 {
    settings: Ode23Settings,
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    tmp: Vec<f64>,
    xnew: Vec<f64>,
}

impl Ode23 {
    pub fn new(dim: usize, settings: Ode23Settings) -> Self {
        Self {
            settings,
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            tmp: vec![0.0; dim],
            xnew: vec![0.0; dim],
        }
    }

    pub fn settings(&self) -> &Ode23Settings {
        &self.settings
    }

    /// Integrates `system` from `tout[0]` to the last entry of `tout`,
    /// recording the state whenever a step lands on a requested time.
    ///
    /// Step-size underflow is not an error: the run stops, `stats.failed` is
    /// set and the rows captured so far are returned.
    pub fn integrate(
        &mut self,
        system: &impl DynamicalSystem<f64>,
        tout: &[f64],
        x0: &[f64],
    ) -> Result<Trajectory> {
        let dim = system.dimension();
        if dim == 0 {
            bail!("System has zero dimension.");
        }
        if x0.len() != dim {
            bail!(
                "Initial state has length {} but system dimension is {}.",
                x0.len(),
                dim
            );
        }
        if self.k1.len() != dim {
            bail!(
                "Solver workspace has dimension {} but system dimension is {}.",
                self.k1.len(),
                dim
            );
        }
        if tout.len() < 2 {
            bail!("At least two output times are required.");
        }
        if tout.iter().any(|t| !t.is_finite()) {
            bail!("Output times must be finite.");
        }
        if tout.windows(2).any(|w| w[1] <= w[0]) {
            bail!("Output times must be strictly increasing.");
        }
        self.settings.validate()?;

        let Ode23Settings {
            rtol,
            atol,
            max_step_fraction,
        } = self.settings;
        let threshold = atol / rtol;
        let t0 = tout[0];
        let t_end = tout[tout.len() - 1];
        let hmax = max_step_fraction * (t_end - t0);

        let mut t = t0;
        let mut x = x0.to_vec();
        let mut times = Vec::with_capacity(tout.len());
        let mut rows = Vec::with_capacity(tout.len() * dim);
        times.push(t);
        rows.extend_from_slice(&x);

        system.apply(t, &x, &mut self.k1);
        let r = self
            .k1
            .iter()
            .zip(&x)
            .fold(0.0f64, |acc, (s, xi)| acc.max((s / xi.abs().max(threshold)).abs()))
            + TINY;
        let mut h = 0.8 * rtol.cbrt() / r;

        let mut stats = IntegrationStats {
            hmin: f64::INFINITY,
            ..IntegrationStats::default()
        };
        let mut next = 1;

        while t < t_end {
            let hmin = 16.0 * f64::EPSILON * t.abs();
            h = h.min(hmax).max(hmin);

            let t_next = tout[next];
            let landing = 1.1 * h >= t_next - t;
            if landing {
                h = t_next - t;
            }
            let t_new = if landing { t_next } else { t + h };

            for i in 0..dim {
                self.tmp[i] = x[i] + 0.5 * h * self.k1[i];
            }
            system.apply(t + 0.5 * h, &self.tmp, &mut self.k2);

            for i in 0..dim {
                self.tmp[i] = x[i] + 0.75 * h * self.k2[i];
            }
            system.apply(t + 0.75 * h, &self.tmp, &mut self.k3);

            for i in 0..dim {
                self.xnew[i] =
                    x[i] + h * (2.0 * self.k1[i] + 3.0 * self.k2[i] + 4.0 * self.k3[i]) / 9.0;
            }
            system.apply(t_new, &self.xnew, &mut self.k4);

            let mut err = TINY;
            for i in 0..dim {
                let e = h
                    * (-5.0 * self.k1[i] + 6.0 * self.k2[i] + 8.0 * self.k3[i]
                        - 9.0 * self.k4[i])
                    / 72.0;
                let scale = x[i].abs().max(self.xnew[i].abs()).max(threshold);
                err = err.max((e / scale).abs());
            }
            // f64::max drops NaN, so check the pieces directly
            if !err.is_finite() || self.xnew.iter().chain(&self.k4).any(|v| !v.is_finite()) {
                err = f64::INFINITY;
            }

            if err <= rtol {
                t = t_new;
                x.copy_from_slice(&self.xnew);
                stats.hmax = stats.hmax.max(h);
                stats.hmin = stats.hmin.min(h);
                stats.nsteps += 1;
                if landing {
                    times.push(t);
                    rows.extend_from_slice(&x);
                    next = (next + 1).min(tout.len() - 1);
                }
                std::mem::swap(&mut self.k1, &mut self.k4);
            } else {
                stats.nfailed += 1;
            }

            h *= 5.0f64.min(0.8 * (rtol / err).cbrt());

            if h <= hmin && t < t_end {
                stats.failed = true;
                log::warn!(
                    "Step size {:e} too small at t = {:e}; stopping after {} of {} output times.",
                    h,
                    t,
                    times.len(),
                    tout.len()
                );
                break;
            }
        }

        if stats.nsteps == 0 {
            stats.hmin = 0.0;
        }

        let states = DMatrix::from_row_slice(times.len(), dim, &rows);
        Ok(Trajectory {
            times,
            states,
            stats,
        })
    }
}
