//! State derivative of the grouped train.
//!
//! The state vector holds three blocks of `n` entries, one entry per coupler
//! group: the unsaturated coupler force `F1` at `i`, the relative velocity
//! `DV` at `i + n` and the relative displacement `DX` at `i + 2n`.

use crate::envelope::HysteresisEnvelope;
use crate::error::ConfigError;
use crate::rope::RopeForceSeries;
use crate::traits::DynamicalSystem;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

/// Lumped parameters of each coupler group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupParameters {
    /// Mass of the vehicles in the group.
    pub mass: Vec<f64>,
    /// Linear damping `b`.
    pub damping: Vec<f64>,
    /// Cushioning damping `c`, multiplying `DV * DX * F`.
    pub cushion_damping: Vec<f64>,
    /// Locked spring rate.
    pub klocked: Vec<f64>,
    /// Anti-windup gain.
    pub kawu: Vec<f64>,
}

impl GroupParameters {
    pub fn groups(&self) -> usize {
        self.mass.len()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = self.groups();
        if n == 0 {
            return Err(ConfigError::InvalidInput(
                "At least one coupler group is required.".to_string(),
            ));
        }
        let others = [
            ("damping", self.damping.len()),
            ("cushion damping", self.cushion_damping.len()),
            ("locked stiffness", self.klocked.len()),
            ("anti-windup gain", self.kawu.len()),
        ];
        for (what, len) in others {
            if len != n {
                return Err(ConfigError::DimensionMismatch {
                    what,
                    expected: n,
                    actual: len,
                });
            }
        }
        Ok(())
    }
}

/// Per-group quantities produced alongside the derivative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CouplerOutputs {
    /// Rope force sample used.
    pub rope_force: Vec<f64>,
    /// Realized coupler force, `F1` saturated to the envelope.
    pub force: Vec<f64>,
    pub fmin: Vec<f64>,
    pub fmax: Vec<f64>,
    /// Net force `e` acting across each coupler.
    pub net_force: Vec<f64>,
    /// Absolute acceleration of each group.
    pub acceleration: Vec<f64>,
}

impl CouplerOutputs {
    pub fn new(groups: usize) -> Self {
        Self {
            rope_force: vec![0.0; groups],
            force: vec![0.0; groups],
            fmin: vec![0.0; groups],
            fmax: vec![0.0; groups],
            net_force: vec![0.0; groups],
            acceleration: vec![0.0; groups],
        }
    }
}

/// The grouped train as a dynamical system, borrowing the static model
/// description for the duration of one run.
pub struct TrainDynamics<'a> {
    params: &'a GroupParameters,
    envelope: &'a HysteresisEnvelope,
    rope: &'a RopeForceSeries,
    // Interior mutability so `apply` does not allocate; one instance per run.
    scratch: RefCell<CouplerOutputs>,
}

impl<'a> TrainDynamics<'a> {
    pub fn new(
        params: &'a GroupParameters,
        envelope: &'a HysteresisEnvelope,
        rope: &'a RopeForceSeries,
    ) -> Result<Self, ConfigError> {
        params.validate()?;
        let n = params.groups();
        if envelope.groups() != n {
            return Err(ConfigError::DimensionMismatch {
                what: "envelope groups",
                expected: n,
                actual: envelope.groups(),
            });
        }
        if rope.couplers() != n {
            return Err(ConfigError::DimensionMismatch {
                what: "rope force columns",
                expected: n,
                actual: rope.couplers(),
            });
        }
        Ok(Self {
            params,
            envelope,
            rope,
            scratch: RefCell::new(CouplerOutputs::new(n)),
        })
    }

    pub fn groups(&self) -> usize {
        self.params.groups()
    }

    /// Evaluates `dX/dt` at `(t, x)` into `xdot` and the per-group quantities into `out`.
    ///
    /// Non-finite states are not rejected; they show up as non-finite derivatives.
    pub fn evaluate(&self, t: f64, x: &[f64], xdot: &mut [f64], out: &mut CouplerOutputs) {
        let n = self.groups();
        debug_assert_eq!(x.len(), 3 * n);
        debug_assert_eq!(xdot.len(), 3 * n);

        let p = self.params;
        let (f1, rest) = x.split_at(n);
        let (dv, dx) = rest.split_at(n);
        let sample = self.rope.sample_index(t);

        for i in 0..n {
            let rope = self.rope.force(sample, i);
            let (fmin, fmax) = self.envelope.bounds(i, dx[i]);
            let force = if f1[i] < fmin {
                fmin
            } else if f1[i] > fmax {
                fmax
            } else {
                f1[i]
            };

            out.rope_force[i] = rope;
            out.fmin[i] = fmin;
            out.fmax[i] = fmax;
            out.force[i] = force;
            out.net_force[i] = force - rope
                + p.damping[i] * dv[i]
                + p.cushion_damping[i] * dv[i] * dx[i] * force;
        }

        let e = &out.net_force;
        out.acceleration[0] = e[0] / p.mass[0];
        for i in 1..n {
            out.acceleration[i] = (e[i] - e[i - 1]) / p.mass[i];
        }

        let a = &out.acceleration;
        for i in 0..n {
            xdot[i] = p.klocked[i] * dv[i] + p.kawu[i] * (out.force[i] - f1[i]);
            // the trailing group has nothing behind it to react against
            xdot[n + i] = if i + 1 < n { a[i + 1] - a[i] } else { 0.0 };
            xdot[2 * n + i] = dv[i];
        }
    }

    /// Convenience wrapper allocating fresh output buffers.
    pub fn outputs_at(&self, t: f64, x: &[f64]) -> (Vec<f64>, CouplerOutputs) {
        let mut xdot = vec![0.0; 3 * self.groups()];
        let mut out = CouplerOutputs::new(self.groups());
        self.evaluate(t, x, &mut xdot, &mut out);
        (xdot, out)
    }
}

impl DynamicalSystem<f64> for TrainDynamics<'_> {
    fn dimension(&self) -> usize {
        3 * self.groups()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        let mut scratch = self.scratch.borrow_mut();
        self.evaluate(t, x, out, &mut scratch);
    }
}
