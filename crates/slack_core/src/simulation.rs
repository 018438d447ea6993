//! Simulation driver: resolves the initial state, integrates the grouped
//! train over a window of the rope force series and reports coupler
//! quantities at every output time.

use crate::dynamics::{CouplerOutputs, GroupParameters, TrainDynamics};
use crate::envelope::HysteresisEnvelope;
use crate::error::ConfigError;
use crate::rope::RopeForceSeries;
use crate::solvers::{IntegrationStats, Ode23, Ode23Settings};
use crate::train::TrainModel;
use crate::traits::DynamicalSystem;
use anyhow::{bail, Context, Result};
use nalgebra::{DMatrix, DMatrixView};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Initial state of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitialCondition {
    /// All states zero.
    Zero,
    /// Couplers carry the rope force at the window start, at rest, with the
    /// displacement read off the envelope side the rope force is moving along.
    /// Non-finite entries start at zero.
    SteadyState,
    /// Every state set to the same value.
    Uniform(f64),
    /// Full state `[F1, DV, DX]`; a single entry is broadcast.
    Explicit(Vec<f64>),
}

impl Default for InitialCondition {
    fn default() -> Self {
        InitialCondition::SteadyState
    }
}

impl FromStr for InitialCondition {
    type Err = ConfigError;

    /// Accepts `zero`, `steady-state` (any case) or a number to broadcast.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let keyword = s.trim();
        match keyword.to_ascii_lowercase().as_str() {
            "zero" => Ok(InitialCondition::Zero),
            "steady-state" => Ok(InitialCondition::SteadyState),
            _ => keyword
                .parse::<f64>()
                .map(InitialCondition::Uniform)
                .map_err(|_| ConfigError::UnknownInitialCondition(s.to_string())),
        }
    }
}

impl InitialCondition {
    /// Initial state vector for `groups` groups, with the steady state taken
    /// at sample `first` of `rope`.
    pub fn resolve(
        &self,
        envelope: &HysteresisEnvelope,
        rope: &RopeForceSeries,
        first: usize,
    ) -> Result<Vec<f64>, ConfigError> {
        let n = envelope.groups();
        match self {
            InitialCondition::Zero => Ok(vec![0.0; 3 * n]),
            InitialCondition::Uniform(value) => Ok(vec![*value; 3 * n]),
            InitialCondition::Explicit(values) => match values.as_slice() {
                &[value] => Ok(vec![value; 3 * n]),
                _ if values.len() == 3 * n => Ok(values.clone()),
                _ => Err(ConfigError::DimensionMismatch {
                    what: "initial state",
                    expected: 3 * n,
                    actual: values.len(),
                }),
            },
            InitialCondition::SteadyState => Ok(steady_state(envelope, rope, first)),
        }
    }
}

fn steady_state(envelope: &HysteresisEnvelope, rope: &RopeForceSeries, first: usize) -> Vec<f64> {
    let n = envelope.groups();
    let next = (first + 1).min(rope.len() - 1);
    let mut x = vec![0.0; 3 * n];
    for g in 0..n {
        let force = rope.force(first, g);
        // a flat start counts as rising
        let rising = !(rope.force(next, g) - force < 0.0);
        x[g] = force;
        x[2 * n + g] = envelope.displacement_at(g, force, rising);
    }
    let mut replaced = 0usize;
    for v in x.iter_mut().filter(|v| !v.is_finite()) {
        *v = 0.0;
        replaced += 1;
    }
    if replaced > 0 {
        log::debug!("Replaced {} non-finite steady-state entries with zero.", replaced);
    }
    x
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub ode: Ode23Settings,
    pub initial: InitialCondition,
}

/// Trajectory and per-group coupler quantities, one row per output time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub times: Vec<f64>,
    /// `[F1, DV, DX]` per row.
    pub states: DMatrix<f64>,
    pub rope_force: DMatrix<f64>,
    /// Realized coupler force.
    pub force: DMatrix<f64>,
    pub fmin: DMatrix<f64>,
    pub fmax: DMatrix<f64>,
    pub acceleration: DMatrix<f64>,
    pub derivatives: DMatrix<f64>,
    pub stats: IntegrationStats,
}

impl SimulationResult {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn groups(&self) -> usize {
        self.force.ncols()
    }

    /// Whether the run ended early because the step size underflowed.
    pub fn failed(&self) -> bool {
        self.stats.failed
    }

    pub fn unsaturated_force(&self) -> DMatrixView<'_, f64> {
        self.states.columns(0, self.groups())
    }

    pub fn relative_velocity(&self) -> DMatrixView<'_, f64> {
        self.states.columns(self.groups(), self.groups())
    }

    pub fn displacement(&self) -> DMatrixView<'_, f64> {
        self.states.columns(2 * self.groups(), self.groups())
    }
}

/// Simulates the grouped train between `t_start` and `t_end`, reporting at
/// the rope force samples inside that window.
///
/// `rope` must carry one column per group. A run whose step size underflows
/// still returns its partial trajectory with `stats.failed` set.
pub fn simulate(
    params: &GroupParameters,
    envelope: &HysteresisEnvelope,
    rope: &RopeForceSeries,
    t_start: f64,
    t_end: f64,
    settings: &SimulationSettings,
) -> Result<SimulationResult> {
    let dynamics = TrainDynamics::new(params, envelope, rope)
        .context("Rope forces, envelope and group parameters do not describe the same train.")?;
    let (first, last) = rope.window(t_start, t_end).with_context(|| {
        format!("No rope force samples between t = {t_start} and t = {t_end}.")
    })?;
    if last == first {
        bail!(
            "Simulation window [{t_start}, {t_end}] contains only one rope force sample."
        );
    }

    let x0 = settings.initial.resolve(envelope, rope, first)?;
    let tout = &rope.times()[first..=last];
    let mut solver = Ode23::new(dynamics.dimension(), settings.ode);
    let trajectory = solver
        .integrate(&dynamics, tout, &x0)
        .context("Failed to integrate train dynamics.")?;

    let n = dynamics.groups();
    let rows = trajectory.len();
    let mut result = SimulationResult {
        times: trajectory.times,
        states: trajectory.states,
        rope_force: DMatrix::zeros(rows, n),
        force: DMatrix::zeros(rows, n),
        fmin: DMatrix::zeros(rows, n),
        fmax: DMatrix::zeros(rows, n),
        acceleration: DMatrix::zeros(rows, n),
        derivatives: DMatrix::zeros(rows, 3 * n),
        stats: trajectory.stats,
    };

    let mut x = vec![0.0; 3 * n];
    let mut xdot = vec![0.0; 3 * n];
    let mut out = CouplerOutputs::new(n);
    for r in 0..rows {
        for (dst, src) in x.iter_mut().zip(result.states.row(r).iter()) {
            *dst = *src;
        }
        dynamics.evaluate(result.times[r], &x, &mut xdot, &mut out);
        for g in 0..n {
            result.rope_force[(r, g)] = out.rope_force[g];
            result.force[(r, g)] = out.force[g];
            result.fmin[(r, g)] = out.fmin[g];
            result.fmax[(r, g)] = out.fmax[g];
            result.acceleration[(r, g)] = out.acceleration[g];
        }
        for (j, v) in xdot.iter().enumerate() {
            result.derivatives[(r, j)] = *v;
        }
    }

    log::debug!(
        "Simulated {} groups over [{}, {}]: {} of {} outputs, {} steps, {} rejected, h in [{:e}, {:e}].",
        n,
        tout[0],
        tout[tout.len() - 1],
        rows,
        tout.len(),
        result.stats.nsteps,
        result.stats.nfailed,
        result.stats.hmin,
        result.stats.hmax
    );

    Ok(result)
}

impl TrainModel {
    /// Runs [`simulate`] on this model. `rope` holds one column per coupler of
    /// the whole train; the group couplers are picked by [`TrainModel::coupler_indices`].
    pub fn simulate(
        &self,
        rope: &RopeForceSeries,
        t_start: f64,
        t_end: f64,
        settings: &SimulationSettings,
    ) -> Result<SimulationResult> {
        let rope = rope
            .select_couplers(&self.coupler_indices())
            .context("Rope force series does not cover every group coupler.")?;
        simulate(
            self.params(),
            self.envelope(),
            &rope,
            t_start,
            t_end,
            settings,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupler::CouplerType;
    use crate::grid::UniformGrid;
    use crate::train::{ModelSettings, Vehicle};
    use crate::units::{KIPS, TON};

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn flat_envelope(groups: usize, force: f64) -> HysteresisEnvelope {
        let grid = UniformGrid::new(-1.0, 1.0, 3).expect("grid");
        HysteresisEnvelope::new(
            grid,
            DMatrix::from_element(3, groups, force),
            DMatrix::from_element(3, groups, force),
        )
        .expect("envelope")
    }

    fn linear_envelope(groups: usize) -> HysteresisEnvelope {
        let grid = UniformGrid::new(-1.0, 0.5, 5).expect("grid");
        let fmax = DMatrix::from_fn(5, groups, |k, _| 1000.0 * grid.point(k) + 100.0);
        let fmin = DMatrix::from_fn(5, groups, |k, _| 1000.0 * grid.point(k) - 100.0);
        HysteresisEnvelope::new(grid, fmax, fmin).expect("envelope")
    }

    fn params(groups: usize, damping: f64, kawu: f64) -> GroupParameters {
        GroupParameters {
            mass: (0..groups).map(|i| 1000.0 + 250.0 * i as f64).collect(),
            damping: vec![damping; groups],
            cushion_damping: vec![damping; groups],
            klocked: vec![1e4; groups],
            kawu: vec![kawu; groups],
        }
    }

    fn zero_start() -> SimulationSettings {
        SimulationSettings {
            initial: InitialCondition::Zero,
            ..SimulationSettings::default()
        }
    }

    #[test]
    fn balanced_train_stays_at_rest() {
        let p = GroupParameters {
            mass: vec![10.0 * TON, 10.0 * TON],
            ..params(2, 0.0, 1.0)
        };
        let envelope = flat_envelope(2, 1000.0);
        let rope = RopeForceSeries::constant(&[1000.0, 1000.0], 0.0, 10.0, 1.0).expect("rope");
        let result = simulate(&p, &envelope, &rope, 0.0, 10.0, &zero_start()).expect("simulate");

        assert!(!result.failed());
        assert_eq!(result.len(), 11);
        assert!(result.relative_velocity().iter().all(|&v| v == 0.0));
        assert!(result.displacement().iter().all(|&v| v == 0.0));
        assert!(result.force.iter().all(|&f| f == 1000.0));
        assert!(result.acceleration.iter().all(|&a| a == 0.0));

        // F1 relaxes towards the realized force through the anti-windup gain
        let f1 = result.unsaturated_force();
        assert_eq!(f1[(0, 0)], 0.0);
        for r in 1..result.len() {
            assert!(f1[(r, 0)] > f1[(r - 1, 0)]);
        }
        assert!((f1[(10, 0)] - 1000.0).abs() < 20.0);
        assert!((f1[(10, 1)] - 1000.0).abs() < 20.0);
    }

    #[test]
    fn stiff_anti_windup_late_in_time_underflows() {
        let p = params(2, 0.0, 1e12);
        let envelope = flat_envelope(2, 1000.0);
        let rope =
            RopeForceSeries::constant(&[1000.0, 1000.0], 1e6, 1e6 + 10.0, 1.0).expect("rope");
        let result =
            simulate(&p, &envelope, &rope, 1e6, 1e6 + 10.0, &zero_start()).expect("simulate");

        assert!(result.failed());
        assert!(result.len() < 11);
        assert_eq!(result.times[0], 1e6);
        assert_eq!(result.states.nrows(), result.force.nrows());
    }

    #[test]
    fn undamped_force_balance_holds_at_each_output() {
        let p = params(3, 0.0, 0.0);
        let envelope = linear_envelope(3);
        let forces = DMatrix::from_fn(21, 3, |k, g| 50.0 * (g + 1) as f64 * (0.3 * k as f64).sin());
        let rope = RopeForceSeries::uniform(0.0, 0.25, forces).expect("rope");
        let result = simulate(&p, &envelope, &rope, 0.0, 5.0, &zero_start()).expect("simulate");

        assert!(!result.failed());
        for r in 0..result.len() {
            let momentum_rate: f64 = (0..3).map(|g| p.mass[g] * result.acceleration[(r, g)]).sum();
            let external = result.force[(r, 2)] - result.rope_force[(r, 2)];
            assert!(
                (momentum_rate - external).abs() <= 1e-9 * (1.0 + external.abs()),
                "row {r}: {momentum_rate} vs {external}"
            );
        }
    }

    fn trapezoid(times: &[f64], values: impl Fn(usize) -> f64) -> f64 {
        times
            .windows(2)
            .enumerate()
            .map(|(r, w)| 0.5 * (w[1] - w[0]) * (values(r) + values(r + 1)))
            .sum()
    }

    #[test]
    fn undamped_momentum_change_matches_rope_impulse() {
        let p = params(3, 0.0, 0.0);
        let envelope = linear_envelope(3);
        let forces = DMatrix::from_fn(61, 3, |k, g| {
            80.0 * (g + 1) as f64 * (1.2 * 0.05 * k as f64 + g as f64).sin()
        });
        let rope = RopeForceSeries::uniform(0.0, 0.05, forces).expect("rope");
        let settings = SimulationSettings {
            ode: Ode23Settings {
                rtol: 1e-5,
                atol: 1e-8,
                ..Ode23Settings::default()
            },
            initial: InitialCondition::Zero,
        };
        // the last sample sits a rounding step past 3.0
        let result = simulate(&p, &envelope, &rope, 0.0, 3.5, &settings).expect("simulate");
        assert!(!result.failed());
        assert_eq!(result.len(), 61);

        // From rest, v[i] = v[0] + sum of DV[k] for k < i, and v[0] follows a[0].
        let last = result.len() - 1;
        let dv = result.relative_velocity();
        let v0 = trapezoid(&result.times, |r| result.acceleration[(r, 0)]);
        let mut velocity = v0;
        let mut momentum = p.mass[0] * v0;
        let mut scale = (p.mass[0] * v0).abs();
        for g in 1..3 {
            velocity += dv[(last, g - 1)];
            momentum += p.mass[g] * velocity;
            scale += (p.mass[g] * velocity).abs();
        }
        let impulse = trapezoid(&result.times, |r| {
            result.force[(r, 2)] - result.rope_force[(r, 2)]
        });
        scale += impulse.abs();

        assert!(scale > 1.0);
        assert!(
            (momentum - impulse).abs() <= 0.02 * scale,
            "momentum change {momentum} vs impulse {impulse}"
        );
    }

    #[test]
    fn repeated_runs_are_identical() {
        let p = params(2, 5.0, 0.1);
        let envelope = linear_envelope(2);
        let forces = DMatrix::from_fn(11, 2, |k, g| 100.0 * k as f64 - 30.0 * g as f64);
        let rope = RopeForceSeries::uniform(0.0, 0.5, forces).expect("rope");
        let settings = SimulationSettings::default();
        let first = simulate(&p, &envelope, &rope, 0.0, 5.0, &settings).expect("first");
        let second = simulate(&p, &envelope, &rope, 0.0, 5.0, &settings).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn steady_state_sits_on_the_envelope() {
        let envelope = linear_envelope(2);
        // group 0 rising, group 1 falling
        let forces = DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 300.0, 300.0, 400.0, 200.0]);
        let rope = RopeForceSeries::uniform(0.0, 1.0, forces).expect("rope");
        let x = InitialCondition::SteadyState
            .resolve(&envelope, &rope, 1)
            .expect("steady state");

        assert_eq!(&x[..2], &[300.0, 300.0]);
        assert_eq!(&x[2..4], &[0.0, 0.0]);
        let (_, fmax) = envelope.bounds(0, x[4]);
        let (fmin, _) = envelope.bounds(1, x[5]);
        assert!((fmax - 300.0).abs() < 1e-6);
        assert!((fmin - 300.0).abs() < 1e-6);
        assert!((x[4] - 0.2).abs() < 1e-9);
        assert!((x[5] - 0.4).abs() < 1e-9);
    }

    #[test]
    fn steady_state_replaces_undefined_entries() {
        let envelope = linear_envelope(1);
        let forces = DMatrix::from_column_slice(2, 1, &[f64::NAN, 1.0]);
        let rope = RopeForceSeries::uniform(0.0, 1.0, forces).expect("rope");
        let x = InitialCondition::SteadyState
            .resolve(&envelope, &rope, 0)
            .expect("steady state");
        assert_eq!(x, vec![0.0; 3]);
    }

    #[test]
    fn steady_state_replaces_infinite_rope_force() {
        let envelope = linear_envelope(2);
        let forces = DMatrix::from_row_slice(2, 2, &[f64::INFINITY, f64::NEG_INFINITY, 1.0, 1.0]);
        let rope = RopeForceSeries::uniform(0.0, 1.0, forces).expect("rope");
        let x = InitialCondition::SteadyState
            .resolve(&envelope, &rope, 0)
            .expect("steady state");

        assert!(x.iter().all(|v| v.is_finite()), "got {x:?}");
        assert_eq!(&x[..4], &[0.0; 4]);
        // the clamped inversion pins each displacement to a grid end
        assert_eq!(x[4], 1.0);
        assert_eq!(x[5], -1.0);
    }

    #[test]
    fn explicit_initial_state_is_checked() {
        let envelope = linear_envelope(2);
        let rope = RopeForceSeries::constant(&[0.0, 0.0], 0.0, 1.0, 0.5).expect("rope");
        let broadcast = InitialCondition::Explicit(vec![2.0])
            .resolve(&envelope, &rope, 0)
            .expect("broadcast");
        assert_eq!(broadcast, vec![2.0; 6]);
        assert!(matches!(
            InitialCondition::Explicit(vec![1.0, 2.0]).resolve(&envelope, &rope, 0),
            Err(ConfigError::DimensionMismatch { expected: 6, actual: 2, .. })
        ));
    }

    #[test]
    fn parses_initial_condition_keywords() {
        assert_eq!("Zero".parse::<InitialCondition>(), Ok(InitialCondition::Zero));
        assert_eq!(
            " STEADY-STATE ".parse::<InitialCondition>(),
            Ok(InitialCondition::SteadyState)
        );
        assert_eq!("0.5".parse::<InitialCondition>(), Ok(InitialCondition::Uniform(0.5)));
        assert_eq!(
            "steady".parse::<InitialCondition>(),
            Err(ConfigError::UnknownInitialCondition("steady".to_string()))
        );
    }

    #[test]
    fn rejects_windows_without_samples() {
        let p = params(1, 0.0, 0.0);
        let envelope = linear_envelope(1);
        let rope = RopeForceSeries::constant(&[0.0], 0.0, 4.0, 1.0).expect("rope");
        let settings = zero_start();
        assert_err_contains(
            simulate(&p, &envelope, &rope, 10.0, 20.0, &settings),
            "No rope force samples",
        );
        assert_err_contains(
            simulate(&p, &envelope, &rope, 1.5, 2.5, &settings),
            "only one rope force sample",
        );

        let wide = RopeForceSeries::constant(&[0.0, 0.0], 0.0, 4.0, 1.0).expect("rope");
        assert_err_contains(
            simulate(&p, &envelope, &wide, 0.0, 4.0, &settings),
            "rope force columns",
        );
    }

    #[test]
    fn simulates_a_built_consist() {
        let vehicles = vec![
            Vehicle::locomotive(200.0),
            Vehicle::car(130.0, CouplerType::cushioned(100.0, 28.0)),
            Vehicle::car(130.0, CouplerType::cushioned(100.0, 28.0)),
            Vehicle::car(130.0, CouplerType::draft_gear()),
            Vehicle::car(130.0, CouplerType::draft_gear()),
        ];
        let model = TrainModel::build(&vehicles, &ModelSettings::default()).expect("model");
        let tension = 20.0 * KIPS;
        let rope = RopeForceSeries::constant(&[tension; 5], 0.0, 10.0, 0.5).expect("rope");

        let result = model
            .simulate(&rope, 0.0, 10.0, &SimulationSettings::default())
            .expect("simulate");
        assert!(!result.failed());
        assert_eq!(result.len(), 21);
        assert_eq!(result.groups(), model.groups());
        assert!(result.states.iter().all(|v| v.is_finite()));
        for g in 0..model.groups() {
            assert!((result.rope_force[(0, g)] - tension).abs() < 1e-9);
            assert!(result.fmin[(0, g)] <= result.fmax[(0, g)]);
        }
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: SimulationSettings =
            serde_json::from_str(r#"{ "initial": "zero" }"#).expect("deserialize");
        assert_eq!(settings.initial, InitialCondition::Zero);
        assert_eq!(settings.ode, Ode23Settings::default());

        let settings: SimulationSettings = serde_json::from_str(
            r#"{ "ode": { "rtol": 1e-3 }, "initial": { "uniform": 2.5 } }"#,
        )
        .expect("deserialize");
        assert_eq!(settings.initial, InitialCondition::Uniform(2.5));
        assert_eq!(settings.ode.rtol, 1e-3);
        assert_eq!(settings.ode.atol, 1e-3);

        let settings: SimulationSettings = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(settings.initial, InitialCondition::SteadyState);
    }

    #[test]
    fn shared_model_data_is_thread_safe() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TrainModel>();
        assert_send_sync::<HysteresisEnvelope>();
        assert_send_sync::<RopeForceSeries>();
        assert_send_sync::<SimulationResult>();
    }
}
