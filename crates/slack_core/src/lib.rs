pub mod coupler;
pub mod dynamics;
pub mod envelope;
pub mod error;
pub mod grid;
pub mod grouping;
pub mod rope;
pub mod simulation;
pub mod solvers;
pub mod train;
/// The `slack_core` crate simulates longitudinal in-train forces: each car group is
/// a lumped mass, joined to its neighbours by an equivalent coupler whose force is
/// bounded by a hysteresis envelope and driven by quasi-static rope forces.
///
/// Key components:
/// - **Traits**: `Scalar` (numeric type abstraction), `DynamicalSystem` (ODE right-hand sides).
/// - **Couplers**: draft gear and cushioning unit tables, merged per group (`coupler`, `envelope`).
/// - **Model**: car grouping and assembly of group parameters in SI (`grouping`, `train`).
/// - **Solvers**: the Bogacki-Shampine 3(2) adaptive integrator (`Ode23`).
/// - **Simulation**: initial conditions and the run driver (`simulate`).
pub mod traits;
pub mod units;

pub use error::ConfigError;
pub use simulation::{simulate, InitialCondition, SimulationResult, SimulationSettings};
pub use train::{ModelSettings, TrainModel, Vehicle};
