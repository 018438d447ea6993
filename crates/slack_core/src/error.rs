use thiserror::Error;

/// Errors raised while assembling a model or resolving simulation options.
///
/// These are always surfaced before any integration starts. Numerical trouble
/// during a run is not an error; it is reported through
/// [`IntegrationStats::failed`](crate::solvers::IntegrationStats).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Grouping limit must have 1, 2 or 3 entries, got {0}.")]
    InvalidGroupLimit(usize),

    #[error("Grouping limit for {category} couplers must be positive.")]
    ZeroGroupLimit { category: &'static str },

    #[error("Force units not common across coupler types ({first} vs {other}).")]
    InconsistentForceUnits { first: String, other: String },

    #[error("Displacement units not common across coupler types ({first} vs {other}).")]
    InconsistentLengthUnits { first: String, other: String },

    #[error("Stroke {stroke} is too small for preload {preload}: needs more than {required}.")]
    StrokeTooSmall {
        preload: f64,
        stroke: f64,
        required: f64,
    },

    #[error("Invalid initial state option \"{0}\".")]
    UnknownInitialCondition(String),

    #[error("Dimension mismatch for {what}: expected {expected}, got {actual}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{0}")]
    InvalidInput(String),
}
