use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// Floating-point type accepted by the table interpolation helpers.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Right-hand side `dx/dt = f(t, x)` of a state-space model, as stepped by
/// [`Ode23`](crate::solvers::Ode23).
///
/// `apply` takes `&self` and writes into `out`; implementations needing
/// scratch space keep it behind interior mutability so evaluation stays
/// allocation free.
pub trait DynamicalSystem<T: Scalar> {
    /// Length of the state vector.
    fn dimension(&self) -> usize;

    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}
