//! Contracts for user-supplied residual and Jacobian functions.
//!
//! A residual function maps `N` parameters to `M` residuals. A Jacobian
//! function maps the same `N` parameters to the `M × N` matrix of partial
//! derivatives, in whatever representation the chosen Hessian backend
//! consumes (dense, sparse or split into Schur blocks).
//!
//! Both traits take `&mut self` so implementations may keep scratch buffers
//! or count evaluations. Closures can be used directly through
//! [`ResidualFn`] and [`JacobianFn`].

use nalgebra::DVector;

/// Residual function `f: ℝᴺ → ℝᴹ`.
pub trait ResidualFunction {
    /// Number of parameters `N`.
    fn num_inputs(&self) -> usize;

    /// Number of residuals `M`.
    fn num_outputs(&self) -> usize;

    /// Evaluate the residuals at `x` into `out` (length `M`).
    fn process(&mut self, x: &DVector<f64>, out: &mut DVector<f64>);
}

/// Jacobian of a residual function, producing `J` at a given point.
pub trait JacobianFunction<J> {
    /// Evaluate the Jacobian at `x`.
    fn process(&mut self, x: &DVector<f64>) -> J;
}

/// Wraps a closure `FnMut(&x, &mut residuals)` as a [`ResidualFunction`].
///
/// # Example
///
/// ```
/// use lmsolve::core::{ResidualFn, ResidualFunction};
/// use nalgebra::DVector;
///
/// let mut line = ResidualFn::new(2, 3, |x: &DVector<f64>, r: &mut DVector<f64>| {
///     for i in 0..3 {
///         r[i] = x[0] * i as f64 + x[1] - 1.0;
///     }
/// });
/// let mut r = DVector::zeros(3);
/// line.process(&DVector::from_vec(vec![0.0, 1.0]), &mut r);
/// assert_eq!(r.norm(), 0.0);
/// ```
pub struct ResidualFn<F> {
    num_inputs: usize,
    num_outputs: usize,
    function: F,
}

impl<F> ResidualFn<F>
where
    F: FnMut(&DVector<f64>, &mut DVector<f64>),
{
    pub fn new(num_inputs: usize, num_outputs: usize, function: F) -> Self {
        Self {
            num_inputs,
            num_outputs,
            function,
        }
    }
}

impl<F> ResidualFunction for ResidualFn<F>
where
    F: FnMut(&DVector<f64>, &mut DVector<f64>),
{
    fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    fn process(&mut self, x: &DVector<f64>, out: &mut DVector<f64>) {
        (self.function)(x, out)
    }
}

/// Wraps a closure `FnMut(&x) -> J` as a [`JacobianFunction`].
pub struct JacobianFn<F> {
    function: F,
}

impl<F> JacobianFn<F> {
    pub fn new(function: F) -> Self {
        Self { function }
    }
}

impl<J, F> JacobianFunction<J> for JacobianFn<F>
where
    F: FnMut(&DVector<f64>) -> J,
{
    fn process(&mut self, x: &DVector<f64>) -> J {
        (self.function)(x)
    }
}
