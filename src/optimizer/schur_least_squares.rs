//! Least squares with a block-structured Jacobian.
//!
//! Parameters are split into a left group of size `N₁` and a right group of
//! size `N₂`, as with landmarks and camera poses in bundle adjustment. The
//! normal equations are solved through the Schur complement of the left
//! block, see [`SchurHessian`].

use crate::{
    core::{JacobianFunction, ResidualFunction},
    linalg::{SchurHessian, SchurJacobian},
    optimizer::{LeastSquaresMinimizer, ResidualModel},
};

/// Minimizer whose Jacobian is a [`SchurJacobian`].
pub type SchurLeastSquares = LeastSquaresMinimizer<SchurHessian>;

impl LeastSquaresMinimizer<SchurHessian> {
    /// Schur minimizer with an analytic block Jacobian.
    ///
    /// The split is taken from the Jacobian's left block.
    pub fn schur<R, F>(residual: R, jacobian: F) -> Self
    where
        R: ResidualFunction + 'static,
        F: JacobianFunction<SchurJacobian> + 'static,
    {
        Self::from_model(
            ResidualModel::new(residual).with_jacobian(jacobian),
            SchurHessian::new(),
        )
    }

    /// Schur minimizer with forward-difference derivatives split after
    /// parameter `num_left`.
    pub fn schur_numerical<R: ResidualFunction + 'static>(residual: R, num_left: usize) -> Self {
        Self::from_model(
            ResidualModel::new(residual),
            SchurHessian::with_split(num_left),
        )
    }
}
