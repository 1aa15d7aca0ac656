//! Forward-difference Jacobian for residual functions without analytic derivatives.

use nalgebra::{DMatrix, DVector};

use super::functions::ResidualFunction;

/// Forward-difference approximation of the Jacobian of a residual function.
///
/// Column `j` is `(f(x + hⱼ eⱼ) − f(x)) / hⱼ` with `hⱼ = √ε · |xⱼ|`, or `√ε`
/// when `xⱼ` is zero. The step actually taken is recomputed as
/// `(xⱼ + hⱼ) − xⱼ` so the quotient uses the representable difference.
#[derive(Debug, Clone)]
pub struct NumericalJacobianForward {
    differential_scale: f64,
    base: DVector<f64>,
    perturbed: DVector<f64>,
    point: DVector<f64>,
}

impl NumericalJacobianForward {
    pub fn new() -> Self {
        Self {
            differential_scale: f64::EPSILON.sqrt(),
            base: DVector::zeros(0),
            perturbed: DVector::zeros(0),
            point: DVector::zeros(0),
        }
    }

    /// Override the relative step size (default `√ε`).
    pub fn with_differential_scale(mut self, differential_scale: f64) -> Self {
        self.differential_scale = differential_scale;
        self
    }

    /// Step used for a parameter with value `x`.
    pub fn step_size(&self, x: f64) -> f64 {
        if x == 0.0 {
            self.differential_scale
        } else {
            self.differential_scale * x.abs()
        }
    }

    /// Evaluate the dense `M × N` Jacobian of `function` at `x`.
    pub fn compute<F: ResidualFunction + ?Sized>(
        &mut self,
        function: &mut F,
        x: &DVector<f64>,
    ) -> DMatrix<f64> {
        let m = function.num_outputs();
        let n = x.len();
        if self.base.len() != m {
            self.base = DVector::zeros(m);
            self.perturbed = DVector::zeros(m);
        }
        self.point.clone_from(x);

        function.process(x, &mut self.base);

        let mut jacobian = DMatrix::zeros(m, n);
        for j in 0..n {
            let original = x[j];
            let h = self.step_size(original);
            self.point[j] = original + h;
            let h = self.point[j] - original;

            function.process(&self.point, &mut self.perturbed);
            for i in 0..m {
                jacobian[(i, j)] = (self.perturbed[i] - self.base[i]) / h;
            }
            self.point[j] = original;
        }
        jacobian
    }
}

impl Default for NumericalJacobianForward {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::functions::ResidualFn;

    #[test]
    fn test_step_size() {
        let jac = NumericalJacobianForward::new();
        let eps_sqrt = f64::EPSILON.sqrt();
        assert_eq!(jac.step_size(0.0), eps_sqrt);
        assert!((jac.step_size(-4.0) - 4.0 * eps_sqrt).abs() < 1e-20);
    }

    #[test]
    fn test_matches_analytic_rosenbrock() {
        let mut residual = ResidualFn::new(2, 2, |x: &DVector<f64>, r: &mut DVector<f64>| {
            r[0] = 10.0 * (x[1] - x[0] * x[0]);
            r[1] = 1.0 - x[0];
        });
        let x = DVector::from_vec(vec![-1.2, 1.0]);

        let mut jac = NumericalJacobianForward::new();
        let numeric = jac.compute(&mut residual, &x);
        let analytic = DMatrix::from_row_slice(2, 2, &[-20.0 * x[0], 10.0, -1.0, 0.0]);

        assert!((numeric - analytic).norm() < 1e-5);
    }

    #[test]
    fn test_zero_parameter_uses_absolute_step() {
        let mut residual = ResidualFn::new(1, 1, |x: &DVector<f64>, r: &mut DVector<f64>| {
            r[0] = 3.0 * x[0];
        });
        let mut jac = NumericalJacobianForward::new();
        let numeric = jac.compute(&mut residual, &DVector::zeros(1));
        assert!((numeric[(0, 0)] - 3.0).abs() < 1e-6);
    }
}
