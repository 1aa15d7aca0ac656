//! Least-squares minimizers for a single residual function.
//!
//! A [`ResidualModel`] combines a residual function, an optional analytic
//! Jacobian and a loss function into a [`LeastSquaresProblem`]. A
//! [`LeastSquaresMinimizer`] pairs that model with a [`LevenbergMarquardt`]
//! core and a Hessian backend.
//!
//! Without an analytic Jacobian, derivatives come from forward differences and
//! are converted into the backend's Jacobian type.

use nalgebra::DVector;
use tracing::debug;

use crate::{
    core::{
        JacobianFunction, LossFunction, NumericalJacobianForward, ResidualFunction, SquaredLoss,
        check_dimension,
    },
    error::LmResult,
    linalg::{DenseHessian, JacobianHessian, SparseHessian},
    optimizer::{
        LeastSquaresProblem, LevenbergMarquardt, LevenbergMarquardtConfig,
        LevenbergMarquardtSummary, OptimizationStatus, UnconstrainedLeastSquares,
    },
};

/// Residual function, Jacobian source and loss function of one problem.
pub struct ResidualModel<J> {
    residual: Box<dyn ResidualFunction>,
    jacobian: Option<Box<dyn JacobianFunction<J>>>,
    loss: Box<dyn LossFunction>,
    numerical: NumericalJacobianForward,
    residuals: DVector<f64>,
}

impl<J> ResidualModel<J> {
    /// Model with a squared loss and forward-difference derivatives.
    pub fn new<R: ResidualFunction + 'static>(residual: R) -> Self {
        let m = residual.num_outputs();
        Self {
            residual: Box::new(residual),
            jacobian: None,
            loss: Box::new(SquaredLoss),
            numerical: NumericalJacobianForward::new(),
            residuals: DVector::zeros(m),
        }
    }

    pub fn with_jacobian<F: JacobianFunction<J> + 'static>(mut self, jacobian: F) -> Self {
        self.jacobian = Some(Box::new(jacobian));
        self
    }

    pub fn with_loss<L: LossFunction + 'static>(mut self, loss: L) -> Self {
        self.loss = Box::new(loss);
        self
    }

    /// Replace the finite-difference settings used when no Jacobian is given.
    pub fn with_numerical_jacobian(mut self, numerical: NumericalJacobianForward) -> Self {
        self.numerical = numerical;
        self
    }

    pub fn num_residuals(&self) -> usize {
        self.residual.num_outputs()
    }

    /// Residuals from the most recent cost evaluation.
    pub fn residuals(&self) -> &DVector<f64> {
        &self.residuals
    }

    pub fn loss(&self) -> &dyn LossFunction {
        self.loss.as_ref()
    }

    pub fn has_analytic_jacobian(&self) -> bool {
        self.jacobian.is_some()
    }

    /// Check the model is consistent before a run starts.
    fn validate(&self) -> LmResult<()> {
        let m = self.residual.num_outputs();
        check_dimension("residual buffer", m, self.residuals.len())?;
        self.loss.validate(m)?;
        Ok(())
    }
}

impl<H: JacobianHessian> LeastSquaresProblem<H> for ResidualModel<H::Jacobian> {
    fn num_parameters(&self) -> usize {
        self.residual.num_inputs()
    }

    fn cost(&mut self, x: &DVector<f64>) -> LmResult<f64> {
        self.residual.process(x, &mut self.residuals);
        Ok(self.loss.process(&self.residuals))
    }

    fn compute_gradient_hessian(
        &mut self,
        x: &DVector<f64>,
        same_state: bool,
        gradient: &mut DVector<f64>,
        hessian: &mut H,
    ) -> LmResult<()> {
        if !same_state {
            self.residual.process(x, &mut self.residuals);
        }

        let jacobian = match self.jacobian.as_mut() {
            Some(jacobian) => jacobian.process(x),
            None => {
                let dense = self.numerical.compute(self.residual.as_mut(), x);
                hessian.jacobian_from_dense(&dense)?
            }
        };

        hessian.compute_hessian(&jacobian)?;
        match self.loss.gradient_transform(&self.residuals) {
            Some(transformed) => hessian.compute_gradient(&jacobian, &transformed, gradient)?,
            None => hessian.compute_gradient(&jacobian, &self.residuals, gradient)?,
        }
        Ok(())
    }

    fn fixate(&mut self) -> bool {
        self.loss.fixate(&self.residuals)
    }
}

/// Levenberg-Marquardt minimizer over a [`ResidualModel`].
///
/// # Example
///
/// ```
/// use lmsolve::core::{JacobianFn, ResidualFn};
/// use lmsolve::optimizer::{DenseLeastSquares, UnconstrainedLeastSquares};
/// use nalgebra::{DMatrix, DVector};
///
/// // Fit y = a·x + b to three points
/// let residual = ResidualFn::new(2, 3, |p: &DVector<f64>, r: &mut DVector<f64>| {
///     for (i, y) in [1.0, 3.0, 5.0].iter().enumerate() {
///         r[i] = p[0] * i as f64 + p[1] - y;
///     }
/// });
/// let jacobian = JacobianFn::new(|_: &DVector<f64>| {
///     DMatrix::from_row_slice(3, 2, &[0.0, 1.0, 1.0, 1.0, 2.0, 1.0])
/// });
///
/// let mut solver = DenseLeastSquares::new(residual, jacobian);
/// solver.initialize(&DVector::zeros(2), 1e-12, 1e-10).unwrap();
/// while !solver.iterate().unwrap() {}
/// assert!((solver.parameters()[0] - 2.0).abs() < 1e-6);
/// ```
pub struct LeastSquaresMinimizer<H: JacobianHessian> {
    model: ResidualModel<H::Jacobian>,
    solver: LevenbergMarquardt<H>,
}

/// Minimizer with a dense Jacobian and Hessian.
pub type DenseLeastSquares = LeastSquaresMinimizer<DenseHessian>;

/// Minimizer with a sparse Jacobian and Hessian.
pub type SparseLeastSquares = LeastSquaresMinimizer<SparseHessian>;

impl<H: JacobianHessian + Default> LeastSquaresMinimizer<H> {
    /// Minimizer with an analytic Jacobian and the default configuration.
    pub fn new<R, F>(residual: R, jacobian: F) -> Self
    where
        R: ResidualFunction + 'static,
        F: JacobianFunction<H::Jacobian> + 'static,
    {
        Self::from_model(ResidualModel::new(residual).with_jacobian(jacobian), H::default())
    }

    /// Minimizer using forward-difference derivatives.
    pub fn numerical<R: ResidualFunction + 'static>(residual: R) -> Self {
        Self::from_model(ResidualModel::new(residual), H::default())
    }
}

impl<H: JacobianHessian> LeastSquaresMinimizer<H> {
    /// Assemble a minimizer from a prepared model and a Hessian backend.
    pub fn from_model(model: ResidualModel<H::Jacobian>, hessian: H) -> Self {
        Self {
            model,
            solver: LevenbergMarquardt::new(hessian),
        }
    }

    pub fn with_loss<L: LossFunction + 'static>(mut self, loss: L) -> Self {
        self.model = self.model.with_loss(loss);
        self
    }

    pub fn with_config(mut self, config: LevenbergMarquardtConfig) -> LmResult<Self> {
        self.solver.configure(config)?;
        Ok(self)
    }

    /// Replace the configuration. λ₀ takes effect at the next `initialize`.
    pub fn configure(&mut self, config: LevenbergMarquardtConfig) -> LmResult<()> {
        self.solver.configure(config)
    }

    pub fn model(&self) -> &ResidualModel<H::Jacobian> {
        &self.model
    }

    /// The Levenberg-Marquardt core, for inspecting dampening and mode.
    pub fn solver(&self) -> &LevenbergMarquardt<H> {
        &self.solver
    }

    pub fn summary(&self) -> &LevenbergMarquardtSummary {
        self.solver.summary()
    }
}

impl<H: JacobianHessian> UnconstrainedLeastSquares for LeastSquaresMinimizer<H> {
    fn initialize(&mut self, x0: &DVector<f64>, ftol: f64, gtol: f64) -> LmResult<()> {
        self.model.validate()?;
        debug!(
            "Least squares with {} parameters, {} residuals, {} Jacobian",
            x0.len(),
            self.model.num_residuals(),
            if self.model.has_analytic_jacobian() {
                "analytic"
            } else {
                "numerical"
            }
        );
        self.solver.initialize(&mut self.model, x0, ftol, gtol)
    }

    fn iterate(&mut self) -> LmResult<bool> {
        self.solver.iterate(&mut self.model)
    }

    fn parameters(&self) -> &DVector<f64> {
        self.solver.parameters()
    }

    fn function_value(&self) -> f64 {
        self.solver.function_value()
    }

    fn is_converged(&self) -> bool {
        self.solver.is_converged()
    }

    fn is_updated(&self) -> bool {
        self.solver.is_updated()
    }

    fn status(&self) -> Option<OptimizationStatus> {
        self.solver.status()
    }
}
