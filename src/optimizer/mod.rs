//! Optimization front ends built on the Levenberg-Marquardt core.
//!
//! - [`levenberg_marquardt`]: the damped Gauss-Newton state machine, generic
//!   over the Hessian backend
//! - [`least_squares`]: minimizers for a single residual function with a
//!   dense or sparse Jacobian
//! - [`schur_least_squares`]: the same with a Jacobian split into two blocks
//!   and a Schur-complement Hessian
//!
//! The caller owns the iteration loop. [`optimize`] provides the standard one.

use nalgebra::DVector;
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::LmResult;

pub mod least_squares;
pub mod levenberg_marquardt;
pub mod schur_least_squares;

pub use least_squares::{
    DenseLeastSquares, LeastSquaresMinimizer, ResidualModel, SparseLeastSquares,
};
pub use levenberg_marquardt::{
    IterationStats, LeastSquaresProblem, LevenbergMarquardt, LevenbergMarquardtConfig,
    LevenbergMarquardtSummary, Mode,
};
pub use schur_least_squares::SchurLeastSquares;

/// Optimizer-specific error types
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// Factorization failed and pure Marquardt damping offers no fallback
    #[error("Singular system with mixture = 0 (dampening = {dampening:.6e}), no identity damping to fall back on")]
    SingularSystem { dampening: f64 },

    /// Candidate cost is NaN or infinite
    #[error("Non-finite candidate cost: {cost}")]
    NonFiniteCost { cost: f64 },

    /// Gradient contains NaN or infinite entries
    #[error("Non-finite gradient at iteration {iteration}")]
    NonFiniteGradient { iteration: usize },

    /// Dampening or its multiplier escaped the divergence guard
    #[error("Non-finite dampening: lambda = {dampening}, nu = {nu}")]
    NonFiniteDampening { dampening: f64, nu: f64 },

    /// An internal invariant did not hold
    #[error("Internal invariant violated: {0}")]
    InvariantViolation(String),

    /// Invalid configuration or tolerances
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Parameter vector length does not match the problem
    #[error("Dimension mismatch: expected {expected} parameters, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// `iterate` was called before `initialize`
    #[error("Solver not initialized, call initialize() first")]
    NotInitialized,

    /// A previous fatal error left the solver unusable
    #[error("Solver is in a failed state, call initialize() to reset it")]
    SolverFailed,
}

impl OptimizerError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| OptimizerError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Whether this error puts the solver into its failed state.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            OptimizerError::InvalidConfig(_)
                | OptimizerError::DimensionMismatch { .. }
                | OptimizerError::NotInitialized
        )
    }
}

/// Result type for optimizer operations
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OptimizationStatus {
    /// Converged, without a more specific reason (zero actual or predicted reduction)
    Converged,
    /// `max|g| ≤ gtol`
    GradientToleranceReached,
    /// `ftol·f ≥ f − f_new` after an accepted step
    CostToleranceReached,
    /// Dampening reached `MAX_LAMBDA`, the solver can make no further progress
    DampingLimitReached,
    /// The caller's iteration cap was hit first
    MaxIterationsReached,
}

impl OptimizationStatus {
    pub fn is_converged(&self) -> bool {
        !matches!(self, OptimizationStatus::MaxIterationsReached)
    }
}

impl Display for OptimizationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::Converged => write!(f, "Converged"),
            OptimizationStatus::GradientToleranceReached => write!(f, "Gradient tolerance reached"),
            OptimizationStatus::CostToleranceReached => write!(f, "Cost tolerance reached"),
            OptimizationStatus::DampingLimitReached => write!(f, "Damping limit reached"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
        }
    }
}

/// Outcome of [`optimize`].
#[derive(Debug, Clone)]
pub struct SolverResult {
    /// Final parameters
    pub parameters: DVector<f64>,
    /// Final optimization status
    pub status: OptimizationStatus,
    /// Final cost value
    pub final_cost: f64,
    /// Number of `iterate` calls that did not finish the run
    pub iterations: usize,
}

/// Public surface shared by every least-squares minimizer.
///
/// A minimizer is set up with [`initialize`](Self::initialize) and advanced
/// one state-machine step at a time with [`iterate`](Self::iterate).
pub trait UnconstrainedLeastSquares {
    /// Reset the solver at `x0` with cost tolerance `ftol` and gradient tolerance `gtol`.
    fn initialize(&mut self, x0: &DVector<f64>, ftol: f64, gtol: f64) -> LmResult<()>;

    /// Perform one step of work. Returns `true` once converged.
    fn iterate(&mut self) -> LmResult<bool>;

    /// Current (last accepted) parameters.
    fn parameters(&self) -> &DVector<f64>;

    /// Cost at the current parameters.
    fn function_value(&self) -> f64;

    fn is_converged(&self) -> bool;

    /// `true` if the most recent `iterate` call accepted a new point.
    fn is_updated(&self) -> bool;

    /// Why the solver converged, if it has.
    fn status(&self) -> Option<OptimizationStatus> {
        None
    }
}

/// Run `solver` until it converges or `max_iterations` calls did not finish it.
///
/// The solver must already be initialized. Errors from `iterate` are
/// returned unchanged.
///
/// # Example
///
/// ```
/// use lmsolve::core::ResidualFn;
/// use lmsolve::optimizer::{DenseLeastSquares, UnconstrainedLeastSquares, optimize};
/// use nalgebra::DVector;
///
/// let residual = ResidualFn::new(2, 2, |x: &DVector<f64>, r: &mut DVector<f64>| {
///     r[0] = 10.0 * (x[1] - x[0] * x[0]);
///     r[1] = 1.0 - x[0];
/// });
/// let mut solver = DenseLeastSquares::numerical(residual);
/// solver.initialize(&DVector::from_vec(vec![-1.2, 1.0]), 1e-12, 1e-12).unwrap();
///
/// let result = optimize(&mut solver, 500).unwrap();
/// assert!(result.status.is_converged());
/// assert!((result.parameters[0] - 1.0).abs() < 1e-4);
/// ```
pub fn optimize<S: UnconstrainedLeastSquares + ?Sized>(
    solver: &mut S,
    max_iterations: usize,
) -> LmResult<SolverResult> {
    let mut iterations = 0;
    let converged = loop {
        if solver.iterate()? {
            break true;
        }
        if iterations >= max_iterations {
            break false;
        }
        iterations += 1;
    };

    let status = if converged {
        solver.status().unwrap_or(OptimizationStatus::Converged)
    } else {
        warn!(
            "Stopped after {} iterations without convergence (cost {:.6e})",
            iterations,
            solver.function_value()
        );
        OptimizationStatus::MaxIterationsReached
    };
    info!(
        "Optimization finished: {} after {} iterations, cost {:.6e}",
        status,
        iterations,
        solver.function_value()
    );

    Ok(SolverResult {
        parameters: solver.parameters().clone(),
        status,
        final_cost: solver.function_value(),
        iterations,
    })
}
