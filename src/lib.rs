//! # lmsolve
//!
//! Levenberg-Marquardt nonlinear least squares for small dense problems and
//! large sparse ones.
//!
//! ## Features
//!
//! - **Incremental solver**: the caller drives the loop one `iterate` call at a
//!   time, or uses [`optimize`] for the standard loop
//! - **Hessian backends**: dense Cholesky (nalgebra), sparse Cholesky (faer) and
//!   a block Schur-complement backend for two-group problems
//! - **Loss functions**: squared, Huber, smooth Huber, Cauchy, Tukey, per-residual
//!   weights and iteratively reweighted losses
//! - **Numerical Jacobians**: forward differences when no analytic Jacobian is given
//!
//! ## Damping
//!
//! The damped diagonal blends Levenberg's `λI` and Marquardt's `λ·diag(H)`
//! through a mixture parameter, and the dampening is updated from the gain
//! ratio as in Nielsen's rule. See [`optimizer::levenberg_marquardt`].

// Local modules
pub mod core;
pub mod error;
pub mod linalg;
#[cfg(feature = "logging")]
pub mod logger;
pub mod optimizer;

// Re-export core types
pub use crate::core::{
    CauchyLoss, HuberLoss, IrlsLoss, JacobianFn, JacobianFunction, LossFunction,
    NumericalJacobianForward, ResidualFn, ResidualFunction, SmoothHuberLoss, SquaredLoss,
    TukeyLoss, WeightedLoss,
};
pub use error::{LmError, LmResult};

// Re-export linear algebra types
pub use linalg::{DenseHessian, HessianMath, SchurHessian, SchurJacobian, SparseHessian};

// Re-export logger
#[cfg(feature = "logging")]
pub use logger::{init_logger, init_logger_with_level};

// Re-export optimizer types
pub use optimizer::{
    DenseLeastSquares, LevenbergMarquardt, LevenbergMarquardtConfig, OptimizationStatus,
    SchurLeastSquares, SolverResult, SparseLeastSquares, UnconstrainedLeastSquares, optimize,
};
