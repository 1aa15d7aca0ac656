//! Core building blocks shared by every solver front end
//!
//! This module contains the pieces that sit between user code and the
//! Levenberg-Marquardt core:
//! - Residual and Jacobian function contracts, with closure adaptors
//! - Forward-difference numerical Jacobian
//! - Robust loss functions, including dynamic (IRLS) losses

pub mod functions;
pub mod loss_functions;
pub mod numerical_jacobian;

pub use functions::{JacobianFn, JacobianFunction, ResidualFn, ResidualFunction};
pub use loss_functions::{
    CauchyLoss, CauchyWeights, HuberLoss, HuberWeights, IrlsLoss, IrlsWeights, LossFunction,
    SmoothHuberLoss, SquaredLoss, TukeyLoss, WeightedLoss,
};
pub use numerical_jacobian::NumericalJacobianForward;

use thiserror::Error;
use tracing::error;

/// Core module specific error types
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Dimension mismatch between parameters, residuals or Jacobians
    #[error("Dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    /// Loss function rejected its configuration
    #[error("Loss function error: {0}")]
    LossFunction(String),

    /// Invalid input parameter or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| CoreError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }
}

/// Result type for core module operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Check that a vector produced by user code has the promised length.
pub(crate) fn check_dimension(what: &str, expected: usize, actual: usize) -> CoreResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(CoreError::DimensionMismatch {
            what: what.to_string(),
            expected,
            actual,
        }
        .log())
    }
}

/// Scale parameters of robust losses must be finite and strictly positive.
pub(crate) fn check_scale(scale: f64) -> CoreResult<()> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(CoreError::InvalidInput(format!(
            "scale needs to be larger than zero, got {scale}"
        ))
        .log())
    }
}
