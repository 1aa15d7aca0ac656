//! Error types for the lmsolve library
//!
//! This module provides the main error and result types used throughout the library.
//! All errors use the `thiserror` crate for automatic trait implementations.
//!
//! # Error Hierarchy
//!
//! - **`LmError`** is the top-level error returned by the public solver APIs
//! - **Module errors** (`CoreError`, `LinAlgError`, `OptimizerError`) are wrapped inside it
//! - **Error sources** are preserved, so the full chain can be inspected
//!
//! Example error chain:
//! ```text
//! LmError::Optimizer(
//!     OptimizerError::SingularSystem { dampening: 1.0e-3 }
//! )
//! ```

use crate::{core::CoreError, linalg::LinAlgError, optimizer::OptimizerError};
use std::error::Error as StdError;
use thiserror::Error;

/// Main result type used throughout the lmsolve library
pub type LmResult<T> = Result<T, LmError>;

/// Main error type for the lmsolve library
///
/// Wraps the module-specific errors while preserving the error chain.
#[derive(Debug, Error)]
pub enum LmError {
    /// Residual/Jacobian function and loss function errors
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Optimization algorithm errors
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    /// Linear algebra errors
    #[error(transparent)]
    LinearAlgebra(#[from] LinAlgError),
}

impl LmError {
    /// Get the full error chain as a multi-line string.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// if let Err(e) = solver.iterate() {
    ///     tracing::warn!("Error chain: {}", e.chain());
    /// }
    /// ```
    pub fn chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(format!("  → {}", err));
            source = err.source();
        }

        chain.join("\n")
    }

    /// Get a compact single-line error chain for logging
    pub fn chain_compact(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        chain.join(" → ")
    }

    /// True when the error left the solver unusable until it is re-initialized.
    pub fn is_fatal(&self) -> bool {
        match self {
            LmError::Optimizer(err) => err.is_fatal(),
            LmError::LinearAlgebra(_) => true,
            LmError::Core(_) => false,
        }
    }
}
