//! Hessian representations for the damped normal equations.
//!
//! The optimizer core never touches a concrete matrix type. It talks to a
//! [`HessianMath`] backend that knows how to hold `JᵀJ`, read and replace its
//! diagonal, apply a symmetric scaling, factorize and solve:
//! - [`DenseHessian`] keeps a nalgebra `DMatrix` and a dense Cholesky factor
//! - [`SparseHessian`] keeps a compressed-column matrix and a faer sparse LLT
//!   whose symbolic analysis is reused while the sparsity pattern is stable
//! - [`SchurHessian`] keeps the blocks of `[[A, B], [Bᵀ, D]]` and solves by
//!   eliminating the sparse `A` block
//!
//! [`JacobianHessian`] binds each backend to the Jacobian type it is built from.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::error;

pub mod dense;
pub mod schur;
pub mod sparse;

pub use dense::DenseHessian;
pub use schur::{SchurHessian, SchurJacobian};
pub use sparse::SparseHessian;

/// Type alias for sparse matrices using faer
pub type SparseMatrix = faer::sparse::SparseColMat<usize, f64>;

/// Linear algebra specific error types for lmsolve
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Matrix factorization failed (Cholesky, LLT, ...)
    #[error("Matrix factorization failed: {0}")]
    FactorizationFailed(String),

    /// A solve was requested before any successful factorization
    #[error("No factorization available, initialize_solver() must succeed before solve()")]
    NotFactorized,

    /// Vector or matrix dimensions disagree with the Hessian size
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Failed to create sparse matrix from triplets
    #[error("Failed to create sparse matrix: {0}")]
    SparseMatrixCreation(String),

    /// Matrix format conversion failed
    #[error("Matrix conversion failed: {0}")]
    MatrixConversion(String),
}

impl LinAlgError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| LinAlgError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the original error from a third-party library
    ///
    /// # Arguments
    /// * `source_error` - The original error from faer or nalgebra (must implement Debug)
    ///
    /// # Example
    /// ```ignore
    /// SymbolicLlt::try_new(matrix.symbolic(), Side::Lower)
    ///     .map_err(|e| {
    ///         LinAlgError::FactorizationFailed(
    ///             "Symbolic Cholesky decomposition failed".to_string()
    ///         )
    ///         .log_with_source(e)
    ///     })?;
    /// ```
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Operations the Levenberg-Marquardt core needs from a Hessian approximation.
///
/// Implementations own their storage. A matrix that is not positive
/// definite is reported by `initialize_solver` as `Ok(false)`; assembly,
/// analysis and dimension failures are returned as a [`LinAlgError`].
pub trait HessianMath {
    /// Resize storage for an `n × n` Hessian and drop any stale factorization.
    fn init(&mut self, n: usize);

    /// Number of parameters `N` the Hessian was sized for.
    fn num_parameters(&self) -> usize;

    /// Returns `vᵀ H v`.
    fn inner_vector_hessian(&self, v: &DVector<f64>) -> LinAlgResult<f64>;

    /// Copy the diagonal of `H` into `out`.
    fn extract_diagonals(&self, out: &mut DVector<f64>) -> LinAlgResult<()>;

    /// Overwrite the diagonal of `H`.
    fn set_diagonals(&mut self, diag: &DVector<f64>) -> LinAlgResult<()>;

    /// Symmetric scaling `H ← S⁻¹ H S⁻¹` with `S = diag(scale)`.
    fn divide_rows_cols(&mut self, scale: &DVector<f64>) -> LinAlgResult<()>;

    /// Factorize the current matrix. Returns `Ok(false)` if it is not positive definite.
    fn initialize_solver(&mut self) -> LinAlgResult<bool>;

    /// Solve `H x = rhs` with the last successful factorization.
    fn solve(&mut self, rhs: &DVector<f64>, out: &mut DVector<f64>) -> LinAlgResult<()>;
}

/// A Hessian backend that can be assembled from a particular Jacobian representation.
pub trait JacobianHessian: HessianMath {
    /// Jacobian type produced by the user's Jacobian function.
    type Jacobian;

    /// Overwrite `H` with `JᵀJ`.
    fn compute_hessian(&mut self, jacobian: &Self::Jacobian) -> LinAlgResult<()>;

    /// Compute the gradient `Jᵀ r` into `out`.
    fn compute_gradient(
        &self,
        jacobian: &Self::Jacobian,
        residuals: &DVector<f64>,
        out: &mut DVector<f64>,
    ) -> LinAlgResult<()>;

    /// Convert a dense Jacobian (finite differences) into this backend's Jacobian type.
    fn jacobian_from_dense(&self, dense: &DMatrix<f64>) -> LinAlgResult<Self::Jacobian>;
}

/// Ensure a vector has the length the Hessian was sized for.
pub(crate) fn check_len(expected: usize, v: &DVector<f64>) -> LinAlgResult<()> {
    if v.len() == expected {
        Ok(())
    } else {
        Err(LinAlgError::DimensionMismatch {
            expected,
            actual: v.len(),
        })
    }
}
