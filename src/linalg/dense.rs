//! Dense Hessian backed by nalgebra.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use super::{HessianMath, JacobianHessian, LinAlgError, LinAlgResult, check_len};

/// Dense `N × N` Hessian with a dense Cholesky factor.
///
/// Suited to small problems or problems whose Jacobian has no exploitable
/// sparsity.
#[derive(Debug, Clone)]
pub struct DenseHessian {
    matrix: DMatrix<f64>,
    factor: Option<Cholesky<f64, Dyn>>,
}

impl DenseHessian {
    pub fn new() -> Self {
        Self {
            matrix: DMatrix::zeros(0, 0),
            factor: None,
        }
    }

    /// The current matrix, including any damping or scaling applied to it.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Replace the matrix directly. The factorization is discarded.
    pub fn set_matrix(&mut self, matrix: DMatrix<f64>) -> LinAlgResult<()> {
        if matrix.nrows() != matrix.ncols() {
            return Err(LinAlgError::DimensionMismatch {
                expected: matrix.nrows(),
                actual: matrix.ncols(),
            });
        }
        self.matrix = matrix;
        self.factor = None;
        Ok(())
    }
}

impl Default for DenseHessian {
    fn default() -> Self {
        Self::new()
    }
}

impl HessianMath for DenseHessian {
    fn init(&mut self, n: usize) {
        self.matrix = DMatrix::zeros(n, n);
        self.factor = None;
    }

    fn num_parameters(&self) -> usize {
        self.matrix.nrows()
    }

    fn inner_vector_hessian(&self, v: &DVector<f64>) -> LinAlgResult<f64> {
        check_len(self.num_parameters(), v)?;
        Ok(v.dot(&(&self.matrix * v)))
    }

    fn extract_diagonals(&self, out: &mut DVector<f64>) -> LinAlgResult<()> {
        check_len(self.num_parameters(), out)?;
        out.copy_from(&self.matrix.diagonal());
        Ok(())
    }

    fn set_diagonals(&mut self, diag: &DVector<f64>) -> LinAlgResult<()> {
        check_len(self.num_parameters(), diag)?;
        self.matrix.set_diagonal(diag);
        Ok(())
    }

    fn divide_rows_cols(&mut self, scale: &DVector<f64>) -> LinAlgResult<()> {
        check_len(self.num_parameters(), scale)?;
        let n = self.num_parameters();
        for j in 0..n {
            for i in 0..n {
                self.matrix[(i, j)] /= scale[i] * scale[j];
            }
        }
        Ok(())
    }

    fn initialize_solver(&mut self) -> LinAlgResult<bool> {
        self.factor = self.matrix.clone().cholesky();
        Ok(self.factor.is_some())
    }

    fn solve(&mut self, rhs: &DVector<f64>, out: &mut DVector<f64>) -> LinAlgResult<()> {
        check_len(self.num_parameters(), rhs)?;
        check_len(self.num_parameters(), out)?;
        let factor = self.factor.as_ref().ok_or(LinAlgError::NotFactorized)?;
        out.copy_from(&factor.solve(rhs));
        Ok(())
    }
}

impl JacobianHessian for DenseHessian {
    type Jacobian = DMatrix<f64>;

    fn compute_hessian(&mut self, jacobian: &DMatrix<f64>) -> LinAlgResult<()> {
        if jacobian.ncols() != self.num_parameters() {
            return Err(LinAlgError::DimensionMismatch {
                expected: self.num_parameters(),
                actual: jacobian.ncols(),
            });
        }
        self.matrix = jacobian.tr_mul(jacobian);
        self.factor = None;
        Ok(())
    }

    fn compute_gradient(
        &self,
        jacobian: &DMatrix<f64>,
        residuals: &DVector<f64>,
        out: &mut DVector<f64>,
    ) -> LinAlgResult<()> {
        check_len(jacobian.nrows(), residuals)?;
        check_len(jacobian.ncols(), out)?;
        out.copy_from(&jacobian.tr_mul(residuals));
        Ok(())
    }

    fn jacobian_from_dense(&self, dense: &DMatrix<f64>) -> LinAlgResult<DMatrix<f64>> {
        Ok(dense.clone())
    }
}
