//! Schur-complement Hessian for two-block problems.
//!
//! When the parameters split into a large, sparsely coupled "left" group and a
//! small, densely coupled "right" group (points and cameras in bundle
//! adjustment, for example), the Jacobian is supplied as two blocks `L` and
//! `R`. The Hessian then has the block structure
//!
//! ```text
//! H = [ A   B ]     A = LᵀL  (sparse, N₁ × N₁)
//!     [ Bᵀ  D ]     B = LᵀR  (dense,  N₁ × N₂)
//!                   D = RᵀR  (dense,  N₂ × N₂)
//! ```
//!
//! and `H x = b` is solved by eliminating the left block:
//!
//! 1. `D' = D − Bᵀ A⁻¹ B` and `b₂' = b₂ − Bᵀ A⁻¹ b₁`
//! 2. `D' x₂ = b₂'`
//! 3. `A x₁ = b₁ − B x₂`
//!
//! The full `(N₁ + N₂)²` matrix is never formed. The sparse factor of `A` and
//! the dense factor of `D'` are rebuilt only when their inputs changed.

use faer::{Mat, sparse::SparseColMat};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use tracing::debug;

use super::{
    HessianMath, JacobianHessian, LinAlgError, LinAlgResult, SparseMatrix, check_len,
    sparse::{
        SparseCholesky, SymmetricCsc, cross_product, normal_matrix, sparse_from_dense,
        transpose_mul_vec,
    },
};

/// Jacobian split into a left block (`M × N₁`) and a right block (`M × N₂`).
#[derive(Debug, Clone)]
pub struct SchurJacobian {
    pub left: SparseMatrix,
    pub right: SparseMatrix,
}

impl SchurJacobian {
    /// Pair two blocks that share the residual dimension.
    pub fn new(left: SparseMatrix, right: SparseMatrix) -> LinAlgResult<Self> {
        if left.nrows() != right.nrows() {
            return Err(LinAlgError::DimensionMismatch {
                expected: left.nrows(),
                actual: right.nrows(),
            });
        }
        Ok(Self { left, right })
    }

    /// Split a dense `M × N` Jacobian after column `num_left`.
    pub fn from_dense_split(dense: &DMatrix<f64>, num_left: usize) -> LinAlgResult<Self> {
        if num_left > dense.ncols() {
            return Err(LinAlgError::DimensionMismatch {
                expected: dense.ncols(),
                actual: num_left,
            });
        }
        let num_right = dense.ncols() - num_left;
        let left = sparse_from_dense(&dense.columns(0, num_left).into_owned())?;
        let right = sparse_from_dense(&dense.columns(num_left, num_right).into_owned())?;
        Ok(Self { left, right })
    }

    pub fn nrows(&self) -> usize {
        self.left.nrows()
    }

    pub fn num_left(&self) -> usize {
        self.left.ncols()
    }

    pub fn num_right(&self) -> usize {
        self.right.ncols()
    }

    /// Empty Jacobian with the given shape, handy for tests and warm starts.
    pub fn zeros(nrows: usize, num_left: usize, num_right: usize) -> LinAlgResult<Self> {
        let left: SparseMatrix = SparseColMat::try_new_from_triplets(nrows, num_left, &[])
            .map_err(|e| LinAlgError::SparseMatrixCreation(format!("{:?}", e)))?;
        let right: SparseMatrix = SparseColMat::try_new_from_triplets(nrows, num_right, &[])
            .map_err(|e| LinAlgError::SparseMatrixCreation(format!("{:?}", e)))?;
        Ok(Self { left, right })
    }
}

/// Block Hessian `[[A, B], [Bᵀ, D]]` solved through the Schur complement of `A`.
#[derive(Debug, Clone)]
pub struct SchurHessian {
    /// Split requested by the caller, used before the first Jacobian arrives.
    split: Option<usize>,
    num_left: usize,
    num_right: usize,
    a: SymmetricCsc,
    a_cholesky: SparseCholesky,
    b: DMatrix<f64>,
    d: DMatrix<f64>,
    a_inv_b: DMatrix<f64>,
    d_factor: Option<Cholesky<f64, Dyn>>,
    a_dirty: bool,
    d_dirty: bool,
}

impl SchurHessian {
    /// The split is taken from the first Jacobian passed to `compute_hessian`.
    pub fn new() -> Self {
        Self {
            split: None,
            num_left: 0,
            num_right: 0,
            a: SymmetricCsc::zeros(0),
            a_cholesky: SparseCholesky::new(),
            b: DMatrix::zeros(0, 0),
            d: DMatrix::zeros(0, 0),
            a_inv_b: DMatrix::zeros(0, 0),
            d_factor: None,
            a_dirty: true,
            d_dirty: true,
        }
    }

    /// Fix the split up front: the first `num_left` parameters form block `A`.
    ///
    /// Needed when Jacobians are produced by finite differences, which only
    /// yield a dense matrix.
    pub fn with_split(num_left: usize) -> Self {
        Self {
            split: Some(num_left),
            ..Self::new()
        }
    }

    pub fn num_left(&self) -> usize {
        self.num_left
    }

    pub fn num_right(&self) -> usize {
        self.num_right
    }

    /// The dense coupling block `B = LᵀR`.
    pub fn coupling(&self) -> &DMatrix<f64> {
        &self.b
    }

    fn resize(&mut self, num_left: usize, num_right: usize) {
        self.num_left = num_left;
        self.num_right = num_right;
        self.a = SymmetricCsc::zeros(num_left);
        self.a_cholesky.invalidate();
        self.b = DMatrix::zeros(num_left, num_right);
        self.d = DMatrix::zeros(num_right, num_right);
        self.a_inv_b = DMatrix::zeros(num_left, num_right);
        self.d_factor = None;
        self.mark_dirty();
    }

    fn mark_dirty(&mut self) {
        self.a_dirty = true;
        self.d_dirty = true;
    }

    fn left_part(&self, v: &DVector<f64>) -> DVector<f64> {
        v.rows(0, self.num_left).into_owned()
    }

    fn right_part(&self, v: &DVector<f64>) -> DVector<f64> {
        v.rows(self.num_left, self.num_right).into_owned()
    }

    fn solve_a(&self, rhs: &DVector<f64>) -> LinAlgResult<DVector<f64>> {
        if self.num_left == 0 {
            return Ok(DVector::zeros(0));
        }
        self.a_cholesky.solve_vec(rhs)
    }

    /// Factorize `A` and refresh `A⁻¹B`. `Ok(false)` if `A` is not positive definite.
    fn factorize_a(&mut self) -> LinAlgResult<bool> {
        if self.num_left == 0 {
            self.a_inv_b = DMatrix::zeros(0, self.num_right);
            return Ok(true);
        }
        if !self.a_cholesky.factorize(&self.a)? {
            debug!("Schur block A is not positive definite");
            return Ok(false);
        }
        if self.num_right == 0 {
            return Ok(true);
        }

        let b = Mat::from_fn(self.num_left, self.num_right, |i, j| self.b[(i, j)]);
        let x = self.a_cholesky.solve_mat(&b)?;
        self.a_inv_b = DMatrix::from_fn(self.num_left, self.num_right, |i, j| x[(i, j)]);
        Ok(true)
    }

    /// Factorize the reduced system `D' = D − Bᵀ A⁻¹ B`.
    fn factorize_reduced(&mut self) -> bool {
        if self.num_right == 0 {
            return true;
        }
        let reduced = &self.d - self.b.tr_mul(&self.a_inv_b);
        self.d_factor = reduced.cholesky();
        self.d_factor.is_some()
    }
}

impl Default for SchurHessian {
    fn default() -> Self {
        Self::new()
    }
}

impl HessianMath for SchurHessian {
    fn init(&mut self, n: usize) {
        let num_left = self.split.map_or(n, |split| split.min(n));
        self.resize(num_left, n - num_left);
    }

    fn num_parameters(&self) -> usize {
        self.num_left + self.num_right
    }

    fn inner_vector_hessian(&self, v: &DVector<f64>) -> LinAlgResult<f64> {
        check_len(self.num_parameters(), v)?;
        let v1 = self.left_part(v);
        let v2 = self.right_part(v);
        Ok(self.a.quadratic_form(&v1) + 2.0 * v1.dot(&(&self.b * &v2)) + v2.dot(&(&self.d * &v2)))
    }

    fn extract_diagonals(&self, out: &mut DVector<f64>) -> LinAlgResult<()> {
        check_len(self.num_parameters(), out)?;
        let mut left = DVector::zeros(self.num_left);
        self.a.diagonal(&mut left);
        out.rows_mut(0, self.num_left).copy_from(&left);
        out.rows_mut(self.num_left, self.num_right)
            .copy_from(&self.d.diagonal());
        Ok(())
    }

    fn set_diagonals(&mut self, diag: &DVector<f64>) -> LinAlgResult<()> {
        check_len(self.num_parameters(), diag)?;
        let left = self.left_part(diag);
        let right = self.right_part(diag);
        self.a.set_diagonal(&left);
        self.d.set_diagonal(&right);
        self.mark_dirty();
        Ok(())
    }

    fn divide_rows_cols(&mut self, scale: &DVector<f64>) -> LinAlgResult<()> {
        check_len(self.num_parameters(), scale)?;
        let s1 = self.left_part(scale);
        let s2 = self.right_part(scale);

        self.a.scale(&s1);
        for j in 0..self.num_right {
            for i in 0..self.num_left {
                self.b[(i, j)] /= s1[i] * s2[j];
            }
            for i in 0..self.num_right {
                self.d[(i, j)] /= s2[i] * s2[j];
            }
        }
        self.mark_dirty();
        Ok(())
    }

    fn initialize_solver(&mut self) -> LinAlgResult<bool> {
        if self.a_dirty {
            self.d_factor = None;
            if !self.factorize_a()? {
                return Ok(false);
            }
            self.a_dirty = false;
            self.d_dirty = true;
        }
        if self.d_dirty {
            if !self.factorize_reduced() {
                return Ok(false);
            }
            self.d_dirty = false;
        }
        Ok(true)
    }

    fn solve(&mut self, rhs: &DVector<f64>, out: &mut DVector<f64>) -> LinAlgResult<()> {
        check_len(self.num_parameters(), rhs)?;
        check_len(self.num_parameters(), out)?;
        let left_ready = self.num_left == 0 || self.a_cholesky.is_factorized();
        let right_ready = self.num_right == 0 || self.d_factor.is_some();
        if !left_ready || !right_ready {
            return Err(LinAlgError::NotFactorized);
        }

        let b1 = self.left_part(rhs);
        let b2 = self.right_part(rhs);

        let x2 = match self.d_factor.as_ref() {
            Some(factor) if self.num_right > 0 => {
                let y1 = self.solve_a(&b1)?;
                let reduced_rhs = &b2 - self.b.tr_mul(&y1);
                factor.solve(&reduced_rhs)
            }
            _ => DVector::zeros(0),
        };
        let x1 = self.solve_a(&(&b1 - &self.b * &x2))?;

        out.rows_mut(0, self.num_left).copy_from(&x1);
        out.rows_mut(self.num_left, self.num_right).copy_from(&x2);
        Ok(())
    }
}

impl JacobianHessian for SchurHessian {
    type Jacobian = SchurJacobian;

    fn compute_hessian(&mut self, jacobian: &SchurJacobian) -> LinAlgResult<()> {
        let total = jacobian.num_left() + jacobian.num_right();
        if total != self.num_parameters() {
            return Err(LinAlgError::DimensionMismatch {
                expected: self.num_parameters(),
                actual: total,
            });
        }
        if jacobian.num_left() != self.num_left {
            self.resize(jacobian.num_left(), jacobian.num_right());
        }

        self.a = SymmetricCsc::from_sparse(&normal_matrix(&jacobian.left)?)?;
        self.b = cross_product(&jacobian.left, &jacobian.right)?;
        self.d = cross_product(&jacobian.right, &jacobian.right)?;
        self.a_cholesky.invalidate();
        self.d_factor = None;
        self.mark_dirty();
        Ok(())
    }

    fn compute_gradient(
        &self,
        jacobian: &SchurJacobian,
        residuals: &DVector<f64>,
        out: &mut DVector<f64>,
    ) -> LinAlgResult<()> {
        check_len(jacobian.num_left() + jacobian.num_right(), out)?;
        let mut g1 = DVector::zeros(jacobian.num_left());
        let mut g2 = DVector::zeros(jacobian.num_right());
        transpose_mul_vec(&jacobian.left, residuals, &mut g1)?;
        transpose_mul_vec(&jacobian.right, residuals, &mut g2)?;
        out.rows_mut(0, jacobian.num_left()).copy_from(&g1);
        out.rows_mut(jacobian.num_left(), jacobian.num_right())
            .copy_from(&g2);
        Ok(())
    }

    fn jacobian_from_dense(&self, dense: &DMatrix<f64>) -> LinAlgResult<SchurJacobian> {
        let num_left = self.split.unwrap_or(self.num_left).min(dense.ncols());
        SchurJacobian::from_dense_split(dense, num_left)
    }
}
