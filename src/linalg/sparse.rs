//! Sparse Hessian backed by faer's sparse Cholesky (LLT).
//!
//! The Hessian is held in a small compressed-column container,
//! [`SymmetricCsc`], that always stores every diagonal entry. This keeps
//! `set_diagonals` a pure value update even for parameters whose Jacobian
//! column happens to be empty. The matrix is handed to faer for
//! factorization; the symbolic analysis is cached and reused for as long as
//! the sparsity pattern does not change.

use std::ops::Mul;

use faer::{
    Mat, Side,
    linalg::solvers::Solve,
    sparse::{
        SparseColMat, SymbolicSparseColMat, Triplet,
        linalg::solvers::{Llt, SymbolicLlt},
    },
};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

use super::{
    HessianMath, JacobianHessian, LinAlgError, LinAlgResult, SparseMatrix, check_len,
};

/// Symmetric matrix in compressed-column form with an explicit diagonal.
///
/// Both triangles are stored. Row indices are sorted within each column.
#[derive(Debug, Clone, Default)]
pub(crate) struct SymmetricCsc {
    n: usize,
    col_ptr: Vec<usize>,
    row_idx: Vec<usize>,
    values: Vec<f64>,
    diag_pos: Vec<usize>,
}

impl SymmetricCsc {
    /// Diagonal-only matrix of zeros.
    pub(crate) fn zeros(n: usize) -> Self {
        Self {
            n,
            col_ptr: (0..=n).collect(),
            row_idx: (0..n).collect(),
            values: vec![0.0; n],
            diag_pos: (0..n).collect(),
        }
    }

    /// Copy a square faer matrix, inserting structural zeros on missing diagonal entries.
    pub(crate) fn from_sparse(matrix: &SparseMatrix) -> LinAlgResult<Self> {
        let n = matrix.nrows();
        if matrix.ncols() != n {
            return Err(LinAlgError::DimensionMismatch {
                expected: n,
                actual: matrix.ncols(),
            });
        }

        let symbolic = matrix.symbolic();
        let mut col_ptr = Vec::with_capacity(n + 1);
        let mut row_idx = Vec::new();
        let mut values = Vec::new();
        let mut diag_pos = Vec::with_capacity(n);
        col_ptr.push(0);

        let mut column: Vec<(usize, f64)> = Vec::new();
        for col in 0..n {
            let start = row_idx.len();
            column.clear();
            column.extend(
                symbolic
                    .row_idx_of_col_raw(col)
                    .iter()
                    .copied()
                    .zip(matrix.val_of_col(col).iter().copied()),
            );
            // Only matrices built unsorted need this
            if !column.is_sorted_by_key(|&(row, _)| row) {
                column.sort_by_key(|&(row, _)| row);
            }

            let mut has_diagonal = false;
            for &(row, value) in &column {
                if row_idx.len() > start && row_idx[row_idx.len() - 1] == row {
                    let last = values.len() - 1;
                    values[last] += value;
                    continue;
                }
                if !has_diagonal && row >= col {
                    diag_pos.push(row_idx.len());
                    has_diagonal = true;
                    if row > col {
                        row_idx.push(col);
                        values.push(0.0);
                    }
                }
                row_idx.push(row);
                values.push(value);
            }
            if !has_diagonal {
                diag_pos.push(row_idx.len());
                row_idx.push(col);
                values.push(0.0);
            }
            col_ptr.push(row_idx.len());
        }

        Ok(Self {
            n,
            col_ptr,
            row_idx,
            values,
            diag_pos,
        })
    }

    pub(crate) fn dim(&self) -> usize {
        self.n
    }

    pub(crate) fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Convert into a faer matrix for factorization.
    ///
    /// The compressed arrays are handed over as they are. Rows are sorted and
    /// unique within each column, which is all faer checks for.
    pub(crate) fn to_sparse(&self) -> SparseMatrix {
        let symbolic = SymbolicSparseColMat::new_checked(
            self.n,
            self.n,
            self.col_ptr.clone(),
            None,
            self.row_idx.clone(),
        );
        SparseColMat::new(symbolic, self.values.clone())
    }

    pub(crate) fn diagonal(&self, out: &mut DVector<f64>) {
        for (i, &pos) in self.diag_pos.iter().enumerate() {
            out[i] = self.values[pos];
        }
    }

    pub(crate) fn set_diagonal(&mut self, diag: &DVector<f64>) {
        for (i, &pos) in self.diag_pos.iter().enumerate() {
            self.values[pos] = diag[i];
        }
    }

    /// `M ← S⁻¹ M S⁻¹`
    pub(crate) fn scale(&mut self, scale: &DVector<f64>) {
        for col in 0..self.n {
            for k in self.col_ptr[col]..self.col_ptr[col + 1] {
                self.values[k] /= scale[self.row_idx[k]] * scale[col];
            }
        }
    }

    /// `vᵀ M v`
    pub(crate) fn quadratic_form(&self, v: &DVector<f64>) -> f64 {
        let mut sum = 0.0;
        for col in 0..self.n {
            let mut column_sum = 0.0;
            for k in self.col_ptr[col]..self.col_ptr[col + 1] {
                column_sum += v[self.row_idx[k]] * self.values[k];
            }
            sum += column_sum * v[col];
        }
        sum
    }

    fn same_pattern(&self, col_ptr: &[usize], row_idx: &[usize]) -> bool {
        self.col_ptr == col_ptr && self.row_idx == row_idx
    }
}

/// Numeric LLT factor with a cached symbolic analysis.
#[derive(Debug, Clone, Default)]
pub(crate) struct SparseCholesky {
    symbolic: Option<SymbolicLlt<usize>>,
    pattern_col_ptr: Vec<usize>,
    pattern_row_idx: Vec<usize>,
    factor: Option<Llt<usize, f64>>,
}

impl SparseCholesky {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Factorize `matrix`.
    ///
    /// Returns `Ok(false)` when the matrix is not positive definite and an
    /// error only when faer's symbolic analysis fails.
    pub(crate) fn factorize(&mut self, matrix: &SymmetricCsc) -> LinAlgResult<bool> {
        self.factor = None;
        let sparse = matrix.to_sparse();

        let reuse = self.symbolic.is_some()
            && matrix.same_pattern(&self.pattern_col_ptr, &self.pattern_row_idx);
        if !reuse {
            let symbolic = SymbolicLlt::try_new(sparse.symbolic(), Side::Lower).map_err(|e| {
                LinAlgError::FactorizationFailed(
                    "Symbolic Cholesky decomposition failed".to_string(),
                )
                .log_with_source(e)
            })?;
            self.symbolic = Some(symbolic);
            self.pattern_col_ptr = matrix.col_ptr.clone();
            self.pattern_row_idx = matrix.row_idx.clone();
        }

        let Some(symbolic) = self.symbolic.as_ref() else {
            return Ok(false);
        };
        match Llt::try_new_with_symbolic(symbolic.clone(), sparse.as_ref(), Side::Lower) {
            Ok(llt) => {
                self.factor = Some(llt);
                Ok(true)
            }
            Err(e) => {
                debug!("Sparse Cholesky rejected matrix: {:?}", e);
                Ok(false)
            }
        }
    }

    pub(crate) fn is_factorized(&self) -> bool {
        self.factor.is_some()
    }

    pub(crate) fn invalidate(&mut self) {
        self.factor = None;
    }

    /// Solve for several right-hand sides at once.
    pub(crate) fn solve_mat(&self, rhs: &Mat<f64>) -> LinAlgResult<Mat<f64>> {
        let factor = self.factor.as_ref().ok_or(LinAlgError::NotFactorized)?;
        Ok(factor.solve(rhs))
    }

    pub(crate) fn solve_vec(&self, rhs: &DVector<f64>) -> LinAlgResult<DVector<f64>> {
        let b = Mat::from_fn(rhs.len(), 1, |i, _| rhs[i]);
        let x = self.solve_mat(&b)?;
        Ok(DVector::from_fn(rhs.len(), |i, _| x[(i, 0)]))
    }
}

/// `JᵀJ` of a sparse Jacobian, as a faer matrix.
pub(crate) fn normal_matrix(jacobian: &SparseMatrix) -> LinAlgResult<SparseMatrix> {
    Ok(jacobian
        .as_ref()
        .transpose()
        .to_col_major()
        .map_err(|e| LinAlgError::MatrixConversion(format!("Transpose failed: {:?}", e)).log())?
        .mul(jacobian.as_ref()))
}

/// `Aᵀ B` of two sparse matrices with the same row count, densified.
pub(crate) fn cross_product(a: &SparseMatrix, b: &SparseMatrix) -> LinAlgResult<DMatrix<f64>> {
    if a.nrows() != b.nrows() {
        return Err(LinAlgError::DimensionMismatch {
            expected: a.nrows(),
            actual: b.nrows(),
        });
    }
    let product = a
        .as_ref()
        .transpose()
        .to_col_major()
        .map_err(|e| LinAlgError::MatrixConversion(format!("Transpose failed: {:?}", e)).log())?
        .mul(b.as_ref());

    let mut dense = DMatrix::zeros(product.nrows(), product.ncols());
    let symbolic = product.symbolic();
    for col in 0..product.ncols() {
        let row_indices = symbolic.row_idx_of_col_raw(col);
        let col_values = product.val_of_col(col);
        for (idx, &row) in row_indices.iter().enumerate() {
            dense[(row, col)] += col_values[idx];
        }
    }
    Ok(dense)
}

/// `Jᵀ r` for a sparse Jacobian, written into `out`.
pub(crate) fn transpose_mul_vec(
    jacobian: &SparseMatrix,
    residuals: &DVector<f64>,
    out: &mut DVector<f64>,
) -> LinAlgResult<()> {
    check_len(jacobian.nrows(), residuals)?;
    check_len(jacobian.ncols(), out)?;
    let symbolic = jacobian.symbolic();
    for col in 0..jacobian.ncols() {
        let row_indices = symbolic.row_idx_of_col_raw(col);
        let col_values = jacobian.val_of_col(col);
        out[col] = row_indices
            .iter()
            .zip(col_values.iter())
            .map(|(&row, &value)| value * residuals[row])
            .sum();
    }
    Ok(())
}

/// Convert a dense matrix into a faer sparse matrix, dropping exact zeros.
pub(crate) fn sparse_from_dense(dense: &DMatrix<f64>) -> LinAlgResult<SparseMatrix> {
    let mut triplets = Vec::new();
    for col in 0..dense.ncols() {
        for row in 0..dense.nrows() {
            let value = dense[(row, col)];
            if value != 0.0 {
                triplets.push(Triplet::new(row, col, value));
            }
        }
    }
    SparseColMat::try_new_from_triplets(dense.nrows(), dense.ncols(), &triplets)
        .map_err(|e| LinAlgError::SparseMatrixCreation(format!("Dense conversion: {:?}", e)).log())
}

/// Sparse `N × N` Hessian factorized with faer's supernodal/simplicial LLT.
#[derive(Debug, Clone, Default)]
pub struct SparseHessian {
    matrix: SymmetricCsc,
    cholesky: SparseCholesky,
}

impl SparseHessian {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries (both triangles, explicit diagonal included).
    pub fn nnz(&self) -> usize {
        self.matrix.nnz()
    }

    /// Replace the matrix with a symmetric faer matrix. The factorization is discarded.
    pub fn set_matrix(&mut self, matrix: &SparseMatrix) -> LinAlgResult<()> {
        self.matrix = SymmetricCsc::from_sparse(matrix)?;
        self.cholesky.invalidate();
        Ok(())
    }

    /// The current matrix converted back to a faer sparse matrix.
    pub fn to_sparse(&self) -> SparseMatrix {
        self.matrix.to_sparse()
    }
}

impl HessianMath for SparseHessian {
    fn init(&mut self, n: usize) {
        self.matrix = SymmetricCsc::zeros(n);
        self.cholesky.invalidate();
    }

    fn num_parameters(&self) -> usize {
        self.matrix.dim()
    }

    fn inner_vector_hessian(&self, v: &DVector<f64>) -> LinAlgResult<f64> {
        check_len(self.num_parameters(), v)?;
        Ok(self.matrix.quadratic_form(v))
    }

    fn extract_diagonals(&self, out: &mut DVector<f64>) -> LinAlgResult<()> {
        check_len(self.num_parameters(), out)?;
        self.matrix.diagonal(out);
        Ok(())
    }

    fn set_diagonals(&mut self, diag: &DVector<f64>) -> LinAlgResult<()> {
        check_len(self.num_parameters(), diag)?;
        self.matrix.set_diagonal(diag);
        Ok(())
    }

    fn divide_rows_cols(&mut self, scale: &DVector<f64>) -> LinAlgResult<()> {
        check_len(self.num_parameters(), scale)?;
        self.matrix.scale(scale);
        Ok(())
    }

    fn initialize_solver(&mut self) -> LinAlgResult<bool> {
        self.cholesky.factorize(&self.matrix)
    }

    fn solve(&mut self, rhs: &DVector<f64>, out: &mut DVector<f64>) -> LinAlgResult<()> {
        check_len(self.num_parameters(), rhs)?;
        check_len(self.num_parameters(), out)?;
        out.copy_from(&self.cholesky.solve_vec(rhs)?);
        Ok(())
    }
}

impl JacobianHessian for SparseHessian {
    type Jacobian = SparseMatrix;

    fn compute_hessian(&mut self, jacobian: &SparseMatrix) -> LinAlgResult<()> {
        if jacobian.ncols() != self.num_parameters() {
            return Err(LinAlgError::DimensionMismatch {
                expected: self.num_parameters(),
                actual: jacobian.ncols(),
            });
        }
        self.matrix = SymmetricCsc::from_sparse(&normal_matrix(jacobian)?)?;
        self.cholesky.invalidate();
        Ok(())
    }

    fn compute_gradient(
        &self,
        jacobian: &SparseMatrix,
        residuals: &DVector<f64>,
        out: &mut DVector<f64>,
    ) -> LinAlgResult<()> {
        transpose_mul_vec(jacobian, residuals, out)
    }

    fn jacobian_from_dense(&self, dense: &DMatrix<f64>) -> LinAlgResult<SparseMatrix> {
        sparse_from_dense(dense)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-10;

    /// 6×4 Jacobian with column 3 structurally empty in rows 0..2.
    fn sample_jacobian() -> SparseMatrix {
        SparseColMat::try_new_from_triplets(
            6,
            4,
            &[
                Triplet::new(0, 0, 1.5),
                Triplet::new(0, 1, 0.8),
                Triplet::new(1, 1, 2.0),
                Triplet::new(1, 2, 1.2),
                Triplet::new(2, 0, 0.9),
                Triplet::new(2, 3, 1.8),
                Triplet::new(3, 2, 1.1),
                Triplet::new(3, 3, 0.7),
                Triplet::new(4, 0, 0.5),
                Triplet::new(4, 1, 0.3),
                Triplet::new(5, 0, 1.3),
                Triplet::new(5, 2, 0.9),
            ],
        )
        .unwrap()
    }

    fn to_dense(m: &SparseMatrix) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(m.nrows(), m.ncols());
        for col in 0..m.ncols() {
            let rows = m.symbolic().row_idx_of_col_raw(col);
            let vals = m.val_of_col(col);
            for (idx, &row) in rows.iter().enumerate() {
                dense[(row, col)] += vals[idx];
            }
        }
        dense
    }

    #[test]
    fn test_hessian_matches_dense_product() -> Result<(), Box<dyn std::error::Error>> {
        let jacobian = sample_jacobian();
        let dense_j = to_dense(&jacobian);

        let mut hessian = SparseHessian::new();
        hessian.init(4);
        hessian.compute_hessian(&jacobian)?;

        let expected = dense_j.transpose() * &dense_j;
        let actual = to_dense(&hessian.to_sparse());
        assert!((actual - expected).norm() < TOLERANCE);
        Ok(())
    }

    #[test]
    fn test_gradient_matches_dense_product() -> Result<(), Box<dyn std::error::Error>> {
        let jacobian = sample_jacobian();
        let residuals = DVector::from_vec(vec![1.0, -2.0, 0.5, 0.25, -1.0, 3.0]);

        let hessian = SparseHessian::new();
        let mut gradient = DVector::zeros(4);
        hessian.compute_gradient(&jacobian, &residuals, &mut gradient)?;

        let expected = to_dense(&jacobian).transpose() * &residuals;
        assert!((gradient - expected).norm() < TOLERANCE);
        Ok(())
    }

    #[test]
    fn test_missing_diagonal_is_stored() -> Result<(), Box<dyn std::error::Error>> {
        // Column 1 is empty, so JᵀJ has no structural (1, 1) entry.
        let jacobian = SparseColMat::try_new_from_triplets(
            2,
            2,
            &[Triplet::new(0, 0, 2.0), Triplet::new(1, 0, 1.0)],
        )
        .map_err(|e| format!("{e:?}"))?;
        let mut hessian = SparseHessian::new();
        hessian.init(2);
        hessian.compute_hessian(&jacobian)?;

        let diag = DVector::from_vec(vec![6.0, 4.0]);
        hessian.set_diagonals(&diag)?;
        let mut out = DVector::zeros(2);
        hessian.extract_diagonals(&mut out)?;
        assert!((out - diag).norm() < TOLERANCE);
        assert!(hessian.initialize_solver()?);
        Ok(())
    }

    #[test]
    fn test_solve_and_inner_product() -> Result<(), Box<dyn std::error::Error>> {
        let jacobian = sample_jacobian();
        let dense_j = to_dense(&jacobian);
        let dense_h = dense_j.transpose() * &dense_j;

        let mut hessian = SparseHessian::new();
        hessian.init(4);
        hessian.compute_hessian(&jacobian)?;
        assert!(hessian.initialize_solver()?);

        let rhs = DVector::from_vec(vec![1.0, 2.0, -1.0, 0.5]);
        let mut x = DVector::zeros(4);
        hessian.solve(&rhs, &mut x)?;
        assert!((&dense_h * &x - &rhs).norm() < 1e-9);

        let expected = x.dot(&(&dense_h * &x));
        assert!((hessian.inner_vector_hessian(&x)? - expected).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_symbolic_reuse_after_value_change() -> Result<(), Box<dyn std::error::Error>> {
        let mut hessian = SparseHessian::new();
        hessian.init(4);
        hessian.compute_hessian(&sample_jacobian())?;
        assert!(hessian.initialize_solver()?);

        let mut diag = DVector::zeros(4);
        hessian.extract_diagonals(&mut diag)?;
        hessian.set_diagonals(&diag.map(|d| d * 2.0))?;
        assert!(hessian.initialize_solver()?);
        assert!(hessian.cholesky.is_factorized());
        Ok(())
    }

    #[test]
    fn test_from_sparse_merges_duplicates_and_inserts_diagonal() {
        // Column 0 is unsorted with a repeated diagonal, column 1 has no
        // diagonal entry, column 2 repeats its diagonal after an off-diagonal.
        let symbolic = SymbolicSparseColMat::new_unsorted_checked(
            3,
            3,
            vec![0, 3, 4, 7],
            None,
            vec![2, 0, 0, 0, 2, 1, 2],
        );
        let matrix: SparseMatrix =
            SparseColMat::new(symbolic, vec![1.0, 2.0, 3.0, 4.0, 1.5, 7.0, 0.5]);

        let csc = SymmetricCsc::from_sparse(&matrix).unwrap();
        assert_eq!(csc.col_ptr, vec![0, 2, 4, 6]);
        assert_eq!(csc.row_idx, vec![0, 2, 0, 1, 1, 2]);
        assert_eq!(csc.values, vec![5.0, 1.0, 4.0, 0.0, 7.0, 2.0]);
        assert_eq!(csc.diag_pos, vec![0, 3, 5]);

        let mut diag = DVector::zeros(3);
        csc.diagonal(&mut diag);
        assert_eq!(diag, DVector::from_vec(vec![5.0, 0.0, 2.0]));

        let expected = DMatrix::from_row_slice(3, 3, &[5.0, 4.0, 0.0, 0.0, 0.0, 7.0, 1.0, 0.0, 2.0]);
        assert_eq!(to_dense(&csc.to_sparse()), expected);
    }

    #[test]
    fn test_divide_rows_cols() -> Result<(), Box<dyn std::error::Error>> {
        let jacobian = sample_jacobian();
        let mut hessian = SparseHessian::new();
        hessian.init(4);
        hessian.compute_hessian(&jacobian)?;
        let before = to_dense(&hessian.to_sparse());

        let scale = DVector::from_vec(vec![2.0, 1.0, 0.5, 4.0]);
        hessian.divide_rows_cols(&scale)?;
        let after = to_dense(&hessian.to_sparse());

        for i in 0..4 {
            for j in 0..4 {
                let expected = before[(i, j)] / (scale[i] * scale[j]);
                assert!((after[(i, j)] - expected).abs() < TOLERANCE);
            }
        }
        Ok(())
    }

    #[test]
    fn test_not_positive_definite() -> Result<(), Box<dyn std::error::Error>> {
        let mut hessian = SparseHessian::new();
        hessian.init(3);
        assert!(!hessian.initialize_solver()?);

        let rhs = DVector::from_vec(vec![1.0, 1.0, 1.0]);
        let mut out = DVector::zeros(3);
        assert!(matches!(
            hessian.solve(&rhs, &mut out),
            Err(LinAlgError::NotFactorized)
        ));
        Ok(())
    }
}
