//! Integration tests comparing the Hessian backends
//!
//! The dense, sparse and Schur backends solve the same normal equations, so
//! driven from the same start they must follow the same trajectory up to
//! rounding.

#![allow(clippy::unwrap_used)]

use lmsolve::{
    DenseLeastSquares, LevenbergMarquardtConfig, SchurLeastSquares, SparseLeastSquares,
    UnconstrainedLeastSquares, optimize,
};

use test_utils::*;

fn assert_same_trajectory(
    reference: &mut dyn UnconstrainedLeastSquares,
    other: &mut dyn UnconstrainedLeastSquares,
    max_iterations: usize,
) -> TestResult {
    for _ in 0..max_iterations {
        let a = reference.iterate()?;
        let b = other.iterate()?;
        assert_eq!(a, b);
        assert_eq!(reference.is_updated(), other.is_updated());
        assert!((reference.parameters() - other.parameters()).norm() < 1e-8);
        let scale = reference.function_value().abs().max(1e-12);
        assert!((reference.function_value() - other.function_value()).abs() / scale < 1e-6);
        if a {
            break;
        }
    }
    Ok(())
}

#[test]
fn test_schur_matches_dense() -> TestResult {
    let problem = Bilinear::random(12, 4, 3);
    let x0 = problem.start(0.3, 5);

    let mut dense = DenseLeastSquares::new(problem.residual(), problem.dense_jacobian());
    let mut schur = SchurLeastSquares::schur(problem.residual(), problem.schur_jacobian());
    dense.initialize(&x0, 1e-15, 1e-12)?;
    schur.initialize(&x0, 1e-15, 1e-12)?;

    assert_same_trajectory(&mut dense, &mut schur, 8)?;
    Ok(())
}

#[test]
fn test_sparse_matches_dense() -> TestResult {
    let problem = Bilinear::random(10, 3, 21);
    let x0 = problem.start(0.3, 8);

    let mut dense = DenseLeastSquares::new(problem.residual(), problem.dense_jacobian());
    let mut sparse = SparseLeastSquares::new(problem.residual(), problem.sparse_jacobian());
    dense.initialize(&x0, 1e-15, 1e-12)?;
    sparse.initialize(&x0, 1e-15, 1e-12)?;

    assert_same_trajectory(&mut dense, &mut sparse, 8)?;
    Ok(())
}

#[test]
fn test_schur_with_hessian_scaling_matches_dense() -> TestResult {
    let problem = Bilinear::random(6, 2, 9);
    let x0 = problem.start(0.25, 1);
    let config = LevenbergMarquardtConfig::new()
        .with_hessian_scaling(true)
        .with_mixture(0.5);

    let mut dense = DenseLeastSquares::new(problem.residual(), problem.dense_jacobian())
        .with_config(config.clone())?;
    let mut schur = SchurLeastSquares::schur(problem.residual(), problem.schur_jacobian())
        .with_config(config)?;
    dense.initialize(&x0, 1e-15, 1e-12)?;
    schur.initialize(&x0, 1e-15, 1e-12)?;

    assert_same_trajectory(&mut dense, &mut schur, 8)?;
    Ok(())
}

#[test]
fn test_schur_recovers_truth() -> TestResult {
    let problem = Bilinear::random(30, 5, 17);
    let mut solver = SchurLeastSquares::schur(problem.residual(), problem.schur_jacobian());
    solver.initialize(&problem.start(0.2, 2), 1e-15, 1e-12)?;
    let result = optimize(&mut solver, 500)?;

    assert!(result.status.is_converged());
    assert!((result.parameters - problem.truth()).norm() < 1e-5);
    Ok(())
}

#[test]
fn test_schur_numerical_split() -> TestResult {
    let problem = Bilinear::random(5, 2, 4);
    let mut solver = SchurLeastSquares::schur_numerical(problem.residual(), problem.num_points);
    solver.initialize(&problem.start(0.2, 6), 1e-15, 1e-10)?;
    let result = optimize(&mut solver, 500)?;

    assert!(result.status.is_converged());
    assert!((result.parameters - problem.truth()).norm() < 1e-4);
    Ok(())
}
