//! Integration tests for the Levenberg-Marquardt state machine
//!
//! These drive the solver one `iterate` call at a time and check the
//! observable laws of the algorithm:
//! - the committed cost never increases under a static loss
//! - dampening updates on accepted and rejected steps
//! - diagonal clamping before damping
//! - the loss is fixated once at start and once per accepted step
//! - a reweighting loss keeps the committed cost in sync with its weights

#![allow(clippy::unwrap_used)]

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use lmsolve::{
    DenseLeastSquares, LevenbergMarquardtConfig, LmError, LossFunction, OptimizationStatus,
    SparseLeastSquares, SquaredLoss, UnconstrainedLeastSquares,
    core::{HuberWeights, IrlsLoss, JacobianFn, ResidualFn},
    optimize,
    optimizer::{Mode, OptimizerError},
};
use nalgebra::{DMatrix, DVector};

use test_utils::*;

/// Squared loss that counts `fixate` calls.
struct CountingLoss {
    fixations: Rc<Cell<usize>>,
}

impl LossFunction for CountingLoss {
    fn process(&self, residuals: &DVector<f64>) -> f64 {
        SquaredLoss.process(residuals)
    }

    fn fixate(&mut self, _residuals: &DVector<f64>) -> bool {
        self.fixations.set(self.fixations.get() + 1);
        false
    }
}

/// IRLS Huber loss shared with the test, recording what `fixate` reports.
struct ReweightSpy {
    loss: Rc<RefCell<IrlsLoss<HuberWeights>>>,
    calls: Rc<Cell<usize>>,
    changes: Rc<Cell<usize>>,
}

impl LossFunction for ReweightSpy {
    fn process(&self, residuals: &DVector<f64>) -> f64 {
        self.loss.borrow().process(residuals)
    }

    fn gradient_transform(&self, residuals: &DVector<f64>) -> Option<DVector<f64>> {
        self.loss.borrow().gradient_transform(residuals)
    }

    fn fixate(&mut self, residuals: &DVector<f64>) -> bool {
        self.calls.set(self.calls.get() + 1);
        let changed = self.loss.borrow_mut().fixate(residuals);
        if changed {
            self.changes.set(self.changes.get() + 1);
        }
        changed
    }
}

#[test]
fn test_rosenbrock_reaches_minimum() -> TestResult {
    let mut solver = DenseLeastSquares::new(rosenbrock(), JacobianFn::new(rosenbrock_jacobian));
    solver.initialize(&rosenbrock_start(), 1e-12, 1e-12)?;
    let result = optimize(&mut solver, 500)?;

    assert!(result.status.is_converged());
    assert!((result.parameters - DVector::from_element(2, 1.0)).norm() < 1e-6);

    let summary = solver.summary();
    let classified = summary.accepted_steps + summary.rejected_steps + summary.solve_failures;
    assert!(classified <= summary.step_trials && summary.step_trials <= classified + 1);
    assert!(summary.initial_cost > summary.final_cost);
    Ok(())
}

#[test]
fn test_first_iterate_computes_derivatives() -> TestResult {
    let mut solver = DenseLeastSquares::new(rosenbrock(), JacobianFn::new(rosenbrock_jacobian));
    solver.initialize(&rosenbrock_start(), 1e-12, 1e-12)?;
    assert_eq!(solver.solver().mode(), Mode::ComputeDerivatives);
    assert_eq!(solver.solver().dampening(), 1e-3);
    assert_eq!(solver.solver().nu(), 2.0);

    assert!(!solver.iterate()?);
    assert_eq!(solver.solver().mode(), Mode::DetermineStep);
    assert!(!solver.is_updated());
    assert_eq!(solver.parameters(), &rosenbrock_start());
    Ok(())
}

#[test]
fn test_cost_is_monotone() -> TestResult {
    let mut solver = DenseLeastSquares::new(rosenbrock(), JacobianFn::new(rosenbrock_jacobian));
    solver.initialize(&rosenbrock_start(), 1e-14, 1e-14)?;

    let mut previous = solver.function_value();
    for _ in 0..500 {
        let done = solver.iterate()?;
        let cost = solver.function_value();
        if solver.is_updated() {
            assert!(cost < previous);
        } else {
            assert_eq!(cost, previous);
        }
        previous = cost;
        if done {
            break;
        }
    }
    assert!(solver.is_converged());
    Ok(())
}

#[test]
fn test_dampening_update_law() -> TestResult {
    // With almost no damping the first step is the Gauss-Newton step to
    // (1, -3.84), which overshoots the valley and is rejected
    let mut solver = DenseLeastSquares::new(rosenbrock(), JacobianFn::new(rosenbrock_jacobian))
        .with_config(LevenbergMarquardtConfig::new().with_dampening_initial(1e-6))?;
    solver.initialize(&rosenbrock_start(), 1e-14, 1e-14)?;

    let (mut accepted, mut rejected) = (0, 0);
    for _ in 0..1000 {
        let mode = solver.solver().mode();
        let (lambda, nu) = (solver.solver().dampening(), solver.solver().nu());
        let failures = solver.summary().solve_failures;

        let done = solver.iterate()?;
        if done {
            break;
        }
        if mode != Mode::DetermineStep || solver.summary().solve_failures != failures {
            continue;
        }

        let (lambda_new, nu_new) = (solver.solver().dampening(), solver.solver().nu());
        if solver.is_updated() {
            accepted += 1;
            let factor = lambda_new / lambda;
            assert!(factor >= 1.0 / 3.0 - 1e-12 && factor <= 2.0 + 1e-12);
            assert_eq!(nu_new, 2.0);
        } else {
            rejected += 1;
            assert_eq!(lambda_new, lambda * nu);
            assert_eq!(nu_new, 2.0 * nu);
        }
    }
    assert!(accepted > 0);
    assert!(rejected > 0);
    Ok(())
}

#[test]
fn test_diagonal_clamped_before_damping() -> TestResult {
    // Columns scaled by 1e-5 and 1e5: Hessian diagonal 1e-10 and 1e10
    let residual = ResidualFn::new(2, 2, |x: &DVector<f64>, r: &mut DVector<f64>| {
        r[0] = 1e-5 * x[0] - 1.0;
        r[1] = 1e5 * x[1] - 1.0;
    });
    let jacobian =
        JacobianFn::new(|_: &DVector<f64>| DMatrix::from_diagonal(&DVector::from_vec(vec![1e-5, 1e5])));
    let config = LevenbergMarquardtConfig::new().with_diagonal_limits(1e-6, 1e8);
    let mut solver = DenseLeastSquares::new(residual, jacobian).with_config(config.clone())?;
    solver.initialize(&DVector::zeros(2), 1e-12, 1e-12)?;

    solver.iterate()?;
    solver.iterate()?;

    let lambda = config.dampening_initial;
    let damp = |d: f64| d + lambda * (config.mixture + (1.0 - config.mixture) * d);
    let diagonal = solver.solver().damped_diagonal();
    assert!((diagonal[0] - damp(1e-6)).abs() < 1e-18);
    assert!((diagonal[1] - damp(1e8)).abs() < 1e-4);
    Ok(())
}

#[test]
fn test_hessian_scaling_handles_ill_conditioning() -> TestResult {
    let residual = ResidualFn::new(2, 3, |x: &DVector<f64>, r: &mut DVector<f64>| {
        r[0] = 1e-4 * x[0] - 1.0;
        r[1] = 1e4 * x[1] - 2.0;
        r[2] = x[0] * 1e-4 + x[1] * 1e4 - 3.0;
    });
    let config = LevenbergMarquardtConfig::new()
        .with_hessian_scaling(true)
        .with_scaling_limits(1e-6, 1e6);
    let mut solver = DenseLeastSquares::numerical(residual).with_config(config)?;
    solver.initialize(&DVector::zeros(2), 1e-14, 1e-12)?;
    let result = optimize(&mut solver, 500)?;

    assert!(result.status.is_converged());
    assert!((result.parameters[0] - 1e4).abs() < 1.0);
    assert!((result.parameters[1] - 2e-4).abs() < 1e-7);
    Ok(())
}

#[test]
fn test_fixate_once_per_accepted_step() -> TestResult {
    let fixations = Rc::new(Cell::new(0));
    let loss = CountingLoss {
        fixations: fixations.clone(),
    };
    let mut solver =
        DenseLeastSquares::new(rosenbrock(), JacobianFn::new(rosenbrock_jacobian)).with_loss(loss);
    solver.initialize(&rosenbrock_start(), 1e-12, 1e-12)?;
    assert_eq!(fixations.get(), 1);

    optimize(&mut solver, 500)?;
    assert_eq!(fixations.get(), solver.summary().accepted_steps + 1);
    Ok(())
}

#[test]
fn test_reweighting_loss_keeps_cost_current() -> TestResult {
    let loss = Rc::new(RefCell::new(IrlsLoss::huber(1.0)?));
    let calls = Rc::new(Cell::new(0));
    let changes = Rc::new(Cell::new(0));
    let spy = ReweightSpy {
        loss: loss.clone(),
        calls: calls.clone(),
        changes: changes.clone(),
    };
    let mut solver =
        DenseLeastSquares::new(line_with_outlier(), JacobianFn::new(line_jacobian)).with_loss(spy);
    solver.initialize(&DVector::zeros(2), 1e-14, 1e-10)?;
    assert_eq!(calls.get(), 1);
    assert_eq!(changes.get(), 1);

    // The committed cost is the initial cost under the fixated weights
    let expected = loss.borrow().process(&line_residuals(solver.parameters()));
    assert!((solver.function_value() - expected).abs() <= 1e-12 * expected);

    for _ in 0..500 {
        let done = solver.iterate()?;
        if solver.is_updated() {
            let expected = loss.borrow().process(&line_residuals(solver.parameters()));
            assert!((solver.function_value() - expected).abs() <= 1e-12 * expected.max(1.0));
        }
        if done {
            break;
        }
    }
    assert!(solver.is_converged());
    assert_eq!(calls.get(), solver.summary().accepted_steps + 1);
    assert!(changes.get() > 1);

    // The outlier ends up down-weighted
    assert!(loss.borrow().weights()[7] < 0.1);
    Ok(())
}

#[test]
fn test_non_finite_jacobian_is_fatal() -> TestResult {
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let jacobian = JacobianFn::new(move |x: &DVector<f64>| {
        counter.set(counter.get() + 1);
        let mut j = rosenbrock_jacobian(x);
        if counter.get() == 3 {
            j[(0, 0)] = f64::NAN;
        }
        j
    });
    let mut solver = DenseLeastSquares::new(rosenbrock(), jacobian);
    solver.initialize(&rosenbrock_start(), 1e-14, 1e-14)?;

    let err = loop {
        match solver.iterate() {
            Ok(true) => return Err("converged before the injected fault".into()),
            Ok(false) => continue,
            Err(e) => break e,
        }
    };
    assert!(matches!(
        err,
        LmError::Optimizer(OptimizerError::NonFiniteGradient { .. })
    ));
    assert!(matches!(
        solver.iterate(),
        Err(LmError::Optimizer(OptimizerError::SolverFailed))
    ));
    assert_eq!(calls.get(), 3);
    Ok(())
}

#[test]
fn test_dampening_limit_ends_run() -> TestResult {
    // The Jacobian points the wrong way, so every step raises the cost and
    // λ grows until the divergence guard fires
    let residual = ResidualFn::new(1, 1, |x: &DVector<f64>, r: &mut DVector<f64>| {
        r[0] = 1.0 + 1e6 * x[0].abs();
    });
    let jacobian = JacobianFn::new(|_: &DVector<f64>| DMatrix::from_element(1, 1, 1.0));
    let mut solver = DenseLeastSquares::new(residual, jacobian);
    solver.initialize(&DVector::zeros(1), 0.0, 0.0)?;

    let result = optimize(&mut solver, 10_000)?;
    assert_eq!(result.status, OptimizationStatus::DampingLimitReached);
    assert_eq!(solver.summary().accepted_steps, 0);
    assert!(solver.solver().dampening() >= 1e20);
    Ok(())
}

#[test]
fn test_sparse_bilinear_matches_truth() -> TestResult {
    let problem = Bilinear::random(8, 3, 7);
    let mut solver = SparseLeastSquares::new(problem.residual(), problem.sparse_jacobian());
    solver.initialize(&problem.start(0.2, 11), 1e-15, 1e-12)?;
    let result = optimize(&mut solver, 500)?;

    assert!(result.status.is_converged());
    assert!(result.final_cost < 1e-12);
    assert!((result.parameters - problem.truth()).norm() < 1e-5);
    Ok(())
}
