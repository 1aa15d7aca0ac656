//! Levenberg-Marquardt state machine for nonlinear least squares.
//!
//! The solver advances one unit of work per [`LevenbergMarquardt::iterate`]
//! call, cycling through three modes:
//!
//! ```text
//!   ComputeDerivatives ──► DetermineStep ──► ComputeDerivatives   (step accepted)
//!                              │    ▲
//!                              └────┘                              (step rejected)
//!   any mode ──► Converged                                         (terminal)
//! ```
//!
//! # Algorithm
//!
//! **ComputeDerivatives** evaluates the Jacobian at `x`, forms `H = JᵀJ` and
//! the gradient `g`, and stops if `max|gᵢ| ≤ gtol`. With Hessian scaling
//! enabled, `sᵢ = clamp(√|Hᵢᵢ|, scaling_min, scaling_max)` and the system is
//! replaced by `S⁻¹HS⁻¹`, `S⁻¹g`.
//!
//! **DetermineStep** damps the diagonal,
//!
//! ```text
//! d'ᵢ = clamp(Hᵢᵢ, diagonal_min, diagonal_max)
//! Hᵢᵢ ← d'ᵢ + λ (mixture + (1 − mixture) d'ᵢ)
//! ```
//!
//! blending Levenberg's `λI` (mixture = 1) with Marquardt's `λ·diag(H)`
//! (mixture = 0), solves `H p = −g`, and evaluates `f(x + p)`. The predicted
//! reduction uses the undamped Hessian: `−(gᵀp + ½ pᵀHp)`.
//!
//! - Accepted (`f(x + p) < f(x)`): `λ ← λ·max(1/3, 1 − (2ρ − 1)³)`, `ν ← 2`,
//!   with `ρ` the ratio of actual to predicted reduction. The loss is fixated at
//!   the new point and the f-test `ftol·f ≥ f − f_new` checked.
//! - Rejected: `λ ← λ·ν`, `ν ← 2ν`.
//! - Factorization failure: `λ ← 4λ`, or a fatal error when mixture = 0.
//!
//! After every change to `λ` or `ν`, a non-finite value or `λ ≥ MAX_LAMBDA`
//! ends the run as converged.
//!
//! The update rule follows Nielsen, "Damping parameter in Marquardt's method"
//! (IMM-REP-1999-05).

use nalgebra::DVector;
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use tracing::{debug, info, warn};

use crate::{
    error::{LmError, LmResult},
    linalg::HessianMath,
    optimizer::{OptimizationStatus, OptimizerError, OptimizerResult},
};

/// The problem seen by the core: a cost, its gradient/Hessian, and the loss hook.
///
/// Implemented by the concrete minimizers, which combine a residual function,
/// a Jacobian source and a loss function.
pub trait LeastSquaresProblem<H: HessianMath> {
    /// Number of parameters `N`.
    fn num_parameters(&self) -> usize;

    /// Evaluate residuals and cost at `x`. The residuals are kept for
    /// [`fixate`](Self::fixate) and for the next derivative computation.
    fn cost(&mut self, x: &DVector<f64>) -> LmResult<f64>;

    /// Compute the gradient and the Hessian at `x`.
    ///
    /// `same_state` is `true` when the most recent [`cost`](Self::cost) call
    /// was made at this very `x`, so stored residuals can be reused.
    fn compute_gradient_hessian(
        &mut self,
        x: &DVector<f64>,
        same_state: bool,
        gradient: &mut DVector<f64>,
        hessian: &mut H,
    ) -> LmResult<()>;

    /// Forward the residuals of the last `cost` call to the loss function.
    /// Returns `true` if the loss changed.
    fn fixate(&mut self) -> bool;
}

/// State-machine mode of the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Next call evaluates Jacobian, Hessian and gradient
    ComputeDerivatives,
    /// Next call tries a damped step
    DetermineStep,
    /// Terminal, `iterate` is a no-op returning `true`
    Converged,
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Mode::ComputeDerivatives => write!(f, "compute derivatives"),
            Mode::DetermineStep => write!(f, "determine step"),
            Mode::Converged => write!(f, "converged"),
        }
    }
}

/// Configuration parameters for the Levenberg-Marquardt core.
///
/// # Builder Pattern
///
/// ```
/// use lmsolve::optimizer::LevenbergMarquardtConfig;
///
/// let config = LevenbergMarquardtConfig::new()
///     .with_dampening_initial(1e-2)
///     .with_mixture(0.5)
///     .with_hessian_scaling(true);
/// assert!(config.validate().is_ok());
/// ```
///
/// The solver keeps its own copy; changing the caller's value afterwards has
/// no effect until [`LevenbergMarquardt::configure`] is called again.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LevenbergMarquardtConfig {
    /// Initial dampening λ₀
    pub dampening_initial: f64,
    /// Blend between Levenberg (1) and Marquardt (0) damping
    pub mixture: f64,
    /// Lower clamp applied to Hessian diagonal entries before damping
    pub diagonal_min: f64,
    /// Upper clamp applied to Hessian diagonal entries before damping
    pub diagonal_max: f64,
    /// Apply symmetric diagonal scaling `S⁻¹HS⁻¹` before damping
    pub hessian_scaling: bool,
    /// Lower clamp for the scaling factors
    pub scaling_min: f64,
    /// Upper clamp for the scaling factors
    pub scaling_max: f64,
}

impl Default for LevenbergMarquardtConfig {
    fn default() -> Self {
        Self {
            dampening_initial: 1e-3,
            mixture: 1e-3,
            diagonal_min: 1e-6,
            diagonal_max: 1e32,
            hessian_scaling: false,
            scaling_min: 1e-5,
            scaling_max: 1e5,
        }
    }
}

impl LevenbergMarquardtConfig {
    /// Create a new Levenberg-Marquardt configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial dampening λ₀
    pub fn with_dampening_initial(mut self, dampening: f64) -> Self {
        self.dampening_initial = dampening;
        self
    }

    /// Set the Levenberg/Marquardt mixture in `[0, 1]`
    pub fn with_mixture(mut self, mixture: f64) -> Self {
        self.mixture = mixture;
        self
    }

    /// Set the diagonal clamp bounds
    pub fn with_diagonal_limits(mut self, min: f64, max: f64) -> Self {
        self.diagonal_min = min;
        self.diagonal_max = max;
        self
    }

    /// Enable or disable Hessian scaling
    pub fn with_hessian_scaling(mut self, hessian_scaling: bool) -> Self {
        self.hessian_scaling = hessian_scaling;
        self
    }

    /// Set the clamp bounds for the scaling factors
    pub fn with_scaling_limits(mut self, min: f64, max: f64) -> Self {
        self.scaling_min = min;
        self.scaling_max = max;
        self
    }

    /// Check every parameter, returning [`OptimizerError::InvalidConfig`] on the first bad one.
    pub fn validate(&self) -> OptimizerResult<()> {
        if !(self.dampening_initial.is_finite() && self.dampening_initial > 0.0) {
            return Err(OptimizerError::InvalidConfig(format!(
                "dampening_initial must be finite and positive, got {}",
                self.dampening_initial
            )));
        }
        if !(0.0..=1.0).contains(&self.mixture) {
            return Err(OptimizerError::InvalidConfig(format!(
                "mixture must lie in [0, 1], got {}",
                self.mixture
            )));
        }
        check_bounds("diagonal", self.diagonal_min, self.diagonal_max)?;
        check_bounds("scaling", self.scaling_min, self.scaling_max)?;
        Ok(())
    }
}

fn check_bounds(name: &str, min: f64, max: f64) -> OptimizerResult<()> {
    if !(min > 0.0 && max.is_finite() && min <= max) {
        return Err(OptimizerError::InvalidConfig(format!(
            "{name} bounds must satisfy 0 < min <= max < inf, got [{min}, {max}]"
        )));
    }
    Ok(())
}

/// One line of the per-trial trace.
#[derive(Debug, Clone)]
pub struct IterationStats {
    /// Step trial number (1-based)
    pub trial: usize,
    /// Committed cost after the trial
    pub cost: f64,
    /// Actual reduction `f(x) − f(x + p)`
    pub cost_change: f64,
    /// `max|gᵢ|` of the (possibly scaled) gradient
    pub gradient_norm: f64,
    /// `‖p‖₂` of the unscaled step
    pub step_norm: f64,
    /// Ratio of actual to predicted reduction
    pub ratio: f64,
    /// Dampening used for the trial
    pub dampening: f64,
    /// Whether the step was accepted
    pub accepted: bool,
}

impl IterationStats {
    /// Print table header
    pub fn print_header() {
        debug!(
            "{:>5}  {:>13}  {:>13}  {:>11}  {:>11}  {:>11}  {:>11}  {:>6}",
            "trial", "cost", "cost_change", "|gradient|", "|step|", "ratio", "lambda", "status"
        );
    }

    /// Print single trial line with scientific notation
    pub fn print_line(&self) {
        let status = if self.accepted { "✓" } else { "✗" };
        debug!(
            "{:>5}  {:>13.6e}  {:>13.2e}  {:>11.2e}  {:>11.2e}  {:>11.2e}  {:>11.2e}  {:>6}",
            self.trial,
            self.cost,
            self.cost_change,
            self.gradient_norm,
            self.step_norm,
            self.ratio,
            self.dampening,
            status
        );
    }
}

/// Counters and costs for one run, reset by `initialize`.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LevenbergMarquardtSummary {
    /// Cost at the initial parameters (after the first fixate)
    pub initial_cost: f64,
    /// Cost at the current parameters
    pub final_cost: f64,
    /// Number of Jacobian/Hessian evaluations
    pub derivative_evaluations: usize,
    /// Number of damped systems attempted
    pub step_trials: usize,
    /// Trials whose candidate lowered the cost
    pub accepted_steps: usize,
    /// Trials whose candidate did not lower the cost
    pub rejected_steps: usize,
    /// Trials whose damped Hessian could not be factorized
    pub solve_failures: usize,
    /// Dampening λ when the summary was taken
    pub final_dampening: f64,
    /// `max|gᵢ|` from the last derivative evaluation
    pub final_gradient_norm: f64,
    /// Why the run converged, if it has
    pub status: Option<OptimizationStatus>,
}

impl Display for LevenbergMarquardtSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Levenberg-Marquardt Final Result")?;
        match self.status {
            Some(status) => writeln!(f, "CONVERGED ({})", status)?,
            None => writeln!(f, "RUNNING")?,
        }
        writeln!(f)?;
        writeln!(f, "Cost:")?;
        writeln!(f, "  Initial:   {:.6e}", self.initial_cost)?;
        writeln!(f, "  Final:     {:.6e}", self.final_cost)?;
        writeln!(
            f,
            "  Reduction: {:.6e} ({:.2}%)",
            self.initial_cost - self.final_cost,
            100.0 * (self.initial_cost - self.final_cost) / self.initial_cost.max(1e-12)
        )?;
        writeln!(f)?;
        writeln!(f, "Steps:")?;
        writeln!(f, "  Derivative evaluations: {}", self.derivative_evaluations)?;
        writeln!(f, "  Trials:                 {}", self.step_trials)?;
        writeln!(
            f,
            "  Accepted:               {} ({:.1}%)",
            self.accepted_steps,
            100.0 * self.accepted_steps as f64 / self.step_trials.max(1) as f64
        )?;
        writeln!(f, "  Rejected:               {}", self.rejected_steps)?;
        writeln!(f, "  Factorization failures: {}", self.solve_failures)?;
        writeln!(f)?;
        writeln!(f, "Final dampening: {:.2e}", self.final_dampening)?;
        write!(f, "Final gradient:  {:.2e}", self.final_gradient_norm)
    }
}

/// Levenberg-Marquardt core, generic over the Hessian backend.
///
/// The core owns every buffer it touches. The problem is passed to each
/// call, so one problem type can drive several cores and vice versa.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt<H> {
    config: LevenbergMarquardtConfig,
    hessian: H,

    x: DVector<f64>,
    x_next: DVector<f64>,
    step: DVector<f64>,
    gradient: DVector<f64>,
    diagonal: DVector<f64>,
    damped_diagonal: DVector<f64>,
    scaling: DVector<f64>,

    fx: f64,
    dampening: f64,
    nu: f64,
    mode: Mode,
    ftol: f64,
    gtol: f64,

    initialized: bool,
    failed: bool,
    updated: bool,
    same_state: bool,
    summary: LevenbergMarquardtSummary,
}

impl<H: HessianMath> LevenbergMarquardt<H> {
    /// Dampening at or above which the run is declared converged.
    pub const MAX_LAMBDA: f64 = 1e20;

    /// Value ν is reset to after every accepted step.
    pub const NU_INITIAL: f64 = 2.0;

    /// Create a solver with the default configuration.
    pub fn new(hessian: H) -> Self {
        let config = LevenbergMarquardtConfig::default();
        Self {
            dampening: config.dampening_initial,
            config,
            hessian,
            x: DVector::zeros(0),
            x_next: DVector::zeros(0),
            step: DVector::zeros(0),
            gradient: DVector::zeros(0),
            diagonal: DVector::zeros(0),
            damped_diagonal: DVector::zeros(0),
            scaling: DVector::zeros(0),
            fx: f64::NAN,
            nu: Self::NU_INITIAL,
            mode: Mode::ComputeDerivatives,
            ftol: 0.0,
            gtol: 0.0,
            initialized: false,
            failed: false,
            updated: false,
            same_state: false,
            summary: LevenbergMarquardtSummary::default(),
        }
    }

    /// Create a solver with a validated configuration.
    pub fn with_config(config: LevenbergMarquardtConfig, hessian: H) -> LmResult<Self> {
        let mut solver = Self::new(hessian);
        solver.configure(config)?;
        Ok(solver)
    }

    /// Replace the configuration. λ₀ takes effect at the next `initialize`.
    pub fn configure(&mut self, config: LevenbergMarquardtConfig) -> LmResult<()> {
        config.validate().map_err(OptimizerError::log)?;
        self.config = config;
        Ok(())
    }

    /// Reset all state at `x0`.
    ///
    /// Evaluates the initial cost and fixates the loss once. `ftol` and
    /// `gtol` must be finite and non-negative.
    pub fn initialize<P>(
        &mut self,
        problem: &mut P,
        x0: &DVector<f64>,
        ftol: f64,
        gtol: f64,
    ) -> LmResult<()>
    where
        P: LeastSquaresProblem<H> + ?Sized,
    {
        self.initialized = false;
        for (name, tol) in [("ftol", ftol), ("gtol", gtol)] {
            if !(tol.is_finite() && tol >= 0.0) {
                return Err(OptimizerError::InvalidConfig(format!(
                    "{name} must be finite and non-negative, got {tol}"
                ))
                .into());
            }
        }
        let n = problem.num_parameters();
        if x0.len() != n {
            return Err(OptimizerError::DimensionMismatch {
                expected: n,
                actual: x0.len(),
            }
            .into());
        }

        self.hessian.init(n);
        self.x = x0.clone();
        self.x_next = DVector::zeros(n);
        self.step = DVector::zeros(n);
        self.gradient = DVector::zeros(n);
        self.diagonal = DVector::zeros(n);
        self.damped_diagonal = DVector::zeros(n);
        self.scaling = DVector::from_element(n, 1.0);
        self.ftol = ftol;
        self.gtol = gtol;

        let mut fx = finite_cost(problem.cost(&self.x)?)?;
        if problem.fixate() {
            fx = finite_cost(problem.cost(&self.x)?)?;
        }

        self.fx = fx;
        self.dampening = self.config.dampening_initial;
        self.nu = Self::NU_INITIAL;
        self.mode = Mode::ComputeDerivatives;
        self.failed = false;
        self.updated = false;
        self.same_state = true;
        self.summary = LevenbergMarquardtSummary {
            initial_cost: fx,
            final_cost: fx,
            final_dampening: self.dampening,
            ..Default::default()
        };
        self.initialized = true;

        debug!("Initialized with {} parameters, cost {:.6e}", n, fx);
        IterationStats::print_header();
        Ok(())
    }

    /// Perform one unit of work. Returns `Ok(true)` once converged.
    ///
    /// A fatal error puts the solver into a failed state in which every
    /// further call returns [`OptimizerError::SolverFailed`] until the next
    /// `initialize`.
    pub fn iterate<P>(&mut self, problem: &mut P) -> LmResult<bool>
    where
        P: LeastSquaresProblem<H> + ?Sized,
    {
        if self.failed {
            return Err(OptimizerError::SolverFailed.into());
        }
        if !self.initialized {
            return Err(OptimizerError::NotInitialized.into());
        }

        let result = match self.mode {
            Mode::Converged => {
                self.updated = false;
                Ok(true)
            }
            Mode::ComputeDerivatives => self.compute_derivatives(problem),
            Mode::DetermineStep => self.determine_step(problem),
        };

        if let Err(e) = &result
            && e.is_fatal()
        {
            self.failed = true;
            warn!("Solver entered failed state: {}", e.chain_compact());
        }
        result
    }

    fn compute_derivatives<P>(&mut self, problem: &mut P) -> LmResult<bool>
    where
        P: LeastSquaresProblem<H> + ?Sized,
    {
        self.updated = false;
        problem.compute_gradient_hessian(
            &self.x,
            self.same_state,
            &mut self.gradient,
            &mut self.hessian,
        )?;
        self.same_state = true;
        self.summary.derivative_evaluations += 1;

        if self.gradient.iter().any(|g| !g.is_finite()) {
            return Err(OptimizerError::NonFiniteGradient {
                iteration: self.summary.accepted_steps,
            }
            .log()
            .into());
        }

        let gradient_max = self.gradient.amax();
        self.summary.final_gradient_norm = gradient_max;
        if gradient_max <= self.gtol {
            return Ok(self.converge(OptimizationStatus::GradientToleranceReached));
        }

        if self.config.hessian_scaling {
            self.hessian.extract_diagonals(&mut self.diagonal)?;
            let (min, max) = (self.config.scaling_min, self.config.scaling_max);
            for (s, d) in self.scaling.iter_mut().zip(self.diagonal.iter()) {
                *s = d.abs().sqrt().clamp(min, max);
            }
            self.hessian.divide_rows_cols(&self.scaling)?;
            self.gradient.component_div_assign(&self.scaling);
        }
        self.hessian.extract_diagonals(&mut self.diagonal)?;

        self.mode = Mode::DetermineStep;
        Ok(false)
    }

    fn determine_step<P>(&mut self, problem: &mut P) -> LmResult<bool>
    where
        P: LeastSquaresProblem<H> + ?Sized,
    {
        self.updated = false;
        self.check_dampening()?;

        let (min, max, mixture) = (
            self.config.diagonal_min,
            self.config.diagonal_max,
            self.config.mixture,
        );
        let lambda = self.dampening;
        for (damped, &d) in self.damped_diagonal.iter_mut().zip(self.diagonal.iter()) {
            let clamped = d.clamp(min, max);
            *damped = clamped + lambda * (mixture + (1.0 - mixture) * clamped);
        }
        self.hessian.set_diagonals(&self.damped_diagonal)?;
        self.summary.step_trials += 1;

        if !self.hessian.initialize_solver()? {
            self.summary.solve_failures += 1;
            if mixture == 0.0 {
                return Err(OptimizerError::SingularSystem { dampening: lambda }
                    .log()
                    .into());
            }
            warn!(
                "Damped Hessian not positive definite at lambda = {:.3e}, increasing dampening",
                lambda
            );
            self.dampening *= 4.0;
            return Ok(self.guard_dampening());
        }

        let rhs = -&self.gradient;
        self.hessian.solve(&rhs, &mut self.step)?;

        // Undamped pᵀHp in scaled space
        let mut step_hessian_step = self.hessian.inner_vector_hessian(&self.step)?;
        for i in 0..self.step.len() {
            step_hessian_step -=
                (self.damped_diagonal[i] - self.diagonal[i]) * self.step[i] * self.step[i];
        }
        let predicted = -(self.gradient.dot(&self.step) + 0.5 * step_hessian_step);

        if self.config.hessian_scaling {
            self.step.component_div_assign(&self.scaling);
        }
        self.x_next.copy_from(&self.x);
        self.x_next += &self.step;

        let fx_candidate = problem.cost(&self.x_next)?;
        self.same_state = false;
        let fx_candidate = finite_cost(fx_candidate)?;

        let actual = self.fx - fx_candidate;
        let ratio = actual / predicted;
        let mut stats = IterationStats {
            trial: self.summary.step_trials,
            cost: self.fx,
            cost_change: actual,
            gradient_norm: self.summary.final_gradient_norm,
            step_norm: self.step.norm(),
            ratio,
            dampening: lambda,
            accepted: false,
        };

        if actual == 0.0 || predicted == 0.0 {
            stats.print_line();
            return Ok(self.converge(OptimizationStatus::Converged));
        }

        if fx_candidate < self.fx {
            let factor = (1.0 - (2.0 * ratio - 1.0).powi(3)).max(1.0 / 3.0);
            self.dampening *= factor;
            self.nu = Self::NU_INITIAL;

            std::mem::swap(&mut self.x, &mut self.x_next);
            self.same_state = true;
            let fx_previous = self.fx;
            self.fx = fx_candidate;
            if problem.fixate() {
                self.fx = finite_cost(problem.cost(&self.x)?)?;
            }

            self.updated = true;
            self.summary.accepted_steps += 1;
            self.summary.final_cost = self.fx;
            stats.cost = self.fx;
            stats.accepted = true;
            stats.print_line();

            if self.ftol * fx_previous >= fx_previous - fx_candidate {
                return Ok(self.converge(OptimizationStatus::CostToleranceReached));
            }
            self.mode = Mode::ComputeDerivatives;
        } else {
            self.summary.rejected_steps += 1;
            self.dampening *= self.nu;
            self.nu *= 2.0;
            stats.print_line();
        }

        Ok(self.guard_dampening())
    }

    /// Divergence guard: ends the run when λ or ν stop being usable.
    fn guard_dampening(&mut self) -> bool {
        if !self.dampening.is_finite()
            || !self.nu.is_finite()
            || self.dampening >= Self::MAX_LAMBDA
        {
            warn!(
                "Dampening limit reached (lambda = {:.3e}, nu = {:.3e})",
                self.dampening, self.nu
            );
            return self.converge(OptimizationStatus::DampingLimitReached);
        }
        self.mode == Mode::Converged
    }

    /// λ ≥ 0 and ν ≥ 2, both finite.
    fn check_dampening(&self) -> LmResult<()> {
        if !self.dampening.is_finite() || !self.nu.is_finite() {
            return Err(OptimizerError::NonFiniteDampening {
                dampening: self.dampening,
                nu: self.nu,
            }
            .log()
            .into());
        }
        if self.dampening < 0.0 || self.nu < Self::NU_INITIAL {
            return Err(OptimizerError::InvariantViolation(format!(
                "lambda = {}, nu = {}",
                self.dampening, self.nu
            ))
            .log()
            .into());
        }
        Ok(())
    }

    fn converge(&mut self, status: OptimizationStatus) -> bool {
        self.mode = Mode::Converged;
        self.summary.status = Some(status);
        self.summary.final_cost = self.fx;
        self.summary.final_dampening = self.dampening;
        info!("{}\n{}", status, self.summary);
        true
    }

    pub fn config(&self) -> &LevenbergMarquardtConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Current dampening λ.
    pub fn dampening(&self) -> f64 {
        self.dampening
    }

    /// Current escalation multiplier ν.
    pub fn nu(&self) -> f64 {
        self.nu
    }

    /// Diagonal used for the last step trial.
    pub fn damped_diagonal(&self) -> &DVector<f64> {
        &self.damped_diagonal
    }

    /// Gradient from the last derivative evaluation (scaled when Hessian scaling is on).
    pub fn gradient(&self) -> &DVector<f64> {
        &self.gradient
    }

    /// Last unscaled step `p`.
    pub fn step(&self) -> &DVector<f64> {
        &self.step
    }

    pub fn hessian(&self) -> &H {
        &self.hessian
    }

    pub fn summary(&self) -> &LevenbergMarquardtSummary {
        &self.summary
    }

    pub fn parameters(&self) -> &DVector<f64> {
        &self.x
    }

    pub fn function_value(&self) -> f64 {
        self.fx
    }

    pub fn is_converged(&self) -> bool {
        self.mode == Mode::Converged
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    /// `true` after a fatal error, until the next `initialize`.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn status(&self) -> Option<OptimizationStatus> {
        self.summary.status
    }
}

fn finite_cost(cost: f64) -> Result<f64, LmError> {
    if cost.is_finite() {
        Ok(cost)
    } else {
        Err(OptimizerError::NonFiniteCost { cost }.log().into())
    }
}
