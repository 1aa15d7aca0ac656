//! Robust loss functions for outlier rejection in nonlinear least squares optimization.
//!
//! A loss function maps the residual vector `r` to the scalar cost that the
//! solver minimizes. The plain least-squares cost is `Σ rᵢ²/2`; a robust loss
//! replaces each term by `ρ(rᵢ)` so that large residuals (outliers) pull less
//! on the solution.
//!
//! # Interaction with the solver
//!
//! The solver builds its step from the Gauss-Newton Hessian `JᵀJ` and the
//! gradient `Jᵀψ(r)`, where `ψ = ρ'` is given by
//! [`LossFunction::gradient_transform`]. Returning `None` there means
//! `ψ(r) = r`, the squared-loss case, and avoids an allocation.
//!
//! Losses may also be *dynamic*. [`LossFunction::fixate`] is called once when
//! the solver is initialized and once after every accepted step, never for a
//! rejected trial. Iteratively reweighted least squares ([`IrlsLoss`]) uses
//! this hook to recompute its weights from the residuals of the new point.
//!
//! # Available Loss Functions
//!
//! - [`SquaredLoss`]: Standard least squares, accumulated on max-rescaled residuals
//! - [`HuberLoss`]: Quadratic for inliers, linear for outliers
//! - [`SmoothHuberLoss`]: Pseudo-Huber, a smooth approximation of Huber
//! - [`CauchyLoss`]: Logarithmic growth, strong suppression of large residuals
//! - [`TukeyLoss`]: Redescending, outliers beyond the scale have zero influence
//! - [`WeightedLoss`]: Fixed per-residual weights
//! - [`IrlsLoss`]: Weights recomputed on every accepted step by an [`IrlsWeights`] strategy
//!
//! # Example
//!
//! ```
//! use lmsolve::core::loss_functions::{HuberLoss, LossFunction};
//! use nalgebra::DVector;
//!
//! let huber = HuberLoss::new(1.0).unwrap();
//!
//! // Inlier: quadratic cost
//! let inlier = DVector::from_vec(vec![0.5]);
//! assert_eq!(huber.process(&inlier), 0.125);
//!
//! // Outlier: linear cost t(|r| - t/2)
//! let outlier = DVector::from_vec(vec![3.0]);
//! assert_eq!(huber.process(&outlier), 2.5);
//! ```

use nalgebra::DVector;

use super::{CoreError, CoreResult, check_scale};

/// Trait for loss functions consumed by the Levenberg-Marquardt core.
///
/// Every implementation must return a non-negative cost and `process(0) = 0`.
pub trait LossFunction {
    /// Cost of the residual vector.
    fn process(&self, residuals: &DVector<f64>) -> f64;

    /// Residual vector to use in the gradient `Jᵀψ(r)`.
    ///
    /// `None` means the residuals are used unchanged.
    fn gradient_transform(&self, residuals: &DVector<f64>) -> Option<DVector<f64>> {
        let _ = residuals;
        None
    }

    /// Update internal state from the residuals at a newly accepted point.
    ///
    /// Returns `true` if the cost function changed, in which case the solver
    /// re-evaluates the cost at the current point.
    fn fixate(&mut self, residuals: &DVector<f64>) -> bool {
        let _ = residuals;
        false
    }

    /// Check that the loss can handle `num_residuals` residuals.
    fn validate(&self, num_residuals: usize) -> CoreResult<()> {
        let _ = num_residuals;
        Ok(())
    }
}

/// Standard least squares: `Σ rᵢ²/2`.
///
/// The sum is accumulated on residuals divided by `m = max|rᵢ|` and multiplied
/// back by `m²` at the end. A NaN residual always yields a NaN cost.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquaredLoss;

impl SquaredLoss {
    pub fn new() -> Self {
        Self
    }
}

impl LossFunction for SquaredLoss {
    fn process(&self, residuals: &DVector<f64>) -> f64 {
        let mut max_abs: f64 = 0.0;
        for &r in residuals.iter() {
            if r.is_nan() {
                return f64::NAN;
            }
            max_abs = max_abs.max(r.abs());
        }
        if max_abs == 0.0 {
            return 0.0;
        }
        if max_abs.is_infinite() {
            return f64::INFINITY;
        }

        let sum: f64 = residuals
            .iter()
            .map(|&r| {
                let scaled = r / max_abs;
                scaled * scaled
            })
            .sum();
        max_abs * max_abs * sum / 2.0
    }
}

/// Huber loss: quadratic for inliers, linear for outliers.
///
/// # Mathematical Definition
///
/// ```text
/// ρ(r) = r²/2            if |r| ≤ t
///        t(|r| − t/2)    otherwise
///
/// ψ(r) = r               if |r| ≤ t
///        t·sign(r)       otherwise
/// ```
///
/// The two pieces meet with matching value and slope at `|r| = t`.
#[derive(Debug, Clone)]
pub struct HuberLoss {
    /// Scale parameter t
    scale: f64,
}

impl HuberLoss {
    /// Create a new Huber loss with threshold `scale` (must be positive).
    pub fn new(scale: f64) -> CoreResult<Self> {
        check_scale(scale)?;
        Ok(Self { scale })
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

impl LossFunction for HuberLoss {
    fn process(&self, residuals: &DVector<f64>) -> f64 {
        let t = self.scale;
        residuals
            .iter()
            .map(|&r| {
                let a = r.abs();
                if a <= t { r * r / 2.0 } else { t * (a - t / 2.0) }
            })
            .sum()
    }

    fn gradient_transform(&self, residuals: &DVector<f64>) -> Option<DVector<f64>> {
        let t = self.scale;
        Some(residuals.map(|r| if r.abs() <= t { r } else { t * r.signum() }))
    }
}

/// Pseudo-Huber loss, a smooth approximation of [`HuberLoss`].
///
/// ```text
/// ρ(r) = t² (√(1 + (r/t)²) − 1)
/// ψ(r) = r / √(1 + (r/t)²)
/// ```
#[derive(Debug, Clone)]
pub struct SmoothHuberLoss {
    scale: f64,
}

impl SmoothHuberLoss {
    pub fn new(scale: f64) -> CoreResult<Self> {
        check_scale(scale)?;
        Ok(Self { scale })
    }
}

impl LossFunction for SmoothHuberLoss {
    fn process(&self, residuals: &DVector<f64>) -> f64 {
        let t = self.scale;
        residuals
            .iter()
            .map(|&r| {
                let u = r / t;
                t * t * ((1.0 + u * u).sqrt() - 1.0)
            })
            .sum()
    }

    fn gradient_transform(&self, residuals: &DVector<f64>) -> Option<DVector<f64>> {
        let t = self.scale;
        Some(residuals.map(|r| {
            let u = r / t;
            r / (1.0 + u * u).sqrt()
        }))
    }
}

/// Cauchy (Lorentzian) loss.
///
/// ```text
/// ρ(r) = (t²/2) ln(1 + (r/t)²)
/// ψ(r) = r / (1 + (r/t)²)
/// ```
///
/// This is half of the textbook Lorentzian `t² ln(1 + (r/t)²)`, so that it
/// behaves like `r²/2` for small residuals, the same as every other loss here.
/// `ψ` is its exact derivative. It grows only logarithmically for large
/// residuals. Non-convex, so a poor initial guess can land in a local minimum.
#[derive(Debug, Clone)]
pub struct CauchyLoss {
    scale: f64,
}

impl CauchyLoss {
    pub fn new(scale: f64) -> CoreResult<Self> {
        check_scale(scale)?;
        Ok(Self { scale })
    }
}

impl LossFunction for CauchyLoss {
    fn process(&self, residuals: &DVector<f64>) -> f64 {
        let t2 = self.scale * self.scale;
        residuals
            .iter()
            .map(|&r| t2 / 2.0 * (r * r / t2).ln_1p())
            .sum()
    }

    fn gradient_transform(&self, residuals: &DVector<f64>) -> Option<DVector<f64>> {
        let t2 = self.scale * self.scale;
        Some(residuals.map(|r| r / (1.0 + r * r / t2)))
    }
}

/// Tukey biweight loss.
///
/// ```text
/// ρ(r) = (t²/6)(1 − (1 − (r/t)²)³)   if |r| ≤ t
///        t²/6                         otherwise
/// ```
///
/// Residuals beyond `t` contribute a constant and have zero gradient.
#[derive(Debug, Clone)]
pub struct TukeyLoss {
    scale: f64,
}

impl TukeyLoss {
    pub fn new(scale: f64) -> CoreResult<Self> {
        check_scale(scale)?;
        Ok(Self { scale })
    }
}

impl LossFunction for TukeyLoss {
    fn process(&self, residuals: &DVector<f64>) -> f64 {
        let t = self.scale;
        let cap = t * t / 6.0;
        residuals
            .iter()
            .map(|&r| {
                if r.abs() <= t {
                    let u = 1.0 - (r / t) * (r / t);
                    cap * (1.0 - u * u * u)
                } else {
                    cap
                }
            })
            .sum()
    }

    fn gradient_transform(&self, residuals: &DVector<f64>) -> Option<DVector<f64>> {
        let t = self.scale;
        Some(residuals.map(|r| {
            if r.abs() <= t {
                let u = 1.0 - (r / t) * (r / t);
                r * u * u
            } else {
                0.0
            }
        }))
    }
}

/// Least squares with fixed per-residual weights: `Σ wᵢ rᵢ²/2`.
#[derive(Debug, Clone)]
pub struct WeightedLoss {
    weights: DVector<f64>,
}

impl WeightedLoss {
    /// Weights must be finite and non-negative.
    pub fn new(weights: DVector<f64>) -> CoreResult<Self> {
        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(CoreError::LossFunction(format!(
                "weights must be finite and non-negative, got {bad}"
            ))
            .log());
        }
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }
}

impl LossFunction for WeightedLoss {
    fn process(&self, residuals: &DVector<f64>) -> f64 {
        residuals
            .iter()
            .zip(self.weights.iter())
            .map(|(&r, &w)| w * r * r / 2.0)
            .sum()
    }

    fn gradient_transform(&self, residuals: &DVector<f64>) -> Option<DVector<f64>> {
        Some(residuals.component_mul(&self.weights))
    }

    fn validate(&self, num_residuals: usize) -> CoreResult<()> {
        super::check_dimension("loss weights", num_residuals, self.weights.len())
    }
}

/// Weighting strategy for [`IrlsLoss`]: maps a residual to its weight.
pub trait IrlsWeights {
    fn weight(&self, residual: f64) -> f64;
}

/// Huber weights: `1` inside the threshold, `t/|r|` outside.
#[derive(Debug, Clone)]
pub struct HuberWeights {
    scale: f64,
}

impl HuberWeights {
    pub fn new(scale: f64) -> CoreResult<Self> {
        check_scale(scale)?;
        Ok(Self { scale })
    }
}

impl IrlsWeights for HuberWeights {
    fn weight(&self, residual: f64) -> f64 {
        let a = residual.abs();
        if a <= self.scale { 1.0 } else { self.scale / a }
    }
}

/// Cauchy weights: `1 / (1 + (r/t)²)`.
#[derive(Debug, Clone)]
pub struct CauchyWeights {
    scale: f64,
}

impl CauchyWeights {
    pub fn new(scale: f64) -> CoreResult<Self> {
        check_scale(scale)?;
        Ok(Self { scale })
    }
}

impl IrlsWeights for CauchyWeights {
    fn weight(&self, residual: f64) -> f64 {
        let u = residual / self.scale;
        1.0 / (1.0 + u * u)
    }
}

/// Iteratively reweighted least squares.
///
/// Holds weights `w` and evaluates `Σ wᵢ rᵢ²/2`. The weights are frozen
/// during a step and recomputed from the residuals of each accepted point in
/// [`fixate`](LossFunction::fixate). Before the first `fixate` every weight
/// is one.
#[derive(Debug, Clone)]
pub struct IrlsLoss<W> {
    strategy: W,
    weights: DVector<f64>,
}

impl<W: IrlsWeights> IrlsLoss<W> {
    pub fn new(strategy: W) -> Self {
        Self {
            strategy,
            weights: DVector::zeros(0),
        }
    }

    /// Current weights (empty until the first `fixate`).
    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    fn weight_at(&self, i: usize) -> f64 {
        if i < self.weights.len() {
            self.weights[i]
        } else {
            1.0
        }
    }
}

impl IrlsLoss<HuberWeights> {
    pub fn huber(scale: f64) -> CoreResult<Self> {
        Ok(Self::new(HuberWeights::new(scale)?))
    }
}

impl IrlsLoss<CauchyWeights> {
    pub fn cauchy(scale: f64) -> CoreResult<Self> {
        Ok(Self::new(CauchyWeights::new(scale)?))
    }
}

impl<W: IrlsWeights> LossFunction for IrlsLoss<W> {
    fn process(&self, residuals: &DVector<f64>) -> f64 {
        residuals
            .iter()
            .enumerate()
            .map(|(i, &r)| self.weight_at(i) * r * r / 2.0)
            .sum()
    }

    fn gradient_transform(&self, residuals: &DVector<f64>) -> Option<DVector<f64>> {
        Some(DVector::from_fn(residuals.len(), |i, _| {
            self.weight_at(i) * residuals[i]
        }))
    }

    fn fixate(&mut self, residuals: &DVector<f64>) -> bool {
        let updated = residuals.map(|r| self.strategy.weight(r));
        let changed = updated.len() != self.weights.len()
            || updated.iter().zip(self.weights.iter()).any(|(a, b)| a != b);
        self.weights = updated;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-12;

    fn vec(values: &[f64]) -> DVector<f64> {
        DVector::from_column_slice(values)
    }

    fn all_losses() -> Vec<Box<dyn LossFunction>> {
        vec![
            Box::new(SquaredLoss::new()),
            Box::new(HuberLoss::new(1.0).unwrap()),
            Box::new(SmoothHuberLoss::new(1.0).unwrap()),
            Box::new(CauchyLoss::new(1.0).unwrap()),
            Box::new(TukeyLoss::new(1.0).unwrap()),
            Box::new(WeightedLoss::new(vec(&[1.0, 2.0, 0.5])).unwrap()),
            Box::new(IrlsLoss::huber(1.0).unwrap()),
        ]
    }

    #[test]
    fn test_zero_residual_has_zero_cost() {
        for loss in all_losses() {
            assert_eq!(loss.process(&DVector::zeros(3)), 0.0);
        }
    }

    #[test]
    fn test_costs_are_non_negative() {
        let r = vec(&[-3.0, 0.2, 7.5]);
        for loss in all_losses() {
            assert!(loss.process(&r) >= 0.0);
        }
    }

    #[test]
    fn test_squared_loss() {
        let loss = SquaredLoss::new();
        assert!((loss.process(&vec(&[3.0, -4.0])) - 12.5).abs() < TOLERANCE);
        assert!(loss.gradient_transform(&vec(&[1.0])).is_none());
    }

    #[test]
    fn test_squared_loss_large_residuals() {
        let cost = SquaredLoss::new().process(&vec(&[1e150, -1e150]));
        assert!((cost / 1e300 - 1.0).abs() < 1e-12);
        assert!(SquaredLoss::new().process(&vec(&[f64::INFINITY])).is_infinite());
    }

    #[test]
    fn test_squared_loss_propagates_nan() {
        assert!(SquaredLoss::new().process(&vec(&[f64::NAN, f64::NAN])).is_nan());
    }

    #[test]
    fn test_huber_continuity() {
        let loss = HuberLoss::new(2.0).unwrap();
        let below = loss.process(&vec(&[2.0 - 1e-9]));
        let above = loss.process(&vec(&[2.0 + 1e-9]));
        assert!((below - above).abs() < 1e-8);

        let psi = loss.gradient_transform(&vec(&[-5.0, 1.0])).unwrap();
        assert_eq!(psi[0], -2.0);
        assert_eq!(psi[1], 1.0);
    }

    #[test]
    fn test_smooth_huber_small_residual_is_quadratic() {
        let loss = SmoothHuberLoss::new(10.0).unwrap();
        let r = 0.01;
        assert!((loss.process(&vec(&[r])) - r * r / 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_cauchy_matches_definition() {
        let loss = CauchyLoss::new(2.0).unwrap();
        let r = 3.0;
        let expected = 4.0 / 2.0 * (1.0_f64 + 9.0 / 4.0).ln();
        assert!((loss.process(&vec(&[r])) - expected).abs() < TOLERANCE);

        let psi = loss.gradient_transform(&vec(&[r])).unwrap();
        assert!((psi[0] - r / (1.0 + 9.0 / 4.0)).abs() < TOLERANCE);
    }

    #[test]
    fn test_cauchy_is_half_lorentzian() {
        let loss = CauchyLoss::new(1.5).unwrap();
        let lorentzian = |r: f64| 1.5 * 1.5 * (1.0 + (r / 1.5) * (r / 1.5)).ln();
        for r in [0.3, 2.0, 40.0] {
            assert!((loss.process(&vec(&[r])) - lorentzian(r) / 2.0).abs() < TOLERANCE);
        }

        // Quadratic near zero, with ψ the derivative of ρ
        let small = 1e-4;
        assert!((loss.process(&vec(&[small])) - small * small / 2.0).abs() < 1e-16);
        let (r, h) = (2.0, 1e-6);
        let slope = (loss.process(&vec(&[r + h])) - loss.process(&vec(&[r - h]))) / (2.0 * h);
        let psi = loss.gradient_transform(&vec(&[r])).unwrap();
        assert!((psi[0] - slope).abs() < 1e-8);
    }

    #[test]
    fn test_tukey_saturates() {
        let loss = TukeyLoss::new(1.5).unwrap();
        let cap = 1.5 * 1.5 / 6.0;
        assert!((loss.process(&vec(&[1.5])) - cap).abs() < TOLERANCE);
        assert!((loss.process(&vec(&[100.0])) - cap).abs() < TOLERANCE);

        let psi = loss.gradient_transform(&vec(&[100.0, 0.5])).unwrap();
        assert_eq!(psi[0], 0.0);
        assert!(psi[1] > 0.0);
    }

    #[test]
    fn test_weighted_loss() {
        let loss = WeightedLoss::new(vec(&[1.0, 4.0])).unwrap();
        assert!((loss.process(&vec(&[1.0, 1.0])) - 2.5).abs() < TOLERANCE);
        assert!(loss.validate(2).is_ok());
        assert!(loss.validate(3).is_err());
        assert!(matches!(
            WeightedLoss::new(vec(&[1.0, -1.0])),
            Err(CoreError::LossFunction(_))
        ));
        assert!(matches!(
            WeightedLoss::new(vec(&[f64::NAN])),
            Err(CoreError::LossFunction(_))
        ));
        assert!(matches!(
            loss.validate(3),
            Err(CoreError::DimensionMismatch { expected: 3, actual: 2, .. })
        ));
    }

    #[test]
    fn test_invalid_scales_rejected() {
        assert!(HuberLoss::new(0.0).is_err());
        assert!(SmoothHuberLoss::new(-1.0).is_err());
        assert!(CauchyLoss::new(f64::NAN).is_err());
        assert!(TukeyLoss::new(0.0).is_err());
        assert!(IrlsLoss::cauchy(-2.0).is_err());
    }

    #[test]
    fn test_irls_fixate_updates_weights() {
        let mut loss = IrlsLoss::huber(1.0).unwrap();
        let r = vec(&[0.5, 4.0]);

        // Unit weights before the first fixate
        assert!((loss.process(&r) - (0.125 + 8.0)).abs() < TOLERANCE);

        assert!(loss.fixate(&r));
        assert_eq!(loss.weights()[0], 1.0);
        assert!((loss.weights()[1] - 0.25).abs() < TOLERANCE);
        assert!((loss.process(&r) - (0.125 + 2.0)).abs() < TOLERANCE);

        // Same residuals, same weights
        assert!(!loss.fixate(&r));
    }

    #[test]
    fn test_irls_cauchy_weights() {
        let weights = CauchyWeights::new(1.0).unwrap();
        assert_eq!(weights.weight(0.0), 1.0);
        assert!((weights.weight(1.0) - 0.5).abs() < TOLERANCE);
    }
}
