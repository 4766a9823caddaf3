// SPDX-License-Identifier: MPL-2.0

//! The Gaussian mechanism.
//!
//! Noise is calibrated to the L2 sensitivity of the statistic and an
//! (epsilon, delta) budget. The standard deviation has no closed form: it is
//! the smallest sigma satisfying the analytic Gaussian mechanism condition of
//! Balle and Wang (arXiv:1805.06530, Theorem 8), found by monotone bisection.

use statrs::distribution::{ContinuousCDF, Normal};

use crate::distributions::{round_to_multiple, NoiseDistribution, SecureGaussian};
use crate::mechanism::{
    sanitize_privacy_budget, validate_confidence_level, validate_delta, validate_epsilon,
    validate_privacy_budget, ConfidenceInterval, NumericalMechanism, NumericalMechanismBuilder,
};
use crate::sensitivity::Sensitivity;
use crate::DpError;

/// Relative accuracy of the bisection for the noise standard deviation.
const SIGMA_ACCURACY: f64 = 1e-3;

/// Caps on the bracketing and bisection loops. Both searches converge long
/// before these; the caps only bound the computation for degenerate inputs.
const MAX_BRACKET_STEPS: u32 = 1100;
const MAX_BISECTION_STEPS: u32 = 200;

/// Adds Gaussian noise with a standard deviation solved from
/// `(epsilon, delta, l2_sensitivity)`.
#[derive(Debug)]
pub struct GaussianMechanism {
    epsilon: f64,
    delta: f64,
    l2_sensitivity: f64,
    stddev: f64,
    distribution: Box<dyn NoiseDistribution>,
}

impl GaussianMechanism {
    /// A builder collecting epsilon, delta and sensitivity before validated
    /// construction.
    pub fn builder() -> GaussianMechanismBuilder {
        GaussianMechanismBuilder::new()
    }

    /// Constructs a mechanism with the production sampler and no parameter
    /// validation beyond what the sampler itself requires. Prefer
    /// [`Self::builder`] for caller-supplied parameters.
    pub fn new(epsilon: f64, delta: f64, l2_sensitivity: f64) -> Result<Self, DpError> {
        let stddev = if l2_sensitivity == 0.0 {
            0.0
        } else {
            Self::calculate_stddev(epsilon, delta, l2_sensitivity)
        };
        Ok(GaussianMechanism {
            epsilon,
            delta,
            l2_sensitivity,
            stddev,
            distribution: Box::new(SecureGaussian::new(stddev)?),
        })
    }

    /// Constructs a mechanism around an injected sampling collaborator.
    pub fn with_distribution(
        epsilon: f64,
        delta: f64,
        l2_sensitivity: f64,
        distribution: Box<dyn NoiseDistribution>,
    ) -> Self {
        let stddev = if l2_sensitivity == 0.0 {
            0.0
        } else {
            Self::calculate_stddev(epsilon, delta, l2_sensitivity)
        };
        GaussianMechanism {
            epsilon,
            delta,
            l2_sensitivity,
            stddev,
            distribution,
        }
    }

    /// The failure probability of the approximate privacy guarantee.
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// The L2 sensitivity the noise is calibrated to.
    pub fn l2_sensitivity(&self) -> f64 {
        self.l2_sensitivity
    }

    /// The solved standard deviation of the noise at full budget.
    pub fn stddev(&self) -> f64 {
        self.stddev
    }

    /// The delta achieved by Gaussian noise of the given standard deviation
    /// at `epsilon`, for a statistic with the given L2 sensitivity.
    /// Monotonically decreasing in `stddev`.
    pub fn calculate_delta(stddev: f64, epsilon: f64, l2_sensitivity: f64) -> f64 {
        let normal = Normal::standard();
        let a = l2_sensitivity / (2.0 * stddev);
        let b = epsilon * stddev / l2_sensitivity;
        if b.is_infinite() {
            return 0.0;
        }
        let tail = normal.cdf(-a - b);
        let second_term = if tail == 0.0 {
            // Avoids inf * 0 when epsilon overflows the exponential.
            0.0
        } else {
            epsilon.exp() * tail
        };
        normal.cdf(a - b) - second_term
    }

    /// The smallest standard deviation for which Gaussian noise satisfies
    /// `(epsilon, delta)`-differential privacy at the given L2 sensitivity,
    /// up to a relative accuracy of `1e-3`.
    ///
    /// Brackets by doubling from the sensitivity, then bisects; both bounds
    /// of the bracket converge monotonically. Callers must pass a validated
    /// positive finite epsilon, a delta inside `(0, 1)` and a positive finite
    /// sensitivity.
    pub fn calculate_stddev(epsilon: f64, delta: f64, l2_sensitivity: f64) -> f64 {
        let mut lower_bound = f64::MIN_POSITIVE;
        let mut upper_bound = l2_sensitivity;
        let mut steps = 0;
        while Self::calculate_delta(upper_bound, epsilon, l2_sensitivity) > delta {
            lower_bound = upper_bound;
            upper_bound *= 2.0;
            steps += 1;
            if !upper_bound.is_finite() || steps >= MAX_BRACKET_STEPS {
                return upper_bound;
            }
        }
        let mut steps = 0;
        while upper_bound - lower_bound > SIGMA_ACCURACY * lower_bound {
            let middle_bound = lower_bound + (upper_bound - lower_bound) / 2.0;
            if Self::calculate_delta(middle_bound, epsilon, l2_sensitivity) > delta {
                lower_bound = middle_bound;
            } else {
                upper_bound = middle_bound;
            }
            steps += 1;
            if steps >= MAX_BISECTION_STEPS {
                break;
            }
        }
        upper_bound
    }
}

impl NumericalMechanism for GaussianMechanism {
    fn epsilon(&self) -> f64 {
        self.epsilon
    }

    fn add_noise_with_budget(&self, value: f64, privacy_budget: f64) -> f64 {
        if self.l2_sensitivity == 0.0 {
            return value;
        }
        let privacy_budget = sanitize_privacy_budget(privacy_budget);
        let noise = self.distribution.sample(self.stddev / privacy_budget);
        round_to_multiple(value, self.distribution.granularity()) + noise
    }

    fn noise_confidence_interval(
        &self,
        confidence_level: f64,
        privacy_budget: f64,
        result: f64,
    ) -> Result<ConfidenceInterval, DpError> {
        let confidence_level = validate_confidence_level(confidence_level)?;
        let privacy_budget = validate_privacy_budget(privacy_budget)?;
        let bound = Normal::standard().inverse_cdf((1.0 + confidence_level) / 2.0) * self.stddev
            / privacy_budget;
        Ok(ConfidenceInterval {
            lower_bound: result - bound,
            upper_bound: result + bound,
            confidence_level,
        })
    }
}

/// Builder for [`GaussianMechanism`].
///
/// Setters perform no validation; [`Self::build`] validates the full field
/// set in a deterministic order and stops at the first failing check.
#[derive(Clone, Debug, Default)]
pub struct GaussianMechanismBuilder {
    epsilon: Option<f64>,
    delta: Option<f64>,
    sensitivity: Sensitivity,
}

impl GaussianMechanismBuilder {
    /// A builder with no fields set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the privacy-loss budget.
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = Some(epsilon);
        self
    }

    /// Sets the failure probability of the privacy guarantee.
    pub fn delta(mut self, delta: f64) -> Self {
        self.delta = Some(delta);
        self
    }

    /// Sets the L0 (partition count) sensitivity, used to derive L2 when L2
    /// is not set directly.
    pub fn l0_sensitivity(mut self, l0_sensitivity: f64) -> Self {
        self.sensitivity.set_l0(l0_sensitivity);
        self
    }

    /// Sets the L2 sensitivity the noise is calibrated to.
    pub fn l2_sensitivity(mut self, l2_sensitivity: f64) -> Self {
        self.sensitivity.set_l2(l2_sensitivity);
        self
    }

    /// Sets the LInf (per-partition magnitude) sensitivity, used to derive L2
    /// when L2 is not set directly.
    pub fn linf_sensitivity(mut self, linf_sensitivity: f64) -> Self {
        self.sensitivity.set_linf(linf_sensitivity);
        self
    }

    /// Validates the supplied fields and constructs the mechanism.
    ///
    /// Checks, in order: epsilon set, finite, positive; delta set, finite,
    /// inside `(0, 1)`; supplied L0/LInf sensitivities finite and positive;
    /// the resolved L2 sensitivity finite and positive (a derived value that
    /// degenerates is reported as the calculated sensitivity); feasibility of
    /// the solved standard deviation's granularity.
    pub fn build(&self) -> Result<GaussianMechanism, DpError> {
        let epsilon = validate_epsilon(self.epsilon)?;
        let delta = validate_delta(self.delta)?;
        let l2_sensitivity = self.sensitivity.resolve_l2()?;
        let stddev = GaussianMechanism::calculate_stddev(epsilon, delta, l2_sensitivity);
        let distribution = SecureGaussian::new(stddev)?;
        Ok(GaussianMechanism {
            epsilon,
            delta,
            l2_sensitivity,
            stddev,
            distribution: Box::new(distribution),
        })
    }
}

impl NumericalMechanismBuilder for GaussianMechanismBuilder {
    fn set_epsilon(&mut self, epsilon: f64) {
        self.epsilon = Some(epsilon);
    }

    fn set_l0_sensitivity(&mut self, l0_sensitivity: f64) {
        self.sensitivity.set_l0(l0_sensitivity);
    }

    fn set_linf_sensitivity(&mut self, linf_sensitivity: f64) {
        self.sensitivity.set_linf(linf_sensitivity);
    }

    fn build_mechanism(&self) -> Result<Box<dyn NumericalMechanism>, DpError> {
        Ok(Box::new(self.build()?))
    }

    fn clone_box(&self) -> Box<dyn NumericalMechanismBuilder> {
        Box::new(self.clone())
    }
}
