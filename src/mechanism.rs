// SPDX-License-Identifier: MPL-2.0

//! The polymorphic contract every noise mechanism satisfies.
//!
//! There are two traits defined in this module:
//!
//!  - [`NumericalMechanism`]: a built, immutable mechanism. Adds calibrated
//!    noise to raw values, optionally spending only a fraction of its epsilon
//!    per call, and reports confidence intervals around noised results.
//!
//!  - [`NumericalMechanismBuilder`]: the object-safe builder surface used by
//!    generic wiring (e.g. bounds discovery) that must configure and build a
//!    mechanism without knowing its concrete type.
//!
//! Construction-time and query-time parameter validation is shared here so
//! every mechanism reports the same invalid-argument messages.

use serde::{Deserialize, Serialize};

use crate::DpError;

pub mod gaussian;
pub mod laplace;

/// An interval around a noised result, covering the added noise with the
/// stated probability.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    /// Lower end of the interval.
    pub lower_bound: f64,
    /// Upper end of the interval.
    pub upper_bound: f64,
    /// Probability mass the interval covers.
    pub confidence_level: f64,
}

/// A differentially private noise mechanism.
///
/// Mechanisms are immutable after construction and safe to share across
/// threads; repeated calls are independent draws from the sampling
/// collaborator.
pub trait NumericalMechanism: std::fmt::Debug + Send + Sync {
    /// The privacy-loss budget for one full use of this mechanism.
    fn epsilon(&self) -> f64;

    /// Adds noise to `value`, spending the whole epsilon budget.
    fn add_noise(&self, value: f64) -> f64 {
        self.add_noise_with_budget(value, 1.0)
    }

    /// Adds noise to `value`, spending `privacy_budget` (a fraction in
    /// `(0, 1]`) of the epsilon budget. Smaller fractions inflate the noise
    /// scale proportionally, letting a caller split one budget across several
    /// sequential queries. Out-of-range budgets are sanitized rather than
    /// rejected so the result is never NaN.
    fn add_noise_with_budget(&self, value: f64, privacy_budget: f64) -> f64;

    /// Adds noise to an integer-typed statistic: the noised result is rounded
    /// and truncated to an integer.
    fn add_int_noise(&self, value: i64, privacy_budget: f64) -> i64 {
        self.add_noise_with_budget(value as f64, privacy_budget)
            .round() as i64
    }

    /// The interval `[result + bound_low, result + bound_high]` containing
    /// the noise a call to [`Self::add_noise_with_budget`] at `privacy_budget`
    /// adds, with probability `confidence_level`.
    fn noise_confidence_interval(
        &self,
        confidence_level: f64,
        privacy_budget: f64,
        result: f64,
    ) -> Result<ConfidenceInterval, DpError>;
}

/// Object-safe builder for a [`NumericalMechanism`].
///
/// Concrete builders also expose chainable typed setters; this trait carries
/// the subset generic collaborators need: epsilon and partition sensitivity
/// configuration, validated construction, and cloning.
pub trait NumericalMechanismBuilder: std::fmt::Debug {
    /// Sets the privacy-loss budget.
    fn set_epsilon(&mut self, epsilon: f64);

    /// Sets the L0 (partition count) sensitivity.
    fn set_l0_sensitivity(&mut self, l0_sensitivity: f64);

    /// Sets the LInf (per-partition magnitude) sensitivity.
    fn set_linf_sensitivity(&mut self, linf_sensitivity: f64);

    /// Validates the supplied fields and constructs the mechanism. No partial
    /// mechanism is ever returned; the first failing check aborts the build.
    fn build_mechanism(&self) -> Result<Box<dyn NumericalMechanism>, DpError>;

    /// An independent copy of this builder. Mutating the copy does not affect
    /// the original.
    fn clone_box(&self) -> Box<dyn NumericalMechanismBuilder>;
}

impl Clone for Box<dyn NumericalMechanismBuilder> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

pub(crate) fn validate_epsilon(epsilon: Option<f64>) -> Result<f64, DpError> {
    let Some(epsilon) = epsilon else {
        return Err(DpError::invalid_argument("Epsilon has to be set."));
    };
    if !epsilon.is_finite() {
        return Err(DpError::invalid_argument(format!(
            "Epsilon has to be finite but is {epsilon}"
        )));
    }
    if epsilon <= 0.0 {
        return Err(DpError::invalid_argument(format!(
            "Epsilon has to be positive but is {epsilon}"
        )));
    }
    Ok(epsilon)
}

pub(crate) fn validate_delta(delta: Option<f64>) -> Result<f64, DpError> {
    let Some(delta) = delta else {
        return Err(DpError::invalid_argument("Delta has to be set."));
    };
    if !delta.is_finite() {
        return Err(DpError::invalid_argument(format!(
            "Delta has to be finite but is {delta}"
        )));
    }
    if delta <= 0.0 || delta >= 1.0 {
        return Err(DpError::invalid_argument(format!(
            "Delta has to be in the interval (0, 1) but is {delta}"
        )));
    }
    Ok(delta)
}

pub(crate) fn validate_privacy_budget(privacy_budget: f64) -> Result<f64, DpError> {
    if !privacy_budget.is_finite() || privacy_budget <= 0.0 || privacy_budget > 1.0 {
        return Err(DpError::invalid_argument(format!(
            "privacy_budget has to be in the interval (0, 1] but is {privacy_budget}"
        )));
    }
    Ok(privacy_budget)
}

pub(crate) fn validate_confidence_level(confidence_level: f64) -> Result<f64, DpError> {
    if !confidence_level.is_finite() || confidence_level <= 0.0 || confidence_level >= 1.0 {
        return Err(DpError::invalid_argument(format!(
            "Confidence level has to be in the interval (0, 1) but is {confidence_level}"
        )));
    }
    Ok(confidence_level)
}

/// Budget sanitization for the noise-adding path: invalid fractions fall back
/// to spending the full budget, fractions above 1 clamp to 1.
pub(crate) fn sanitize_privacy_budget(privacy_budget: f64) -> f64 {
    if privacy_budget.is_finite() && privacy_budget > 0.0 {
        privacy_budget.min(1.0)
    } else {
        1.0
    }
}


#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn message<T: std::fmt::Debug>(result: Result<T, DpError>) -> String {
        assert_matches!(result, Err(DpError::InvalidArgument(message)) => message)
    }

    #[test]
    fn epsilon_validation_order() {
        assert!(message(validate_epsilon(None)).starts_with("Epsilon has to be set"));
        assert!(message(validate_epsilon(Some(f64::NAN))).starts_with("Epsilon has to be finite"));
        assert!(
            message(validate_epsilon(Some(f64::INFINITY))).starts_with("Epsilon has to be finite")
        );
        assert!(message(validate_epsilon(Some(0.0))).starts_with("Epsilon has to be positive"));
        assert!(message(validate_epsilon(Some(-1.0))).starts_with("Epsilon has to be positive"));
        assert_eq!(validate_epsilon(Some(1.5)).unwrap(), 1.5);
    }

    #[test]
    fn delta_validation_order() {
        assert!(message(validate_delta(None)).starts_with("Delta has to be set"));
        assert!(message(validate_delta(Some(f64::NAN))).starts_with("Delta has to be finite"));
        for out_of_range in [-1.0, 0.0, 1.0] {
            assert!(message(validate_delta(Some(out_of_range)))
                .starts_with("Delta has to be in the interval"));
        }
        assert_eq!(validate_delta(Some(0.3)).unwrap(), 0.3);
    }

    #[test]
    fn privacy_budget_validation() {
        for bad in [f64::NAN, 0.0, -0.5, 1.5] {
            assert!(
                message(validate_privacy_budget(bad)).starts_with("privacy_budget has to be in")
            );
        }
        assert_eq!(validate_privacy_budget(1.0).unwrap(), 1.0);
        assert_eq!(validate_privacy_budget(0.25).unwrap(), 0.25);
    }

    #[test]
    fn confidence_level_validation() {
        for bad in [f64::NAN, 0.0, 1.0, -2.0] {
            assert!(message(validate_confidence_level(bad))
                .starts_with("Confidence level has to be in"));
        }
        assert_eq!(validate_confidence_level(0.95).unwrap(), 0.95);
    }

    #[test]
    fn budget_sanitization() {
        assert_eq!(sanitize_privacy_budget(0.5), 0.5);
        assert_eq!(sanitize_privacy_budget(2.0), 1.0);
        assert_eq!(sanitize_privacy_budget(f64::NAN), 1.0);
        assert_eq!(sanitize_privacy_budget(-1.0), 1.0);
    }

    #[test]
    fn confidence_interval_serde_round_trip() {
        let interval = ConfidenceInterval {
            lower_bound: -2.5,
            upper_bound: 2.5,
            confidence_level: 0.95,
        };
        let json = serde_json::to_value(interval).unwrap();
        let back: ConfidenceInterval = serde_json::from_value(json).unwrap();
        assert_eq!(back, interval);
    }
}
