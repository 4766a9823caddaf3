// SPDX-License-Identifier: MPL-2.0

//! The Laplace mechanism.
//!
//! Noise is calibrated to the L1 sensitivity of the statistic: a draw from
//! `Laplace(l1_sensitivity / epsilon)` added to the true value yields
//! epsilon-differential privacy. Outputs are snapped to the sampling
//! collaborator's granularity grid.

use crate::distributions::{
    round_to_multiple, NoiseDistribution, SecureLaplace, GEOMETRIC_PARAM_MIN,
};
use crate::mechanism::{
    sanitize_privacy_budget, validate_confidence_level, validate_epsilon, validate_privacy_budget,
    ConfidenceInterval, NumericalMechanism, NumericalMechanismBuilder,
};
use crate::sensitivity::Sensitivity;
use crate::DpError;

/// Adds Laplace noise scaled to `l1_sensitivity / epsilon`.
#[derive(Debug)]
pub struct LaplaceMechanism {
    epsilon: f64,
    l1_sensitivity: f64,
    diversity: f64,
    distribution: Box<dyn NoiseDistribution>,
}

impl LaplaceMechanism {
    /// A builder collecting epsilon and sensitivity before validated
    /// construction.
    pub fn builder() -> LaplaceMechanismBuilder {
        LaplaceMechanismBuilder::new()
    }

    /// Constructs a mechanism with the production sampler and no parameter
    /// validation beyond what the sampler itself requires. Prefer
    /// [`Self::builder`] for caller-supplied parameters.
    pub fn new(epsilon: f64, l1_sensitivity: f64) -> Result<Self, DpError> {
        Ok(Self::with_distribution(
            epsilon,
            l1_sensitivity,
            Box::new(SecureLaplace::new(epsilon, l1_sensitivity)?),
        ))
    }

    /// Constructs a mechanism around an injected sampling collaborator.
    pub fn with_distribution(
        epsilon: f64,
        l1_sensitivity: f64,
        distribution: Box<dyn NoiseDistribution>,
    ) -> Self {
        LaplaceMechanism {
            epsilon,
            l1_sensitivity,
            diversity: l1_sensitivity / epsilon,
            distribution,
        }
    }

    /// The scale of the underlying Laplace distribution,
    /// `l1_sensitivity / epsilon`.
    pub fn diversity(&self) -> f64 {
        self.diversity
    }

    /// The L1 sensitivity the noise is calibrated to.
    pub fn l1_sensitivity(&self) -> f64 {
        self.l1_sensitivity
    }
}

impl NumericalMechanism for LaplaceMechanism {
    fn epsilon(&self) -> f64 {
        self.epsilon
    }

    fn add_noise_with_budget(&self, value: f64, privacy_budget: f64) -> f64 {
        if self.l1_sensitivity == 0.0 {
            return value;
        }
        let privacy_budget = sanitize_privacy_budget(privacy_budget);
        let noise = self.distribution.sample(self.diversity / privacy_budget);
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
        let bound = (1.0 - confidence_level).ln() / self.epsilon / privacy_budget;
        Ok(ConfidenceInterval {
            lower_bound: result + bound,
            upper_bound: result - bound,
            confidence_level,
        })
    }
}

/// Builder for [`LaplaceMechanism`].
///
/// Setters perform no validation; [`Self::build`] validates the full field
/// set in a deterministic order and stops at the first failing check.
#[derive(Clone, Debug, Default)]
pub struct LaplaceMechanismBuilder {
    epsilon: Option<f64>,
    sensitivity: Sensitivity,
}

impl LaplaceMechanismBuilder {
    /// A builder with no fields set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the privacy-loss budget.
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = Some(epsilon);
        self
    }

    /// Sets the L0 (partition count) sensitivity, used to derive L1 when L1
    /// is not set directly.
    pub fn l0_sensitivity(mut self, l0_sensitivity: f64) -> Self {
        self.sensitivity.set_l0(l0_sensitivity);
        self
    }

    /// Sets the L1 sensitivity the noise is calibrated to.
    pub fn l1_sensitivity(mut self, l1_sensitivity: f64) -> Self {
        self.sensitivity.set_l1(l1_sensitivity);
        self
    }

    /// Sets the LInf (per-partition magnitude) sensitivity, used to derive L1
    /// when L1 is not set directly.
    pub fn linf_sensitivity(mut self, linf_sensitivity: f64) -> Self {
        self.sensitivity.set_linf(linf_sensitivity);
        self
    }

    /// Validates the supplied fields and constructs the mechanism.
    ///
    /// Checks, in order: epsilon set, finite, positive; supplied L0/LInf
    /// sensitivities finite and positive; the resolved L1 sensitivity finite
    /// and positive; and feasibility of the resulting noise scale (a
    /// representable power-of-two granularity and a geometric distribution
    /// parameter large enough to sample reliably).
    pub fn build(&self) -> Result<LaplaceMechanism, DpError> {
        let epsilon = validate_epsilon(self.epsilon)?;
        let l1_sensitivity = self.sensitivity.resolve_l1()?;
        let diversity = l1_sensitivity / epsilon;
        let distribution = SecureLaplace::new(epsilon, l1_sensitivity)?;
        let lambda = distribution.lambda_for_scale(diversity);
        if lambda <= GEOMETRIC_PARAM_MIN {
            return Err(DpError::invalid_argument(format!(
                "Epsilon is too small for the given sensitivity: the geometric distribution \
                 parameter {lambda} cannot be sampled reliably"
            )));
        }
        Ok(LaplaceMechanism::with_distribution(
            epsilon,
            l1_sensitivity,
            Box::new(distribution),
        ))
    }
}

impl NumericalMechanismBuilder for LaplaceMechanismBuilder {
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

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::mechanism::testing::RecordingDistribution;

    fn build_message(builder: &LaplaceMechanismBuilder) -> String {
        assert_matches!(builder.build(), Err(DpError::InvalidArgument(message)) => message)
    }

    #[test]
    fn builder_constructs_mechanism() {
        let mechanism = LaplaceMechanism::builder()
            .l1_sensitivity(3.0)
            .epsilon(1.0)
            .build()
            .unwrap();
        assert_eq!(mechanism.epsilon(), 1.0);
        assert_eq!(mechanism.l1_sensitivity(), 3.0);
    }

    #[test]
    fn builder_fails_epsilon_not_set() {
        let builder = LaplaceMechanism::builder().l1_sensitivity(1.0);
        assert!(build_message(&builder).starts_with("Epsilon has to be set"));
    }

    #[test]
    fn builder_fails_epsilon_zero_or_negative() {
        for epsilon in [0.0, -1.0] {
            let builder = LaplaceMechanism::builder().l1_sensitivity(1.0).epsilon(epsilon);
            assert!(build_message(&builder).starts_with("Epsilon has to be positive"));
        }
    }

    #[test]
    fn builder_fails_epsilon_not_finite() {
        for epsilon in [f64::NAN, f64::INFINITY] {
            let builder = LaplaceMechanism::builder().l1_sensitivity(1.0).epsilon(epsilon);
            assert!(build_message(&builder).starts_with("Epsilon has to be finite"));
        }
    }

    #[test]
    fn builder_fails_l0_sensitivity_not_finite() {
        for l0 in [f64::NAN, f64::INFINITY] {
            let builder = LaplaceMechanism::builder()
                .l0_sensitivity(l0)
                .linf_sensitivity(1.0)
                .epsilon(1.0);
            assert!(build_message(&builder).starts_with("L0 sensitivity has to be finite"));
        }
    }

    #[test]
    fn builder_fails_l0_sensitivity_negative() {
        let builder = LaplaceMechanism::builder()
            .l0_sensitivity(-1.0)
            .linf_sensitivity(1.0)
            .epsilon(1.0);
        assert!(build_message(&builder).starts_with("L0 sensitivity has to be positive but is"));
    }

    #[test]
    fn builder_fails_linf_sensitivity_nan() {
        let builder = LaplaceMechanism::builder()
            .l0_sensitivity(1.0)
            .linf_sensitivity(f64::NAN)
            .epsilon(1.0);
        assert!(build_message(&builder).starts_with("LInf sensitivity has to be finite"));
    }

    #[test]
    fn builder_fails_linf_sensitivity_zero() {
        let builder = LaplaceMechanism::builder()
            .l0_sensitivity(1.0)
            .linf_sensitivity(0.0)
            .epsilon(1.0);
        assert!(build_message(&builder).starts_with("LInf sensitivity has to be positive but is"));
    }

    #[test]
    fn builder_fails_sensitivity_too_high() {
        let result = LaplaceMechanism::builder()
            .l1_sensitivity(f64::MAX)
            .epsilon(1.0)
            .build();
        assert_matches!(result, Err(DpError::InvalidArgument(_)));
    }

    #[test]
    fn builder_fails_lambda_too_small() {
        let result = LaplaceMechanism::builder()
            .l1_sensitivity(3.0)
            .epsilon(1e-100)
            .build();
        assert_matches!(result, Err(DpError::InvalidArgument(_)));
    }

    #[test]
    fn builder_estimates_l1_with_l0_and_linf() {
        let mechanism = LaplaceMechanism::builder()
            .epsilon(1.0)
            .l0_sensitivity(5.0)
            .linf_sensitivity(3.0)
            .build()
            .unwrap();
        assert_eq!(mechanism.l1_sensitivity(), 15.0);
    }

    #[test]
    fn builder_clone_is_independent() {
        let original = LaplaceMechanism::builder().l1_sensitivity(3.0).epsilon(1.0);
        let clone = original.clone();
        let modified = clone.epsilon(2.0).l1_sensitivity(7.0);

        let mechanism = original.build().unwrap();
        assert_eq!(mechanism.epsilon(), 1.0);
        assert_eq!(mechanism.l1_sensitivity(), 3.0);

        let other = modified.build().unwrap();
        assert_eq!(other.epsilon(), 2.0);
        assert_eq!(other.l1_sensitivity(), 7.0);
    }

    #[test]
    fn adds_noise_from_distribution() {
        let distribution = Box::new(RecordingDistribution::new(10.0, (-40f64).exp2()));
        let mechanism = LaplaceMechanism::with_distribution(1.0, 1.0, distribution);
        assert_eq!(mechanism.add_noise(0.0), 10.0);
    }

    #[test]
    fn adds_no_noise_when_sensitivity_is_zero() {
        let recorder = RecordingDistribution::new(10.0, (-40f64).exp2());
        let mechanism = LaplaceMechanism::with_distribution(1.0, 0.0, Box::new(recorder.clone()));
        for _ in 0..3 {
            assert_eq!(mechanism.add_noise(12.3), 12.3);
        }
        // The collaborator is never invoked on the zero-sensitivity path.
        assert!(recorder.recorded_scales().is_empty());
    }

    #[test]
    fn diversity_is_sensitivity_over_epsilon() {
        assert_eq!(LaplaceMechanism::new(1.0, 1.0).unwrap().diversity(), 1.0);
        assert_eq!(LaplaceMechanism::new(2.0, 1.0).unwrap().diversity(), 0.5);
        assert_eq!(LaplaceMechanism::new(2.0, 3.0).unwrap().diversity(), 1.5);
    }

    #[test]
    fn budget_fractions_inflate_the_sampling_scale() {
        let recorder = RecordingDistribution::new(0.0, (-40f64).exp2());
        let mechanism = LaplaceMechanism::with_distribution(1.0, 1.0, Box::new(recorder.clone()));

        mechanism.add_noise_with_budget(0.0, 1.0);
        mechanism.add_noise_with_budget(0.0, 0.5);
        mechanism.add_noise_with_budget(0.0, 0.25);
        assert_eq!(recorder.recorded_scales(), vec![1.0, 2.0, 4.0]);
    }

    #[test]
    fn works_for_integers() {
        let distribution = Box::new(RecordingDistribution::new(10.0, (-40f64).exp2()));
        let mechanism = LaplaceMechanism::with_distribution(1.0, 1.0, distribution);
        assert_eq!(mechanism.add_int_noise(0, 1.0), 10);
    }

    #[test]
    fn output_lands_on_granularity_grid() {
        let granularity = (-40f64).exp2();
        let distribution = Box::new(RecordingDistribution::new(10.0, granularity));
        let mechanism = LaplaceMechanism::with_distribution(1.0, 1.0, distribution);

        let noised = mechanism.add_noise_with_budget(0.1 * granularity, 1.0);
        assert_eq!(noised % granularity, 0.0);
        assert!((noised - 10.0).abs() < 1e-6);
    }

    #[test]
    fn confidence_interval_matches_analytic_form() {
        let epsilon = 0.5;
        let level = 0.95;
        let budget = 0.5;
        let mechanism = LaplaceMechanism::new(epsilon, 1.0).unwrap();

        let interval = mechanism.noise_confidence_interval(level, budget, 0.0).unwrap();
        assert_eq!(interval.lower_bound, (1.0 - level).ln() / epsilon / budget);
        assert_eq!(interval.upper_bound, -(1.0 - level).ln() / epsilon / budget);
        assert_eq!(interval.confidence_level, level);

        let result = 19.3;
        let shifted = mechanism
            .noise_confidence_interval(level, budget, result)
            .unwrap();
        assert_eq!(shifted.lower_bound, result + (1.0 - level).ln() / epsilon / budget);
        assert_eq!(shifted.upper_bound, result - (1.0 - level).ln() / epsilon / budget);
    }

    #[test]
    fn confidence_interval_rejects_bad_budget() {
        let mechanism = LaplaceMechanism::new(1.0, 1.0).unwrap();
        let message = assert_matches!(
            mechanism.noise_confidence_interval(0.5, f64::NAN, 0.0),
            Err(DpError::InvalidArgument(message)) => message
        );
        assert!(message.starts_with("privacy_budget has to be in"));
    }

    #[test]
    fn confidence_interval_rejects_bad_level() {
        let mechanism = LaplaceMechanism::new(1.0, 1.0).unwrap();
        let message = assert_matches!(
            mechanism.noise_confidence_interval(f64::NAN, 1.0, 0.0),
            Err(DpError::InvalidArgument(message)) => message
        );
        assert!(message.starts_with("Confidence level has to be in"));
    }

    #[test]
    fn builder_trait_object_round_trip() {
        let mut builder: Box<dyn NumericalMechanismBuilder> =
            Box::new(LaplaceMechanism::builder().l1_sensitivity(3.0));
        builder.set_epsilon(1.0);
        let clone = builder.clone();
        let mechanism = clone.build_mechanism().unwrap();
        assert_eq!(mechanism.epsilon(), 1.0);
    }
}
