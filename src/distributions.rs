// SPDX-License-Identifier: MPL-2.0

//! Secure noise sampling.
//!
//! Naive floating-point samplers leak information: the set of `f64` values a
//! mechanism can output is denser near the true statistic, so an adversary
//! observing exact bit patterns can distinguish neighboring inputs. The
//! samplers here defend against this by drawing on a power-of-two granularity
//! grid. Laplace noise is produced as `granularity` times a two-sided
//! geometric sample, so every output is an exact multiple of the granularity;
//! Gaussian noise is snapped to its grid after scaling a standard normal
//! draw.
//!
//! The samplers own their entropy source. Each call to
//! [`NoiseDistribution::sample`] is an independent draw.

use std::fmt::Debug;

use rand::Rng;
use rand_distr::StandardNormal;

use crate::DpError;

/// Laplace noise is sampled on a grid `2^40` times finer than its scale.
const LAPLACE_GRANULARITY_PARAM: f64 = (1u64 << 40) as f64;

/// Gaussian noise is sampled on a grid `2^57` times finer than twice its
/// standard deviation.
const GAUSSIAN_GRANULARITY_PARAM: f64 = (1u64 << 57) as f64;

/// Smallest geometric distribution parameter that can be sampled reliably;
/// below this the inverse-CDF arithmetic loses precision.
pub(crate) const GEOMETRIC_PARAM_MIN: f64 = 1.0 / (1u64 << 59) as f64;

/// A source of calibrated noise for a numerical mechanism.
///
/// `scale` is the full width parameter of the requested draw: the mechanism
/// passes `base_scale / privacy_budget`, so partial budgets inflate the
/// noise. The granularity is fixed per distribution instance, derived from
/// the mechanism's base scale at construction.
pub trait NoiseDistribution: Debug + Send + Sync {
    /// One independent draw from the noise family at the given scale.
    fn sample(&self, scale: f64) -> f64;

    /// The rounding quantum all outputs of this distribution live on.
    fn granularity(&self) -> f64;
}

/// The smallest power of two greater than or equal to `x`.
///
/// Errors when `x` is not a positive finite number or when the result would
/// exceed the largest representable power of two (`2^1023`).
pub fn ceil_power_of_two(x: f64) -> Result<f64, DpError> {
    if !x.is_finite() || x <= 0.0 {
        return Err(DpError::invalid_argument(format!(
            "Granularity can only be computed for finite positive scales but the scale is {x}"
        )));
    }
    let exponent = x.log2().ceil();
    if exponent > 1023.0 {
        return Err(DpError::invalid_argument(format!(
            "The scale {x} is too large for a power of two granularity to be representable"
        )));
    }
    let power = exponent.exp2();
    // log2 can land one ulp short for values just above a power of two.
    if power < x {
        Ok(power * 2.0)
    } else {
        Ok(power)
    }
}

/// Rounds `x` to the nearest multiple of `granularity`, ties away from zero.
pub fn round_to_multiple(x: f64, granularity: f64) -> f64 {
    (x / granularity).round() * granularity
}

fn granularity_for_scale(scale: f64, param: f64) -> Result<f64, DpError> {
    Ok((ceil_power_of_two(scale)? / param).max(f64::MIN_POSITIVE))
}

/// Draws from the geometric distribution with parameter `1 - e^-lambda`,
/// supported on `{1, 2, ...}` and truncated at `i64::MAX`.
///
/// Works by inverse-CDF binary search: each step splits the remaining range
/// at its conditional median, so the loop terminates after at most 63
/// halvings regardless of `lambda`.
pub(crate) fn sample_geometric<R: Rng + ?Sized>(rng: &mut R, lambda: f64) -> i64 {
    // The tail beyond i64::MAX is folded into the truncation point.
    if rng.random::<f64>() > -(-lambda * i64::MAX as f64).exp_m1() {
        return i64::MAX;
    }

    let mut left: i64 = 0;
    let mut right: i64 = i64::MAX;
    while left + 1 < right {
        let mid = (left as f64
            - ((0.5f64.ln() + (lambda * (left - right) as f64).exp().ln_1p()) / lambda))
            .ceil() as i64;
        let mid = mid.clamp(left + 1, right - 1);
        let q = (lambda * (left - mid) as f64).exp_m1() / (lambda * (left - right) as f64).exp_m1();
        if rng.random::<f64>() <= q {
            right = mid;
        } else {
            left = mid;
        }
    }
    right
}

/// Draws from the two-sided geometric distribution over the integers with
/// parameter `1 - e^-lambda`.
pub(crate) fn sample_two_sided_geometric<R: Rng + ?Sized>(rng: &mut R, lambda: f64) -> i64 {
    let mut sample = 0i64;
    let mut positive = false;
    while sample == 0 && !positive {
        sample = sample_geometric(rng, lambda) - 1;
        positive = rng.random::<bool>();
    }
    if positive {
        sample
    } else {
        -sample
    }
}

/// Laplace noise on a power-of-two grid.
///
/// A draw at scale `s = l1 / epsilon` is `granularity` times a two-sided
/// geometric sample with parameter
/// `granularity * epsilon / (l1 + granularity)`; the `+ granularity` in the
/// denominator accounts for the value itself being rounded onto the grid
/// before noise is added.
#[derive(Clone, Debug)]
pub struct SecureLaplace {
    l1_sensitivity: f64,
    granularity: f64,
}

impl SecureLaplace {
    /// A Laplace sampler calibrated to the given epsilon and L1 sensitivity.
    ///
    /// Zero sensitivity yields a distribution that is never sampled
    /// (mechanisms short-circuit it); otherwise the base scale
    /// `l1_sensitivity / epsilon` must admit a representable power-of-two
    /// granularity.
    pub fn new(epsilon: f64, l1_sensitivity: f64) -> Result<Self, DpError> {
        if l1_sensitivity == 0.0 {
            return Ok(SecureLaplace {
                l1_sensitivity,
                granularity: f64::MIN_POSITIVE,
            });
        }
        Ok(SecureLaplace {
            l1_sensitivity,
            granularity: granularity_for_scale(
                l1_sensitivity / epsilon,
                LAPLACE_GRANULARITY_PARAM,
            )?,
        })
    }

    /// The geometric distribution parameter for a draw at the given scale.
    /// The scale encodes the effective epsilon as `l1 / scale`, so partial
    /// privacy budgets shrink the parameter and widen the noise.
    pub(crate) fn lambda_for_scale(&self, scale: f64) -> f64 {
        let effective_epsilon = self.l1_sensitivity / scale;
        self.granularity * effective_epsilon / (self.l1_sensitivity + self.granularity)
    }

    fn sample_with_rng<R: Rng + ?Sized>(&self, rng: &mut R, scale: f64) -> f64 {
        let lambda = self.lambda_for_scale(scale);
        sample_two_sided_geometric(rng, lambda) as f64 * self.granularity
    }
}

impl NoiseDistribution for SecureLaplace {
    fn sample(&self, scale: f64) -> f64 {
        self.sample_with_rng(&mut rand::rng(), scale)
    }

    fn granularity(&self) -> f64 {
        self.granularity
    }
}

/// Gaussian noise snapped to a power-of-two grid.
#[derive(Clone, Debug)]
pub struct SecureGaussian {
    granularity: f64,
}

impl SecureGaussian {
    /// A Gaussian sampler for the given base standard deviation.
    pub fn new(stddev: f64) -> Result<Self, DpError> {
        if stddev == 0.0 {
            return Ok(SecureGaussian {
                granularity: f64::MIN_POSITIVE,
            });
        }
        Ok(SecureGaussian {
            granularity: granularity_for_scale(2.0 * stddev, GAUSSIAN_GRANULARITY_PARAM)?,
        })
    }

    fn sample_with_rng<R: Rng + ?Sized>(&self, rng: &mut R, scale: f64) -> f64 {
        let standard: f64 = rng.sample(StandardNormal);
        round_to_multiple(standard * scale, self.granularity)
    }
}

impl NoiseDistribution for SecureGaussian {
    fn sample(&self, scale: f64) -> f64 {
        self.sample_with_rng(&mut rand::rng(), scale)
    }

    fn granularity(&self) -> f64 {
        self.granularity
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::DpError;

    #[test]
    fn ceil_power_of_two_exact() {
        assert_eq!(ceil_power_of_two(1.0).unwrap(), 1.0);
        assert_eq!(ceil_power_of_two(3.0).unwrap(), 4.0);
        assert_eq!(ceil_power_of_two(4.0).unwrap(), 4.0);
        assert_eq!(ceil_power_of_two(0.3).unwrap(), 0.5);
        assert_eq!(ceil_power_of_two(1e-300).unwrap(), (-996f64).exp2());
    }

    #[test]
    fn ceil_power_of_two_rejects_degenerate_scales() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert_matches!(ceil_power_of_two(bad), Err(DpError::InvalidArgument(_)));
        }
        // 2^1024 is not representable.
        assert_matches!(
            ceil_power_of_two(f64::MAX),
            Err(DpError::InvalidArgument(_))
        );
    }

    #[test]
    fn round_to_multiple_snaps_both_directions() {
        assert_eq!(round_to_multiple(4.9, 2.0), 4.0);
        assert_eq!(round_to_multiple(5.1, 2.0), 6.0);
        assert_eq!(round_to_multiple(-4.9, 2.0), -4.0);
        assert_eq!(round_to_multiple(-5.1, 2.0), -6.0);
        assert_eq!(round_to_multiple(0.0, 0.25), 0.0);
    }

    #[test]
    fn geometric_sample_mean_matches_parameter() {
        let mut rng = StdRng::seed_from_u64(7);
        let lambda = 1.0f64;
        let n = 2000;
        let sum: i64 = (0..n).map(|_| sample_geometric(&mut rng, lambda)).sum();
        let mean = sum as f64 / n as f64;
        // E[X] = 1 / (1 - e^-lambda) ~= 1.582.
        let expected = 1.0 / -(-lambda).exp_m1();
        assert!((mean - expected).abs() < 0.15, "mean was {mean}");
    }

    #[test]
    fn two_sided_geometric_is_symmetric() {
        let mut rng = StdRng::seed_from_u64(11);
        let n = 4000;
        let samples: Vec<i64> = (0..n)
            .map(|_| sample_two_sided_geometric(&mut rng, 0.5))
            .collect();
        let mean = samples.iter().sum::<i64>() as f64 / n as f64;
        assert!(mean.abs() < 0.35, "mean was {mean}");
        assert!(samples.iter().any(|s| *s > 0));
        assert!(samples.iter().any(|s| *s < 0));
    }

    #[test]
    fn two_sided_geometric_concentrates_for_large_lambda() {
        let mut rng = StdRng::seed_from_u64(13);
        let zeros = (0..1000)
            .filter(|_| sample_two_sided_geometric(&mut rng, 5.0) == 0)
            .count();
        assert!(zeros > 900, "only {zeros} zeros");
    }

    #[test]
    fn laplace_samples_live_on_grid() {
        let distribution = SecureLaplace::new(1.0, 1.0).unwrap();
        let granularity = distribution.granularity();
        assert_eq!(granularity, (-40f64).exp2());

        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let sample = distribution.sample_with_rng(&mut rng, 1.0);
            assert_eq!(sample % granularity, 0.0);
        }
    }

    #[test]
    fn laplace_sample_spread_tracks_scale() {
        let distribution = SecureLaplace::new(1.0, 1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(17);
        let n = 4000;
        let samples: Vec<f64> = (0..n)
            .map(|_| distribution.sample_with_rng(&mut rng, 1.0))
            .collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
        // Laplace(1) has standard deviation sqrt(2).
        assert!(mean.abs() < 0.25, "mean was {mean}");
        assert!(
            (1.0..=1.9).contains(&variance.sqrt()),
            "stddev was {}",
            variance.sqrt()
        );
    }

    #[test]
    fn gaussian_samples_live_on_grid() {
        let distribution = SecureGaussian::new(1.0).unwrap();
        let granularity = distribution.granularity();
        assert_eq!(granularity, 2.0 / (1u64 << 57) as f64);

        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..100 {
            let sample = distribution.sample_with_rng(&mut rng, 1.0);
            assert_eq!(sample % granularity, 0.0);
        }
    }

    #[test]
    fn gaussian_sample_spread_tracks_scale() {
        let distribution = SecureGaussian::new(2.0).unwrap();
        let mut rng = StdRng::seed_from_u64(19);
        let n = 4000;
        let samples: Vec<f64> = (0..n)
            .map(|_| distribution.sample_with_rng(&mut rng, 2.0))
            .collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.2, "mean was {mean}");
        assert!(
            (1.8..=2.2).contains(&variance.sqrt()),
            "stddev was {}",
            variance.sqrt()
        );
    }

    #[test]
    fn zero_scale_distributions_are_constructible() {
        assert!(SecureLaplace::new(1.0, 0.0).is_ok());
        assert!(SecureGaussian::new(0.0).is_ok());
    }
}
