// SPDX-License-Identifier: MPL-2.0

//! Automatic discovery of input clamping bounds.
//!
//! [`ApproxBounds`] observes a data stream and proposes lower and upper
//! bounds for it, spending privacy budget to do so. Entries are counted in
//! logarithmic histogram bins (bin `i` covers magnitudes up to `2^i`, per
//! sign); when bounds are requested, every bin count is noised by a mechanism
//! built from the configured mechanism builder, and the outermost bins whose
//! noisy counts reach a threshold become the bounds. The threshold is chosen
//! so that, with probability `success_probability`, no empty bin's noise
//! alone pushes it over.

use std::marker::PhantomData;

use crate::bounded::{Boundable, Bounds};
use crate::mechanism::laplace::LaplaceMechanismBuilder;
use crate::mechanism::{validate_epsilon, NumericalMechanismBuilder};
use crate::DpError;

/// Bins per sign. Covers magnitudes up to `2^1023`, the full `f64` range.
const NUM_BINS: usize = 1024;

const DEFAULT_SUCCESS_PROBABILITY: f64 = 1.0 - 1e-9;

/// Discovers approximate `{lower, upper}` bounds of a data stream.
#[derive(Clone, Debug)]
pub struct ApproxBounds<T> {
    epsilon: f64,
    success_probability: f64,
    mechanism_builder: Box<dyn NumericalMechanismBuilder>,
    positive_bins: Vec<u64>,
    negative_bins: Vec<u64>,
    _marker: PhantomData<T>,
}

impl<T: Boundable> ApproxBounds<T> {
    /// A builder collecting the discovery budget and noise configuration.
    pub fn builder() -> ApproxBoundsBuilder<T> {
        ApproxBoundsBuilder::new()
    }

    /// The privacy-loss budget this collaborator spends.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// The probability that no empty bin is selected by noise alone.
    pub fn success_probability(&self) -> f64 {
        self.success_probability
    }

    /// Records one stream entry. Entries that do not convert to a finite
    /// float are ignored.
    pub fn add_entry(&mut self, value: T) {
        let Some(value) = value.to_f64() else {
            return;
        };
        if !value.is_finite() {
            return;
        }
        if value >= 0.0 {
            self.positive_bins[Self::bin_index(value)] += 1;
        } else {
            self.negative_bins[Self::bin_index(-value)] += 1;
        }
    }

    /// Records a batch of stream entries.
    pub fn add_entries<I: IntoIterator<Item = T>>(&mut self, values: I) {
        for value in values {
            self.add_entry(value);
        }
    }

    /// Noises every bin count and returns the outermost bin edges whose noisy
    /// counts reach the selection threshold.
    pub fn compute_bounds(&self) -> Result<Bounds<T>, DpError> {
        let mechanism = self.mechanism_builder.build_mechanism()?;
        let threshold = self.bin_count_threshold();
        // Each bin is noised exactly once; all scans read the same noisy
        // counts.
        let noise = |bins: &[u64]| -> Vec<bool> {
            bins.iter()
                .map(|count| mechanism.add_noise(*count as f64) >= threshold)
                .collect()
        };
        let negative_selected = noise(&self.negative_bins);
        let positive_selected = noise(&self.positive_bins);

        let highest_negative = (0..NUM_BINS).rev().find(|i| negative_selected[*i]);
        let highest_positive = (0..NUM_BINS).rev().find(|i| positive_selected[*i]);
        let lowest_negative = (0..NUM_BINS).find(|i| negative_selected[*i]);
        let lowest_positive = (0..NUM_BINS).find(|i| positive_selected[*i]);

        let lower = match (highest_negative, lowest_positive) {
            (Some(bin), _) => -bin_upper_edge(bin),
            (None, Some(bin)) => bin_lower_edge(bin),
            (None, None) => return Err(no_bounds_found()),
        };
        let upper = match (highest_positive, lowest_negative) {
            (Some(bin), _) => bin_upper_edge(bin),
            (None, Some(bin)) => -bin_lower_edge(bin),
            (None, None) => return Err(no_bounds_found()),
        };

        Bounds::new(saturating_cast(lower), saturating_cast(upper))
    }

    /// The smallest noisy count a bin must reach to be selected.
    ///
    /// An empty bin is selected when its Laplace noise alone exceeds the
    /// threshold, which for per-bin sensitivity 1 happens with probability
    /// `exp(-epsilon * t) / 2`. Solving for all `2 * NUM_BINS` bins staying
    /// below with probability `success_probability` gives the threshold.
    fn bin_count_threshold(&self) -> f64 {
        let bins = (2 * NUM_BINS) as f64;
        let per_bin_failure = 1.0 - self.success_probability.powf(1.0 / bins);
        -(2.0 * per_bin_failure).ln() / self.epsilon
    }

    fn bin_index(magnitude: f64) -> usize {
        if magnitude <= 1.0 {
            return 0;
        }
        let bin = magnitude.log2().ceil() as usize;
        bin.min(NUM_BINS - 1)
    }
}

fn bin_upper_edge(bin: usize) -> f64 {
    (bin as f64).exp2()
}

fn bin_lower_edge(bin: usize) -> f64 {
    if bin == 0 {
        0.0
    } else {
        ((bin - 1) as f64).exp2()
    }
}

fn no_bounds_found() -> DpError {
    DpError::invalid_argument(
        "Bin count threshold was too large to find approximate bounds. Either run over a larger \
         dataset or decrease success_probability and try again.",
    )
}

fn saturating_cast<T: Boundable>(value: f64) -> T {
    num_traits::cast(value).unwrap_or_else(|| {
        if value < 0.0 {
            T::min_value()
        } else {
            T::max_value()
        }
    })
}

/// Builder for [`ApproxBounds`].
#[derive(Debug)]
pub struct ApproxBoundsBuilder<T> {
    epsilon: Option<f64>,
    success_probability: f64,
    mechanism_builder: Box<dyn NumericalMechanismBuilder>,
    _marker: PhantomData<T>,
}

impl<T: Boundable> Default for ApproxBoundsBuilder<T> {
    fn default() -> Self {
        ApproxBoundsBuilder {
            epsilon: None,
            success_probability: DEFAULT_SUCCESS_PROBABILITY,
            mechanism_builder: Box::new(LaplaceMechanismBuilder::new()),
            _marker: PhantomData,
        }
    }
}

impl<T: Boundable> ApproxBoundsBuilder<T> {
    /// A builder with the default success probability and a Laplace noise
    /// mechanism.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the privacy-loss budget bounds discovery spends.
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = Some(epsilon);
        self
    }

    /// Sets the probability that no empty bin is selected by noise alone.
    pub fn success_probability(mut self, success_probability: f64) -> Self {
        self.success_probability = success_probability;
        self
    }

    /// Sets the mechanism builder used to noise bin counts. Bounded-algorithm
    /// builders pass a clone of their own mechanism builder here so discovery
    /// noise is calibrated independently of the statistic's noise.
    pub fn mechanism_builder(
        mut self,
        mechanism_builder: Box<dyn NumericalMechanismBuilder>,
    ) -> Self {
        self.mechanism_builder = mechanism_builder;
        self
    }

    /// Validates the configuration and constructs the collaborator.
    pub fn build(self) -> Result<ApproxBounds<T>, DpError> {
        let epsilon = validate_epsilon(self.epsilon)?;
        if !self.success_probability.is_finite()
            || self.success_probability <= 0.0
            || self.success_probability >= 1.0
        {
            return Err(DpError::invalid_argument(format!(
                "Success probability has to be in the interval (0, 1) but is {}",
                self.success_probability
            )));
        }
        let mut mechanism_builder = self.mechanism_builder;
        mechanism_builder.set_epsilon(epsilon);
        mechanism_builder.set_l0_sensitivity(1.0);
        mechanism_builder.set_linf_sensitivity(1.0);
        // Surface configuration defects now rather than at compute time.
        mechanism_builder.build_mechanism()?;
        Ok(ApproxBounds {
            epsilon,
            success_probability: self.success_probability,
            mechanism_builder,
            positive_bins: vec![0; NUM_BINS],
            negative_bins: vec![0; NUM_BINS],
            _marker: PhantomData,
        })
    }
}
