// SPDX-License-Identifier: MPL-2.0

//! Framework for algorithms that clamp their inputs.
//!
//! A bounded algorithm needs lower and upper input bounds to determine
//! sensitivity and clamp inputs. Its builder can obtain them three ways:
//!
//!   1. Manually, via [`BoundedAlgorithmBuilder::lower`] and
//!      [`BoundedAlgorithmBuilder::upper`].
//!   2. From a caller-configured [`ApproxBounds`] collaborator, via
//!      [`BoundedAlgorithmBuilder::approx_bounds`].
//!   3. Automatically: when neither is present,
//!      [`BoundedAlgorithmBuilder::bounds_setup`] constructs a default
//!      [`ApproxBounds`] seeded with the algorithm's epsilon and a clone of
//!      its mechanism builder, so discovery noise and statistic noise are
//!      calibrated independently.
//!
//! Manual bounds and a discovery collaborator are mutually exclusive:
//! setting one clears the other.

use std::fmt::{Debug, Display};

use num_traits::{Bounded, NumCast, ToPrimitive};
use serde::{de, Deserialize, Serialize};

use crate::approx_bounds::ApproxBounds;
use crate::mechanism::{validate_epsilon, NumericalMechanismBuilder};
use crate::DpError;

/// Value types bounded algorithms clamp. Blanket-implemented for the
/// primitive integer and floating-point types.
pub trait Boundable:
    Copy + PartialOrd + Display + Debug + ToPrimitive + NumCast + Bounded
{
}

impl<T> Boundable for T where
    T: Copy + PartialOrd + Display + Debug + ToPrimitive + NumCast + Bounded
{
}

/// An inclusive clamping range with `lower <= upper`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Bounds<T> {
    /// Smallest value inputs are clamped to.
    pub lower: T,
    /// Largest value inputs are clamped to.
    pub upper: T,
}

impl<T: Boundable> Bounds<T> {
    /// Constructs a range, rejecting inverted bounds.
    pub fn new(lower: T, upper: T) -> Result<Self, DpError> {
        if lower > upper {
            return Err(DpError::invalid_argument(
                "Lower bound cannot be greater than upper bound.",
            ));
        }
        Ok(Bounds { lower, upper })
    }
}

/// Deserialization helper wrapping the derived implementation so the
/// constructor's ordering invariant is enforced on deserialized input.
mod bounds_serde {
    use serde::Deserialize;

    #[derive(Deserialize)]
    pub(super) struct Bounds<T> {
        pub(super) lower: T,
        pub(super) upper: T,
    }
}

impl<'de, T> Deserialize<'de> for Bounds<T>
where
    T: Boundable + Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let helper = bounds_serde::Bounds::deserialize(deserializer)?;
        Bounds::new(helper.lower, helper.upper).map_err(de::Error::custom)
    }
}

/// Builder-side bound state: manual bounds or a discovery collaborator, never
/// both.
#[derive(Clone, Debug)]
pub struct BoundsSpec<T> {
    lower: Option<T>,
    upper: Option<T>,
    approx_bounds: Option<ApproxBounds<T>>,
}

impl<T> Default for BoundsSpec<T> {
    fn default() -> Self {
        BoundsSpec {
            lower: None,
            upper: None,
            approx_bounds: None,
        }
    }
}

impl<T: Boundable> BoundsSpec<T> {
    /// State with neither bounds nor a collaborator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the manual lower bound, discarding any discovery collaborator.
    pub fn set_lower(&mut self, lower: T) {
        self.approx_bounds = None;
        self.lower = Some(lower);
    }

    /// Sets the manual upper bound, discarding any discovery collaborator.
    pub fn set_upper(&mut self, upper: T) {
        self.approx_bounds = None;
        self.upper = Some(upper);
    }

    /// Installs a discovery collaborator, discarding manual bounds.
    pub fn set_approx_bounds(&mut self, approx_bounds: ApproxBounds<T>) {
        self.lower = None;
        self.upper = None;
        self.approx_bounds = Some(approx_bounds);
    }

    /// Erases bounds and any discovery collaborator.
    pub fn clear(&mut self) {
        self.lower = None;
        self.upper = None;
        self.approx_bounds = None;
    }

    /// Whether both manual bounds are present.
    pub fn are_set(&self) -> bool {
        self.lower.is_some() && self.upper.is_some()
    }

    /// The manual lower bound, if set.
    pub fn lower(&self) -> Option<T> {
        self.lower
    }

    /// The manual upper bound, if set.
    pub fn upper(&self) -> Option<T> {
        self.upper
    }

    /// The installed discovery collaborator, if any.
    pub fn approx_bounds(&self) -> Option<&ApproxBounds<T>> {
        self.approx_bounds.as_ref()
    }

    /// Removes and returns the discovery collaborator, if any.
    pub fn take_approx_bounds(&mut self) -> Option<ApproxBounds<T>> {
        self.approx_bounds.take()
    }

    /// Rejects inverted manual bounds. A no-op unless both are set.
    pub fn check_order(&self) -> Result<(), DpError> {
        if let (Some(lower), Some(upper)) = (self.lower, self.upper) {
            if lower > upper {
                return Err(DpError::invalid_argument(
                    "Lower bound cannot be greater than upper bound.",
                ));
            }
        }
        Ok(())
    }

    /// Rejects non-finite manual bounds. Integer-typed bounds always pass.
    pub fn check_finite(&self) -> Result<(), DpError> {
        if let Some(lower) = self.lower {
            if !lower.to_f64().is_some_and(f64::is_finite) {
                return Err(DpError::invalid_argument(format!(
                    "Lower bound has to be finite but is {lower}"
                )));
            }
        }
        if let Some(upper) = self.upper {
            if !upper.to_f64().is_some_and(f64::is_finite) {
                return Err(DpError::invalid_argument(format!(
                    "Upper bound has to be finite but is {upper}"
                )));
            }
        }
        Ok(())
    }
}

/// Builder contract for algorithms whose sensitivity derives from input
/// bounds.
///
/// Implementors supply the accessors and [`Self::build_bounded_algorithm`];
/// the entry point for callers is [`Self::build_algorithm`], which checks
/// bound ordering before any sensitivity derivation can happen.
/// Implementations must not override the provided methods.
pub trait BoundedAlgorithmBuilder<T: Boundable>: Sized {
    /// The algorithm this builder produces.
    type Algorithm;

    /// The algorithm's privacy-loss budget, if set.
    fn epsilon(&self) -> Option<f64>;

    /// An independent copy of the mechanism builder the algorithm will use
    /// for its own noise. Default bounds discovery is seeded through this
    /// same path.
    fn clone_mechanism_builder(&self) -> Box<dyn NumericalMechanismBuilder>;

    /// The bound state.
    fn bounds(&self) -> &BoundsSpec<T>;

    /// The bound state, mutably.
    fn bounds_mut(&mut self) -> &mut BoundsSpec<T>;

    /// Derives sensitivity from the bound state and assembles the concrete
    /// algorithm. Called only after [`BoundsSpec::check_order`] has passed.
    fn build_bounded_algorithm(self) -> Result<Self::Algorithm, DpError>;

    /// Sets the manual lower bound.
    fn lower(mut self, lower: T) -> Self {
        self.bounds_mut().set_lower(lower);
        self
    }

    /// Sets the manual upper bound.
    fn upper(mut self, upper: T) -> Self {
        self.bounds_mut().set_upper(upper);
        self
    }

    /// Installs a configured bounds-discovery collaborator, discarding any
    /// manual bounds.
    fn approx_bounds(mut self, approx_bounds: ApproxBounds<T>) -> Self {
        self.bounds_mut().set_approx_bounds(approx_bounds);
        self
    }

    /// Erases bounds and any discovery collaborator.
    fn clear_bounds(mut self) -> Self {
        self.bounds_mut().clear();
        self
    }

    /// Common setup for [`Self::build_bounded_algorithm`] implementations:
    /// constructs the default discovery collaborator when no bounds were
    /// provided, and rejects non-finite manual bounds.
    fn bounds_setup(&mut self) -> Result<(), DpError> {
        if !self.bounds().are_set() && self.bounds().approx_bounds().is_none() {
            let epsilon = validate_epsilon(self.epsilon())?;
            let approx_bounds = ApproxBounds::builder()
                .epsilon(epsilon)
                .mechanism_builder(self.clone_mechanism_builder())
                .build()?;
            self.bounds_mut().set_approx_bounds(approx_bounds);
        }
        if self.bounds().are_set() {
            self.bounds().check_finite()?;
        }
        Ok(())
    }

    /// Validates bound ordering, then delegates to
    /// [`Self::build_bounded_algorithm`].
    fn build_algorithm(self) -> Result<Self::Algorithm, DpError> {
        self.bounds().check_order()?;
        self.build_bounded_algorithm()
    }
}
