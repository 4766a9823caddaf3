// SPDX-License-Identifier: MPL-2.0

#![warn(missing_docs)]

//! Differentially private numerical noise mechanisms.
//!
//! A noise mechanism takes a true numeric statistic and returns a randomized
//! value that provably bounds the information an adversary can learn about
//! any single input record. The main pieces of this crate are:
//!
//!  - [`mechanism::NumericalMechanism`]: the contract every noise mechanism
//!    satisfies — noise addition with per-call privacy budget fractions and
//!    confidence intervals around noised results.
//!
//!  - [`mechanism::laplace::LaplaceMechanism`] and
//!    [`mechanism::gaussian::GaussianMechanism`]: concrete mechanisms with
//!    validated builders, calibrated to L1 sensitivity / epsilon and to
//!    L2 sensitivity / (epsilon, delta) respectively.
//!
//!  - [`distributions::NoiseDistribution`]: the sampling collaborator. The
//!    production samplers draw on a power-of-two granularity grid so that the
//!    set of representable outputs does not leak sub-quantum information
//!    about the true value through floating-point artifacts.
//!
//!  - [`bounded::BoundedAlgorithmBuilder`]: the framework for statistics
//!    whose sensitivity derives from clamping inputs to a `[lower, upper]`
//!    range, supplied manually or discovered by [`approx_bounds::ApproxBounds`].

/// Errors propagated by mechanism construction and queries.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DpError {
    /// A caller-supplied or derived parameter failed validation. The message
    /// prefix identifies the offending field and its required condition.
    #[error("{0}")]
    InvalidArgument(String),
}

impl DpError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        DpError::InvalidArgument(message.into())
    }
}

pub mod approx_bounds;
pub mod bounded;
pub mod distributions;
pub mod mechanism;
pub mod sensitivity;

pub use approx_bounds::ApproxBounds;
pub use bounded::{BoundedAlgorithmBuilder, Bounds};
pub use distributions::NoiseDistribution;
pub use mechanism::gaussian::GaussianMechanism;
pub use mechanism::laplace::LaplaceMechanism;
pub use mechanism::{ConfidenceInterval, NumericalMechanism, NumericalMechanismBuilder};
pub use sensitivity::Sensitivity;
