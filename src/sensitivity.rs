// SPDX-License-Identifier: MPL-2.0

//! Sensitivity accounting for noise calibration.
//!
//! The sensitivity of an aggregation bounds how much one record's presence or
//! absence can change the aggregate, under different norms. Mechanism
//! builders collect whichever norms the caller supplies and resolve the norm
//! they calibrate against: L1 for Laplace noise, L2 for Gaussian noise. When
//! the calibration norm is not given directly it is derived from the L0
//! (partition count) and LInf (per-partition magnitude) sensitivities.

use serde::Serialize;

use crate::DpError;

/// Optional per-norm sensitivities of an aggregation.
///
/// Each field that is set must be finite and positive; this is checked when a
/// calibration norm is resolved, not at set time. Unset `l0` and `linf`
/// default to 1 during derivation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Sensitivity {
    l0: Option<f64>,
    l1: Option<f64>,
    l2: Option<f64>,
    linf: Option<f64>,
}

impl Sensitivity {
    /// A sensitivity tuple with no norms supplied.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the L0 sensitivity: the number of aggregate partitions one record
    /// can contribute to.
    pub fn set_l0(&mut self, l0: f64) {
        self.l0 = Some(l0);
    }

    /// Sets the L1 sensitivity directly.
    pub fn set_l1(&mut self, l1: f64) {
        self.l1 = Some(l1);
    }

    /// Sets the L2 sensitivity directly.
    pub fn set_l2(&mut self, l2: f64) {
        self.l2 = Some(l2);
    }

    /// Sets the LInf sensitivity: the largest change one record can make to a
    /// single partition.
    pub fn set_linf(&mut self, linf: f64) {
        self.linf = Some(linf);
    }

    /// The supplied L0 sensitivity, if any.
    pub fn l0(&self) -> Option<f64> {
        self.l0
    }

    /// The supplied L1 sensitivity, if any.
    pub fn l1(&self) -> Option<f64> {
        self.l1
    }

    /// The supplied L2 sensitivity, if any.
    pub fn l2(&self) -> Option<f64> {
        self.l2
    }

    /// The supplied LInf sensitivity, if any.
    pub fn linf(&self) -> Option<f64> {
        self.linf
    }

    /// Validates the supplied norms and resolves the L1 sensitivity, deriving
    /// `l0 * linf` when L1 was not set directly.
    pub fn resolve_l1(&self) -> Result<f64, DpError> {
        self.validate_l0_linf()?;
        let l1 = match self.l1 {
            Some(l1) => l1,
            None => self.l0.unwrap_or(1.0) * self.linf.unwrap_or(1.0),
        };
        if !l1.is_finite() {
            return Err(DpError::invalid_argument(format!(
                "L1 sensitivity has to be finite but is {l1}"
            )));
        }
        if l1 <= 0.0 {
            return Err(DpError::invalid_argument(format!(
                "L1 sensitivity has to be positive but is {l1}"
            )));
        }
        Ok(l1)
    }

    /// Validates the supplied norms and resolves the L2 sensitivity, deriving
    /// `sqrt(l0) * linf` when L2 was not set directly.
    ///
    /// A derived value that degenerates (e.g. underflows to zero from
    /// subnormal inputs) is reported as a defect of the calculated
    /// sensitivity rather than of the raw inputs.
    pub fn resolve_l2(&self) -> Result<f64, DpError> {
        self.validate_l0_linf()?;
        match self.l2 {
            Some(l2) if !l2.is_finite() => Err(DpError::invalid_argument(format!(
                "L2 sensitivity has to be finite but is {l2}"
            ))),
            Some(l2) if l2 <= 0.0 => Err(DpError::invalid_argument(format!(
                "L2 sensitivity has to be positive but is {l2}"
            ))),
            Some(l2) => Ok(l2),
            None => {
                let l2 = self.l0.unwrap_or(1.0).sqrt() * self.linf.unwrap_or(1.0);
                if !l2.is_finite() || l2 <= 0.0 {
                    return Err(DpError::invalid_argument(format!(
                        "The calculated L2 sensitivity has to be positive and finite but is {l2}"
                    )));
                }
                Ok(l2)
            }
        }
    }

    fn validate_l0_linf(&self) -> Result<(), DpError> {
        if let Some(l0) = self.l0 {
            if !l0.is_finite() {
                return Err(DpError::invalid_argument(format!(
                    "L0 sensitivity has to be finite but is {l0}"
                )));
            }
            if l0 <= 0.0 {
                return Err(DpError::invalid_argument(format!(
                    "L0 sensitivity has to be positive but is {l0}"
                )));
            }
        }
        if let Some(linf) = self.linf {
            if !linf.is_finite() {
                return Err(DpError::invalid_argument(format!(
                    "LInf sensitivity has to be finite but is {linf}"
                )));
            }
            if linf <= 0.0 {
                return Err(DpError::invalid_argument(format!(
                    "LInf sensitivity has to be positive but is {linf}"
                )));
            }
        }
        Ok(())
    }
}
