//! # Bivariate Copulas
//!
//! A copula couples the two latent failure times of the study. Only two one-parameter
//! Archimedean families are supported, chosen for their different dependence geometry:
//!
//! - **Frank**: radially symmetric, no tail dependence, `theta` in `R \ {0}`.
//! - **Clayton**: lower-tail dependence, `theta > 0`.
//!
//! A [`Copula`] can only be constructed with a dependence parameter inside its family's
//! domain, so every downstream consumer (sampler, likelihood) can rely on it.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod conditional;
pub mod sampler;

pub use conditional::conditional_probability;
pub use sampler::CopulaSampler;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CopulaError {
    #[error("Invalid dependence parameter theta = {theta} for the {family} copula: {reason}.")]
    InvalidParameter {
        family: CopulaFamily,
        theta: f64,
        reason: &'static str,
    },
    #[error("Could not build the frailty distribution for theta = {theta}: {message}")]
    Frailty { theta: f64, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CopulaFamily {
    Frank,
    Clayton,
}

impl CopulaFamily {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Frank => "frank",
            Self::Clayton => "clayton",
        }
    }

    /// Checks `theta` against the family's domain, returning the reason on failure.
    pub fn check_theta(self, theta: f64) -> Result<(), &'static str> {
        if !theta.is_finite() {
            return Err("theta must be finite");
        }
        match self {
            // theta = 0 is the independence limit, where the generator degenerates.
            Self::Frank if theta == 0.0 => Err("theta must be non-zero"),
            Self::Clayton if theta <= 0.0 => Err("theta must be strictly positive"),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for CopulaFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A copula family together with a validated dependence parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Copula {
    family: CopulaFamily,
    theta: f64,
}

impl Copula {
    pub fn new(family: CopulaFamily, theta: f64) -> Result<Self, CopulaError> {
        family
            .check_theta(theta)
            .map_err(|reason| CopulaError::InvalidParameter {
                family,
                theta,
                reason,
            })?;
        Ok(Self { family, theta })
    }

    pub fn family(&self) -> CopulaFamily {
        self.family
    }

    pub fn theta(&self) -> f64 {
        self.theta
    }

    /// Conditional weight of the likelihood, see [`conditional_probability`].
    pub fn conditional(&self, ua: f64, ub: f64) -> f64 {
        conditional_probability(self.family, ua, ub, self.theta)
    }

    /// Population Kendall's tau implied by the dependence parameter.
    pub fn kendall_tau(&self) -> f64 {
        match self.family {
            CopulaFamily::Clayton => self.theta / (self.theta + 2.0),
            CopulaFamily::Frank => {
                let theta = self.theta;
                1.0 - 4.0 / theta * (1.0 - debye_one(theta))
            }
        }
    }
}

impl fmt::Display for Copula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(theta={:.4})", self.family, self.theta)
    }
}

/// First Debye function `D1(x) = (1/x) * integral_0^x t / (e^t - 1) dt`, by composite
/// Simpson's rule. Valid for negative `x` as well.
fn debye_one(x: f64) -> f64 {
    const PANELS: usize = 400;
    let integrand = |t: f64| if t == 0.0 { 1.0 } else { t / t.exp_m1() };
    let h = x / PANELS as f64;
    let mut sum = integrand(0.0) + integrand(x);
    for i in 1..PANELS {
        let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
        sum += weight * integrand(i as f64 * h);
    }
    sum * h / 3.0 / x
}
