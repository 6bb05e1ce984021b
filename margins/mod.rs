//! # Parametric Marginal Families
//!
//! Every latent event time in the study follows one of a closed set of positive
//! continuous families. Each variant of [`MarginalFamily`] carries its own parameters
//! and exposes the same operations: density, log-density, CDF, quantile, sampling and
//! parameter bookkeeping. The estimator flattens these parameters into a single vector,
//! so every family also knows its parameter names and how to rebuild itself from a slice.
//!
//! Parameterizations:
//! - `Exponential { rate }`: `f(t) = rate * exp(-rate * t)`
//! - `Weibull { shape, scale }`: `F(t) = 1 - exp(-(t / scale)^shape)`
//! - `Gamma { shape, rate }`: `f(t) = rate^shape / Γ(shape) * t^(shape-1) * exp(-rate * t)`
//! - `LogNormal { meanlog, sdlog }`: `ln T ~ Normal(meanlog, sdlog^2)`

use rand::Rng;
use rand_distr::Open01;
use serde::{Deserialize, Serialize};
use statrs::function::erf::{erf_inv, erfc};
use statrs::function::gamma::{gamma_lr, ln_gamma};
use std::f64::consts::{PI, SQRT_2};
use std::fmt;
use thiserror::Error;

pub mod fit;

/// Probabilities are kept inside `[PROB_EPSILON, 1 - PROB_EPSILON]` before inversion.
pub const PROB_EPSILON: f64 = 1e-10;

const QUANTILE_MAX_ITERATIONS: usize = 200;
const QUANTILE_RELATIVE_TOLERANCE: f64 = 1e-12;

/// Clamps a probability into the open interval used by every quantile and copula routine.
#[inline]
pub fn clamp_probability(u: f64) -> f64 {
    u.clamp(PROB_EPSILON, 1.0 - PROB_EPSILON)
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarginalError {
    #[error("Invalid {family} parameter '{name}' = {value}: {reason}.")]
    InvalidParameter {
        family: FamilyKind,
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
    #[error("The {family} family takes {expected} parameters, but {found} were supplied.")]
    WrongParameterCount {
        family: FamilyKind,
        expected: usize,
        found: usize,
    },
}

/// The family tag without parameters. Used for candidate lists, reports and CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FamilyKind {
    Exponential,
    Weibull,
    Gamma,
    LogNormal,
}

impl FamilyKind {
    /// The candidate list used by the marginal fitter, in reporting order.
    pub const CANDIDATES: [FamilyKind; 4] = [
        FamilyKind::Exponential,
        FamilyKind::Weibull,
        FamilyKind::Gamma,
        FamilyKind::LogNormal,
    ];

    pub fn describe(self) -> &'static str {
        match self {
            Self::Exponential => "exponential",
            Self::Weibull => "weibull",
            Self::Gamma => "gamma",
            Self::LogNormal => "lognormal",
        }
    }

    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            Self::Exponential => &["rate"],
            Self::Weibull => &["shape", "scale"],
            Self::Gamma => &["shape", "rate"],
            Self::LogNormal => &["meanlog", "sdlog"],
        }
    }

    pub fn param_count(self) -> usize {
        self.param_names().len()
    }
}

impl fmt::Display for FamilyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A marginal distribution together with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "kebab-case")]
pub enum MarginalFamily {
    Exponential { rate: f64 },
    Weibull { shape: f64, scale: f64 },
    Gamma { shape: f64, rate: f64 },
    LogNormal { meanlog: f64, sdlog: f64 },
}

impl MarginalFamily {
    /// Builds a validated family from a flat parameter slice in `param_names` order.
    pub fn from_params(kind: FamilyKind, params: &[f64]) -> Result<Self, MarginalError> {
        if params.len() != kind.param_count() {
            return Err(MarginalError::WrongParameterCount {
                family: kind,
                expected: kind.param_count(),
                found: params.len(),
            });
        }
        let family = match kind {
            FamilyKind::Exponential => Self::Exponential { rate: params[0] },
            FamilyKind::Weibull => Self::Weibull {
                shape: params[0],
                scale: params[1],
            },
            FamilyKind::Gamma => Self::Gamma {
                shape: params[0],
                rate: params[1],
            },
            FamilyKind::LogNormal => Self::LogNormal {
                meanlog: params[0],
                sdlog: params[1],
            },
        };
        family.validate()?;
        Ok(family)
    }

    pub fn kind(&self) -> FamilyKind {
        match self {
            Self::Exponential { .. } => FamilyKind::Exponential,
            Self::Weibull { .. } => FamilyKind::Weibull,
            Self::Gamma { .. } => FamilyKind::Gamma,
            Self::LogNormal { .. } => FamilyKind::LogNormal,
        }
    }

    pub fn param_count(&self) -> usize {
        self.kind().param_count()
    }

    /// Parameters in the same order as `FamilyKind::param_names`.
    pub fn params(&self) -> Vec<f64> {
        match *self {
            Self::Exponential { rate } => vec![rate],
            Self::Weibull { shape, scale } => vec![shape, scale],
            Self::Gamma { shape, rate } => vec![shape, rate],
            Self::LogNormal { meanlog, sdlog } => vec![meanlog, sdlog],
        }
    }

    /// Checks every parameter against its mathematical domain.
    pub fn validate(&self) -> Result<(), MarginalError> {
        let kind = self.kind();
        let names = kind.param_names();
        for (idx, value) in self.params().into_iter().enumerate() {
            let name = names[idx];
            if !value.is_finite() {
                return Err(MarginalError::InvalidParameter {
                    family: kind,
                    name,
                    value,
                    reason: "must be finite",
                });
            }
            // meanlog is the only unrestricted parameter across the supported families.
            if name != "meanlog" && value <= 0.0 {
                return Err(MarginalError::InvalidParameter {
                    family: kind,
                    name,
                    value,
                    reason: "must be strictly positive",
                });
            }
        }
        Ok(())
    }

    /// Log-density at `t`. Returns negative infinity outside the support.
    pub fn ln_pdf(&self, t: f64) -> f64 {
        if !(t > 0.0) || !t.is_finite() {
            return f64::NEG_INFINITY;
        }
        match *self {
            Self::Exponential { rate } => rate.ln() - rate * t,
            Self::Weibull { shape, scale } => {
                let z = t / scale;
                shape.ln() - scale.ln() + (shape - 1.0) * z.ln() - z.powf(shape)
            }
            Self::Gamma { shape, rate } => {
                shape * rate.ln() - ln_gamma(shape) + (shape - 1.0) * t.ln() - rate * t
            }
            Self::LogNormal { meanlog, sdlog } => {
                let ln_t = t.ln();
                let z = (ln_t - meanlog) / sdlog;
                -0.5 * z * z - ln_t - sdlog.ln() - 0.5 * (2.0 * PI).ln()
            }
        }
    }

    pub fn pdf(&self, t: f64) -> f64 {
        self.ln_pdf(t).exp()
    }

    pub fn cdf(&self, t: f64) -> f64 {
        if !(t > 0.0) {
            return 0.0;
        }
        if t == f64::INFINITY {
            return 1.0;
        }
        match *self {
            Self::Exponential { rate } => -(-rate * t).exp_m1(),
            Self::Weibull { shape, scale } => -(-(t / scale).powf(shape)).exp_m1(),
            Self::Gamma { shape, rate } => gamma_lr(shape, rate * t),
            Self::LogNormal { meanlog, sdlog } => {
                0.5 * erfc(-(t.ln() - meanlog) / (sdlog * SQRT_2))
            }
        }
    }

    /// Survival function `1 - F(t)`, computed directly in the upper tail where a
    /// closed form exists.
    pub fn survival(&self, t: f64) -> f64 {
        if !(t > 0.0) {
            return 1.0;
        }
        match *self {
            Self::Exponential { rate } => (-rate * t).exp(),
            Self::Weibull { shape, scale } => (-(t / scale).powf(shape)).exp(),
            Self::Gamma { .. } | Self::LogNormal { .. } => 1.0 - self.cdf(t),
        }
    }

    /// Inverse CDF. The probability is clamped to `[PROB_EPSILON, 1 - PROB_EPSILON]`
    /// so the result is always finite and positive.
    pub fn quantile(&self, p: f64) -> f64 {
        let p = clamp_probability(p);
        match *self {
            Self::Exponential { rate } => -(-p).ln_1p() / rate,
            Self::Weibull { shape, scale } => scale * (-(-p).ln_1p()).powf(1.0 / shape),
            Self::Gamma { shape, rate } => standard_gamma_quantile(shape, p) / rate,
            Self::LogNormal { meanlog, sdlog } => {
                (meanlog + sdlog * standard_normal_quantile(p)).exp()
            }
        }
    }

    /// Draws one value by inversion of a uniform on the open unit interval.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.sample(Open01);
        self.quantile(u)
    }
}

impl fmt::Display for MarginalFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind();
        let rendered: Vec<String> = kind
            .param_names()
            .iter()
            .zip(self.params())
            .map(|(name, value)| format!("{name}={value:.4}"))
            .collect();
        write!(f, "{}({})", kind, rendered.join(", "))
    }
}

#[inline]
fn standard_normal_quantile(p: f64) -> f64 {
    SQRT_2 * erf_inv(2.0 * p - 1.0)
}

/// Quantile of the unit-rate gamma distribution.
///
/// Starts from the Wilson-Hilferty approximation and refines with Newton steps that
/// are confined to a bisection bracket, so every iterate stays positive.
fn standard_gamma_quantile(shape: f64, p: f64) -> f64 {
    let ln_gamma_shape = ln_gamma(shape);
    let z = standard_normal_quantile(p);
    let c = 1.0 / (9.0 * shape);
    let wilson_hilferty = shape * (1.0 - c + z * c.sqrt()).powi(3);
    let mut x = if wilson_hilferty > 0.0 && wilson_hilferty.is_finite() {
        wilson_hilferty
    } else {
        // Small-x expansion of the lower incomplete gamma function.
        ((p.ln() + ln_gamma_shape + shape.ln()) / shape).exp()
    };

    let mut lo = 0.0_f64;
    let mut hi = x.max(1.0);
    while gamma_lr(shape, hi) < p {
        lo = hi;
        hi *= 2.0;
    }
    if !(x > lo && x < hi) {
        x = 0.5 * (lo + hi);
    }

    for _ in 0..QUANTILE_MAX_ITERATIONS {
        let diff = gamma_lr(shape, x) - p;
        if diff > 0.0 {
            hi = x;
        } else {
            lo = x;
        }
        let ln_density = (shape - 1.0) * x.ln() - x - ln_gamma_shape;
        let density = ln_density.exp();
        let mut next = if density > 0.0 && density.is_finite() {
            x - diff / density
        } else {
            f64::NAN
        };
        if !(next > lo && next < hi) {
            next = 0.5 * (lo + hi);
        }
        if (next - x).abs() <= QUANTILE_RELATIVE_TOLERANCE * x.max(f64::MIN_POSITIVE) {
            return next;
        }
        x = next;
    }
    x
}
