//! Joint competing-risks log-likelihood under a bivariate copula.
//!
//! An observation that ended with cause `a` at time `t` contributes
//! `f_a(t) * cond(F_a(t), F_b(t), theta)`, where `b` is the other cause. The total is
//! accumulated term by term; the first degenerate term ends the evaluation and the
//! sentinel [`LOG_LIKELIHOOD_SENTINEL`] is returned instead.

use super::EstimationError;
use crate::copula::{Copula, CopulaFamily};
use crate::margins::{FamilyKind, MarginalFamily};
use crate::simulate::{Cause, Dataset};
use serde::{Deserialize, Serialize};

/// Returned instead of a log-likelihood whenever the parameters are outside their
/// domain or some observation has a non-positive or non-finite likelihood.
pub const LOG_LIKELIHOOD_SENTINEL: f64 = -1e10;

/// Box bounds for each parameter class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsConfig {
    /// Bounds of the copula dependence parameter.
    pub theta: [f64; 2],
    /// Bounds of every strictly positive marginal parameter (rates, shapes, scales, sdlog).
    pub positive: [f64; 2],
    /// Bounds of unrestricted location parameters (meanlog).
    pub location: [f64; 2],
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            theta: [1e-4, 100.0],
            positive: [1e-6, 100.0],
            location: [-100.0, 100.0],
        }
    }
}

/// Componentwise lower and upper bounds of a flattened parameter vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl ParameterBounds {
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn contains(&self, params: &[f64]) -> bool {
        params.len() == self.len()
            && params
                .iter()
                .zip(self.lower.iter().zip(&self.upper))
                .all(|(x, (lo, hi))| *lo <= *x && *x <= *hi)
    }

    /// Moves every component strictly inside its interval, keeping a margin of
    /// `fraction` of the interval width from either end.
    pub fn project_interior(&self, params: &[f64], fraction: f64) -> Vec<f64> {
        params
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .map(|(x, (lo, hi))| {
                let pad = (hi - lo) * fraction;
                x.clamp(lo + pad, hi - pad)
            })
            .collect()
    }
}

/// Ordering of the flattened parameter vector: `theta` first, then the parameters of
/// the first cause's margin, then those of the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterLayout {
    pub copula: CopulaFamily,
    pub margins: [FamilyKind; 2],
}

impl ParameterLayout {
    pub fn new(copula: CopulaFamily, first: FamilyKind, second: FamilyKind) -> Self {
        Self {
            copula,
            margins: [first, second],
        }
    }

    pub fn margin(&self, cause: Cause) -> FamilyKind {
        self.margins[cause.index()]
    }

    pub fn len(&self) -> usize {
        1 + self.margins.iter().map(|k| k.param_count()).sum::<usize>()
    }

    /// `theta`, then `<parameter>_<cause>` for every marginal parameter.
    pub fn names(&self) -> Vec<String> {
        let mut names = vec!["theta".to_string()];
        for cause in Cause::BOTH {
            for param in self.margin(cause).param_names() {
                names.push(format!("{param}_{cause}"));
            }
        }
        names
    }

    /// Range of the flattened vector that holds the parameters of `cause`.
    pub fn margin_range(&self, cause: Cause) -> std::ops::Range<usize> {
        let first = self.margins[0].param_count();
        match cause {
            Cause::First => 1..1 + first,
            Cause::Second => 1 + first..self.len(),
        }
    }

    pub fn bounds(&self, config: &BoundsConfig) -> Result<ParameterBounds, EstimationError> {
        for (name, [lo, hi]) in [
            ("theta", config.theta),
            ("positive", config.positive),
            ("location", config.location),
        ] {
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(EstimationError::InvalidBounds {
                    name,
                    lower: lo,
                    upper: hi,
                });
            }
        }
        let mut lower = vec![config.theta[0]];
        let mut upper = vec![config.theta[1]];
        for cause in Cause::BOTH {
            for param in self.margin(cause).param_names() {
                let [lo, hi] = if *param == "meanlog" {
                    config.location
                } else {
                    config.positive
                };
                lower.push(lo);
                upper.push(hi);
            }
        }
        Ok(ParameterBounds { lower, upper })
    }

    /// Flattens a copula and two margins in layout order.
    pub fn flatten(
        &self,
        copula: &Copula,
        margins: &[MarginalFamily; 2],
    ) -> Result<Vec<f64>, EstimationError> {
        let found = ParameterLayout::new(copula.family(), margins[0].kind(), margins[1].kind());
        if found != *self {
            return Err(EstimationError::LayoutMismatch {
                expected: *self,
                found,
            });
        }
        let mut params = vec![copula.theta()];
        for margin in margins {
            params.extend(margin.params());
        }
        Ok(params)
    }

    /// Rebuilds the validated copula and margins from a flattened vector.
    pub fn unpack(
        &self,
        params: &[f64],
    ) -> Result<(Copula, [MarginalFamily; 2]), EstimationError> {
        if params.len() != self.len() {
            return Err(EstimationError::WrongParameterCount {
                expected: self.len(),
                found: params.len(),
            });
        }
        let copula = Copula::new(self.copula, params[0])?;
        let first = MarginalFamily::from_params(
            self.margins[0],
            &params[self.margin_range(Cause::First)],
        )?;
        let second = MarginalFamily::from_params(
            self.margins[1],
            &params[self.margin_range(Cause::Second)],
        )?;
        Ok((copula, [first, second]))
    }
}

/// The log-likelihood of one dataset as a function of the flattened parameters.
#[derive(Debug, Clone, Copy)]
pub struct CompetingRiskLikelihood<'a> {
    dataset: &'a Dataset,
    layout: ParameterLayout,
}

impl<'a> CompetingRiskLikelihood<'a> {
    pub fn new(dataset: &'a Dataset, layout: ParameterLayout) -> Self {
        Self { dataset, layout }
    }

    pub fn log_likelihood(&self, params: &[f64]) -> f64 {
        let Ok((copula, margins)) = self.layout.unpack(params) else {
            return LOG_LIKELIHOOD_SENTINEL;
        };
        let mut total = 0.0;
        for obs in self.dataset.iter() {
            let t = obs.closure_time;
            let own = margins[obs.cause.index()];
            let other = margins[obs.cause.other().index()];
            let contribution = own.pdf(t) * copula.conditional(own.cdf(t), other.cdf(t));
            if !(contribution > 0.0 && contribution.is_finite()) {
                return LOG_LIKELIHOOD_SENTINEL;
            }
            total += contribution.ln();
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::{Observation, SimulationConfig, simulate};
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn gamma_layout() -> ParameterLayout {
        ParameterLayout::new(CopulaFamily::Frank, FamilyKind::Gamma, FamilyKind::Gamma)
    }

    #[test]
    fn names_and_ranges_follow_the_layout() {
        let layout = ParameterLayout::new(
            CopulaFamily::Clayton,
            FamilyKind::Exponential,
            FamilyKind::LogNormal,
        );
        assert_eq!(layout.len(), 4);
        assert_eq!(
            layout.names(),
            vec!["theta", "rate_1", "meanlog_2", "sdlog_2"]
        );
        assert_eq!(layout.margin_range(Cause::First), 1..2);
        assert_eq!(layout.margin_range(Cause::Second), 2..4);
        let bounds = layout.bounds(&BoundsConfig::default()).unwrap();
        assert_eq!(bounds.lower, vec![1e-4, 1e-6, -100.0, 1e-6]);
        assert_eq!(bounds.upper, vec![100.0, 100.0, 100.0, 100.0]);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let config = BoundsConfig {
            positive: [5.0, 1.0],
            ..BoundsConfig::default()
        };
        assert!(matches!(
            gamma_layout().bounds(&config),
            Err(EstimationError::InvalidBounds {
                name: "positive",
                ..
            })
        ));
    }

    #[test]
    fn flatten_and_unpack_agree() {
        let layout = gamma_layout();
        let copula = Copula::new(CopulaFamily::Frank, 2.0).unwrap();
        let margins = [
            MarginalFamily::Gamma {
                shape: 2.0,
                rate: 4.0,
            },
            MarginalFamily::Gamma {
                shape: 1.5,
                rate: 3.0,
            },
        ];
        let flat = layout.flatten(&copula, &margins).unwrap();
        assert_eq!(flat, vec![2.0, 2.0, 4.0, 1.5, 3.0]);
        let (c, m) = layout.unpack(&flat).unwrap();
        assert_eq!(c, copula);
        assert_eq!(m, margins);
        assert!(matches!(
            layout.unpack(&flat[..4]),
            Err(EstimationError::WrongParameterCount {
                expected: 5,
                found: 4
            })
        ));
    }

    #[test]
    fn single_observation_matches_the_closed_form() {
        let dataset = Dataset::from_observations(vec![Observation {
            closure_time: 0.3,
            cause: Cause::Second,
        }])
        .unwrap();
        let layout = ParameterLayout::new(
            CopulaFamily::Clayton,
            FamilyKind::Exponential,
            FamilyKind::Exponential,
        );
        let likelihood = CompetingRiskLikelihood::new(&dataset, layout);
        let (theta, r1, r2) = (2.0, 4.0, 2.5);
        let f2 = r2 * (-r2 * 0.3_f64).exp();
        let u2 = 1.0 - (-r2 * 0.3_f64).exp();
        let u1 = 1.0 - (-r1 * 0.3_f64).exp();
        let cond = 1.0
            - (u2.powf(-theta) + u1.powf(-theta) - 1.0).powf(-(1.0 + 1.0 / theta))
                * u2.powf(-(1.0 + theta));
        assert_relative_eq!(
            likelihood.log_likelihood(&[theta, r1, r2]),
            (f2 * cond).ln(),
            max_relative = 1e-10
        );
    }

    #[test]
    fn out_of_domain_parameters_return_the_sentinel() {
        let config = SimulationConfig::new(
            Copula::new(CopulaFamily::Clayton, 2.0).unwrap(),
            MarginalFamily::Exponential { rate: 4.0 },
            MarginalFamily::Exponential { rate: 2.5 },
            200,
        )
        .unwrap();
        let dataset = simulate(&config, &mut StdRng::seed_from_u64(2)).unwrap();
        let layout = ParameterLayout::new(
            CopulaFamily::Clayton,
            FamilyKind::Exponential,
            FamilyKind::Exponential,
        );
        let likelihood = CompetingRiskLikelihood::new(&dataset, layout);
        for params in [
            [0.0, 4.0, 2.5],
            [-1.0, 4.0, 2.5],
            [2.0, -4.0, 2.5],
            [2.0, 4.0, 0.0],
            [f64::NAN, 4.0, 2.5],
        ] {
            assert_eq!(likelihood.log_likelihood(&params), LOG_LIKELIHOOD_SENTINEL);
        }
        assert_eq!(
            likelihood.log_likelihood(&[2.0, 4.0]),
            LOG_LIKELIHOOD_SENTINEL
        );
        let at_truth = likelihood.log_likelihood(&[2.0, 4.0, 2.5]);
        assert!(at_truth.is_finite() && at_truth > LOG_LIKELIHOOD_SENTINEL);
    }
}
