//! # Joint Maximum-Likelihood Estimation
//!
//! Recovers the copula dependence parameter and both marginal distributions at once by
//! maximizing the competing-risks likelihood of [`likelihood`] with the bounded
//! optimizer of [`optimizer`], and measures the sampling variability of the estimate
//! with the parallel [`bootstrap`].

use crate::copula::CopulaError;
use crate::margins::fit::{FitError, FitOptions, fit_cause};
use crate::margins::{FamilyKind, MarginalError};
use crate::simulate::{Cause, Dataset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod bootstrap;
pub mod likelihood;
pub mod optimizer;

pub use bootstrap::{
    BootstrapConfig, BootstrapProgressObserver, BootstrapSample, NoopBootstrapProgress,
    ParameterSummary, run_bootstrap,
};
pub use likelihood::{
    BoundsConfig, CompetingRiskLikelihood, LOG_LIKELIHOOD_SENTINEL, ParameterBounds,
    ParameterLayout,
};
pub use optimizer::{OptimizerConfig, StartVector};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimationError {
    #[error(transparent)]
    Copula(#[from] CopulaError),
    #[error(transparent)]
    Marginal(#[from] MarginalError),
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error("Expected {expected} parameters, but {found} were supplied.")]
    WrongParameterCount { expected: usize, found: usize },
    #[error("Parameters were laid out as {found:?}, but {expected:?} was expected.")]
    LayoutMismatch {
        expected: ParameterLayout,
        found: ParameterLayout,
    },
    #[error("Invalid {name} bounds [{lower}, {upper}]: both must be finite and lower < upper.")]
    InvalidBounds {
        name: &'static str,
        lower: f64,
        upper: f64,
    },
    #[error("Start value {value} of parameter {index} lies outside its bounds [{lower}, {upper}].")]
    StartOutsideBounds {
        index: usize,
        value: f64,
        lower: f64,
        upper: f64,
    },
    #[error(
        "No start value is available for cause {cause}: the {family} fit did not converge."
    )]
    StartUnavailable { cause: Cause, family: FamilyKind },
    #[error("Cannot estimate parameters from an empty dataset.")]
    EmptyDataset,
    #[error("Invalid bootstrap setting: {0}")]
    InvalidBootstrap(String),
}

/// Result of one joint maximum-likelihood fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub layout: ParameterLayout,
    pub parameter_names: Vec<String>,
    pub parameters: Vec<f64>,
    pub converged: bool,
    pub log_likelihood: f64,
    /// Negative log-likelihood at `parameters`, the value that was minimized.
    pub objective: f64,
    pub iterations: Option<usize>,
    pub evaluations: usize,
    pub message: String,
}

impl OptimizationResult {
    pub fn estimates(&self) -> BTreeMap<String, f64> {
        self.parameter_names
            .iter()
            .cloned()
            .zip(self.parameters.iter().copied())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.parameter_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.parameters[i])
    }
}

/// Builds the optimizer start vector for `layout`.
///
/// With [`StartVector::MarginalFits`], `theta` starts at 1 and each cause's margin
/// starts at its own maximum-likelihood fit, which fails if that family did not
/// converge for the cause. The result is moved inside the configured bounds.
pub fn start_vector(
    dataset: &Dataset,
    layout: ParameterLayout,
    config: &OptimizerConfig,
    fit_options: &FitOptions,
) -> Result<Vec<f64>, EstimationError> {
    let bounds = layout.bounds(&config.bounds)?;
    let start = match &config.start {
        StartVector::Fixed(values) => {
            if values.len() != layout.len() {
                return Err(EstimationError::WrongParameterCount {
                    expected: layout.len(),
                    found: values.len(),
                });
            }
            values.clone()
        }
        StartVector::MarginalFits => {
            let mut start = vec![1.0];
            for cause in Cause::BOTH {
                let family = layout.margin(cause);
                let fits = fit_cause(dataset, cause, fit_options)?;
                let candidate = fits
                    .candidate(family)
                    .ok_or(EstimationError::StartUnavailable { cause, family })?;
                start.extend(candidate.family.params());
            }
            start
        }
    };
    Ok(start
        .iter()
        .zip(bounds.lower.iter().zip(&bounds.upper))
        .map(|(x, (lo, hi))| x.clamp(*lo, *hi))
        .collect())
}

/// Maximizes the joint likelihood of `dataset` from `start`.
///
/// The optimizer minimizes the mean negative log-likelihood; the reported objective is
/// the total. A run that does not converge is returned with `converged = false`.
pub fn estimate(
    dataset: &Dataset,
    layout: ParameterLayout,
    start: &[f64],
    config: &OptimizerConfig,
) -> Result<OptimizationResult, EstimationError> {
    if dataset.is_empty() {
        return Err(EstimationError::EmptyDataset);
    }
    let bounds = layout.bounds(&config.bounds)?;
    let likelihood = CompetingRiskLikelihood::new(dataset, layout);
    let n = dataset.len() as f64;
    let minimum = optimizer::minimize_bounded(
        |params| -likelihood.log_likelihood(params) / n,
        start,
        &bounds,
        config,
    )?;
    let log_likelihood = likelihood.log_likelihood(&minimum.point);
    // A flat sentinel surface has a zero gradient, which the solver reports as success.
    let degenerate = log_likelihood <= LOG_LIKELIHOOD_SENTINEL;
    let mut message = minimum.message;
    if degenerate {
        message.push_str("; the likelihood is degenerate at the final point");
    }
    let result = OptimizationResult {
        layout,
        parameter_names: layout.names(),
        parameters: minimum.point,
        converged: minimum.converged && !degenerate,
        log_likelihood,
        objective: -log_likelihood,
        iterations: minimum.iterations,
        evaluations: minimum.evaluations,
        message,
    };
    log::debug!(
        "Optimizer finished after {} objective evaluations: {}",
        result.evaluations,
        result.message
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copula::{Copula, CopulaFamily};
    use crate::margins::MarginalFamily;
    use crate::simulate::{SimulationConfig, simulate};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn clayton_dataset(n: usize, seed: u64) -> Dataset {
        let config = SimulationConfig::new(
            Copula::new(CopulaFamily::Clayton, 2.0).unwrap(),
            MarginalFamily::Exponential { rate: 4.0 },
            MarginalFamily::Exponential { rate: 2.5 },
            n,
        )
        .unwrap();
        simulate(&config, &mut StdRng::seed_from_u64(seed)).unwrap()
    }

    fn exponential_layout() -> ParameterLayout {
        ParameterLayout::new(
            CopulaFamily::Clayton,
            FamilyKind::Exponential,
            FamilyKind::Exponential,
        )
    }

    #[test]
    fn start_from_marginal_fits_uses_the_layout_families() {
        let dataset = clayton_dataset(1000, 5);
        let start = start_vector(
            &dataset,
            exponential_layout(),
            &OptimizerConfig::default(),
            &FitOptions::default(),
        )
        .unwrap();
        assert_eq!(start.len(), 3);
        assert_eq!(start[0], 1.0);
        let [n1, _] = dataset.cause_counts();
        let times = dataset.times_for(Cause::First);
        let mean = times.iter().sum::<f64>() / n1 as f64;
        assert!((start[1] - 1.0 / mean).abs() < 1e-9);
    }

    #[test]
    fn fixed_start_is_clamped_into_the_bounds() {
        let dataset = clayton_dataset(100, 5);
        let config = OptimizerConfig {
            start: StartVector::Fixed(vec![500.0, 4.0, 0.0]),
            ..OptimizerConfig::default()
        };
        let start =
            start_vector(&dataset, exponential_layout(), &config, &FitOptions::default()).unwrap();
        assert_eq!(start, vec![100.0, 4.0, 1e-6]);
        let config = OptimizerConfig {
            start: StartVector::Fixed(vec![1.0]),
            ..OptimizerConfig::default()
        };
        assert!(matches!(
            start_vector(&dataset, exponential_layout(), &config, &FitOptions::default()),
            Err(EstimationError::WrongParameterCount { .. })
        ));
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let err = estimate(
            &Dataset::default(),
            exponential_layout(),
            &[1.0, 1.0, 1.0],
            &OptimizerConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, EstimationError::EmptyDataset);
    }

    #[test]
    fn a_degenerate_likelihood_is_never_reported_as_converged() {
        let config = SimulationConfig::new(
            Copula::new(CopulaFamily::Frank, 2.0).unwrap(),
            MarginalFamily::Gamma {
                shape: 2.0,
                rate: 4.0,
            },
            MarginalFamily::Gamma {
                shape: 2.0,
                rate: 4.0,
            },
            2000,
        )
        .unwrap();
        let dataset = simulate(&config, &mut StdRng::seed_from_u64(6)).unwrap();
        let layout = ParameterLayout::new(CopulaFamily::Frank, FamilyKind::Gamma, FamilyKind::Gamma);
        let start = [2.0, 100.0, 1e-6, 100.0, 1e-6];
        let likelihood = CompetingRiskLikelihood::new(&dataset, layout);
        assert_eq!(likelihood.log_likelihood(&start), LOG_LIKELIHOOD_SENTINEL);

        let result = estimate(&dataset, layout, &start, &OptimizerConfig::default()).unwrap();
        assert!(
            !(result.converged && result.log_likelihood <= LOG_LIKELIHOOD_SENTINEL),
            "converged at the sentinel: {}",
            result.message
        );
        if result.log_likelihood <= LOG_LIKELIHOOD_SENTINEL {
            assert!(!result.converged);
            assert!(result.message.contains("degenerate"), "{}", result.message);
        }
    }

    #[test]
    fn estimate_improves_on_the_start() {
        let dataset = clayton_dataset(2000, 8);
        let layout = exponential_layout();
        let start = [1.0, 1.0, 1.0];
        let result = estimate(&dataset, layout, &start, &OptimizerConfig::default()).unwrap();
        let likelihood = CompetingRiskLikelihood::new(&dataset, layout);
        assert!(result.log_likelihood > likelihood.log_likelihood(&start));
        assert_eq!(result.objective, -result.log_likelihood);
        assert_eq!(result.parameter_names, vec!["theta", "rate_1", "rate_2"]);
        assert!(result.get("rate_1").is_some());
        assert!(result.get("shape_1").is_none());
    }
}
