//! The end-to-end study: simulate, fit margins, estimate jointly, bootstrap.

use crate::config::{ConfigError, StudyConfig};
use crate::estimate::{
    self, BootstrapProgressObserver, BootstrapSample, EstimationError, OptimizationResult,
    run_bootstrap, start_vector,
};
use crate::margins::fit::{FitError, fit_cause};
use crate::report::{BootstrapReport, CauseFit, ReportError, StudyReport};
use crate::simulate::{Cause, Dataset, SimulationError, simulate};
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StudyError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Simulation failed: {0}")]
    Simulation(#[from] SimulationError),
    #[error("Marginal fitting failed: {0}")]
    Fit(#[from] FitError),
    #[error("Estimation failed: {0}")]
    Estimation(#[from] EstimationError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Everything produced by [`run_study`].
#[derive(Debug, Clone)]
pub struct StudyOutcome {
    pub dataset: Dataset,
    pub bootstrap: Option<BootstrapSample>,
    pub report: StudyReport,
}

/// Simulates the configured dataset from the configured seed.
pub fn simulate_dataset(config: &StudyConfig) -> Result<Dataset, StudyError> {
    let sim = config.simulation_config()?;
    let mut rng = StdRng::seed_from_u64(config.simulation.seed);
    Ok(simulate(&sim, &mut rng)?)
}

/// Fits every candidate family to each cause. A cause with too few observations is
/// an error for the whole call.
pub fn fit_margins(dataset: &Dataset, config: &StudyConfig) -> Result<Vec<CauseFit>, StudyError> {
    Cause::BOTH
        .into_iter()
        .map(|cause| -> Result<CauseFit, StudyError> {
            let fit = fit_cause(dataset, cause, &config.fitting)?;
            log::info!(
                "Cause {cause}: {} observations, selected {}{}.",
                fit.sample_size,
                fit.best()
                    .map_or_else(|| fit.best_fit.to_string(), |c| c.family.to_string()),
                if fit.parsimony_override {
                    " (parsimony override)"
                } else {
                    ""
                }
            );
            Ok(CauseFit { cause, fit })
        })
        .collect()
}

/// Joint maximum-likelihood estimate under the configured layout and start.
pub fn estimate_joint(
    dataset: &Dataset,
    config: &StudyConfig,
) -> Result<OptimizationResult, StudyError> {
    let layout = config.layout();
    let start = start_vector(dataset, layout, &config.optimizer, &config.fitting)?;
    log::info!("Estimating {} parameters from start {start:?}.", layout.len());
    let result = estimate::estimate(dataset, layout, &start, &config.optimizer)?;
    if result.converged {
        log::info!(
            "Joint fit converged: log-likelihood {:.4} at {:?}.",
            result.log_likelihood,
            result.estimates()
        );
    } else {
        log::warn!(
            "Joint fit did not converge ({}); reporting the best point found.",
            result.message
        );
    }
    Ok(result)
}

/// Bootstraps the joint estimate. Every replicate starts from the full-data estimate
/// when it converged, otherwise from the configured start vector.
pub fn bootstrap_joint(
    dataset: &Dataset,
    config: &StudyConfig,
    mle: &OptimizationResult,
    observer: &dyn BootstrapProgressObserver,
) -> Result<BootstrapSample, StudyError> {
    let layout = config.layout();
    let start = if mle.converged && mle.layout == layout {
        mle.parameters.clone()
    } else {
        start_vector(dataset, layout, &config.optimizer, &config.fitting)?
    };
    Ok(run_bootstrap(
        dataset,
        layout,
        &start,
        &config.optimizer,
        &config.bootstrap,
        observer,
    )?)
}

/// Runs the whole study. The bootstrap is skipped when `with_bootstrap` is false.
pub fn run_study(
    config: &StudyConfig,
    with_bootstrap: bool,
    observer: &dyn BootstrapProgressObserver,
) -> Result<StudyOutcome, StudyError> {
    let sim = config.simulation_config()?;
    let layout = config.layout();
    let dataset = simulate_dataset(config)?;
    let marginal_fits = fit_margins(&dataset, config)?;
    let mle = estimate_joint(&dataset, config)?;
    let bootstrap = if with_bootstrap {
        Some(bootstrap_joint(&dataset, config, &mle, observer)?)
    } else {
        None
    };

    let truth = layout.flatten(&sim.copula(), &sim.margins())?;
    let report = StudyReport {
        layout,
        true_parameters: layout.names().into_iter().zip(truth).collect(),
        sample_size: dataset.len(),
        cause_counts: dataset.cause_counts(),
        marginal_fits,
        mle,
        bootstrap: bootstrap.as_ref().map(BootstrapReport::from),
    };
    Ok(StudyOutcome {
        dataset,
        bootstrap,
        report,
    })
}
