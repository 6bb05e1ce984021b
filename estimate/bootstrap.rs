//! Nonparametric bootstrap of the joint maximum-likelihood estimate.
//!
//! Replicate `i` resamples the dataset with an RNG seeded from `seed + i`, refits from
//! the same start vector and keeps the estimate only when the optimizer converged.
//! Replicates run on the rayon pool; results are gathered in replicate order, so the
//! sample does not depend on the number of threads.

use super::{EstimationError, OptimizerConfig, ParameterLayout, estimate};
use crate::simulate::Dataset;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Number of replicates `B`.
    pub replicates: usize,
    /// Resample size `m`; may be smaller or larger than the dataset.
    pub resample_size: usize,
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            replicates: 500,
            resample_size: 2000,
            seed: 2024,
        }
    }
}

/// Observer for reporting progress while replicates run. Called from worker threads.
pub trait BootstrapProgressObserver: Sync {
    fn on_start(&self, total_replicates: usize) {
        let _ = total_replicates;
    }
    fn on_replicate_finished(&self, index: usize, converged: bool) {
        let _ = (index, converged);
    }
    fn on_finish(&self, kept: usize, dropped: usize) {
        let _ = (kept, dropped);
    }
}

#[derive(Default)]
pub struct NoopBootstrapProgress;

impl BootstrapProgressObserver for NoopBootstrapProgress {}

/// Estimates of the converged replicates, in replicate order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapSample {
    pub parameter_names: Vec<String>,
    /// Index of the replicate each row came from.
    pub replicate_indices: Vec<usize>,
    pub replicates: Vec<Vec<f64>>,
    pub attempted: usize,
    pub dropped: usize,
    pub resample_size: usize,
}

impl BootstrapSample {
    pub fn kept(&self) -> usize {
        self.replicates.len()
    }

    /// Every kept value of the parameter at `index`.
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.replicates.iter().map(|row| row[index]).collect()
    }

    pub fn column_by_name(&self, name: &str) -> Option<Vec<f64>> {
        self.parameter_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.column(i))
    }

    /// Per-parameter summaries over the kept replicates; empty when none survived.
    pub fn summaries(&self) -> Vec<ParameterSummary> {
        if self.replicates.is_empty() {
            return Vec::new();
        }
        self.parameter_names
            .iter()
            .enumerate()
            .map(|(i, name)| ParameterSummary::from_values(name, &self.column(i)))
            .collect()
    }

    pub fn summary(&self, name: &str) -> Option<ParameterSummary> {
        self.column_by_name(name)
            .filter(|values| !values.is_empty())
            .map(|values| ParameterSummary::from_values(name, &values))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    /// Sample standard deviation (divisor `k - 1`); zero for a single value.
    pub sd: f64,
    pub q025: f64,
    pub median: f64,
    pub q975: f64,
}

impl ParameterSummary {
    fn from_values(name: &str, values: &[f64]) -> Self {
        let k = values.len() as f64;
        let mean = values.iter().sum::<f64>() / k;
        let sd = if values.len() > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (k - 1.0)).sqrt()
        } else {
            0.0
        };
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        Self {
            name: name.to_string(),
            mean,
            sd,
            q025: quantile_linear_sorted(&sorted, 0.025),
            median: quantile_linear_sorted(&sorted, 0.5),
            q975: quantile_linear_sorted(&sorted, 0.975),
        }
    }

    /// The 95% percentile interval.
    pub fn percentile_interval(&self) -> (f64, f64) {
        (self.q025, self.q975)
    }
}

/// Quantile of sorted data by linear interpolation between order statistics.
pub fn quantile_linear_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        len => {
            let pos = q.clamp(0.0, 1.0) * (len - 1) as f64;
            let i = pos.floor() as usize;
            let j = pos.ceil() as usize;
            let t = pos - i as f64;
            (1.0 - t) * sorted[i] + t * sorted[j]
        }
    }
}

/// Runs `config.replicates` bootstrap refits of `dataset`.
///
/// A replicate whose optimizer does not converge is dropped and counted, never
/// retried or replaced.
pub fn run_bootstrap(
    dataset: &Dataset,
    layout: ParameterLayout,
    start: &[f64],
    optimizer: &OptimizerConfig,
    config: &BootstrapConfig,
    observer: &dyn BootstrapProgressObserver,
) -> Result<BootstrapSample, EstimationError> {
    if dataset.is_empty() {
        return Err(EstimationError::EmptyDataset);
    }
    if config.replicates == 0 {
        return Err(EstimationError::InvalidBootstrap(
            "the number of replicates must be at least 1".to_string(),
        ));
    }
    if config.resample_size == 0 {
        return Err(EstimationError::InvalidBootstrap(
            "the resample size must be at least 1".to_string(),
        ));
    }
    let bounds = layout.bounds(&optimizer.bounds)?;
    if start.len() != bounds.len() {
        return Err(EstimationError::WrongParameterCount {
            expected: bounds.len(),
            found: start.len(),
        });
    }
    if let Some(index) = (0..start.len())
        .find(|&i| !(bounds.lower[i] <= start[i] && start[i] <= bounds.upper[i]))
    {
        return Err(EstimationError::StartOutsideBounds {
            index,
            value: start[index],
            lower: bounds.lower[index],
            upper: bounds.upper[index],
        });
    }

    log::info!(
        "Running {} bootstrap replicates of size {} on {} threads.",
        config.replicates,
        config.resample_size,
        rayon::current_num_threads()
    );
    observer.on_start(config.replicates);

    let outcomes: Vec<Option<Vec<f64>>> = (0..config.replicates)
        .into_par_iter()
        .map(|index| {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(index as u64));
            let resampled = dataset.resample(config.resample_size, &mut rng);
            let kept = match estimate(&resampled, layout, start, optimizer) {
                Ok(result) if result.converged => Some(result.parameters),
                Ok(result) => {
                    log::debug!("Replicate {index} did not converge: {}", result.message);
                    None
                }
                Err(e) => {
                    log::debug!("Replicate {index} failed: {e}");
                    None
                }
            };
            observer.on_replicate_finished(index, kept.is_some());
            kept
        })
        .collect();

    let mut replicate_indices = Vec::new();
    let mut replicates = Vec::new();
    for (index, outcome) in outcomes.into_iter().enumerate() {
        if let Some(params) = outcome {
            replicate_indices.push(index);
            replicates.push(params);
        }
    }
    let dropped = config.replicates - replicates.len();
    observer.on_finish(replicates.len(), dropped);
    if dropped > 0 {
        log::warn!(
            "{dropped} of {} bootstrap replicates did not converge and were dropped.",
            config.replicates
        );
    }
    log::info!(
        "Bootstrap kept {} of {} replicates.",
        replicates.len(),
        config.replicates
    );

    Ok(BootstrapSample {
        parameter_names: layout.names(),
        replicate_indices,
        replicates,
        attempted: config.replicates,
        dropped,
        resample_size: config.resample_size,
    })
}
