//! Flat exports of study results: CSV for the dataset and the bootstrap replicates,
//! JSON for the summary report, and plain-text tables for the terminal.

use crate::estimate::{BootstrapSample, OptimizationResult, ParameterLayout, ParameterSummary};
use crate::margins::fit::FitResult;
use crate::simulate::{Cause, Dataset, Observation, SimulationError};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::BufWriter;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to read or write output file: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid dataset file: {0}")]
    Dataset(#[from] SimulationError),
}

/// Marginal fits of one cause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CauseFit {
    pub cause: Cause,
    pub fit: FitResult,
}

/// Replicate counts and per-parameter summaries of a bootstrap run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapReport {
    pub attempted: usize,
    pub kept: usize,
    pub dropped: usize,
    pub resample_size: usize,
    pub summaries: Vec<ParameterSummary>,
}

impl From<&BootstrapSample> for BootstrapReport {
    fn from(sample: &BootstrapSample) -> Self {
        Self {
            attempted: sample.attempted,
            kept: sample.kept(),
            dropped: sample.dropped,
            resample_size: sample.resample_size,
            summaries: sample.summaries(),
        }
    }
}

/// Everything a study produced, apart from the raw dataset and replicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyReport {
    pub layout: ParameterLayout,
    pub true_parameters: BTreeMap<String, f64>,
    pub sample_size: usize,
    pub cause_counts: [usize; 2],
    pub marginal_fits: Vec<CauseFit>,
    pub mle: OptimizationResult,
    pub bootstrap: Option<BootstrapReport>,
}

impl StudyReport {
    pub fn save_json(&self, path: &Path) -> Result<(), ReportError> {
        let file = BufWriter::new(fs::File::create(path)?);
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self, ReportError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Writes one `closure_time,cause` row per observation.
pub fn write_dataset(path: &Path, dataset: &Dataset) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path)?;
    for obs in dataset.iter() {
        writer.serialize(obs)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_dataset(path: &Path) -> Result<Dataset, ReportError> {
    let mut reader = csv::Reader::from_path(path)?;
    let observations = reader
        .deserialize::<Observation>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Dataset::from_observations(observations)?)
}

/// Writes one row per kept replicate: the replicate index, then one column per parameter.
pub fn write_bootstrap(path: &Path, sample: &BootstrapSample) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(
        std::iter::once("replicate").chain(sample.parameter_names.iter().map(String::as_str)),
    )?;
    for (index, row) in sample.replicate_indices.iter().zip(&sample.replicates) {
        writer.write_record(
            std::iter::once(index.to_string()).chain(row.iter().map(|v| v.to_string())),
        )?;
    }
    writer.flush()?;
    Ok(())
}

/// AIC table of one cause, one candidate per line, the selected family marked.
pub fn format_fit_table(cause: Cause, fit: &FitResult) -> String {
    let mut lines = vec![format!(
        "Cause {cause} ({} observations): selected {}{}",
        fit.sample_size,
        fit.best()
            .map_or_else(|| fit.best_fit.to_string(), |c| c.family.to_string()),
        if fit.parsimony_override {
            " (parsimony override)"
        } else {
            ""
        }
    )];
    for candidate in fit.candidates.iter().sorted_by(|a, b| a.aic.total_cmp(&b.aic)) {
        let marker = if candidate.family.kind() == fit.best_fit {
            "*"
        } else {
            " "
        };
        lines.push(format!(
            "  {marker} {:<12} AIC = {:>12.3}  {}",
            candidate.family.kind().to_string(),
            candidate.aic,
            candidate.family
        ));
    }
    for failure in &fit.failures {
        lines.push(format!("    {:<12} excluded: {}", failure.family.to_string(), failure.reason));
    }
    lines.join("\n")
}

/// Point estimates, with bootstrap intervals when available.
pub fn format_estimates(mle: &OptimizationResult, summaries: &[ParameterSummary]) -> String {
    let header = format!(
        "log-likelihood = {:.4}, converged = {}",
        mle.log_likelihood, mle.converged
    );
    let rows = mle
        .parameter_names
        .iter()
        .zip(&mle.parameters)
        .map(|(name, value)| {
            match summaries.iter().find(|s| &s.name == name) {
                Some(s) => format!(
                    "  {name:<10} {value:>10.4}   sd {:>8.4}   95% [{:.4}, {:.4}]",
                    s.sd, s.q025, s.q975
                ),
                None => format!("  {name:<10} {value:>10.4}"),
            }
        })
        .join("\n");
    format!("{header}\n{rows}")
}
