//! # Competing-Risks Simulation
//!
//! Draws dependent uniform pairs from the configured copula, maps each margin to an
//! event time through its family's quantile function, and reduces every latent pair
//! to the observed `(closure_time, cause)` record. Only gamma and exponential margins
//! are accepted as simulation targets.

use crate::copula::{Copula, CopulaError, CopulaSampler};
use crate::margins::{FamilyKind, MarginalError, MarginalFamily};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;

pub mod reduce;

pub use reduce::{Cause, Dataset, Observation};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error(transparent)]
    Copula(#[from] CopulaError),
    #[error(transparent)]
    Marginal(#[from] MarginalError),
    #[error(
        "Risk {risk} uses the {family} family, but only gamma and exponential margins can be simulated."
    )]
    UnsupportedMargin { risk: usize, family: FamilyKind },
    #[error("The sample size must be at least 1.")]
    EmptySample,
    #[error("Observation {index} has closure time {value}; closure times must be finite and strictly positive.")]
    InvalidObservation { index: usize, value: f64 },
}

/// Everything needed to simulate one dataset. Fields are private; a value of this type
/// has passed validation and cannot be changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimulationConfig {
    copula: Copula,
    margins: [MarginalFamily; 2],
    n: usize,
}

impl SimulationConfig {
    pub fn new(
        copula: Copula,
        first: MarginalFamily,
        second: MarginalFamily,
        n: usize,
    ) -> Result<Self, SimulationError> {
        if n == 0 {
            return Err(SimulationError::EmptySample);
        }
        for (idx, margin) in [first, second].iter().enumerate() {
            margin.validate()?;
            match margin.kind() {
                FamilyKind::Gamma | FamilyKind::Exponential => {}
                family => {
                    return Err(SimulationError::UnsupportedMargin {
                        risk: idx + 1,
                        family,
                    });
                }
            }
        }
        Ok(Self {
            copula,
            margins: [first, second],
            n,
        })
    }

    pub fn copula(&self) -> Copula {
        self.copula
    }

    pub fn margin(&self, cause: Cause) -> MarginalFamily {
        self.margins[cause.index()]
    }

    pub fn margins(&self) -> [MarginalFamily; 2] {
        self.margins
    }

    pub fn n(&self) -> usize {
        self.n
    }
}

/// Both latent event times of one simulated unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatentPair {
    pub t1: f64,
    pub t2: f64,
}

/// Draws `n` latent pairs. The quantile functions clamp their input, so every time is
/// finite and positive even when the copula draw lands extremely close to 0 or 1.
pub fn simulate_latent<R: Rng + ?Sized>(
    config: &SimulationConfig,
    rng: &mut R,
) -> Result<Vec<LatentPair>, SimulationError> {
    let sampler = CopulaSampler::from_copula(config.copula)?;
    let [first, second] = config.margins;
    let latent = (0..config.n)
        .map(|_| {
            let (u1, u2) = sampler.sample_pair(rng);
            LatentPair {
                t1: first.quantile(u1),
                t2: second.quantile(u2),
            }
        })
        .collect();
    Ok(latent)
}

/// Simulates latent pairs and reduces them to an observed dataset.
pub fn simulate<R: Rng + ?Sized>(
    config: &SimulationConfig,
    rng: &mut R,
) -> Result<Dataset, SimulationError> {
    let latent = simulate_latent(config, rng)?;
    let dataset = Dataset::reduce(&latent);
    let [first, second] = dataset.cause_counts();
    log::info!(
        "Simulated {} observations under {}: cause 1 = {first}, cause 2 = {second}.",
        dataset.len(),
        config.copula,
    );
    Ok(dataset)
}
