//! Reduction of latent pairs to observed competing-risks records.

use super::{LatentPair, SimulationError};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// The risk that ended an observation. Serialized as `1` or `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cause {
    First,
    Second,
}

impl Cause {
    pub const BOTH: [Cause; 2] = [Cause::First, Cause::Second];

    pub fn code(self) -> u8 {
        match self {
            Self::First => 1,
            Self::Second => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::First),
            2 => Some(Self::Second),
            _ => None,
        }
    }

    /// Zero-based position, for indexing per-cause arrays.
    pub fn index(self) -> usize {
        usize::from(self.code() - 1)
    }

    pub fn other(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for Cause {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Cause {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Cause::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("cause must be 1 or 2, got {code}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub closure_time: f64,
    pub cause: Cause,
}

impl Observation {
    /// The earlier latent time wins; equal times are attributed to the second cause.
    pub fn from_latent(pair: LatentPair) -> Self {
        if pair.t1 < pair.t2 {
            Self {
                closure_time: pair.t1,
                cause: Cause::First,
            }
        } else {
            Self {
                closure_time: pair.t2,
                cause: Cause::Second,
            }
        }
    }
}

/// An ordered collection of observations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    observations: Vec<Observation>,
}

impl Dataset {
    pub fn reduce(latent: &[LatentPair]) -> Self {
        Self {
            observations: latent.iter().copied().map(Observation::from_latent).collect(),
        }
    }

    /// Wraps externally supplied observations after checking every closure time.
    pub fn from_observations(observations: Vec<Observation>) -> Result<Self, SimulationError> {
        if let Some((index, obs)) = observations
            .iter()
            .enumerate()
            .find(|(_, o)| !(o.closure_time.is_finite() && o.closure_time > 0.0))
        {
            return Err(SimulationError::InvalidObservation {
                index,
                value: obs.closure_time,
            });
        }
        Ok(Self { observations })
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> + '_ {
        self.observations.iter()
    }

    /// Closure times of the observations that ended with `cause`, in dataset order.
    pub fn times_for(&self, cause: Cause) -> Vec<f64> {
        self.observations
            .iter()
            .filter(|o| o.cause == cause)
            .map(|o| o.closure_time)
            .collect()
    }

    /// `[count of cause 1, count of cause 2]`.
    pub fn cause_counts(&self) -> [usize; 2] {
        let mut counts = [0usize; 2];
        for obs in &self.observations {
            counts[obs.cause.index()] += 1;
        }
        counts
    }

    /// Draws `m` observations uniformly with replacement. `m` may be smaller or larger
    /// than the dataset; an empty dataset yields an empty resample.
    pub fn resample<R: Rng + ?Sized>(&self, m: usize, rng: &mut R) -> Dataset {
        if self.observations.is_empty() {
            return Dataset::default();
        }
        let n = self.observations.len();
        let observations = (0..m)
            .map(|_| self.observations[rng.gen_range(0..n)])
            .collect();
        Dataset { observations }
    }
}
