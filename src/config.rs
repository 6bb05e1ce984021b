//! Study configuration, stored as TOML.

use crate::copula::{Copula, CopulaFamily};
use crate::estimate::{BootstrapConfig, OptimizerConfig, ParameterLayout};
use crate::margins::MarginalFamily;
use crate::margins::fit::FitOptions;
use crate::simulate::{SimulationConfig, SimulationError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid [simulation] section: {0}")]
    Simulation(#[from] SimulationError),
}

/// The data-generating process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    pub copula: CopulaFamily,
    pub theta: f64,
    pub n: usize,
    pub seed: u64,
    pub margin_1: MarginalFamily,
    pub margin_2: MarginalFamily,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            copula: CopulaFamily::Frank,
            theta: 2.0,
            n: 10_000,
            seed: 6,
            margin_1: MarginalFamily::Gamma {
                shape: 2.0,
                rate: 4.0,
            },
            margin_2: MarginalFamily::Gamma {
                shape: 2.0,
                rate: 4.0,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StudyConfig {
    pub simulation: SimulationSection,
    pub fitting: FitOptions,
    pub optimizer: OptimizerConfig,
    pub bootstrap: BootstrapConfig,
}

impl StudyConfig {
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config = toml::from_str(&toml_string)?;
        Ok(config)
    }

    /// Validates the `[simulation]` section into the immutable simulation input.
    pub fn simulation_config(&self) -> Result<SimulationConfig, ConfigError> {
        let sim = &self.simulation;
        let copula = Copula::new(sim.copula, sim.theta).map_err(SimulationError::from)?;
        Ok(SimulationConfig::new(
            copula,
            sim.margin_1,
            sim.margin_2,
            sim.n,
        )?)
    }

    /// Estimation is carried out under the simulated families.
    pub fn layout(&self) -> ParameterLayout {
        ParameterLayout::new(
            self.simulation.copula,
            self.simulation.margin_1.kind(),
            self.simulation.margin_2.kind(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::StartVector;
    use tempfile::tempdir;

    #[test]
    fn default_config_round_trips_through_a_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("study.toml");
        let mut config = StudyConfig::default();
        config.optimizer.start = StartVector::Fixed(vec![2.0, 2.0, 4.0, 2.0, 4.0]);
        config.save(&path).unwrap();
        let loaded = StudyConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let config: StudyConfig = toml::from_str(
            r#"
            [simulation]
            copula = "clayton"
            n = 500

            [simulation.margin_1]
            family = "exponential"
            rate = 4.0

            [bootstrap]
            replicates = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.simulation.copula, CopulaFamily::Clayton);
        assert_eq!(config.simulation.n, 500);
        assert_eq!(
            config.simulation.margin_1,
            MarginalFamily::Exponential { rate: 4.0 }
        );
        assert_eq!(config.simulation.margin_2, SimulationSection::default().margin_2);
        assert_eq!(config.bootstrap.replicates, 20);
        assert_eq!(config.bootstrap.resample_size, 2000);
        assert_eq!(config.optimizer, OptimizerConfig::default());
    }

    #[test]
    fn invalid_simulation_sections_are_reported() {
        let mut config = StudyConfig::default();
        config.simulation.copula = CopulaFamily::Clayton;
        config.simulation.theta = -1.0;
        assert!(matches!(
            config.simulation_config(),
            Err(ConfigError::Simulation(SimulationError::Copula(_)))
        ));
        config.simulation.theta = 2.0;
        config.simulation.margin_2 = MarginalFamily::LogNormal {
            meanlog: 0.0,
            sdlog: 1.0,
        };
        assert!(matches!(
            config.simulation_config(),
            Err(ConfigError::Simulation(SimulationError::UnsupportedMargin { risk: 2, .. }))
        ));
    }
}
