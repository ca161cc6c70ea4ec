//! TOML description of a fitting job, as consumed by `eisfit fit`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::circuits::Circuit;
use crate::errors::{EisError, Result};
use crate::fitting::FitOptions;
use crate::math::Scalar;
use crate::models::CustomCircuit;
use crate::validation::LinKkOptions;

/// A complete fitting job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FitConfig {
    /// Model definition.
    pub circuit: CircuitConfig,
    /// Measured spectrum and preprocessing.
    pub data: DataConfig,
    /// Optimizer settings.
    #[serde(default)]
    pub fit: FitOptions,
    /// Runs lin-KK on the data before fitting when present.
    pub validation: Option<LinKkOptions>,
    /// Output files.
    #[serde(default)]
    pub output: OutputConfig,
}

/// `[circuit]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitConfig {
    /// Circuit string, e.g. `R0-p(R1,C1)`.
    pub string: String,
    /// Initial values of the free parameters.
    pub initial_guess: Vec<Scalar>,
    /// Parameters held fixed, by name.
    #[serde(default)]
    pub constants: BTreeMap<String, Scalar>,
    /// Display name.
    pub name: Option<String>,
}

/// `[data]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    /// CSV file with `frequency, Z_real, Z_imag` rows.
    pub path: PathBuf,
    /// Lowest frequency kept, in Hz.
    pub freq_min: Option<Scalar>,
    /// Highest frequency kept, in Hz.
    pub freq_max: Option<Scalar>,
    /// Drops points with non-negative imaginary impedance.
    #[serde(default)]
    pub ignore_below_x: bool,
}

/// `[output]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Where to write the fitted model as JSON.
    pub model: Option<PathBuf>,
    /// Where to write predicted impedances as CSV.
    pub predictions: Option<PathBuf>,
}

impl FitConfig {
    /// Loads and validates a configuration file. A relative `data.path` is
    /// resolved against the file's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        if config.data.path.is_relative() {
            if let Some(dir) = path.parent() {
                config.data.path = dir.join(&config.data.path);
            }
        }
        Ok(config)
    }

    /// Parses and validates a configuration document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.circuit.string.trim().is_empty() {
            return Err(config_error("circuit.string", "must not be empty"));
        }
        if let (Some(lo), Some(hi)) = (self.data.freq_min, self.data.freq_max) {
            if lo >= hi {
                return Err(config_error("data.freq_min", &format!("{lo} must be below data.freq_max {hi}")));
            }
        }
        if let Some(bounds) = &self.fit.bounds {
            if bounds.lower.len() != self.circuit.initial_guess.len() {
                return Err(config_error(
                    "fit.bounds",
                    &format!(
                        "{} bounds given for {} initial guesses",
                        bounds.lower.len(),
                        self.circuit.initial_guess.len()
                    ),
                ));
            }
            bounds.validate(self.circuit.initial_guess.len())?;
        }
        if let Some(c) = self.validation.as_ref().and_then(|v| v.c) {
            if !(c > 0.0 && c <= 1.0) {
                return Err(config_error("validation.c", &format!("{c} must lie in (0, 1]")));
            }
        }
        Ok(())
    }

    /// Builds the model described by `[circuit]`.
    pub fn model(&self) -> Result<CustomCircuit> {
        let circuit = Circuit::parse(&self.circuit.string)?;
        let mut model = CustomCircuit::from_circuit(circuit, self.circuit.initial_guess.clone())?
            .with_constants(self.circuit.constants.clone())?;
        if let Some(name) = &self.circuit.name {
            model = model.with_name(name.clone());
        }
        Ok(model)
    }
}

fn config_error(field: &str, message: &str) -> EisError {
    EisError::Config(format!("{field}: {message}"))
}
