//! Estimator-style wrapper around a circuit, its initial guess and fit.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::circuits::{Circuit, ElementRegistry};
use crate::errors::{EisError, Result};
use crate::fitting::{circuit_fit, FitError, FitOptions, FitResult, ParameterLayout};
use crate::math::{CScalar, Scalar};

/// An equivalent circuit with an initial guess that can be fit to data and
/// used for prediction.
#[derive(Debug, Clone)]
pub struct CustomCircuit {
    name: Option<String>,
    circuit: Circuit,
    initial_guess: Vec<Scalar>,
    constants: BTreeMap<String, Scalar>,
    fitted: Option<Fitted>,
    report: Option<FitResult>,
}

#[derive(Debug, Clone, PartialEq)]
struct Fitted {
    parameters: Vec<Scalar>,
    confidence: Option<Vec<Scalar>>,
}

#[derive(Serialize, Deserialize)]
struct ModelFile {
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Circuit String")]
    circuit: String,
    #[serde(rename = "Initial Guess")]
    initial_guess: Vec<Scalar>,
    #[serde(rename = "Constants", default)]
    constants: BTreeMap<String, Scalar>,
    #[serde(rename = "Fit")]
    fit: bool,
    #[serde(rename = "Parameters", default)]
    parameters: Option<Vec<Scalar>>,
    #[serde(rename = "Confidence", default)]
    confidence: Option<Vec<Scalar>>,
}

impl CustomCircuit {
    /// Parses `circuit` with the built-in elements.
    pub fn new(circuit: &str, initial_guess: Vec<Scalar>) -> Result<Self> {
        Self::from_circuit(Circuit::parse(circuit)?, initial_guess)
    }

    /// Parses `circuit` against a custom element registry.
    pub fn with_registry(circuit: &str, initial_guess: Vec<Scalar>, registry: &ElementRegistry) -> Result<Self> {
        Self::from_circuit(Circuit::parse_with_registry(circuit, registry)?, initial_guess)
    }

    /// Wraps an already parsed circuit.
    ///
    /// The guess may be shorter than the parameter list when constants are
    /// added with [`CustomCircuit::with_constants`]; its length is checked
    /// exactly there and before fitting or predicting.
    pub fn from_circuit(circuit: Circuit, initial_guess: Vec<Scalar>) -> Result<Self> {
        if initial_guess.len() > circuit.num_params() {
            return Err(FitError::InitialGuessLength {
                expected: circuit.num_params(),
                found: initial_guess.len(),
            }
            .into());
        }
        if let Some(bad) = initial_guess.iter().find(|v| !v.is_finite()) {
            return Err(EisError::Model(format!("initial guess {bad} is not finite")));
        }
        Ok(Self {
            name: None,
            circuit,
            initial_guess,
            constants: BTreeMap::new(),
            fitted: None,
            report: None,
        })
    }

    /// Holds the named parameters fixed. The initial guess must then cover
    /// only the remaining parameters.
    pub fn with_constants(mut self, constants: BTreeMap<String, Scalar>) -> Result<Self> {
        self.constants = constants;
        self.fitted = None;
        self.report = None;
        self.check_guess()?;
        Ok(self)
    }

    /// Attaches a display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn check_guess(&self) -> Result<()> {
        let layout = ParameterLayout::new(&self.circuit, &self.constants)?;
        if layout.free_count() != self.initial_guess.len() {
            return Err(FitError::InitialGuessLength {
                expected: layout.free_count(),
                found: self.initial_guess.len(),
            }
            .into());
        }
        if let Some(bad) = self.initial_guess.iter().find(|v| !v.is_finite()) {
            return Err(EisError::Model(format!("initial guess {bad} is not finite")));
        }
        Ok(())
    }

    fn layout(&self) -> Result<ParameterLayout> {
        Ok(ParameterLayout::new(&self.circuit, &self.constants)?)
    }

    /// Fits the free parameters to `(freqs, z)`, starting from the initial guess.
    pub fn fit(&mut self, freqs: &[Scalar], z: &[CScalar], options: &FitOptions) -> Result<&FitResult> {
        self.check_guess()?;
        let result = circuit_fit(&self.circuit, freqs, z, &self.initial_guess, &self.constants, options)?;
        self.fitted = Some(Fitted {
            parameters: result.parameters.clone(),
            confidence: result.confidence.clone(),
        });
        Ok(&*self.report.insert(result))
    }

    /// Predicts the impedance at `freqs` from the fitted parameters, or from the
    /// initial guess when `use_initial` is set or the model is unfit.
    pub fn predict(&self, freqs: &[Scalar], use_initial: bool) -> Result<Vec<CScalar>> {
        let free = match (&self.fitted, use_initial) {
            (Some(fitted), false) => &fitted.parameters,
            (None, false) => {
                tracing::warn!(circuit = %self.circuit, "model is not fit yet, predicting from the initial guess");
                &self.initial_guess
            }
            (_, true) => &self.initial_guess,
        };
        self.check_guess()?;
        let params = self.layout()?.expand(free);
        self.circuit.impedance(&params, freqs)
    }

    /// Fitted free parameters.
    #[must_use]
    pub fn parameters(&self) -> Option<&[Scalar]> {
        self.fitted.as_ref().map(|f| f.parameters.as_slice())
    }

    /// One-sigma uncertainties of the fitted parameters.
    #[must_use]
    pub fn confidence(&self) -> Option<&[Scalar]> {
        self.fitted.as_ref().and_then(|f| f.confidence.as_deref())
    }

    /// Full optimizer report of the last [`CustomCircuit::fit`] call.
    #[must_use]
    pub fn fit_result(&self) -> Option<&FitResult> {
        self.report.as_ref()
    }

    /// Names of the free parameters.
    #[must_use]
    pub fn parameter_names(&self) -> Vec<String> {
        self.free_only(self.circuit.parameter_names())
    }

    /// Units of the free parameters.
    #[must_use]
    pub fn parameter_units(&self) -> Vec<String> {
        self.free_only(self.circuit.parameter_units())
    }

    fn free_only(&self, all: Vec<String>) -> Vec<String> {
        match self.layout() {
            Ok(layout) => layout.select_free(&all),
            Err(_) => all,
        }
    }

    /// Initial guess of the free parameters.
    #[must_use]
    pub fn initial_guess(&self) -> &[Scalar] {
        &self.initial_guess
    }

    /// Parameters held fixed during fitting.
    #[must_use]
    pub fn constants(&self) -> &BTreeMap<String, Scalar> {
        &self.constants
    }

    /// Parsed circuit.
    #[must_use]
    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    /// Display name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns true once parameters have been fit or loaded.
    #[must_use]
    pub fn is_fit(&self) -> bool {
        self.fitted.is_some()
    }

    /// Writes the model as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = ModelFile {
            name: self.name.clone(),
            circuit: self.circuit.source().to_string(),
            initial_guess: self.initial_guess.clone(),
            constants: self.constants.clone(),
            fit: self.is_fit(),
            parameters: self.fitted.as_ref().map(|f| f.parameters.clone()),
            confidence: self.fitted.as_ref().and_then(|f| f.confidence.clone()),
        };
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut w, &file)?;
        w.flush()?;
        Ok(())
    }

    /// Reads a model written by [`CustomCircuit::save`]. With
    /// `fitted_as_initial` the stored fit becomes the initial guess and the
    /// loaded model is unfit.
    pub fn load(path: impl AsRef<Path>, fitted_as_initial: bool) -> Result<Self> {
        Self::load_with_registry(path, fitted_as_initial, &ElementRegistry::builtin())
    }

    /// [`CustomCircuit::load`] for circuits using custom elements.
    pub fn load_with_registry(
        path: impl AsRef<Path>,
        fitted_as_initial: bool,
        registry: &ElementRegistry,
    ) -> Result<Self> {
        let file: ModelFile = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        let stored = match (file.fit, file.parameters) {
            (true, Some(parameters)) => Some(Fitted { parameters, confidence: file.confidence }),
            (true, None) => {
                return Err(EisError::Model("model is marked fit but has no parameters".into()));
            }
            (false, _) => None,
        };

        let circuit = Circuit::parse_with_registry(&file.circuit, registry)?;
        let (initial_guess, fitted) = match stored {
            Some(fitted) if fitted_as_initial => (fitted.parameters, None),
            stored => (file.initial_guess, stored),
        };
        let model = Self {
            name: file.name,
            circuit,
            initial_guess,
            constants: file.constants,
            fitted,
            report: None,
        };
        model.check_guess()?;
        if let Some(fitted) = &model.fitted {
            if fitted.parameters.len() != model.initial_guess.len() {
                return Err(EisError::Model(format!(
                    "stored fit has {} parameters, expected {}",
                    fitted.parameters.len(),
                    model.initial_guess.len()
                )));
            }
        }
        Ok(model)
    }
}

impl fmt::Display for CustomCircuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            writeln!(f, "Name: {name}")?;
        }
        writeln!(f, "Circuit string: {}", self.circuit)?;
        writeln!(f, "Fit: {}", self.is_fit())?;

        if !self.constants.is_empty() {
            writeln!(f, "\nConstants:")?;
            let units: BTreeMap<String, String> = self
                .circuit
                .parameter_names()
                .into_iter()
                .zip(self.circuit.parameter_units())
                .collect();
            for (name, value) in &self.constants {
                let unit = units.get(name).map_or("", String::as_str);
                writeln!(f, "  {name:>7} = {value:.2e} [{unit}] (fixed)")?;
            }
        }

        let names = self.parameter_names();
        let units = self.parameter_units();
        writeln!(f, "\nInitial guesses:")?;
        for ((name, unit), value) in names.iter().zip(&units).zip(&self.initial_guess) {
            writeln!(f, "  {name:>7} = {value:.2e} [{unit}]")?;
        }

        if let Some(fitted) = &self.fitted {
            writeln!(f, "\nFit parameters:")?;
            for (i, ((name, unit), value)) in names.iter().zip(&units).zip(&fitted.parameters).enumerate() {
                match fitted.confidence.as_ref().and_then(|c| c.get(i)) {
                    Some(sigma) => writeln!(f, "  {name:>7} = {value:.2e}  (+/- {sigma:.2e}) [{unit}]")?,
                    None => writeln!(f, "  {name:>7} = {value:.2e} [{unit}]")?,
                }
            }
        }
        Ok(())
    }
}

/// Randles cell `R0-p(R1-Wo1,C1)`, or `R0-p(R1-Wo1,CPE1)` with a constant
/// phase element for the double layer.
///
/// The preset has no constants, so `initial_guess` must cover every parameter.
pub fn randles(initial_guess: Vec<Scalar>, cpe: bool) -> Result<CustomCircuit> {
    let circuit = if cpe { "R0-p(R1-Wo1,CPE1)" } else { "R0-p(R1-Wo1,C1)" };
    let model = CustomCircuit::new(circuit, initial_guess)?;
    model.check_guess()?;
    Ok(model.with_name(if cpe { "Randles w/ CPE" } else { "Randles" }))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::sweep::log_frequencies;

    #[test]
    fn guess_length_accounts_for_constants() {
        assert!(CustomCircuit::new("R0-p(R1,C1)", vec![1.0, 2.0, 3.0, 4.0]).is_err());
        let full = CustomCircuit::new("R0-p(R1,C1)", vec![1.0, 2.0, 3.0]).expect("three parameters");
        let err = full.with_constants(BTreeMap::from([("R0".to_string(), 1.0)])).unwrap_err();
        assert!(matches!(err, EisError::Fit(FitError::InitialGuessLength { expected: 2, found: 3 })));

        let short = CustomCircuit::new("R0-p(R1,C1)", vec![100.0, 1.0e-5]).expect("shorter guess");
        assert!(short.predict(&[1.0], false).is_err());
        let model = short.with_constants(BTreeMap::from([("R0".to_string(), 10.0)])).expect("two free");
        assert_eq!(model.parameter_names(), vec!["R1", "C1"]);
        assert_eq!(model.predict(&[1.0], true).expect("valid").len(), 1);
    }

    #[test]
    fn parameter_names_skip_constants() {
        let circuit = Circuit::parse("R0-p(R1,CPE1)").expect("valid");
        let model = CustomCircuit {
            name: None,
            circuit,
            initial_guess: vec![1.0, 2.0, 0.9],
            constants: BTreeMap::from([("CPE1_0".to_string(), 1.0e-5)]),
            fitted: None,
            report: None,
        };
        assert_eq!(model.parameter_names(), vec!["R0", "R1", "CPE1_1"]);
        assert_eq!(model.parameter_units(), vec!["Ohm", "Ohm", ""]);
    }

    #[test]
    fn unfit_model_predicts_from_initial_guess() {
        let model = CustomCircuit::new("R0-C1", vec![10.0, 1.0e-3]).expect("valid");
        let freqs = [1.0, 10.0];
        let z = model.predict(&freqs, false).expect("positive frequencies");
        assert_relative_eq!(z[0].re, 10.0);
        assert_relative_eq!(z[1].im, -1.0 / (2.0 * std::f64::consts::PI * 10.0 * 1.0e-3), max_relative = 1e-12);
        assert!(model.predict(&[0.0], false).is_err());
    }

    #[test]
    fn fit_then_predict_matches_data() {
        let freqs = log_frequencies(1.0, 1.0e4, 8).expect("valid range");
        let truth = CustomCircuit::new("R0-p(R1,C1)", vec![20.0, 50.0, 2.0e-6]).expect("valid");
        let z = truth.predict(&freqs, true).expect("valid");

        let mut model = CustomCircuit::new("R0-p(R1,C1)", vec![15.0, 40.0, 3.0e-6]).expect("valid");
        let report = model.fit(&freqs, &z, &FitOptions::default()).expect("converges");
        assert!(report.termination.converged());
        let fitted = model.predict(&freqs, false).expect("valid");
        for (a, b) in fitted.iter().zip(&z) {
            assert_relative_eq!(a.re, b.re, max_relative = 1.0e-6);
            assert_relative_eq!(a.im, b.im, max_relative = 1.0e-6);
        }
        assert!(model.to_string().contains("Fit parameters:"));
    }

    #[test]
    fn randles_presets() {
        let plain = randles(vec![10.0, 50.0, 100.0, 1.0, 1.0e-5], false).expect("five");
        assert_eq!(plain.circuit().source(), "R0-p(R1-Wo1,C1)");
        assert_eq!(plain.name(), Some("Randles"));
        assert!(randles(vec![1.0; 6], false).is_err());

        let cpe = randles(vec![10.0, 50.0, 100.0, 1.0, 1.0e-5, 0.9], true).expect("six");
        assert_eq!(cpe.circuit().num_params(), 6);
        assert_eq!(cpe.predict(&[1.0, 100.0], false).expect("valid").len(), 2);
        assert!(matches!(
            randles(vec![1.0; 5], true),
            Err(EisError::Fit(FitError::InitialGuessLength { expected: 6, found: 5 }))
        ));
    }

    #[test]
    fn saved_values_survive_json_exactly() {
        let awkward = vec![0.1 + 0.2, 1.0 / 3.0, 2.0e-6 / 7.0];
        let model = CustomCircuit::new("R0-p(R1,C1)", awkward.clone()).expect("valid");
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("model.json");
        model.save(&path).expect("writable");
        let restored = CustomCircuit::load(&path, false).expect("readable");
        assert_eq!(restored.initial_guess(), awkward.as_slice());
    }
}
