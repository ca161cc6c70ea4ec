//! Complex nonlinear least squares for equivalent circuits.
//!
//! Real and imaginary residuals are stacked into one real vector,
//! optionally weighted by the measured modulus, and minimised with a bounded
//! Levenberg–Marquardt solver ([`lm`]). [`global`] adds basin hopping for
//! spectra with several local minima.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::circuits::network::check_frequencies;
use crate::circuits::Circuit;
use crate::constants::angular_frequency;
use crate::errors::Result;
use crate::math::{is_finite, CScalar, Scalar};

/// Basin hopping global search.
pub mod global;
/// Free/fixed parameter bookkeeping.
pub mod layout;
/// Bounded Levenberg–Marquardt solver.
pub mod lm;

pub use global::GlobalOptions;
pub use layout::ParameterLayout;
pub use lm::{LocalFit, Termination};

/// Errors raised by the fitting routines.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    /// Initial guess length differs from the number of free parameters.
    #[error("initial guess has {found} values but the circuit has {expected} free parameters")]
    InitialGuessLength {
        /// Free parameter count.
        expected: usize,
        /// Supplied length.
        found: usize,
    },
    /// Bounds are malformed.
    #[error("invalid bounds: {0}")]
    InvalidBounds(String),
    /// Initial guess lies outside the bounds.
    #[error("initial guess {value} for parameter {index} lies outside [{lower}, {upper}]")]
    InfeasibleGuess {
        /// Free parameter index.
        index: usize,
        /// Offending value.
        value: Scalar,
        /// Lower bound.
        lower: Scalar,
        /// Upper bound.
        upper: Scalar,
    },
    /// Residuals cannot be evaluated at the starting point.
    #[error("residuals are not finite at the initial guess")]
    NonFiniteResidual,
    /// The evaluation budget ran out before convergence.
    #[error("optimal parameters not found: number of evaluations exceeded {0}")]
    MaxEvaluations(usize),
    /// A constant names a parameter the circuit does not have.
    #[error("unknown constant '{0}'")]
    UnknownConstant(String),
    /// Optimizer settings are out of range.
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    /// Measured data is unusable.
    #[error("invalid data: {0}")]
    Data(String),
}

/// Residual weighting applied to each frequency point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weighting {
    /// Unweighted residuals.
    #[default]
    Unit,
    /// Residuals divided by the measured `|Z|`.
    Modulus,
}

/// Box constraints on the free parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Lower bound per parameter.
    pub lower: Vec<Scalar>,
    /// Upper bound per parameter.
    pub upper: Vec<Scalar>,
}

impl Bounds {
    /// Creates bounds after checking their shape and ordering.
    pub fn new(lower: Vec<Scalar>, upper: Vec<Scalar>) -> std::result::Result<Self, FitError> {
        let bounds = Self { lower, upper };
        bounds.validate(bounds.lower.len())?;
        Ok(bounds)
    }

    /// No constraints on `n` parameters.
    #[must_use]
    pub fn unbounded(n: usize) -> Self {
        Self { lower: vec![Scalar::NEG_INFINITY; n], upper: vec![Scalar::INFINITY; n] }
    }

    /// Number of constrained parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    /// Returns true when the bounds cover no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Checks that the bounds cover `n` parameters with `lower <= upper`.
    pub fn validate(&self, n: usize) -> std::result::Result<(), FitError> {
        if self.lower.len() != n || self.upper.len() != n {
            return Err(FitError::InvalidBounds(format!(
                "expected {n} lower and upper bounds, got {} and {}",
                self.lower.len(),
                self.upper.len()
            )));
        }
        for (i, (lo, hi)) in self.lower.iter().zip(&self.upper).enumerate() {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(FitError::InvalidBounds(format!(
                    "parameter {i} has lower bound {lo} above upper bound {hi}"
                )));
            }
        }
        Ok(())
    }

    fn check_feasible(&self, x: &[Scalar]) -> std::result::Result<(), FitError> {
        for (index, &value) in x.iter().enumerate() {
            let (lower, upper) = (self.lower[index], self.upper[index]);
            if !(value >= lower && value <= upper) {
                return Err(FitError::InfeasibleGuess { index, value, lower, upper });
            }
        }
        Ok(())
    }
}

/// Settings for [`circuit_fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Residual weighting.
    pub weighting: Weighting,
    /// Bounds on the free parameters; element defaults when absent.
    pub bounds: Option<Bounds>,
    /// Budget of residual evaluations, including finite-difference columns.
    pub max_evaluations: usize,
    /// Relative cost-reduction tolerance.
    pub ftol: Scalar,
    /// Relative step tolerance.
    pub xtol: Scalar,
    /// Gradient orthogonality tolerance.
    pub gtol: Scalar,
    /// Enables basin hopping when present.
    pub global: Option<GlobalOptions>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            weighting: Weighting::Unit,
            bounds: None,
            max_evaluations: 100_000,
            ftol: 1.0e-13,
            xtol: 1.0e-13,
            gtol: 1.0e-10,
            global: None,
        }
    }
}

/// Result of fitting a circuit to a spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Optimal free parameters.
    pub parameters: Vec<Scalar>,
    /// One-sigma uncertainties of the free parameters, when estimable.
    pub confidence: Option<Vec<Scalar>>,
    /// `½‖r‖²` of the weighted residuals at the optimum.
    pub cost: Scalar,
    /// Root mean square of the weighted residuals.
    pub rmse: Scalar,
    /// Optimizer iterations of the returned local minimum.
    pub iterations: usize,
    /// Residual evaluations across the whole search.
    pub evaluations: usize,
    /// Stopping reason of the returned local minimum.
    pub termination: Termination,
}

/// Checks that a measured spectrum is usable for fitting.
pub fn validate_spectrum(freqs: &[Scalar], z: &[CScalar]) -> Result<()> {
    if freqs.is_empty() {
        return Err(FitError::Data("spectrum is empty".into()).into());
    }
    if freqs.len() != z.len() {
        return Err(FitError::Data(format!(
            "{} frequencies but {} impedances",
            freqs.len(),
            z.len()
        ))
        .into());
    }
    check_frequencies(freqs)?;
    if let Some(bad) = z.iter().find(|v| !is_finite(**v)) {
        return Err(FitError::Data(format!("impedance {bad} is not finite")).into());
    }
    Ok(())
}

/// Fits `circuit` to the measured spectrum `(freqs, z)`.
///
/// `initial_guess` holds one value per free parameter, in circuit order with
/// the names in `constants` skipped.
pub fn circuit_fit(
    circuit: &Circuit,
    freqs: &[Scalar],
    z: &[CScalar],
    initial_guess: &[Scalar],
    constants: &BTreeMap<String, Scalar>,
    options: &FitOptions,
) -> Result<FitResult> {
    validate_spectrum(freqs, z)?;
    let layout = ParameterLayout::new(circuit, constants)?;
    if initial_guess.len() != layout.free_count() {
        return Err(FitError::InitialGuessLength {
            expected: layout.free_count(),
            found: initial_guess.len(),
        }
        .into());
    }
    let bounds = match &options.bounds {
        Some(bounds) => bounds.clone(),
        None => layout.default_bounds(circuit),
    };
    bounds.validate(layout.free_count())?;
    bounds.check_feasible(initial_guess)?;

    let m = freqs.len();
    let omegas: Vec<Scalar> = freqs.iter().copied().map(angular_frequency).collect();
    let sigma: Vec<Scalar> = match options.weighting {
        Weighting::Unit => vec![1.0; m],
        Weighting::Modulus => z.iter().map(|v| v.norm()).collect(),
    };
    if sigma.iter().any(|s| *s == 0.0) {
        return Err(FitError::Data("modulus weighting needs non-zero impedances".into()).into());
    }

    let residuals = |free: &[Scalar]| -> Vec<Scalar> {
        let params = layout.expand(free);
        let mut out = vec![0.0; 2 * m];
        for i in 0..m {
            let model = circuit.impedance_at(&params, omegas[i]);
            out[i] = (model.re - z[i].re) / sigma[i];
            out[m + i] = (model.im - z[i].im) / sigma[i];
        }
        out
    };

    let local = match &options.global {
        Some(global) => global::basin_hopping(residuals, initial_guess, &bounds, options, global)?,
        None => {
            let local = lm::least_squares(residuals, initial_guess, &bounds, options)?;
            if !local.termination.converged() {
                return Err(FitError::MaxEvaluations(options.max_evaluations).into());
            }
            local
        }
    };

    let confidence = lm::confidence(&local);
    if confidence.is_none() {
        tracing::warn!(circuit = %circuit, "parameter covariance could not be estimated");
    }
    let rmse = (2.0 * local.cost / (2 * m) as Scalar).sqrt();
    tracing::info!(
        circuit = %circuit,
        cost = local.cost,
        rmse,
        evaluations = local.evaluations,
        termination = ?local.termination,
        "circuit fit complete"
    );

    Ok(FitResult {
        parameters: local.x,
        confidence,
        cost: local.cost,
        rmse,
        iterations: local.iterations,
        evaluations: local.evaluations,
        termination: local.termination,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::errors::EisError;
    use crate::sweep::log_frequencies;

    fn synthetic(circuit: &Circuit, params: &[Scalar]) -> (Vec<Scalar>, Vec<CScalar>) {
        let freqs = log_frequencies(0.1, 1.0e5, 10).expect("valid range");
        let z = circuit.impedance(params, &freqs).expect("valid parameters");
        (freqs, z)
    }

    #[test]
    fn recovers_rc_parameters() {
        let circuit = Circuit::parse("R0-p(R1,C1)").expect("valid");
        let truth = [10.0, 100.0, 1.0e-5];
        let (freqs, z) = synthetic(&circuit, &truth);
        let options = FitOptions { weighting: Weighting::Modulus, ..FitOptions::default() };
        let fit = circuit_fit(&circuit, &freqs, &z, &[8.0, 80.0, 2.0e-5], &BTreeMap::new(), &options)
            .expect("fit converges");
        for (got, want) in fit.parameters.iter().zip(truth) {
            assert_relative_eq!(*got, want, max_relative = 1.0e-6);
        }
        assert!(fit.rmse < 1.0e-8);
    }

    #[test]
    fn constants_are_held_fixed() {
        let circuit = Circuit::parse("R0-p(R1,CPE1)").expect("valid");
        let truth = [5.0, 200.0, 2.0e-5, 0.85];
        let (freqs, z) = synthetic(&circuit, &truth);
        let constants = BTreeMap::from([("CPE1_1".to_string(), 0.85)]);
        let fit = circuit_fit(&circuit, &freqs, &z, &[4.0, 150.0, 1.0e-5], &constants, &FitOptions::default())
            .expect("fit converges");
        assert_eq!(fit.parameters.len(), 3);
        assert_relative_eq!(fit.parameters[1], 200.0, max_relative = 1.0e-6);
    }

    #[test]
    fn rejects_mismatched_inputs() {
        let circuit = Circuit::parse("R0-C1").expect("valid");
        let freqs = [1.0, 10.0];
        let z = [CScalar::new(1.0, -1.0), CScalar::new(1.0, -0.1)];
        let none = BTreeMap::new();
        let opts = FitOptions::default();

        let err = circuit_fit(&circuit, &freqs, &z, &[1.0], &none, &opts).unwrap_err();
        assert!(matches!(err, EisError::Fit(FitError::InitialGuessLength { expected: 2, found: 1 })));

        let err = circuit_fit(&circuit, &freqs, &z[..1], &[1.0, 1.0], &none, &opts).unwrap_err();
        assert!(matches!(err, EisError::Fit(FitError::Data(_))));

        let err = circuit_fit(&circuit, &freqs, &z, &[-1.0, 1.0], &none, &opts).unwrap_err();
        assert!(matches!(err, EisError::Fit(FitError::InfeasibleGuess { index: 0, .. })));

        let bad = FitOptions { bounds: Some(Bounds::unbounded(3)), ..FitOptions::default() };
        let err = circuit_fit(&circuit, &freqs, &z, &[1.0, 1.0], &none, &bad).unwrap_err();
        assert!(matches!(err, EisError::Fit(FitError::InvalidBounds(_))));
    }

    #[test]
    fn bounds_reject_inverted_limits() {
        assert!(Bounds::new(vec![1.0], vec![0.0]).is_err());
        assert!(Bounds::new(vec![0.0, 0.0], vec![1.0]).is_err());
    }
}
