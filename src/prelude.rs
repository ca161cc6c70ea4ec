//! Convenience re-exports for building and fitting circuit models.

pub use crate::circuits::{
    analysis::{sweep_circuit_impedance, write_frequency_points_csv, FrequencyPoint},
    elements::{Builtin, Element, ElementRegistry, FnElement},
    network::{Circuit, ConnectionKind},
};
pub use crate::config::FitConfig;
pub use crate::errors::{EisError, Result};
pub use crate::fitting::{circuit_fit, Bounds, FitOptions, FitResult, GlobalOptions, Weighting};
pub use crate::math::{CScalar, Scalar};
pub use crate::models::{randles, CustomCircuit};
pub use crate::preprocessing::{crop_frequencies, ignore_below_x, read_csv};
pub use crate::sweep::{bode, log_frequencies, logspace_hz, nyquist};
pub use crate::validation::{lin_kk, LinKkFitType, LinKkOptions, LinKkResult};
