#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(clippy::all, clippy::cargo, clippy::nursery, missing_docs)]
#![doc = include_str!("../README.md")]

/// Numerical constants and frequency conversions.
pub mod constants;
/// Scalar aliases and complex helpers.
pub mod math;
/// Circuit elements, the circuit string parser and evaluated networks.
pub mod circuits;
/// Bounded nonlinear least squares and basin hopping.
pub mod fitting;
/// Estimator-style circuit models.
pub mod models;
/// Loading and trimming measured spectra.
pub mod preprocessing;
/// Linear Kramers–Kronig validation.
pub mod validation;
/// TOML fitting jobs.
pub mod config;
/// Frequency grids and Bode/Nyquist helpers.
pub mod sweep;
/// Error types shared between modules.
pub mod errors;
/// Logger setup for the command line tool.
#[cfg(feature = "cli")]
pub mod logging;

/// Common exports for downstream crates.
pub mod prelude;

pub use errors::{EisError, Result};
