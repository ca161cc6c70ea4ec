//! Baseline constants and unit conversions used by the impedance models.

use std::f64::consts::PI;

/// Above this real part of β the porous-electrode models replace `sinh(β)`
/// with [`SINH_SATURATION`] to avoid overflow.
pub const SINH_CUTOFF: f64 = 100.0;
/// Stand-in value for `sinh(β)` once `Re β` exceeds [`SINH_CUTOFF`].
pub const SINH_SATURATION: f64 = 1.0e10;

/// Returns the angular frequency corresponding to a linear frequency `hz`.
#[inline]
#[must_use]
pub fn angular_frequency(hz: f64) -> f64 {
    2.0 * PI * hz
}

/// Converts between a linear frequency (Hz) and the time constant (s) of an
/// RC relaxation, `tau = 1 / (2 pi f)`. The mapping is its own inverse.
#[inline]
#[must_use]
pub fn time_constant(hz: f64) -> f64 {
    1.0 / (2.0 * PI * hz)
}
