//! Frequency grids and spectrum post-processing helpers.

use crate::errors::{EisError, Result};
use crate::math::{CScalar, Scalar};

/// Generates `n` linearly spaced samples in [start, stop].
#[must_use]
pub fn linspace(start: Scalar, stop: Scalar, n: usize) -> Vec<Scalar> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n as Scalar - 1.0);
            (0..n).map(|i| start + step * i as Scalar).collect()
        }
    }
}

/// Generates `n` logarithmically spaced samples from `start_hz` to `stop_hz`.
///
/// Either end may be the larger one; the samples follow the given direction.
pub fn logspace_hz(start_hz: Scalar, stop_hz: Scalar, n: usize) -> Result<Vec<Scalar>> {
    if !(start_hz > 0.0 && stop_hz > 0.0 && start_hz.is_finite() && stop_hz.is_finite()) {
        return Err(EisError::InvalidData(format!(
            "log spaced frequencies need positive finite bounds, got {start_hz} and {stop_hz}"
        )));
    }
    Ok(linspace(start_hz.log10(), stop_hz.log10(), n)
        .into_iter()
        .map(|e| 10f64.powf(e))
        .collect())
}

/// Measurement-style frequency grid: `points_per_decade` samples per decade,
/// ordered from `f_max` down to `f_min`, both ends included.
pub fn log_frequencies(f_min: Scalar, f_max: Scalar, points_per_decade: usize) -> Result<Vec<Scalar>> {
    if points_per_decade == 0 {
        return Err(EisError::InvalidData("points_per_decade must be positive".into()));
    }
    if !(f_min < f_max) {
        return Err(EisError::InvalidData(format!(
            "frequency range is empty: {f_min} .. {f_max}"
        )));
    }
    let decades = (f_max / f_min).log10();
    let n = (decades * points_per_decade as Scalar - 1.0e-9).ceil() as usize + 1;
    logspace_hz(f_max, f_min, n)
}

/// Magnitude of complex sequence.
#[must_use]
pub fn mag(values: impl IntoIterator<Item = CScalar>) -> Vec<Scalar> {
    values.into_iter().map(|v| v.norm()).collect()
}

/// Phase in degrees of complex sequence.
#[must_use]
pub fn phase_deg(values: impl IntoIterator<Item = CScalar>) -> Vec<Scalar> {
    values.into_iter().map(|v| v.arg().to_degrees()).collect()
}

/// Bode representation: `(|Z|, phase in degrees)`.
#[must_use]
pub fn bode(values: &[CScalar]) -> (Vec<Scalar>, Vec<Scalar>) {
    (mag(values.iter().copied()), phase_deg(values.iter().copied()))
}

/// Nyquist representation: `(Re Z, -Im Z)` pairs, so capacitive arcs sit above the axis.
#[must_use]
pub fn nyquist(values: &[CScalar]) -> Vec<(Scalar, Scalar)> {
    values.iter().map(|z| (z.re, -z.im)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn linspace_basic() {
        let v = linspace(0.0, 1.0, 5);
        assert_eq!(v, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn log_frequencies_cover_both_ends_descending() {
        let f = log_frequencies(0.1, 1.0e5, 10).expect("valid range");
        assert_eq!(f.len(), 61);
        assert_relative_eq!(f[0], 1.0e5, max_relative = 1.0e-12);
        assert_relative_eq!(f[60], 0.1, max_relative = 1.0e-12);
        assert_relative_eq!(f[10], 1.0e4, max_relative = 1.0e-12);
        assert!(f.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn logspace_rejects_non_positive_bounds() {
        assert!(logspace_hz(0.0, 10.0, 5).is_err());
        assert!(log_frequencies(10.0, 1.0, 5).is_err());
    }

    #[test]
    fn bode_and_nyquist_of_pure_reactances() {
        let x = vec![CScalar::new(1.0, 0.0), CScalar::new(0.0, -1.0)];
        let (m, p) = bode(&x);
        assert_relative_eq!(m[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(p[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(p[1], -90.0, epsilon = 1e-12);
        assert_eq!(nyquist(&x), vec![(1.0, 0.0), (0.0, 1.0)]);
    }
}
