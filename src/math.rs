//! Shared numerical primitives anchored on `nalgebra` and `num-complex`.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex;

/// Primary scalar type used across the crate.
pub type Scalar = f64;
/// Primary complex scalar type used for impedances.
pub type CScalar = Complex<Scalar>;
/// Dense real matrix (Jacobians, design matrices).
pub type RMatrix = DMatrix<Scalar>;
/// Dense real vector (residuals, parameter steps).
pub type RVector = DVector<Scalar>;

/// The imaginary unit `j`.
pub const J: CScalar = Complex::new(0.0, 1.0);
/// Complex one.
pub const ONE: CScalar = Complex::new(1.0, 0.0);

/// Beyond this `|Re z|`, `tanh(z)` equals `±1` to double precision.
const TANH_SATURATION: Scalar = 20.0;

/// Complex hyperbolic tangent that saturates instead of overflowing to NaN.
#[inline]
#[must_use]
pub fn tanh(z: CScalar) -> CScalar {
    if z.re.abs() > TANH_SATURATION {
        CScalar::new(z.re.signum(), 0.0)
    } else {
        z.tanh()
    }
}

/// Hyperbolic cotangent `coth(z) = 1 / tanh(z)`.
#[inline]
#[must_use]
pub fn coth(z: CScalar) -> CScalar {
    ONE / tanh(z)
}

/// Extra continued-fraction depth beyond `|z|` in [`modified_bessel_ratio`].
const BESSEL_RATIO_DEPTH: usize = 64;

/// Ratio `I1(z) / I0(z)` of modified Bessel functions of the first kind.
///
/// Evaluated by backward recurrence on `I_{k} / I_{k-1} = 1 / (2k / z + I_{k+1} / I_k)`,
/// which stays accurate where the power series cancels.
#[must_use]
pub fn modified_bessel_ratio(z: CScalar) -> CScalar {
    let depth = z.norm() as usize + BESSEL_RATIO_DEPTH;
    (1..=depth).rev().fold(Complex::new(0.0, 0.0), |ratio, k| ONE / (2.0 * k as Scalar / z + ratio))
}

/// Returns `true` when both parts of `z` are finite.
#[inline]
#[must_use]
pub fn is_finite(z: CScalar) -> bool {
    z.re.is_finite() && z.im.is_finite()
}

/// Euclidean norm of a real slice.
#[must_use]
pub fn norm(values: &[Scalar]) -> Scalar {
    values.iter().map(|v| v * v).sum::<Scalar>().sqrt()
}

/// Clamps every entry of `x` into `[lower[i], upper[i]]`.
pub fn clamp_into(x: &mut [Scalar], lower: &[Scalar], upper: &[Scalar]) {
    for ((v, lo), hi) in x.iter_mut().zip(lower).zip(upper) {
        *v = v.max(*lo).min(*hi);
    }
}
