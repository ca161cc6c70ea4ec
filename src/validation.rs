//! Linear Kramers–Kronig validation.
//!
//! The spectrum is fit with an ohmic resistor, `M` series RC (`K`) elements
//! with fixed, log-spaced time constants, an inductance and optionally a
//! series capacitance. All unknowns enter linearly, so each trial is a single
//! weighted linear least-squares solve. `M` grows until the fit starts to
//! over-resolve the data, measured by the share of negative resistances.

use serde::{Deserialize, Serialize};

use crate::constants::{angular_frequency, time_constant};
use crate::errors::{EisError, Result};
use crate::fitting::validate_spectrum;
use crate::math::{CScalar, RMatrix, RVector, Scalar};

/// Which part of the impedance the linear fit targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum LinKkFitType {
    /// Fit the real part, then inductance and capacitance from the imaginary remainder.
    Real,
    /// Fit the imaginary part, then the ohmic resistance from the real remainder.
    Imag,
    /// Fit both parts together.
    #[default]
    Complex,
}

/// Settings for [`lin_kk`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinKkOptions {
    /// Over-fitting threshold on µ; `None` fits `max_m` elements directly.
    pub c: Option<Scalar>,
    /// Largest number of RC elements tried.
    pub max_m: usize,
    /// Part of the impedance to fit.
    pub fit_type: LinKkFitType,
    /// Adds a series capacitance to the model.
    pub add_cap: bool,
}

impl Default for LinKkOptions {
    fn default() -> Self {
        Self { c: Some(0.85), max_m: 50, fit_type: LinKkFitType::Complex, add_cap: false }
    }
}

/// Outcome of a lin-KK validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinKkResult {
    /// Number of RC elements in the final fit.
    pub m: usize,
    /// Over-fitting measure `1 - Σ|R<0| / Σ|R>=0|` of the final fit.
    pub mu: Scalar,
    /// Ohmic resistance.
    pub r_ohm: Scalar,
    /// RC resistances, one per time constant.
    pub resistances: Vec<Scalar>,
    /// RC time constants in seconds.
    pub time_constants: Vec<Scalar>,
    /// Series capacitance, when requested and resolvable.
    pub capacitance: Option<Scalar>,
    /// Series inductance.
    pub inductance: Scalar,
    /// Model impedance at each frequency.
    pub z_fit: Vec<CScalar>,
    /// `Re(Z - Z_fit) / |Z|`.
    pub residuals_real: Vec<Scalar>,
    /// `Im(Z - Z_fit) / |Z|`.
    pub residuals_imag: Vec<Scalar>,
}

/// Time constants spanning the measured band. A single element sits at the
/// slowest time constant.
#[must_use]
pub fn time_constants(freqs: &[Scalar], m: usize) -> Vec<Scalar> {
    let f_min = freqs.iter().copied().fold(Scalar::INFINITY, Scalar::min);
    let f_max = freqs.iter().copied().fold(0.0, Scalar::max);
    let tau_max = time_constant(f_min);
    let tau_min = time_constant(f_max);
    match m {
        0 => Vec::new(),
        1 => vec![tau_max],
        _ => {
            let (lo, hi) = (tau_min.log10(), tau_max.log10());
            (0..m).map(|k| 10f64.powf(lo + (hi - lo) * k as Scalar / (m - 1) as Scalar)).collect()
        }
    }
}

/// `1 - Σ|R_k < 0| / Σ|R_k >= 0|`.
#[must_use]
pub fn mu(resistances: &[Scalar]) -> Scalar {
    let (neg, pos) = resistances.iter().fold((0.0, 0.0), |(neg, pos), &r| {
        if r < 0.0 {
            (neg + r.abs(), pos)
        } else {
            (neg, pos + r)
        }
    });
    if pos == 0.0 {
        return Scalar::NEG_INFINITY;
    }
    1.0 - neg / pos
}

/// Column layout of the linear model: `[R_ohm, R_1..R_M, (1/C), L]`.
struct Design {
    m: usize,
    add_cap: bool,
}

impl Design {
    fn cols(&self) -> usize {
        self.m + 2 + usize::from(self.add_cap)
    }

    fn inv_cap(&self) -> Option<usize> {
        self.add_cap.then_some(self.m + 1)
    }

    fn inductance(&self) -> usize {
        self.cols() - 1
    }

    /// Complex contribution of each column at `omega`.
    fn row(&self, omega: Scalar, taus: &[Scalar]) -> Vec<CScalar> {
        let mut row = Vec::with_capacity(self.cols());
        row.push(CScalar::new(1.0, 0.0));
        for &tau in taus {
            let wt = omega * tau;
            let d = 1.0 + wt * wt;
            row.push(CScalar::new(1.0 / d, -wt / d));
        }
        if self.add_cap {
            row.push(CScalar::new(0.0, -1.0 / omega));
        }
        row.push(CScalar::new(0.0, omega));
        row
    }
}

fn solve(a: RMatrix, b: RVector) -> Result<RVector> {
    a.svd(true, true)
        .solve(&b, Scalar::EPSILON)
        .map_err(|e| EisError::InvalidData(format!("lin-KK least squares failed: {e}")))
}

/// Fits `Z_real` and/or `Z_imag` restricted to `cols`, returning the
/// coefficient of every selected column.
fn fit_columns(
    rows: &[Vec<CScalar>],
    targets: &[CScalar],
    weights: &[Scalar],
    cols: &[usize],
    part: LinKkFitType,
) -> Result<Vec<Scalar>> {
    let n = rows.len();
    let blocks: &[bool] = match part {
        LinKkFitType::Real => &[true],
        LinKkFitType::Imag => &[false],
        LinKkFitType::Complex => &[true, false],
    };
    let mut a = RMatrix::zeros(n * blocks.len(), cols.len());
    let mut b = RVector::zeros(n * blocks.len());
    for (bi, &real) in blocks.iter().enumerate() {
        for i in 0..n {
            let r = bi * n + i;
            let pick = |v: CScalar| if real { v.re } else { v.im };
            for (j, &c) in cols.iter().enumerate() {
                a[(r, j)] = pick(rows[i][c]) * weights[i];
            }
            b[r] = pick(targets[i]) * weights[i];
        }
    }
    Ok(solve(a, b)?.iter().copied().collect())
}

fn fit_m(
    freqs: &[Scalar],
    z: &[CScalar],
    m: usize,
    options: &LinKkOptions,
) -> Result<(Vec<Scalar>, Vec<Scalar>, Vec<CScalar>)> {
    let taus = time_constants(freqs, m);
    let design = Design { m, add_cap: options.add_cap };
    let rows: Vec<Vec<CScalar>> =
        freqs.iter().map(|&f| design.row(angular_frequency(f), &taus)).collect();
    let weights: Vec<Scalar> = z.iter().map(|v| 1.0 / v.norm()).collect();
    let rc: Vec<usize> = (0..=m).collect();
    let reactive: Vec<usize> = design.inv_cap().into_iter().chain([design.inductance()]).collect();

    let mut coef = vec![0.0; design.cols()];
    let assign = |coef: &mut Vec<Scalar>, cols: &[usize], values: Vec<Scalar>| {
        for (&c, v) in cols.iter().zip(values) {
            coef[c] = v;
        }
    };
    let model = |coef: &[Scalar], cols: &[usize], row: &[CScalar]| -> CScalar {
        cols.iter().map(|&c| row[c] * coef[c]).sum()
    };

    match options.fit_type {
        LinKkFitType::Complex => {
            let all: Vec<usize> = (0..design.cols()).collect();
            let values = fit_columns(&rows, z, &weights, &all, LinKkFitType::Complex)?;
            assign(&mut coef, &all, values);
        }
        LinKkFitType::Real => {
            let values = fit_columns(&rows, z, &weights, &rc, LinKkFitType::Real)?;
            assign(&mut coef, &rc, values);
            let remainder: Vec<CScalar> =
                z.iter().zip(&rows).map(|(v, row)| v - model(&coef, &rc, row)).collect();
            let values = fit_columns(&rows, &remainder, &weights, &reactive, LinKkFitType::Imag)?;
            assign(&mut coef, &reactive, values);
        }
        LinKkFitType::Imag => {
            let cols: Vec<usize> = (1..design.cols()).collect();
            let values = fit_columns(&rows, z, &weights, &cols, LinKkFitType::Imag)?;
            assign(&mut coef, &cols, values);
            let (num, den) = z.iter().zip(&rows).zip(&weights).fold((0.0, 0.0), |(num, den), ((v, row), w)| {
                let w2 = w * w;
                (num + w2 * (v.re - model(&coef, &cols, row).re), den + w2)
            });
            coef[0] = num / den;
        }
    }

    let all: Vec<usize> = (0..design.cols()).collect();
    let z_fit = rows.iter().map(|row| model(&coef, &all, row)).collect();
    Ok((coef, taus, z_fit))
}

/// Runs the lin-KK test on a measured spectrum.
pub fn lin_kk(freqs: &[Scalar], z: &[CScalar], options: &LinKkOptions) -> Result<LinKkResult> {
    validate_spectrum(freqs, z)?;
    if options.max_m == 0 {
        return Err(EisError::InvalidData("lin-KK needs max_m >= 1".into()));
    }
    if let Some(c) = options.c {
        if !(c > 0.0 && c <= 1.0) {
            return Err(EisError::InvalidData(format!("lin-KK threshold c must lie in (0, 1], got {c}")));
        }
    }
    if z.iter().any(|v| v.norm() == 0.0) {
        return Err(EisError::InvalidData("lin-KK weights need non-zero impedances".into()));
    }

    let (m, coef, taus, z_fit) = match options.c {
        None => {
            let (coef, taus, z_fit) = fit_m(freqs, z, options.max_m, options)?;
            (options.max_m, coef, taus, z_fit)
        }
        Some(c) => {
            let mut m = 1;
            loop {
                let (coef, taus, z_fit) = fit_m(freqs, z, m, options)?;
                let value = mu(&coef[1..=m]);
                tracing::debug!(m, mu = value, "lin-KK trial");
                if value <= c || m == options.max_m {
                    break (m, coef, taus, z_fit);
                }
                m += 1;
            }
        }
    };

    let design = Design { m, add_cap: options.add_cap };
    let (residuals_real, residuals_imag) = z
        .iter()
        .zip(&z_fit)
        .map(|(v, fit)| {
            let r = (v - fit) / v.norm();
            (r.re, r.im)
        })
        .unzip();
    let resistances = coef[1..=m].to_vec();
    let capacitance = design.inv_cap().map(|c| coef[c]).filter(|v| *v != 0.0).map(|v| 1.0 / v);

    Ok(LinKkResult {
        m,
        mu: mu(&resistances),
        r_ohm: coef[0],
        resistances,
        time_constants: taus,
        capacitance,
        inductance: coef[design.inductance()],
        z_fit,
        residuals_real,
        residuals_imag,
    })
}
