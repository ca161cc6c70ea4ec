//! Bounded Levenberg–Marquardt least squares.
//!
//! The solver minimises `cost = ½‖r(x)‖²` for a residual function `r`,
//! keeping `x` inside box bounds by projection. Parameters pinned at a bound
//! whose gradient points outward are frozen for the step (a simple active
//! set), which keeps the damped normal equations well posed.

use serde::{Deserialize, Serialize};

use crate::math::{clamp_into, norm, RMatrix, RVector, Scalar};

use super::{Bounds, FitError, FitOptions};

const INITIAL_LAMBDA: Scalar = 1.0e-3;
const MIN_LAMBDA: Scalar = 1.0e-12;
const MAX_LAMBDA: Scalar = 1.0e16;

/// Why the local optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Relative cost reduction fell below `ftol`.
    CostTolerance,
    /// Relative step length fell below `xtol`.
    StepTolerance,
    /// Gradient is orthogonal to the residual within `gtol`, or the residual vanished.
    Gradient,
    /// No damping level produced a lower cost.
    Stalled,
    /// The evaluation budget ran out.
    MaxEvaluations,
}

impl Termination {
    /// True for every outcome except an exhausted budget.
    #[must_use]
    pub fn converged(self) -> bool {
        self != Self::MaxEvaluations
    }
}

/// Outcome of a local least-squares run.
#[derive(Debug, Clone)]
pub struct LocalFit {
    /// Parameters at the minimum.
    pub x: Vec<Scalar>,
    /// Residuals at `x`.
    pub residuals: Vec<Scalar>,
    /// `½‖r‖²` at `x`.
    pub cost: Scalar,
    /// Forward-difference Jacobian at `x`.
    pub jacobian: RMatrix,
    /// Accepted plus rejected outer iterations.
    pub iterations: usize,
    /// Residual function evaluations, including Jacobian columns.
    pub evaluations: usize,
    /// Stopping reason.
    pub termination: Termination,
}

fn half_squared_norm(r: &[Scalar]) -> Scalar {
    0.5 * r.iter().map(|v| v * v).sum::<Scalar>()
}

/// Forward differences with relative steps; a step that would leave the
/// box or produce non-finite residuals is taken in the other direction.
fn jacobian<F>(f: &F, x: &[Scalar], r: &[Scalar], bounds: &Bounds, evaluations: &mut usize) -> RMatrix
where
    F: Fn(&[Scalar]) -> Vec<Scalar>,
{
    let step_scale = Scalar::EPSILON.sqrt();
    let mut jac = RMatrix::zeros(r.len(), x.len());
    let mut probe = x.to_vec();
    for k in 0..x.len() {
        let mut h = step_scale * if x[k] == 0.0 { 1.0 } else { x[k].abs() };
        if x[k] + h > bounds.upper[k] {
            h = -h;
        }
        for attempt in 0..2 {
            probe[k] = x[k] + h;
            let rk = f(&probe);
            *evaluations += 1;
            if rk.iter().all(|v| v.is_finite()) {
                let dx = probe[k] - x[k];
                for (i, (a, b)) in rk.iter().zip(r).enumerate() {
                    jac[(i, k)] = (a - b) / dx;
                }
                break;
            }
            if attempt == 0 {
                h = -h;
            }
        }
        probe[k] = x[k];
    }
    jac
}

fn active_set(x: &[Scalar], gradient: &RVector, bounds: &Bounds) -> Vec<bool> {
    x.iter()
        .enumerate()
        .map(|(i, &xi)| {
            (xi <= bounds.lower[i] && gradient[i] > 0.0) || (xi >= bounds.upper[i] && gradient[i] < 0.0)
        })
        .collect()
}

fn gradient_converged(jac: &RMatrix, gradient: &RVector, r_norm: Scalar, active: &[bool], gtol: Scalar) -> bool {
    let mut worst: Scalar = 0.0;
    for (i, &frozen) in active.iter().enumerate() {
        if frozen {
            continue;
        }
        let column_norm = jac.column(i).norm();
        if column_norm > 0.0 {
            worst = worst.max(gradient[i].abs() / (column_norm * r_norm));
        }
    }
    worst <= gtol
}

/// Minimises `½‖f(x)‖²` starting at `x0` within `bounds`.
pub fn least_squares<F>(f: F, x0: &[Scalar], bounds: &Bounds, options: &FitOptions) -> Result<LocalFit, FitError>
where
    F: Fn(&[Scalar]) -> Vec<Scalar>,
{
    let n = x0.len();
    let mut x = x0.to_vec();
    clamp_into(&mut x, &bounds.lower, &bounds.upper);

    let mut r = f(&x);
    let mut evaluations = 1;
    let mut cost = half_squared_norm(&r);
    if !cost.is_finite() {
        return Err(FitError::NonFiniteResidual);
    }

    let mut jac = jacobian(&f, &x, &r, bounds, &mut evaluations);
    let mut lambda = INITIAL_LAMBDA;
    let mut iterations = 0;

    let termination = loop {
        if evaluations >= options.max_evaluations {
            break Termination::MaxEvaluations;
        }
        iterations += 1;

        let jt = jac.transpose();
        let normal = &jt * &jac;
        let residual = RVector::from_column_slice(&r);
        let gradient = &jt * &residual;
        let active = active_set(&x, &gradient, bounds);
        let r_norm = residual.norm();
        if n == 0 || r_norm == 0.0 || gradient_converged(&jac, &gradient, r_norm, &active, options.gtol) {
            break Termination::Gradient;
        }

        let largest = normal.diagonal().max();
        let floor = if largest > 0.0 { largest * 1.0e-12 } else { 1.0e-300 };

        let mut accepted = None;
        while lambda <= MAX_LAMBDA && evaluations < options.max_evaluations {
            let mut damped = normal.clone();
            let mut rhs = -gradient.clone();
            for i in 0..n {
                if active[i] {
                    damped.row_mut(i).fill(0.0);
                    damped.column_mut(i).fill(0.0);
                    damped[(i, i)] = 1.0;
                    rhs[i] = 0.0;
                } else {
                    damped[(i, i)] += lambda * normal[(i, i)].max(floor);
                }
            }
            let Some(step) = damped.cholesky().map(|c| c.solve(&rhs)) else {
                lambda *= 10.0;
                continue;
            };

            let mut candidate: Vec<Scalar> = x.iter().zip(step.iter()).map(|(a, b)| a + b).collect();
            clamp_into(&mut candidate, &bounds.lower, &bounds.upper);
            let r_new = f(&candidate);
            evaluations += 1;
            let cost_new = half_squared_norm(&r_new);
            if cost_new.is_finite() && cost_new < cost {
                lambda = (lambda / 10.0).max(MIN_LAMBDA);
                accepted = Some((candidate, r_new, cost_new));
                break;
            }
            lambda *= 10.0;
        }

        let Some((x_new, r_new, cost_new)) = accepted else {
            break if evaluations >= options.max_evaluations {
                Termination::MaxEvaluations
            } else {
                Termination::Stalled
            };
        };

        let step_norm = norm(&x.iter().zip(&x_new).map(|(a, b)| b - a).collect::<Vec<_>>());
        let x_norm = norm(&x);
        let reduction = cost - cost_new;
        let previous = cost;

        x = x_new;
        r = r_new;
        cost = cost_new;
        jac = jacobian(&f, &x, &r, bounds, &mut evaluations);
        tracing::debug!(iteration = iterations, cost, lambda, "levenberg-marquardt step accepted");

        if reduction <= options.ftol * previous {
            break Termination::CostTolerance;
        }
        if step_norm <= options.xtol * (options.xtol + x_norm) {
            break Termination::StepTolerance;
        }
    };

    Ok(LocalFit { x, residuals: r, cost, jacobian: jac, iterations, evaluations, termination })
}

/// Parameter covariance `(JᵀJ)⁺ · 2·cost / (m − n)`, computed from the SVD
/// of the Jacobian with small singular values discarded.
///
/// Returns `None` when there are no more residuals than parameters or the
/// result is not finite.
#[must_use]
pub fn covariance(fit: &LocalFit) -> Option<RMatrix> {
    let (m, n) = fit.jacobian.shape();
    if m <= n || n == 0 {
        return None;
    }
    let svd = fit.jacobian.clone().svd(false, true);
    let v_t = svd.v_t?;
    let largest = svd.singular_values.max();
    let threshold = Scalar::EPSILON * m.max(n) as Scalar * largest;

    let mut cov = RMatrix::zeros(n, n);
    for (k, &s) in svd.singular_values.iter().enumerate() {
        if s > threshold {
            let v = v_t.row(k);
            cov += v.transpose() * v / (s * s);
        }
    }
    let variance = 2.0 * fit.cost / (m - n) as Scalar;
    cov *= variance;
    cov.iter().all(|v| v.is_finite()).then_some(cov)
}

/// One-sigma parameter uncertainties, `√diag(covariance)`.
#[must_use]
pub fn confidence(fit: &LocalFit) -> Option<Vec<Scalar>> {
    covariance(fit).map(|cov| cov.diagonal().iter().map(|v| v.max(0.0).sqrt()).collect())
}
