//! Basin hopping on top of the local least-squares solver.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::math::{clamp_into, Scalar};

use super::lm::{least_squares, LocalFit};
use super::{Bounds, FitError, FitOptions};

/// Settings for the global search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalOptions {
    /// Number of hops after the initial local minimisation.
    pub iterations: usize,
    /// Maximum log10 displacement applied to each positive parameter per hop.
    pub step: Scalar,
    /// Metropolis temperature on the cost scale.
    pub temperature: Scalar,
    /// Seed for reproducible searches; entropy-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self { iterations: 100, step: 0.5, temperature: 1.0, seed: None }
    }
}

/// Displaces positive parameters multiplicatively by up to `step` decades and
/// the others additively, then projects into the bounds.
fn perturb(x: &[Scalar], bounds: &Bounds, step: Scalar, rng: &mut StdRng) -> Vec<Scalar> {
    let mut trial: Vec<Scalar> = x
        .iter()
        .map(|&v| {
            let u = rng.gen_range(-step..=step);
            if v > 0.0 {
                v * 10f64.powf(u)
            } else {
                v + u
            }
        })
        .collect();
    clamp_into(&mut trial, &bounds.lower, &bounds.upper);
    trial
}

/// Runs a local fit from `x0`, then hops between minima accepting moves by
/// the Metropolis criterion. Returns the lowest-cost minimum seen; its
/// `evaluations` count covers the whole search.
pub fn basin_hopping<F>(
    f: F,
    x0: &[Scalar],
    bounds: &Bounds,
    options: &FitOptions,
    global: &GlobalOptions,
) -> Result<LocalFit, FitError>
where
    F: Fn(&[Scalar]) -> Vec<Scalar>,
{
    if !(global.step > 0.0 && global.temperature >= 0.0) {
        return Err(FitError::InvalidOptions(format!(
            "basin hopping needs step > 0 and temperature >= 0, got {} and {}",
            global.step, global.temperature
        )));
    }
    let mut rng = match global.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut current = least_squares(&f, x0, bounds, options)?;
    let mut best = current.clone();
    let mut evaluations = current.evaluations;

    for hop in 0..global.iterations {
        let trial = perturb(&current.x, bounds, global.step, &mut rng);
        let candidate = match least_squares(&f, &trial, bounds, options) {
            Ok(candidate) => candidate,
            Err(FitError::NonFiniteResidual) => {
                tracing::debug!(hop, "skipping hop with non-finite residuals");
                continue;
            }
            Err(e) => return Err(e),
        };
        evaluations += candidate.evaluations;

        if candidate.cost < best.cost {
            tracing::debug!(hop, cost = candidate.cost, "new global minimum");
            best = candidate.clone();
        }
        let uphill = candidate.cost - current.cost;
        if uphill < 0.0 || rng.gen::<Scalar>() < (-uphill / global.temperature).exp() {
            current = candidate;
        }
    }

    best.evaluations = evaluations;
    Ok(best)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn escapes_local_minimum_in_log_space() {
        // With y = log10(x): r = (y + 2)((y - 1)^2 + 0.5) has a local minimum of
        // |r| near y = 0.91 and its only root at y = -2.
        let residuals = |p: &[Scalar]| {
            let y = p[0].log10();
            vec![(y + 2.0) * ((y - 1.0).powi(2) + 0.5)]
        };
        let bounds = Bounds::new(vec![1.0e-6], vec![1.0e6]).expect("valid bounds");
        let global = GlobalOptions { iterations: 40, step: 3.0, temperature: 1.0, seed: Some(7) };
        let fit = basin_hopping(residuals, &[100.0], &bounds, &FitOptions::default(), &global)
            .expect("finite start");
        assert_relative_eq!(fit.cost, 0.0, epsilon = 1.0e-12);
        assert_relative_eq!(fit.x[0], 0.01, max_relative = 1.0e-6);
    }

    #[test]
    fn same_seed_gives_same_result() {
        let residuals = |p: &[Scalar]| vec![p[0].sin() + 0.1 * p[0], p[1] - 1.0];
        let bounds = Bounds::unbounded(2);
        let global = GlobalOptions { iterations: 5, seed: Some(11), ..GlobalOptions::default() };
        let a = basin_hopping(residuals, &[3.0, 3.0], &bounds, &FitOptions::default(), &global).expect("finite");
        let b = basin_hopping(residuals, &[3.0, 3.0], &bounds, &FitOptions::default(), &global).expect("finite");
        assert_eq!(a.x, b.x);
    }

    #[test]
    fn rejects_non_positive_step() {
        let global = GlobalOptions { step: 0.0, ..GlobalOptions::default() };
        let err = basin_hopping(|p: &[Scalar]| vec![p[0]], &[1.0], &Bounds::unbounded(1), &FitOptions::default(), &global)
            .unwrap_err();
        assert!(matches!(err, FitError::InvalidOptions(_)));
    }
}
