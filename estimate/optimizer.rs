//! Box-constrained quasi-Newton minimization.
//!
//! The BFGS solver works on an unbounded vector `z`; every component is mapped into
//! its interval by `x = lo + (hi - lo) / (1 + e^-z)`, so the objective is never
//! evaluated outside the box. Gradients are central differences in `z`.
//!
//! A run that stops early (line-search failure, iteration cap) is reported with the
//! lowest point seen. It only counts as converged when the gradient there is still
//! within a loose multiple of the tolerance.

use super::EstimationError;
use super::likelihood::{BoundsConfig, ParameterBounds};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use wolfe_bfgs::{Bfgs, BfgsSolution};

/// Large finite cost substituted for non-finite objective values.
const PENALTY: f64 = 1e10;
/// Gradient norm accepted at the best point of a run that did not finish cleanly,
/// as a multiple of the configured tolerance.
const STATIONARITY_FACTOR: f64 = 100.0;
/// Fraction of each interval kept free at both ends when placing the start point.
const INTERIOR_FRACTION: f64 = 1e-9;

/// Where the optimizer starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StartVector {
    /// `theta = 1` and the per-cause marginal fits of the layout's families.
    #[default]
    MarginalFits,
    /// An explicit vector in layout order.
    Fixed(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub max_iterations: usize,
    /// Gradient-norm tolerance of the solver.
    pub tolerance: f64,
    /// Relative step of the central-difference gradient.
    pub gradient_step: f64,
    pub start: StartVector,
    pub bounds: BoundsConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-6,
            gradient_step: 1e-6,
            start: StartVector::default(),
            bounds: BoundsConfig::default(),
        }
    }
}

/// Outcome of one bounded minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedMinimum {
    pub point: Vec<f64>,
    pub value: f64,
    pub converged: bool,
    /// Iterations reported by the solver; absent when it stopped with an error.
    pub iterations: Option<usize>,
    pub evaluations: usize,
    pub gradient_norm: f64,
    pub message: String,
}

struct SigmoidTransform<'a> {
    bounds: &'a ParameterBounds,
}

impl SigmoidTransform<'_> {
    fn to_bounded(&self, z: &[f64]) -> Vec<f64> {
        z.iter()
            .zip(self.bounds.lower.iter().zip(&self.bounds.upper))
            .map(|(z, (lo, hi))| lo + (hi - lo) / (1.0 + (-z).exp()))
            .collect()
    }

    fn to_unbounded(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.bounds.lower.iter().zip(&self.bounds.upper))
            .map(|(x, (lo, hi))| {
                let p = ((x - lo) / (hi - lo)).clamp(INTERIOR_FRACTION, 1.0 - INTERIOR_FRACTION);
                (p / (1.0 - p)).ln()
            })
            .collect()
    }
}

fn central_difference<F: Fn(&[f64]) -> f64>(cost: &F, z: &[f64], step: f64) -> Vec<f64> {
    let mut probe = z.to_vec();
    (0..z.len())
        .map(|i| {
            let h = step * z[i].abs().max(1.0);
            probe[i] = z[i] + h;
            let plus = cost(&probe);
            probe[i] = z[i] - h;
            let minus = cost(&probe);
            probe[i] = z[i];
            (plus - minus) / (2.0 * h)
        })
        .collect()
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|g| g * g).sum::<f64>().sqrt()
}

/// Minimizes `objective` over the box `bounds`, starting from `start`.
pub fn minimize_bounded<F>(
    objective: F,
    start: &[f64],
    bounds: &ParameterBounds,
    config: &OptimizerConfig,
) -> Result<BoundedMinimum, EstimationError>
where
    F: Fn(&[f64]) -> f64,
{
    if start.len() != bounds.len() {
        return Err(EstimationError::WrongParameterCount {
            expected: bounds.len(),
            found: start.len(),
        });
    }
    if let Some((index, &value)) = start
        .iter()
        .enumerate()
        .find(|(i, v)| !(bounds.lower[*i] <= **v && **v <= bounds.upper[*i]))
    {
        return Err(EstimationError::StartOutsideBounds {
            index,
            value,
            lower: bounds.lower[index],
            upper: bounds.upper[index],
        });
    }

    let transform = SigmoidTransform { bounds };
    let evaluations = Cell::new(0usize);
    let cost = |z: &[f64]| -> f64 {
        evaluations.set(evaluations.get() + 1);
        let value = objective(&transform.to_bounded(z));
        if value.is_finite() { value } else { PENALTY }
    };

    let z0 = transform.to_unbounded(&bounds.project_interior(start, INTERIOR_FRACTION));
    let best = RefCell::new((cost(&z0), z0.clone()));
    let step = config.gradient_step;

    let cost_and_grad = |z: &Array1<f64>| -> (f64, Array1<f64>) {
        let point = z.to_vec();
        let value = cost(&point);
        {
            let mut best = best.borrow_mut();
            if value < best.0 {
                *best = (value, point.clone());
            }
        }
        let grad = central_difference(&cost, &point, step);
        (value, Array1::from(grad))
    };

    let outcome = Bfgs::new(Array1::from(z0), cost_and_grad)
        .with_tolerance(config.tolerance)
        .with_max_iterations(config.max_iterations)
        .run();

    let (z_final, iterations, finished, mut message) = match outcome {
        Ok(BfgsSolution {
            final_point,
            iterations,
            ..
        }) => (
            final_point.to_vec(),
            Some(iterations),
            true,
            "gradient tolerance reached".to_string(),
        ),
        Err(err) => {
            let (_, z) = best.borrow().clone();
            (z, None, false, format!("{err:?}"))
        }
    };

    let gradient_norm = norm(&central_difference(&cost, &z_final, step));
    let converged = finished
        || (gradient_norm.is_finite() && gradient_norm <= config.tolerance * STATIONARITY_FACTOR);
    if !finished && converged {
        message.push_str(&format!(
            "; accepted with gradient norm {gradient_norm:.3e} at the best point"
        ));
    }
    let point = transform.to_bounded(&z_final);
    let value = objective(&point);

    Ok(BoundedMinimum {
        point,
        value,
        converged,
        iterations,
        evaluations: evaluations.get(),
        gradient_norm,
        message,
    })
}
