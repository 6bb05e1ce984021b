//! # Marginal Family Selection
//!
//! Fits every candidate family in [`FamilyKind::CANDIDATES`] to a one-dimensional sample
//! of positive event times by maximum likelihood and ranks them by AIC
//! (`2k - 2 log L`). The minimum-AIC family is selected, subject to a parsimony rule:
//! a Weibull winner whose shape is close to one and whose AIC is within a relative
//! tolerance of the exponential fit is replaced by the exponential.
//!
//! Candidates that fail to converge are recorded and excluded from the ranking. Only
//! a sample that is too small, or that contains invalid values, aborts the whole fit.

use super::{FamilyKind, MarginalFamily};
use crate::simulate::reduce::{Cause, Dataset};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::digamma;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error(
        "Cause {cause} has only {found} observations, but at least {required} are required to fit a marginal distribution."
    )]
    EmptyCauseSample {
        cause: Cause,
        found: usize,
        required: usize,
    },
    #[error(
        "The sample contains only {found} observations, but at least {required} are required to fit a marginal distribution."
    )]
    InsufficientSample { found: usize, required: usize },
    #[error("Observation {index} has value {value}; event times must be finite and strictly positive.")]
    InvalidObservation { index: usize, value: f64 },
    #[error("None of the candidate families converged. Failures: {0:?}")]
    NoCandidateConverged(Vec<CandidateFailure>),
}

/// Tuning knobs for the fitter, including the parsimony override thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Maximum `|shape - 1|` for a Weibull fit to be considered exponential.
    pub shape_tol: f64,
    /// Maximum `|AIC(weibull) - AIC(exp)| / |AIC(exp)|` for the override to apply.
    pub aic_pct_tol: f64,
    /// Smallest sample that will be fitted at all.
    pub min_observations: usize,
    /// Iteration cap for the shape equations of the gamma and Weibull families.
    pub max_iterations: usize,
    /// Relative convergence tolerance for those shape equations.
    pub tolerance: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            shape_tol: 0.2,
            aic_pct_tol: 0.05,
            min_observations: 10,
            max_iterations: 200,
            tolerance: 1e-10,
        }
    }
}

/// A converged maximum-likelihood fit of one candidate family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFit {
    pub family: MarginalFamily,
    pub log_likelihood: f64,
    pub aic: f64,
    pub iterations: usize,
}

/// A candidate that was excluded from the AIC comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub family: FamilyKind,
    pub reason: String,
}

/// The outcome of fitting all candidates to one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub sample_size: usize,
    /// Converged candidates, in `FamilyKind::CANDIDATES` order.
    pub candidates: Vec<CandidateFit>,
    pub failures: Vec<CandidateFailure>,
    /// Family with the minimum AIC before the parsimony override.
    pub min_aic_family: FamilyKind,
    /// Family finally selected.
    pub best_fit: FamilyKind,
    pub parsimony_override: bool,
}

impl FitResult {
    pub fn candidate(&self, kind: FamilyKind) -> Option<&CandidateFit> {
        self.candidates.iter().find(|c| c.family.kind() == kind)
    }

    /// The selected candidate. Absent only for a result that was not produced by
    /// [`fit_sample`], such as a hand-edited report.
    pub fn best(&self) -> Option<&CandidateFit> {
        self.candidate(self.best_fit)
    }

    /// Parameter estimates of the selected family, keyed by parameter name.
    pub fn estimates(&self) -> BTreeMap<String, f64> {
        let Some(best) = self.best().map(|c| c.family) else {
            return BTreeMap::new();
        };
        best.kind()
            .param_names()
            .iter()
            .map(|name| name.to_string())
            .zip(best.params())
            .collect()
    }

    /// AIC of every converged candidate.
    pub fn aic_table(&self) -> BTreeMap<FamilyKind, f64> {
        self.candidates
            .iter()
            .map(|c| (c.family.kind(), c.aic))
            .collect()
    }
}

/// Fits all candidates to the observed times of one cause.
pub fn fit_cause(
    dataset: &Dataset,
    cause: Cause,
    options: &FitOptions,
) -> Result<FitResult, FitError> {
    let times = dataset.times_for(cause);
    if times.len() < options.min_observations {
        return Err(FitError::EmptyCauseSample {
            cause,
            found: times.len(),
            required: options.min_observations,
        });
    }
    let result = fit_sample(&times, options)?;
    log::debug!(
        "Cause {cause}: {} observations, selected {} (minimum AIC: {}{}).",
        result.sample_size,
        result.best_fit,
        result.min_aic_family,
        if result.parsimony_override {
            ", parsimony override applied"
        } else {
            ""
        }
    );
    Ok(result)
}

/// Fits all candidates to an arbitrary sample of positive reals.
pub fn fit_sample(times: &[f64], options: &FitOptions) -> Result<FitResult, FitError> {
    let required = options.min_observations.max(2);
    if times.len() < required {
        return Err(FitError::InsufficientSample {
            found: times.len(),
            required,
        });
    }
    if let Some((index, &value)) = times
        .iter()
        .enumerate()
        .find(|(_, v)| !(v.is_finite() && **v > 0.0))
    {
        return Err(FitError::InvalidObservation { index, value });
    }

    let stats = SampleStats::new(times);
    let mut candidates = Vec::with_capacity(FamilyKind::CANDIDATES.len());
    let mut failures = Vec::new();

    for kind in FamilyKind::CANDIDATES {
        let fitted = match kind {
            FamilyKind::Exponential => internal::fit_exponential(&stats),
            FamilyKind::Weibull => internal::fit_weibull(times, &stats, options),
            FamilyKind::Gamma => internal::fit_gamma(&stats, options),
            FamilyKind::LogNormal => internal::fit_lognormal(times, &stats),
        };
        match fitted {
            Ok((family, iterations)) => {
                let log_likelihood: f64 = times.iter().map(|&t| family.ln_pdf(t)).sum();
                if !log_likelihood.is_finite() {
                    failures.push(CandidateFailure {
                        family: kind,
                        reason: format!("non-finite log-likelihood at {family}"),
                    });
                    continue;
                }
                let k = family.param_count() as f64;
                candidates.push(CandidateFit {
                    family,
                    log_likelihood,
                    aic: 2.0 * k - 2.0 * log_likelihood,
                    iterations,
                });
            }
            Err(reason) => {
                log::warn!("Excluding {kind} from the AIC comparison: {reason}");
                failures.push(CandidateFailure {
                    family: kind,
                    reason,
                });
            }
        }
    }

    let Some(min_aic) = candidates
        .iter()
        .min_by(|a, b| a.aic.total_cmp(&b.aic))
        .map(|c| c.family.kind())
    else {
        return Err(FitError::NoCandidateConverged(failures));
    };

    let mut result = FitResult {
        sample_size: times.len(),
        candidates,
        failures,
        min_aic_family: min_aic,
        best_fit: min_aic,
        parsimony_override: false,
    };
    if prefers_exponential(&result, options) {
        result.best_fit = FamilyKind::Exponential;
        result.parsimony_override = true;
    }
    Ok(result)
}

/// The Weibull family nests the exponential at `shape = 1`. When the Weibull wins
/// only marginally and its shape is near one, the simpler model is kept.
fn prefers_exponential(result: &FitResult, options: &FitOptions) -> bool {
    if result.min_aic_family != FamilyKind::Weibull {
        return false;
    }
    let (Some(weibull), Some(exponential)) = (
        result.candidate(FamilyKind::Weibull),
        result.candidate(FamilyKind::Exponential),
    ) else {
        return false;
    };
    let MarginalFamily::Weibull { shape, .. } = weibull.family else {
        return false;
    };
    let relative_gap = (weibull.aic - exponential.aic).abs() / exponential.aic.abs();
    (shape - 1.0).abs() < options.shape_tol && relative_gap < options.aic_pct_tol
}

/// Sufficient statistics shared by the closed-form and iterative fits.
struct SampleStats {
    n: f64,
    mean: f64,
    mean_log: f64,
    max: f64,
}

impl SampleStats {
    fn new(times: &[f64]) -> Self {
        let n = times.len() as f64;
        let mean = times.iter().sum::<f64>() / n;
        let mean_log = times.iter().map(|t| t.ln()).sum::<f64>() / n;
        let max = times.iter().copied().fold(f64::MIN_POSITIVE, f64::max);
        Self {
            n,
            mean,
            mean_log,
            max,
        }
    }
}

mod internal {
    use super::*;

    type CandidateOutcome = Result<(MarginalFamily, usize), String>;

    pub(super) fn fit_exponential(stats: &SampleStats) -> CandidateOutcome {
        let family = MarginalFamily::from_params(FamilyKind::Exponential, &[1.0 / stats.mean])
            .map_err(|e| e.to_string())?;
        Ok((family, 0))
    }

    pub(super) fn fit_lognormal(times: &[f64], stats: &SampleStats) -> CandidateOutcome {
        let variance = times
            .iter()
            .map(|t| (t.ln() - stats.mean_log).powi(2))
            .sum::<f64>()
            / stats.n;
        let sdlog = variance.sqrt();
        if !(sdlog > 1e-12) {
            return Err("log-times have zero spread".to_string());
        }
        let family = MarginalFamily::from_params(FamilyKind::LogNormal, &[stats.mean_log, sdlog])
            .map_err(|e| e.to_string())?;
        Ok((family, 0))
    }

    /// Solves `ln(a) - digamma(a) = ln(mean) - mean(ln x)` by bisection in `ln(a)`.
    /// The left-hand side is strictly decreasing, so a bracket always exists when the
    /// right-hand side is positive.
    pub(super) fn fit_gamma(stats: &SampleStats, options: &FitOptions) -> CandidateOutcome {
        let s = stats.mean.ln() - stats.mean_log;
        if !(s > 1e-12) || !s.is_finite() {
            return Err(format!("degenerate sample (log-mean gap {s:.3e})"));
        }
        let score = |log_a: f64| {
            let a = log_a.exp();
            log_a - digamma(a) - s
        };

        // Minka's closed-form approximation brackets the root tightly.
        let a0 = (3.0 - s + ((s - 3.0).powi(2) + 24.0 * s).sqrt()) / (12.0 * s);
        let mut lo = a0.ln() - 1.0;
        let mut hi = a0.ln() + 1.0;
        let mut expansions = 0;
        while score(lo) < 0.0 || score(hi) > 0.0 {
            lo -= 1.0;
            hi += 1.0;
            expansions += 1;
            if expansions > options.max_iterations || !lo.is_finite() || !hi.is_finite() {
                return Err("could not bracket the shape estimate".to_string());
            }
        }

        for iteration in 1..=options.max_iterations {
            let mid = 0.5 * (lo + hi);
            if score(mid) > 0.0 {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi - lo < options.tolerance {
                let shape = (0.5 * (lo + hi)).exp();
                let family =
                    MarginalFamily::from_params(FamilyKind::Gamma, &[shape, shape / stats.mean])
                        .map_err(|e| e.to_string())?;
                return Ok((family, iteration));
            }
        }
        Err(format!(
            "shape equation did not converge within {} iterations",
            options.max_iterations
        ))
    }

    /// Newton iteration on the Weibull profile score for the shape `k`:
    ///
    /// `g(k) = sum(y^k ln y) / sum(y^k) - 1/k - mean(ln y) = 0`
    ///
    /// with `y = x / max(x)` to keep `y^k` bounded. `g` is increasing in `k`, so a
    /// bisection bracket is maintained and used whenever a Newton step leaves it.
    pub(super) fn fit_weibull(
        times: &[f64],
        stats: &SampleStats,
        options: &FitOptions,
    ) -> CandidateOutcome {
        let log_y: Vec<f64> = times.iter().map(|t| (t / stats.max).ln()).collect();
        let mean_log_y = stats.mean_log - stats.max.ln();
        let sd_log = (log_y.iter().map(|l| (l - mean_log_y).powi(2)).sum::<f64>() / stats.n).sqrt();
        if !(sd_log > 1e-12) {
            return Err("log-times have zero spread".to_string());
        }

        let evaluate = |k: f64| {
            let mut s0 = 0.0;
            let mut s1 = 0.0;
            let mut s2 = 0.0;
            for &l in &log_y {
                let w = (k * l).exp();
                s0 += w;
                s1 += w * l;
                s2 += w * l * l;
            }
            let ratio = s1 / s0;
            let g = ratio - 1.0 / k - mean_log_y;
            let dg = s2 / s0 - ratio * ratio + 1.0 / (k * k);
            (g, dg, s0)
        };

        let mut lo = 0.0_f64;
        let mut hi = f64::INFINITY;
        let mut k = 1.2 / sd_log;
        for iteration in 1..=options.max_iterations {
            let (g, dg, _) = evaluate(k);
            if !g.is_finite() {
                return Err(format!("profile score is not finite at shape {k}"));
            }
            if g > 0.0 {
                hi = hi.min(k);
            } else {
                lo = lo.max(k);
            }
            let mut next = k - g / dg;
            if !(next > lo && next < hi) || !next.is_finite() {
                next = if hi.is_finite() { 0.5 * (lo + hi) } else { 2.0 * k };
            }
            if (next - k).abs() <= options.tolerance * k {
                let (_, _, s0_next) = evaluate(next);
                let mean_y_k = s0_next / stats.n;
                let scale = stats.max * mean_y_k.powf(1.0 / next);
                let family = MarginalFamily::from_params(FamilyKind::Weibull, &[next, scale])
                    .map_err(|e| e.to_string())?;
                return Ok((family, iteration));
            }
            k = next;
        }
        Err(format!(
            "shape equation did not converge within {} iterations",
            options.max_iterations
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn draw(family: MarginalFamily, n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| family.sample(&mut rng)).collect()
    }

    #[test]
    fn closed_form_fits_match_textbook_estimators() {
        let times = [0.5, 1.0, 1.5, 2.0, 4.0, 0.25, 3.0, 0.75, 1.25, 2.5];
        let result = fit_sample(&times, &FitOptions::default()).unwrap();
        let mean = times.iter().sum::<f64>() / times.len() as f64;
        let exp = result.candidate(FamilyKind::Exponential).unwrap();
        assert_relative_eq!(exp.family.params()[0], 1.0 / mean, epsilon = 1e-12);
        let expected_ll = times.len() as f64 * ((1.0 / mean).ln() - 1.0);
        assert_relative_eq!(exp.log_likelihood, expected_ll, epsilon = 1e-9);
        assert_relative_eq!(exp.aic, 2.0 - 2.0 * expected_ll, epsilon = 1e-9);

        let lognormal = result.candidate(FamilyKind::LogNormal).unwrap();
        let mean_log = times.iter().map(|t| t.ln()).sum::<f64>() / times.len() as f64;
        assert_relative_eq!(lognormal.family.params()[0], mean_log, epsilon = 1e-12);
    }

    #[test]
    fn gamma_fit_recovers_shape_and_rate() {
        let truth = MarginalFamily::Gamma {
            shape: 2.0,
            rate: 4.0,
        };
        let times = draw(truth, 20_000, 11);
        let result = fit_sample(&times, &FitOptions::default()).unwrap();
        let gamma = result.candidate(FamilyKind::Gamma).unwrap().family.params();
        assert_relative_eq!(gamma[0], 2.0, max_relative = 0.05);
        assert_relative_eq!(gamma[1], 4.0, max_relative = 0.05);
        assert_eq!(result.best_fit, FamilyKind::Gamma);
    }

    #[test]
    fn weibull_fit_satisfies_the_score_equations() {
        let truth = MarginalFamily::Weibull {
            shape: 1.8,
            scale: 0.7,
        };
        let times = draw(truth, 5_000, 3);
        let result = fit_sample(&times, &FitOptions::default()).unwrap();
        let fitted = result.candidate(FamilyKind::Weibull).unwrap();
        let params = fitted.family.params();
        assert_relative_eq!(params[0], 1.8, max_relative = 0.05);
        assert_relative_eq!(params[1], 0.7, max_relative = 0.05);

        // The MLE is a stationary point: nudging the shape lowers the likelihood.
        let ll = |shape: f64| -> f64 {
            let family = MarginalFamily::Weibull {
                shape,
                scale: params[1],
            };
            times.iter().map(|&t| family.ln_pdf(t)).sum()
        };
        assert!(ll(params[0]) >= ll(params[0] * 1.01));
        assert!(ll(params[0]) >= ll(params[0] * 0.99));

        // The scale is the closed-form maximizer at the reported shape.
        let n = times.len() as f64;
        let scale_at_shape = (times.iter().map(|t| t.powf(params[0])).sum::<f64>() / n)
            .powf(1.0 / params[0]);
        assert_relative_eq!(params[1], scale_at_shape, max_relative = 1e-12);
    }

    #[test]
    fn exponential_samples_select_exponential_far_more_often_than_chance() {
        let truth = MarginalFamily::Exponential { rate: 4.0 };
        let trials = 40;
        let selected = (0..trials)
            .filter(|&seed| {
                let times = draw(truth, 500, 100 + seed as u64);
                let result = fit_sample(&times, &FitOptions::default()).unwrap();
                result.best_fit == FamilyKind::Exponential
            })
            .count();
        // Chance level across four candidates is one in four.
        assert!(
            selected >= 24,
            "exponential selected in only {selected} of {trials} trials"
        );
    }

    #[test]
    fn parsimony_override_replaces_a_marginal_weibull_win() {
        let mut result = FitResult {
            sample_size: 100,
            candidates: vec![
                CandidateFit {
                    family: MarginalFamily::Exponential { rate: 2.0 },
                    log_likelihood: 100.0,
                    aic: -198.0,
                    iterations: 0,
                },
                CandidateFit {
                    family: MarginalFamily::Weibull {
                        shape: 1.1,
                        scale: 0.5,
                    },
                    log_likelihood: 102.0,
                    aic: -200.0,
                    iterations: 5,
                },
            ],
            failures: Vec::new(),
            min_aic_family: FamilyKind::Weibull,
            best_fit: FamilyKind::Weibull,
            parsimony_override: false,
        };
        assert!(prefers_exponential(&result, &FitOptions::default()));

        result.candidates[1].family = MarginalFamily::Weibull {
            shape: 1.5,
            scale: 0.5,
        };
        assert!(!prefers_exponential(&result, &FitOptions::default()));
    }

    #[test]
    fn a_result_without_candidates_has_no_best_fit() {
        let json = r#"{
            "sample_size": 0,
            "candidates": [],
            "failures": [],
            "min_aic_family": "weibull",
            "best_fit": "weibull",
            "parsimony_override": false
        }"#;
        let result: FitResult = serde_json::from_str(json).unwrap();
        assert!(result.best().is_none());
        assert!(result.estimates().is_empty());
        assert!(result.aic_table().is_empty());
    }

    #[test]
    fn degenerate_sample_excludes_iterative_candidates_without_aborting() {
        let times = vec![2.0; 12];
        let result = fit_sample(&times, &FitOptions::default()).unwrap();
        assert_eq!(result.best_fit, FamilyKind::Exponential);
        let failed: Vec<FamilyKind> = result.failures.iter().map(|f| f.family).collect();
        assert!(failed.contains(&FamilyKind::Gamma));
        assert!(failed.contains(&FamilyKind::Weibull));
        assert!(failed.contains(&FamilyKind::LogNormal));
    }

    #[test]
    fn too_small_or_invalid_samples_are_rejected() {
        let options = FitOptions::default();
        assert!(matches!(
            fit_sample(&[1.0, 2.0], &options),
            Err(FitError::InsufficientSample { found: 2, .. })
        ));
        let mut times = vec![1.0; 20];
        times[7] = -0.5;
        assert!(matches!(
            fit_sample(&times, &options),
            Err(FitError::InvalidObservation { index: 7, .. })
        ));
    }
}
