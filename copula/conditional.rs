//! Closed-form conditional weights of the supported copulas.
//!
//! `conditional_probability(family, ua, ub, theta)` is the per-observation copula
//! factor of the competing-risks likelihood: for an event of cause `a` observed at
//! time `t`, it is evaluated at `ua = F_a(t)` and `ub = F_b(t)`. Inputs are clamped to
//! `[PROB_EPSILON, 1 - PROB_EPSILON]` first, so the boundary singularities of both
//! generators are never reached.
//!
//! With `g1 = e^(-theta*u1) - 1`, `g2 = e^(-theta*u2) - 1` and `g = e^(-theta) - 1`:
//!
//! - Frank: `(g1*g2 + g1) / (g1*g2 + g)`, the partial derivative of the Frank
//!   copula with respect to its second argument.
//! - Clayton: `1 - (u1^-theta + u2^-theta - 1)^-(1 + 1/theta) * u1^-(1 + theta)`, the
//!   conditional survival `P(U2 > u2 | U1 = u1)`.

use super::CopulaFamily;
use crate::margins::clamp_probability;

pub fn conditional_probability(family: CopulaFamily, ua: f64, ub: f64, theta: f64) -> f64 {
    let u1 = clamp_probability(ua);
    let u2 = clamp_probability(ub);
    match family {
        CopulaFamily::Frank => frank(u1, u2, theta),
        CopulaFamily::Clayton => clayton(u1, u2, theta),
    }
}

/// With `a_i = e^(-theta*u_i)` the numerator is `a2*g1` and the denominator expands to
/// `a1*g2 + a2*(e^(-theta*(1 - u2)) - 1)`, two terms of equal sign for either sign of
/// `theta`. Evaluating it that way avoids the cancellation in `g1*g2 + g` when both
/// margins approach one.
fn frank(u1: f64, u2: f64, theta: f64) -> f64 {
    let a1 = (-theta * u1).exp();
    let a2 = (-theta * u2).exp();
    let g1 = (-theta * u1).exp_m1();
    let g2 = (-theta * u2).exp_m1();
    let tail = (-theta * (1.0 - u2)).exp_m1();
    ((a2 * g1) / (a1 * g2 + a2 * tail)).min(1.0)
}

/// Evaluated in log space. The subtracted term equals `(1 + x)^-(1 + 1/theta)` with
/// `x = (u2^-theta - 1) * u1^theta`; `u^-theta` alone overflows for large `theta` near
/// the lower clamp, `ln x` does not.
fn clayton(u1: f64, u2: f64, theta: f64) -> f64 {
    let b = -theta * u2.ln();
    let ln_x = theta * u1.ln() + ln_exp_m1(b);
    let ln_term = -(1.0 + 1.0 / theta) * softplus(ln_x);
    -ln_term.exp_m1()
}

/// `ln(e^x - 1)` for `x > 0`.
fn ln_exp_m1(x: f64) -> f64 {
    if x > 1.0 {
        x + (-(-x).exp()).ln_1p()
    } else {
        x.exp_m1().ln()
    }
}

/// `ln(1 + e^x)`.
fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn frank_cdf(u: f64, v: f64, theta: f64) -> f64 {
        -(1.0 + (-theta * u).exp_m1() * (-theta * v).exp_m1() / (-theta).exp_m1()).ln() / theta
    }

    fn clayton_cdf(u: f64, v: f64, theta: f64) -> f64 {
        (u.powf(-theta) + v.powf(-theta) - 1.0).powf(-1.0 / theta)
    }

    #[test]
    fn frank_matches_numerical_partial_derivative() {
        let theta = 2.0;
        let h = 1e-6;
        for &(u1, u2) in &[(0.2, 0.7), (0.5, 0.5), (0.9, 0.1), (0.05, 0.95)] {
            let numeric =
                (frank_cdf(u1, u2 + h, theta) - frank_cdf(u1, u2 - h, theta)) / (2.0 * h);
            let analytic = conditional_probability(CopulaFamily::Frank, u1, u2, theta);
            assert_relative_eq!(analytic, numeric, max_relative = 1e-6);
        }
    }

    #[test]
    fn clayton_matches_numerical_conditional_survival() {
        let theta = 2.0;
        let h = 1e-6;
        for &(u1, u2) in &[(0.2, 0.7), (0.5, 0.5), (0.9, 0.1), (0.3, 0.35)] {
            let partial =
                (clayton_cdf(u1 + h, u2, theta) - clayton_cdf(u1 - h, u2, theta)) / (2.0 * h);
            let analytic = conditional_probability(CopulaFamily::Clayton, u1, u2, theta);
            assert_relative_eq!(analytic, 1.0 - partial, max_relative = 1e-6);
        }
    }

    #[test]
    fn weights_are_probabilities_across_the_square() {
        for family in [CopulaFamily::Frank, CopulaFamily::Clayton] {
            for &theta in &[0.05, 1.0, 2.0, 10.0, 60.0] {
                for i in 0..=20 {
                    for j in 0..=20 {
                        let (u1, u2) = (i as f64 / 20.0, j as f64 / 20.0);
                        let w = conditional_probability(family, u1, u2, theta);
                        assert!(
                            w.is_finite() && (0.0..=1.0).contains(&w),
                            "{family} theta={theta} at ({u1}, {u2}) gave {w}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn clamping_keeps_the_boundary_finite() {
        let w = conditional_probability(CopulaFamily::Clayton, 0.0, 1.0, 90.0);
        assert!(w.is_finite());
        let w = conditional_probability(CopulaFamily::Frank, 1.0, 0.0, 5.0);
        assert!(w.is_finite());
    }
}
