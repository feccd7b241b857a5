//! Upper tails of the central and Wallenius noncentral hypergeometric
//! distributions
//!
//! An urn holds `m1` set members and `m2` other genes; `n` genes are drawn.
//! Under Wallenius' model each member is `odds` times as likely as an other
//! gene to be drawn at every step. The noncentral probabilities come from the
//! integral representation
//!
//! f(x) = C(m1, x) C(m2, n - x) * int_0^1 (1 - t^(w/D))^x (1 - t^(1/D))^(n-x) dt,
//! D = w (m1 - x) + (m2 - n + x),
//!
//! evaluated on the substitution t = exp(-s), where the log integrand is
//! concave, and renormalised over the part of the support that carries mass.

use statrs::distribution::{DiscreteCDF, Hypergeometric};
use statrs::function::factorial::ln_binomial;

/// Terms more than this far below the largest log mass are dropped
const LOG_MASS_CUTOFF: f64 = 40.0;
/// Simpson intervals per integral
const QUADRATURE_INTERVALS: usize = 1024;

/// P(X >= observed) under the central hypergeometric distribution
pub fn hypergeometric_upper_tail(observed: usize, m1: usize, m2: usize, n: usize) -> f64 {
    if observed == 0 {
        return 1.0;
    }
    let total = (m1 + m2) as u64;
    match Hypergeometric::new(total, m1 as u64, (n as u64).min(total)) {
        // sf(k) = P(X > k)
        Ok(d) => d.sf(observed as u64 - 1).clamp(0.0, 1.0),
        Err(_) => f64::NAN,
    }
}

/// ln(1 - exp(-z)) for z > 0
fn ln_one_minus_exp(z: f64) -> f64 {
    (-(-z).exp_m1()).ln()
}

/// Log of the Wallenius integral for one support point
fn log_integral(x: usize, n: usize, m1: usize, m2: usize, odds: f64) -> f64 {
    let d = odds * (m1 - x) as f64 + (m2 + x - n) as f64;
    if d <= 0.0 {
        // every ball is drawn; the outcome is certain
        return 0.0;
    }
    let a = odds / d;
    let b = 1.0 / d;
    let xf = x as f64;
    let yf = (n - x) as f64;

    let g = |s: f64| -> f64 {
        let mut v = -s;
        if x > 0 {
            v += xf * ln_one_minus_exp(a * s);
        }
        if n > x {
            v += yf * ln_one_minus_exp(b * s);
        }
        v
    };
    let dg = |s: f64| -> f64 {
        let mut v = -1.0;
        if x > 0 {
            v += xf * a / (a * s).exp_m1();
        }
        if n > x {
            v += yf * b / (b * s).exp_m1();
        }
        v
    };

    if n == 0 {
        return 0.0;
    }
    // g is concave with g' -> inf at 0 and g'(n) <= 0
    let (mut lo, mut hi) = (0.0, n as f64);
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if dg(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-10 * hi.max(1.0) {
            break;
        }
    }
    let mode = 0.5 * (lo + hi);
    let peak = g(mode);
    let mut upper = mode + 1.0;
    while g(upper) > peak - LOG_MASS_CUTOFF {
        upper = mode + 2.0 * (upper - mode);
    }

    let h = upper / QUADRATURE_INTERVALS as f64;
    let mut sum = 0.0;
    for k in 0..=QUADRATURE_INTERVALS {
        let s = k as f64 * h;
        let coef = if k == 0 || k == QUADRATURE_INTERVALS {
            1.0
        } else if k % 2 == 1 {
            4.0
        } else {
            2.0
        };
        let v = g(s);
        if v.is_finite() {
            sum += coef * (v - peak).exp();
        }
    }
    peak + (sum * h / 3.0).ln()
}

fn log_wallenius_mass(x: usize, n: usize, m1: usize, m2: usize, odds: f64) -> f64 {
    ln_binomial(m1 as u64, x as u64) + ln_binomial(m2 as u64, (n - x) as u64) + log_integral(x, n, m1, m2, odds)
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// P(X >= observed) under Wallenius' noncentral hypergeometric distribution
pub fn wallenius_upper_tail(observed: usize, m1: usize, m2: usize, n: usize, odds: f64) -> f64 {
    if !(odds > 0.0) || !odds.is_finite() {
        return f64::NAN;
    }
    let n = n.min(m1 + m2);
    let support_lo = n.saturating_sub(m2);
    let support_hi = n.min(m1);
    if observed <= support_lo {
        return 1.0;
    }
    if observed > support_hi {
        return 0.0;
    }

    let guess = n as f64 * odds * m1 as f64 / (odds * m1 as f64 + m2 as f64);
    let start = (guess.round() as usize).clamp(support_lo, support_hi);

    let mut masses: Vec<(usize, f64)> = vec![(start, log_wallenius_mass(start, n, m1, m2, odds))];
    let mut best = masses[0].1;

    let mut x = start;
    while x > support_lo {
        x -= 1;
        let lp = log_wallenius_mass(x, n, m1, m2, odds);
        masses.push((x, lp));
        best = best.max(lp);
        if lp < best - LOG_MASS_CUTOFF && x < observed {
            break;
        }
    }
    let mut x = start;
    while x < support_hi {
        x += 1;
        let lp = log_wallenius_mass(x, n, m1, m2, odds);
        masses.push((x, lp));
        best = best.max(lp);
        if lp < best - LOG_MASS_CUTOFF && x >= observed {
            break;
        }
    }

    let all: Vec<f64> = masses.iter().map(|&(_, lp)| lp).collect();
    let tail: Vec<f64> = masses.iter().filter(|&&(x, _)| x >= observed).map(|&(_, lp)| lp).collect();
    if tail.is_empty() {
        return 0.0;
    }
    (log_sum_exp(&tail) - log_sum_exp(&all)).exp().clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hypergeometric_tail() {
        // one DE gene among 12, set of 2: P(X >= 1) = 2/12
        assert!((hypergeometric_upper_tail(1, 2, 10, 1) - 2.0 / 12.0).abs() < 1e-10);
        assert_eq!(hypergeometric_upper_tail(0, 5, 20, 4), 1.0);
        // P(X >= 2) with m1 = 3, m2 = 7, n = 4 is 1 - (35 + 105) / 210
        assert!((hypergeometric_upper_tail(2, 3, 7, 4) - 70.0 / 210.0).abs() < 1e-10);
    }

    #[test]
    fn test_unit_odds_matches_central() {
        for &(obs, m1, m2, n) in &[(1, 2, 10, 1), (2, 3, 7, 4), (5, 20, 80, 15), (9, 40, 400, 30)] {
            let w = wallenius_upper_tail(obs, m1, m2, n, 1.0);
            let h = hypergeometric_upper_tail(obs, m1, m2, n);
            assert!((w - h).abs() < 1e-6, "obs={} m1={} m2={} n={}: {} vs {}", obs, m1, m2, n, w, h);
        }
    }

    #[test]
    fn test_single_draw_probability() {
        // one draw: P(member) = w m1 / (w m1 + m2)
        let p = wallenius_upper_tail(1, 4, 16, 1, 3.0);
        assert!((p - 12.0 / 28.0).abs() < 1e-6);
    }

    #[test]
    fn test_higher_odds_raise_tail() {
        let p1 = wallenius_upper_tail(4, 20, 180, 20, 1.0);
        let p2 = wallenius_upper_tail(4, 20, 180, 20, 2.0);
        let p_half = wallenius_upper_tail(4, 20, 180, 20, 0.5);
        assert!(p2 > p1 && p1 > p_half);
        assert_eq!(wallenius_upper_tail(0, 20, 180, 20, 2.0), 1.0);
        assert_eq!(wallenius_upper_tail(21, 20, 180, 20, 2.0), 0.0);
    }
}
