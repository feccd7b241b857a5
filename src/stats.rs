//! Statistical utility functions shared across modules
//!
//! Polygamma helpers for the empirical-Bayes variance squeeze, sample
//! quantiles, correlation, and the small dense solvers used by every
//! least-squares fit in the crate (GLM IRLS, quantile regression, spline
//! trends).

use ndarray::Array2;

/// Trigamma function psi'(x) for x > 0.
///
/// Recurrence psi'(x) = psi'(x + 1) + 1/x^2 up to x >= 10, then the
/// asymptotic series.
pub fn trigamma(x: f64) -> f64 {
    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < 10.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let x2 = 1.0 / (x * x);
    acc + 1.0 / x
        + x2 / 2.0
        + x2 / x * (1.0 / 6.0 - x2 * (1.0 / 30.0 - x2 * (1.0 / 42.0 - x2 / 30.0)))
}

/// Tetragamma function psi''(x) for x > 0.
pub fn tetragamma(x: f64) -> f64 {
    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < 10.0 {
        acc -= 2.0 / (x * x * x);
        x += 1.0;
    }
    let x2 = 1.0 / (x * x);
    acc - x2
        - x2 / x
        - x2 * x2 * (0.5 - x2 * (1.0 / 6.0 - x2 * (1.0 / 6.0 - x2 * 0.3)))
}

/// Solve trigamma(y) = x for y by Newton iteration on 1/trigamma.
/// R equivalent: limma::trigammaInverse()
pub fn trigamma_inverse(x: f64) -> f64 {
    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }
    if x > 1e7 {
        return 1.0 / x.sqrt();
    }
    if x < 1e-6 {
        return 1.0 / x;
    }

    let mut y = 0.5 + 1.0 / x;
    for _ in 0..50 {
        let tri = trigamma(y);
        let dif = tri * (1.0 - tri / x) / tetragamma(y);
        y += dif;
        if -dif / y < 1e-8 {
            break;
        }
    }
    y
}

/// Sample quantile with linear interpolation (R type 7). NaNs are ignored.
pub fn quantile(values: &[f64], prob: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    quantile_sorted(&sorted, prob)
}

/// Type 7 quantile of an already sorted slice
pub fn quantile_sorted(sorted: &[f64], prob: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let h = (n - 1) as f64 * prob.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Arithmetic mean over finite values
pub fn mean(values: &[f64]) -> f64 {
    let (sum, n) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), &v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Pearson correlation of two equally long slices
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> f64 {
    assert_eq!(x.len(), y.len());
    let mx = mean(x);
    let my = mean(y);
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (&a, &b) in x.iter().zip(y.iter()) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx) * (a - mx);
        syy += (b - my) * (b - my);
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return f64::NAN;
    }
    sxy / (sxx * syy).sqrt()
}

/// Least-squares slope of y on x
pub fn slope(x: &[f64], y: &[f64]) -> f64 {
    let mx = mean(x);
    let my = mean(y);
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (&a, &b) in x.iter().zip(y.iter()) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx) * (a - mx);
    }
    if sxx > 0.0 {
        sxy / sxx
    } else {
        0.0
    }
}

/// Clamp values into the [lower, upper] quantile range
pub fn winsorize(values: &[f64], lower_prob: f64, upper_prob: f64) -> Vec<f64> {
    let lo = quantile(values, lower_prob);
    let hi = quantile(values, upper_prob);
    if lo.is_nan() || hi.is_nan() {
        return values.to_vec();
    }
    values.iter().map(|&v| if v.is_nan() { v } else { v.clamp(lo, hi) }).collect()
}

/// Solve A x = b for symmetric positive (semi-)definite A via Cholesky.
/// `a` is row-major n x n.
pub fn solve_symmetric_system(a: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let l = cholesky(a, n);

    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * y[j];
        }
        y[i] = sum / l[i * n + i];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }
    x
}

/// Inverse of a symmetric positive definite matrix (row-major)
pub fn invert_symmetric_matrix(a: &[f64], n: usize) -> Vec<f64> {
    let mut inv = vec![0.0; n * n];
    let mut e = vec![0.0; n];
    for col in 0..n {
        e.iter_mut().for_each(|v| *v = 0.0);
        e[col] = 1.0;
        let x = solve_symmetric_system(a, &e, n);
        for row in 0..n {
            inv[row * n + col] = x[row];
        }
    }
    inv
}

/// log(det(A)) of a symmetric positive definite matrix via its Cholesky factor
pub fn log_det_symmetric(a: &[f64], n: usize) -> f64 {
    let l = cholesky(a, n);
    (0..n).map(|i| 2.0 * l[i * n + i].ln()).sum()
}

fn cholesky(a: &[f64], n: usize) -> Vec<f64> {
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                // near-singular pivots are floored so the solve stays finite
                if sum <= 0.0 {
                    sum = 1e-12;
                }
                l[i * n + j] = sum.sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }
    l
}

/// Weighted least squares: argmin sum_i w_i (y_i - x_i' beta)^2 with a tiny
/// ridge on the diagonal.
pub fn weighted_least_squares(x: &Array2<f64>, weights: &[f64], y: &[f64]) -> Vec<f64> {
    let (xtwx, xtwy) = weighted_normal_equations(x, weights, y);
    solve_symmetric_system(&xtwx, &xtwy, x.ncols())
}

/// Build X'WX (with ridge 1e-10) and X'Wy
pub fn weighted_normal_equations(x: &Array2<f64>, weights: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let p = x.ncols();
    let mut xtwx = vec![0.0; p * p];
    let mut xtwy = vec![0.0; p];
    for i in 0..x.nrows() {
        let w = weights[i];
        if w == 0.0 {
            continue;
        }
        for j in 0..p {
            let wxj = w * x[[i, j]];
            xtwy[j] += wxj * y[i];
            for k in 0..p {
                xtwx[j * p + k] += wxj * x[[i, k]];
            }
        }
    }
    for j in 0..p {
        xtwx[j * p + j] += 1e-10;
    }
    (xtwx, xtwy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_trigamma_known_values() {
        // psi'(1) = pi^2 / 6
        let expected = std::f64::consts::PI.powi(2) / 6.0;
        assert!((trigamma(1.0) - expected).abs() < 1e-10);
        // psi'(0.5) = pi^2 / 2
        let expected_half = std::f64::consts::PI.powi(2) / 2.0;
        assert!((trigamma(0.5) - expected_half).abs() < 1e-9);
    }

    #[test]
    fn test_tetragamma_known_value() {
        // psi''(1) = -2 * zeta(3)
        let expected = -2.0 * 1.202_056_903_159_594;
        assert!((tetragamma(1.0) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_trigamma_inverse_roundtrip() {
        for &y in &[0.3, 1.0, 2.5, 10.0, 200.0] {
            let x = trigamma(y);
            let back = trigamma_inverse(x);
            assert!((back - y).abs() / y < 1e-6, "y={} back={}", y, back);
        }
    }

    #[test]
    fn test_quantile_type7() {
        let v = vec![1.0, 2.0, 3.0, 4.0];
        assert!((quantile(&v, 0.5) - 2.5).abs() < 1e-12);
        assert_eq!(quantile(&v, 0.0), 1.0);
        assert_eq!(quantile(&v, 1.0), 4.0);
        assert!(quantile(&[], 0.5).is_nan());
    }

    #[test]
    fn test_correlation_and_slope() {
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let y = vec![2.0, 4.0, 6.0, 8.0];
        assert!((pearson_correlation(&x, &y) - 1.0).abs() < 1e-12);
        assert!((slope(&x, &y) - 2.0).abs() < 1e-12);
        assert!(pearson_correlation(&x, &[1.0; 4]).is_nan());
    }

    #[test]
    fn test_weighted_least_squares_line() {
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0]];
        let y = vec![1.0, 3.0, 5.0, 7.0];
        let beta = weighted_least_squares(&x, &[1.0; 4], &y);
        assert!((beta[0] - 1.0).abs() < 1e-6);
        assert!((beta[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_invert_symmetric() {
        let a = vec![4.0, 1.0, 1.0, 3.0];
        let inv = invert_symmetric_matrix(&a, 2);
        // A * A^-1 = I
        let i00 = a[0] * inv[0] + a[1] * inv[2];
        let i01 = a[0] * inv[1] + a[1] * inv[3];
        assert!((i00 - 1.0).abs() < 1e-10);
        assert!(i01.abs() < 1e-10);
        assert!((log_det_symmetric(&a, 2) - 11.0_f64.ln()).abs() < 1e-10);
    }
}
