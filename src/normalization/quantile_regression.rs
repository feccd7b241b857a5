//! Linear quantile regression by iteratively reweighted least squares
//!
//! The check loss rho_tau(r) = |r| * (tau if r > 0 else 1 - tau) is
//! minimised by repeatedly solving a weighted least-squares problem with
//! weights rho_tau(r) / |r|, floored at `eps` to keep exact fits finite.

use ndarray::Array2;

use crate::stats::weighted_least_squares;

#[derive(Debug, Clone)]
pub struct QuantileRegressionParams {
    pub tau: f64,
    pub maxit: usize,
    /// Largest absolute coefficient change that counts as converged
    pub tol: f64,
    /// Residual floor in the weights
    pub eps: f64,
}

impl Default for QuantileRegressionParams {
    fn default() -> Self {
        Self {
            tau: 0.5,
            maxit: 200,
            tol: 1e-7,
            eps: 1e-6,
        }
    }
}

fn check_loss(r: f64, tau: f64) -> f64 {
    if r >= 0.0 {
        tau * r
    } else {
        (tau - 1.0) * r
    }
}

/// Coefficients of the `tau` quantile of `y` given the model matrix `x`
pub fn quantile_regression(x: &Array2<f64>, y: &[f64], params: &QuantileRegressionParams) -> Vec<f64> {
    let n = y.len();
    let p = x.ncols();
    let mut beta = weighted_least_squares(x, &vec![1.0; n], y);
    let mut weights = vec![1.0; n];

    for _iter in 0..params.maxit {
        for i in 0..n {
            let fitted: f64 = (0..p).map(|j| x[[i, j]] * beta[j]).sum();
            let r = y[i] - fitted;
            let side = if r >= 0.0 { params.tau } else { 1.0 - params.tau };
            weights[i] = side / r.abs().max(params.eps);
        }
        let next = weighted_least_squares(x, &weights, y);
        if next.iter().any(|b| !b.is_finite()) {
            break;
        }
        let change = next
            .iter()
            .zip(&beta)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        beta = next;
        if change < params.tol {
            break;
        }
    }
    beta
}

/// Total check loss of a fit, for diagnostics
pub fn quantile_loss(x: &Array2<f64>, y: &[f64], beta: &[f64], tau: f64) -> f64 {
    (0..y.len())
        .map(|i| {
            let fitted: f64 = (0..beta.len()).map(|j| x[[i, j]] * beta[j]).sum();
            check_loss(y[i] - fitted, tau)
        })
        .sum()
}
