//! Empirical Bayes moderation of quasi-likelihood dispersions
//!
//! The gene-wise variances s2 (on d residual df) are modelled as scaled F
//! with prior scale s0^2 and prior df d0. The prior scale may follow an
//! abundance trend. Posterior variances are
//! (d0 * s0^2 + d * s2) / (d0 + d).

use statrs::function::gamma::digamma;

use crate::spline::NaturalSpline;
use crate::stats::{mean, quantile, trigamma, trigamma_inverse, weighted_least_squares, winsorize};
use crate::testing::upper_tail_f;

/// Prior df used when an infinite prior has to be mixed with an outlier
const MAX_MIXED_PRIOR_DF: f64 = 1e4;

/// Tail proportions clipped when moments are computed robustly
const WINSOR_TAIL: (f64, f64) = (0.05, 0.1);

/// Fitted scaled F distribution
#[derive(Debug, Clone)]
pub struct FDistFit {
    /// Prior scale s0^2 for every gene
    pub scale: Vec<f64>,
    /// Prior degrees of freedom d0 (may be infinite)
    pub df2: f64,
}

/// Result of squeezing the gene-wise variances
#[derive(Debug, Clone)]
pub struct SqueezedVariances {
    pub var_post: Vec<f64>,
    pub var_prior: Vec<f64>,
    /// Per-gene prior df; differs between genes only in robust mode
    pub df_prior: Vec<f64>,
}

fn spline_df(n_ok: usize, covariate: &[f64]) -> usize {
    let mut unique: Vec<f64> = covariate.to_vec();
    unique.sort_by(|a, b| a.total_cmp(b));
    unique.dedup();
    let df = 1 + usize::from(n_ok >= 3) + usize::from(n_ok >= 6) + usize::from(n_ok >= 30);
    df.min(unique.len())
}

/// Moment estimation of a scaled F distribution for `var` on `df` degrees of
/// freedom, optionally with a natural-spline trend in `covariate`.
///
/// Non-finite variances are ignored; tiny variances are raised to
/// 1e-5 times the median.
pub fn fit_f_dist(var: &[f64], df: f64, covariate: Option<&[f64]>, robust: bool) -> FDistFit {
    let n = var.len();
    let ok: Vec<usize> = (0..n).filter(|&i| var[i].is_finite() && var[i] >= 0.0).collect();
    let n_ok = ok.len();

    if n_ok == 0 || !(df > 0.0) {
        return FDistFit {
            scale: vec![f64::NAN; n],
            df2: f64::NAN,
        };
    }
    if n_ok == 1 {
        return FDistFit {
            scale: vec![var[ok[0]]; n],
            df2: 0.0,
        };
    }

    let mut m = quantile(&ok.iter().map(|&i| var[i]).collect::<Vec<_>>(), 0.5);
    if m <= 0.0 {
        log::warn!("More than half of the residual variances are exactly zero");
        m = 1.0;
    }
    let floor = 1e-5 * m;

    let half = df / 2.0;
    let e: Vec<f64> = ok
        .iter()
        .map(|&i| var[i].max(floor).ln() - digamma(half) + half.ln())
        .collect();

    // location for every gene, and residuals on the fitted genes
    let (emean_all, n_params) = match covariate {
        Some(cov) if spline_df(n_ok, &ok.iter().map(|&i| cov[i]).collect::<Vec<_>>()) >= 2 => {
            let cov_ok: Vec<f64> = ok.iter().map(|&i| cov[i]).collect();
            let spline = NaturalSpline::with_df(&cov_ok, spline_df(n_ok, &cov_ok));
            let x = spline.design(&cov_ok, true);
            let beta = weighted_least_squares(&x, &vec![1.0; n_ok], &e);
            let all = spline.design(cov, true);
            let fitted: Vec<f64> = (0..n)
                .map(|i| (0..beta.len()).map(|j| all[[i, j]] * beta[j]).sum())
                .collect();
            (fitted, beta.len())
        }
        _ => (vec![mean(&e); n], 1),
    };

    let mut resid: Vec<f64> = ok.iter().zip(&e).map(|(&i, &ei)| ei - emean_all[i]).collect();
    let mut shift = 0.0;
    if robust && n_ok > 2 {
        resid = winsorize(&resid, WINSOR_TAIL.0, 1.0 - WINSOR_TAIL.1);
        shift = mean(&resid);
        resid.iter_mut().for_each(|r| *r -= shift);
    }

    let dof = n_ok.saturating_sub(n_params).max(1) as f64;
    let evar = resid.iter().map(|r| r * r).sum::<f64>() / dof - trigamma(half);

    let (df2, log_scale_adj) = if evar > 0.0 {
        let df2 = 2.0 * trigamma_inverse(evar);
        (df2, digamma(df2 / 2.0) - (df2 / 2.0).ln())
    } else {
        (f64::INFINITY, 0.0)
    };

    let scale = emean_all
        .iter()
        .map(|&em| (em + shift + log_scale_adj).exp())
        .collect();

    FDistFit { scale, df2 }
}

/// Squeeze gene-wise variances towards the (trended) prior.
///
/// With `robust`, each gene's prior df is scaled by the probability that it
/// is not an outlier: the upper F tail of s2 / s0^2 relative to the
/// empirical tail proportion of its rank, capped at 1.
pub fn squeeze_var(var: &[f64], df: f64, covariate: Option<&[f64]>, robust: bool) -> SqueezedVariances {
    let fit = fit_f_dist(var, df, covariate, robust);
    let n = var.len();

    let df_prior: Vec<f64> = if robust && fit.df2 > 0.0 {
        let f_stat: Vec<f64> = var
            .iter()
            .zip(&fit.scale)
            .map(|(&v, &s)| if v.is_finite() { v / s } else { f64::NAN })
            .collect();
        let ranks = average_ranks(&f_stat);
        let n_ok = f_stat.iter().filter(|v| v.is_finite()).count() as f64;
        f_stat
            .iter()
            .zip(&ranks)
            .map(|(&f, &r)| {
                if !f.is_finite() {
                    return fit.df2;
                }
                let tail = upper_tail_f(f, df, fit.df2);
                let empirical = (n_ok - r + 0.5) / n_ok;
                let not_outlier = (tail / empirical).min(1.0);
                if not_outlier >= 1.0 {
                    fit.df2
                } else if fit.df2.is_infinite() {
                    not_outlier * MAX_MIXED_PRIOR_DF
                } else {
                    not_outlier * fit.df2
                }
            })
            .collect()
    } else {
        vec![fit.df2; n]
    };

    let var_post = (0..n)
        .map(|i| posterior_variance(var[i], df, fit.scale[i], df_prior[i]))
        .collect();

    let n_outliers = df_prior.iter().filter(|&&d| d < fit.df2).count();
    log::debug!(
        "Variance prior: df {:.2}, {} genes with reduced prior df",
        fit.df2,
        n_outliers
    );

    SqueezedVariances {
        var_post,
        var_prior: fit.scale,
        df_prior,
    }
}

fn posterior_variance(s2: f64, df: f64, s0: f64, d0: f64) -> f64 {
    if !s2.is_finite() {
        return f64::NAN;
    }
    if d0.is_infinite() {
        return s0;
    }
    if d0 <= 0.0 || !s0.is_finite() {
        return s2;
    }
    (d0 * s0 + df * s2) / (d0 + df)
}

/// Ranks 1..n among the finite values, ties averaged; NaN elsewhere
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut idx: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_finite()).collect();
    idx.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![f64::NAN; values.len()];
    let mut start = 0;
    while start < idx.len() {
        let mut end = start;
        while end + 1 < idx.len() && values[idx[end + 1]] == values[idx[start]] {
            end += 1;
        }
        let r = (start + end) as f64 / 2.0 + 1.0;
        for &i in &idx[start..=end] {
            ranks[i] = r;
        }
        start = end + 1;
    }
    ranks
}
