//! Conditional quantile normalization
//!
//! Removes smooth GC-content and length effects from log2 CPM, sample by
//! sample, then quantile normalizes the residuals. The result is expressed
//! as an additive log2 offset on top of `log2(count + 1) - log2(lib / 1e6)`
//! and as a natural-log offset ready for the GLM.

use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;

use super::quantile_regression::{quantile_regression, QuantileRegressionParams};
use crate::config::PipelineConfig;
use crate::error::{DgeError, Result};
use crate::spline::NaturalSpline;
use crate::stats::{mean, quantile};

/// Fit genes needed per model parameter before the spline df is reduced
const GENES_PER_PARAMETER: usize = 10;

/// Below this many genes the residuals are not quantile normalized
const MIN_GENES_FOR_QN: usize = 100;

/// Configurable parameters for CQN
#[derive(Debug, Clone)]
pub struct CqnParams {
    /// Natural spline df for each covariate
    pub spline_df: usize,
    /// Quantile fitted by the regression
    pub tau: f64,
    /// Genes with mean log expression at or below this quantile are not used for fitting
    pub min_quantile: f64,
    pub quantile_normalize: bool,
}

impl Default for CqnParams {
    fn default() -> Self {
        Self {
            spline_df: 4,
            tau: 0.5,
            min_quantile: 0.05,
            quantile_normalize: true,
        }
    }
}

impl From<&PipelineConfig> for CqnParams {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            spline_df: config.cqn_spline_df,
            tau: config.cqn_tau,
            min_quantile: config.cqn_min_quantile,
            quantile_normalize: config.cqn_quantile_normalize,
        }
    }
}

/// CQN output; all matrices are genes x samples
#[derive(Debug, Clone)]
pub struct CqnResult {
    /// log2(count + 1) - log2(lib / 1e6)
    pub y: Array2<f64>,
    /// Additive log2 offset: `y + offset` is the normalized expression
    pub offset: Array2<f64>,
    /// Natural-log GLM offset: ln(lib / 1e6) - ln(2) * offset
    pub glm_offset: Array2<f64>,
    pub lib_sizes: Vec<f64>,
    /// Spline df actually used per covariate (0 = intercept only)
    pub spline_df: usize,
    /// Number of genes the regressions were fitted on
    pub n_fit_genes: usize,
}

impl CqnResult {
    /// Normalized log2 expression
    pub fn normalized(&self) -> Array2<f64> {
        &self.y + &self.offset
    }

    /// Effective library size of each entry, `exp(glm_offset) * 1e6`
    pub fn effective_libraries(&self) -> Array2<f64> {
        self.glm_offset.mapv(|o| o.exp() * 1e6)
    }
}

/// Largest spline df (at most `requested`) that leaves enough fit genes
/// per parameter; 0 means only an intercept can be fitted
fn usable_spline_df(requested: usize, n_fit: usize) -> usize {
    let mut df = requested;
    while df > 0 && n_fit < GENES_PER_PARAMETER * (1 + 2 * df) {
        df -= 1;
    }
    df
}

fn covariate_design(gc: &NaturalSpline, len: &NaturalSpline, gc_values: &[f64], len_values: &[f64]) -> Array2<f64> {
    let n = gc_values.len();
    let mut x = Array2::zeros((n, 1 + gc.df() + len.df()));
    for i in 0..n {
        x[[i, 0]] = 1.0;
        for (j, v) in gc.basis(gc_values[i]).into_iter().enumerate() {
            x[[i, 1 + j]] = v;
        }
        for (j, v) in len.basis(len_values[i]).into_iter().enumerate() {
            x[[i, 1 + gc.df() + j]] = v;
        }
    }
    x
}

fn clamp_to_range(values: &[f64], reference: &[f64]) -> Vec<f64> {
    let lo = reference.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = reference.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    values.iter().map(|v| v.clamp(lo, hi)).collect()
}

/// Quantile normalize the columns of `m`: every column gets the same
/// distribution, the mean of the sorted columns
pub fn quantile_normalize(m: &Array2<f64>) -> Array2<f64> {
    let (n, k) = m.dim();
    let orders: Vec<Vec<usize>> = m
        .axis_iter(Axis(1))
        .map(|col| {
            let mut idx: Vec<usize> = (0..n).collect();
            idx.sort_by(|&a, &b| col[a].total_cmp(&col[b]));
            idx
        })
        .collect();

    let target: Vec<f64> = (0..n)
        .map(|rank| orders.iter().enumerate().map(|(j, o)| m[[o[rank], j]]).sum::<f64>() / k as f64)
        .collect();

    let mut out = Array2::zeros((n, k));
    for (j, order) in orders.iter().enumerate() {
        for (rank, &i) in order.iter().enumerate() {
            out[[i, j]] = target[rank];
        }
    }
    out
}

/// Run CQN on a filtered count matrix.
///
/// `gc` is the GC fraction and `length` the transcript length (bp) of each
/// row. Library sizes default to the column sums.
pub fn cqn(
    counts: ArrayView2<f64>,
    gc: &[f64],
    length: &[f64],
    lib_sizes: Option<&[f64]>,
    params: &CqnParams,
) -> Result<CqnResult> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(DgeError::EmptyData {
            reason: "CQN needs at least one gene and one sample".to_string(),
        });
    }
    if gc.len() != n_genes || length.len() != n_genes {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} GC and length values", n_genes),
            got: format!("{} GC and {} length values", gc.len(), length.len()),
        });
    }
    if let Some(i) = (0..n_genes).find(|&i| !gc[i].is_finite() || !(length[i] > 0.0)) {
        return Err(DgeError::InvalidInput {
            reason: format!("gene {} has GC {} and length {}", i + 1, gc[i], length[i]),
        });
    }

    let lib_sizes: Vec<f64> = match lib_sizes {
        Some(l) => l.to_vec(),
        None => counts.sum_axis(Axis(0)).to_vec(),
    };
    if lib_sizes.len() != n_samples {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} library sizes", n_samples),
            got: format!("{} library sizes", lib_sizes.len()),
        });
    }
    if let Some(j) = lib_sizes.iter().position(|&l| !(l > 0.0)) {
        return Err(DgeError::EmptyData {
            reason: format!("sample {} has no reads", j + 1),
        });
    }

    let y = Array2::from_shape_fn((n_genes, n_samples), |(i, j)| {
        (counts[[i, j]] + 1.0).log2() - (lib_sizes[j] / 1e6).log2()
    });

    let row_means: Vec<f64> = y.outer_iter().map(|r| r.mean().unwrap_or(f64::NAN)).collect();
    let cutoff = quantile(&row_means, params.min_quantile);
    let mut fit_genes: Vec<usize> = (0..n_genes).filter(|&i| row_means[i] > cutoff).collect();
    if fit_genes.is_empty() {
        fit_genes = (0..n_genes).collect();
    }
    let n_fit = fit_genes.len();

    let log_length: Vec<f64> = length.iter().map(|l| l.log2()).collect();
    let gc_fit: Vec<f64> = fit_genes.iter().map(|&i| gc[i]).collect();
    let len_fit: Vec<f64> = fit_genes.iter().map(|&i| log_length[i]).collect();

    let spline_df = usable_spline_df(params.spline_df, n_fit);
    if spline_df < params.spline_df {
        log::warn!(
            "Only {} genes available for CQN fitting; spline df reduced from {} to {}",
            n_fit,
            params.spline_df,
            spline_df
        );
    }

    let qr_params = QuantileRegressionParams {
        tau: params.tau,
        ..Default::default()
    };

    // per-sample systematic effect, genes x samples
    let fitted_columns: Vec<Vec<f64>> = if spline_df == 0 {
        log::warn!("Too few genes for covariate splines; CQN falls back to a per-sample quantile");
        (0..n_samples)
            .into_par_iter()
            .map(|j| {
                let col: Vec<f64> = fit_genes.iter().map(|&i| y[[i, j]]).collect();
                vec![quantile(&col, params.tau); n_genes]
            })
            .collect()
    } else {
        let gc_spline = NaturalSpline::with_df(&gc_fit, spline_df);
        let len_spline = NaturalSpline::with_df(&len_fit, spline_df);
        let x_fit = covariate_design(&gc_spline, &len_spline, &gc_fit, &len_fit);
        let x_all = covariate_design(
            &gc_spline,
            &len_spline,
            &clamp_to_range(gc, &gc_fit),
            &clamp_to_range(&log_length, &len_fit),
        );
        (0..n_samples)
            .into_par_iter()
            .map(|j| {
                let col: Vec<f64> = fit_genes.iter().map(|&i| y[[i, j]]).collect();
                let beta = quantile_regression(&x_fit, &col, &qr_params);
                (0..n_genes)
                    .map(|i| (0..beta.len()).map(|k| x_all[[i, k]] * beta[k]).sum())
                    .collect()
            })
            .collect()
    };

    let fitted = Array2::from_shape_fn((n_genes, n_samples), |(i, j)| fitted_columns[j][i]);
    let residuals = &y - &fitted;

    let residuals = if params.quantile_normalize && n_genes >= MIN_GENES_FOR_QN {
        quantile_normalize(&residuals)
    } else {
        if params.quantile_normalize {
            log::warn!(
                "Skipping residual quantile normalization: {} genes is fewer than {}",
                n_genes,
                MIN_GENES_FOR_QN
            );
        }
        residuals
    };

    let fitted_means: Vec<f64> = fitted.outer_iter().map(|r| mean(&r.to_vec())).collect();
    let offset = Array2::from_shape_fn((n_genes, n_samples), |(i, j)| {
        residuals[[i, j]] + fitted_means[i] - y[[i, j]]
    });
    let ln2 = std::f64::consts::LN_2;
    let glm_offset = Array2::from_shape_fn((n_genes, n_samples), |(i, j)| {
        (lib_sizes[j] / 1e6).ln() - ln2 * offset[[i, j]]
    });

    log::info!(
        "CQN: {} genes x {} samples, {} fit genes, spline df {}",
        n_genes,
        n_samples,
        n_fit,
        spline_df
    );

    Ok(CqnResult {
        y,
        offset,
        glm_offset,
        lib_sizes,
        spline_df,
        n_fit_genes: n_fit,
    })
}
