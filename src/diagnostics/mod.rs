//! Bias diagnostics
//!
//! Checks whether GC content or transcript length drives the major
//! components of sample variation. Each sample gets a GC slope and a
//! log-length slope (least-squares slope of its log expression on the
//! covariate); the slopes are correlated with the principal component
//! scores. Run on raw log CPM and on CQN-normalized values to see whether
//! the normalization removed the technical signal.

mod pca;

pub use pca::{pca, Pca};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{DgeError, Result};
use crate::stats::{pearson_correlation, slope};

/// Components reported by default
pub const DEFAULT_COMPONENTS: usize = 5;

/// One principal component of one expression stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasDiagnostic {
    /// Expression the PCA ran on, e.g. `raw` or `cqn`
    pub stage: String,
    /// 1-based component index
    pub component: usize,
    pub variance_explained: f64,
    /// Correlation of the scores with the per-sample GC slopes
    pub cor_gc: f64,
    /// Correlation of the scores with the per-sample log-length slopes
    pub cor_length: f64,
}

/// Per-sample slopes of expression on a covariate.
/// Genes with a non-finite covariate or value are skipped.
pub fn sample_slopes(values: &Array2<f64>, covariate: &[f64]) -> Vec<f64> {
    values
        .columns()
        .into_iter()
        .map(|col| {
            let (x, y): (Vec<f64>, Vec<f64>) = covariate
                .iter()
                .zip(col.iter())
                .filter(|(c, v)| c.is_finite() && v.is_finite())
                .map(|(&c, &v)| (c, v))
                .unzip();
            slope(&x, &y)
        })
        .collect()
}

/// PCA of `values` (log2 expression, genes x samples) with covariate
/// correlations for the leading components
pub fn bias_diagnostics(
    stage: &str,
    values: &Array2<f64>,
    gc: &[f64],
    length: &[f64],
    n_components: usize,
) -> Result<Vec<BiasDiagnostic>> {
    if gc.len() != values.nrows() || length.len() != values.nrows() {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} covariate values", values.nrows()),
            got: format!("{} GC and {} length values", gc.len(), length.len()),
        });
    }
    let log_length: Vec<f64> = length.iter().map(|&l| if l > 0.0 { l.log2() } else { f64::NAN }).collect();
    let gc_slopes = sample_slopes(values, gc);
    let length_slopes = sample_slopes(values, &log_length);

    let fit = pca(values, n_components)?;
    let rows: Vec<BiasDiagnostic> = (0..fit.n_components())
        .map(|c| {
            let scores = fit.scores.column(c).to_vec();
            BiasDiagnostic {
                stage: stage.to_string(),
                component: c + 1,
                variance_explained: fit.variance_explained(c),
                cor_gc: pearson_correlation(&scores, &gc_slopes),
                cor_length: pearson_correlation(&scores, &length_slopes),
            }
        })
        .collect();

    if let Some(first) = rows.first() {
        log::info!(
            "Bias diagnostics ({}): PC1 explains {:.1}% of variance, cor(GC) = {:.3}, cor(length) = {:.3}",
            stage,
            100.0 * first.variance_explained,
            first.cor_gc,
            first.cor_length
        );
    }
    Ok(rows)
}
