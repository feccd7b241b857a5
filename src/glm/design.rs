//! Paired design matrix: one baseline column per replicate plus a
//! treatment-effect column

use ndarray::Array2;

use crate::data::Sample;
use crate::error::{DgeError, Result};

/// Design of a paired two-level experiment
#[derive(Debug, Clone)]
pub struct PairedDesign {
    /// Samples x coefficients model matrix (no intercept)
    matrix: Array2<f64>,
    /// Names of the coefficients, `replicate<id>` then `treatment<level>`
    coef_names: Vec<String>,
    /// Replicate identifiers in first-seen order
    replicates: Vec<String>,
    /// Baseline treatment level
    reference_level: String,
    /// Level whose effect is estimated
    treated_level: String,
}

impl PairedDesign {
    /// Build and validate the design from resolved samples.
    ///
    /// Requires exactly two treatment levels and, for every replicate,
    /// exactly one sample at each level.
    pub fn from_samples(samples: &[Sample], reference_level: Option<&str>) -> Result<Self> {
        let mut levels: Vec<String> = samples.iter().map(|s| s.treatment.clone()).collect();
        levels.sort();
        levels.dedup();

        if levels.len() != 2 {
            return Err(DgeError::InvalidDesign {
                reason: format!(
                    "treatment must have exactly two levels, found {:?}",
                    levels
                ),
            });
        }

        let reference = match reference_level {
            Some(r) => {
                if !levels.iter().any(|l| l == r) {
                    return Err(DgeError::InvalidDesign {
                        reason: format!(
                            "reference level '{}' is not one of the treatment levels {:?}",
                            r, levels
                        ),
                    });
                }
                r.to_string()
            }
            None => levels[0].clone(),
        };
        let treated = levels
            .iter()
            .find(|l| **l != reference)
            .cloned()
            .unwrap_or_default();

        let mut replicates: Vec<String> = Vec::new();
        for s in samples {
            if !replicates.contains(&s.replicate) {
                replicates.push(s.replicate.clone());
            }
        }

        for rep in &replicates {
            for level in [&reference, &treated] {
                let n = samples
                    .iter()
                    .filter(|s| &s.replicate == rep && &s.treatment == level)
                    .count();
                if n != 1 {
                    return Err(DgeError::InvalidDesign {
                        reason: format!(
                            "replicate '{}' has {} samples at treatment level '{}', expected exactly 1",
                            rep, n, level
                        ),
                    });
                }
            }
        }

        let n_coefs = replicates.len() + 1;
        let mut matrix = Array2::zeros((samples.len(), n_coefs));
        for (i, s) in samples.iter().enumerate() {
            let rep_idx = replicates
                .iter()
                .position(|r| r == &s.replicate)
                .unwrap_or_default();
            matrix[[i, rep_idx]] = 1.0;
            if s.treatment == treated {
                matrix[[i, n_coefs - 1]] = 1.0;
            }
        }

        let mut coef_names: Vec<String> = replicates.iter().map(|r| format!("replicate{}", r)).collect();
        coef_names.push(format!("treatment{}", treated));

        check_full_rank(&matrix)?;

        if samples.len() <= n_coefs {
            return Err(DgeError::InvalidDesign {
                reason: format!(
                    "{} samples leave no residual degrees of freedom for {} coefficients",
                    samples.len(),
                    n_coefs
                ),
            });
        }

        log::debug!(
            "Paired design: {} replicates, treatment '{}' vs reference '{}'",
            replicates.len(),
            treated,
            reference
        );

        Ok(Self {
            matrix,
            coef_names,
            replicates,
            reference_level: reference,
            treated_level: treated,
        })
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn coef_names(&self) -> &[String] {
        &self.coef_names
    }

    pub fn n_coefs(&self) -> usize {
        self.matrix.ncols()
    }

    /// Column index of the treatment effect
    pub fn treatment_coef(&self) -> usize {
        self.matrix.ncols() - 1
    }

    /// Residual degrees of freedom
    pub fn residual_df(&self) -> usize {
        self.matrix.nrows() - self.matrix.ncols()
    }

    pub fn replicates(&self) -> &[String] {
        &self.replicates
    }

    pub fn reference_level(&self) -> &str {
        &self.reference_level
    }

    pub fn treated_level(&self) -> &str {
        &self.treated_level
    }
}

/// Check that the model matrix has full column rank.
///
/// Rank is taken from a Householder QR with column pivoting; a diagonal
/// entry of R counts when it exceeds `max(nrow, ncol) * eps * max|diag(R)|`.
pub fn check_full_rank(matrix: &Array2<f64>) -> Result<()> {
    let nrow = matrix.nrows();
    let ncol = matrix.ncols();

    if nrow == 0 || ncol == 0 {
        return Err(DgeError::InvalidDesign {
            reason: "design matrix has zero rows or columns".to_string(),
        });
    }

    if qr_rank(matrix) < ncol {
        let has_zero_column = (0..ncol).any(|j| matrix.column(j).iter().all(|&v| v == 0.0));
        let reason = if has_zero_column {
            "the model matrix is not full rank: a level without samples produced a column of zeros"
        } else {
            "the model matrix is not full rank: some columns are linear combinations of others"
        };
        return Err(DgeError::InvalidDesign {
            reason: reason.to_string(),
        });
    }

    Ok(())
}

fn qr_rank(matrix: &Array2<f64>) -> usize {
    let nrow = matrix.nrows();
    let ncol = matrix.ncols();
    let k = nrow.min(ncol);

    let mut r = matrix.to_owned();
    let mut col_norms_sq: Vec<f64> = (0..ncol)
        .map(|j| r.column(j).iter().map(|&v| v * v).sum())
        .collect();

    for step in 0..k {
        // pivot the largest remaining column into place
        let best_col = (step..ncol)
            .max_by(|&a, &b| col_norms_sq[a].total_cmp(&col_norms_sq[b]))
            .unwrap_or(step);
        if best_col != step {
            for i in 0..nrow {
                r.swap([i, step], [i, best_col]);
            }
            col_norms_sq.swap(step, best_col);
        }

        let mut alpha = (step..nrow).map(|i| r[[i, step]].powi(2)).sum::<f64>().sqrt();
        if alpha < f64::EPSILON * 1e3 {
            break;
        }
        if r[[step, step]] > 0.0 {
            alpha = -alpha;
        }

        let v0 = r[[step, step]] - alpha;
        r[[step, step]] = alpha;

        let v_norm_sq = v0 * v0 + ((step + 1)..nrow).map(|i| r[[i, step]].powi(2)).sum::<f64>();
        if v_norm_sq < f64::MIN_POSITIVE {
            continue;
        }
        let tau = 2.0 / v_norm_sq;

        for j in (step + 1)..ncol {
            let mut dot = v0 * r[[step, j]];
            for i in (step + 1)..nrow {
                dot += r[[i, step]] * r[[i, j]];
            }
            let scale = tau * dot;
            r[[step, j]] -= scale * v0;
            for i in (step + 1)..nrow {
                r[[i, j]] -= scale * r[[i, step]];
            }
        }

        for j in (step + 1)..ncol {
            col_norms_sq[j] = (col_norms_sq[j] - r[[step, j]].powi(2)).max(0.0);
        }
    }

    let tol = nrow.max(ncol) as f64 * f64::EPSILON * (0..k).map(|i| r[[i, i]].abs()).fold(0.0, f64::max);
    (0..k).filter(|&i| r[[i, i]].abs() > tol).count()
}
