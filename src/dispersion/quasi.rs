//! Quasi-likelihood GLM fit with moderated QL dispersions

use ndarray::{Array2, ArrayView2};

use super::squeeze::{squeeze_var, SqueezedVariances};
use super::DispersionParams;
use crate::error::{DgeError, Result};
use crate::glm::{fit_glm, GlmFit};

/// NB fit at the trended dispersion plus squeezed QL dispersions
#[derive(Debug, Clone)]
pub struct QlFit {
    pub glm: GlmFit,
    /// Raw QL dispersions: deviance / residual df
    pub s2: Vec<f64>,
    pub squeezed: SqueezedVariances,
    /// Abundance covariate used for the prior trend
    pub ave_log_cpm: Vec<f64>,
}

impl QlFit {
    pub fn df_residual(&self) -> f64 {
        self.glm.df_residual as f64
    }

    /// Prior plus residual df, capped at the pooled residual df
    pub fn df_total(&self, gene: usize) -> f64 {
        let pooled = self.df_residual() * self.glm.n_genes() as f64;
        (self.squeezed.df_prior[gene] + self.df_residual()).min(pooled)
    }

    pub fn s2_post(&self, gene: usize) -> f64 {
        self.squeezed.var_post[gene]
    }
}

/// Refit every gene at its trended NB dispersion and squeeze the resulting
/// QL dispersions towards an abundance-dependent prior.
pub fn fit_ql(
    counts: ArrayView2<f64>,
    design: &Array2<f64>,
    offsets: ArrayView2<f64>,
    ave_log_cpm: &[f64],
    trended_dispersions: &[f64],
    params: &DispersionParams,
) -> Result<QlFit> {
    let glm = fit_glm(counts, design, offsets, trended_dispersions, &params.glm)?;
    if glm.df_residual == 0 {
        return Err(DgeError::InvalidDesign {
            reason: "quasi-likelihood fit needs residual degrees of freedom".to_string(),
        });
    }
    if ave_log_cpm.len() != glm.n_genes() {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} abundance values", glm.n_genes()),
            got: format!("{} abundance values", ave_log_cpm.len()),
        });
    }

    let df = glm.df_residual as f64;
    let s2: Vec<f64> = glm
        .deviance
        .iter()
        .zip(&glm.converged)
        .map(|(&dev, &ok)| if ok { dev / df } else { f64::NAN })
        .collect();

    let squeezed = squeeze_var(&s2, df, Some(ave_log_cpm), params.robust);

    log::info!(
        "Quasi-likelihood fit: {} of {} genes converged, residual df {}",
        glm.n_converged(),
        glm.n_genes(),
        glm.df_residual
    );

    Ok(QlFit {
        glm,
        s2,
        squeezed,
        ave_log_cpm: ave_log_cpm.to_vec(),
    })
}
