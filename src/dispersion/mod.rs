//! Dispersion estimation for negative binomial models
//!
//! Two layers: NB dispersions from adjusted profile likelihoods (common,
//! trended, tagwise), then quasi-likelihood dispersions from the fit at the
//! trended NB dispersion, moderated by empirical Bayes.

mod profile;
mod quasi;
mod squeeze;

pub use profile::{
    dispersion_grid, estimate_dispersions, maximize_interpolant, moving_average_by_rows, profile_likelihoods,
    DispersionEstimates,
};
pub use quasi::{fit_ql, QlFit};
pub use squeeze::{fit_f_dist, squeeze_var, FDistFit, SqueezedVariances};

use crate::config::PipelineConfig;
use crate::glm::GlmFitParams;

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone)]
pub struct DispersionParams {
    /// Prior df for the tagwise profile, divided by the residual df
    pub prior_df: f64,
    /// Number of dispersion grid points
    pub grid_points: usize,
    /// Grid range on the log2 scale around 0.1
    pub grid_range: (f64, f64),
    /// Fraction of genes in each moving-average window of the trend
    pub trend_span: f64,
    /// Robust empirical Bayes for the QL dispersions
    pub robust: bool,
    pub glm: GlmFitParams,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            prior_df: 10.0,
            grid_points: 11,
            grid_range: (-10.0, 10.0),
            trend_span: 0.3,
            robust: true,
            glm: GlmFitParams::default(),
        }
    }
}

impl From<&PipelineConfig> for DispersionParams {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            prior_df: config.prior_df,
            grid_points: config.grid_points,
            grid_range: config.grid_range,
            trend_span: config.trend_span,
            robust: config.robust,
            glm: GlmFitParams::default(),
        }
    }
}
