//! Run summary written as `summary.json`

use serde::{Deserialize, Serialize};

use super::results::{Direction, ResultsSummary};
use crate::config::EnrichmentMethod;
use crate::enrichment::EnrichmentTable;

/// Outcome of one enrichment family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilySummary {
    pub universe: String,
    pub subset: Direction,
    pub alpha: f64,
    pub method: EnrichmentMethod,
    pub n_de: usize,
    pub sets_tested: usize,
    pub significant: usize,
}

impl From<&EnrichmentTable> for FamilySummary {
    fn from(table: &EnrichmentTable) -> Self {
        Self {
            universe: table.universe.clone(),
            subset: table.subset,
            alpha: table.alpha,
            method: table.method,
            n_de: table.n_de,
            sets_tested: table.rows.len(),
            significant: table.n_significant(),
        }
    }
}

/// Counts per pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub n_samples: usize,
    pub genes_input: usize,
    pub genes_retained: usize,
    /// Spline df per covariate used by CQN (0 = intercept only)
    pub cqn_spline_df: usize,
    pub common_dispersion: f64,
    /// Median prior df of the QL squeeze
    pub prior_df: f64,
    pub differential: ResultsSummary,
    pub enrichment: Vec<FamilySummary>,
}
