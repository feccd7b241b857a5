//! Gene-set over-representation analysis with detection-bias correction
//!
//! For every configured universe and every DE subset (all, up, down) the
//! engine fits a probability weighting function on the subset's DE
//! indicator, tests each gene set for over-representation and applies
//! Benjamini-Hochberg within that universe x subset family.

mod hypergeometric;
mod pwf;
mod sampling;

pub use hypergeometric::{hypergeometric_upper_tail, wallenius_upper_tail};
pub use pwf::{isotonic_regression, probability_weighting, PWF_EPS};
pub use sampling::sampling_pvalues;

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{BiasCovariate, EnrichmentMethod, PipelineConfig, UniverseConfig};
use crate::data::{GeneSet, GeneSetCollection};
use crate::error::{DgeError, Result};
use crate::io::{DgeResults, Direction};
use crate::testing::benjamini_hochberg;

/// Settings of the set test
#[derive(Debug, Clone)]
pub struct EnrichmentParams {
    pub method: EnrichmentMethod,
    pub bias_covariate: BiasCovariate,
    pub sampling_reps: usize,
    pub seed: u32,
    pub pwf_bin_size: usize,
    pub min_set_size: usize,
}

impl Default for EnrichmentParams {
    fn default() -> Self {
        Self {
            method: EnrichmentMethod::Wallenius,
            bias_covariate: BiasCovariate::Length,
            sampling_reps: 2000,
            seed: 1,
            pwf_bin_size: 200,
            min_set_size: 1,
        }
    }
}

impl From<&PipelineConfig> for EnrichmentParams {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            method: config.enrichment_method,
            bias_covariate: config.bias_covariate,
            sampling_reps: config.sampling_reps,
            seed: config.seed,
            pwf_bin_size: config.pwf_bin_size,
            min_set_size: config.min_set_size,
        }
    }
}

/// Test result for one gene set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub category: String,
    /// DE genes inside the set
    pub num_de: usize,
    /// PWF-weighted expectation of `num_de`
    pub expected: f64,
    /// Set members among the analyzed genes
    pub set_size: usize,
    pub pvalue: f64,
    pub fdr: f64,
    pub significant: bool,
}

/// One correction family: a universe tested against one DE subset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentTable {
    pub universe: String,
    pub subset: Direction,
    pub alpha: f64,
    pub method: EnrichmentMethod,
    /// DE genes in the subset
    pub n_de: usize,
    /// Sorted by p-value
    pub rows: Vec<EnrichmentResult>,
}

impl EnrichmentTable {
    pub fn n_significant(&self) -> usize {
        self.rows.iter().filter(|r| r.significant).count()
    }

    /// File stem of the table, e.g. `enrichment_pathway_up`
    pub fn file_stem(&self) -> String {
        format!("enrichment_{}_{}", self.universe, self.subset)
    }
}

/// Test gene sets for over-representation of the flagged genes.
///
/// `gene_ids`, `de` and `pwf` run over the analyzed genes. Set members
/// outside `gene_ids` are ignored; sets left with fewer than
/// `params.min_set_size` members (and always those with none) are not
/// tested and do not appear in the output. FDR is not filled in.
pub fn test_gene_sets(
    gene_ids: &[String],
    de: &[bool],
    pwf: &[f64],
    sets: &[&GeneSet],
    params: &EnrichmentParams,
) -> Result<Vec<EnrichmentResult>> {
    if de.len() != gene_ids.len() || pwf.len() != gene_ids.len() {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} genes", gene_ids.len()),
            got: format!("{} DE flags and {} weights", de.len(), pwf.len()),
        });
    }
    let index: HashMap<&str, usize> = gene_ids.iter().enumerate().map(|(i, g)| (g.as_str(), i)).collect();
    let min_size = params.min_set_size.max(1);

    let mut tested: Vec<(&GeneSet, Vec<usize>)> = Vec::new();
    for set in sets {
        let members: Vec<usize> = set.members.iter().filter_map(|m| index.get(m.as_str()).copied()).collect();
        if members.len() >= min_size {
            tested.push((set, members));
        }
    }
    let skipped = sets.len() - tested.len();
    if skipped > 0 {
        log::debug!("{} gene sets have fewer than {} analyzed members", skipped, min_size);
    }

    let n_genes = gene_ids.len();
    let n_de = de.iter().filter(|&&d| d).count();
    let total_weight: f64 = pwf.iter().sum();

    let observed: Vec<usize> = tested
        .iter()
        .map(|(_, members)| members.iter().filter(|&&g| de[g]).count())
        .collect();

    let pvalues: Vec<f64> = match params.method {
        EnrichmentMethod::Sampling => {
            let mut gene_sets: Vec<Vec<usize>> = vec![Vec::new(); n_genes];
            for (s, (_, members)) in tested.iter().enumerate() {
                for &g in members {
                    gene_sets[g].push(s);
                }
            }
            sampling_pvalues(pwf, &gene_sets, &observed, n_de, params.sampling_reps, params.seed)
        }
        EnrichmentMethod::Wallenius => tested
            .par_iter()
            .zip(observed.par_iter())
            .map(|((_, members), &obs)| {
                let m1 = members.len();
                let m2 = n_genes - m1;
                let inside: f64 = members.iter().map(|&g| pwf[g]).sum();
                let odds = if m2 == 0 {
                    1.0
                } else {
                    (inside / m1 as f64) / ((total_weight - inside) / m2 as f64)
                };
                wallenius_upper_tail(obs, m1, m2, n_de, odds)
            })
            .collect(),
        EnrichmentMethod::Hypergeometric => tested
            .iter()
            .zip(&observed)
            .map(|((_, members), &obs)| hypergeometric_upper_tail(obs, members.len(), n_genes - members.len(), n_de))
            .collect(),
    };

    Ok(tested
        .iter()
        .zip(observed)
        .zip(pvalues)
        .map(|(((set, members), obs), pvalue)| {
            let inside: f64 = members.iter().map(|&g| pwf[g]).sum();
            EnrichmentResult {
                category: set.name.clone(),
                num_de: obs,
                expected: n_de as f64 * inside / total_weight,
                set_size: members.len(),
                pvalue,
                fdr: f64::NAN,
                significant: false,
            }
        })
        .collect())
}

/// Fill in BH FDR and the significance flag, then sort by p-value
fn finalize_family(rows: &mut [EnrichmentResult], alpha: f64) {
    let pvalues: Vec<f64> = rows.iter().map(|r| r.pvalue).collect();
    let fdr = benjamini_hochberg(&pvalues);
    for (row, q) in rows.iter_mut().zip(fdr) {
        row.fdr = q;
        row.significant = q < alpha;
    }
    rows.sort_by(|a, b| match (a.pvalue.is_nan(), b.pvalue.is_nan()) {
        (false, false) => a.pvalue.total_cmp(&b.pvalue),
        (x, y) => x.cmp(&y),
    });
}

/// Bias covariate of every result row
fn covariate_values(results: &DgeResults, covariate: BiasCovariate) -> Vec<Option<f64>> {
    results
        .records
        .iter()
        .map(|r| match covariate {
            BiasCovariate::Length => r.length,
            BiasCovariate::GcContent => r.gc_content,
        })
        .collect()
}

/// Run every universe x subset family.
///
/// `gene_sets` must already use gene identifiers as members.
pub fn run_enrichment(
    results: &DgeResults,
    gene_sets: &GeneSetCollection,
    universes: &[UniverseConfig],
    params: &EnrichmentParams,
) -> Result<Vec<EnrichmentTable>> {
    let gene_ids: Vec<String> = results.records.iter().map(|r| r.gene_id.clone()).collect();
    let covariate = covariate_values(results, params.bias_covariate);
    let mut tables = Vec::new();

    for universe in universes {
        let sets = gene_sets.universe(universe);
        if sets.is_empty() {
            log::warn!("Universe '{}' selects no gene sets", universe.name);
        }

        for direction in Direction::ALL {
            let alpha = match direction {
                Direction::All => universe.alpha.all,
                Direction::Up => universe.alpha.up,
                Direction::Down => universe.alpha.down,
            };
            let de = results.de_indicator(direction);
            let n_de = de.iter().filter(|&&d| d).count();

            let mut rows = if n_de == 0 {
                log::warn!(
                    "No DE genes in subset '{}'; enrichment table for '{}' is empty",
                    direction,
                    universe.name
                );
                Vec::new()
            } else {
                let pwf = probability_weighting(&de, &covariate, params.pwf_bin_size)?;
                test_gene_sets(&gene_ids, &de, &pwf, &sets, params)?
            };
            finalize_family(&mut rows, alpha);

            let table = EnrichmentTable {
                universe: universe.name.clone(),
                subset: direction,
                alpha,
                method: params.method,
                n_de,
                rows,
            };
            log::info!(
                "Enrichment {}/{}: {} DE genes, {} sets tested, {} significant at FDR < {}",
                table.universe,
                table.subset,
                table.n_de,
                table.rows.len(),
                table.n_significant(),
                alpha
            );
            tables.push(table);
        }
    }

    Ok(tables)
}
