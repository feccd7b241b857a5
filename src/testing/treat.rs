//! Moderated t-test against a fold-change interval (TREAT)
//!
//! H0: |log2FC| <= threshold. The p-value adds the upper t tails beyond the
//! near and far interval boundaries, so a zero threshold gives the usual
//! two-sided moderated t-test.

use std::f64::consts::LN_2;

use super::fdr::benjamini_hochberg;
use super::pvalue::treat_pvalue;
use crate::data::Gene;
use crate::dispersion::QlFit;
use crate::error::{DgeError, Result};
use crate::io::{DgeRecord, DgeResults};

/// `-log10(p)`, with p floored at the smallest normal double so that
/// underflowed p-values keep a finite rank. NaN stays NaN.
fn ranking_statistic(p: f64) -> f64 {
    if p.is_nan() {
        f64::NAN
    } else {
        -p.max(f64::MIN_POSITIVE).log10()
    }
}

/// Test one coefficient of a quasi-likelihood fit.
///
/// `genes` must be in fit order. Records come back sorted by p-value, ties
/// in fit order, genes without a converged fit last with NA statistics.
pub fn treat(fit: &QlFit, coef: usize, genes: &[Gene], threshold: f64, alpha: f64) -> Result<DgeResults> {
    let n_genes = fit.glm.n_genes();
    if genes.len() != n_genes {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} genes", n_genes),
            got: format!("{} genes", genes.len()),
        });
    }
    if coef >= fit.glm.coefficients.ncols() {
        return Err(DgeError::InvalidInput {
            reason: format!("coefficient {} out of range", coef),
        });
    }
    if !(threshold >= 0.0) {
        return Err(DgeError::InvalidInput {
            reason: format!("fold-change threshold must be non-negative, got {}", threshold),
        });
    }

    let log_fc: Vec<f64> = (0..n_genes).map(|i| fit.glm.coefficients[[i, coef]] / LN_2).collect();
    let pvalues: Vec<f64> = (0..n_genes)
        .map(|i| {
            let v = fit.glm.unscaled_variances[[i, coef]] / (LN_2 * LN_2);
            let se = (fit.s2_post(i) * v).sqrt();
            treat_pvalue(log_fc[i], se, threshold, fit.df_total(i))
        })
        .collect();
    let fdr = benjamini_hochberg(&pvalues);

    let mut records: Vec<DgeRecord> = (0..n_genes)
        .map(|i| {
            let ranking_stat = ranking_statistic(pvalues[i]);
            let signed_rank = if log_fc[i] == 0.0 {
                0.0
            } else {
                log_fc[i].signum() * ranking_stat
            };
            let gene = &genes[i];
            DgeRecord {
                gene_id: gene.id.clone(),
                gene_name: gene.symbol.clone(),
                log_cpm: fit.ave_log_cpm[i],
                log_fc: log_fc[i],
                pvalue: pvalues[i],
                fdr: fdr[i],
                biotype: gene.biotype.clone(),
                entrez: gene.entrez.clone(),
                length: gene.length,
                gc_content: gene.gc_content,
                ranking_stat,
                signed_rank,
                de: fdr[i] < alpha,
            }
        })
        .collect();

    // stable: ties keep fit order, NaN sorts last
    records.sort_by(|a, b| match (a.pvalue.is_nan(), b.pvalue.is_nan()) {
        (false, false) => a.pvalue.total_cmp(&b.pvalue),
        (x, y) => x.cmp(&y),
    });

    let results = DgeResults {
        records,
        alpha,
        fc_threshold: threshold,
    };
    let summary = results.summary();
    log::info!(
        "TREAT (|log2FC| > {:.3}): {} of {} genes DE at FDR < {} ({} up, {} down)",
        threshold,
        summary.significant,
        summary.genes_tested,
        alpha,
        summary.upregulated,
        summary.downregulated
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispersion::SqueezedVariances;
    use crate::glm::GlmFit;
    use ndarray::Array2;

    fn gene(id: &str) -> Gene {
        Gene {
            id: id.to_string(),
            symbol: format!("SYM_{}", id),
            biotype: "protein_coding".to_string(),
            entrez: vec!["1".to_string()],
            length: Some(1000.0),
            gc_content: Some(0.4),
        }
    }

    /// Fit with natural-log effects `beta` on coefficient 1 and unit variances
    fn fake_fit(beta: &[f64], variance: f64) -> QlFit {
        let n = beta.len();
        let mut coefficients = Array2::zeros((n, 2));
        let mut unscaled_variances = Array2::from_elem((n, 2), variance);
        for (i, &b) in beta.iter().enumerate() {
            coefficients[[i, 1]] = b;
            if b.is_nan() {
                coefficients[[i, 0]] = f64::NAN;
                unscaled_variances[[i, 1]] = f64::NAN;
            }
        }
        QlFit {
            glm: GlmFit {
                coefficients,
                unscaled_variances,
                mu: Array2::zeros((n, 4)),
                deviance: vec![1.0; n],
                converged: beta.iter().map(|b| b.is_finite()).collect(),
                dispersions: vec![0.05; n],
                df_residual: 2,
            },
            s2: vec![1.0; n],
            squeezed: SqueezedVariances {
                var_post: beta.iter().map(|b| if b.is_finite() { 1.0 } else { f64::NAN }).collect(),
                var_prior: vec![1.0; n],
                df_prior: vec![8.0; n],
            },
            ave_log_cpm: vec![5.0; n],
        }
    }

    #[test]
    fn test_sorted_by_pvalue_with_nan_last() {
        let beta = [0.1, f64::NAN, 2.0, -1.5, 0.0];
        let genes: Vec<Gene> = ["a", "b", "c", "d", "e"].iter().map(|s| gene(s)).collect();
        let res = treat(&fake_fit(&beta, 0.01), 1, &genes, 0.0, 0.05).unwrap();
        let ids: Vec<&str> = res.records.iter().map(|r| r.gene_id.as_str()).collect();
        assert_eq!(ids[0], "c");
        assert_eq!(ids[1], "d");
        assert_eq!(*ids.last().unwrap(), "b");
        let missing = res.get("b").unwrap();
        assert!(missing.pvalue.is_nan() && missing.fdr.is_nan() && !missing.de);
    }

    #[test]
    fn test_signed_rank_and_de_flag() {
        let beta = [2.0, -2.0, 0.0];
        let genes: Vec<Gene> = ["up", "down", "zero"].iter().map(|s| gene(s)).collect();
        let res = treat(&fake_fit(&beta, 0.01), 1, &genes, 1.2_f64.log2(), 0.05).unwrap();
        let up = res.get("up").unwrap();
        let down = res.get("down").unwrap();
        let zero = res.get("zero").unwrap();
        assert!(up.signed_rank > 0.0 && down.signed_rank < 0.0);
        assert!((up.signed_rank + down.signed_rank).abs() < 1e-9);
        assert_eq!(zero.signed_rank, 0.0);
        assert!((up.log_fc - 2.0 / LN_2).abs() < 1e-12);
        for r in &res.records {
            assert_eq!(r.de, r.fdr < 0.05);
            assert!((r.ranking_stat + r.pvalue.log10()).abs() < 1e-12);
        }
        assert!(up.de && down.de && !zero.de);
    }

    #[test]
    fn test_underflowed_pvalue_ranks_first() {
        let zero = ranking_statistic(0.0);
        assert!(zero.is_finite());
        assert!((zero + f64::MIN_POSITIVE.log10()).abs() < 1e-12);
        assert!(zero > ranking_statistic(1e-300));
        assert_eq!(ranking_statistic(1.0), 0.0);
        assert!(ranking_statistic(f64::NAN).is_nan());
    }

    #[test]
    fn test_threshold_reduces_discoveries() {
        let beta: Vec<f64> = (0..20).map(|i| 0.02 * i as f64).collect();
        let genes: Vec<Gene> = (0..20).map(|i| gene(&format!("g{}", i))).collect();
        let fit = fake_fit(&beta, 0.002);
        let point = treat(&fit, 1, &genes, 0.0, 0.05).unwrap().summary().significant;
        let interval = treat(&fit, 1, &genes, 0.5, 0.05).unwrap().summary().significant;
        assert!(interval < point);
    }

    #[test]
    fn test_mismatched_genes_rejected() {
        let fit = fake_fit(&[1.0, 2.0], 0.01);
        assert!(treat(&fit, 1, &[gene("a")], 0.0, 0.05).is_err());
        assert!(treat(&fit, 5, &[gene("a"), gene("b")], 0.0, 0.05).is_err());
    }
}
