//! Low-expression filter on counts per million

use std::collections::HashMap;

use ndarray::ArrayView2;

use crate::config::PipelineConfig;
use crate::data::{AnalysisSet, Sample};
use crate::error::{DgeError, Result};
use crate::normalization::cpm;

/// Retention mask of the rows whose CPM exceeds `min_cpm` in at least
/// `min_samples` samples.
///
/// The mask always has one entry per input row. An all-false mask is a
/// valid answer; deciding whether that is fatal is left to the caller.
/// Samples with an empty library count as CPM 0.
pub fn filter_by_expression(counts: ArrayView2<f64>, min_cpm: f64, min_samples: usize) -> Vec<bool> {
    cpm(counts)
        .outer_iter()
        .map(|row| row.iter().filter(|&&v| v > min_cpm).count() >= min_samples)
        .collect()
}

/// Number of samples a gene must pass in.
///
/// The configured fraction of all samples, capped at the size of the
/// smallest sample group so that a gene expressed in a single group of the
/// grouping covariates is kept.
pub fn min_samples_for_groups(samples: &[Sample], config: &PipelineConfig) -> usize {
    let by_fraction = config.min_samples(samples.len());
    let mut sizes: HashMap<&str, usize> = HashMap::new();
    for s in samples {
        *sizes.entry(s.group.as_str()).or_default() += 1;
    }
    let smallest = sizes.values().copied().min().unwrap_or(by_fraction);
    log::debug!("{} sample groups, smallest has {} samples", sizes.len(), smallest);
    by_fraction.min(smallest).max(1)
}

/// Apply the configured filter to an analysis set
pub fn filter_analysis_set(set: &AnalysisSet, config: &PipelineConfig) -> Result<AnalysisSet> {
    let min_samples = min_samples_for_groups(set.samples(), config);
    let mask = filter_by_expression(set.counts().counts(), config.min_cpm, min_samples);
    let kept = mask.iter().filter(|&&k| k).count();

    log::info!(
        "Expression filter (CPM > {} in >= {} samples): kept {} of {} genes",
        config.min_cpm,
        min_samples,
        kept,
        mask.len()
    );

    if kept == 0 {
        return Err(DgeError::EmptyData {
            reason: format!(
                "no gene has CPM above {} in at least {} samples",
                config.min_cpm, min_samples
            ),
        });
    }
    set.retain_genes(&mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, Gene, SampleSheet};
    use ndarray::{array, Array2};

    #[test]
    fn test_mask_length_matches_rows() {
        let counts = array![[0.0, 0.0, 1.0, 0.0], [500.0, 600.0, 550.0, 580.0], [1.0, 0.0, 2.0, 1.0]];
        let mask = filter_by_expression(counts.view(), 1.5, 2);
        assert_eq!(mask.len(), 3);
        // the first gene is expressed in one sample only
        assert_eq!(mask, vec![false, true, true]);
    }

    #[test]
    fn test_threshold_in_enough_samples() {
        // libraries of 1e6 make CPM equal to the count
        let mut counts = array![[1.0, 1.0, 3.0, 3.0], [1.0, 2.0, 1.0, 1.0], [0.0, 0.0, 0.0, 0.0]];
        for j in 0..4 {
            let used: f64 = counts.column(j).sum();
            counts[[2, j]] = 1e6 - used;
        }
        let mask = filter_by_expression(counts.view(), 1.5, 2);
        assert_eq!(mask, vec![true, false, true]);
        // requiring every sample drops both low genes
        let strict = filter_by_expression(counts.view(), 1.5, 4);
        assert!(!strict[0] && !strict[1]);
    }

    #[test]
    fn test_all_false_is_not_an_error() {
        let counts = array![[1.0, 1.0], [1.0, 1.0]];
        let mask = filter_by_expression(counts.view(), 1e7, 1);
        assert_eq!(mask, vec![false, false]);
    }

    #[test]
    fn test_degenerate_inputs_give_a_mask() {
        let empty = Array2::<f64>::zeros((0, 3));
        assert!(filter_by_expression(empty.view(), 1.5, 1).is_empty());

        // the second sample has no reads at all
        let counts = array![[100.0, 0.0, 120.0], [0.0, 0.0, 1.0]];
        let mask = filter_by_expression(counts.view(), 1.5, 2);
        assert_eq!(mask, vec![true, false]);
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    /// Two cell lines with two pairs each; `xonly` is expressed only in the
    /// control samples of line X
    fn two_line_set(config: &PipelineConfig) -> AnalysisSet {
        let ids = strings(&["s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8"]);
        let mut sheet = SampleSheet::new(ids.clone()).unwrap();
        sheet.add_column("sample", ids.clone()).unwrap();
        sheet
            .add_column("treatment", strings(&["ctrl", "trt", "ctrl", "trt", "ctrl", "trt", "ctrl", "trt"]))
            .unwrap();
        sheet
            .add_column("replicate", strings(&["1", "1", "2", "2", "3", "3", "4", "4"]))
            .unwrap();
        sheet
            .add_column("cell_line", strings(&["X", "X", "X", "X", "Y", "Y", "Y", "Y"]))
            .unwrap();
        let samples = sheet.samples(config).unwrap();

        let counts = array![
            [10000.0, 10000.0, 10000.0, 10000.0, 10000.0, 10000.0, 10000.0, 10000.0],
            [100.0, 0.0, 100.0, 0.0, 0.0, 0.0, 0.0, 0.0]
        ];
        let genes = ["hk", "xonly"]
            .iter()
            .map(|id| Gene {
                id: id.to_string(),
                symbol: id.to_uppercase(),
                biotype: "protein_coding".to_string(),
                entrez: Vec::new(),
                length: Some(1500.0),
                gc_content: Some(0.45),
            })
            .collect();
        let counts = CountMatrix::new(counts, strings(&["hk", "xonly"]), ids).unwrap();
        AnalysisSet::from_parts(counts, samples, genes, Some("ctrl")).unwrap()
    }

    #[test]
    fn test_grouping_covariates_set_min_samples() {
        let by_treatment = PipelineConfig::default();
        let set = two_line_set(&by_treatment);
        assert_eq!(min_samples_for_groups(set.samples(), &by_treatment), 4);
        let kept = filter_analysis_set(&set, &by_treatment).unwrap();
        assert_eq!(kept.counts().gene_ids(), &["hk".to_string()]);

        let by_line = PipelineConfig {
            grouping_covariates: strings(&["treatment", "cell_line"]),
            ..PipelineConfig::default()
        };
        let set = two_line_set(&by_line);
        assert_eq!(min_samples_for_groups(set.samples(), &by_line), 2);
        let kept = filter_analysis_set(&set, &by_line).unwrap();
        assert_eq!(kept.n_genes(), 2);
    }
}
