//! rnaseq_dge: paired RNA-seq differential expression in Rust
//!
//! Low-expression filtering, conditional quantile normalization (GC content
//! and transcript length), negative binomial quasi-likelihood GLMs with
//! robust empirical Bayes moderation, TREAT testing against a fold-change
//! interval, and gene-set enrichment corrected for detection bias.
//!
//! # Example
//!
//! ```ignore
//! use rnaseq_dge::prelude::*;
//!
//! let config = PipelineConfig::from_json_file("config.json")?;
//! config.validate()?;
//! let output = run_pipeline(&config)?;
//! println!("{}", output.results.summary());
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod diagnostics;
pub mod dispersion;
pub mod enrichment;
pub mod error;
pub mod filter;
pub mod glm;
pub mod io;
pub mod normalization;
pub mod rng;
pub mod spline;
pub mod stats;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{BiasCovariate, EnrichmentMethod, GeneSetIdType, PipelineConfig, UniverseConfig};
    pub use crate::data::{AnalysisSet, CountMatrix, Gene, GeneAnnotation, GeneSetCollection, SampleSheet};
    pub use crate::diagnostics::{bias_diagnostics, BiasDiagnostic};
    pub use crate::dispersion::{estimate_dispersions, fit_ql, DispersionEstimates, DispersionParams, QlFit};
    pub use crate::enrichment::{run_enrichment, EnrichmentParams, EnrichmentResult, EnrichmentTable};
    pub use crate::error::{DgeError, Result};
    pub use crate::filter::{filter_analysis_set, filter_by_expression};
    pub use crate::glm::{fit_glm, GlmFitParams, PairedDesign};
    pub use crate::io::{
        read_annotation, read_count_matrix, read_dge_results, read_gene_sets, read_sample_sheet, write_dge_results,
        DgeRecord, DgeResults, Direction, ResultsSummary, RunSummary,
    };
    pub use crate::normalization::{cqn, CqnParams, CqnResult};
    pub use crate::testing::{benjamini_hochberg, treat};
    pub use crate::{
        analyze, diagnose, differential_expression, load_analysis_set, load_gene_sets, normalize, run_diagnostics,
        run_enrichment_from_table, run_normalize, run_pipeline, DifferentialFit, Normalized, PipelineOutput,
    };
}

use std::fs;
use std::path::Path;

use prelude::*;

use crate::io::{
    write_bias_diagnostics, write_dispersions, write_enrichment_table, write_matrix, write_summary, FamilySummary,
};
use crate::normalization::{ave_log_cpm, log_cpm, PRIOR_COUNT};
use crate::stats::quantile;

/// Filtered cohort with its CQN offsets
#[derive(Debug, Clone)]
pub struct Normalized {
    pub set: AnalysisSet,
    pub cqn: CqnResult,
}

/// Dispersion estimates, quasi-likelihood fit and test results
#[derive(Debug, Clone)]
pub struct DifferentialFit {
    pub dispersions: DispersionEstimates,
    pub ql: QlFit,
    pub results: DgeResults,
}

/// Everything a full run produces
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub genes_input: usize,
    pub normalized: Normalized,
    pub dispersions: DispersionEstimates,
    pub ql: QlFit,
    pub results: DgeResults,
    pub enrichment: Vec<EnrichmentTable>,
}

impl PipelineOutput {
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            n_samples: self.normalized.set.n_samples(),
            genes_input: self.genes_input,
            genes_retained: self.normalized.set.n_genes(),
            cqn_spline_df: self.normalized.cqn.spline_df,
            common_dispersion: self.dispersions.common,
            prior_df: quantile(&self.ql.squeezed.df_prior, 0.5),
            differential: self.results.summary(),
            enrichment: self.enrichment.iter().map(FamilySummary::from).collect(),
        }
    }
}

/// Read the sample sheet, counts and annotation and join them
pub fn load_analysis_set(config: &PipelineConfig) -> Result<(AnalysisSet, GeneAnnotation)> {
    let samples_path = config.require_path(&config.samples, "samples")?;
    let counts_path = config.require_path(&config.counts, "counts")?;
    let annotation_path = config.require_path(&config.annotation, "annotation")?;

    log::info!("Loading sample sheet from: {}", samples_path.display());
    let sheet = read_sample_sheet(samples_path, config)?;
    config.validate_covariates(sheet.columns())?;

    log::info!("Loading count matrix from: {}", counts_path.display());
    let counts = read_count_matrix(counts_path, Some(sheet.sample_ids()))?;

    log::info!("Loading annotation from: {}", annotation_path.display());
    let annotation = read_annotation(annotation_path)?;

    let set = AnalysisSet::new(&counts, &sheet, &annotation, config)?;
    log::info!(
        "Contrast: {} vs {}",
        set.design().treated_level(),
        set.design().reference_level()
    );
    Ok((set, annotation))
}

/// Read the configured gene-set table and translate its members to gene ids
pub fn load_gene_sets(config: &PipelineConfig, annotation: Option<&GeneAnnotation>) -> Result<Option<GeneSetCollection>> {
    let path = match &config.gene_sets {
        Some(p) => p,
        None => return Ok(None),
    };
    log::info!("Loading gene sets from: {}", path.display());
    let collection = read_gene_sets(path)?;
    match (config.gene_set_id_type, annotation) {
        (GeneSetIdType::GeneId, None) => Ok(Some(collection)),
        (id_type, Some(annotation)) => Ok(Some(collection.translate(&annotation.identifier_map(id_type)))),
        (id_type, None) => Err(DgeError::InvalidConfig {
            reason: format!("gene sets keyed by {:?} need an annotation table", id_type),
        }),
    }
}

/// Low-expression filter followed by CQN
pub fn normalize(set: &AnalysisSet, config: &PipelineConfig) -> Result<Normalized> {
    let filtered = filter_analysis_set(set, config)?;
    let cqn = cqn(
        filtered.counts().counts(),
        &filtered.gc_content(),
        &filtered.gene_lengths(),
        None,
        &CqnParams::from(config),
    )?;
    Ok(Normalized { set: filtered, cqn })
}

/// Dispersions, QL fit and TREAT on a normalized cohort
pub fn differential_expression(normalized: &Normalized, config: &PipelineConfig) -> Result<DifferentialFit> {
    let set = &normalized.set;
    let counts = set.counts().counts();
    let design = set.design().matrix();
    let offsets = normalized.cqn.glm_offset.view();
    let params = DispersionParams::from(config);

    let effective_libs = normalized.cqn.effective_libraries();
    let abundance = ave_log_cpm(counts, effective_libs.view(), PRIOR_COUNT)?;

    let dispersions = estimate_dispersions(counts, design, offsets, &abundance, &params)?;
    let ql = fit_ql(counts, design, offsets, &abundance, &dispersions.trended, &params)?;
    let results = treat(
        &ql,
        set.design().treatment_coef(),
        set.genes(),
        config.fc_threshold,
        config.alpha,
    )?;

    Ok(DifferentialFit {
        dispersions,
        ql,
        results,
    })
}

/// Run every in-memory stage on a joined cohort
pub fn analyze(
    set: &AnalysisSet,
    gene_sets: Option<&GeneSetCollection>,
    config: &PipelineConfig,
) -> Result<PipelineOutput> {
    let normalized = normalize(set, config)?;
    let fit = differential_expression(&normalized, config)?;

    let enrichment = match gene_sets {
        Some(collection) => run_enrichment(&fit.results, collection, &config.universes, &EnrichmentParams::from(config))?,
        None => {
            log::info!("No gene sets configured; skipping enrichment");
            Vec::new()
        }
    };

    Ok(PipelineOutput {
        genes_input: set.n_genes(),
        normalized,
        dispersions: fit.dispersions,
        ql: fit.ql,
        results: fit.results,
        enrichment,
    })
}

/// PCA bias diagnostics on raw log CPM and on CQN-normalized expression
pub fn diagnose(set: &AnalysisSet, config: &PipelineConfig) -> Result<Vec<BiasDiagnostic>> {
    let normalized = normalize(set, config)?;
    let filtered = &normalized.set;
    let gc = filtered.gc_content();
    let length = filtered.gene_lengths();
    let n_components = diagnostics::DEFAULT_COMPONENTS;

    let raw = log_cpm(filtered.counts().counts(), &normalized.cqn.lib_sizes, PRIOR_COUNT)?;
    let mut rows = bias_diagnostics("raw", &raw, &gc, &length, n_components)?;
    rows.extend(bias_diagnostics(
        "cqn",
        &normalized.cqn.normalized(),
        &gc,
        &length,
        n_components,
    )?);
    Ok(rows)
}

fn prepare_output_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    Ok(())
}

fn write_offsets(dir: &Path, normalized: &Normalized) -> Result<()> {
    let counts = normalized.set.counts();
    write_matrix(
        dir.join("cqn_offsets.tsv"),
        &normalized.cqn.offset,
        counts.gene_ids(),
        counts.sample_ids(),
    )
}

fn write_enrichment(dir: &Path, tables: &[EnrichmentTable]) -> Result<()> {
    for table in tables {
        write_enrichment_table(dir.join(format!("{}.tsv", table.file_stem())), table)?;
    }
    Ok(())
}

/// Full run: load inputs, analyze and write every output table
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineOutput> {
    let (set, annotation) = load_analysis_set(config)?;
    let gene_sets = load_gene_sets(config, Some(&annotation))?;
    let output = analyze(&set, gene_sets.as_ref(), config)?;

    let dir = config.output_dir.as_path();
    prepare_output_dir(dir)?;
    write_dge_results(dir.join("dge_results.tsv"), &output.results)?;
    write_offsets(dir, &output.normalized)?;
    write_dispersions(
        dir.join("dispersions.tsv"),
        output.normalized.set.counts().gene_ids(),
        &output.dispersions,
    )?;
    write_enrichment(dir, &output.enrichment)?;
    write_summary(dir.join("summary.json"), &output.summary())?;
    log::info!("Results written to {}", dir.display());

    Ok(output)
}

/// Filter and normalize only; writes `cqn_offsets.tsv`
pub fn run_normalize(config: &PipelineConfig) -> Result<Normalized> {
    let (set, _) = load_analysis_set(config)?;
    let normalized = normalize(&set, config)?;
    let dir = config.output_dir.as_path();
    prepare_output_dir(dir)?;
    write_offsets(dir, &normalized)?;
    log::info!("CQN offsets written to {}", dir.display());
    Ok(normalized)
}

/// Enrichment from an existing DGE table
pub fn run_enrichment_from_table<P: AsRef<Path>>(config: &PipelineConfig, dge_table: P) -> Result<Vec<EnrichmentTable>> {
    let results = read_dge_results(dge_table, config.alpha, config.fc_threshold)?;
    let annotation = match &config.annotation {
        Some(path) => Some(read_annotation(path)?),
        None => None,
    };
    let gene_sets = load_gene_sets(config, annotation.as_ref())?.ok_or_else(|| DgeError::InvalidConfig {
        reason: "enrichment needs a gene-set table".to_string(),
    })?;
    let tables = run_enrichment(&results, &gene_sets, &config.universes, &EnrichmentParams::from(config))?;

    let dir = config.output_dir.as_path();
    prepare_output_dir(dir)?;
    write_enrichment(dir, &tables)?;
    Ok(tables)
}

/// Bias diagnostics; writes `bias_diagnostics.tsv`
pub fn run_diagnostics(config: &PipelineConfig) -> Result<Vec<BiasDiagnostic>> {
    let (set, _) = load_analysis_set(config)?;
    let rows = diagnose(&set, config)?;
    let dir = config.output_dir.as_path();
    prepare_output_dir(dir)?;
    write_bias_diagnostics(dir.join("bias_diagnostics.tsv"), &rows)?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{GeneSet, Sample};
    use ndarray::Array2;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn samples() -> Vec<Sample> {
        [("s1", "ctrl", "1"), ("s2", "trt", "1"), ("s3", "ctrl", "2"), ("s4", "trt", "2")]
            .iter()
            .map(|&(id, treatment, replicate)| Sample {
                id: id.to_string(),
                treatment: treatment.to_string(),
                replicate: replicate.to_string(),
                cell_line: "HEK293".to_string(),
                group: treatment.to_string(),
            })
            .collect()
    }

    fn gene(id: &str, i: usize) -> Gene {
        Gene {
            id: id.to_string(),
            symbol: id.to_uppercase(),
            biotype: "protein_coding".to_string(),
            entrez: vec![format!("{}", 1000 + i)],
            length: Some(1000.0 + 250.0 * i as f64),
            gc_content: Some(0.38 + 0.02 * i as f64),
        }
    }

    /// One 4-fold up-regulated gene, the rest flat with small paired noise
    fn cohort(n_flat: usize) -> AnalysisSet {
        let mut rows: Vec<[f64; 4]> = vec![[100.0, 400.0, 120.0, 470.0]];
        let flat = [
            [1000.0, 1000.0, 980.0, 1010.0],
            [1000.0, 1000.0, 1020.0, 990.0],
            [1000.0, 1000.0, 1010.0, 1000.0],
        ];
        for k in 0..n_flat {
            let base = flat[k % 3];
            let scale = 1.0 + 0.1 * (k / 3) as f64;
            rows.push([base[0] * scale, base[1] * scale, base[2] * scale, base[3] * scale]);
        }
        let n = rows.len();
        let counts = Array2::from_shape_fn((n, 4), |(i, j)| rows[i][j].round());
        let ids: Vec<String> = std::iter::once("up".to_string())
            .chain((0..n_flat).map(|k| format!("flat{}", k)))
            .collect();
        let genes = ids.iter().enumerate().map(|(i, id)| gene(id, i)).collect();
        let counts = CountMatrix::new(counts, ids, strings(&["s1", "s2", "s3", "s4"])).unwrap();
        AnalysisSet::from_parts(counts, samples(), genes, Some("ctrl")).unwrap()
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            fc_threshold: 1.2_f64.log2(),
            alpha: 0.05,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_single_up_gene_detected() {
        let set = cohort(3);
        let output = analyze(&set, None, &config()).unwrap();
        let results = &output.results;

        assert_eq!(results.n_genes(), 4);
        let de: Vec<&str> = results.de_genes(Direction::All);
        assert_eq!(de, vec!["up"]);
        let up = results.get("up").unwrap();
        assert!(up.log_fc > 1.5 && up.log_fc < 2.5);
        assert!(up.signed_rank > 0.0);
        assert_eq!(results.records[0].gene_id, "up");
        for r in &results.records {
            assert_eq!(r.de, r.fdr < 0.05);
        }
        assert!(output.enrichment.is_empty());
    }

    #[test]
    fn test_enrichment_on_detected_gene() {
        let set = cohort(11);
        let collection = GeneSetCollection::new(vec![
            GeneSet {
                name: "UP_AND_ONE".to_string(),
                category: "C2".to_string(),
                subcategory: "CP:KEGG".to_string(),
                members: strings(&["up", "flat0"]),
                excluded: false,
            },
            GeneSet {
                name: "ELSEWHERE".to_string(),
                category: "C2".to_string(),
                subcategory: "CP:KEGG".to_string(),
                members: strings(&["ENSG_NOT_ANALYZED_1", "ENSG_NOT_ANALYZED_2"]),
                excluded: false,
            },
        ]);
        let mut cfg = config();
        cfg.universes = vec![UniverseConfig {
            name: "pathway".to_string(),
            categories: vec![crate::config::CategoryFilter::new("C2", None)],
            alpha: Default::default(),
        }];

        let output = analyze(&set, Some(&collection), &cfg).unwrap();
        assert_eq!(output.results.de_genes(Direction::All), vec!["up"]);
        assert_eq!(output.enrichment.len(), 3);

        let all = output.enrichment.iter().find(|t| t.subset == Direction::All).unwrap();
        assert_eq!(all.rows.len(), 1);
        let row = &all.rows[0];
        assert_eq!(row.category, "UP_AND_ONE");
        assert_eq!(row.num_de, 1);
        assert_eq!(row.set_size, 2);
        assert!(row.pvalue < 0.5);

        let down = output.enrichment.iter().find(|t| t.subset == Direction::Down).unwrap();
        assert!(down.rows.is_empty());

        let summary = output.summary();
        assert_eq!(summary.genes_retained, 12);
        assert_eq!(summary.differential.significant, 1);
        assert_eq!(summary.enrichment.len(), 3);
    }

    #[test]
    fn test_run_pipeline_writes_outputs() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, lines: &[String]| {
            let path = dir.path().join(name);
            let mut f = fs::File::create(&path).unwrap();
            for l in lines {
                writeln!(f, "{}", l).unwrap();
            }
            path
        };

        let set = cohort(3);
        let mut count_lines = vec!["gene_id\ts1.bam\ts2.bam\ts3.bam\ts4.bam".to_string()];
        let mut annotation_lines = vec!["gene_id\tgene_name\tgene_biotype\tentrezid\tlength\tgc_content".to_string()];
        for (i, g) in set.genes().iter().enumerate() {
            let row: Vec<String> = set.counts().gene_counts(i).iter().map(|c| format!("{}", c)).collect();
            count_lines.push(format!("{}\t{}", g.id, row.join("\t")));
            annotation_lines.push(format!(
                "{}\t{}\tprotein_coding\t{}\t{}\t{}",
                g.id,
                g.symbol,
                g.entrez.join(";"),
                g.length.unwrap(),
                100.0 * g.gc_content.unwrap()
            ));
        }
        let sheet_lines = strings(&[
            "sample\ttreatment\treplicate\tcell_line",
            "s1\tctrl\t1\tHEK293",
            "s2\ttrt\t1\tHEK293",
            "s3\tctrl\t2\tHEK293",
            "s4\ttrt\t2\tHEK293",
        ]);

        let cfg = PipelineConfig {
            counts: Some(write("counts.tsv", &count_lines)),
            samples: Some(write("samples.tsv", &sheet_lines)),
            annotation: Some(write("annotation.tsv", &annotation_lines)),
            output_dir: dir.path().join("out"),
            reference_level: Some("ctrl".to_string()),
            ..config()
        };
        let output = run_pipeline(&cfg).unwrap();
        assert_eq!(output.results.de_genes(Direction::All), vec!["up"]);

        let out = dir.path().join("out");
        assert!(out.join("dge_results.tsv").exists());
        assert!(out.join("cqn_offsets.tsv").exists());
        let dispersions = fs::read_to_string(out.join("dispersions.tsv")).unwrap();
        assert_eq!(dispersions.lines().count(), 1 + output.normalized.set.n_genes());
        assert!(out.join("summary.json").exists());
        let back = read_dge_results(out.join("dge_results.tsv"), cfg.alpha, cfg.fc_threshold).unwrap();
        let ids: Vec<&str> = back.records.iter().map(|r| r.gene_id.as_str()).collect();
        let original: Vec<&str> = output.results.records.iter().map(|r| r.gene_id.as_str()).collect();
        assert_eq!(ids, original);
    }
}
