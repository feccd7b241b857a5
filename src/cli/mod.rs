//! Command-line interface for rnaseq_dge

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{EnrichmentMethod, PipelineConfig};
use crate::error::{DgeError, Result};

#[derive(Parser)]
#[command(name = "rnaseq_dge")]
#[command(version)]
#[command(about = "Paired RNA-seq differential expression with CQN and bias-aware enrichment")]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline
    #[command(
        about = "Run the full pipeline",
        long_about = "Run the full pipeline\n\n\
            Filters lowly expressed genes, normalizes for GC content and transcript\n\
            length with CQN, fits a paired negative binomial quasi-likelihood GLM,\n\
            tests against a fold-change threshold (TREAT) and runs gene-set\n\
            enrichment corrected for length or GC bias.",
        after_long_help = "\
Outputs (in --output-dir):
  dge_results.tsv                 per-gene statistics, sorted by p-value
  cqn_offsets.tsv                 CQN offsets (log2 scale, genes x samples)
  dispersions.tsv                 trended and tagwise NB dispersions per gene
  enrichment_<universe>_<subset>.tsv
  summary.json

Examples:
  # Everything from a JSON configuration
  rnaseq_dge run --config config.json

  # Inputs on the command line, control as reference
  rnaseq_dge run -c counts.tsv -s samples.tsv -a annotation.tsv \\
    -g msigdb.tsv --reference control -o results/

  # Sampling null with 5000 draws on 8 threads
  rnaseq_dge run --config config.json --method sampling --reps 5000 -t 8"
    )]
    Run {
        #[command(flatten)]
        inputs: InputArgs,

        #[command(flatten)]
        testing: TestingArgs,

        #[command(flatten)]
        enrichment: EnrichmentArgs,
    },

    /// Filter and normalize only
    #[command(
        about = "Filter and normalize only",
        long_about = "Filter and normalize only\n\n\
            Applies the CPM filter and CQN, then writes cqn_offsets.tsv."
    )]
    Normalize {
        #[command(flatten)]
        inputs: InputArgs,
    },

    /// Gene-set enrichment from an existing results table
    #[command(
        about = "Gene-set enrichment from an existing results table",
        long_about = "Gene-set enrichment from an existing results table\n\n\
            Reads a dge_results.tsv written by `run`, recomputes the DE calls at\n\
            the given alpha and runs every universe x subset family.",
        after_long_help = "\
Examples:
  rnaseq_dge enrich --dge results/dge_results.tsv -g msigdb.tsv -o results/
  rnaseq_dge enrich --config config.json --dge results/dge_results.tsv --method hypergeometric"
    )]
    Enrich {
        /// Differential expression table
        #[arg(long, value_name = "FILE")]
        dge: PathBuf,

        #[command(flatten)]
        inputs: InputArgs,

        #[command(flatten)]
        testing: TestingArgs,

        #[command(flatten)]
        enrichment: EnrichmentArgs,
    },

    /// PCA bias diagnostics
    #[command(
        about = "PCA bias diagnostics",
        long_about = "PCA bias diagnostics\n\n\
            Correlates the leading principal components of raw log CPM and of\n\
            CQN-normalized expression with per-sample GC and length slopes.\n\
            Writes bias_diagnostics.tsv."
    )]
    Diagnose {
        #[command(flatten)]
        inputs: InputArgs,
    },
}

/// Input paths and options shared by every subcommand
#[derive(Args, Debug, Default)]
pub struct InputArgs {
    /// JSON configuration file
    #[arg(long, value_name = "FILE",
        long_help = "JSON configuration file.\n\
            Keys match the configuration fields; options given on the command\n\
            line override the file.")]
    pub config: Option<PathBuf>,

    /// Count matrix (TSV)
    #[arg(short, long, value_name = "FILE",
        long_help = "Count matrix, tab-separated.\n\
            Format: first column = gene IDs, remaining columns = samples.\n\
            Directory prefixes and a trailing .bam are stripped from sample headers.")]
    pub counts: Option<PathBuf>,

    /// Sample sheet (TSV)
    #[arg(short, long, value_name = "FILE",
        long_help = "Sample sheet, tab-separated, one row per sample.\n\
            Must contain the sample, treatment, replicate and cell_line columns.")]
    pub samples: Option<PathBuf>,

    /// Gene annotation (TSV)
    #[arg(short, long, value_name = "FILE",
        long_help = "Gene annotation, tab-separated.\n\
            Columns: gene_id, gene_name, gene_biotype, entrezid, length, gc_content.")]
    pub annotation: Option<PathBuf>,

    /// Gene-set membership table (TSV)
    #[arg(short, long, value_name = "FILE",
        long_help = "Gene-set membership, tab-separated, one member per row.\n\
            Columns: gs_name, gs_cat, gs_subcat, gene, optional exclude.")]
    pub gene_sets: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Reference treatment level
    #[arg(long, value_name = "LEVEL",
        long_help = "Treatment level used as the reference (denominator).\n\
            Without this, the alphabetically first level is the reference.")]
    pub reference: Option<String>,

    /// Number of threads (0 = all cores)
    #[arg(short, long)]
    pub threads: Option<usize>,
}

/// Differential expression calling
#[derive(Args, Debug, Default)]
pub struct TestingArgs {
    /// FDR threshold for DE calls [default: 0.05]
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Log2 fold-change threshold for TREAT [default: log2(1.2)]
    #[arg(long,
        long_help = "Log2 fold-change threshold.\n\
            Tests H0: |log2FC| <= threshold against |log2FC| > threshold.")]
    pub lfc_threshold: Option<f64>,
}

/// Gene-set enrichment options
#[derive(Args, Debug, Default)]
pub struct EnrichmentArgs {
    /// Null distribution [default: wallenius]
    #[arg(long, value_name = "METHOD",
        long_help = "Null distribution for set membership counts.\n\
            wallenius:      noncentral hypergeometric with bias weights\n\
            sampling:       weighted random draws of the DE set\n\
            hypergeometric: no bias correction")]
    pub method: Option<String>,

    /// Random draws for the sampling method [default: 2000]
    #[arg(long)]
    pub reps: Option<usize>,

    /// Random seed for the sampling method [default: 1]
    #[arg(long)]
    pub seed: Option<u32>,
}

/// Parse an enrichment method name
pub fn parse_method(name: &str) -> Result<EnrichmentMethod> {
    match name.to_ascii_lowercase().as_str() {
        "wallenius" => Ok(EnrichmentMethod::Wallenius),
        "sampling" => Ok(EnrichmentMethod::Sampling),
        "hypergeometric" | "hypergeo" => Ok(EnrichmentMethod::Hypergeometric),
        other => Err(DgeError::InvalidInput {
            reason: format!(
                "Unknown enrichment method '{}'. Use 'wallenius', 'sampling' or 'hypergeometric'.",
                other
            ),
        }),
    }
}

impl InputArgs {
    /// Load the configuration file (or defaults) and apply the overrides
    pub fn load_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(p) = &self.counts {
            config.counts = Some(p.clone());
        }
        if let Some(p) = &self.samples {
            config.samples = Some(p.clone());
        }
        if let Some(p) = &self.annotation {
            config.annotation = Some(p.clone());
        }
        if let Some(p) = &self.gene_sets {
            config.gene_sets = Some(p.clone());
        }
        if let Some(p) = &self.output_dir {
            config.output_dir = p.clone();
        }
        if let Some(level) = &self.reference {
            config.reference_level = Some(level.clone());
        }
        if let Some(n) = self.threads {
            config.threads = n;
        }
        Ok(config)
    }
}

impl TestingArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(alpha) = self.alpha {
            config.alpha = alpha;
        }
        if let Some(t) = self.lfc_threshold {
            config.fc_threshold = t;
        }
    }
}

impl EnrichmentArgs {
    pub fn apply(&self, config: &mut PipelineConfig) -> Result<()> {
        if let Some(name) = &self.method {
            config.enrichment_method = parse_method(name)?;
        }
        if let Some(reps) = self.reps {
            config.sampling_reps = reps;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("Wallenius").unwrap(), EnrichmentMethod::Wallenius);
        assert_eq!(parse_method("hypergeo").unwrap(), EnrichmentMethod::Hypergeometric);
        assert!(parse_method("fisher").is_err());
    }

    #[test]
    fn test_overrides_replace_defaults() {
        let inputs = InputArgs {
            counts: Some(PathBuf::from("counts.tsv")),
            output_dir: Some(PathBuf::from("out")),
            reference: Some("DMSO".to_string()),
            threads: Some(4),
            ..Default::default()
        };
        let mut config = inputs.load_config().unwrap();
        TestingArgs {
            alpha: Some(0.1),
            lfc_threshold: None,
        }
        .apply(&mut config);
        EnrichmentArgs {
            method: Some("sampling".to_string()),
            reps: Some(500),
            seed: None,
        }
        .apply(&mut config)
        .unwrap();

        assert_eq!(config.counts, Some(PathBuf::from("counts.tsv")));
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.reference_level.as_deref(), Some("DMSO"));
        assert_eq!(config.threads, 4);
        assert_eq!(config.alpha, 0.1);
        assert!((config.fc_threshold - 1.2_f64.log2()).abs() < 1e-12);
        assert_eq!(config.enrichment_method, EnrichmentMethod::Sampling);
        assert_eq!(config.sampling_reps, 500);
        assert_eq!(config.seed, 1);
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "rnaseq_dge", "run", "-c", "counts.tsv", "--method", "hypergeometric", "--alpha", "0.1", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Some(Commands::Run { inputs, testing, enrichment }) => {
                assert_eq!(inputs.counts, Some(PathBuf::from("counts.tsv")));
                assert_eq!(testing.alpha, Some(0.1));
                assert_eq!(enrichment.method.as_deref(), Some("hypergeometric"));
            }
            _ => panic!("expected run"),
        }
    }
}
