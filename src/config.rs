//! Pipeline configuration
//!
//! A single immutable [`PipelineConfig`] is built at start-up (JSON file plus
//! command-line overrides) and handed by reference to every stage.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DgeError, Result};

/// Gene-level covariate used to model detection bias in the enrichment test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasCovariate {
    Length,
    GcContent,
}

/// Gene-set test used by the enrichment engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentMethod {
    /// Wallenius noncentral hypergeometric approximation (bias corrected)
    Wallenius,
    /// Weighted random sampling of DE genes (bias corrected)
    Sampling,
    /// Plain hypergeometric tail, no bias correction
    Hypergeometric,
}

/// Identifier type used for gene-set members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneSetIdType {
    GeneId,
    Entrez,
    Symbol,
}

/// Category / sub-category pair selecting gene sets into a universe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryFilter {
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
}

impl CategoryFilter {
    pub fn new(category: &str, subcategory: Option<&str>) -> Self {
        Self {
            category: category.to_string(),
            subcategory: subcategory.map(str::to_string),
        }
    }

    /// Whether a gene set with the given tags falls under this filter
    pub fn matches(&self, category: &str, subcategory: &str) -> bool {
        self.category == category
            && self.subcategory.as_deref().map_or(true, |s| s == subcategory)
    }
}

/// Significance threshold for each DE subset of a universe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubsetAlpha {
    pub all: f64,
    pub up: f64,
    pub down: f64,
}

impl Default for SubsetAlpha {
    fn default() -> Self {
        Self {
            all: 0.05,
            up: 0.05,
            down: 0.05,
        }
    }
}

/// A gene-set universe: a named group of categories tested as one family
/// per DE subset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseConfig {
    pub name: String,
    pub categories: Vec<CategoryFilter>,
    #[serde(default)]
    pub alpha: SubsetAlpha,
}

/// Complete run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub counts: Option<PathBuf>,
    pub samples: Option<PathBuf>,
    pub annotation: Option<PathBuf>,
    pub gene_sets: Option<PathBuf>,
    pub output_dir: PathBuf,

    pub sample_column: String,
    pub treatment_column: String,
    pub replicate_column: String,
    pub cell_line_column: String,
    /// Covariates whose joined values define the sample group
    pub grouping_covariates: Vec<String>,
    /// Baseline treatment level; alphabetically first level when unset
    pub reference_level: Option<String>,

    pub min_cpm: f64,
    pub min_sample_fraction: f64,

    pub cqn_spline_df: usize,
    pub cqn_tau: f64,
    pub cqn_min_quantile: f64,
    pub cqn_quantile_normalize: bool,

    pub prior_df: f64,
    pub grid_points: usize,
    pub grid_range: (f64, f64),
    pub trend_span: f64,
    pub robust: bool,

    /// TREAT threshold on the log2 fold change
    pub fc_threshold: f64,
    pub alpha: f64,

    pub bias_covariate: BiasCovariate,
    pub enrichment_method: EnrichmentMethod,
    pub sampling_reps: usize,
    pub seed: u32,
    pub pwf_bin_size: usize,
    pub min_set_size: usize,
    pub gene_set_id_type: GeneSetIdType,
    pub universes: Vec<UniverseConfig>,

    pub threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            counts: None,
            samples: None,
            annotation: None,
            gene_sets: None,
            output_dir: PathBuf::from("output"),
            sample_column: "sample".to_string(),
            treatment_column: "treatment".to_string(),
            replicate_column: "replicate".to_string(),
            cell_line_column: "cell_line".to_string(),
            grouping_covariates: vec!["treatment".to_string()],
            reference_level: None,
            min_cpm: 1.5,
            min_sample_fraction: 0.5,
            cqn_spline_df: 4,
            cqn_tau: 0.5,
            cqn_min_quantile: 0.05,
            cqn_quantile_normalize: true,
            prior_df: 10.0,
            grid_points: 11,
            grid_range: (-10.0, 10.0),
            trend_span: 0.3,
            robust: true,
            fc_threshold: 1.2_f64.log2(),
            alpha: 0.05,
            bias_covariate: BiasCovariate::Length,
            enrichment_method: EnrichmentMethod::Wallenius,
            sampling_reps: 2000,
            seed: 1,
            pwf_bin_size: 200,
            min_set_size: 1,
            gene_set_id_type: GeneSetIdType::GeneId,
            universes: default_universes(),
            threads: 0,
        }
    }
}

/// Pathway/process sets (hallmark, curated canonical pathways, GO BP) and
/// transcriptional-regulation sets (TF targets)
fn default_universes() -> Vec<UniverseConfig> {
    vec![
        UniverseConfig {
            name: "pathway".to_string(),
            categories: vec![
                CategoryFilter::new("H", None),
                CategoryFilter::new("C2", Some("CP:KEGG")),
                CategoryFilter::new("C2", Some("CP:REACTOME")),
                CategoryFilter::new("C2", Some("CP:WIKIPATHWAYS")),
                CategoryFilter::new("C5", Some("GO:BP")),
            ],
            alpha: SubsetAlpha::default(),
        },
        UniverseConfig {
            name: "regulation".to_string(),
            categories: vec![
                CategoryFilter::new("C3", Some("TFT:GTRD")),
                CategoryFilter::new("C3", Some("TFT:TFT_Legacy")),
            ],
            alpha: SubsetAlpha {
                all: 0.05,
                up: 0.1,
                down: 0.12,
            },
        },
    ]
}

impl PipelineConfig {
    /// Load a configuration from a JSON file; unspecified keys keep defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let config: PipelineConfig = serde_json::from_reader(BufReader::new(file))?;
        log::debug!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Check value ranges and internal consistency
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(DgeError::InvalidConfig { reason });

        if !(self.min_sample_fraction > 0.0 && self.min_sample_fraction <= 1.0) {
            return invalid(format!(
                "min_sample_fraction must be in (0, 1], got {}",
                self.min_sample_fraction
            ));
        }
        if !(self.min_cpm >= 0.0) {
            return invalid(format!("min_cpm must be non-negative, got {}", self.min_cpm));
        }
        if !(self.fc_threshold >= 0.0) {
            return invalid(format!(
                "fc_threshold must be non-negative, got {}",
                self.fc_threshold
            ));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return invalid(format!("alpha must be in (0, 1), got {}", self.alpha));
        }
        if !(self.cqn_tau > 0.0 && self.cqn_tau < 1.0) {
            return invalid(format!("cqn_tau must be in (0, 1), got {}", self.cqn_tau));
        }
        if !(0.0..1.0).contains(&self.cqn_min_quantile) {
            return invalid(format!(
                "cqn_min_quantile must be in [0, 1), got {}",
                self.cqn_min_quantile
            ));
        }
        if self.cqn_spline_df < 1 {
            return invalid("cqn_spline_df must be at least 1".to_string());
        }
        if self.grid_points < 3 || self.grid_range.0 >= self.grid_range.1 {
            return invalid(format!(
                "dispersion grid needs >= 3 points over an increasing range, got {} over {:?}",
                self.grid_points, self.grid_range
            ));
        }
        if !(self.trend_span > 0.0 && self.trend_span <= 1.0) {
            return invalid(format!("trend_span must be in (0, 1], got {}", self.trend_span));
        }
        if self.prior_df < 0.0 {
            return invalid(format!("prior_df must be non-negative, got {}", self.prior_df));
        }
        if self.pwf_bin_size == 0 {
            return invalid("pwf_bin_size must be positive".to_string());
        }
        if self.enrichment_method == EnrichmentMethod::Sampling && self.sampling_reps == 0 {
            return invalid("sampling_reps must be positive for the sampling method".to_string());
        }
        if self.gene_sets.is_some() && self.universes.is_empty() {
            return invalid("gene sets were given but no universes are configured".to_string());
        }
        for (i, universe) in self.universes.iter().enumerate() {
            if self.universes[..i].iter().any(|u| u.name == universe.name) {
                return invalid(format!("universe name '{}' is used more than once", universe.name));
            }
            if universe.categories.is_empty() {
                return invalid(format!("universe '{}' selects no categories", universe.name));
            }
            for a in [universe.alpha.all, universe.alpha.up, universe.alpha.down] {
                if !(a > 0.0 && a < 1.0) {
                    return invalid(format!(
                        "universe '{}' has alpha {} outside (0, 1)",
                        universe.name, a
                    ));
                }
            }
        }
        if !self
            .grouping_covariates
            .iter()
            .any(|c| c == &self.treatment_column)
        {
            return invalid(format!(
                "grouping_covariates {:?} must include the treatment column '{}'",
                self.grouping_covariates, self.treatment_column
            ));
        }
        Ok(())
    }

    /// Check that every named covariate exists among the sample-sheet columns
    pub fn validate_covariates(&self, columns: &[String]) -> Result<()> {
        let required = [
            &self.sample_column,
            &self.treatment_column,
            &self.replicate_column,
            &self.cell_line_column,
        ];
        for name in required.into_iter().chain(self.grouping_covariates.iter()) {
            if !columns.iter().any(|c| c == name) {
                return Err(DgeError::InvalidConfig {
                    reason: format!(
                        "covariate '{}' not found in sample sheet columns {:?}",
                        name, columns
                    ),
                });
            }
        }
        Ok(())
    }

    /// Minimum number of samples that must pass the CPM threshold
    pub fn min_samples(&self, n_samples: usize) -> usize {
        ((self.min_sample_fraction * n_samples as f64).ceil() as usize).max(1)
    }

    /// Return a required input path or a configuration error naming it
    pub fn require_path<'a>(&self, path: &'a Option<PathBuf>, name: &str) -> Result<&'a Path> {
        path.as_deref().ok_or_else(|| DgeError::InvalidConfig {
            reason: format!("missing required input path '{}'", name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_validate() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert!((config.fc_threshold - 0.263_034_405_833_794).abs() < 1e-12);
        assert_eq!(config.universes.len(), 2);
    }

    #[test]
    fn test_min_samples() {
        let config = PipelineConfig::default();
        assert_eq!(config.min_samples(8), 4);
        assert_eq!(config.min_samples(5), 3);
        assert_eq!(config.min_samples(1), 1);
    }

    #[test]
    fn test_rejects_bad_fraction() {
        let config = PipelineConfig {
            min_sample_fraction: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DgeError::InvalidConfig { .. })));
    }

    #[test]
    fn test_grouping_must_include_treatment() {
        let config = PipelineConfig {
            grouping_covariates: vec!["cell_line".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_universe_name_rejected() {
        let mut config = PipelineConfig::default();
        let mut copy = config.universes[0].clone();
        copy.categories = vec![CategoryFilter::new("C5", Some("GO:MF"))];
        config.universes.push(copy);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DgeError::InvalidConfig { .. }));
        assert!(err.to_string().contains("pathway"));
    }

    #[test]
    fn test_unknown_covariate_rejected() {
        let config = PipelineConfig {
            grouping_covariates: vec!["treatment".to_string(), "batch".to_string()],
            ..Default::default()
        };
        let columns: Vec<String> = ["sample", "treatment", "replicate", "cell_line"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let err = config.validate_covariates(&columns).unwrap_err();
        assert!(err.to_string().contains("batch"));
    }

    #[test]
    fn test_json_partial_override() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"min_cpm": 2.0, "bias_covariate": "gc_content",
                "universes": [{{"name": "hallmark", "categories": [{{"category": "H"}}]}}]}}"#
        )
        .unwrap();
        let config = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.min_cpm, 2.0);
        assert_eq!(config.bias_covariate, BiasCovariate::GcContent);
        assert_eq!(config.universes[0].alpha, SubsetAlpha::default());
        assert_eq!(config.alpha, 0.05);
        config.validate().unwrap();
    }

    #[test]
    fn test_category_filter() {
        let any_sub = CategoryFilter::new("H", None);
        assert!(any_sub.matches("H", ""));
        let kegg = CategoryFilter::new("C2", Some("CP:KEGG"));
        assert!(kegg.matches("C2", "CP:KEGG"));
        assert!(!kegg.matches("C2", "CP:REACTOME"));
    }
}
