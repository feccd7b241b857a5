//! Sample sheet and per-sample records

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::{DgeError, Result};

/// One sequenced library in the paired design
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    /// Treatment level (two levels in a valid design)
    pub treatment: String,
    /// Replicate / pairing identifier
    pub replicate: String,
    pub cell_line: String,
    /// Joined values of the configured grouping covariates
    pub group: String,
}

/// Tabular sample metadata: one row per sample, string-valued covariates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleSheet {
    /// Sample identifiers
    sample_ids: Vec<String>,
    /// Covariate columns in file order
    columns: Vec<String>,
    /// Column name -> value for each sample
    values: HashMap<String, Vec<String>>,
}

impl SampleSheet {
    /// Create an empty sheet for the given samples; duplicate ids are fatal
    pub fn new(sample_ids: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for id in &sample_ids {
            if !seen.insert(id) {
                return Err(DgeError::InvalidMetadata {
                    reason: format!("sample '{}' is listed more than once", id),
                });
            }
        }
        Ok(Self {
            sample_ids,
            columns: Vec::new(),
            values: HashMap::new(),
        })
    }

    /// Add a covariate column
    pub fn add_column(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} values for column '{}'", self.sample_ids.len(), name),
                got: format!("{} values", values.len()),
            });
        }
        if !self.values.contains_key(name) {
            self.columns.push(name.to_string());
        }
        self.values.insert(name.to_string(), values);
        Ok(())
    }

    /// Get sample IDs
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Get number of samples
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Column names in insertion order (the sample id column is included
    /// under the name it was read with)
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values of one covariate
    pub fn column(&self, name: &str) -> Option<&Vec<String>> {
        self.values.get(name)
    }

    /// Value of a covariate for a specific sample
    pub fn value(&self, column: &str, sample_idx: usize) -> Result<&str> {
        self.values
            .get(column)
            .and_then(|v| v.get(sample_idx))
            .map(|s| s.as_str())
            .ok_or_else(|| DgeError::InvalidMetadata {
                reason: format!(
                    "column '{}' or sample index {} not found",
                    column, sample_idx
                ),
            })
    }

    /// Sorted unique levels of a covariate
    pub fn levels(&self, column: &str) -> Option<Vec<String>> {
        self.values.get(column).map(|values| {
            let mut unique = values.clone();
            unique.sort();
            unique.dedup();
            unique
        })
    }

    /// Resolve the configured covariates into per-sample records.
    /// All covariates named by the configuration must exist.
    pub fn samples(&self, config: &PipelineConfig) -> Result<Vec<Sample>> {
        config.validate_covariates(&self.columns)?;

        (0..self.n_samples())
            .map(|i| {
                let group = config
                    .grouping_covariates
                    .iter()
                    .map(|c| self.value(c, i))
                    .collect::<Result<Vec<&str>>>()?
                    .join("_");
                let sample = Sample {
                    id: self.sample_ids[i].clone(),
                    treatment: self.value(&config.treatment_column, i)?.to_string(),
                    replicate: self.value(&config.replicate_column, i)?.to_string(),
                    cell_line: self.value(&config.cell_line_column, i)?.to_string(),
                    group,
                };
                if sample.treatment.is_empty() || sample.replicate.is_empty() {
                    return Err(DgeError::InvalidMetadata {
                        reason: format!("sample '{}' has an empty treatment or replicate", sample.id),
                    });
                }
                Ok(sample)
            })
            .collect()
    }
}
