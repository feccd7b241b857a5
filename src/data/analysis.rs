//! Validated join of counts, sample sheet and annotation
//!
//! Every downstream stage works on an [`AnalysisSet`]: the count columns are
//! in sample-sheet order, the annotation rows are in count-matrix order, and
//! the paired design has been checked. Nothing is aligned by position.

use crate::config::PipelineConfig;
use crate::data::{CountMatrix, Gene, GeneAnnotation, Sample, SampleSheet};
use crate::error::{DgeError, Result};
use crate::glm::PairedDesign;

/// Counts, samples, genes and design of one cohort
#[derive(Debug, Clone)]
pub struct AnalysisSet {
    counts: CountMatrix,
    samples: Vec<Sample>,
    genes: Vec<Gene>,
    design: PairedDesign,
}

impl AnalysisSet {
    /// Join the inputs by identifier.
    ///
    /// Every sheet sample must have a count column; every counted gene must
    /// have exactly one annotation record with length and GC content.
    pub fn new(
        counts: &CountMatrix,
        sheet: &SampleSheet,
        annotation: &GeneAnnotation,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let samples = sheet.samples(config)?;

        let column_order = samples
            .iter()
            .map(|s| {
                counts.sample_index(&s.id).ok_or_else(|| DgeError::InvalidMetadata {
                    reason: format!("sample '{}' has no column in the count matrix", s.id),
                })
            })
            .collect::<Result<Vec<usize>>>()?;

        let extra = counts.n_samples() - column_order.len();
        if extra > 0 {
            log::debug!("Ignoring {} count columns not listed in the sample sheet", extra);
        }

        let counts = counts.subset_samples(&column_order)?;
        let genes = annotation.resolve(counts.gene_ids())?;

        Self::from_parts(counts, samples, genes, config.reference_level.as_deref())
    }

    /// Assemble from already aligned parts, re-checking the alignment
    pub fn from_parts(
        counts: CountMatrix,
        samples: Vec<Sample>,
        genes: Vec<Gene>,
        reference_level: Option<&str>,
    ) -> Result<Self> {
        if samples.len() != counts.n_samples() {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} samples", counts.n_samples()),
                got: format!("{} samples", samples.len()),
            });
        }
        for (s, id) in samples.iter().zip(counts.sample_ids()) {
            if &s.id != id {
                return Err(DgeError::InvalidMetadata {
                    reason: format!("sample '{}' is not aligned with count column '{}'", s.id, id),
                });
            }
        }
        if genes.len() != counts.n_genes() {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} annotated genes", counts.n_genes()),
                got: format!("{} annotated genes", genes.len()),
            });
        }
        for (g, id) in genes.iter().zip(counts.gene_ids()) {
            if &g.id != id {
                return Err(DgeError::AnnotationMismatch {
                    gene_id: id.clone(),
                    reason: format!("annotation row '{}' is out of order", g.id),
                });
            }
        }

        let design = PairedDesign::from_samples(&samples, reference_level)?;

        log::info!(
            "Analysis set: {} genes x {} samples ({} replicates)",
            counts.n_genes(),
            counts.n_samples(),
            design.replicates().len()
        );

        Ok(Self {
            counts,
            samples,
            genes,
            design,
        })
    }

    /// Keep only the genes whose mask entry is true
    pub fn retain_genes(&self, mask: &[bool]) -> Result<Self> {
        let counts = self.counts.retain_genes(mask)?;
        if counts.n_genes() == 0 {
            return Err(DgeError::EmptyData {
                reason: "no genes remain after filtering".to_string(),
            });
        }
        let genes = self
            .genes
            .iter()
            .zip(mask)
            .filter(|(_, &keep)| keep)
            .map(|(g, _)| g.clone())
            .collect();
        Ok(Self {
            counts,
            samples: self.samples.clone(),
            genes,
            design: self.design.clone(),
        })
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn genes(&self) -> &[Gene] {
        &self.genes
    }

    pub fn design(&self) -> &PairedDesign {
        &self.design
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    /// Transcript lengths in count-matrix order
    pub fn gene_lengths(&self) -> Vec<f64> {
        self.genes.iter().map(|g| g.length.unwrap_or(f64::NAN)).collect()
    }

    /// GC fractions in count-matrix order
    pub fn gc_content(&self) -> Vec<f64> {
        self.genes.iter().map(|g| g.gc_content.unwrap_or(f64::NAN)).collect()
    }
}
