//! Gene-level reference annotation

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::GeneSetIdType;
use crate::error::{DgeError, Result};

/// Reference data for one gene; immutable once loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gene {
    pub id: String,
    pub symbol: String,
    pub biotype: String,
    /// Entrez cross-references (possibly several, possibly none)
    pub entrez: Vec<String>,
    /// Transcript length in bp
    pub length: Option<f64>,
    /// GC content as a fraction in [0, 1]
    pub gc_content: Option<f64>,
}

impl Gene {
    /// Length, or an annotation error naming the gene
    pub fn require_length(&self) -> Result<f64> {
        match self.length {
            Some(l) if l > 0.0 && l.is_finite() => Ok(l),
            _ => Err(DgeError::AnnotationMismatch {
                gene_id: self.id.clone(),
                reason: "missing or non-positive transcript length".to_string(),
            }),
        }
    }

    /// GC content, or an annotation error naming the gene
    pub fn require_gc(&self) -> Result<f64> {
        match self.gc_content {
            Some(gc) if (0.0..=1.0).contains(&gc) => Ok(gc),
            _ => Err(DgeError::AnnotationMismatch {
                gene_id: self.id.clone(),
                reason: "missing or out-of-range GC content".to_string(),
            }),
        }
    }
}

/// Annotation table keyed by gene identifier
#[derive(Debug, Clone)]
pub struct GeneAnnotation {
    genes: Vec<Gene>,
    index: HashMap<String, usize>,
}

impl GeneAnnotation {
    /// Build the lookup; a gene id listed twice is ambiguous and fatal
    pub fn new(genes: Vec<Gene>) -> Result<Self> {
        let mut index = HashMap::with_capacity(genes.len());
        for (i, gene) in genes.iter().enumerate() {
            if index.insert(gene.id.clone(), i).is_some() {
                return Err(DgeError::AnnotationMismatch {
                    gene_id: gene.id.clone(),
                    reason: "gene has multiple annotation records".to_string(),
                });
            }
        }
        Ok(Self { genes, index })
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn get(&self, gene_id: &str) -> Option<&Gene> {
        self.index.get(gene_id).map(|&i| &self.genes[i])
    }

    /// Annotation records for the given ids, in the same order. Every id must
    /// be annotated with a usable length and GC content.
    pub fn resolve(&self, gene_ids: &[String]) -> Result<Vec<Gene>> {
        gene_ids
            .iter()
            .map(|id| {
                let gene = self.get(id).ok_or_else(|| DgeError::AnnotationMismatch {
                    gene_id: id.clone(),
                    reason: "gene is absent from the annotation".to_string(),
                })?;
                gene.require_length()?;
                gene.require_gc()?;
                Ok(gene.clone())
            })
            .collect()
    }

    /// Map external identifiers of the given type to gene ids.
    /// An Entrez id shared by several genes maps to all of them.
    pub fn identifier_map(&self, id_type: GeneSetIdType) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for gene in &self.genes {
            let keys: Vec<&str> = match id_type {
                GeneSetIdType::GeneId => vec![gene.id.as_str()],
                GeneSetIdType::Symbol => vec![gene.symbol.as_str()],
                GeneSetIdType::Entrez => gene.entrez.iter().map(|s| s.as_str()).collect(),
            };
            for key in keys.into_iter().filter(|k| !k.is_empty()) {
                map.entry(key.to_string()).or_default().push(gene.id.clone());
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gene(id: &str, symbol: &str, entrez: &[&str]) -> Gene {
        Gene {
            id: id.to_string(),
            symbol: symbol.to_string(),
            biotype: "protein_coding".to_string(),
            entrez: entrez.iter().map(|s| s.to_string()).collect(),
            length: Some(2000.0),
            gc_content: Some(0.45),
        }
    }

    #[test]
    fn test_duplicate_annotation_is_fatal() {
        let genes = vec![gene("ENSG1", "A", &[]), gene("ENSG1", "A", &[])];
        assert!(matches!(
            GeneAnnotation::new(genes),
            Err(DgeError::AnnotationMismatch { .. })
        ));
    }

    #[test]
    fn test_resolve_missing_gene() {
        let ann = GeneAnnotation::new(vec![gene("ENSG1", "A", &[])]).unwrap();
        let err = ann
            .resolve(&["ENSG1".to_string(), "ENSG9".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("ENSG9"));
    }

    #[test]
    fn test_resolve_requires_covariates() {
        let mut g = gene("ENSG1", "A", &[]);
        g.gc_content = None;
        let ann = GeneAnnotation::new(vec![g]).unwrap();
        assert!(ann.resolve(&["ENSG1".to_string()]).is_err());
    }

    #[test]
    fn test_entrez_map_shared_ids() {
        let ann = GeneAnnotation::new(vec![
            gene("ENSG1", "A", &["100", "101"]),
            gene("ENSG2", "B", &["101"]),
        ])
        .unwrap();
        let map = ann.identifier_map(GeneSetIdType::Entrez);
        assert_eq!(map["100"], vec!["ENSG1".to_string()]);
        assert_eq!(map["101"].len(), 2);
        let by_symbol = ann.identifier_map(GeneSetIdType::Symbol);
        assert_eq!(by_symbol["B"], vec!["ENSG2".to_string()]);
    }
}
