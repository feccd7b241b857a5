//! Gene x sample read counts keyed by identifier

use std::collections::HashSet;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{DgeError, Result};

/// Raw read counts, rows are genes and columns are samples
#[derive(Debug, Clone)]
pub struct CountMatrix {
    counts: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Validate shape, values and identifier uniqueness
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }

        if sample_ids.len() != n_samples {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }

        // Report the first offending cell rather than a generic failure
        for ((i, j), &x) in counts.indexed_iter() {
            if x < 0.0 || !x.is_finite() {
                return Err(DgeError::InvalidCountMatrix {
                    reason: format!(
                        "count {} for gene '{}' in sample '{}' is not a non-negative finite value",
                        x, gene_ids[i], sample_ids[j]
                    ),
                });
            }
        }

        if let Some(dup) = first_duplicate(&gene_ids) {
            return Err(DgeError::InvalidCountMatrix {
                reason: format!("gene '{}' appears more than once", dup),
            });
        }
        if let Some(dup) = first_duplicate(&sample_ids) {
            return Err(DgeError::InvalidCountMatrix {
                reason: format!("sample '{}' appears more than once", dup),
            });
        }

        if counts.iter().any(|&x| x != x.round()) {
            log::warn!(
                "Some count values are not integers. Negative binomial modelling expects \
                 integer counts."
            );
        }

        Ok(Self {
            counts,
            gene_ids,
            sample_ids,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Counts of one gene across samples
    pub fn gene_counts(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene_idx)
    }

    /// Column of a sample, if present
    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    /// Keep the rows whose mask entry is true
    pub fn retain_genes(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.n_genes() {
            return Err(DgeError::DimensionMismatch {
                expected: format!("mask of length {}", self.n_genes()),
                got: format!("mask of length {}", mask.len()),
            });
        }
        let rows: Vec<usize> = (0..mask.len()).filter(|&i| mask[i]).collect();
        let gene_ids = rows.iter().map(|&i| self.gene_ids[i].clone()).collect();
        Self::new(self.counts.select(Axis(0), &rows), gene_ids, self.sample_ids.clone())
    }

    /// Reorder (or drop) sample columns; `columns` gives the new order
    pub fn subset_samples(&self, columns: &[usize]) -> Result<Self> {
        let sample_ids = columns.iter().map(|&j| self.sample_ids[j].clone()).collect();
        Self::new(self.counts.select(Axis(1), columns), self.gene_ids.clone(), sample_ids)
    }
}

fn first_duplicate(ids: &[String]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().find(|id| !seen.insert(id.as_str())).map(|s| s.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_count_matrix_creation() {
        let counts = array![[10.0, 20.0, 30.0], [5.0, 15.0, 25.0]];
        let matrix = CountMatrix::new(counts, ids("gene", 2), ids("s", 3)).unwrap();
        assert_eq!(matrix.n_genes(), 2);
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.sample_index("s3"), Some(2));
        assert_eq!(matrix.gene_counts(1).to_vec(), vec![5.0, 15.0, 25.0]);
    }

    #[test]
    fn test_negative_counts_name_the_cell() {
        let counts = array![[10.0, -5.0], [5.0, 15.0]];
        let err = CountMatrix::new(counts, ids("gene", 2), ids("s", 2)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("gene1") && msg.contains("s2"), "{}", msg);
    }

    #[test]
    fn test_duplicate_gene_rejected() {
        let counts = array![[1.0, 2.0], [3.0, 4.0]];
        let genes = vec!["g".to_string(), "g".to_string()];
        assert!(CountMatrix::new(counts, genes, ids("s", 2)).is_err());
    }

    #[test]
    fn test_subset_samples_reorders() {
        let counts = array![[10.0, 20.0, 30.0], [5.0, 15.0, 25.0]];
        let matrix = CountMatrix::new(counts, ids("gene", 2), ids("s", 3)).unwrap();
        let sub = matrix.subset_samples(&[2, 0]).unwrap();
        assert_eq!(sub.sample_ids(), &["s3".to_string(), "s1".to_string()]);
        assert_eq!(sub.counts()[[1, 0]], 25.0);
    }

    #[test]
    fn test_retain_genes_shrinks_rows() {
        let counts = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let matrix = CountMatrix::new(counts, ids("gene", 3), ids("s", 2)).unwrap();
        let kept = matrix.retain_genes(&[true, false, true]).unwrap();
        assert_eq!(kept.gene_ids(), &["gene1".to_string(), "gene3".to_string()]);
        assert_eq!(kept.counts()[[1, 1]], 6.0);
        assert!(matrix.retain_genes(&[true]).is_err());
    }
}
