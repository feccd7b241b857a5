//! Differential expression results structure

use serde::{Deserialize, Serialize};

/// One gene of the differential expression table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DgeRecord {
    pub gene_id: String,
    pub gene_name: String,
    /// Average log2 CPM
    pub log_cpm: f64,
    /// log2 fold change of the treated level over the reference
    pub log_fc: f64,
    pub pvalue: f64,
    pub fdr: f64,
    pub biotype: String,
    pub entrez: Vec<String>,
    pub length: Option<f64>,
    pub gc_content: Option<f64>,
    /// -log10(p)
    pub ranking_stat: f64,
    /// sign(logFC) * rankingStat, 0 when logFC is 0
    pub signed_rank: f64,
    /// FDR < alpha
    pub de: bool,
}

impl DgeRecord {
    /// The GLM fit of this gene failed and its statistics are NA
    pub fn is_missing(&self) -> bool {
        !self.pvalue.is_finite()
    }
}

/// Which DE genes a gene-set test looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    All,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 3] = [Direction::All, Direction::Up, Direction::Down];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::All => "all",
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Results of the differential test, sorted by p-value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DgeResults {
    pub records: Vec<DgeRecord>,
    /// FDR threshold behind the DE flag
    pub alpha: f64,
    /// log2 fold-change threshold of the null interval
    pub fc_threshold: f64,
}

impl DgeResults {
    pub fn n_genes(&self) -> usize {
        self.records.len()
    }

    /// Whether a record counts as DE in the given direction
    pub fn is_de(record: &DgeRecord, direction: Direction) -> bool {
        record.de
            && match direction {
                Direction::All => true,
                Direction::Up => record.log_fc > 0.0,
                Direction::Down => record.log_fc < 0.0,
            }
    }

    /// DE flag of every record in the given direction, in table order
    pub fn de_indicator(&self, direction: Direction) -> Vec<bool> {
        self.records.iter().map(|r| Self::is_de(r, direction)).collect()
    }

    /// Identifiers of the DE genes in the given direction
    pub fn de_genes(&self, direction: Direction) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| Self::is_de(r, direction))
            .map(|r| r.gene_id.as_str())
            .collect()
    }

    pub fn get(&self, gene_id: &str) -> Option<&DgeRecord> {
        self.records.iter().find(|r| r.gene_id == gene_id)
    }

    /// Summary statistics
    pub fn summary(&self) -> ResultsSummary {
        ResultsSummary {
            total_genes: self.n_genes(),
            genes_tested: self.records.iter().filter(|r| !r.is_missing()).count(),
            significant: self.de_genes(Direction::All).len(),
            upregulated: self.de_genes(Direction::Up).len(),
            downregulated: self.de_genes(Direction::Down).len(),
            alpha: self.alpha,
            fc_threshold: self.fc_threshold,
        }
    }
}

/// Summary of the differential test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsSummary {
    pub total_genes: usize,
    pub genes_tested: usize,
    pub significant: usize,
    pub upregulated: usize,
    pub downregulated: usize,
    pub alpha: f64,
    pub fc_threshold: f64,
}

impl std::fmt::Display for ResultsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Differential Expression Summary")?;
        writeln!(f, "===============================")?;
        writeln!(f, "Total genes: {}", self.total_genes)?;
        writeln!(f, "Genes tested: {}", self.genes_tested)?;
        writeln!(
            f,
            "DE (FDR < {}, |log2FC| > {:.3}): {}",
            self.alpha, self.fc_threshold, self.significant
        )?;
        writeln!(f, "  Up-regulated: {}", self.upregulated)?;
        writeln!(f, "  Down-regulated: {}", self.downregulated)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, log_fc: f64, fdr: f64, alpha: f64) -> DgeRecord {
        DgeRecord {
            gene_id: id.to_string(),
            gene_name: id.to_string(),
            log_cpm: 5.0,
            log_fc,
            pvalue: fdr / 2.0,
            fdr,
            biotype: "protein_coding".to_string(),
            entrez: vec![],
            length: Some(1000.0),
            gc_content: Some(0.5),
            ranking_stat: -(fdr / 2.0).log10(),
            signed_rank: log_fc.signum() * -(fdr / 2.0).log10(),
            de: fdr < alpha,
        }
    }

    #[test]
    fn test_direction_subsets() {
        let results = DgeResults {
            records: vec![
                record("up", 2.0, 0.01, 0.05),
                record("down", -1.5, 0.02, 0.05),
                record("flat", 0.1, 0.6, 0.05),
            ],
            alpha: 0.05,
            fc_threshold: 0.263,
        };
        assert_eq!(results.de_genes(Direction::All), vec!["up", "down"]);
        assert_eq!(results.de_genes(Direction::Up), vec!["up"]);
        assert_eq!(results.de_indicator(Direction::Down), vec![false, true, false]);
        let summary = results.summary();
        assert_eq!(summary.significant, 2);
        assert_eq!(summary.upregulated, 1);
        assert!(summary.to_string().contains("Up-regulated: 1"));
    }

    #[test]
    fn test_missing_record() {
        let mut r = record("na", f64::NAN, f64::NAN, 0.05);
        r.pvalue = f64::NAN;
        assert!(r.is_missing());
        assert!(!r.de);
    }
}
