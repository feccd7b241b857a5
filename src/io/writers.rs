//! Tab-separated output tables and the JSON run summary

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::Array2;

use super::results::DgeResults;
use super::summary::RunSummary;
use crate::diagnostics::BiasDiagnostic;
use crate::dispersion::DispersionEstimates;
use crate::enrichment::EnrichmentTable;
use crate::error::{DgeError, Result};

/// Fixed-point with six decimals, `NA` when not finite
fn fixed(v: f64) -> String {
    if v.is_finite() {
        format!("{:.6}", v)
    } else {
        "NA".to_string()
    }
}

/// Scientific with six decimals, `NA` when not finite
fn scientific(v: f64) -> String {
    if v.is_finite() {
        format!("{:.6e}", v)
    } else {
        "NA".to_string()
    }
}

fn optional(v: Option<f64>) -> String {
    match v {
        Some(x) if x.is_finite() => format!("{}", x),
        _ => "NA".to_string(),
    }
}

fn flag(b: bool) -> &'static str {
    if b {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// Write the differential expression table in result order
pub fn write_dge_results<P: AsRef<Path>>(path: P, results: &DgeResults) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);

    writeln!(
        file,
        "gene_id\tgene_name\tlogCPM\tlogFC\tPValue\tFDR\tbiotype\tentrezid\tlength\tgc_content\trankingStat\tsignedRank\tDE"
    )?;
    for r in &results.records {
        let entrez = if r.entrez.is_empty() {
            "NA".to_string()
        } else {
            r.entrez.join(";")
        };
        writeln!(
            file,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            r.gene_id,
            r.gene_name,
            fixed(r.log_cpm),
            fixed(r.log_fc),
            scientific(r.pvalue),
            scientific(r.fdr),
            r.biotype,
            entrez,
            optional(r.length),
            optional(r.gc_content),
            fixed(r.ranking_stat),
            fixed(r.signed_rank),
            flag(r.de),
        )?;
    }

    file.flush()?;
    Ok(())
}

/// Write a genes x samples matrix with gene ids as row names
pub fn write_matrix<P: AsRef<Path>>(
    path: P,
    matrix: &Array2<f64>,
    gene_ids: &[String],
    sample_ids: &[String],
) -> Result<()> {
    if matrix.dim() != (gene_ids.len(), sample_ids.len()) {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} x {}", gene_ids.len(), sample_ids.len()),
            got: format!("{} x {}", matrix.nrows(), matrix.ncols()),
        });
    }
    let mut file = BufWriter::new(File::create(path)?);

    writeln!(file, "gene_id\t{}", sample_ids.join("\t"))?;
    for (gene, row) in gene_ids.iter().zip(matrix.outer_iter()) {
        let values: Vec<String> = row.iter().map(|&v| fixed(v)).collect();
        writeln!(file, "{}\t{}", gene, values.join("\t"))?;
    }

    file.flush()?;
    Ok(())
}

/// Write trended and tagwise NB dispersions per gene, in fit order
pub fn write_dispersions<P: AsRef<Path>>(
    path: P,
    gene_ids: &[String],
    dispersions: &DispersionEstimates,
) -> Result<()> {
    if dispersions.trended.len() != gene_ids.len() || dispersions.tagwise.len() != gene_ids.len() {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} dispersions", gene_ids.len()),
            got: format!(
                "{} trended and {} tagwise",
                dispersions.trended.len(),
                dispersions.tagwise.len()
            ),
        });
    }
    let mut file = BufWriter::new(File::create(path)?);

    writeln!(file, "gene_id	trended	tagwise")?;
    for ((gene, &trended), &tagwise) in gene_ids.iter().zip(&dispersions.trended).zip(&dispersions.tagwise) {
        writeln!(file, "{}	{}	{}", gene, scientific(trended), scientific(tagwise))?;
    }

    file.flush()?;
    Ok(())
}

/// Write one enrichment family
pub fn write_enrichment_table<P: AsRef<Path>>(path: P, table: &EnrichmentTable) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);

    writeln!(file, "category\tnumDE\texpected\tsetSize\tpvalue\tFDR\tsignificant")?;
    for row in &table.rows {
        writeln!(
            file,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.category,
            row.num_de,
            fixed(row.expected),
            row.set_size,
            scientific(row.pvalue),
            scientific(row.fdr),
            flag(row.significant),
        )?;
    }

    file.flush()?;
    Ok(())
}

/// Write the bias diagnostics table
pub fn write_bias_diagnostics<P: AsRef<Path>>(path: P, rows: &[BiasDiagnostic]) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);

    writeln!(file, "stage\tPC\tvariance_explained\tcor_gc\tcor_length")?;
    for row in rows {
        writeln!(
            file,
            "{}\tPC{}\t{}\t{}\t{}",
            row.stage,
            row.component,
            fixed(row.variance_explained),
            fixed(row.cor_gc),
            fixed(row.cor_length),
        )?;
    }

    file.flush()?;
    Ok(())
}

/// Write the run summary as pretty-printed JSON
pub fn write_summary<P: AsRef<Path>>(path: P, summary: &RunSummary) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{read_dge_results, DgeRecord, Direction};
    use crate::enrichment::EnrichmentResult;
    use crate::config::EnrichmentMethod;
    use tempfile::NamedTempFile;

    fn record(id: &str, log_fc: f64, pvalue: f64) -> DgeRecord {
        DgeRecord {
            gene_id: id.to_string(),
            gene_name: format!("SYM{}", id),
            log_cpm: 4.123456789,
            log_fc,
            pvalue,
            fdr: (pvalue * 3.0).min(1.0),
            biotype: "protein_coding".to_string(),
            entrez: vec!["7157".to_string(), "7158".to_string()],
            length: Some(2345.0),
            gc_content: Some(0.4312),
            ranking_stat: -pvalue.log10(),
            signed_rank: log_fc.signum() * -pvalue.log10(),
            de: pvalue * 3.0 < 0.05,
        }
    }

    #[test]
    fn test_dge_table_round_trip() {
        let mut missing = record("g3", f64::NAN, f64::NAN);
        missing.fdr = f64::NAN;
        missing.ranking_stat = f64::NAN;
        missing.signed_rank = f64::NAN;
        missing.entrez.clear();
        missing.length = None;
        missing.de = false;
        let results = DgeResults {
            records: vec![record("g1", 2.5, 1.23456789e-12), record("g2", -0.75, 0.0321), missing],
            alpha: 0.05,
            fc_threshold: 0.263,
        };

        let file = NamedTempFile::new().unwrap();
        write_dge_results(file.path(), &results).unwrap();
        let back = read_dge_results(file.path(), 0.05, 0.263).unwrap();

        assert_eq!(back.n_genes(), 3);
        for (a, b) in results.records.iter().zip(&back.records) {
            assert_eq!(a.gene_id, b.gene_id);
            assert_eq!(a.gene_name, b.gene_name);
            assert_eq!(a.entrez, b.entrez);
            assert_eq!(a.length, b.length);
            assert_eq!(a.de, b.de);
            for (x, y) in [(a.log_cpm, b.log_cpm), (a.log_fc, b.log_fc), (a.ranking_stat, b.ranking_stat)] {
                assert!((x.is_nan() && y.is_nan()) || (x - y).abs() < 1e-6);
            }
            for (x, y) in [(a.pvalue, b.pvalue), (a.fdr, b.fdr)] {
                assert!((x.is_nan() && y.is_nan()) || ((x - y) / x).abs() < 1e-6);
            }
        }
        assert!(back.records[2].pvalue.is_nan());
        assert_eq!(back.records[2].length, None);
    }

    #[test]
    fn test_zero_pvalue_keeps_finite_rank() {
        let mut strongest = record("g1", 7.2, 0.0);
        strongest.fdr = 0.0;
        strongest.ranking_stat = -f64::MIN_POSITIVE.log10();
        strongest.signed_rank = strongest.ranking_stat;
        strongest.de = true;
        let results = DgeResults {
            records: vec![strongest.clone()],
            alpha: 0.05,
            fc_threshold: 0.263,
        };

        let file = NamedTempFile::new().unwrap();
        write_dge_results(file.path(), &results).unwrap();
        let back = read_dge_results(file.path(), 0.05, 0.263).unwrap();
        let r = &back.records[0];
        assert_eq!(r.pvalue, 0.0);
        assert_eq!(r.fdr, 0.0);
        assert!(r.ranking_stat.is_finite() && r.signed_rank.is_finite());
        assert!((r.ranking_stat - strongest.ranking_stat).abs() < 1e-6);
        assert!((r.signed_rank - strongest.signed_rank).abs() < 1e-6);
        assert!(r.de);
    }

    #[test]
    fn test_enrichment_table_output() {
        let table = EnrichmentTable {
            universe: "pathway".to_string(),
            subset: Direction::Up,
            alpha: 0.05,
            method: EnrichmentMethod::Wallenius,
            n_de: 3,
            rows: vec![EnrichmentResult {
                category: "KEGG_APOPTOSIS".to_string(),
                num_de: 2,
                expected: 0.25,
                set_size: 5,
                pvalue: 0.001,
                fdr: 0.002,
                significant: true,
            }],
        };
        let file = NamedTempFile::new().unwrap();
        write_enrichment_table(file.path(), &table).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "category\tnumDE\texpected\tsetSize\tpvalue\tFDR\tsignificant");
        assert!(lines[1].starts_with("KEGG_APOPTOSIS\t2\t0.250000\t5\t"));
        assert!(lines[1].ends_with("TRUE"));
    }

    #[test]
    fn test_dispersions_table() {
        let disp = DispersionEstimates {
            common: 0.05,
            trended: vec![0.04, 0.06],
            tagwise: vec![0.03, f64::NAN],
            prior_n: 5.0,
        };
        let genes = vec!["a".to_string(), "b".to_string()];
        let file = NamedTempFile::new().unwrap();
        write_dispersions(file.path(), &genes, &disp).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "gene_id\ttrended\ttagwise");
        assert_eq!(lines[1], "a\t4.000000e-2\t3.000000e-2");
        assert!(lines[2].ends_with("\tNA"));
        assert!(write_dispersions(file.path(), &genes[..1], &disp).is_err());
    }

    #[test]
    fn test_matrix_shape_checked() {
        let m = Array2::zeros((2, 2));
        let file = NamedTempFile::new().unwrap();
        let genes = vec!["a".to_string(), "b".to_string()];
        assert!(write_matrix(file.path(), &m, &genes, &["s1".to_string()]).is_err());
        write_matrix(file.path(), &m, &genes, &["s1".to_string(), "s2".to_string()]).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(text.lines().count(), 3);
    }
}
