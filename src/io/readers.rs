//! Tab-separated input tables
//!
//! All readers use `#` for comment lines and expect one header row. Errors
//! name the offending gene or sample; rows are never dropped silently.

use std::fs::File;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use ndarray::Array2;

use super::results::{DgeRecord, DgeResults};
use crate::config::PipelineConfig;
use crate::data::{CountMatrix, Gene, GeneAnnotation, GeneSetCollection, MembershipRow, SampleSheet};
use crate::error::{DgeError, Result};

fn tsv_reader(path: &Path) -> Result<csv::Reader<File>> {
    let file = File::open(path)?;
    Ok(ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .trim(Trim::All)
        .flexible(true)
        .from_reader(file))
}

/// Position of each required column in the header
fn column_positions(headers: &StringRecord, required: &[&str]) -> std::result::Result<Vec<usize>, String> {
    required
        .iter()
        .map(|name| {
            headers
                .iter()
                .position(|h| h == *name)
                .ok_or_else(|| format!("missing column '{}'", name))
        })
        .collect()
}

/// Sample name of a count-matrix header: directory and `.bam` suffix removed
pub fn sample_name_from_header(header: &str) -> &str {
    let base = header.rsplit(['/', '\\']).next().unwrap_or(header);
    base.strip_suffix(".bam").unwrap_or(base)
}

/// Column of `id` among the sample headers: the literal header text wins,
/// then the stripped file name. More than one match is an error.
fn sample_column(id: &str, raw: &[&str], names: &[&str]) -> Result<usize> {
    for candidates in [raw, names] {
        let hits: Vec<usize> = (0..candidates.len()).filter(|&i| candidates[i] == id).collect();
        match hits.as_slice() {
            [] => continue,
            [pos] => return Ok(*pos),
            _ => {
                let matched: Vec<&str> = hits.iter().map(|&i| raw[i]).collect();
                return Err(DgeError::InvalidCountMatrix {
                    reason: format!("sample '{}' matches several count columns {:?}", id, matched),
                });
            }
        }
    }
    Err(DgeError::InvalidMetadata {
        reason: format!("sample '{}' has no column in the count matrix", id),
    })
}

/// Read a count matrix.
///
/// With `samples` given, only those columns are parsed, in that order; a
/// sample without a column is an error. Otherwise every column is read.
pub fn read_count_matrix<P: AsRef<Path>>(path: P, samples: Option<&[String]>) -> Result<CountMatrix> {
    let mut reader = tsv_reader(path.as_ref())?;
    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(DgeError::InvalidCountMatrix {
            reason: "header needs a gene column and at least one sample column".to_string(),
        });
    }

    let raw: Vec<&str> = headers.iter().skip(1).collect();
    let names: Vec<&str> = raw.iter().map(|h| sample_name_from_header(h)).collect();
    let (columns, sample_ids): (Vec<usize>, Vec<String>) = match samples {
        Some(wanted) => {
            let cols = wanted
                .iter()
                .map(|id| sample_column(id, &raw, &names).map(|pos| pos + 1))
                .collect::<Result<Vec<usize>>>()?;
            (cols, wanted.to_vec())
        }
        None => ((1..headers.len()).collect(), names.iter().map(|s| s.to_string()).collect()),
    };

    let mut gene_ids = Vec::new();
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        let gene = record.get(0).unwrap_or("").to_string();
        if record.len() != headers.len() {
            return Err(DgeError::InvalidCountMatrix {
                reason: format!(
                    "gene '{}' has {} fields, expected {}",
                    gene,
                    record.len(),
                    headers.len()
                ),
            });
        }
        for (&col, sample) in columns.iter().zip(&sample_ids) {
            let field = &record[col];
            let count: f64 = field.parse().map_err(|_| DgeError::InvalidCountMatrix {
                reason: format!("count '{}' for gene '{}' in sample '{}' is not a number", field, gene, sample),
            })?;
            values.push(count);
        }
        gene_ids.push(gene);
    }

    if gene_ids.is_empty() {
        return Err(DgeError::EmptyData {
            reason: "no genes found in count matrix".to_string(),
        });
    }

    let counts = Array2::from_shape_vec((gene_ids.len(), sample_ids.len()), values).map_err(|e| {
        DgeError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    log::info!("Read count matrix: {} genes x {} samples", gene_ids.len(), sample_ids.len());
    CountMatrix::new(counts, gene_ids, sample_ids)
}

/// Read the sample sheet. Every column is kept; the sample id column is the
/// configured `sample_column`.
pub fn read_sample_sheet<P: AsRef<Path>>(path: P, config: &PipelineConfig) -> Result<SampleSheet> {
    let mut reader = tsv_reader(path.as_ref())?;
    let headers = reader.headers()?.clone();
    let id_col = headers
        .iter()
        .position(|h| h == config.sample_column)
        .ok_or_else(|| DgeError::InvalidMetadata {
            reason: format!("sample sheet has no column '{}'", config.sample_column),
        })?;

    let mut ids = Vec::new();
    let mut columns: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        let id = record.get(id_col).unwrap_or("").to_string();
        if record.len() != headers.len() {
            return Err(DgeError::InvalidMetadata {
                reason: format!(
                    "row for sample '{}' has {} fields, expected {}",
                    id,
                    record.len(),
                    headers.len()
                ),
            });
        }
        if id.is_empty() {
            return Err(DgeError::InvalidMetadata {
                reason: "sample sheet row without a sample id".to_string(),
            });
        }
        for (c, field) in record.iter().enumerate() {
            columns[c].push(field.to_string());
        }
        ids.push(id);
    }

    if ids.is_empty() {
        return Err(DgeError::EmptyData {
            reason: "no samples found in sample sheet".to_string(),
        });
    }

    let mut sheet = SampleSheet::new(ids)?;
    for (name, values) in headers.iter().zip(columns) {
        sheet.add_column(name, values)?;
    }
    log::info!("Read sample sheet: {} samples, {} columns", sheet.n_samples(), headers.len());
    Ok(sheet)
}

fn parse_optional(field: &str) -> std::result::Result<Option<f64>, ()> {
    if field.is_empty() || field.eq_ignore_ascii_case("NA") {
        return Ok(None);
    }
    field.parse::<f64>().map(Some).map_err(|_| ())
}

fn split_ids(field: &str) -> Vec<String> {
    if field.eq_ignore_ascii_case("NA") {
        return Vec::new();
    }
    field
        .split([';', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read the gene annotation table.
/// GC values above 1 are taken as percentages.
pub fn read_annotation<P: AsRef<Path>>(path: P) -> Result<GeneAnnotation> {
    let mut reader = tsv_reader(path.as_ref())?;
    let headers = reader.headers()?.clone();
    let cols = column_positions(
        &headers,
        &["gene_id", "gene_name", "gene_biotype", "entrezid", "length", "gc_content"],
    )
    .map_err(|reason| DgeError::InvalidInput {
        reason: format!("annotation table: {}", reason),
    })?;

    let mut genes = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        let field = |k: usize| record.get(cols[k]).unwrap_or("");
        let id = field(0).to_string();
        let numeric = |k: usize, name: &str| {
            parse_optional(field(k)).map_err(|_| DgeError::AnnotationMismatch {
                gene_id: id.clone(),
                reason: format!("{} '{}' is not a number", name, field(k)),
            })
        };
        let length = numeric(4, "length")?;
        let gc_content = numeric(5, "gc_content")?.map(|gc| if gc > 1.0 { gc / 100.0 } else { gc });
        genes.push(Gene {
            id: id.clone(),
            symbol: field(1).to_string(),
            biotype: field(2).to_string(),
            entrez: split_ids(field(3)),
            length,
            gc_content,
        });
    }

    log::info!("Read annotation for {} genes", genes.len());
    GeneAnnotation::new(genes)
}

fn parse_flag(field: &str) -> Option<bool> {
    match field.to_ascii_uppercase().as_str() {
        "TRUE" | "T" | "1" => Some(true),
        "FALSE" | "F" | "0" | "" => Some(false),
        _ => None,
    }
}

/// Read a long-format gene-set table (one membership per row)
pub fn read_gene_sets<P: AsRef<Path>>(path: P) -> Result<GeneSetCollection> {
    let mut reader = tsv_reader(path.as_ref())?;
    let headers = reader.headers()?.clone();
    let cols = column_positions(&headers, &["gs_name", "gs_cat", "gs_subcat", "gene"])
        .map_err(|reason| DgeError::InvalidGeneSets { reason })?;
    let exclude_col = headers.iter().position(|h| h == "exclude");

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        let field = |c: usize| record.get(c).unwrap_or("");
        let excluded = match exclude_col {
            Some(c) => parse_flag(field(c)).ok_or_else(|| DgeError::InvalidGeneSets {
                reason: format!("row {}: exclude flag '{}' is not TRUE/FALSE/1/0", line + 2, field(c)),
            })?,
            None => false,
        };
        rows.push(MembershipRow {
            name: field(cols[0]).to_string(),
            category: field(cols[1]).to_string(),
            subcategory: field(cols[2]).to_string(),
            member: field(cols[3]).to_string(),
            excluded,
        });
    }

    let collection = GeneSetCollection::from_rows(rows)?;
    log::info!("Read {} gene sets", collection.len());
    Ok(collection)
}

fn parse_number(field: &str, gene: &str, column: &str) -> Result<f64> {
    match parse_optional(field) {
        Ok(v) => Ok(v.unwrap_or(f64::NAN)),
        Err(()) => Err(DgeError::InvalidInput {
            reason: format!("{} '{}' of gene '{}' is not a number", column, field, gene),
        }),
    }
}

/// Read a table written by [`write_dge_results`](super::write_dge_results).
/// `alpha` and `fc_threshold` are not stored in the table and are passed in.
pub fn read_dge_results<P: AsRef<Path>>(path: P, alpha: f64, fc_threshold: f64) -> Result<DgeResults> {
    let mut reader = tsv_reader(path.as_ref())?;
    let headers = reader.headers()?.clone();
    let names = [
        "gene_id",
        "gene_name",
        "logCPM",
        "logFC",
        "PValue",
        "FDR",
        "biotype",
        "entrezid",
        "length",
        "gc_content",
        "rankingStat",
        "signedRank",
        "DE",
    ];
    let cols = column_positions(&headers, &names).map_err(|reason| DgeError::InvalidInput {
        reason: format!("DGE table: {}", reason),
    })?;

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        let field = |k: usize| record.get(cols[k]).unwrap_or("");
        let gene = field(0).to_string();
        let num = |k: usize| parse_number(field(k), &gene, names[k]);
        let optional = |k: usize| num(k).map(|v| if v.is_finite() { Some(v) } else { None });
        let de = parse_flag(field(12)).ok_or_else(|| DgeError::InvalidInput {
            reason: format!("DE flag '{}' of gene '{}' is not TRUE/FALSE", field(12), gene),
        })?;
        records.push(DgeRecord {
            gene_name: field(1).to_string(),
            log_cpm: num(2)?,
            log_fc: num(3)?,
            pvalue: num(4)?,
            fdr: num(5)?,
            biotype: field(6).to_string(),
            entrez: split_ids(field(7)),
            length: optional(8)?,
            gc_content: optional(9)?,
            ranking_stat: num(10)?,
            signed_rank: num(11)?,
            de,
            gene_id: gene.clone(),
        });
    }

    log::info!("Read DGE table with {} genes", records.len());
    Ok(DgeResults {
        records,
        alpha,
        fc_threshold,
    })
}
