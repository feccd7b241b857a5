//! Input/Output of pipeline tables

mod readers;
mod results;
mod summary;
mod writers;

pub use readers::{
    read_annotation, read_count_matrix, read_dge_results, read_gene_sets, read_sample_sheet, sample_name_from_header,
};
pub use results::{DgeRecord, DgeResults, Direction, ResultsSummary};
pub use summary::{FamilySummary, RunSummary};
pub use writers::{
    write_bias_diagnostics, write_dge_results, write_dispersions, write_enrichment_table, write_matrix, write_summary,
};
