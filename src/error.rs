//! Error types for rnaseq_dge

use thiserror::Error;

/// Main error type for the differential expression pipeline
#[derive(Error, Debug)]
pub enum DgeError {
    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid sample metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Annotation mismatch for gene {gene_id}: {reason}")]
    AnnotationMismatch { gene_id: String, reason: String },

    #[error("Invalid gene set database: {reason}")]
    InvalidGeneSets { reason: String },

    #[error("Invalid design: {reason}")]
    InvalidDesign { reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Numerical failure in {operation}: {details}")]
    NumericalFailure { operation: String, details: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, DgeError>;
