//! Error types for bcnstat-di
//!
//! Everything recoverable (unresolved entities, duplicate keys, single bad
//! manifest entries, one failing source) is handled in-band by the pipeline
//! stages and surfaces as counters in the run report, not as errors here.
//! `PipelineError` covers only the conditions that abort a run.

use thiserror::Error;

/// Fatal pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Manifest has the wrong overall shape (individual bad entries are
    /// skipped and logged instead)
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Neighborhood dimension is unusable (wrong row count, bad catalog)
    #[error("Dimension error: {0}")]
    Dimension(String),

    /// Integrity validation failed on a critical table
    #[error("Integrity violation in {table}: {detail}")]
    Integrity { table: String, detail: String },

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared library error
    #[error("Common error: {0}")]
    Common(#[from] bcnstat_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Per-source extraction failures
///
/// Caught at the source boundary by the pipeline: the failing source is
/// skipped, its coverage records the error, and other sources proceed.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    /// Records present but not in the shape the descriptor promised
    #[error("Schema mismatch: {0}")]
    Schema(String),

    /// Source cannot run at all (missing file, missing credentials)
    #[error("Source not available: {0}")]
    NotAvailable(String),
}

/// Convenience Result type using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;
