//! Extraction collaborator interface
//!
//! Raw datasets enter the pipeline through the `Extractor` trait: one
//! implementation per source, each producing `RawObservation` records plus
//! coverage metadata. The engine depends only on this trait; fetching,
//! rate limiting and format quirks live behind it. One failing extractor
//! never prevents other sources from being processed.

pub mod json_dataset;
pub mod manifest;

pub use json_dataset::JsonDatasetExtractor;
pub use manifest::{DatasetDescriptor, Granularity, Manifest, MetricKind};

use crate::error::ExtractionError;
use crate::types::RawObservation;
use async_trait::async_trait;
use serde::Serialize;

/// Per-source coverage metadata, consumed by run-level logging
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceCoverage {
    /// Distinct years seen in the source's periods, ascending
    pub years_covered: Vec<i32>,
    pub records_count: usize,
    /// Row-level problems that were skipped, for diagnostics
    pub errors: Vec<String>,
}

/// One source's extraction output
#[derive(Debug, Default)]
pub struct Extraction {
    pub records: Vec<RawObservation>,
    pub coverage: SourceCoverage,
}

/// Extractor trait - all sources implement this
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extractor identifier used in logs (e.g. "json:idescat-income-2021")
    fn name(&self) -> &str;

    /// Source tag stamped on records this extractor emits
    fn source_tag(&self) -> &str;

    /// Extract all records from the source
    ///
    /// # Returns
    /// * `Ok(Extraction)` - records plus coverage metadata
    /// * `Err(_)` - extraction failed (the pipeline skips this source and
    ///   continues with the others)
    async fn extract(&self) -> Result<Extraction, ExtractionError>;
}
