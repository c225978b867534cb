//! Reference extractor reading JSON dataset files
//!
//! Reads the flat JSON exports named by the manifest: an array of row
//! objects, each carrying a location (name, code and/or coordinates), a
//! raw period string, and a `metrics` object. One observation is emitted
//! per (row, schema metric) pair; metrics absent from the descriptor's
//! schema are ignored. Bad rows are skipped and recorded in coverage,
//! never fatal.

use crate::error::ExtractionError;
use crate::extract::{DatasetDescriptor, Extraction, Extractor};
use crate::types::{RawLocation, RawObservation};
use async_trait::async_trait;
use bcnstat_common::geo::Point;
use bcnstat_common::period::parse_period;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// One row of a JSON dataset file
#[derive(Debug, Deserialize)]
struct RowRecord {
    /// Free-text neighborhood name
    #[serde(default)]
    neighborhood: Option<String>,
    /// Administrative code, preferred over the name when present
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    period: String,
    /// Row-level source override; some exports stamp per-row provenance
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    metrics: BTreeMap<String, Option<f64>>,
}

/// Extractor for one manifest dataset backed by a JSON file
pub struct JsonDatasetExtractor {
    descriptor: DatasetDescriptor,
    name: String,
}

impl JsonDatasetExtractor {
    pub fn new(descriptor: DatasetDescriptor) -> Self {
        let name = format!("json:{}", descriptor.dataset_id);
        Self { descriptor, name }
    }

    pub fn descriptor(&self) -> &DatasetDescriptor {
        &self.descriptor
    }
}

#[async_trait]
impl Extractor for JsonDatasetExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_tag(&self) -> &str {
        &self.descriptor.source_tag
    }

    async fn extract(&self) -> Result<Extraction, ExtractionError> {
        let path = &self.descriptor.file_path;
        if !path.exists() {
            return Err(ExtractionError::NotAvailable(format!(
                "dataset file missing: {}",
                path.display()
            )));
        }

        let content = tokio::fs::read_to_string(path).await?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| ExtractionError::Parse(format!("{}: {}", path.display(), e)))?;

        let rows = match value {
            serde_json::Value::Array(rows) => rows,
            _ => {
                return Err(ExtractionError::Schema(format!(
                    "{} must be a JSON array of row objects",
                    path.display()
                )))
            }
        };

        let mut extraction = Extraction::default();
        let mut years = BTreeSet::new();
        for (index, row) in rows.into_iter().enumerate() {
            let row: RowRecord = match serde_json::from_value(row) {
                Ok(row) => row,
                Err(e) => {
                    extraction
                        .coverage
                        .errors
                        .push(format!("row {}: {}", index, e));
                    continue;
                }
            };

            // Best-effort year coverage; unparseable periods are still
            // forwarded and counted as malformed downstream
            if let Ok(period) = parse_period(&row.period) {
                years.insert(period.year);
            }

            let location = RawLocation {
                text: row.code.clone().or_else(|| row.neighborhood.clone()),
                point: match (row.lat, row.lon) {
                    (Some(lat), Some(lon)) => Some(Point::new(lat, lon)),
                    _ => None,
                },
            };
            let source_tag = row
                .source
                .clone()
                .unwrap_or_else(|| self.descriptor.source_tag.clone());

            for (metric_name, value) in &row.metrics {
                if !self.descriptor.metric_schema.contains_key(metric_name) {
                    debug!(
                        metric = metric_name.as_str(),
                        dataset = self.descriptor.dataset_id.as_str(),
                        "Ignoring metric not in schema"
                    );
                    continue;
                }
                extraction.records.push(RawObservation {
                    location: location.clone(),
                    period_raw: row.period.clone(),
                    metric_name: metric_name.clone(),
                    value: *value,
                    source_tag: source_tag.clone(),
                    dataset_id: self.descriptor.dataset_id.clone(),
                });
            }
        }

        extraction.coverage.years_covered = years.into_iter().collect();
        extraction.coverage.records_count = extraction.records.len();
        Ok(extraction)
    }
}
