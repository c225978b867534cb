//! Input manifest loading
//!
//! The manifest is a JSON array of dataset descriptors produced by the
//! extraction side. Malformed entries and entries repeating an already
//! listed dataset are logged and skipped, the rest of the manifest still
//! loads. Only a manifest with the wrong overall shape (not a JSON array)
//! is fatal.

use crate::error::{PipelineError, Result};
use bcnstat_common::db::init::FACT_TABLES;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Kind of a metric value, driving range checks and derived columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Non-negative integer-ish count (population, listings)
    Count,
    /// Non-negative monetary or physical amount
    Amount,
    /// Percentage in [0, 100]
    Percent,
    /// Unconstrained ratio or index
    Ratio,
}

/// Native temporal granularity of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Annual,
    Quarterly,
}

/// One raw dataset descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Path of the raw data file, resolved relative to the manifest
    pub file_path: PathBuf,
    pub source_tag: String,
    pub dataset_id: String,
    /// Destination fact table, one of `FACT_TABLES`
    pub table: String,
    pub granularity: Granularity,
    /// Metric name -> kind. Defines which metrics the dataset contributes
    /// and how they are range-checked and surfaced as master columns.
    pub metric_schema: BTreeMap<String, MetricKind>,
}

/// Validated manifest: descriptors that survived per-entry validation
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub datasets: Vec<DatasetDescriptor>,
    /// Entries rejected during load, for run metadata
    pub skipped_entries: usize,
}

impl Manifest {
    /// Load and validate a manifest file.
    ///
    /// Relative `file_path` entries are resolved against the manifest's
    /// own directory. Each dataset is listed at most once: an entry
    /// repeating an earlier `(table, dataset_id, source_tag)` triple is
    /// skipped and counted like any other rejected entry.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Manifest(format!("cannot read {}: {}", path.display(), e))
        })?;

        let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
            PipelineError::Manifest(format!("{} is not valid JSON: {}", path.display(), e))
        })?;

        let entries = match value {
            serde_json::Value::Array(entries) => entries,
            other => {
                return Err(PipelineError::Manifest(format!(
                    "{} must be a JSON array of dataset descriptors, got {}",
                    path.display(),
                    json_type_name(&other)
                )))
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut manifest = Manifest::default();
        let mut seen: BTreeSet<(String, String, String)> = BTreeSet::new();
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<DatasetDescriptor>(entry) {
                Ok(mut descriptor) => {
                    if let Err(reason) = validate_descriptor(&descriptor) {
                        warn!(index, %reason, "Skipping manifest entry");
                        manifest.skipped_entries += 1;
                        continue;
                    }
                    if !seen.insert((
                        descriptor.table.clone(),
                        descriptor.dataset_id.clone(),
                        descriptor.source_tag.clone(),
                    )) {
                        warn!(
                            index,
                            table = descriptor.table.as_str(),
                            dataset_id = descriptor.dataset_id.as_str(),
                            source_tag = descriptor.source_tag.as_str(),
                            "Skipping repeat of an already listed dataset"
                        );
                        manifest.skipped_entries += 1;
                        continue;
                    }
                    if descriptor.file_path.is_relative() {
                        descriptor.file_path = base_dir.join(&descriptor.file_path);
                    }
                    manifest.datasets.push(descriptor);
                }
                Err(e) => {
                    warn!(index, error = %e, "Skipping malformed manifest entry");
                    manifest.skipped_entries += 1;
                }
            }
        }

        info!(
            datasets = manifest.datasets.len(),
            skipped = manifest.skipped_entries,
            "Loaded manifest from {}",
            path.display()
        );
        Ok(manifest)
    }

    /// Build a manifest directly from descriptors (test and embedding use)
    pub fn from_descriptors(datasets: Vec<DatasetDescriptor>) -> Self {
        Self {
            datasets,
            skipped_entries: 0,
        }
    }

    /// Descriptors destined for one fact table, in manifest order
    pub fn datasets_for_table(&self, table: &str) -> Vec<&DatasetDescriptor> {
        self.datasets.iter().filter(|d| d.table == table).collect()
    }

    /// All metric columns across descriptors, deduplicated, in fact-table
    /// order then descriptor order within each table. The first table
    /// claiming a metric name wins; a repeat under a different table is
    /// logged and ignored.
    pub fn metric_columns(&self) -> Vec<(String, MetricKind, String)> {
        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        let mut columns = Vec::new();
        for table in FACT_TABLES {
            for descriptor in self.datasets_for_table(table) {
                for (metric, kind) in &descriptor.metric_schema {
                    match seen.get(metric) {
                        None => {
                            seen.insert(metric.clone(), table.to_string());
                            columns.push((metric.clone(), *kind, table.to_string()));
                        }
                        Some(owner) if owner != table => {
                            warn!(
                                metric = metric.as_str(),
                                first_table = owner.as_str(),
                                duplicate_table = table,
                                "Metric name claimed by two fact tables, keeping the first"
                            );
                        }
                        Some(_) => {}
                    }
                }
            }
        }
        columns
    }
}

fn validate_descriptor(descriptor: &DatasetDescriptor) -> std::result::Result<(), String> {
    if descriptor.source_tag.trim().is_empty() {
        return Err("empty source_tag".to_string());
    }
    if descriptor.dataset_id.trim().is_empty() {
        return Err("empty dataset_id".to_string());
    }
    if !FACT_TABLES.contains(&descriptor.table.as_str()) {
        return Err(format!("unknown fact table '{}'", descriptor.table));
    }
    if descriptor.metric_schema.is_empty() {
        return Err("empty metric_schema".to_string());
    }
    Ok(())
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("manifest.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_valid_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"[
                {
                    "file_path": "population.json",
                    "source_tag": "census",
                    "dataset_id": "census-2021",
                    "table": "fact_population",
                    "granularity": "annual",
                    "metric_schema": {"population": "count"}
                }
            ]"#,
        );

        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.datasets.len(), 1);
        assert_eq!(manifest.skipped_entries, 0);
        let d = &manifest.datasets[0];
        assert_eq!(d.granularity, Granularity::Annual);
        assert_eq!(d.metric_schema["population"], MetricKind::Count);
        // Relative path resolved against the manifest directory
        assert_eq!(d.file_path, dir.path().join("population.json"));
    }

    #[test]
    fn test_malformed_entry_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"[
                {"file_path": "a.json"},
                {
                    "file_path": "b.json",
                    "source_tag": "portal",
                    "dataset_id": "portal-1",
                    "table": "fact_poi",
                    "granularity": "quarterly",
                    "metric_schema": {"poi_count": "count"}
                },
                {
                    "file_path": "c.json",
                    "source_tag": "x",
                    "dataset_id": "x-1",
                    "table": "not_a_table",
                    "granularity": "annual",
                    "metric_schema": {"m": "count"}
                }
            ]"#,
        );

        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.datasets.len(), 1);
        assert_eq!(manifest.skipped_entries, 2);
        assert_eq!(manifest.datasets[0].dataset_id, "portal-1");
    }

    #[test]
    fn test_repeated_dataset_entry_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"[
                {
                    "file_path": "population.json",
                    "source_tag": "census",
                    "dataset_id": "padro-2021",
                    "table": "fact_population",
                    "granularity": "annual",
                    "metric_schema": {"population": "count"}
                },
                {
                    "file_path": "population-copy.json",
                    "source_tag": "census",
                    "dataset_id": "padro-2021",
                    "table": "fact_population",
                    "granularity": "annual",
                    "metric_schema": {"population": "count"}
                },
                {
                    "file_path": "population-portal.json",
                    "source_tag": "portal",
                    "dataset_id": "padro-2021",
                    "table": "fact_population",
                    "granularity": "annual",
                    "metric_schema": {"population": "count"}
                }
            ]"#,
        );

        let manifest = Manifest::load(&path).unwrap();
        // The repeat is dropped even though it names a different file; the
        // portal entry is a distinct dataset and survives
        assert_eq!(manifest.datasets.len(), 2);
        assert_eq!(manifest.skipped_entries, 1);
        assert_eq!(manifest.datasets[0].source_tag, "census");
        assert_eq!(manifest.datasets[1].source_tag, "portal");
        // First occurrence wins
        assert_eq!(
            manifest.datasets[0].file_path,
            dir.path().join("population.json")
        );
    }

    #[test]
    fn test_non_array_manifest_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), r#"{"file_path": "a.json"}"#);
        let err = Manifest::load(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Manifest(_)));
    }

    #[test]
    fn test_missing_manifest_is_fatal() {
        let err = Manifest::load(Path::new("/nonexistent/manifest.json")).unwrap_err();
        assert!(matches!(err, PipelineError::Manifest(_)));
    }

    #[test]
    fn test_metric_columns_first_table_wins() {
        let make = |table: &str, dataset: &str, metric: &str| DatasetDescriptor {
            file_path: PathBuf::from("x.json"),
            source_tag: "s".to_string(),
            dataset_id: dataset.to_string(),
            table: table.to_string(),
            granularity: Granularity::Annual,
            metric_schema: BTreeMap::from([(metric.to_string(), MetricKind::Count)]),
        };
        let manifest = Manifest::from_descriptors(vec![
            make("fact_poi", "d1", "shared_metric"),
            make("fact_population", "d2", "shared_metric"),
            make("fact_population", "d3", "population"),
        ]);

        let columns = manifest.metric_columns();
        // fact_population comes before fact_poi in table order, so it owns
        // the shared metric; within a table, manifest order is kept
        assert_eq!(
            columns
                .iter()
                .map(|(name, _, table)| (name.as_str(), table.as_str()))
                .collect::<Vec<_>>(),
            vec![
                ("shared_metric", "fact_population"),
                ("population", "fact_population"),
            ]
        );
    }
}
