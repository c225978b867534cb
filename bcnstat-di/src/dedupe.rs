//! Record deduplication and source-tag reconciliation
//!
//! Sits between resolution and temporal normalization. Unresolved records
//! are dropped here (the resolver already counted why), periods are parsed,
//! concatenated source tags are repaired, and records that are identical on
//! the full series key collapse to the most recently observed value.
//! Records that differ only in `source_tag` or `dataset_id` are distinct on
//! purpose: multi-source values for the same cell are preserved for the
//! assembler's precedence pass.

use crate::types::{RawObservation, Resolution};
use bcnstat_common::db::models::FactRecord;
use bcnstat_common::period::parse_period;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Reconciliation counters for one dataset batch
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DedupeReport {
    pub records_in: usize,
    pub records_out: usize,
    pub dropped_unresolved: usize,
    pub malformed_periods: usize,
    pub tag_fixes: usize,
    pub collapsed_duplicates: usize,
}

/// Collapse resolved observations into loadable fact records.
///
/// Output order is deterministic (sorted by series key), so identical
/// inputs always produce identical load batches.
pub fn dedupe(outcomes: Vec<(RawObservation, Resolution)>) -> (Vec<FactRecord>, DedupeReport) {
    let mut report = DedupeReport {
        records_in: outcomes.len(),
        ..DedupeReport::default()
    };

    let mut collapsed: BTreeMap<(i64, i32, i64, String, String, String), FactRecord> =
        BTreeMap::new();

    for (observation, resolution) in outcomes {
        let entity_id = match resolution {
            Resolution::Resolved { entity_id, .. } => entity_id,
            Resolution::Unresolved { .. } => {
                report.dropped_unresolved += 1;
                continue;
            }
        };

        let period = match parse_period(&observation.period_raw) {
            Ok(period) => period,
            Err(e) => {
                debug!(
                    metric = observation.metric_name.as_str(),
                    dataset_id = observation.dataset_id.as_str(),
                    error = %e,
                    "Dropping record with malformed period"
                );
                report.malformed_periods += 1;
                continue;
            }
        };

        let source_tag = normalize_source_tag(&observation.source_tag);
        if source_tag != observation.source_tag {
            report.tag_fixes += 1;
        }

        let record = FactRecord {
            entity_id,
            year: period.year,
            quarter: period.quarter,
            metric_name: observation.metric_name,
            value: observation.value,
            source_tag,
            dataset_id: observation.dataset_id,
            is_interpolated: false,
        };

        let key = (
            record.entity_id,
            record.year,
            record.quarter_number().unwrap_or(0),
            record.metric_name.clone(),
            record.source_tag.clone(),
            record.dataset_id.clone(),
        );
        if collapsed.insert(key, record).is_some() {
            report.collapsed_duplicates += 1;
        }
    }

    let records: Vec<FactRecord> = collapsed.into_values().collect();
    report.records_out = records.len();
    (records, report)
}

/// Repair a concatenated source tag: split on `|`, keep the first
/// occurrence of each part, rejoin. "A|A|B" becomes "A|B".
pub fn normalize_source_tag(raw: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in raw.split('|') {
        let part = part.trim();
        if part.is_empty() || parts.contains(&part) {
            continue;
        }
        parts.push(part);
    }
    parts.join("|")
}
