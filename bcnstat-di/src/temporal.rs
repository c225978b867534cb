//! Temporal normalization
//!
//! Fact series arrive at mixed granularity: some datasets are quarterly,
//! some annual. Annual records are kept and additionally replicated into
//! the four quarters of their year, marked `is_interpolated`, so the
//! Master Table's quarterly grid has a value for annual-only metrics. A
//! year where the same series carries native quarterly data is left
//! alone: interpolation never overwrites or shadows native records. No
//! value is invented for years with no record at all.

use bcnstat_common::db::models::FactRecord;
use bcnstat_common::period::Quarter;
use serde::Serialize;
use std::collections::HashSet;

/// Counters from one normalization pass
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct InterpolationReport {
    pub records_in: usize,
    pub records_out: usize,
    pub native_quarterly: usize,
    pub annual_kept: usize,
    pub interpolated: usize,
    /// Annual records not expanded because the series had native quarters
    pub skipped_native_years: usize,
}

/// Expand annual records into interpolated quarters where the series has
/// no native quarterly data for that year.
pub fn normalize(records: Vec<FactRecord>) -> (Vec<FactRecord>, InterpolationReport) {
    let mut report = InterpolationReport {
        records_in: records.len(),
        ..InterpolationReport::default()
    };

    // Years that already have native quarterly data, per series
    let native_years: HashSet<(i64, String, String, String, i32)> = records
        .iter()
        .filter(|r| r.quarter.is_some())
        .map(|r| {
            (
                r.entity_id,
                r.metric_name.clone(),
                r.source_tag.clone(),
                r.dataset_id.clone(),
                r.year,
            )
        })
        .collect();

    let mut out = Vec::with_capacity(records.len());
    for record in records {
        if record.quarter.is_some() {
            report.native_quarterly += 1;
            out.push(record);
            continue;
        }

        report.annual_kept += 1;
        let key = (
            record.entity_id,
            record.metric_name.clone(),
            record.source_tag.clone(),
            record.dataset_id.clone(),
            record.year,
        );
        if native_years.contains(&key) {
            report.skipped_native_years += 1;
            out.push(record);
            continue;
        }

        for quarter in Quarter::ALL {
            out.push(FactRecord {
                quarter: Some(quarter),
                is_interpolated: true,
                ..record.clone()
            });
        }
        report.interpolated += 4;
        out.push(record);
    }

    report.records_out = out.len();
    (out, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annual(entity: i64, year: i32, metric: &str, value: f64, source: &str) -> FactRecord {
        FactRecord {
            entity_id: entity,
            year,
            quarter: None,
            metric_name: metric.to_string(),
            value: Some(value),
            source_tag: source.to_string(),
            dataset_id: format!("{}-ds", source),
            is_interpolated: false,
        }
    }

    fn quarterly(entity: i64, year: i32, q: Quarter, metric: &str, source: &str) -> FactRecord {
        FactRecord {
            quarter: Some(q),
            ..annual(entity, year, metric, 0.0, source)
        }
    }

    #[test]
    fn test_annual_expands_into_four_quarters() {
        let (out, report) = normalize(vec![annual(1, 2020, "population", 15000.0, "census")]);

        assert_eq!(out.len(), 5);
        assert_eq!(report.annual_kept, 1);
        assert_eq!(report.interpolated, 4);

        let interpolated: Vec<&FactRecord> = out.iter().filter(|r| r.is_interpolated).collect();
        assert_eq!(interpolated.len(), 4);
        for record in &interpolated {
            assert_eq!(record.value, Some(15000.0));
            assert_eq!(record.year, 2020);
        }
        let quarters: HashSet<u8> = interpolated
            .iter()
            .filter_map(|r| r.quarter.map(|q| q.number()))
            .collect();
        assert_eq!(quarters, HashSet::from([1, 2, 3, 4]));
        // The annual row itself survives
        assert!(out.iter().any(|r| r.quarter.is_none() && !r.is_interpolated));
    }

    #[test]
    fn test_native_quarterly_passes_through() {
        let input = vec![
            quarterly(1, 2021, Quarter::Q1, "price", "portal"),
            quarterly(1, 2021, Quarter::Q2, "price", "portal"),
        ];
        let (out, report) = normalize(input.clone());

        assert_eq!(out, input);
        assert_eq!(report.native_quarterly, 2);
        assert_eq!(report.interpolated, 0);
    }

    #[test]
    fn test_native_year_not_interpolated() {
        // 2021 has a native quarter for this series, 2020 does not
        let (out, report) = normalize(vec![
            annual(1, 2020, "price", 9.0, "portal"),
            annual(1, 2021, "price", 10.0, "portal"),
            quarterly(1, 2021, Quarter::Q3, "price", "portal"),
        ]);

        assert_eq!(report.interpolated, 4);
        assert_eq!(report.skipped_native_years, 1);
        assert!(out
            .iter()
            .filter(|r| r.year == 2021)
            .all(|r| !r.is_interpolated));
    }

    #[test]
    fn test_series_are_independent() {
        // Source B's native quarters must not suppress source A's expansion
        let (out, report) = normalize(vec![
            annual(1, 2021, "income", 30000.0, "tax_agency"),
            quarterly(1, 2021, Quarter::Q1, "income", "survey"),
        ]);

        assert_eq!(report.interpolated, 4);
        assert_eq!(
            out.iter()
                .filter(|r| r.source_tag == "tax_agency" && r.is_interpolated)
                .count(),
            4
        );
    }

    #[test]
    fn test_no_gap_filling_between_years() {
        let (out, _) = normalize(vec![
            annual(1, 2019, "population", 14000.0, "census"),
            annual(1, 2021, "population", 15000.0, "census"),
        ]);

        assert!(out.iter().all(|r| r.year != 2020));
        assert_eq!(out.len(), 10);
    }
}
