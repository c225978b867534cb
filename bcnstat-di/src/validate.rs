//! Referential integrity validation
//!
//! Runs after every bulk load, with foreign keys back on, and is the
//! authority on whether a table's data is usable. Checks are reported,
//! not raised: the pipeline decides whether a dirty table aborts the run
//! (critical tables) or is dropped from the Master Table with a warning
//! (optional tables).

use crate::error::Result;
use crate::extract::manifest::MetricKind;
use bcnstat_common::config::Thresholds;
use bcnstat_common::db::init::{assert_fact_table, MASTER_TABLE, NEIGHBORHOOD_COUNT};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    OrphanEntity,
    DuplicateKey,
    ValueOutOfRange,
    UnmappedRate,
    NullValueRate,
    DimensionCount,
    DimensionDuplicate,
}

/// One failed check, with a human-readable detail line
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub table: String,
    pub rows_checked: i64,
    pub violations: Vec<Violation>,
}

impl IntegrityReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            rows_checked: 0,
            violations: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// All detail lines, one per violation
    pub fn describe(&self) -> String {
        self.violations
            .iter()
            .map(|v| v.detail.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn push(&mut self, kind: ViolationKind, detail: String) {
        self.violations.push(Violation { kind, detail });
    }
}

pub struct IntegrityValidator {
    pool: SqlitePool,
    thresholds: Thresholds,
}

impl IntegrityValidator {
    pub fn new(pool: SqlitePool, thresholds: Thresholds) -> Self {
        Self { pool, thresholds }
    }

    /// Check the dimension table: exactly 73 entities, unique codes and
    /// normalized names.
    pub async fn validate_dimension(&self) -> Result<IntegrityReport> {
        let mut report = IntegrityReport::new("neighborhoods");

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM neighborhoods")
            .fetch_one(&self.pool)
            .await?;
        report.rows_checked = count;
        if count != NEIGHBORHOOD_COUNT {
            report.push(
                ViolationKind::DimensionCount,
                format!("expected {} neighborhoods, found {}", NEIGHBORHOOD_COUNT, count),
            );
        }

        for column in ["normalized_name", "administrative_code"] {
            let duplicates: Vec<(String,)> = sqlx::query_as(&format!(
                "SELECT {column} FROM neighborhoods GROUP BY {column} HAVING COUNT(*) > 1"
            ))
            .fetch_all(&self.pool)
            .await?;
            for (value,) in duplicates {
                report.push(
                    ViolationKind::DimensionDuplicate,
                    format!("{} '{}' is not unique", column, value),
                );
            }
        }

        Ok(report)
    }

    /// Check one fact table against its manifest metric schema and the
    /// configured thresholds. `unmapped_rate` is the resolution-stage drop
    /// rate for the datasets feeding this table, when any were processed.
    pub async fn validate_table(
        &self,
        table: &str,
        metric_kinds: &BTreeMap<String, MetricKind>,
        unmapped_rate: Option<f64>,
    ) -> Result<IntegrityReport> {
        assert_fact_table(table);
        let mut report = IntegrityReport::new(table);

        let (total, nulls): (i64, i64) = sqlx::query_as(&format!(
            "SELECT COUNT(*), COUNT(*) - COUNT(value) FROM {table}"
        ))
        .fetch_one(&self.pool)
        .await?;
        report.rows_checked = total;

        self.check_orphans(table, &mut report).await?;
        self.check_duplicate_keys(table, &mut report).await?;
        self.check_value_ranges(table, metric_kinds, &mut report)
            .await?;

        if total > 0 {
            let null_rate = nulls as f64 / total as f64;
            if null_rate > self.thresholds.max_null_value_rate {
                report.push(
                    ViolationKind::NullValueRate,
                    format!(
                        "{:.1}% of values are NULL (limit {:.1}%)",
                        null_rate * 100.0,
                        self.thresholds.max_null_value_rate * 100.0
                    ),
                );
            }
        }

        if let Some(rate) = unmapped_rate {
            if rate > self.thresholds.max_unmapped_rate {
                report.push(
                    ViolationKind::UnmappedRate,
                    format!(
                        "{:.1}% of records failed entity resolution (limit {:.1}%)",
                        rate * 100.0,
                        self.thresholds.max_unmapped_rate * 100.0
                    ),
                );
            }
        }

        info!(
            table,
            rows = report.rows_checked,
            violations = report.violations.len(),
            "Validated fact table"
        );
        Ok(report)
    }

    /// Check the assembled wide table: cell uniqueness and entity validity.
    pub async fn validate_master(&self) -> Result<IntegrityReport> {
        let mut report = IntegrityReport::new(MASTER_TABLE);

        let (total,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM {MASTER_TABLE}"))
                .fetch_one(&self.pool)
                .await?;
        report.rows_checked = total;

        self.check_orphans(MASTER_TABLE, &mut report).await?;

        let (duplicates,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM (
                 SELECT 1 FROM {MASTER_TABLE}
                 GROUP BY entity_id, year, quarter
                 HAVING COUNT(*) > 1
             )"
        ))
        .fetch_one(&self.pool)
        .await?;
        if duplicates > 0 {
            report.push(
                ViolationKind::DuplicateKey,
                format!("{} duplicated (entity, year, quarter) cells", duplicates),
            );
        }

        Ok(report)
    }

    async fn check_orphans(&self, table: &str, report: &mut IntegrityReport) -> Result<()> {
        let (orphans,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {table} f
             LEFT JOIN neighborhoods n ON f.entity_id = n.entity_id
             WHERE n.entity_id IS NULL"
        ))
        .fetch_one(&self.pool)
        .await?;
        if orphans > 0 {
            report.push(
                ViolationKind::OrphanEntity,
                format!("{} rows reference entities missing from the dimension", orphans),
            );
        }
        Ok(())
    }

    async fn check_duplicate_keys(&self, table: &str, report: &mut IntegrityReport) -> Result<()> {
        let (duplicates,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM (
                 SELECT 1 FROM {table}
                 GROUP BY entity_id, year, COALESCE(quarter, 0), metric_name,
                          source_tag, dataset_id
                 HAVING COUNT(*) > 1
             )"
        ))
        .fetch_one(&self.pool)
        .await?;
        if duplicates > 0 {
            report.push(
                ViolationKind::DuplicateKey,
                format!("{} duplicated series keys", duplicates),
            );
        }
        Ok(())
    }

    async fn check_value_ranges(
        &self,
        table: &str,
        metric_kinds: &BTreeMap<String, MetricKind>,
        report: &mut IntegrityReport,
    ) -> Result<()> {
        for (metric, kind) in metric_kinds {
            let condition = match kind {
                MetricKind::Count | MetricKind::Amount => "value < 0",
                MetricKind::Percent => "value < 0 OR value > 100",
                MetricKind::Ratio => continue,
            };
            let (bad,): (i64,) = sqlx::query_as(&format!(
                "SELECT COUNT(*) FROM {table}
                 WHERE metric_name = ? AND value IS NOT NULL AND ({condition})"
            ))
            .bind(metric)
            .fetch_one(&self.pool)
            .await?;
            if bad > 0 {
                report.push(
                    ViolationKind::ValueOutOfRange,
                    format!("{} '{}' values violate {:?} bounds", bad, metric, kind),
                );
            }
        }
        Ok(())
    }
}
