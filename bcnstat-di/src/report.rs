//! Run summaries and session persistence
//!
//! Every pipeline invocation builds one `RunSummary` as it goes: per-source
//! extraction, reconciliation and load counters, per-table validation
//! outcomes, and the final assembly statistics. The summary is rendered
//! for the log at run end and persisted as JSON in `run_sessions`, so past
//! runs stay inspectable from the store itself.

use crate::assemble::AssembleStats;
use crate::dedupe::DedupeReport;
use crate::dimension::DimensionStats;
use crate::error::Result;
use crate::extract::manifest::DatasetDescriptor;
use crate::extract::SourceCoverage;
use crate::load::LoadStats;
use crate::resolve::MatchStats;
use crate::temporal::InterpolationReport;
use crate::validate::IntegrityReport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt::Write as _;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

/// Everything that happened to one dataset
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub dataset_id: String,
    pub source_tag: String,
    pub table: String,
    pub extractor: String,
    /// Extraction error when the source produced nothing
    pub failed: Option<String>,
    pub coverage: SourceCoverage,
    pub dedupe: DedupeReport,
    pub interpolation: InterpolationReport,
    pub load: LoadStats,
    /// Share of coordinate-bearing records that resolved, if any had
    /// coordinates
    pub geocode_rate: Option<f64>,
    /// Geocode rate fell below the acceptance threshold
    pub geocode_flagged: bool,
    pub outside_year_range: usize,
}

impl SourceReport {
    pub fn new(descriptor: &DatasetDescriptor, extractor: &str) -> Self {
        Self {
            dataset_id: descriptor.dataset_id.clone(),
            source_tag: descriptor.source_tag.clone(),
            table: descriptor.table.clone(),
            extractor: extractor.to_string(),
            failed: None,
            coverage: SourceCoverage::default(),
            dedupe: DedupeReport::default(),
            interpolation: InterpolationReport::default(),
            load: LoadStats::default(),
            geocode_rate: None,
            geocode_flagged: false,
            outside_year_range: 0,
        }
    }
}

/// Validation outcome for one fact table
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: String,
    pub critical: bool,
    pub included_in_master: bool,
    pub integrity: IntegrityReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub manifest_entries_skipped: usize,
    pub dimension: Option<DimensionStats>,
    pub match_stats: MatchStats,
    pub sources: Vec<SourceReport>,
    pub tables: Vec<TableReport>,
    pub assemble: Option<AssembleStats>,
    pub master: Option<IntegrityReport>,
    /// Fatal error, for failed runs
    pub error: Option<String>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            manifest_entries_skipped: 0,
            dimension: None,
            match_stats: MatchStats::default(),
            sources: Vec::new(),
            tables: Vec::new(),
            assemble: None,
            master: None,
            error: None,
        }
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.finished_at = Some(Utc::now());
        self.status = status;
    }

    /// Multi-line human-readable summary for the run log.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let duration = self
            .finished_at
            .map(|f| format!(" in {:.1}s", (f - self.started_at).num_milliseconds() as f64 / 1000.0))
            .unwrap_or_default();
        let _ = writeln!(out, "run {} {}{}", self.run_id, self.status.as_str(), duration);

        if let Some(error) = &self.error {
            let _ = writeln!(out, "error: {}", error);
        }
        if let Some(d) = &self.dimension {
            let _ = writeln!(
                out,
                "dimension: {} inserted, {} already present, {} aliases, {} derivatives",
                d.inserted, d.already_present, d.aliases_inserted, d.derivatives_computed
            );
        }

        let m = &self.match_stats;
        let _ = writeln!(
            out,
            "resolution: {} by code, {} by name, {} by alias, {} by geometry, {} ambiguous points, {} unresolved",
            m.by_code, m.by_name, m.by_alias, m.by_geometry, m.ambiguous_points, m.unresolved
        );

        if self.manifest_entries_skipped > 0 {
            let _ = writeln!(out, "manifest: {} entries skipped", self.manifest_entries_skipped);
        }

        for source in &self.sources {
            match &source.failed {
                Some(reason) => {
                    let _ = writeln!(
                        out,
                        "  {} ({} -> {}): FAILED {}",
                        source.dataset_id, source.source_tag, source.table, reason
                    );
                }
                None => {
                    let geocode = match source.geocode_rate {
                        Some(rate) if source.geocode_flagged => {
                            format!(", geocode {:.1}% FLAGGED", rate * 100.0)
                        }
                        Some(rate) => format!(", geocode {:.1}%", rate * 100.0),
                        None => String::new(),
                    };
                    let _ = writeln!(
                        out,
                        "  {} ({} -> {}): {} in, {} loaded, {} dropped, {} interpolated, {} outside years{}",
                        source.dataset_id,
                        source.source_tag,
                        source.table,
                        source.coverage.records_count,
                        source.load.rows_written,
                        source.dedupe.dropped_unresolved + source.dedupe.malformed_periods,
                        source.interpolation.interpolated,
                        source.outside_year_range,
                        geocode
                    );
                }
            }
        }

        for table in &self.tables {
            let verdict = if table.integrity.is_clean() {
                "clean".to_string()
            } else if table.included_in_master {
                format!("violations: {}", table.integrity.describe())
            } else {
                format!("EXCLUDED, violations: {}", table.integrity.describe())
            };
            let _ = writeln!(
                out,
                "  {}{}: {} rows, {}",
                table.table,
                if table.critical { " (critical)" } else { "" },
                table.integrity.rows_checked,
                verdict
            );
        }

        if let Some(a) = &self.assemble {
            let _ = writeln!(
                out,
                "master: {} rows over {} periods, {} metric columns, {} derived",
                a.rows_written, a.periods, a.metric_columns, a.derived_columns
            );
        }
        if let Some(master) = &self.master {
            if !master.is_clean() {
                let _ = writeln!(out, "master violations: {}", master.describe());
            }
        }
        out
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

/// Record the start of a run.
pub async fn open_session(pool: &SqlitePool, summary: &RunSummary) -> Result<()> {
    sqlx::query("INSERT INTO run_sessions (run_id, started_at, status) VALUES (?, ?, ?)")
        .bind(summary.run_id.to_string())
        .bind(summary.started_at.to_rfc3339())
        .bind(RunStatus::Running.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

/// Record the outcome of a run, with the full summary as JSON.
pub async fn close_session(pool: &SqlitePool, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string(summary)
        .map_err(|e| crate::error::PipelineError::Internal(format!("summary to JSON: {}", e)))?;
    sqlx::query(
        "UPDATE run_sessions SET finished_at = ?, status = ?, summary = ? WHERE run_id = ?",
    )
    .bind(summary.finished_at.map(|t| t.to_rfc3339()))
    .bind(summary.status.as_str())
    .bind(json)
    .bind(summary.run_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}
