//! Pipeline orchestration
//!
//! One `run` drives the whole engine: seed and validate the dimension,
//! build the resolution context, then per fact table extract, resolve,
//! dedupe, normalize and load every manifest dataset, validate the loaded
//! tables, and assemble the Master Table from the ones that passed. Fatal
//! conditions (unusable dimension, critical-table violations, database
//! failures) end the run with a failed session; everything else degrades
//! into warnings and report counters.

use crate::assemble::{default_derived_columns, AssembleStats, MasterAssembler, MasterColumn};
use crate::dedupe::dedupe;
use crate::dimension::{seed_dimension, Catalog};
use crate::error::{PipelineError, Result};
use crate::extract::{Extractor, JsonDatasetExtractor, Manifest, MetricKind};
use crate::load::{BatchLoader, LoadMode};
use crate::report::{
    close_session, open_session, RunStatus, RunSummary, SourceReport, TableReport,
};
use crate::resolve::ResolutionContext;
use crate::temporal;
use crate::validate::IntegrityValidator;
use bcnstat_common::config::IntegrationConfig;
use bcnstat_common::db::init::{FACT_TABLES, MASTER_TABLE};
use bcnstat_common::db::models::FactRecord;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};

/// Per-invocation controls, from the CLI
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub year_start: Option<i32>,
    pub year_end: Option<i32>,
    /// Restrict the run to these source tags; empty means all
    pub sources: Vec<String>,
    /// Promote optional-table validation failures to fatal
    pub strict: bool,
}

impl RunOptions {
    fn source_selected(&self, source_tag: &str) -> bool {
        self.sources.is_empty() || self.sources.iter().any(|s| s == source_tag)
    }

    fn year_in_range(&self, year: i32) -> bool {
        self.year_start.map_or(true, |start| year >= start)
            && self.year_end.map_or(true, |end| year <= end)
    }
}

pub struct IntegrationPipeline {
    pool: SqlitePool,
    config: IntegrationConfig,
    options: RunOptions,
}

impl IntegrationPipeline {
    pub fn new(pool: SqlitePool, config: IntegrationConfig, options: RunOptions) -> Self {
        Self {
            pool,
            config,
            options,
        }
    }

    /// Run the full integration pipeline.
    ///
    /// Fatal conditions are captured in the returned summary (`status`,
    /// `error`) rather than bubbling out, so the session row and the run
    /// log always reflect what happened; only session bookkeeping itself
    /// can fail this method.
    pub async fn run(&self, manifest: &Manifest, catalog: &Catalog) -> Result<RunSummary> {
        let mut summary = RunSummary::new();
        info!(run_id = %summary.run_id, "Starting integration run");
        open_session(&self.pool, &summary).await?;

        match self.execute(manifest, catalog, &mut summary).await {
            Ok(()) => summary.finish(RunStatus::Succeeded),
            Err(e) => {
                error!(error = %e, "Run failed");
                summary.error = Some(e.to_string());
                summary.finish(RunStatus::Failed);
            }
        }

        close_session(&self.pool, &summary).await?;
        info!("Run summary:\n{}", summary.render());
        Ok(summary)
    }

    async fn execute(
        &self,
        manifest: &Manifest,
        catalog: &Catalog,
        summary: &mut RunSummary,
    ) -> Result<()> {
        summary.manifest_entries_skipped = manifest.skipped_entries;

        summary.dimension = Some(seed_dimension(&self.pool, catalog).await?);
        let validator = IntegrityValidator::new(self.pool.clone(), self.config.thresholds);
        let dimension_report = validator.validate_dimension().await?;
        if !dimension_report.is_clean() {
            return Err(PipelineError::Dimension(dimension_report.describe()));
        }

        let mut ctx =
            ResolutionContext::load(&self.pool, self.config.bounds.to_bounding_box()).await?;
        let loader = BatchLoader::new(self.pool.clone(), self.config.chunk_size);

        // Resolution-stage drop counters per table, for the unmapped-rate
        // check: (dropped, records_in)
        let mut unmapped: BTreeMap<&str, (usize, usize)> = BTreeMap::new();

        for table in FACT_TABLES {
            let mut first_load = true;
            for descriptor in manifest.datasets_for_table(table) {
                if !self.options.source_selected(&descriptor.source_tag) {
                    debug!(
                        dataset_id = descriptor.dataset_id.as_str(),
                        source_tag = descriptor.source_tag.as_str(),
                        "Source not selected, skipping"
                    );
                    continue;
                }

                let extractor = JsonDatasetExtractor::new(descriptor.clone());
                let mut report = SourceReport::new(descriptor, extractor.name());

                match extractor.extract().await {
                    Err(e) => {
                        warn!(
                            dataset_id = descriptor.dataset_id.as_str(),
                            error = %e,
                            "Source extraction failed, continuing with the others"
                        );
                        report.failed = Some(e.to_string());
                    }
                    Ok(extraction) => {
                        report.coverage = extraction.coverage;

                        let batch = ctx.resolve_batch(extraction.records);
                        report.geocode_rate = batch.geocode_rate();
                        if let Some(rate) = report.geocode_rate {
                            if rate < self.config.thresholds.min_geocode_rate {
                                report.geocode_flagged = true;
                                warn!(
                                    dataset_id = descriptor.dataset_id.as_str(),
                                    geocode_rate = rate,
                                    threshold = self.config.thresholds.min_geocode_rate,
                                    "Geocoding coverage below acceptance, batch flagged"
                                );
                            }
                        }

                        let (records, dedupe_report) = dedupe(batch.outcomes);
                        report.dedupe = dedupe_report;
                        let counters = unmapped.entry(table).or_default();
                        counters.0 += dedupe_report.dropped_unresolved;
                        counters.1 += dedupe_report.records_in;

                        let (records, outside) = self.filter_years(records);
                        report.outside_year_range = outside;

                        let (records, interpolation) = temporal::normalize(records);
                        report.interpolation = interpolation;

                        let mode = if first_load {
                            LoadMode::Replace
                        } else {
                            LoadMode::Append
                        };
                        report.load = loader.load(table, records, mode).await?;
                        first_load = false;
                    }
                }
                summary.sources.push(report);
            }
        }
        summary.match_stats = *ctx.stats();

        let mut valid_tables: BTreeSet<String> = BTreeSet::new();
        for table in FACT_TABLES {
            let kinds: BTreeMap<String, MetricKind> = manifest
                .datasets_for_table(table)
                .iter()
                .flat_map(|d| d.metric_schema.clone())
                .collect();
            let rate = unmapped
                .get(table)
                .filter(|(_, total)| *total > 0)
                .map(|(dropped, total)| *dropped as f64 / *total as f64);

            let integrity = validator.validate_table(table, &kinds, rate).await?;
            let critical = self.config.critical_tables.iter().any(|t| t == table);
            let clean = integrity.is_clean();
            let detail = integrity.describe();
            if clean {
                valid_tables.insert(table.to_string());
            }
            summary.tables.push(TableReport {
                table: table.to_string(),
                critical,
                included_in_master: clean,
                integrity,
            });

            if !clean {
                if critical || self.options.strict {
                    return Err(PipelineError::Integrity {
                        table: table.to_string(),
                        detail,
                    });
                }
                warn!(
                    table,
                    detail = detail.as_str(),
                    "Optional table failed validation, excluded from the master table"
                );
            }
        }

        summary.assemble = Some(self.assemble(manifest, &valid_tables).await?);

        let master = validator.validate_master().await?;
        let clean = master.is_clean();
        let detail = master.describe();
        summary.master = Some(master);
        if !clean {
            return Err(PipelineError::Integrity {
                table: MASTER_TABLE.to_string(),
                detail,
            });
        }
        Ok(())
    }

    async fn assemble(
        &self,
        manifest: &Manifest,
        valid_tables: &BTreeSet<String>,
    ) -> Result<AssembleStats> {
        let columns: Vec<MasterColumn> = manifest
            .metric_columns()
            .into_iter()
            .filter(|(_, _, table)| valid_tables.contains(table))
            .map(|(name, _, table)| MasterColumn { name, table })
            .collect();

        let assembler = MasterAssembler::new(
            self.pool.clone(),
            self.config.chunk_size,
            self.config.source_precedence.clone(),
        );
        assembler
            .assemble(&columns, &default_derived_columns())
            .await
    }

    fn filter_years(&self, records: Vec<FactRecord>) -> (Vec<FactRecord>, usize) {
        let before = records.len();
        let kept: Vec<FactRecord> = records
            .into_iter()
            .filter(|r| self.options.year_in_range(r.year))
            .collect();
        let outside = before - kept.len();
        (kept, outside)
    }
}
