//! Master Table assembly
//!
//! The wide table is a pure projection of the fact tables: 73 entities ×
//! every quarterly period seen in a validated fact table, one REAL column
//! per configured metric plus derived columns. It is dropped and rebuilt
//! on every run. When several sources carry the same metric for a cell,
//! the configured source-precedence order picks one, ties broken by the
//! newest `dataset_id`. Missing values stay NULL.

use crate::error::Result;
use bcnstat_common::db::init::{assert_fact_table, MASTER_TABLE};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// One metric column of the master table, fed from a fact table
#[derive(Debug, Clone)]
pub struct MasterColumn {
    /// Metric name, doubling as the SQL column name
    pub name: String,
    pub table: String,
}

/// How a derived column is computed from metric columns of the same row
#[derive(Debug, Clone)]
pub enum DerivedOp {
    Ratio { numerator: String, denominator: String },
    NaturalLog { input: String },
    PerThousand { numerator: String, denominator: String },
}

#[derive(Debug, Clone)]
pub struct DerivedColumn {
    pub name: String,
    pub op: DerivedOp,
}

impl DerivedColumn {
    fn inputs(&self) -> Vec<&str> {
        match &self.op {
            DerivedOp::Ratio {
                numerator,
                denominator,
            }
            | DerivedOp::PerThousand {
                numerator,
                denominator,
            } => vec![numerator.as_str(), denominator.as_str()],
            DerivedOp::NaturalLog { input } => vec![input.as_str()],
        }
    }

    /// NULL when any input is NULL, a denominator is zero, or a log input
    /// is not positive.
    fn compute<F: Fn(&str) -> Option<f64>>(&self, value_of: F) -> Option<f64> {
        match &self.op {
            DerivedOp::Ratio {
                numerator,
                denominator,
            } => {
                let n = value_of(numerator)?;
                let d = value_of(denominator)?;
                (d != 0.0).then(|| n / d)
            }
            DerivedOp::NaturalLog { input } => {
                let v = value_of(input)?;
                (v > 0.0).then(|| v.ln())
            }
            DerivedOp::PerThousand {
                numerator,
                denominator,
            } => {
                let n = value_of(numerator)?;
                let d = value_of(denominator)?;
                (d != 0.0).then(|| n / d * 1000.0)
            }
        }
    }
}

/// Well-known derived columns. Each is kept only when every input metric
/// is actually configured, so an unused definition costs nothing.
pub fn default_derived_columns() -> Vec<DerivedColumn> {
    vec![
        DerivedColumn {
            name: "price_to_income_ratio".to_string(),
            op: DerivedOp::Ratio {
                numerator: "price_eur_m2".to_string(),
                denominator: "income_eur_year".to_string(),
            },
        },
        DerivedColumn {
            name: "log_income".to_string(),
            op: DerivedOp::NaturalLog {
                input: "income_eur_year".to_string(),
            },
        },
        DerivedColumn {
            name: "listings_per_thousand".to_string(),
            op: DerivedOp::PerThousand {
                numerator: "listings_count".to_string(),
                denominator: "population".to_string(),
            },
        },
    ]
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AssembleStats {
    pub periods: usize,
    pub metric_columns: usize,
    pub derived_columns: usize,
    pub rows_written: u64,
    pub chunks: u64,
}

struct Candidate {
    value: f64,
    source_rank: usize,
    dataset_id: String,
}

/// Lower source rank wins; within a rank the newest dataset wins
fn beats(challenger: &Candidate, incumbent: &Candidate) -> bool {
    challenger.source_rank < incumbent.source_rank
        || (challenger.source_rank == incumbent.source_rank
            && challenger.dataset_id > incumbent.dataset_id)
}

fn valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub struct MasterAssembler {
    pool: SqlitePool,
    chunk_size: usize,
    source_precedence: Vec<String>,
}

impl MasterAssembler {
    pub fn new(pool: SqlitePool, chunk_size: usize, source_precedence: Vec<String>) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
            source_precedence,
        }
    }

    fn rank(&self, source_tag: &str) -> usize {
        self.source_precedence
            .iter()
            .position(|s| s == source_tag)
            .unwrap_or(self.source_precedence.len())
    }

    /// Rebuild the master table from the given columns.
    pub async fn assemble(
        &self,
        columns: &[MasterColumn],
        derived: &[DerivedColumn],
    ) -> Result<AssembleStats> {
        let mut seen: BTreeSet<String> = ["entity_id", "year", "quarter"]
            .into_iter()
            .map(String::from)
            .collect();

        let mut metric_columns: Vec<MasterColumn> = Vec::new();
        for column in columns {
            assert_fact_table(&column.table);
            if !valid_identifier(&column.name) {
                warn!(
                    column = column.name.as_str(),
                    "Metric name is not a usable column name, skipping"
                );
                continue;
            }
            if !seen.insert(column.name.clone()) {
                warn!(
                    column = column.name.as_str(),
                    "Column name already taken, skipping"
                );
                continue;
            }
            metric_columns.push(column.clone());
        }

        let metric_names: BTreeSet<&str> =
            metric_columns.iter().map(|c| c.name.as_str()).collect();
        let mut derived_columns: Vec<DerivedColumn> = Vec::new();
        for column in derived {
            if !valid_identifier(&column.name) || !seen.insert(column.name.clone()) {
                warn!(
                    column = column.name.as_str(),
                    "Derived column name unusable or already taken, skipping"
                );
                continue;
            }
            if column.inputs().iter().any(|i| !metric_names.contains(i)) {
                debug!(
                    column = column.name.as_str(),
                    "Derived column inputs not configured, skipping"
                );
                continue;
            }
            derived_columns.push(column.clone());
        }

        let tables: BTreeSet<&str> = metric_columns.iter().map(|c| c.table.as_str()).collect();
        let mut periods: BTreeSet<(i64, i64)> = BTreeSet::new();
        for table in &tables {
            let rows: Vec<(i64, i64)> = sqlx::query_as(&format!(
                "SELECT DISTINCT year, quarter FROM {table} WHERE quarter IS NOT NULL"
            ))
            .fetch_all(&self.pool)
            .await?;
            periods.extend(rows);
        }

        let entities: Vec<(i64,)> =
            sqlx::query_as("SELECT entity_id FROM neighborhoods ORDER BY entity_id")
                .fetch_all(&self.pool)
                .await?;

        // Winner per cell for every metric column, precedence applied as
        // candidates stream in
        let mut cells: Vec<HashMap<(i64, i64, i64), Candidate>> =
            Vec::with_capacity(metric_columns.len());
        for column in &metric_columns {
            let rows: Vec<(i64, i64, i64, Option<f64>, String, String)> =
                sqlx::query_as(&format!(
                    "SELECT entity_id, year, quarter, value, source_tag, dataset_id
                     FROM {} WHERE metric_name = ? AND quarter IS NOT NULL",
                    column.table
                ))
                .bind(&column.name)
                .fetch_all(&self.pool)
                .await?;

            let mut map: HashMap<(i64, i64, i64), Candidate> = HashMap::new();
            for (entity_id, year, quarter, value, source_tag, dataset_id) in rows {
                let Some(value) = value else { continue };
                let candidate = Candidate {
                    value,
                    source_rank: self.rank(&source_tag),
                    dataset_id,
                };
                match map.get(&(entity_id, year, quarter)) {
                    Some(incumbent) if !beats(&candidate, incumbent) => {}
                    _ => {
                        map.insert((entity_id, year, quarter), candidate);
                    }
                }
            }
            cells.push(map);
        }

        self.create_master(&metric_columns, &derived_columns).await?;

        let mut rows: Vec<(i64, i64, i64, Vec<Option<f64>>)> =
            Vec::with_capacity(periods.len() * entities.len());
        for &(year, quarter) in &periods {
            for &(entity_id,) in &entities {
                let metric_values: Vec<Option<f64>> = cells
                    .iter()
                    .map(|map| map.get(&(entity_id, year, quarter)).map(|c| c.value))
                    .collect();
                let value_of = |name: &str| -> Option<f64> {
                    metric_columns
                        .iter()
                        .position(|c| c.name == name)
                        .and_then(|i| metric_values[i])
                };
                let derived_values: Vec<Option<f64>> = derived_columns
                    .iter()
                    .map(|d| d.compute(&value_of))
                    .collect();
                let mut values = metric_values;
                values.extend(derived_values);
                rows.push((entity_id, year, quarter, values));
            }
        }

        let mut stats = AssembleStats {
            periods: periods.len(),
            metric_columns: metric_columns.len(),
            derived_columns: derived_columns.len(),
            rows_written: rows.len() as u64,
            chunks: 0,
        };

        let insert_sql = {
            let mut names = vec!["entity_id", "year", "quarter"];
            names.extend(metric_columns.iter().map(|c| c.name.as_str()));
            names.extend(derived_columns.iter().map(|d| d.name.as_str()));
            let placeholders = vec!["?"; names.len()].join(", ");
            format!(
                "INSERT INTO {MASTER_TABLE} ({}) VALUES ({})",
                names.join(", "),
                placeholders
            )
        };

        for chunk in rows.chunks(self.chunk_size) {
            let mut tx = self.pool.begin().await?;
            for (entity_id, year, quarter, values) in chunk {
                let mut query = sqlx::query(&insert_sql)
                    .bind(entity_id)
                    .bind(year)
                    .bind(quarter);
                for value in values {
                    query = query.bind(*value);
                }
                query.execute(&mut *tx).await?;
            }
            tx.commit().await?;
            stats.chunks += 1;
        }

        info!(
            periods = stats.periods,
            metric_columns = stats.metric_columns,
            derived_columns = stats.derived_columns,
            rows = stats.rows_written,
            "Master table assembled"
        );
        Ok(stats)
    }

    async fn create_master(
        &self,
        metric_columns: &[MasterColumn],
        derived_columns: &[DerivedColumn],
    ) -> Result<()> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {MASTER_TABLE}"))
            .execute(&self.pool)
            .await?;

        let mut ddl: Vec<String> = vec![
            "entity_id INTEGER NOT NULL REFERENCES neighborhoods(entity_id)".to_string(),
            "year INTEGER NOT NULL".to_string(),
            "quarter INTEGER NOT NULL CHECK (quarter >= 1 AND quarter <= 4)".to_string(),
        ];
        ddl.extend(metric_columns.iter().map(|c| format!("{} REAL", c.name)));
        ddl.extend(derived_columns.iter().map(|d| format!("{} REAL", d.name)));

        sqlx::query(&format!(
            "CREATE TABLE {MASTER_TABLE} ({})",
            ddl.join(", ")
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE UNIQUE INDEX idx_{MASTER_TABLE}_cell \
             ON {MASTER_TABLE}(entity_id, year, quarter)"
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
