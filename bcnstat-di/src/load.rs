//! Chunked bulk loading into fact tables
//!
//! Rows are written through a single acquired connection in fixed-size
//! chunks, one transaction per chunk, so a crash leaves at most one
//! partially committed chunk and a rerun in replace mode truncates and
//! reloads. `PRAGMA foreign_keys` is a per-connection setting in SQLite:
//! it is switched OFF on that connection for the duration of the load and
//! restored afterwards even when a chunk fails. Referential checks are
//! the Integrity Validator's job once the load is done.

use crate::error::Result;
use bcnstat_common::db::init::assert_fact_table;
use bcnstat_common::db::models::FactRecord;
use serde::Serialize;
use sqlx::{Connection, SqliteConnection, SqlitePool};
use tracing::{debug, info};

/// How existing rows in the target table are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Delete all existing rows first (first dataset of a table per run)
    Replace,
    /// Keep existing rows (subsequent datasets of the same table)
    Append,
}

/// Counters from one bulk load
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LoadStats {
    pub rows_written: u64,
    pub rows_deleted: u64,
    pub chunks: u64,
}

pub struct BatchLoader {
    pool: SqlitePool,
    chunk_size: usize,
}

impl BatchLoader {
    pub fn new(pool: SqlitePool, chunk_size: usize) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Bulk-load records into one fact table.
    pub async fn load(
        &self,
        table: &str,
        records: Vec<FactRecord>,
        mode: LoadMode,
    ) -> Result<LoadStats> {
        assert_fact_table(table);
        let mut stats = LoadStats::default();
        let mut conn = self.pool.acquire().await?;

        if mode == LoadMode::Replace {
            let deleted = sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *conn)
                .await?;
            stats.rows_deleted = deleted.rows_affected();
        }

        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&mut *conn)
            .await?;
        let written = self
            .write_chunks(&mut conn, table, records, &mut stats)
            .await;
        let restored = sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&mut *conn)
            .await;
        written?;
        restored?;

        info!(
            table,
            rows = stats.rows_written,
            deleted = stats.rows_deleted,
            chunks = stats.chunks,
            "Bulk load complete"
        );
        Ok(stats)
    }

    async fn write_chunks(
        &self,
        conn: &mut SqliteConnection,
        table: &str,
        records: Vec<FactRecord>,
        stats: &mut LoadStats,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {table}
             (entity_id, year, quarter, metric_name, value, source_tag, dataset_id,
              is_interpolated)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        );

        let mut pending = records;
        while !pending.is_empty() {
            let take = pending.len().min(self.chunk_size);
            let chunk: Vec<FactRecord> = pending.drain(..take).collect();

            let mut tx = conn.begin().await?;
            for record in &chunk {
                let query = sqlx::query(&sql)
                    .bind(record.entity_id)
                    .bind(record.year)
                    .bind(record.quarter_number())
                    .bind(&record.metric_name);
                let query = match record.value {
                    Some(v) => match integral(v) {
                        Some(i) => query.bind(i),
                        None => query.bind(v),
                    },
                    None => query.bind(None::<f64>),
                };
                query
                    .bind(&record.source_tag)
                    .bind(&record.dataset_id)
                    .bind(record.is_interpolated)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;

            stats.chunks += 1;
            stats.rows_written += chunk.len() as u64;
            debug!(table, chunk_rows = chunk.len(), "Committed chunk");
            // chunk buffer dropped here, before the next one is built
        }
        Ok(())
    }
}

/// Integral finite values are bound as INTEGER so SQLite stores them at
/// the smallest width; everything else stays REAL.
fn integral(value: f64) -> Option<i64> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e18 {
        Some(value as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcnstat_common::db::init::init_schema;
    use bcnstat_common::db::migrations::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    async fn seed_entity(pool: &SqlitePool, id: i64) {
        sqlx::query(
            "INSERT INTO neighborhoods
             (entity_id, canonical_name, normalized_name, administrative_code, district_id)
             VALUES (?, ?, ?, ?, 1)",
        )
        .bind(id)
        .bind(format!("Barri {}", id))
        .bind(format!("barri {}", id))
        .bind(format!("{:02}", id))
        .execute(pool)
        .await
        .unwrap();
    }

    fn record(entity: i64, year: i32, metric: &str, value: Option<f64>) -> FactRecord {
        FactRecord {
            entity_id: entity,
            year,
            quarter: None,
            metric_name: metric.to_string(),
            value,
            source_tag: "census".to_string(),
            dataset_id: "census-1".to_string(),
            is_interpolated: false,
        }
    }

    async fn count(pool: &SqlitePool, table: &str) -> i64 {
        let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap();
        n
    }

    #[tokio::test]
    async fn test_replace_then_append() {
        let pool = test_pool().await;
        seed_entity(&pool, 1).await;
        let loader = BatchLoader::new(pool.clone(), 100);

        let rows = vec![
            record(1, 2019, "population", Some(100.0)),
            record(1, 2020, "population", Some(101.0)),
            record(1, 2021, "population", Some(102.0)),
        ];
        loader
            .load("fact_population", rows, LoadMode::Replace)
            .await
            .unwrap();
        assert_eq!(count(&pool, "fact_population").await, 3);

        loader
            .load(
                "fact_population",
                vec![record(1, 2022, "population", Some(103.0))],
                LoadMode::Append,
            )
            .await
            .unwrap();
        assert_eq!(count(&pool, "fact_population").await, 4);

        let stats = loader
            .load(
                "fact_population",
                vec![record(1, 2023, "population", Some(104.0))],
                LoadMode::Replace,
            )
            .await
            .unwrap();
        assert_eq!(stats.rows_deleted, 4);
        assert_eq!(count(&pool, "fact_population").await, 1);
    }

    #[tokio::test]
    async fn test_chunking() {
        let pool = test_pool().await;
        seed_entity(&pool, 1).await;
        let loader = BatchLoader::new(pool.clone(), 2);

        let rows: Vec<FactRecord> = (2015..2020)
            .map(|year| record(1, year, "population", Some(100.0)))
            .collect();
        let stats = loader
            .load("fact_population", rows, LoadMode::Replace)
            .await
            .unwrap();

        assert_eq!(stats.rows_written, 5);
        assert_eq!(stats.chunks, 3);
        assert_eq!(count(&pool, "fact_population").await, 5);
    }

    #[tokio::test]
    async fn test_value_storage_classes() {
        let pool = test_pool().await;
        seed_entity(&pool, 1).await;
        let loader = BatchLoader::new(pool.clone(), 100);

        loader
            .load(
                "fact_income",
                vec![
                    record(1, 2019, "income", Some(42.0)),
                    record(1, 2020, "income", Some(9.5)),
                    record(1, 2021, "income", None),
                ],
                LoadMode::Replace,
            )
            .await
            .unwrap();

        let classes: Vec<(i32, String)> =
            sqlx::query_as("SELECT year, typeof(value) FROM fact_income ORDER BY year")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(
            classes,
            vec![
                (2019, "integer".to_string()),
                (2020, "real".to_string()),
                (2021, "null".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_foreign_keys_deferred_then_restored() {
        let pool = test_pool().await;
        seed_entity(&pool, 1).await;
        let loader = BatchLoader::new(pool.clone(), 100);

        // entity 60 has no dimension row; the loader accepts it and leaves
        // the orphan for the validator
        loader
            .load(
                "fact_population",
                vec![record(60, 2021, "population", Some(1.0))],
                LoadMode::Replace,
            )
            .await
            .unwrap();
        assert_eq!(count(&pool, "fact_population").await, 1);

        // outside the loader the connection enforces foreign keys again
        let direct = sqlx::query(
            "INSERT INTO fact_population
             (entity_id, year, metric_name, value, source_tag, dataset_id)
             VALUES (61, 2021, 'population', 1.0, 's', 'd')",
        )
        .execute(&pool)
        .await;
        assert!(direct.is_err());
    }

    #[tokio::test]
    async fn test_empty_load_still_truncates() {
        let pool = test_pool().await;
        seed_entity(&pool, 1).await;
        let loader = BatchLoader::new(pool.clone(), 100);

        loader
            .load(
                "fact_poi",
                vec![record(1, 2021, "poi_count", Some(3.0))],
                LoadMode::Replace,
            )
            .await
            .unwrap();
        let stats = loader
            .load("fact_poi", Vec::new(), LoadMode::Replace)
            .await
            .unwrap();

        assert_eq!(stats.rows_deleted, 1);
        assert_eq!(stats.chunks, 0);
        assert_eq!(count(&pool, "fact_poi").await, 0);
    }

    #[tokio::test]
    #[should_panic(expected = "unknown fact table")]
    async fn test_unknown_table_panics() {
        let pool = test_pool().await;
        let loader = BatchLoader::new(pool, 100);
        let _ = loader.load("users", Vec::new(), LoadMode::Replace).await;
    }
}
