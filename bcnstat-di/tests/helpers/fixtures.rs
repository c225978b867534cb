//! Fixture builders: test database, synthetic catalog, dataset files
//!
//! The catalog fixture lays all 73 neighborhoods out on a grid of disjoint
//! 0.02-degree squares inside the default Barcelona bounds, so coordinate
//! fixtures can target a known entity via `cell_center`.

// Each test binary uses a different subset of these helpers
#![allow(dead_code)]

use bcnstat_common::config::{BoundsConfig, IntegrationConfig, Thresholds};
use bcnstat_common::db::init::init_database;
use bcnstat_common::geo::{Point, Polygon};
use bcnstat_di::dimension::{Catalog, CatalogEntry};
use bcnstat_di::extract::{DatasetDescriptor, Granularity, MetricKind};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Grid layout: 10 cells per row, 0.02 degrees on a side, anchored just
/// inside the default bounds
const GRID_ORIGIN_LAT: f64 = 41.26;
const GRID_ORIGIN_LON: f64 = 2.01;
const GRID_CELL_DEG: f64 = 0.02;
const GRID_COLUMNS: i64 = 10;

/// Create a file-backed test database with full schema and migrations.
///
/// Returns (TempDir, SqlitePool) - the TempDir must be kept alive for the
/// duration of the test.
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("bcnstat.db")).await.unwrap();
    (dir, pool)
}

/// Pipeline configuration for tests: default thresholds and bounds, a
/// fixed source precedence, and the usual critical tables
pub fn test_config(dir: &Path) -> IntegrationConfig {
    IntegrationConfig {
        database_path: dir.join("bcnstat.db"),
        chunk_size: 500,
        thresholds: Thresholds::default(),
        bounds: BoundsConfig::default(),
        source_precedence: vec![
            "census".to_string(),
            "tax_agency".to_string(),
            "portal".to_string(),
        ],
        critical_tables: vec![
            "fact_population".to_string(),
            "fact_income".to_string(),
            "fact_housing_prices".to_string(),
        ],
    }
}

/// Southwest corner of one entity's grid cell
fn cell_origin(entity_id: i64) -> (f64, f64) {
    let row = (entity_id - 1) / GRID_COLUMNS;
    let col = (entity_id - 1) % GRID_COLUMNS;
    (
        GRID_ORIGIN_LAT + row as f64 * GRID_CELL_DEG,
        GRID_ORIGIN_LON + col as f64 * GRID_CELL_DEG,
    )
}

/// Center point of one entity's grid cell, as (lat, lon)
pub fn cell_center(entity_id: i64) -> (f64, f64) {
    let (lat, lon) = cell_origin(entity_id);
    (lat + GRID_CELL_DEG / 2.0, lon + GRID_CELL_DEG / 2.0)
}

fn cell_geometry(entity_id: i64) -> serde_json::Value {
    let (lat, lon) = cell_origin(entity_id);
    let polygon = Polygon::from_exterior(vec![
        Point::new(lat, lon),
        Point::new(lat, lon + GRID_CELL_DEG),
        Point::new(lat + GRID_CELL_DEG, lon + GRID_CELL_DEG),
        Point::new(lat + GRID_CELL_DEG, lon),
    ])
    .unwrap();
    serde_json::from_str(&polygon.to_json()).unwrap()
}

/// Complete 73-entity catalog with geometry for every entity.
///
/// The first entities carry real names (and one historical alias) so text
/// resolution fixtures read naturally; the rest are synthetic.
pub fn full_catalog() -> Catalog {
    let named = [
        "el Raval",
        "el Barri Gòtic",
        "la Barceloneta",
        "Sant Pere, Santa Caterina i la Ribera",
        "el Fort Pienc",
        "la Sagrada Família",
    ];
    let entries = (1..=73)
        .map(|i| CatalogEntry {
            entity_id: i,
            name: named
                .get((i - 1) as usize)
                .map(|n| n.to_string())
                .unwrap_or_else(|| format!("Barri {}", i)),
            code: format!("{:02}", i),
            district_id: (i - 1) / 8 + 1,
            external_code: None,
            geometry: Some(cell_geometry(i)),
            aliases: if i == 1 {
                vec!["Barri Xino".to_string()]
            } else {
                Vec::new()
            },
        })
        .collect();
    Catalog::from_entries(entries).unwrap()
}

/// Write a JSON dataset file under `dir` and return its path
pub fn write_dataset(dir: &Path, file: &str, rows: serde_json::Value) -> PathBuf {
    let path = dir.join(file);
    std::fs::write(&path, serde_json::to_string_pretty(&rows).unwrap()).unwrap();
    path
}

/// Manifest descriptor for a dataset file written by `write_dataset`
pub fn descriptor(
    file_path: PathBuf,
    source_tag: &str,
    dataset_id: &str,
    table: &str,
    granularity: Granularity,
    metrics: &[(&str, MetricKind)],
) -> DatasetDescriptor {
    DatasetDescriptor {
        file_path,
        source_tag: source_tag.to_string(),
        dataset_id: dataset_id.to_string(),
        table: table.to_string(),
        granularity,
        metric_schema: metrics
            .iter()
            .map(|(name, kind)| (name.to_string(), *kind))
            .collect(),
    }
}

/// Row count of one table
pub async fn fact_count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Column names of the assembled master table, in declaration order
pub async fn master_columns(pool: &SqlitePool) -> Vec<String> {
    sqlx::query_scalar("SELECT name FROM pragma_table_info('master_table') ORDER BY cid")
        .fetch_all(pool)
        .await
        .unwrap()
}

/// One cell of the master table; None when the column is NULL there
pub async fn master_value(
    pool: &SqlitePool,
    column: &str,
    entity_id: i64,
    year: i64,
    quarter: i64,
) -> Option<f64> {
    sqlx::query_scalar(&format!(
        "SELECT {column} FROM master_table WHERE entity_id = ? AND year = ? AND quarter = ?"
    ))
    .bind(entity_id)
    .bind(year)
    .bind(quarter)
    .fetch_one(pool)
    .await
    .unwrap()
}
