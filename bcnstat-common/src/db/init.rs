//! Database initialization
//!
//! Creates the dimension, fact and bookkeeping tables on first run and
//! keeps re-initialization idempotent (`CREATE TABLE IF NOT EXISTS`
//! everywhere). Structural changes beyond that live in
//! `db::migrations`.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Expected number of canonical neighborhoods in the dimension table.
pub const NEIGHBORHOOD_COUNT: i64 = 73;

/// All fact tables, in load and validation order.
pub const FACT_TABLES: &[&str] = &[
    "fact_population",
    "fact_income",
    "fact_housing_prices",
    "fact_str_listings",
    "fact_poi",
];

/// Name of the assembled wide table. Created by the assembler, not here.
pub const MASTER_TABLE: &str = "master_table";

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers during long load transactions
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    init_schema(&pool).await?;

    crate::db::migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// Create all tables (idempotent, safe to call on every startup)
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_neighborhoods_table(pool).await?;
    create_neighborhood_aliases_table(pool).await?;
    for table in FACT_TABLES {
        create_fact_table(pool, table).await?;
    }
    create_run_sessions_table(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the neighborhoods dimension table
///
/// One row per canonical neighborhood. `entity_id` is the stable
/// municipal neighborhood number (1-73); `normalized_name` is the
/// canonical name after text normalization and must be unique so exact
/// name matching is unambiguous.
pub async fn create_neighborhoods_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS neighborhoods (
            entity_id INTEGER PRIMARY KEY,
            canonical_name TEXT NOT NULL,
            normalized_name TEXT NOT NULL UNIQUE,
            administrative_code TEXT NOT NULL UNIQUE,
            district_id INTEGER NOT NULL CHECK (district_id >= 1 AND district_id <= 10),
            external_code TEXT,
            geometry TEXT,
            centroid_lat REAL,
            centroid_lon REAL,
            area_km2 REAL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (entity_id >= 1 AND entity_id <= 73),
            CHECK (area_km2 IS NULL OR area_km2 > 0.0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_neighborhoods_district ON neighborhoods(district_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the alias lookup table
///
/// Maps historical and colloquial normalized spellings to entities.
pub async fn create_neighborhood_aliases_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS neighborhood_aliases (
            alias_normalized TEXT PRIMARY KEY,
            entity_id INTEGER NOT NULL REFERENCES neighborhoods(entity_id) ON DELETE CASCADE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_neighborhood_aliases_entity ON neighborhood_aliases(entity_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create one fact table
///
/// All five fact tables share this layout. `quarter` is NULL for annual
/// rows; the uniqueness index coalesces it to 0 because SQLite treats
/// NULLs as distinct in unique indexes, which would otherwise admit
/// duplicate annual rows.
pub async fn create_fact_table(pool: &SqlitePool, table: &str) -> Result<()> {
    assert_fact_table(table);

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id INTEGER NOT NULL REFERENCES neighborhoods(entity_id),
            year INTEGER NOT NULL CHECK (year >= 1900 AND year <= 2100),
            quarter INTEGER CHECK (quarter IS NULL OR (quarter >= 1 AND quarter <= 4)),
            metric_name TEXT NOT NULL,
            value REAL,
            source_tag TEXT NOT NULL,
            dataset_id TEXT NOT NULL,
            is_interpolated INTEGER NOT NULL DEFAULT 0 CHECK (is_interpolated IN (0, 1)),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_series \
         ON {table}(entity_id, year, COALESCE(quarter, 0), metric_name, source_tag, dataset_id)"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_period ON {table}(year, quarter)"
    ))
    .execute(pool)
    .await?;
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_metric ON {table}(metric_name)"
    ))
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the run bookkeeping table
///
/// One row per pipeline invocation; `summary` holds the serialized run
/// report once the run finishes.
pub async fn create_run_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_sessions (
            run_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL CHECK (status IN ('running', 'succeeded', 'failed')),
            summary TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Panic guard for table names interpolated into SQL.
///
/// Caller bugs only; every fact table name comes from `FACT_TABLES`.
pub fn assert_fact_table(table: &str) {
    assert!(
        FACT_TABLES.contains(&table),
        "unknown fact table: {}",
        table
    );
}
