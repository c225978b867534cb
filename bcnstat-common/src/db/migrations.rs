//! Database schema migrations
//!
//! Versioned migrations so existing databases upgrade in place without
//! manual deletion or data loss.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - They must remain stable for users upgrading from older versions
//! 2. **Always add new migrations** - Create a new migration function for each schema change
//! 3. **Use ALTER TABLE** - Prefer ALTER TABLE over DROP/CREATE to preserve data

use crate::geo::Polygon;
use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations (idempotent)
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        warn!("This may indicate a downgrade. Proceeding with caution.");
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    info!("All migrations completed successfully");
    Ok(())
}

/// Migration v1: Add external_code column to neighborhoods
///
/// **Background:** The dimension table initially carried only the
/// municipal administrative code. Cross-referencing datasets keyed by
/// other code systems needs a second, optional code column.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: Add external_code column to neighborhoods");

    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='neighborhoods'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        // Table doesn't exist yet - will be created with correct schema
        info!("  Neighborhoods table doesn't exist yet - skipping migration");
        return Ok(());
    }

    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('neighborhoods') WHERE name = 'external_code'",
    )
    .fetch_one(pool)
    .await?;

    if has_column > 0 {
        info!("  external_code column already exists - skipping");
        return Ok(());
    }

    sqlx::query("ALTER TABLE neighborhoods ADD COLUMN external_code TEXT")
        .execute(pool)
        .await?;

    info!("  Added external_code column to neighborhoods table");
    Ok(())
}

/// Migration v2: Backfill centroid and area columns from stored geometry
///
/// **Background:** Earlier databases stored boundary polygons but left
/// `centroid_lat`, `centroid_lon` and `area_km2` NULL; geocoding and
/// per-area rates need them populated.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: Backfill geometry-derived columns");

    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='neighborhoods'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        info!("  Neighborhoods table doesn't exist yet - skipping migration");
        return Ok(());
    }

    let updated = backfill_geometry_derivatives(pool).await?;
    info!("  Backfilled geometry derivatives for {} neighborhoods", updated);
    Ok(())
}

/// Compute centroid and area for every neighborhood that has a boundary
/// polygon but missing derived columns. Returns the number of rows
/// updated. Malformed geometry is logged and skipped, never fatal.
///
/// Also called after dimension seeding, so boundary updates take effect
/// without a schema version bump.
pub async fn backfill_geometry_derivatives(pool: &SqlitePool) -> Result<u64> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        r#"
        SELECT entity_id, geometry FROM neighborhoods
        WHERE geometry IS NOT NULL
          AND (centroid_lat IS NULL OR centroid_lon IS NULL OR area_km2 IS NULL)
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut updated = 0u64;
    for (entity_id, geometry) in rows {
        let polygon = match Polygon::from_json(&geometry) {
            Ok(p) => p,
            Err(e) => {
                warn!(entity_id, "Skipping geometry backfill: {}", e);
                continue;
            }
        };
        let centroid = polygon.centroid();
        let area = polygon.area_km2();
        sqlx::query(
            "UPDATE neighborhoods SET centroid_lat = ?, centroid_lon = ?, area_km2 = ? WHERE entity_id = ?",
        )
        .bind(centroid.lat)
        .bind(centroid.lon)
        .bind(area)
        .bind(entity_id)
        .execute(pool)
        .await?;
        updated += 1;
    }

    Ok(updated)
}
