//! Neighborhood dimension seeding
//!
//! Loads the curated catalog of the 73 canonical neighborhoods and seeds
//! the `neighborhoods` and `neighborhood_aliases` tables. Seeding is
//! idempotent: existing rows are left alone, geometry is filled only where
//! absent, and centroid/area derivatives are back-filled afterwards. A
//! catalog that does not describe exactly 73 valid entities is fatal.

use crate::error::{PipelineError, Result};
use crate::resolve::text::normalize_name;
use bcnstat_common::db::init::NEIGHBORHOOD_COUNT;
use bcnstat_common::db::migrations::backfill_geometry_derivatives;
use bcnstat_common::geo::Polygon;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

/// One entity as authored in the catalog JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub entity_id: i64,
    /// Display name, articles and accents intact
    pub name: String,
    /// Administrative code, matched verbatim by the resolver
    pub code: String,
    pub district_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_code: Option<String>,
    /// Polygon rings as `[[[lon, lat], ...], ...]`, exterior first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

/// Validated catalog: exactly [`NEIGHBORHOOD_COUNT`] consistent entries
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

/// Counters from one seeding pass
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DimensionStats {
    pub inserted: u64,
    pub already_present: u64,
    pub aliases_inserted: u64,
    pub geometries_filled: u64,
    pub derivatives_computed: u64,
}

impl Catalog {
    /// Load and validate a catalog file. Any defect is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Dimension(format!("cannot read catalog {}: {}", path.display(), e))
        })?;

        let entries: Vec<CatalogEntry> = serde_json::from_str(&content).map_err(|e| {
            PipelineError::Dimension(format!(
                "catalog {} is not a JSON array of entities: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_entries(entries)
    }

    /// Validate a set of entries as a complete catalog.
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Result<Self> {
        if entries.len() as i64 != NEIGHBORHOOD_COUNT {
            return Err(PipelineError::Dimension(format!(
                "catalog must describe exactly {} neighborhoods, got {}",
                NEIGHBORHOOD_COUNT,
                entries.len()
            )));
        }

        let mut ids = BTreeSet::new();
        let mut codes = BTreeSet::new();
        let mut names = BTreeSet::new();
        for entry in &entries {
            entry.validate()?;
            if !ids.insert(entry.entity_id) {
                return Err(PipelineError::Dimension(format!(
                    "duplicate entity_id {} in catalog",
                    entry.entity_id
                )));
            }
            if !codes.insert(entry.code.clone()) {
                return Err(PipelineError::Dimension(format!(
                    "duplicate administrative code '{}' in catalog",
                    entry.code
                )));
            }
            let normalized = normalize_name(&entry.name);
            if !names.insert(normalized.clone()) {
                return Err(PipelineError::Dimension(format!(
                    "names '{}' collide after normalization ('{}')",
                    entry.name, normalized
                )));
            }
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }
}

impl CatalogEntry {
    fn validate(&self) -> Result<()> {
        if !(1..=NEIGHBORHOOD_COUNT).contains(&self.entity_id) {
            return Err(PipelineError::Dimension(format!(
                "entity_id {} outside 1..={}",
                self.entity_id, NEIGHBORHOOD_COUNT
            )));
        }
        if self.name.trim().is_empty() {
            return Err(PipelineError::Dimension(format!(
                "entity {} has an empty name",
                self.entity_id
            )));
        }
        if self.code.trim().is_empty() {
            return Err(PipelineError::Dimension(format!(
                "entity {} has an empty administrative code",
                self.entity_id
            )));
        }
        if !(1..=10).contains(&self.district_id) {
            return Err(PipelineError::Dimension(format!(
                "entity {} has district_id {} outside 1..=10",
                self.entity_id, self.district_id
            )));
        }
        // Parse failures surface here, before any database work
        self.geometry_json()?;
        Ok(())
    }

    /// Canonical geometry JSON for storage, validated through [`Polygon`].
    fn geometry_json(&self) -> Result<Option<String>> {
        match &self.geometry {
            None => Ok(None),
            Some(value) => {
                let raw = value.to_string();
                let polygon = Polygon::from_json(&raw).map_err(|e| {
                    PipelineError::Dimension(format!(
                        "entity {} has invalid geometry: {}",
                        self.entity_id, e
                    ))
                })?;
                Ok(Some(polygon.to_json()))
            }
        }
    }
}

/// Seed the dimension tables from a validated catalog.
///
/// Existing neighborhoods are not modified except that NULL geometry is
/// filled when the catalog provides one. Aliases are append-only. Ends by
/// back-filling centroid/area for any geometry without derivatives and
/// verifying the table holds exactly [`NEIGHBORHOOD_COUNT`] rows.
pub async fn seed_dimension(pool: &SqlitePool, catalog: &Catalog) -> Result<DimensionStats> {
    let mut stats = DimensionStats::default();

    for entry in catalog.entries() {
        let normalized = normalize_name(&entry.name);
        let geometry_json = entry.geometry_json()?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO neighborhoods
             (entity_id, canonical_name, normalized_name, administrative_code,
              district_id, external_code, geometry)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.entity_id)
        .bind(&entry.name)
        .bind(&normalized)
        .bind(&entry.code)
        .bind(entry.district_id)
        .bind(&entry.external_code)
        .bind(&geometry_json)
        .execute(pool)
        .await?;

        if result.rows_affected() == 1 {
            stats.inserted += 1;
        } else {
            stats.already_present += 1;
            if let Some(json) = &geometry_json {
                let filled = sqlx::query(
                    "UPDATE neighborhoods SET geometry = ?
                     WHERE entity_id = ? AND geometry IS NULL",
                )
                .bind(json)
                .bind(entry.entity_id)
                .execute(pool)
                .await?;
                stats.geometries_filled += filled.rows_affected();
            }
        }

        for alias in &entry.aliases {
            let alias_normalized = normalize_name(alias);
            if alias_normalized.is_empty() {
                warn!(
                    entity_id = entry.entity_id,
                    alias, "Alias is empty after normalization, skipping"
                );
                continue;
            }
            let result = sqlx::query(
                "INSERT OR IGNORE INTO neighborhood_aliases (alias_normalized, entity_id)
                 VALUES (?, ?)",
            )
            .bind(&alias_normalized)
            .bind(entry.entity_id)
            .execute(pool)
            .await?;
            stats.aliases_inserted += result.rows_affected();
        }
    }

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM neighborhoods")
        .fetch_one(pool)
        .await?;
    if count != NEIGHBORHOOD_COUNT {
        return Err(PipelineError::Dimension(format!(
            "expected {} neighborhoods after seeding, found {}",
            NEIGHBORHOOD_COUNT, count
        )));
    }

    stats.derivatives_computed = backfill_geometry_derivatives(pool).await?;

    info!(
        inserted = stats.inserted,
        already_present = stats.already_present,
        aliases_inserted = stats.aliases_inserted,
        geometries_filled = stats.geometries_filled,
        derivatives_computed = stats.derivatives_computed,
        "Neighborhood dimension ready"
    );
    Ok(stats)
}
