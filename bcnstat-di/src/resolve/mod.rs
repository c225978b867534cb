//! Neighborhood resolution
//!
//! Maps raw location references (codes, free-text names, coordinates) to
//! canonical entity ids. All lookup state lives in a `ResolutionContext`
//! built once per run from the dimension tables; components receive the
//! context explicitly, so tests run against fresh, fully controlled
//! contexts instead of hidden module state.
//!
//! Submodules:
//! - `text` - name normalization
//! - `resolver` - code / normalized-name / alias matching
//! - `geocoder` - point-in-polygon matching with textual fallback

pub mod geocoder;
pub mod resolver;
pub mod text;

use crate::error::Result;
use crate::types::{EntityId, RawObservation, Resolution, UnresolvedReason};
use bcnstat_common::db::models::Neighborhood;
use bcnstat_common::geo::{BoundingBox, Polygon};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Per-method resolution counters for coverage reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    pub by_code: u64,
    pub by_name: u64,
    pub by_alias: u64,
    pub by_geometry: u64,
    /// Points contained by more than one polygon (data-quality signal)
    pub ambiguous_points: u64,
    pub unresolved: u64,
}

impl MatchStats {
    pub fn resolved_total(&self) -> u64 {
        self.by_code + self.by_name + self.by_alias + self.by_geometry
    }
}

/// Lookup state for one pipeline run.
///
/// Built from the dimension tables at run start; geometry is kept in
/// ascending `entity_id` order so the polygon scan has a canonical
/// tie-break order.
pub struct ResolutionContext {
    by_code: HashMap<String, EntityId>,
    by_name: HashMap<String, EntityId>,
    aliases: HashMap<String, EntityId>,
    geometries: Vec<(EntityId, Polygon)>,
    bounds: BoundingBox,
    stats: MatchStats,
}

impl ResolutionContext {
    /// Load lookup state from the dimension tables
    pub async fn load(pool: &SqlitePool, bounds: BoundingBox) -> Result<Self> {
        let rows: Vec<(i64, String, String, Option<String>)> = sqlx::query_as(
            "SELECT entity_id, normalized_name, administrative_code, geometry \
             FROM neighborhoods ORDER BY entity_id",
        )
        .fetch_all(pool)
        .await?;

        let alias_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT alias_normalized, entity_id FROM neighborhood_aliases")
                .fetch_all(pool)
                .await?;

        let mut ctx = Self::empty(bounds);
        for (entity_id, normalized_name, administrative_code, geometry) in rows {
            ctx.by_code.insert(administrative_code, entity_id);
            ctx.by_name.insert(normalized_name, entity_id);
            if let Some(json) = geometry {
                match Polygon::from_json(&json) {
                    Ok(polygon) => ctx.geometries.push((entity_id, polygon)),
                    Err(e) => warn!(entity_id, "Skipping unusable geometry: {}", e),
                }
            }
        }
        for (alias, entity_id) in alias_rows {
            ctx.aliases.insert(alias, entity_id);
        }

        debug!(
            entities = ctx.by_name.len(),
            aliases = ctx.aliases.len(),
            with_geometry = ctx.geometries.len(),
            "Resolution context loaded"
        );
        Ok(ctx)
    }

    /// Build a context directly from dimension rows (fixture/test use)
    pub fn from_entities(
        entities: &[Neighborhood],
        aliases: &[(String, EntityId)],
        bounds: BoundingBox,
    ) -> Self {
        let mut ctx = Self::empty(bounds);
        let mut sorted: Vec<&Neighborhood> = entities.iter().collect();
        sorted.sort_by_key(|n| n.entity_id);
        for entity in sorted {
            ctx.by_code
                .insert(entity.administrative_code.clone(), entity.entity_id);
            ctx.by_name
                .insert(entity.normalized_name.clone(), entity.entity_id);
            if let Some(json) = &entity.geometry {
                match Polygon::from_json(json) {
                    Ok(polygon) => ctx.geometries.push((entity.entity_id, polygon)),
                    Err(e) => warn!(entity_id = entity.entity_id, "Skipping unusable geometry: {}", e),
                }
            }
        }
        for (alias, entity_id) in aliases {
            ctx.aliases.insert(alias.clone(), *entity_id);
        }
        ctx
    }

    fn empty(bounds: BoundingBox) -> Self {
        Self {
            by_code: HashMap::new(),
            by_name: HashMap::new(),
            aliases: HashMap::new(),
            geometries: Vec::new(),
            bounds,
            stats: MatchStats::default(),
        }
    }

    /// Resolve one location, dispatching on what it carries: coordinates
    /// go through the geocoder (which itself falls back to text), bare
    /// text goes straight to the resolver.
    pub fn resolve_location(&mut self, location: &crate::types::RawLocation) -> Resolution {
        match (&location.point, &location.text) {
            (Some(point), text) => self.geocode(*point, text.as_deref()),
            (None, Some(text)) => self.resolve_text(text),
            (None, None) => {
                self.stats.unresolved += 1;
                Resolution::Unresolved {
                    raw: location.describe(),
                    reason: UnresolvedReason::EmptyLocation,
                }
            }
        }
    }

    /// Resolve a whole batch, tracking geocoding acceptance
    pub fn resolve_batch(&mut self, records: Vec<RawObservation>) -> BatchResolution {
        let mut batch = BatchResolution::default();
        for record in records {
            let resolution = self.resolve_location(&record.location);
            let has_coords = record.location.point.is_some();
            if has_coords {
                batch.with_coords += 1;
                if resolution.is_resolved() {
                    batch.coords_resolved += 1;
                }
            }
            batch.outcomes.push((record, resolution));
        }
        batch
    }

    pub fn stats(&self) -> &MatchStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut MatchStats {
        &mut self.stats
    }

    pub(crate) fn code_lookup(&self, code: &str) -> Option<EntityId> {
        self.by_code.get(code).copied()
    }

    pub(crate) fn name_lookup(&self, normalized: &str) -> Option<EntityId> {
        self.by_name.get(normalized).copied()
    }

    pub(crate) fn alias_lookup(&self, normalized: &str) -> Option<EntityId> {
        self.aliases.get(normalized).copied()
    }

    pub(crate) fn geometries(&self) -> &[(EntityId, Polygon)] {
        &self.geometries
    }

    pub(crate) fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }
}

/// Result of resolving one batch of records
#[derive(Debug, Default)]
pub struct BatchResolution {
    pub outcomes: Vec<(RawObservation, Resolution)>,
    /// Records that carried coordinates
    pub with_coords: usize,
    /// Coordinate-bearing records that resolved (by any method)
    pub coords_resolved: usize,
}

impl BatchResolution {
    /// Share of coordinate-bearing records that resolved; `None` when the
    /// batch carried no coordinates at all
    pub fn geocode_rate(&self) -> Option<f64> {
        if self.with_coords == 0 {
            None
        } else {
            Some(self.coords_resolved as f64 / self.with_coords as f64)
        }
    }
}
