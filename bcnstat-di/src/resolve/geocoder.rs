//! Point-in-polygon geocoding
//!
//! Coordinates are checked against the metropolitan bounding box first so
//! garbage inputs never reach the polygon scan. Polygons are scanned in
//! ascending entity order; a point contained by more than one polygon is
//! a data-quality signal: the first entity wins, the ambiguity is logged
//! and counted. When geometry is inconclusive the textual field, if any,
//! falls back to the resolver.

use super::ResolutionContext;
use crate::types::{EntityId, MatchMethod, Resolution, UnresolvedReason};
use bcnstat_common::geo::Point;
use tracing::warn;

impl ResolutionContext {
    /// Geocode a point, falling back to `resolve_text` on the textual
    /// field when the point is out of bounds or in no stored polygon.
    pub fn geocode(&mut self, point: Point, fallback_text: Option<&str>) -> Resolution {
        if !self.bounds().contains(point) {
            if let Some(text) = fallback_text {
                return self.resolve_text(text);
            }
            self.stats_mut().unresolved += 1;
            return Resolution::Unresolved {
                raw: format!("({}, {})", point.lat, point.lon),
                reason: UnresolvedReason::OutOfBounds,
            };
        }

        let containing: Vec<EntityId> = self
            .geometries()
            .iter()
            .filter(|(_, polygon)| polygon.contains(point))
            .map(|(entity_id, _)| *entity_id)
            .collect();

        match containing.split_first() {
            Some((winner, rest)) => {
                if !rest.is_empty() {
                    self.stats_mut().ambiguous_points += 1;
                    warn!(
                        entity_id = *winner,
                        also_contained_by = ?rest,
                        lat = point.lat,
                        lon = point.lon,
                        "Point inside multiple polygons, keeping first in entity order"
                    );
                }
                self.stats_mut().by_geometry += 1;
                Resolution::Resolved {
                    entity_id: *winner,
                    method: MatchMethod::PointInPolygon,
                }
            }
            None => {
                if let Some(text) = fallback_text {
                    return self.resolve_text(text);
                }
                self.stats_mut().unresolved += 1;
                Resolution::Unresolved {
                    raw: format!("({}, {})", point.lat, point.lon),
                    reason: UnresolvedReason::NoContainingPolygon,
                }
            }
        }
    }
}
