//! Core types shared across the integration pipeline stages

use bcnstat_common::geo::Point;
use std::fmt;

/// Stable neighborhood identifier (1-73), matching `neighborhoods.entity_id`
pub type EntityId = i64;

/// Location reference as it arrives from a source: free text, coordinates,
/// or both. Both absent means the record can never resolve.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawLocation {
    /// Free-text name or administrative code
    pub text: Option<String>,
    /// Geographic point (WGS84)
    pub point: Option<Point>,
}

impl RawLocation {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            point: None,
        }
    }

    pub fn from_point(lat: f64, lon: f64) -> Self {
        Self {
            text: None,
            point: Some(Point::new(lat, lon)),
        }
    }

    /// Best-effort description for diagnostics
    pub fn describe(&self) -> String {
        match (&self.text, &self.point) {
            (Some(t), Some(p)) => format!("'{}' ({}, {})", t, p.lat, p.lon),
            (Some(t), None) => format!("'{}'", t),
            (None, Some(p)) => format!("({}, {})", p.lat, p.lon),
            (None, None) => "<empty>".to_string(),
        }
    }
}

/// One unresolved measurement as produced by an extractor.
///
/// Ephemeral: consumed by the resolution and dedupe stages, never persisted
/// in this form.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub location: RawLocation,
    pub period_raw: String,
    pub metric_name: String,
    pub value: Option<f64>,
    pub source_tag: String,
    pub dataset_id: String,
}

/// How a location was matched to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    AdministrativeCode,
    NormalizedName,
    Alias,
    PointInPolygon,
}

impl MatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchMethod::AdministrativeCode => "administrative_code",
            MatchMethod::NormalizedName => "normalized_name",
            MatchMethod::Alias => "alias",
            MatchMethod::PointInPolygon => "point_in_polygon",
        }
    }
}

/// Why a location failed to resolve
#[derive(Debug, Clone, PartialEq)]
pub enum UnresolvedReason {
    /// Neither text nor coordinates present
    EmptyLocation,
    /// Text matched no code, name or alias
    UnknownName,
    /// Coordinates outside the metropolitan bounding box
    OutOfBounds,
    /// Coordinates inside the bounding box but in no stored polygon
    NoContainingPolygon,
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnresolvedReason::EmptyLocation => "empty location",
            UnresolvedReason::UnknownName => "unknown name",
            UnresolvedReason::OutOfBounds => "coordinates out of bounds",
            UnresolvedReason::NoContainingPolygon => "no containing polygon",
        };
        write!(f, "{}", s)
    }
}

/// Resolution outcome. `Unresolved` is a first-class result, not an error:
/// downstream stages drop and count such records.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved {
        entity_id: EntityId,
        method: MatchMethod,
    },
    Unresolved {
        /// Original location description, kept for diagnostics
        raw: String,
        reason: UnresolvedReason,
    },
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }

    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            Resolution::Resolved { entity_id, .. } => Some(*entity_id),
            Resolution::Unresolved { .. } => None,
        }
    }
}
