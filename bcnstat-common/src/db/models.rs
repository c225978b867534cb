//! Database models

use crate::geo::Polygon;
use crate::period::{Period, Quarter};
use crate::Result;
use serde::{Deserialize, Serialize};

/// One canonical administrative neighborhood (dimension row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighborhood {
    pub entity_id: i64,
    pub canonical_name: String,
    pub normalized_name: String,
    pub administrative_code: String,
    pub district_id: i64,
    pub external_code: Option<String>,
    /// Boundary rings as JSON, see `geo::Polygon::from_json`
    pub geometry: Option<String>,
    pub centroid_lat: Option<f64>,
    pub centroid_lon: Option<f64>,
    pub area_km2: Option<f64>,
}

impl Neighborhood {
    /// Parse the stored boundary, if any
    pub fn polygon(&self) -> Result<Option<Polygon>> {
        self.geometry.as_deref().map(Polygon::from_json).transpose()
    }
}

/// One observation in a fact table, keyed by entity, period, metric and
/// provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
    pub entity_id: i64,
    pub year: i32,
    pub quarter: Option<Quarter>,
    pub metric_name: String,
    pub value: Option<f64>,
    pub source_tag: String,
    pub dataset_id: String,
    pub is_interpolated: bool,
}

impl FactRecord {
    pub fn period(&self) -> Period {
        Period {
            year: self.year,
            quarter: self.quarter,
        }
    }

    /// Quarter as stored in the database (NULL for annual rows)
    pub fn quarter_number(&self) -> Option<i64> {
        self.quarter.map(|q| q.number() as i64)
    }
}
