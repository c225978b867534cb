//! Geometry primitives for neighborhood boundaries
//!
//! Boundaries are stored as polygons in WGS84 (latitude/longitude degrees).
//! A polygon has one exterior ring and zero or more hole rings; a point is
//! inside when it is inside the exterior and outside every hole. Rings are
//! stored as JSON in the database (`[[[lon, lat], ...], ...]`, GeoJSON
//! coordinate order) and parsed on load.
//!
//! Area and centroid use a local equirectangular projection around the
//! polygon's mean latitude, which is accurate to well under a percent at
//! city scale.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Kilometers per degree of latitude (WGS84 mean)
const KM_PER_DEG_LAT: f64 = 110.574;
/// Kilometers per degree of longitude at the equator
const KM_PER_DEG_LON_EQ: f64 = 111.320;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Axis-aligned latitude/longitude box used for coarse coordinate checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn contains(&self, p: Point) -> bool {
        p.lat >= self.min_lat && p.lat <= self.max_lat && p.lon >= self.min_lon && p.lon <= self.max_lon
    }
}

/// A polygon as a list of rings.
///
/// The first ring is the exterior boundary; any further rings are holes.
/// Ring closure is implicit (the last vertex connects back to the first),
/// so a duplicated closing vertex is tolerated but not required.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    rings: Vec<Vec<Point>>,
}

impl Polygon {
    /// Build a polygon from rings, validating that each ring has at least
    /// three vertices and that an exterior ring exists.
    pub fn from_rings(rings: Vec<Vec<Point>>) -> Result<Self> {
        if rings.is_empty() {
            return Err(Error::InvalidInput("polygon has no rings".to_string()));
        }
        for (i, ring) in rings.iter().enumerate() {
            if ring.len() < 3 {
                return Err(Error::InvalidInput(format!(
                    "polygon ring {} has {} vertices (minimum 3)",
                    i,
                    ring.len()
                )));
            }
        }
        Ok(Self { rings })
    }

    /// Convenience constructor for a polygon with no holes
    pub fn from_exterior(ring: Vec<Point>) -> Result<Self> {
        Self::from_rings(vec![ring])
    }

    pub fn exterior(&self) -> &[Point] {
        &self.rings[0]
    }

    pub fn holes(&self) -> &[Vec<Point>] {
        &self.rings[1..]
    }

    /// Even-odd point-in-polygon test.
    ///
    /// A point counts as inside when it is inside the exterior ring and
    /// not inside any hole. Points exactly on an edge may land on either
    /// side; callers that care use entity order as the tie break.
    pub fn contains(&self, p: Point) -> bool {
        if !ring_contains(&self.rings[0], p) {
            return false;
        }
        !self.holes().iter().any(|hole| ring_contains(hole, p))
    }

    /// Centroid of the exterior ring.
    ///
    /// Uses the area-weighted (shoelace) centroid; degenerate rings with
    /// near-zero area fall back to the vertex mean.
    pub fn centroid(&self) -> Point {
        let ring = self.exterior();
        let mut area2 = 0.0;
        let mut cx = 0.0;
        let mut cy = 0.0;
        for i in 0..ring.len() {
            let a = ring[i];
            let b = ring[(i + 1) % ring.len()];
            let cross = a.lon * b.lat - b.lon * a.lat;
            area2 += cross;
            cx += (a.lon + b.lon) * cross;
            cy += (a.lat + b.lat) * cross;
        }
        if area2.abs() < 1e-12 {
            let n = ring.len() as f64;
            let lat = ring.iter().map(|p| p.lat).sum::<f64>() / n;
            let lon = ring.iter().map(|p| p.lon).sum::<f64>() / n;
            return Point::new(lat, lon);
        }
        Point::new(cy / (3.0 * area2), cx / (3.0 * area2))
    }

    /// Polygon area in square kilometers (exterior minus holes).
    pub fn area_km2(&self) -> f64 {
        let exterior = ring_area_km2(self.exterior());
        let holes: f64 = self.holes().iter().map(|h| ring_area_km2(h)).sum();
        (exterior - holes).max(0.0)
    }

    /// Serialize rings to the stored JSON form (`[[[lon, lat], ...], ...]`).
    pub fn to_json(&self) -> String {
        let rings: Vec<Vec<[f64; 2]>> = self
            .rings
            .iter()
            .map(|ring| ring.iter().map(|p| [p.lon, p.lat]).collect())
            .collect();
        // Vec<Vec<[f64; 2]>> serialization cannot fail
        serde_json::to_string(&rings).unwrap_or_default()
    }

    /// Parse rings from the stored JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        let rings: Vec<Vec<[f64; 2]>> = serde_json::from_str(json)
            .map_err(|e| Error::InvalidInput(format!("malformed geometry JSON: {}", e)))?;
        let rings = rings
            .into_iter()
            .map(|ring| ring.into_iter().map(|[lon, lat]| Point::new(lat, lon)).collect())
            .collect();
        Self::from_rings(rings)
    }
}

/// Even-odd ray cast against a single ring.
fn ring_contains(ring: &[Point], p: Point) -> bool {
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[j];
        if (a.lat > p.lat) != (b.lat > p.lat) {
            let x = (b.lon - a.lon) * (p.lat - a.lat) / (b.lat - a.lat) + a.lon;
            if p.lon < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Shoelace area of one ring after projecting degrees to kilometers at the
/// ring's mean latitude.
fn ring_area_km2(ring: &[Point]) -> f64 {
    let mean_lat = ring.iter().map(|p| p.lat).sum::<f64>() / ring.len() as f64;
    let km_per_deg_lon = KM_PER_DEG_LON_EQ * mean_lat.to_radians().cos();
    let mut area2 = 0.0;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        let ax = a.lon * km_per_deg_lon;
        let ay = a.lat * KM_PER_DEG_LAT;
        let bx = b.lon * km_per_deg_lon;
        let by = b.lat * KM_PER_DEG_LAT;
        area2 += ax * by - bx * ay;
    }
    area2.abs() / 2.0
}
