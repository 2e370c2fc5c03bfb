//! Geographic locations and regions.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

/// A point on the earth's surface, optionally at depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lon: f64,
    /// Depth in km, positive down.
    #[serde(default)]
    pub depth: f64,
}

impl Location {
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            depth: 0.0,
        }
    }

    #[must_use]
    pub const fn with_depth(lat: f64, lon: f64, depth: f64) -> Self {
        Self { lat, lon, depth }
    }

    pub(crate) fn digest(&self, hasher: &mut Xxh3) {
        hasher.update(&self.lat.to_bits().to_le_bytes());
        hasher.update(&self.lon.to_bits().to_le_bytes());
        hasher.update(&self.depth.to_bits().to_le_bytes());
    }
}

// ---------------------------------------------------------------------------
// Region
// ---------------------------------------------------------------------------

/// A closed geographic region used for membership queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Region {
    /// Latitude/longitude bounding box, edges inclusive.
    Rectangle {
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
    },
    /// Simple polygon; the closing edge is implied.
    Polygon { vertices: Vec<Location> },
}

impl Region {
    #[must_use]
    pub const fn rectangle(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self::Rectangle {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    #[must_use]
    pub fn polygon(vertices: Vec<Location>) -> Self {
        Self::Polygon { vertices }
    }

    /// Whether `loc` lies inside the region. Depth is ignored.
    #[must_use]
    pub fn contains(&self, loc: &Location) -> bool {
        match self {
            Self::Rectangle {
                min_lat,
                max_lat,
                min_lon,
                max_lon,
            } => {
                loc.lat >= *min_lat && loc.lat <= *max_lat && loc.lon >= *min_lon && loc.lon <= *max_lon
            }
            Self::Polygon { vertices } => polygon_contains(vertices, loc),
        }
    }

    /// Stable key identifying the region's geometry.
    #[must_use]
    pub fn key(&self) -> u64 {
        let mut hasher = Xxh3::new();
        match self {
            Self::Rectangle {
                min_lat,
                max_lat,
                min_lon,
                max_lon,
            } => {
                hasher.update(b"rect");
                for v in [min_lat, max_lat, min_lon, max_lon] {
                    hasher.update(&v.to_bits().to_le_bytes());
                }
            }
            Self::Polygon { vertices } => {
                hasher.update(b"poly");
                for v in vertices {
                    v.digest(&mut hasher);
                }
            }
        }
        hasher.digest()
    }
}

/// Even-odd ray casting in the lon/lat plane.
fn polygon_contains(vertices: &[Location], loc: &Location) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (a, b) = (&vertices[i], &vertices[j]);
        if (a.lat > loc.lat) != (b.lat > loc.lat) {
            let cross_lon = (b.lon - a.lon) * (loc.lat - a.lat) / (b.lat - a.lat) + a.lon;
            if loc.lon < cross_lon {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}
