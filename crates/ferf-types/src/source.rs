//! Materialized forecast sources.

use std::sync::Arc;

use serde::Serialize;
use smallvec::SmallVec;
use xxhash_rust::xxh3::Xxh3;

use crate::geo::Location;

/// Surface shared by every rupture of one fault-based source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuptureSurface {
    pub section_ids: Vec<u32>,
    pub grid_spacing_km: f64,
    /// Approximated (quadrilateral) rather than gridded.
    pub approximated: bool,
    pub area_m2: f64,
    /// Concatenated section traces.
    pub trace: Vec<Location>,
    pub upper_depth_km: f64,
    pub lower_depth_km: f64,
    /// Area-unweighted mean dip.
    pub ave_dip_deg: f64,
}

/// Where a rupture happens.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RuptureGeometry {
    Fault(Arc<RuptureSurface>),
    Point(Location),
    /// Two perpendicular vertical planes through a grid node.
    CrossHair { center: Location, strike_deg: f64 },
    Finite { center: Location, strike_deg: f64, length_km: f64 },
}

/// One rupture as exposed by the forecast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastRupture {
    pub magnitude: f64,
    pub rake: f64,
    /// Probability of one or more occurrences within the window.
    pub probability: f64,
    /// Annualized equivalent rate.
    pub rate: f64,
    pub geometry: RuptureGeometry,
}

/// Provenance of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SourceOrigin {
    Fault { rupture_id: u32 },
    Background { cell: u32 },
}

/// One forecast source: ruptures sharing a geometric origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub name: String,
    pub origin: SourceOrigin,
    /// Whether probabilities follow a Poisson process in the window.
    pub poisson: bool,
    pub duration_years: f64,
    pub ruptures: SmallVec<[ForecastRupture; 1]>,
}

impl Source {
    #[must_use]
    pub fn rupture_count(&self) -> usize {
        self.ruptures.len()
    }

    /// Dataset rupture id, for fault-based sources.
    #[must_use]
    pub const fn rupture_id(&self) -> Option<u32> {
        match self.origin {
            SourceOrigin::Fault { rupture_id } => Some(rupture_id),
            SourceOrigin::Background { .. } => None,
        }
    }

    /// Probability of at least one rupture of this source in the window.
    #[must_use]
    pub fn total_probability(&self) -> f64 {
        1.0 - self
            .ruptures
            .iter()
            .map(|r| 1.0 - r.probability)
            .product::<f64>()
    }

    /// Feed every value-bearing field into `hasher`.
    pub fn digest(&self, hasher: &mut Xxh3) {
        hasher.update(self.name.as_bytes());
        match self.origin {
            SourceOrigin::Fault { rupture_id } => {
                hasher.update(b"F");
                hasher.update(&rupture_id.to_le_bytes());
            }
            SourceOrigin::Background { cell } => {
                hasher.update(b"B");
                hasher.update(&cell.to_le_bytes());
            }
        }
        hasher.update(&[u8::from(self.poisson)]);
        hasher.update(&self.duration_years.to_bits().to_le_bytes());
        hasher.update(&(self.ruptures.len() as u64).to_le_bytes());
        for r in &self.ruptures {
            for v in [r.magnitude, r.rake, r.probability, r.rate] {
                hasher.update(&v.to_bits().to_le_bytes());
            }
            match &r.geometry {
                RuptureGeometry::Fault(surface) => {
                    hasher.update(b"f");
                    hasher.update(&surface.grid_spacing_km.to_bits().to_le_bytes());
                    hasher.update(&[u8::from(surface.approximated)]);
                    for id in &surface.section_ids {
                        hasher.update(&id.to_le_bytes());
                    }
                }
                RuptureGeometry::Point(loc) => {
                    hasher.update(b"p");
                    loc.digest(hasher);
                }
                RuptureGeometry::CrossHair { center, strike_deg } => {
                    hasher.update(b"x");
                    center.digest(hasher);
                    hasher.update(&strike_deg.to_bits().to_le_bytes());
                }
                RuptureGeometry::Finite {
                    center,
                    strike_deg,
                    length_km,
                } => {
                    hasher.update(b"l");
                    center.digest(hasher);
                    hasher.update(&strike_deg.to_bits().to_le_bytes());
                    hasher.update(&length_km.to_bits().to_le_bytes());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn point_source(probs: &[f64]) -> Source {
        Source {
            name: "cell 0".to_owned(),
            origin: SourceOrigin::Background { cell: 0 },
            poisson: true,
            duration_years: 30.0,
            ruptures: probs
                .iter()
                .map(|&p| ForecastRupture {
                    magnitude: 6.0,
                    rake: 0.0,
                    probability: p,
                    rate: 0.0,
                    geometry: RuptureGeometry::Point(Location::new(35.0, -118.0)),
                })
                .collect(),
        }
    }

    #[test]
    fn test_total_probability() {
        let s = point_source(&[0.5, 0.5]);
        assert!((s.total_probability() - 0.75).abs() < 1e-12);
        assert_eq!(s.rupture_id(), None);
    }

    #[test]
    fn test_digest_tracks_probabilities() {
        let digest = |s: &Source| {
            let mut h = Xxh3::new();
            s.digest(&mut h);
            h.digest()
        };
        let a = point_source(&[0.1]);
        let b = point_source(&[0.2]);
        assert_eq!(digest(&a), digest(&a.clone()));
        assert_ne!(digest(&a), digest(&b));
    }

    #[test]
    fn test_fault_origin_exposes_rupture_id() {
        let mut s = point_source(&[]);
        s.origin = SourceOrigin::Fault { rupture_id: 7 };
        s.ruptures = smallvec![];
        assert_eq!(s.rupture_id(), Some(7));
        assert_eq!(s.rupture_count(), 0);
    }
}
