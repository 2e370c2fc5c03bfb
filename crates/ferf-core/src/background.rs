//! Gridded background seismicity.
//!
//! [`GridBackgroundProvider`] is the default [`BackgroundProvider`]: one
//! source per grid cell, one rupture per positive magnitude bin (two for
//! cross-hair cells). [`build_background`] is the pipeline's sizing and
//! materialization step.

use ferf_error::{ForecastError, Result};
use ferf_types::{
    BackgroundProvider, BackgroundRuptureType, DiscretizedMfd, ForecastConfig, ForecastRupture,
    Location, RuptureDataset, RuptureGeometry, Source, SourceOrigin, TimeWindow,
};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::materialize::poisson_probability;

/// One background grid node and its magnitude-frequency distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub location: Location,
    pub mfd: DiscretizedMfd,
    #[serde(default)]
    pub rake: f64,
    /// Strike used by cross-hair and finite representations.
    #[serde(default)]
    pub strike_deg: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridBackgroundProvider {
    cells: Vec<GridCell>,
}

impl GridBackgroundProvider {
    #[must_use]
    pub fn new(cells: Vec<GridCell>) -> Self {
        Self { cells }
    }

    #[must_use]
    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    fn cell_source(
        cell_index: u32,
        cell: &GridCell,
        window: &TimeWindow,
        aftershock_factor: f64,
        rupture_type: BackgroundRuptureType,
    ) -> Source {
        let duration = window.duration_years;
        let mut ruptures = SmallVec::new();
        for (mag, rate) in cell.mfd.bins() {
            if rate <= 0.0 {
                continue;
            }
            let rate = rate * aftershock_factor;
            let mut push = |rate: f64, geometry: RuptureGeometry| {
                ruptures.push(ForecastRupture {
                    magnitude: mag,
                    rake: cell.rake,
                    probability: poisson_probability(rate, duration),
                    rate,
                    geometry,
                });
            };
            match rupture_type {
                BackgroundRuptureType::Point => push(rate, RuptureGeometry::Point(cell.location)),
                BackgroundRuptureType::CrossHair => {
                    for strike in [cell.strike_deg, cell.strike_deg + 90.0] {
                        push(
                            rate / 2.0,
                            RuptureGeometry::CrossHair {
                                center: cell.location,
                                strike_deg: strike,
                            },
                        );
                    }
                }
                BackgroundRuptureType::Finite => push(
                    rate,
                    RuptureGeometry::Finite {
                        center: cell.location,
                        strike_deg: cell.strike_deg,
                        length_km: rupture_length_km(mag),
                    },
                ),
            }
        }
        Source {
            name: format!("Background Src #{cell_index}"),
            origin: SourceOrigin::Background { cell: cell_index },
            poisson: true,
            duration_years: duration,
            ruptures,
        }
    }
}

/// Subsurface rupture length from magnitude (Wells and Coppersmith 1994,
/// all slip types).
fn rupture_length_km(magnitude: f64) -> f64 {
    10f64.powf(-2.44 + 0.59 * magnitude)
}

impl BackgroundProvider for GridBackgroundProvider {
    fn source_count(&self, _rupture_type: BackgroundRuptureType) -> usize {
        self.cells.len()
    }

    fn sources_for(
        &self,
        window: &TimeWindow,
        aftershock_factor: f64,
        rupture_type: BackgroundRuptureType,
    ) -> Vec<Source> {
        self.cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                Self::cell_source(i as u32, cell, window, aftershock_factor, rupture_type)
            })
            .collect()
    }
}

/// Size and materialize the background sources in force under `config`.
///
/// Empty when background is excluded or the dataset has no provider.
pub fn build_background(dataset: &RuptureDataset, config: &ForecastConfig) -> Result<Vec<Source>> {
    if !config.background_inclusion.includes_background() {
        return Ok(Vec::new());
    }
    let Some(provider) = dataset.background() else {
        return Ok(Vec::new());
    };
    let expected = provider.source_count(config.background_rupture_type);
    let sources = provider.sources_for(
        &config.time_window,
        config.aftershock_factor(),
        config.background_rupture_type,
    );
    if sources.len() != expected {
        return Err(ForecastError::internal(format!(
            "background provider announced {expected} sources but produced {}",
            sources.len()
        )));
    }
    debug!(
        target: "ferf.background",
        sources = sources.len(),
        rupture_type = ?config.background_rupture_type,
        "background sources materialized"
    );
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferf_types::BackgroundInclusion;
    use std::sync::Arc;

    fn provider() -> GridBackgroundProvider {
        GridBackgroundProvider::new(vec![
            GridCell {
                location: Location::new(34.0, -118.0),
                mfd: DiscretizedMfd::new(5.05, 0.1, vec![0.01, 0.0, 0.002]),
                rake: 0.0,
                strike_deg: 30.0,
            },
            GridCell {
                location: Location::new(34.1, -118.0),
                mfd: DiscretizedMfd::new(5.05, 0.1, vec![0.0]),
                rake: 0.0,
                strike_deg: 0.0,
            },
        ])
    }

    fn dataset_with_background() -> RuptureDataset {
        RuptureDataset::new(vec![], vec![])
            .expect("empty dataset")
            .with_background(Arc::new(provider()))
    }

    #[test]
    fn test_point_sources_follow_mfd() {
        let sources = provider().sources_for(&TimeWindow::default(), 1.0, BackgroundRuptureType::Point);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].rupture_count(), 2);
        assert_eq!(sources[1].rupture_count(), 0);
        let expected = poisson_probability(0.01, 30.0);
        assert!((sources[0].ruptures[0].probability - expected).abs() < 1e-15);
        assert!(sources[0].poisson);
        assert_eq!(sources[0].origin, SourceOrigin::Background { cell: 0 });
    }

    #[test]
    fn test_cross_hair_splits_rate() {
        let sources =
            provider().sources_for(&TimeWindow::default(), 0.97, BackgroundRuptureType::CrossHair);
        let src = &sources[0];
        assert_eq!(src.rupture_count(), 4);
        assert!((src.ruptures[0].rate - 0.01 * 0.97 / 2.0).abs() < 1e-15);
        assert!(matches!(
            src.ruptures[1].geometry,
            RuptureGeometry::CrossHair { strike_deg, .. } if (strike_deg - 120.0).abs() < 1e-12
        ));
    }

    #[test]
    fn test_finite_length_grows_with_magnitude() {
        assert!(rupture_length_km(7.0) > rupture_length_km(6.0));
        assert!((rupture_length_km(7.0) - 10f64.powf(1.69)).abs() < 1e-9);
    }

    #[test]
    fn test_build_background_respects_inclusion() {
        let ds = dataset_with_background();
        let mut config = ForecastConfig::default();
        assert_eq!(build_background(&ds, &config).expect("build").len(), 2);
        config.background_inclusion = BackgroundInclusion::Exclude;
        assert!(build_background(&ds, &config).expect("build").is_empty());
        config.background_inclusion = BackgroundInclusion::Only;
        assert_eq!(build_background(&ds, &config).expect("build").len(), 2);
    }

    #[derive(Debug)]
    struct Liar;

    impl BackgroundProvider for Liar {
        fn source_count(&self, _: BackgroundRuptureType) -> usize {
            3
        }

        fn sources_for(&self, _: &TimeWindow, _: f64, _: BackgroundRuptureType) -> Vec<Source> {
            Vec::new()
        }
    }

    #[test]
    fn test_count_mismatch_is_internal_error() {
        let ds = RuptureDataset::new(vec![], vec![])
            .expect("empty dataset")
            .with_background(Arc::new(Liar));
        let err = build_background(&ds, &ForecastConfig::default()).expect_err("mismatch");
        assert!(err.is_fatal());
    }
}
