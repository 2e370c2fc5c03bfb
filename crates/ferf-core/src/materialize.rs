//! Fault-based source materialization.
//!
//! Turns every admitted rupture into a [`Source`] carrying per-rupture
//! probabilities and annualized rates, applying the aftershock correction,
//! the probability gain of the model in force, and optionally an aleatory
//! Gaussian magnitude spread.

use std::sync::Arc;

use ferf_error::{ForecastError, Result};
use ferf_model::ProbabilityModel;
use ferf_types::{
    DiscretizedMfd, ForecastConfig, ForecastRupture, RuptureDataset, RuptureGeometry,
    RuptureRecord, RuptureSurface, Source, SourceOrigin, magnitude_to_moment,
};
use smallvec::{SmallVec, smallvec};
use tracing::{debug, warn};

use crate::index::IndexTables;

/// Magnitude grid of the aleatory Gaussian distribution.
pub const ALEATORY_MIN_MAG: f64 = 5.05;
pub const ALEATORY_DELTA_MAG: f64 = 0.1;
pub const ALEATORY_NUM_MAG: usize = 37;
/// Truncation, in standard deviations, on both sides.
pub const ALEATORY_TRUNC_LEVEL: f64 = 2.0;

/// `1 - exp(-rate * duration)`, accurate for tiny rates.
#[must_use]
pub fn poisson_probability(rate: f64, duration: f64) -> f64 {
    -(-(rate * duration)).exp_m1()
}

/// Annualized rate whose Poisson probability over `duration` is `prob`.
///
/// Infinite for `prob == 1`; callers keep their own rate in that case.
#[must_use]
pub fn equivalent_rate(prob: f64, duration: f64) -> f64 {
    -(-prob).ln_1p() / duration
}

/// Sources built in one pass plus the ruptures that needed the aleatory
/// fallback.
#[derive(Debug, Clone, Default)]
pub struct Materialized {
    pub sources: Vec<Source>,
    pub underflow_fallbacks: Vec<u32>,
}

pub struct SourceMaterializer<'a> {
    dataset: &'a RuptureDataset,
    index: &'a IndexTables,
    model: &'a ProbabilityModel,
    config: &'a ForecastConfig,
}

impl<'a> SourceMaterializer<'a> {
    #[must_use]
    pub const fn new(
        dataset: &'a RuptureDataset,
        index: &'a IndexTables,
        model: &'a ProbabilityModel,
        config: &'a ForecastConfig,
    ) -> Self {
        Self {
            dataset,
            index,
            model,
            config,
        }
    }

    /// Build one source per admitted rupture, in source order.
    ///
    /// Returns no sources when fault-based sources are excluded.
    pub fn materialize_all(&self) -> Result<Materialized> {
        let mut out = Materialized::default();
        if !self.config.background_inclusion.includes_faults() {
            return Ok(out);
        }
        out.sources.reserve(self.index.fault_source_count());
        for &pos in self.index.admitted_positions() {
            let rupture = &self.dataset.ruptures()[pos];
            let (source, fell_back) = self.materialize(rupture)?;
            if fell_back {
                out.underflow_fallbacks.push(rupture.id);
            }
            out.sources.push(source);
        }
        debug!(
            target: "ferf.materialize",
            sources = out.sources.len(),
            fallbacks = out.underflow_fallbacks.len(),
            time_dependent = self.model.is_time_dependent(),
            "fault sources materialized"
        );
        Ok(out)
    }

    /// Build the source of one rupture. The flag reports whether the
    /// aleatory path underflowed and the zero-spread path was used instead.
    pub fn materialize(&self, rupture: &RuptureRecord) -> Result<(Source, bool)> {
        let config = self.config;
        let duration = config.time_window.duration_years;
        let aftershock = config.aftershock_factor();
        let gain = self.model.compute_gain(
            rupture.id,
            &config.time_window,
            config.historic_open_interval,
            config.bpt_averaging,
        );
        let surface = Arc::new(self.surface(rupture)?);

        let mut fell_back = false;
        if config.aleatory_std_dev > 0.0 {
            let (prob, gained_rate) = self.gained(rupture.rate * aftershock, gain);
            let rate = if prob < 1.0 {
                equivalent_rate(prob, duration)
            } else {
                gained_rate
            };
            if rate > 0.0 {
                let mfd = DiscretizedMfd::gaussian(
                    ALEATORY_MIN_MAG,
                    ALEATORY_DELTA_MAG,
                    ALEATORY_NUM_MAG,
                    rupture.magnitude,
                    config.aleatory_std_dev,
                    rate * magnitude_to_moment(rupture.magnitude),
                    ALEATORY_TRUNC_LEVEL,
                );
                if mfd.nonzero_bins() > 0 {
                    let ruptures = mfd
                        .bins()
                        .filter(|&(_, r)| r > 0.0)
                        .map(|(mag, r)| ForecastRupture {
                            magnitude: mag,
                            rake: rupture.rake,
                            probability: poisson_probability(r, duration),
                            rate: r,
                            geometry: RuptureGeometry::Fault(Arc::clone(&surface)),
                        })
                        .collect();
                    return Ok((self.source(rupture, true, ruptures), false));
                }
            }
            warn!(
                target: "ferf.materialize",
                rupture_id = rupture.id,
                rate = rupture.rate,
                duration,
                "aleatory rate underflowed; using zero-spread path"
            );
            fell_back = true;
        }

        if let Some(mfd) = rupture.mfd.as_ref().filter(|m| m.nonzero_bins() > 1) {
            let ruptures = mfd
                .bins()
                .filter(|&(_, r)| r > 0.0)
                .map(|(mag, r)| {
                    let (prob, rate) = self.gained(r * aftershock, gain);
                    ForecastRupture {
                        magnitude: mag,
                        rake: rupture.rake,
                        probability: prob,
                        rate,
                        geometry: RuptureGeometry::Fault(Arc::clone(&surface)),
                    }
                })
                .collect();
            return Ok((self.source(rupture, true, ruptures), fell_back));
        }

        let (prob, rate) = self.gained(rupture.rate * aftershock, gain);
        let ruptures = smallvec![ForecastRupture {
            magnitude: rupture.magnitude,
            rake: rupture.rake,
            probability: prob,
            rate,
            geometry: RuptureGeometry::Fault(surface),
        }];
        let poisson = !self.model.is_time_dependent();
        Ok((self.source(rupture, poisson, ruptures), fell_back))
    }

    /// `(probability, annualized rate)` of `rate` under `gain`.
    ///
    /// Time-dependent gains scale the expected count in the window; the
    /// returned rate is its Poisson equivalent. Once the expected count
    /// reaches 1 the probability saturates and the rate is the gained
    /// long-term rate.
    fn gained(&self, rate: f64, gain: f64) -> (f64, f64) {
        let duration = self.config.time_window.duration_years;
        if self.model.is_time_dependent() {
            let expected = rate * gain * duration;
            if expected >= 1.0 {
                (1.0, rate * gain)
            } else {
                (expected, equivalent_rate(expected, duration))
            }
        } else {
            (poisson_probability(rate, duration), rate)
        }
    }

    fn source(
        &self,
        rupture: &RuptureRecord,
        poisson: bool,
        ruptures: SmallVec<[ForecastRupture; 1]>,
    ) -> Source {
        Source {
            name: self.source_name(rupture),
            origin: SourceOrigin::Fault {
                rupture_id: rupture.id,
            },
            poisson,
            duration_years: self.config.time_window.duration_years,
            ruptures,
        }
    }

    fn source_name(&self, rupture: &RuptureRecord) -> String {
        let name_of = |id: Option<&u32>| {
            id.and_then(|id| self.dataset.section(*id))
                .map_or("?", |s| s.name.as_str())
        };
        format!(
            "Fault Src #{}; {} SECTIONS BETWEEN {} AND {}",
            rupture.id,
            rupture.section_ids.len(),
            name_of(rupture.section_ids.first()),
            name_of(rupture.section_ids.last()),
        )
    }

    fn surface(&self, rupture: &RuptureRecord) -> Result<RuptureSurface> {
        let mut trace = Vec::new();
        let mut upper = f64::INFINITY;
        let mut lower = f64::NEG_INFINITY;
        let mut dip_sum = 0.0;
        for id in &rupture.section_ids {
            let section = self.dataset.section(*id).ok_or_else(|| {
                ForecastError::internal(format!(
                    "admitted rupture {} references missing section {id}",
                    rupture.id
                ))
            })?;
            trace.extend_from_slice(&section.trace);
            upper = upper.min(section.upper_depth_km);
            lower = lower.max(section.lower_depth_km);
            dip_sum += section.dip_deg;
        }
        if trace.is_empty() {
            return Err(ForecastError::internal(format!(
                "admitted rupture {} has no trace",
                rupture.id
            )));
        }
        Ok(RuptureSurface {
            section_ids: rupture.section_ids.clone(),
            grid_spacing_km: self.config.grid_spacing_km,
            approximated: self.config.surface_approximation,
            area_m2: rupture.area_m2,
            trace,
            upper_depth_km: upper,
            lower_depth_km: lower,
            ave_dip_deg: dip_sum / rupture.section_ids.len() as f64,
        })
    }
}
