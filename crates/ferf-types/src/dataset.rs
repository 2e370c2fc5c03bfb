//! Rupture dataset: sections, ruptures, and the optional background provider.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ferf_error::{ForecastError, Result};
use serde::{Deserialize, Serialize};

use crate::config::{BackgroundRuptureType, TimeWindow};
use crate::geo::Location;
use crate::magnitude::DiscretizedMfd;
use crate::source::Source;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One fault section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub id: u32,
    pub name: String,
    /// Surface trace, ordered along strike.
    pub trace: Vec<Location>,
    /// Dip in degrees, in (0, 90].
    pub dip_deg: f64,
    /// Upper seismogenic depth in km.
    pub upper_depth_km: f64,
    /// Lower seismogenic depth in km.
    pub lower_depth_km: f64,
    /// Ruptures below this magnitude are not forecast on this section.
    #[serde(default)]
    pub min_mag: f64,
    /// Date of the last known event, milliseconds since the Unix epoch.
    #[serde(default)]
    pub last_event_epoch_millis: Option<i64>,
}

impl SectionRecord {
    /// Reason this section cannot carry a rupture surface, if any.
    #[must_use]
    pub fn geometry_problem(&self) -> Option<String> {
        if self.trace.is_empty() {
            return Some(format!("section {} has an empty trace", self.id));
        }
        if !(self.dip_deg > 0.0 && self.dip_deg <= 90.0) {
            return Some(format!("section {} has invalid dip {}", self.id, self.dip_deg));
        }
        if !(self.upper_depth_km < self.lower_depth_km) {
            return Some(format!(
                "section {} upper depth {} is not above lower depth {}",
                self.id, self.upper_depth_km, self.lower_depth_km
            ));
        }
        None
    }
}

/// One multi-section rupture with its long-term rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuptureRecord {
    pub id: u32,
    /// Participating section ids, in order along the rupture.
    pub section_ids: Vec<u32>,
    /// Mean magnitude.
    pub magnitude: f64,
    /// Rake in degrees.
    pub rake: f64,
    /// Rupture area in square meters.
    pub area_m2: f64,
    /// Long-term annual rate.
    pub rate: f64,
    /// Optional magnitude distribution replacing the single mean magnitude.
    #[serde(default)]
    pub mfd: Option<DiscretizedMfd>,
}

// ---------------------------------------------------------------------------
// Background provider contract
// ---------------------------------------------------------------------------

/// Supplier of gridded background sources.
pub trait BackgroundProvider: Send + Sync + fmt::Debug {
    /// Number of sources [`BackgroundProvider::sources_for`] will return.
    fn source_count(&self, rupture_type: BackgroundRuptureType) -> usize;

    /// Materialize every background source for the given window.
    fn sources_for(
        &self,
        window: &TimeWindow,
        aftershock_factor: f64,
        rupture_type: BackgroundRuptureType,
    ) -> Vec<Source>;
}

// ---------------------------------------------------------------------------
// RuptureDataset
// ---------------------------------------------------------------------------

/// Immutable rupture dataset. Only last-event dates may be edited, and only
/// on an unshared copy.
#[derive(Clone)]
pub struct RuptureDataset {
    sections: Vec<SectionRecord>,
    ruptures: Vec<RuptureRecord>,
    section_pos: HashMap<u32, usize>,
    rupture_pos: HashMap<u32, usize>,
    background: Option<Arc<dyn BackgroundProvider>>,
}

impl fmt::Debug for RuptureDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuptureDataset")
            .field("sections", &self.sections.len())
            .field("ruptures", &self.ruptures.len())
            .field("background", &self.background.is_some())
            .finish()
    }
}

impl RuptureDataset {
    /// Build a dataset. Section and rupture ids must each be unique.
    pub fn new(sections: Vec<SectionRecord>, ruptures: Vec<RuptureRecord>) -> Result<Self> {
        let mut section_pos = HashMap::with_capacity(sections.len());
        for (pos, s) in sections.iter().enumerate() {
            if section_pos.insert(s.id, pos).is_some() {
                return Err(ForecastError::invalid_config("section id", s.id));
            }
        }
        let mut rupture_pos = HashMap::with_capacity(ruptures.len());
        for (pos, r) in ruptures.iter().enumerate() {
            if rupture_pos.insert(r.id, pos).is_some() {
                return Err(ForecastError::invalid_config("rupture id", r.id));
            }
            if !r.rate.is_finite() || r.rate < 0.0 {
                return Err(ForecastError::invalid_config(
                    format!("rate of rupture {}", r.id),
                    r.rate,
                ));
            }
        }
        Ok(Self {
            sections,
            ruptures,
            section_pos,
            rupture_pos,
            background: None,
        })
    }

    /// Attach a background-source provider.
    #[must_use]
    pub fn with_background(mut self, provider: Arc<dyn BackgroundProvider>) -> Self {
        self.background = Some(provider);
        self
    }

    #[must_use]
    pub fn sections(&self) -> &[SectionRecord] {
        &self.sections
    }

    /// Ruptures in dataset order.
    #[must_use]
    pub fn ruptures(&self) -> &[RuptureRecord] {
        &self.ruptures
    }

    #[must_use]
    pub fn section(&self, id: u32) -> Option<&SectionRecord> {
        self.section_pos.get(&id).map(|&pos| &self.sections[pos])
    }

    #[must_use]
    pub fn rupture(&self, id: u32) -> Option<&RuptureRecord> {
        self.rupture_pos.get(&id).map(|&pos| &self.ruptures[pos])
    }

    /// Dataset position of rupture `id`.
    #[must_use]
    pub fn rupture_position(&self, id: u32) -> Option<usize> {
        self.rupture_pos.get(&id).copied()
    }

    #[must_use]
    pub fn background(&self) -> Option<&Arc<dyn BackgroundProvider>> {
        self.background.as_ref()
    }

    /// Whether any section carries a last-event date.
    #[must_use]
    pub fn has_last_event_data(&self) -> bool {
        self.sections
            .iter()
            .any(|s| s.last_event_epoch_millis.is_some())
    }

    /// Whether the rupture falls below the minimum magnitude of any of its
    /// sections. Unknown sections do not raise the threshold.
    #[must_use]
    pub fn is_below_section_min_mag(&self, rupture: &RuptureRecord) -> bool {
        rupture
            .section_ids
            .iter()
            .filter_map(|id| self.section(*id))
            .any(|s| rupture.magnitude < s.min_mag)
    }

    /// Annual rate at which each section participates in ruptures.
    #[must_use]
    pub fn section_participation_rates(&self) -> HashMap<u32, f64> {
        let mut rates: HashMap<u32, f64> = self.sections.iter().map(|s| (s.id, 0.0)).collect();
        for r in &self.ruptures {
            for id in &r.section_ids {
                if let Some(rate) = rates.get_mut(id) {
                    *rate += r.rate;
                }
            }
        }
        rates
    }

    /// Set or clear the last-event date of one section.
    pub fn set_section_last_event(&mut self, section_id: u32, epoch_millis: Option<i64>) -> Result<()> {
        let pos = *self
            .section_pos
            .get(&section_id)
            .ok_or(ForecastError::IndexOutOfRange {
                what: "section",
                index: section_id as usize,
                len: self.sections.len(),
            })?;
        self.sections[pos].last_event_epoch_millis = epoch_millis;
        Ok(())
    }

    /// Set the last-event date of every section of a rupture.
    pub fn set_rupture_last_event(&mut self, rupture_id: u32, epoch_millis: i64) -> Result<()> {
        let section_ids = self
            .rupture(rupture_id)
            .ok_or(ForecastError::IndexOutOfRange {
                what: "rupture",
                index: rupture_id as usize,
                len: self.ruptures.len(),
            })?
            .section_ids
            .clone();
        for id in section_ids {
            self.set_section_last_event(id, Some(epoch_millis))?;
        }
        Ok(())
    }
}
