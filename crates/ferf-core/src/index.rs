//! Rupture ⇄ source index translation.
//!
//! Built wholesale from a dataset snapshot: a rupture becomes a fault-based
//! source iff its rate is strictly positive, it is not below the minimum
//! magnitude of any of its sections, and its geometry is usable. Sources are
//! numbered in dataset order.

use ferf_error::{ForecastError, Result};
use ferf_types::{RuptureDataset, RuptureRecord};
use serde::Serialize;
use tracing::{debug, warn};
use xxhash_rust::xxh3::Xxh3;

/// A rupture that passed the rate and magnitude filter but could not be
/// materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRupture {
    pub rupture_id: u32,
    pub reason: String,
}

/// Whether `rupture` passes the rate and minimum-magnitude filter.
#[must_use]
pub fn is_admitted(dataset: &RuptureDataset, rupture: &RuptureRecord) -> bool {
    rupture.rate > 0.0 && !dataset.is_below_section_min_mag(rupture)
}

/// Check that every section of `rupture` exists and has usable geometry.
pub fn check_geometry(dataset: &RuptureDataset, rupture: &RuptureRecord) -> Result<()> {
    if rupture.section_ids.is_empty() {
        return Err(ForecastError::rupture_build(rupture.id, "no sections"));
    }
    for id in &rupture.section_ids {
        let section = dataset.section(*id).ok_or_else(|| {
            ForecastError::rupture_build(rupture.id, format!("missing section {id}"))
        })?;
        if let Some(problem) = section.geometry_problem() {
            return Err(ForecastError::rupture_build(rupture.id, problem));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// IndexTables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexTables {
    /// Per dataset position, the fault source index if admitted.
    rupture_to_source: Vec<Option<u32>>,
    /// Per fault source, the dataset position of its rupture.
    source_to_position: Vec<usize>,
    /// Per fault source, the dataset rupture id.
    source_to_rupture: Vec<u32>,
    skipped: Vec<SkippedRupture>,
}

impl IndexTables {
    /// Rebuild every table from `dataset`.
    pub fn build(dataset: &RuptureDataset) -> Result<Self> {
        let ruptures = dataset.ruptures();
        let admitted: Vec<bool> = ruptures.iter().map(|r| is_admitted(dataset, r)).collect();
        let expected = admitted.iter().filter(|&&a| a).count();

        let mut tables = Self {
            rupture_to_source: vec![None; ruptures.len()],
            source_to_position: Vec::with_capacity(expected),
            source_to_rupture: Vec::with_capacity(expected),
            skipped: Vec::new(),
        };
        let mut next_source: u32 = 0;
        for (pos, rupture) in ruptures.iter().enumerate() {
            if !admitted[pos] {
                continue;
            }
            if let Err(err) = check_geometry(dataset, rupture) {
                warn!(
                    target: "ferf.index",
                    rupture_id = rupture.id,
                    error = %err,
                    "rupture skipped"
                );
                tables.skipped.push(SkippedRupture {
                    rupture_id: rupture.id,
                    reason: err.to_string(),
                });
                continue;
            }
            tables.rupture_to_source[pos] = Some(next_source);
            tables.source_to_position.push(pos);
            tables.source_to_rupture.push(rupture.id);
            next_source += 1;
        }

        let assigned = next_source as usize;
        if assigned + tables.skipped.len() != expected
            || tables.source_to_rupture.len() != assigned
        {
            return Err(ForecastError::internal(format!(
                "index rebuild assigned {assigned} sources and skipped {} ruptures, but {expected} were admitted",
                tables.skipped.len()
            )));
        }
        debug!(
            target: "ferf.index",
            ruptures = ruptures.len(),
            sources = assigned,
            skipped = tables.skipped.len(),
            "index rebuilt"
        );
        Ok(tables)
    }

    /// Number of fault-based sources.
    #[must_use]
    pub fn fault_source_count(&self) -> usize {
        self.source_to_rupture.len()
    }

    #[must_use]
    pub fn rupture_id_for_source(&self, source: usize) -> Option<u32> {
        self.source_to_rupture.get(source).copied()
    }

    #[must_use]
    pub fn position_for_source(&self, source: usize) -> Option<usize> {
        self.source_to_position.get(source).copied()
    }

    /// Fault source index of the rupture at dataset position `pos`.
    #[must_use]
    pub fn source_for_position(&self, pos: usize) -> Option<usize> {
        self.rupture_to_source
            .get(pos)
            .copied()
            .flatten()
            .map(|s| s as usize)
    }

    /// Dataset positions of admitted ruptures, in source order.
    #[must_use]
    pub fn admitted_positions(&self) -> &[usize] {
        &self.source_to_position
    }

    #[must_use]
    pub fn skipped(&self) -> &[SkippedRupture] {
        &self.skipped
    }

    pub fn digest(&self, hasher: &mut Xxh3) {
        hasher.update(&(self.rupture_to_source.len() as u64).to_le_bytes());
        for s in &self.rupture_to_source {
            hasher.update(&s.map_or(u32::MAX, |v| v).to_le_bytes());
        }
        for id in &self.source_to_rupture {
            hasher.update(&id.to_le_bytes());
        }
    }
}
