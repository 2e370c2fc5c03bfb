//! Immutable forecast snapshot.
//!
//! Every derived table lives behind its own `Arc`. A recompute pass builds a
//! new snapshot, cloning the `Arc`s of stages it skipped, so unchanged parts
//! are shared with the previous snapshot rather than rebuilt.

use std::sync::Arc;

use ferf_error::{ForecastError, Result};
use ferf_model::ProbabilityModel;
use ferf_types::{ForecastConfig, Region, RuptureDataset, Source};
use xxhash_rust::xxh3::Xxh3;

use crate::flat_index::{FlatIndex, GlobalRuptureAddress};
use crate::index::{IndexTables, SkippedRupture};
use crate::region_cache::RegionCache;

#[derive(Debug)]
pub struct ForecastSnapshot {
    pub(crate) generation: u64,
    pub(crate) config: ForecastConfig,
    pub(crate) dataset: Arc<RuptureDataset>,
    pub(crate) background: Arc<Vec<Source>>,
    pub(crate) index: Arc<IndexTables>,
    pub(crate) regions: Arc<RegionCache>,
    pub(crate) model: Arc<ProbabilityModel>,
    pub(crate) fault_sources: Arc<Vec<Source>>,
    pub(crate) underflow_fallbacks: Arc<Vec<u32>>,
    pub(crate) flat: Arc<FlatIndex>,
    pub(crate) fingerprint: u64,
}

impl ForecastSnapshot {
    /// xxh3 digest of the derived arrays: index tables, every source, and
    /// the flat index.
    pub(crate) fn compute_fingerprint(
        index: &IndexTables,
        fault_sources: &[Source],
        background: &[Source],
        flat: &FlatIndex,
    ) -> u64 {
        let mut hasher = Xxh3::new();
        index.digest(&mut hasher);
        for source in fault_sources.iter().chain(background) {
            source.digest(&mut hasher);
        }
        flat.digest(&mut hasher);
        hasher.digest()
    }

    // -----------------------------------------------------------------------
    // Query API
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn source_count(&self) -> usize {
        self.fault_sources.len() + self.background.len()
    }

    /// Source `index`; fault-based sources come first.
    pub fn source(&self, index: usize) -> Result<&Source> {
        let faults = self.fault_sources.len();
        if index < faults {
            return Ok(&self.fault_sources[index]);
        }
        self.background
            .get(index - faults)
            .ok_or(ForecastError::IndexOutOfRange {
                what: "source",
                index,
                len: self.source_count(),
            })
    }

    pub fn sources(&self) -> impl Iterator<Item = &Source> + '_ {
        self.fault_sources.iter().chain(self.background.iter())
    }

    /// Total ruptures across all sources.
    #[must_use]
    pub fn rupture_count(&self) -> usize {
        self.flat.len()
    }

    pub fn rupture(&self, flat_index: usize) -> Result<GlobalRuptureAddress> {
        self.flat.address(flat_index)
    }

    /// Long-term rate of a dataset rupture, or zero if it is not forecast.
    pub fn long_term_rate(&self, rupture_id: u32) -> Result<f64> {
        let pos = self.rupture_position(rupture_id)?;
        if self.config.background_inclusion.includes_faults()
            && self.index.source_for_position(pos).is_some()
        {
            Ok(self.dataset.ruptures()[pos].rate)
        } else {
            Ok(0.0)
        }
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Recompute pass that produced this snapshot, starting at 1.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    #[must_use]
    pub const fn config(&self) -> &ForecastConfig {
        &self.config
    }

    #[must_use]
    pub fn dataset(&self) -> &Arc<RuptureDataset> {
        &self.dataset
    }

    #[must_use]
    pub fn model(&self) -> &ProbabilityModel {
        &self.model
    }

    #[must_use]
    pub fn fault_source_count(&self) -> usize {
        self.fault_sources.len()
    }

    #[must_use]
    pub fn background_source_count(&self) -> usize {
        self.background.len()
    }

    /// Ruptures contributed by fault-based sources.
    #[must_use]
    pub fn fault_rupture_count(&self) -> usize {
        self.fault_sources.iter().map(Source::rupture_count).sum()
    }

    /// Dataset rupture id of fault source `source`.
    pub fn rupture_id_for_source(&self, source: usize) -> Result<u32> {
        self.fault_sources
            .get(source)
            .and_then(Source::rupture_id)
            .ok_or(ForecastError::IndexOutOfRange {
                what: "fault source",
                index: source,
                len: self.fault_sources.len(),
            })
    }

    /// Source index of a dataset rupture, if it is forecast.
    pub fn source_for_rupture(&self, rupture_id: u32) -> Result<Option<usize>> {
        let pos = self.rupture_position(rupture_id)?;
        if !self.config.background_inclusion.includes_faults() {
            return Ok(None);
        }
        Ok(self.index.source_for_position(pos))
    }

    pub fn flat_indices_for_source(&self, source: usize) -> Result<std::ops::Range<usize>> {
        self.flat.indices_for_source(source)
    }

    pub fn flat_index_for(&self, source: usize, rupture: usize) -> Result<usize> {
        self.flat.flat_index(source, rupture)
    }

    /// Ruptures excluded because they could not be materialized.
    #[must_use]
    pub fn skipped_ruptures(&self) -> &[SkippedRupture] {
        self.index.skipped()
    }

    /// Ruptures whose aleatory spread fell back to the zero-spread path.
    #[must_use]
    pub fn underflow_fallbacks(&self) -> &[u32] {
        &self.underflow_fallbacks
    }

    #[must_use]
    pub fn source_names(&self) -> Vec<&str> {
        self.sources().map(|s| s.name.as_str()).collect()
    }

    /// Whether any trace point of the rupture's sections lies in `region`.
    pub fn is_rupture_inside(&self, region: &Region, rupture_id: u32) -> Result<bool> {
        let pos = self.rupture_position(rupture_id)?;
        Ok(self
            .regions
            .is_inside(&self.dataset, region, &self.dataset.ruptures()[pos]))
    }

    /// Whether two snapshots share the given derived part without a rebuild.
    #[must_use]
    pub fn shares_part(&self, other: &Self, part: SnapshotPart) -> bool {
        match part {
            SnapshotPart::Dataset => Arc::ptr_eq(&self.dataset, &other.dataset),
            SnapshotPart::Background => Arc::ptr_eq(&self.background, &other.background),
            SnapshotPart::Index => Arc::ptr_eq(&self.index, &other.index),
            SnapshotPart::Model => Arc::ptr_eq(&self.model, &other.model),
            SnapshotPart::FaultSources => Arc::ptr_eq(&self.fault_sources, &other.fault_sources),
            SnapshotPart::FlatIndex => Arc::ptr_eq(&self.flat, &other.flat),
        }
    }

    fn rupture_position(&self, rupture_id: u32) -> Result<usize> {
        self.dataset
            .rupture_position(rupture_id)
            .ok_or(ForecastError::IndexOutOfRange {
                what: "rupture id",
                index: rupture_id as usize,
                len: self.dataset.ruptures().len(),
            })
    }
}

/// Independently rebuilt parts of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPart {
    Dataset,
    Background,
    Index,
    Model,
    FaultSources,
    FlatIndex,
}
