//! Rupture-in-region membership cache.
//!
//! One entry per region geometry, each with its own lock. Answers are
//! inserted if absent and never change for the dataset they were computed
//! against; a new cache is created whenever the index is rebuilt.

use std::collections::HashMap;
use std::sync::Arc;

use ferf_types::{Region, RuptureDataset, RuptureRecord};
use parking_lot::Mutex;

#[derive(Debug)]
struct RegionEntry {
    region: Region,
    members: Mutex<HashMap<u32, bool>>,
}

#[derive(Debug, Default)]
pub struct RegionCache {
    regions: Mutex<HashMap<u64, Arc<RegionEntry>>>,
}

impl RegionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any trace point of any section of `rupture` lies in `region`.
    pub fn is_inside(&self, dataset: &RuptureDataset, region: &Region, rupture: &RuptureRecord) -> bool {
        let entry = {
            let mut regions = self.regions.lock();
            Arc::clone(regions.entry(region.key()).or_insert_with(|| {
                Arc::new(RegionEntry {
                    region: region.clone(),
                    members: Mutex::new(HashMap::new()),
                })
            }))
        };
        if entry.region != *region {
            // Key collision: answer without caching.
            return compute_inside(dataset, region, rupture);
        }
        let mut members = entry.members.lock();
        *members
            .entry(rupture.id)
            .or_insert_with(|| compute_inside(dataset, region, rupture))
    }

    /// Number of distinct regions seen.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.lock().len()
    }

    /// Number of cached answers for `region`.
    #[must_use]
    pub fn cached_answers(&self, region: &Region) -> usize {
        self.regions
            .lock()
            .get(&region.key())
            .map_or(0, |e| e.members.lock().len())
    }
}

fn compute_inside(dataset: &RuptureDataset, region: &Region, rupture: &RuptureRecord) -> bool {
    rupture
        .section_ids
        .iter()
        .filter_map(|id| dataset.section(*id))
        .flat_map(|s| s.trace.iter())
        .any(|loc| region.contains(loc))
}
