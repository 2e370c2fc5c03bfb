//! Flat enumeration of every rupture across every source.

use ferf_error::{ForecastError, Result};
use serde::Serialize;
use xxhash_rust::xxh3::Xxh3;

/// Location of one rupture in the forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GlobalRuptureAddress {
    pub source_index: usize,
    pub rupture_index: usize,
    /// Dataset rupture id; `None` for background sources.
    pub rupture_id: Option<u32>,
}

/// Global rupture address table.
///
/// Flat indices are assigned source by source, in source order, so the
/// ruptures of source `s` occupy `offsets[s]..offsets[s + 1]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlatIndex {
    offsets: Vec<usize>,
    addresses: Vec<(u32, u32)>,
    /// Per source, the dataset rupture id for fault-based sources.
    origins: Vec<Option<u32>>,
}

impl FlatIndex {
    /// Build from per-source `(rupture_count, origin)` pairs in source order.
    pub fn build(sources: impl IntoIterator<Item = (usize, Option<u32>)>) -> Result<Self> {
        let mut offsets = vec![0usize];
        let mut addresses = Vec::new();
        let mut origins = Vec::new();
        for (source, (count, origin)) in sources.into_iter().enumerate() {
            let src = u32::try_from(source)
                .map_err(|_| ForecastError::internal(format!("source index {source} overflows u32")))?;
            for rup in 0..count {
                let rup = u32::try_from(rup)
                    .map_err(|_| ForecastError::internal(format!("rupture index {rup} overflows u32")))?;
                addresses.push((src, rup));
            }
            offsets.push(addresses.len());
            origins.push(origin);
        }
        Ok(Self {
            offsets,
            addresses,
            origins,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    #[must_use]
    pub fn source_count(&self) -> usize {
        self.origins.len()
    }

    /// Rupture count of each source, in source order.
    pub fn counts(&self) -> impl Iterator<Item = usize> + '_ {
        self.offsets.windows(2).map(|w| w[1] - w[0])
    }

    /// Whether this table was built from the same per-source counts.
    #[must_use]
    pub fn matches_counts(&self, counts: &[usize]) -> bool {
        self.source_count() == counts.len() && self.counts().eq(counts.iter().copied())
    }

    pub fn address(&self, flat: usize) -> Result<GlobalRuptureAddress> {
        let &(src, rup) = self.addresses.get(flat).ok_or(ForecastError::IndexOutOfRange {
            what: "rupture",
            index: flat,
            len: self.addresses.len(),
        })?;
        let source_index = src as usize;
        Ok(GlobalRuptureAddress {
            source_index,
            rupture_index: rup as usize,
            rupture_id: self.origins[source_index],
        })
    }

    /// Flat indices of every rupture in `source`.
    pub fn indices_for_source(&self, source: usize) -> Result<std::ops::Range<usize>> {
        if source >= self.source_count() {
            return Err(ForecastError::IndexOutOfRange {
                what: "source",
                index: source,
                len: self.source_count(),
            });
        }
        Ok(self.offsets[source]..self.offsets[source + 1])
    }

    /// Flat index of rupture `rupture` in `source`.
    pub fn flat_index(&self, source: usize, rupture: usize) -> Result<usize> {
        let range = self.indices_for_source(source)?;
        if rupture >= range.len() {
            return Err(ForecastError::IndexOutOfRange {
                what: "rupture in source",
                index: rupture,
                len: range.len(),
            });
        }
        Ok(range.start + rupture)
    }

    pub fn digest(&self, hasher: &mut Xxh3) {
        for off in &self.offsets {
            hasher.update(&(*off as u64).to_le_bytes());
        }
        for origin in &self.origins {
            hasher.update(&origin.map_or(u32::MAX, |v| v).to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlatIndex {
        FlatIndex::build([(1, Some(10)), (3, Some(12)), (0, Some(13)), (2, None)]).expect("build")
    }

    #[test]
    fn test_addresses_follow_source_order() {
        let f = sample();
        assert_eq!(f.len(), 6);
        assert_eq!(f.source_count(), 4);
        let a = f.address(0).expect("in range");
        assert_eq!((a.source_index, a.rupture_index, a.rupture_id), (0, 0, Some(10)));
        let a = f.address(3).expect("in range");
        assert_eq!((a.source_index, a.rupture_index, a.rupture_id), (1, 2, Some(12)));
        let a = f.address(5).expect("in range");
        assert_eq!((a.source_index, a.rupture_index, a.rupture_id), (3, 1, None));
        assert!(matches!(
            f.address(6),
            Err(ForecastError::IndexOutOfRange { index: 6, len: 6, .. })
        ));
    }

    #[test]
    fn test_ranges_and_flat_index() {
        let f = sample();
        assert_eq!(f.indices_for_source(1).expect("range"), 1..4);
        assert!(f.indices_for_source(2).expect("range").is_empty());
        assert_eq!(f.flat_index(3, 1).expect("valid"), 5);
        assert!(f.flat_index(2, 0).is_err());
        assert!(f.indices_for_source(4).is_err());
    }

    #[test]
    fn test_counts_round_trip() {
        let f = sample();
        let counts: Vec<usize> = f.counts().collect();
        assert_eq!(counts, vec![1, 3, 0, 2]);
        assert!(f.matches_counts(&counts));
        assert!(!f.matches_counts(&[1, 3, 0]));
        assert!(!f.matches_counts(&[1, 3, 1, 2]));
    }

    #[test]
    fn test_empty() {
        let f = FlatIndex::build(std::iter::empty()).expect("build");
        assert!(f.is_empty());
        assert_eq!(f.counts().count(), 0);
    }
}
