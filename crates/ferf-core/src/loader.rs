//! Dataset sources and loading.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ferf_error::{ForecastError, Result};
use ferf_types::{RuptureDataset, RuptureRecord, SectionRecord};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::background::GridBackgroundProvider;

/// Where the engine gets its dataset from.
#[derive(Debug, Clone)]
pub enum DatasetSource {
    /// An in-memory dataset, used as-is.
    Live(Arc<RuptureDataset>),
    /// A file read by the engine's [`DatasetLoader`] on recompute.
    Path(PathBuf),
}

impl From<RuptureDataset> for DatasetSource {
    fn from(dataset: RuptureDataset) -> Self {
        Self::Live(Arc::new(dataset))
    }
}

impl From<PathBuf> for DatasetSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

/// Reads a dataset container from disk.
pub trait DatasetLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<RuptureDataset>;
}

/// On-disk JSON layout of a dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetDocument {
    pub sections: Vec<SectionRecord>,
    pub ruptures: Vec<RuptureRecord>,
    #[serde(default)]
    pub background: Option<GridBackgroundProvider>,
}

impl DatasetDocument {
    pub fn into_dataset(self) -> Result<RuptureDataset> {
        let dataset = RuptureDataset::new(self.sections, self.ruptures)?;
        Ok(match self.background {
            Some(provider) => dataset.with_background(Arc::new(provider)),
            None => dataset,
        })
    }
}

/// Loads [`DatasetDocument`] JSON files.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDatasetLoader;

impl DatasetLoader for JsonDatasetLoader {
    fn load(&self, path: &Path) -> Result<RuptureDataset> {
        let fail = |reason: String| ForecastError::DatasetLoad {
            path: path.to_path_buf(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        let doc: DatasetDocument = serde_json::from_str(&text).map_err(|e| fail(e.to_string()))?;
        let dataset = doc.into_dataset().map_err(|e| fail(e.to_string()))?;
        info!(
            target: "ferf.loader",
            path = %path.display(),
            sections = dataset.sections().len(),
            ruptures = dataset.ruptures().len(),
            background = dataset.background().is_some(),
            "dataset loaded"
        );
        Ok(dataset)
    }
}
