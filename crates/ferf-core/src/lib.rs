//! Forecast engine core.
//!
//! [`ForecastEngine`] owns the configuration and the change tracker, runs
//! the staged recompute pipeline, and publishes each result as an immutable
//! [`ForecastSnapshot`] that readers query without blocking the writer.

pub mod background;
pub mod engine;
pub mod flat_index;
pub mod index;
pub mod loader;
pub mod materialize;
pub mod region_cache;
pub mod snapshot;
pub mod telemetry;
pub mod tracker;

pub use background::{GridBackgroundProvider, GridCell, build_background};
pub use engine::{EngineState, ForecastEngine};
pub use flat_index::{FlatIndex, GlobalRuptureAddress};
pub use index::{IndexTables, SkippedRupture};
pub use loader::{DatasetDocument, DatasetLoader, DatasetSource, JsonDatasetLoader};
pub use materialize::{Materialized, SourceMaterializer, equivalent_rate, poisson_probability};
pub use region_cache::RegionCache;
pub use snapshot::{ForecastSnapshot, SnapshotPart};
pub use telemetry::{
    NoOpRecomputeObserver, RecomputeEvent, RecomputeMetrics, RecomputeMetricsSnapshot,
    RecomputeObserver, RecomputeRingBuffer, Stage,
};
pub use tracker::ChangeTracker;

pub use ferf_error::{ForecastError, Result};
pub use ferf_types::Cx;
