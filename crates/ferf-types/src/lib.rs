//! Plain data types shared across the forecast engine.
//!
//! Nothing in this crate performs a recompute. It holds the dataset records,
//! the configuration surface, the materialized source shapes, and the small
//! amount of numeric machinery (moment conversion, discretized magnitude
//! distributions) that every other crate needs.

pub mod change;
pub mod config;
pub mod cx;
pub mod dataset;
pub mod geo;
pub mod magnitude;
pub mod source;

pub use change::ChangeSet;
pub use config::{
    Aperiodicity, BackgroundInclusion, BackgroundRuptureType, BlendWeights, BptAveraging,
    ForecastConfig, ProbabilityModelKind, TimeWindow,
};
pub use cx::Cx;
pub use dataset::{BackgroundProvider, RuptureDataset, RuptureRecord, SectionRecord};
pub use geo::{Location, Region};
pub use magnitude::{DiscretizedMfd, magnitude_to_moment};
pub use source::{ForecastRupture, RuptureGeometry, RuptureSurface, Source, SourceOrigin};

/// Milliseconds in a Julian year of 365.25 days.
pub const MILLIS_PER_YEAR: f64 = 1000.0 * 60.0 * 60.0 * 24.0 * 365.25;
