//! Error taxonomy shared by every ferf crate.
//!
//! Errors fall into five families:
//! - configuration errors, rejected at the setter before any pipeline work;
//! - dataset load errors, fatal for one recompute attempt;
//! - per-rupture build failures, recovered locally by skipping the rupture;
//! - internal-consistency errors, fatal and indicative of a logic defect;
//! - lifecycle errors (not ready, busy, cancelled).

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Every failure the forecast engine can surface.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// A configuration value was outside its valid domain.
    #[error("invalid configuration: {what} = {value}")]
    InvalidConfig { what: String, value: String },

    /// The rupture dataset could not be loaded or was malformed.
    #[error("failed to load rupture dataset from {path}: {reason}")]
    DatasetLoad { path: PathBuf, reason: String },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A single rupture could not be turned into a source.
    #[error("rupture {rupture_id} could not be materialized: {reason}")]
    RuptureBuild { rupture_id: u32, reason: String },

    /// Derived arrays disagree with each other. Always a logic defect.
    #[error("internal consistency error: {0}")]
    Internal(String),

    /// A query was issued before the first successful recompute.
    #[error("forecast has not been computed; call recompute() first")]
    NotReady,

    /// Index outside the valid range of a derived table.
    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    /// A setter or a second recompute raced an in-progress recompute.
    #[error("a recompute is already in progress")]
    RecomputeInProgress,

    /// The recompute was cancelled at a stage boundary.
    #[error("recompute cancelled before stage {stage}")]
    Cancelled { stage: &'static str },

    /// Blend weights do not sum to one.
    #[error("probability model weights sum to {sum}, expected 1")]
    InvalidWeights { sum: f64 },
}

impl ForecastError {
    /// Shorthand for an internal-consistency error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Shorthand for a configuration error.
    pub fn invalid_config(what: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidConfig {
            what: what.into(),
            value: value.to_string(),
        }
    }

    /// Shorthand for a per-rupture build failure.
    pub fn rupture_build(rupture_id: u32, reason: impl Into<String>) -> Self {
        Self::RuptureBuild {
            rupture_id,
            reason: reason.into(),
        }
    }

    /// Errors a caller can retry without changing any input.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RecomputeInProgress | Self::Cancelled { .. })
    }

    /// Errors that abort a whole recompute pass.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DatasetLoad { .. } | Self::Io(_) | Self::Internal(_) | Self::InvalidWeights { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_render_context() {
        let err = ForecastError::invalid_config("duration", -1.0);
        assert_eq!(err.to_string(), "invalid configuration: duration = -1");

        let err = ForecastError::internal("count mismatch");
        assert!(err.to_string().contains("count mismatch"));

        let err = ForecastError::rupture_build(42, "missing section 7");
        assert!(err.to_string().contains("rupture 42"));
    }

    #[test]
    fn test_classification() {
        assert!(ForecastError::RecomputeInProgress.is_transient());
        assert!(ForecastError::Cancelled { stage: "index" }.is_transient());
        assert!(!ForecastError::NotReady.is_transient());

        assert!(ForecastError::internal("x").is_fatal());
        assert!(
            ForecastError::DatasetLoad {
                path: PathBuf::from("a.json"),
                reason: "bad".to_owned(),
            }
            .is_fatal()
        );
        assert!(!ForecastError::rupture_build(1, "x").is_fatal());
        assert!(!ForecastError::NotReady.is_fatal());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ForecastError = io.into();
        assert!(matches!(err, ForecastError::Io(_)));
    }
}
