//! Cancellation context threaded through a recompute pass.
//!
//! A `Cx` is cheap to clone; every clone observes the same cancellation
//! flag. The pipeline calls [`Cx::checkpoint_with`] between stages, which
//! are its only cancellation points.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ferf_error::{ForecastError, Result};

#[derive(Debug, Clone, Default)]
pub struct Cx {
    cancelled: Arc<AtomicBool>,
}

impl Cx {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next checkpoint.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail with [`ForecastError::Cancelled`] if cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        self.checkpoint_with("unspecified")
    }

    /// Like [`Cx::checkpoint`], naming the stage that would run next.
    pub fn checkpoint_with(&self, stage: &'static str) -> Result<()> {
        if self.is_cancelled() {
            return Err(ForecastError::Cancelled { stage });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_context_passes_checkpoints() {
        let cx = Cx::new();
        assert!(cx.checkpoint().is_ok());
        assert!(cx.checkpoint_with("index").is_ok());
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let cx = Cx::new();
        let clone = cx.clone();
        clone.cancel();
        assert!(cx.is_cancelled());
        let err = cx.checkpoint_with("materialize").expect_err("must be cancelled");
        assert!(matches!(
            err,
            ForecastError::Cancelled {
                stage: "materialize"
            }
        ));
    }
}
