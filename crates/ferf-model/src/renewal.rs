//! Renewal-process calculator contract.

use std::fmt;
use std::sync::Arc;

use ferf_types::{Aperiodicity, RuptureDataset, TimeWindow};

/// Computes the probability gain of one rupture under a renewal model.
///
/// The gain multiplies the Poisson-equivalent rate before it is converted to
/// a probability. Implementations return `NaN` when the dataset carries too
/// little information for a meaningful gain; callers treat that as zero.
pub trait RenewalCalculator: Send + Sync + fmt::Debug {
    fn compute_gain(
        &self,
        rupture_id: u32,
        historic_open_interval: f64,
        window: &TimeWindow,
        ave_recurrence_intervals: bool,
        ave_norm_time_since: bool,
    ) -> f64;
}

/// Builds a calculator for one dataset snapshot and aperiodicity branch.
pub trait RenewalCalculatorFactory: Send + Sync {
    fn build(
        &self,
        dataset: &Arc<RuptureDataset>,
        aperiodicity: Aperiodicity,
    ) -> Arc<dyn RenewalCalculator>;
}

impl<F> RenewalCalculatorFactory for F
where
    F: Fn(&Arc<RuptureDataset>, Aperiodicity) -> Arc<dyn RenewalCalculator> + Send + Sync,
{
    fn build(
        &self,
        dataset: &Arc<RuptureDataset>,
        aperiodicity: Aperiodicity,
    ) -> Arc<dyn RenewalCalculator> {
        self(dataset, aperiodicity)
    }
}
