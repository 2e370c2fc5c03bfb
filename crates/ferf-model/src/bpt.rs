//! Brownian Passage Time renewal calculator.
//!
//! Section recurrence intervals come from participation rates in the
//! dataset. Time since the last event is taken from section last-event
//! dates; sections without a date fall back to the historic open interval.
//! A rupture whose sections have neither yields gain 1.

use std::collections::HashMap;
use std::f64::consts::SQRT_2;
use std::sync::Arc;

use ferf_types::{Aperiodicity, MILLIS_PER_YEAR, RuptureDataset, TimeWindow};

use crate::renewal::{RenewalCalculator, RenewalCalculatorFactory};

/// Survival below which the asymptotic hazard is used instead of the
/// conditional-probability quotient.
const MIN_SURVIVAL: f64 = 1e-12;

#[derive(Debug)]
pub struct BptCalculator {
    dataset: Arc<RuptureDataset>,
    aperiodicity: Aperiodicity,
    section_rates: HashMap<u32, f64>,
}

impl BptCalculator {
    #[must_use]
    pub fn new(dataset: Arc<RuptureDataset>, aperiodicity: Aperiodicity) -> Self {
        let section_rates = dataset.section_participation_rates();
        Self {
            dataset,
            aperiodicity,
            section_rates,
        }
    }

    #[must_use]
    pub const fn aperiodicity(&self) -> Aperiodicity {
        self.aperiodicity
    }
}

impl RenewalCalculator for BptCalculator {
    fn compute_gain(
        &self,
        rupture_id: u32,
        historic_open_interval: f64,
        window: &TimeWindow,
        ave_recurrence_intervals: bool,
        ave_norm_time_since: bool,
    ) -> f64 {
        let Some(rupture) = self.dataset.rupture(rupture_id) else {
            return f64::NAN;
        };
        let start_millis = window.start_epoch_millis();

        // (recurrence interval, time since last event) per section.
        let mut intervals = Vec::with_capacity(rupture.section_ids.len());
        let mut since = Vec::with_capacity(rupture.section_ids.len());
        for id in &rupture.section_ids {
            let rate = self.section_rates.get(id).copied().unwrap_or(0.0);
            if rate <= 0.0 {
                continue;
            }
            let ri = 1.0 / rate;
            intervals.push(ri);
            let last = self
                .dataset
                .section(*id)
                .and_then(|s| s.last_event_epoch_millis);
            match last {
                Some(millis) => {
                    let years = (start_millis - millis) as f64 / MILLIS_PER_YEAR;
                    since.push(Some((ri, years.max(0.0))));
                }
                None if historic_open_interval > 0.0 => {
                    since.push(Some((ri, historic_open_interval)));
                }
                None => since.push(None),
            }
        }
        if intervals.is_empty() {
            return f64::NAN;
        }

        let n = intervals.len() as f64;
        let ave_ri = if ave_recurrence_intervals {
            intervals.iter().sum::<f64>() / n
        } else {
            n / intervals.iter().map(|ri| 1.0 / ri).sum::<f64>()
        };

        let known: Vec<(f64, f64)> = since.into_iter().flatten().collect();
        if known.is_empty() {
            return 1.0;
        }
        let k = known.len() as f64;
        let time_since = if ave_norm_time_since {
            known.iter().map(|(ri, t)| t / ri).sum::<f64>() / k * ave_ri
        } else {
            known.iter().map(|(_, t)| t).sum::<f64>() / k
        };

        let alpha = self.aperiodicity.for_magnitude(rupture.magnitude);
        let duration = window.duration_years;
        let cond = conditional_probability(ave_ri, alpha, time_since, duration);
        cond / (duration / ave_ri)
    }
}

/// Factory producing [`BptCalculator`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct BptCalculatorFactory;

impl RenewalCalculatorFactory for BptCalculatorFactory {
    fn build(
        &self,
        dataset: &Arc<RuptureDataset>,
        aperiodicity: Aperiodicity,
    ) -> Arc<dyn RenewalCalculator> {
        Arc::new(BptCalculator::new(Arc::clone(dataset), aperiodicity))
    }
}

// ---------------------------------------------------------------------------
// Distribution
// ---------------------------------------------------------------------------

/// Probability of an event in `(t, t + duration]` given none in `(0, t]`.
#[must_use]
pub fn conditional_probability(mean: f64, alpha: f64, t: f64, duration: f64) -> f64 {
    let f0 = bpt_cdf(t, mean, alpha);
    let survival = 1.0 - f0;
    if survival < MIN_SURVIVAL {
        // Hazard tends to 1 / (2 alpha^2 mean).
        return -(-duration / (2.0 * alpha * alpha * mean)).exp_m1();
    }
    ((bpt_cdf(t + duration, mean, alpha) - f0) / survival).clamp(0.0, 1.0)
}

/// BPT cumulative distribution at `t`.
#[must_use]
pub fn bpt_cdf(t: f64, mean: f64, alpha: f64) -> f64 {
    if t <= 0.0 {
        return 0.0;
    }
    let s = (t / mean).sqrt();
    let u1 = (s - 1.0 / s) / alpha;
    let u2 = (s + 1.0 / s) / alpha;
    let tail = (2.0 / (alpha * alpha) + 0.5f64.ln() + ln_erfc(u2 / SQRT_2)).exp();
    (normal_cdf(u1) + tail).min(1.0)
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Chebyshev fit to erfc; fractional error below 1.2e-7.
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let ans = ln_erfc(z).exp();
    if x >= 0.0 { ans } else { 2.0 - ans }
}

/// `ln(erfc(z))` for `z >= 0`, stable for large `z`.
fn ln_erfc(z: f64) -> f64 {
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    t.ln() - z * z + poly
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferf_types::{Location, RuptureRecord, SectionRecord};

    fn section(id: u32, last: Option<i64>) -> SectionRecord {
        SectionRecord {
            id,
            name: format!("S{id}"),
            trace: vec![Location::new(35.0, -118.0)],
            dip_deg: 90.0,
            upper_depth_km: 0.0,
            lower_depth_km: 10.0,
            min_mag: 0.0,
            last_event_epoch_millis: last,
        }
    }

    fn dataset(last: Option<i64>) -> Arc<RuptureDataset> {
        let rupture = RuptureRecord {
            id: 1,
            section_ids: vec![0, 1],
            magnitude: 7.5,
            rake: 0.0,
            area_m2: 1e9,
            // 100-year recurrence on both sections.
            rate: 0.01,
            mfd: None,
        };
        Arc::new(
            RuptureDataset::new(vec![section(0, last), section(1, last)], vec![rupture])
                .expect("valid dataset"),
        )
    }

    fn years_before(window: &TimeWindow, years: f64) -> i64 {
        window.start_epoch_millis() - (years * MILLIS_PER_YEAR) as i64
    }

    #[test]
    fn test_erfc_reference_values() {
        assert!((erfc(0.0) - 1.0).abs() < 1e-6);
        assert!((erfc(1.0) - 0.157_299_207).abs() < 1e-6);
        assert!((erfc(-1.0) - 1.842_700_793).abs() < 1e-6);
        assert!((normal_cdf(1.959_964) - 0.975).abs() < 1e-6);
    }

    #[test]
    fn test_cdf_shape() {
        assert_eq!(bpt_cdf(0.0, 100.0, 0.5), 0.0);
        let at_mean = bpt_cdf(100.0, 100.0, 0.1);
        assert!(at_mean > 0.45 && at_mean < 0.6, "F(mean) = {at_mean}");
        assert!(bpt_cdf(1000.0, 100.0, 0.5) > 0.99);
        let mut prev = 0.0;
        for i in 1..50 {
            let f = bpt_cdf(f64::from(i) * 10.0, 100.0, 0.3);
            assert!(f >= prev);
            prev = f;
        }
    }

    #[test]
    fn test_conditional_probability_bounds() {
        for t in [0.0, 10.0, 100.0, 500.0, 5_000.0] {
            let p = conditional_probability(100.0, 0.2, t, 30.0);
            assert!((0.0..=1.0).contains(&p), "p({t}) = {p}");
        }
    }

    #[test]
    fn test_gain_grows_with_elapsed_time() {
        let window = TimeWindow::default();
        let early = dataset(Some(years_before(&window, 10.0)));
        let late = dataset(Some(years_before(&window, 100.0)));
        let g_early =
            BptCalculator::new(early, Aperiodicity::Mid).compute_gain(1, 0.0, &window, false, true);
        let g_late =
            BptCalculator::new(late, Aperiodicity::Mid).compute_gain(1, 0.0, &window, false, true);
        assert!(g_early < g_late, "{g_early} !< {g_late}");
        assert!(g_early < 1.0);
    }

    #[test]
    fn test_missing_data_degrades() {
        let window = TimeWindow::default();
        let calc = BptCalculator::new(dataset(None), Aperiodicity::Mid);
        assert_eq!(calc.compute_gain(1, 0.0, &window, false, true), 1.0);
        let with_hist = calc.compute_gain(1, 150.0, &window, false, true);
        assert!(with_hist.is_finite() && with_hist > 0.0);
        assert!(calc.compute_gain(99, 0.0, &window, false, true).is_nan());
    }

    #[test]
    fn test_factory_builds_calculator() {
        let ds = dataset(None);
        let calc = BptCalculatorFactory.build(&ds, Aperiodicity::High);
        assert_eq!(calc.compute_gain(1, 0.0, &TimeWindow::default(), true, false), 1.0);
    }
}
