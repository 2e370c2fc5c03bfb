//! Magnitude utilities and evenly discretized magnitude-frequency
//! distributions.

use serde::{Deserialize, Serialize};

/// Seismic moment (N·m) for a moment magnitude.
#[must_use]
pub fn magnitude_to_moment(magnitude: f64) -> f64 {
    10f64.powf(1.5 * magnitude + 9.05)
}

/// Evenly spaced magnitude bins with an annual rate per bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscretizedMfd {
    /// Magnitude at the center of the first bin.
    pub min_mag: f64,
    /// Bin width.
    pub delta: f64,
    /// Annual rate per bin.
    pub rates: Vec<f64>,
}

impl DiscretizedMfd {
    #[must_use]
    pub fn new(min_mag: f64, delta: f64, rates: Vec<f64>) -> Self {
        Self {
            min_mag,
            delta,
            rates,
        }
    }

    /// All-zero distribution with `num` bins.
    #[must_use]
    pub fn zeros(min_mag: f64, delta: f64, num: usize) -> Self {
        Self::new(min_mag, delta, vec![0.0; num])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Magnitude at the center of bin `i`.
    #[must_use]
    pub fn magnitude(&self, i: usize) -> f64 {
        self.min_mag + self.delta * i as f64
    }

    /// `(magnitude, rate)` pairs in ascending magnitude.
    pub fn bins(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.rates
            .iter()
            .enumerate()
            .map(|(i, &rate)| (self.magnitude(i), rate))
    }

    /// Number of bins carrying a strictly positive rate.
    #[must_use]
    pub fn nonzero_bins(&self) -> usize {
        self.rates.iter().filter(|&&r| r > 0.0).count()
    }

    #[must_use]
    pub fn total_rate(&self) -> f64 {
        self.rates.iter().sum()
    }

    #[must_use]
    pub fn total_moment_rate(&self) -> f64 {
        self.bins()
            .map(|(mag, rate)| rate * magnitude_to_moment(mag))
            .sum()
    }

    /// Copy with every bin multiplied by `factor`.
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(
            self.min_mag,
            self.delta,
            self.rates.iter().map(|r| r * factor).collect(),
        )
    }

    /// Truncated Gaussian distribution scaled to a total moment rate.
    ///
    /// Bins farther than `trunc_level` standard deviations from `mean` on
    /// either side are zero. When `std_dev` is zero all moment goes into the
    /// bin nearest `mean`. The result is all-zero if no bin survives
    /// truncation or the moment cannot be represented.
    #[must_use]
    pub fn gaussian(
        min_mag: f64,
        delta: f64,
        num: usize,
        mean: f64,
        std_dev: f64,
        total_moment_rate: f64,
        trunc_level: f64,
    ) -> Self {
        let mut mfd = Self::zeros(min_mag, delta, num);
        if num == 0 {
            return mfd;
        }
        if std_dev <= 0.0 {
            let idx = ((mean - min_mag) / delta).round();
            if idx >= 0.0 && (idx as usize) < num {
                let i = idx as usize;
                mfd.rates[i] = total_moment_rate / magnitude_to_moment(mfd.magnitude(i));
            }
            return mfd;
        }

        for i in 0..num {
            let mag = mfd.magnitude(i);
            let z = (mag - mean) / std_dev;
            if z.abs() <= trunc_level + 1e-9 {
                mfd.rates[i] = (-0.5 * z * z).exp();
            }
        }
        let unit_moment = mfd.total_moment_rate();
        if unit_moment > 0.0 && unit_moment.is_finite() {
            let factor = total_moment_rate / unit_moment;
            for r in &mut mfd.rates {
                *r *= factor;
            }
        } else {
            mfd.rates.iter_mut().for_each(|r| *r = 0.0);
        }
        mfd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moment_of_magnitude_seven() {
        let m0 = magnitude_to_moment(7.0);
        assert!((m0.log10() - 19.55).abs() < 1e-12);
    }

    #[test]
    fn test_gaussian_preserves_total_moment_rate() {
        let target = 0.01 * magnitude_to_moment(7.2);
        let mfd = DiscretizedMfd::gaussian(5.05, 0.1, 37, 7.2, 0.12, target, 2.0);
        let rel = (mfd.total_moment_rate() - target).abs() / target;
        assert!(rel < 1e-5, "relative moment error {rel}");
    }

    #[test]
    fn test_gaussian_truncates_both_tails() {
        let mfd = DiscretizedMfd::gaussian(5.05, 0.1, 37, 7.05, 0.1, 1e17, 2.0);
        for (mag, rate) in mfd.bins() {
            if (mag - 7.05).abs() > 0.2 + 1e-6 {
                assert_eq!(rate, 0.0, "bin {mag} should be truncated");
            }
        }
        assert_eq!(mfd.nonzero_bins(), 5);
    }

    #[test]
    fn test_gaussian_spacing_is_uniform() {
        let mfd = DiscretizedMfd::gaussian(5.05, 0.1, 37, 6.5, 0.2, 1e18, 2.0);
        let mags: Vec<f64> = mfd.bins().map(|(m, _)| m).collect();
        for pair in mags.windows(2) {
            assert!((pair[1] - pair[0] - 0.1).abs() < 1e-9);
        }
        assert!((mags[36] - 8.65).abs() < 1e-9);
    }

    #[test]
    fn test_gaussian_outside_range_is_empty() {
        let mfd = DiscretizedMfd::gaussian(5.05, 0.1, 37, 3.0, 0.1, 1e15, 2.0);
        assert_eq!(mfd.nonzero_bins(), 0);
        assert_eq!(mfd.total_rate(), 0.0);
    }

    #[test]
    fn test_zero_std_dev_uses_single_bin() {
        let target = magnitude_to_moment(7.05) * 0.002;
        let mfd = DiscretizedMfd::gaussian(5.05, 0.1, 37, 7.05, 0.0, target, 2.0);
        assert_eq!(mfd.nonzero_bins(), 1);
        assert!((mfd.total_rate() - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_scaled() {
        let mfd = DiscretizedMfd::new(6.0, 0.1, vec![0.1, 0.2, 0.0]);
        let s = mfd.scaled(0.5);
        assert_eq!(s.rates, vec![0.05, 0.1, 0.0]);
        assert_eq!(s.nonzero_bins(), 2);
    }
}
