//! Forecast configuration surface.
//!
//! [`ForecastConfig`] is the complete set of independently settable options.
//! It deserializes from TOML with every field optional; missing fields take
//! the defaults below.

use ferf_error::{ForecastError, Result};
use serde::{Deserialize, Serialize};

use crate::MILLIS_PER_YEAR;
use crate::change::ChangeSet;

pub const DEFAULT_DURATION_YEARS: f64 = 30.0;
pub const MIN_DURATION_YEARS: f64 = 0.0001;
pub const MAX_DURATION_YEARS: f64 = 1_000_000.0;
pub const DEFAULT_START_YEAR: i32 = 2014;
pub const MIN_START_YEAR: i32 = 1800;
pub const MAX_START_YEAR: i32 = 2100;

/// Tolerance for the blend-weight sum.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Time window
// ---------------------------------------------------------------------------

/// Forecast start instant and duration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeWindow {
    /// Calendar year the forecast starts (January 1st).
    pub start_year: i32,
    /// Duration in years.
    pub duration_years: f64,
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            start_year: DEFAULT_START_YEAR,
            duration_years: DEFAULT_DURATION_YEARS,
        }
    }
}

impl TimeWindow {
    /// Validated constructor.
    pub fn new(start_year: i32, duration_years: f64) -> Result<Self> {
        let window = Self {
            start_year,
            duration_years,
        };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_DURATION_YEARS..=MAX_DURATION_YEARS).contains(&self.duration_years) {
            return Err(ForecastError::invalid_config(
                "duration_years",
                self.duration_years,
            ));
        }
        if !(MIN_START_YEAR..=MAX_START_YEAR).contains(&self.start_year) {
            return Err(ForecastError::invalid_config("start_year", self.start_year));
        }
        Ok(())
    }

    /// Start instant in milliseconds since the Unix epoch.
    #[must_use]
    pub fn start_epoch_millis(&self) -> i64 {
        (f64::from(self.start_year - 1970) * MILLIS_PER_YEAR).round() as i64
    }
}

// ---------------------------------------------------------------------------
// Option enums
// ---------------------------------------------------------------------------

/// Which probability model converts long-term rates to probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbabilityModelKind {
    /// Poisson, constant rate.
    #[default]
    TimeIndependent,
    /// Renewal model at the configured aperiodicity.
    TimeDependent,
    /// Fixed-weight mixture of the three renewal aperiodicities plus Poisson.
    Blend,
}

/// Magnitude-dependent aperiodicity branch for renewal models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aperiodicity {
    Low,
    #[default]
    Mid,
    High,
}

impl Aperiodicity {
    /// Upper magnitude edges of the first three bins; the last bin is open.
    pub const MAG_BIN_EDGES: [f64; 3] = [6.7, 7.2, 7.7];

    pub const ALL: [Self; 3] = [Self::Low, Self::Mid, Self::High];

    /// Per-bin aperiodicity values, smallest magnitude bin first.
    #[must_use]
    pub const fn values(self) -> [f64; 4] {
        match self {
            Self::Low => [0.4, 0.3, 0.2, 0.1],
            Self::Mid => [0.5, 0.4, 0.3, 0.2],
            Self::High => [0.6, 0.5, 0.4, 0.3],
        }
    }

    /// Aperiodicity for a rupture of magnitude `mag`.
    #[must_use]
    pub fn for_magnitude(self, mag: f64) -> f64 {
        let bin = Self::MAG_BIN_EDGES
            .iter()
            .position(|&edge| mag <= edge)
            .unwrap_or(Self::MAG_BIN_EDGES.len());
        self.values()[bin]
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Mid => "mid",
            Self::High => "high",
        }
    }
}

/// How renewal calculators average over the sections of a rupture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BptAveraging {
    /// Average recurrence intervals, average time since last event.
    AveRiAveTimeSince,
    /// Average recurrence intervals, average normalized time since last.
    AveRiAveNormTimeSince,
    /// Average rates, average normalized time since last.
    #[default]
    AveRateAveNormTimeSince,
}

impl BptAveraging {
    /// Whether recurrence intervals (rather than rates) are averaged.
    #[must_use]
    pub const fn average_recurrence_intervals(self) -> bool {
        matches!(self, Self::AveRiAveTimeSince | Self::AveRiAveNormTimeSince)
    }

    /// Whether normalized (rather than raw) time-since-last is averaged.
    #[must_use]
    pub const fn average_normalized_time_since(self) -> bool {
        matches!(
            self,
            Self::AveRiAveNormTimeSince | Self::AveRateAveNormTimeSince
        )
    }
}

/// Whether background sources are part of the forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundInclusion {
    /// Fault-based sources followed by background sources.
    #[default]
    Include,
    /// Fault-based sources only.
    Exclude,
    /// Background sources only.
    Only,
}

impl BackgroundInclusion {
    #[must_use]
    pub const fn includes_faults(self) -> bool {
        !matches!(self, Self::Only)
    }

    #[must_use]
    pub const fn includes_background(self) -> bool {
        !matches!(self, Self::Exclude)
    }
}

/// Rupture representation used for background sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundRuptureType {
    #[default]
    Point,
    CrossHair,
    Finite,
}

/// Component weights of the blended probability model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendWeights {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
    pub poisson: f64,
}

impl Default for BlendWeights {
    fn default() -> Self {
        Self {
            low: 0.1,
            mid: 0.4,
            high: 0.3,
            poisson: 0.2,
        }
    }
}

impl BlendWeights {
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.low + self.mid + self.high + self.poisson
    }

    /// Renewal weights paired with their aperiodicity branch.
    #[must_use]
    pub const fn renewal_weights(&self) -> [(Aperiodicity, f64); 3] {
        [
            (Aperiodicity::Low, self.low),
            (Aperiodicity::Mid, self.mid),
            (Aperiodicity::High, self.high),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        let all = [self.low, self.mid, self.high, self.poisson];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ForecastError::invalid_config(
                "blend_weights",
                format!("{all:?}"),
            ));
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ForecastError::InvalidWeights { sum });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ForecastConfig
// ---------------------------------------------------------------------------

/// Every option the forecast engine recognizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForecastConfig {
    /// Fault surface discretization in km.
    pub grid_spacing_km: f64,
    /// Aleatory magnitude-area standard deviation; zero disables it.
    pub aleatory_std_dev: f64,
    /// Apply the fixed 3% moment-rate reduction for aftershocks.
    pub aftershock_correction: bool,
    /// Use approximated (quadrilateral) rather than gridded surfaces.
    pub surface_approximation: bool,
    pub probability_model: ProbabilityModelKind,
    pub aperiodicity: Aperiodicity,
    /// Years since the historical record begins.
    pub historic_open_interval: f64,
    pub bpt_averaging: BptAveraging,
    pub background_inclusion: BackgroundInclusion,
    pub background_rupture_type: BackgroundRuptureType,
    pub blend_weights: BlendWeights,
    pub time_window: TimeWindow,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            grid_spacing_km: 1.0,
            aleatory_std_dev: 0.0,
            aftershock_correction: false,
            surface_approximation: false,
            probability_model: ProbabilityModelKind::default(),
            aperiodicity: Aperiodicity::default(),
            historic_open_interval: 0.0,
            bpt_averaging: BptAveraging::default(),
            background_inclusion: BackgroundInclusion::default(),
            background_rupture_type: BackgroundRuptureType::default(),
            blend_weights: BlendWeights::default(),
            time_window: TimeWindow::default(),
        }
    }
}

impl ForecastConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| ForecastError::invalid_config("toml", e.message().to_owned()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_grid_spacing(self.grid_spacing_km)?;
        validate_aleatory_std_dev(self.aleatory_std_dev)?;
        validate_historic_open_interval(self.historic_open_interval)?;
        self.blend_weights.validate()?;
        self.time_window.validate()
    }

    /// Dimensions whose values differ between `self` and `other`.
    #[must_use]
    pub fn changes_from(&self, other: &Self) -> ChangeSet {
        let mut changes = ChangeSet::empty();
        let mut mark = |differs: bool, flag: ChangeSet| {
            if differs {
                changes |= flag;
            }
        };
        mark(
            self.grid_spacing_km != other.grid_spacing_km,
            ChangeSet::GRID_SPACING,
        );
        mark(
            self.aleatory_std_dev != other.aleatory_std_dev,
            ChangeSet::ALEATORY_STD_DEV,
        );
        mark(
            self.aftershock_correction != other.aftershock_correction,
            ChangeSet::AFTERSHOCK_CORRECTION,
        );
        mark(
            self.surface_approximation != other.surface_approximation,
            ChangeSet::SURFACE_APPROXIMATION,
        );
        mark(
            self.probability_model != other.probability_model
                || self.blend_weights != other.blend_weights,
            ChangeSet::PROBABILITY_MODEL,
        );
        mark(
            self.aperiodicity != other.aperiodicity,
            ChangeSet::APERIODICITY,
        );
        // Averaging only affects gains at materialization time.
        mark(
            self.historic_open_interval != other.historic_open_interval
                || self.bpt_averaging != other.bpt_averaging,
            ChangeSet::HISTORIC_OPEN_INTERVAL,
        );
        mark(
            self.background_inclusion != other.background_inclusion,
            ChangeSet::BACKGROUND_INCLUSION,
        );
        mark(
            self.background_rupture_type != other.background_rupture_type,
            ChangeSet::BACKGROUND_RUPTURE_TYPE,
        );
        mark(
            self.time_window != other.time_window,
            ChangeSet::TIME_WINDOW,
        );
        changes
    }

    /// Multiplier applied to long-term rates.
    #[must_use]
    pub const fn aftershock_factor(&self) -> f64 {
        if self.aftershock_correction {
            MO_RATE_REDUCTION
        } else {
            1.0
        }
    }
}

/// Fixed moment-rate reduction applied by the aftershock correction.
pub const MO_RATE_REDUCTION: f64 = 0.97;

pub fn validate_grid_spacing(value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ForecastError::invalid_config("grid_spacing_km", value))
    }
}

pub fn validate_aleatory_std_dev(value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ForecastError::invalid_config("aleatory_std_dev", value))
    }
}

pub fn validate_historic_open_interval(value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ForecastError::invalid_config("historic_open_interval", value))
    }
}
