//! Probability-model selection.
//!
//! One tagged variant replaces the family of near-duplicate engines a
//! subclassing design would need: the engine holds a single
//! [`ProbabilityModel`] and asks it for gains.

use std::sync::Arc;

use ferf_error::{ForecastError, Result};
use ferf_types::config::WEIGHT_SUM_TOLERANCE;
use ferf_types::{
    Aperiodicity, BlendWeights, BptAveraging, ProbabilityModelKind, RuptureDataset, TimeWindow,
};
use tracing::debug;

use crate::renewal::{RenewalCalculator, RenewalCalculatorFactory};

/// One weighted term of a blended model.
#[derive(Debug, Clone)]
pub struct BlendComponent {
    pub weight: f64,
    pub term: BlendTerm,
}

#[derive(Debug, Clone)]
pub enum BlendTerm {
    Renewal {
        aperiodicity: Aperiodicity,
        calculator: Arc<dyn RenewalCalculator>,
    },
    /// Contributes gain 1.
    Poisson,
}

/// The probability model in effect for one forecast snapshot.
#[derive(Debug, Clone)]
pub enum ProbabilityModel {
    TimeIndependent,
    TimeDependent {
        aperiodicity: Aperiodicity,
        calculator: Arc<dyn RenewalCalculator>,
    },
    Blend { components: Vec<BlendComponent> },
}

impl ProbabilityModel {
    /// Build the model selected by `kind`.
    ///
    /// `aperiodicity` applies to [`ProbabilityModelKind::TimeDependent`];
    /// a blend always spans every aperiodicity branch.
    pub fn build(
        kind: ProbabilityModelKind,
        aperiodicity: Aperiodicity,
        weights: &BlendWeights,
        dataset: &Arc<RuptureDataset>,
        factory: &dyn RenewalCalculatorFactory,
    ) -> Result<Self> {
        let model = match kind {
            ProbabilityModelKind::TimeIndependent => Self::TimeIndependent,
            ProbabilityModelKind::TimeDependent => Self::TimeDependent {
                aperiodicity,
                calculator: factory.build(dataset, aperiodicity),
            },
            ProbabilityModelKind::Blend => {
                let mut components: Vec<BlendComponent> = weights
                    .renewal_weights()
                    .into_iter()
                    .map(|(aperiodicity, weight)| BlendComponent {
                        weight,
                        term: BlendTerm::Renewal {
                            aperiodicity,
                            calculator: factory.build(dataset, aperiodicity),
                        },
                    })
                    .collect();
                components.push(BlendComponent {
                    weight: weights.poisson,
                    term: BlendTerm::Poisson,
                });
                Self::blend(components)?
            }
        };
        debug!(target: "ferf.model", kind = ?kind, aperiodicity = aperiodicity.as_str(), "probability model built");
        Ok(model)
    }

    /// Blend of weighted components. Weights must sum to one.
    pub fn blend(components: Vec<BlendComponent>) -> Result<Self> {
        let sum: f64 = components.iter().map(|c| c.weight).sum();
        if components.iter().any(|c| !c.weight.is_finite() || c.weight < 0.0)
            || (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE
        {
            return Err(ForecastError::InvalidWeights { sum });
        }
        Ok(Self::Blend { components })
    }

    #[must_use]
    pub const fn kind(&self) -> ProbabilityModelKind {
        match self {
            Self::TimeIndependent => ProbabilityModelKind::TimeIndependent,
            Self::TimeDependent { .. } => ProbabilityModelKind::TimeDependent,
            Self::Blend { .. } => ProbabilityModelKind::Blend,
        }
    }

    /// Whether gains are applied as expected-count multipliers rather than
    /// through a Poisson conversion.
    #[must_use]
    pub const fn is_time_dependent(&self) -> bool {
        !matches!(self, Self::TimeIndependent)
    }

    /// Component weights, in component order. Empty for non-blends.
    #[must_use]
    pub fn weights(&self) -> Vec<f64> {
        match self {
            Self::Blend { components } => components.iter().map(|c| c.weight).collect(),
            _ => Vec::new(),
        }
    }

    /// Probability gain for one rupture. Never negative; a calculator `NaN`
    /// counts as zero.
    #[must_use]
    pub fn compute_gain(
        &self,
        rupture_id: u32,
        window: &TimeWindow,
        historic_open_interval: f64,
        averaging: BptAveraging,
    ) -> f64 {
        let renewal = |calculator: &Arc<dyn RenewalCalculator>| {
            sanitize_gain(calculator.compute_gain(
                rupture_id,
                historic_open_interval,
                window,
                averaging.average_recurrence_intervals(),
                averaging.average_normalized_time_since(),
            ))
        };
        match self {
            Self::TimeIndependent => 1.0,
            Self::TimeDependent { calculator, .. } => renewal(calculator),
            Self::Blend { components } => components
                .iter()
                .map(|c| match &c.term {
                    BlendTerm::Renewal { calculator, .. } => c.weight * renewal(calculator),
                    BlendTerm::Poisson => c.weight,
                })
                .sum(),
        }
    }
}

fn sanitize_gain(gain: f64) -> f64 {
    if gain.is_nan() || gain < 0.0 { 0.0 } else { gain }
}
