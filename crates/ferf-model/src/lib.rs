//! Probability models.
//!
//! A [`ProbabilityModel`] turns a rupture id into a probability gain that the
//! source materializer multiplies into the Poisson-equivalent rate. Renewal
//! (time-dependent) gains come from a [`RenewalCalculator`] collaborator; the
//! engine is handed a [`RenewalCalculatorFactory`] and rebuilds calculators
//! only when the dataset, aperiodicity or model selection changes.

pub mod bpt;
pub mod model;
pub mod renewal;

pub use bpt::{BptCalculator, BptCalculatorFactory};
pub use model::{BlendComponent, BlendTerm, ProbabilityModel};
pub use renewal::{RenewalCalculator, RenewalCalculatorFactory};
