//! Configuration dimensions that can invalidate derived forecast state.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Set of changed configuration dimensions.
    ///
    /// One flag per independently settable input. The recompute pipeline
    /// decides which stages to run from the flags it is handed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ChangeSet: u32 {
        const DATASET = 1 << 0;
        const GRID_SPACING = 1 << 1;
        const ALEATORY_STD_DEV = 1 << 2;
        const AFTERSHOCK_CORRECTION = 1 << 3;
        const SURFACE_APPROXIMATION = 1 << 4;
        const BACKGROUND_RUPTURE_TYPE = 1 << 5;
        const BACKGROUND_INCLUSION = 1 << 6;
        const PROBABILITY_MODEL = 1 << 7;
        const APERIODICITY = 1 << 8;
        const HISTORIC_OPEN_INTERVAL = 1 << 9;
        const TIME_WINDOW = 1 << 10;
    }
}

impl ChangeSet {
    /// Human-readable flag names, for logs.
    #[must_use]
    pub fn names(self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}
