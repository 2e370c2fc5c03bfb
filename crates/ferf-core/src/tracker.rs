//! Dirty-flag bookkeeping between recompute passes.

use ferf_types::ChangeSet;

/// Accumulates changed dimensions until a recompute pass consumes them.
///
/// A fresh tracker reports every dimension as changed so the first pass
/// builds everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeTracker {
    pending: ChangeSet,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: ChangeSet::all(),
        }
    }

    pub fn mark(&mut self, changes: ChangeSet) {
        self.pending |= changes;
    }

    /// Dimensions changed since the last successful pass.
    #[must_use]
    pub const fn pending(&self) -> ChangeSet {
        self.pending
    }

    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.pending.is_empty()
    }

    /// Forget `consumed`. Flags marked after the pass started survive.
    pub fn clear(&mut self, consumed: ChangeSet) {
        self.pending.remove(consumed);
    }
}
