//! Recompute telemetry.
//!
//! Structured events for every recompute pass, delivered to a
//! [`RecomputeObserver`], plus an atomic counter block per engine.
//!
//! # Conformance rules
//!
//! 1. Every [`RecomputeEvent`] variant carries a monotonic `timestamp_ns`.
//! 2. All events and snapshots implement `serde::Serialize` for JSON export.
//! 3. Observers MUST NOT block or call back into the engine's setters.
//! 4. Log targets use `ferf.<subdomain>` naming.
//! 5. Counters use `AtomicU64` with `Ordering::Relaxed`.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Recompute pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    DatasetReload,
    Background,
    IndexRebuild,
    ProbabilityModel,
    SourceMaterialization,
    FlatIndex,
}

impl Stage {
    pub const ALL: [Self; 6] = [
        Self::DatasetReload,
        Self::Background,
        Self::IndexRebuild,
        Self::ProbabilityModel,
        Self::SourceMaterialization,
        Self::FlatIndex,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DatasetReload => "dataset_reload",
            Self::Background => "background",
            Self::IndexRebuild => "index_rebuild",
            Self::ProbabilityModel => "probability_model",
            Self::SourceMaterialization => "source_materialization",
            Self::FlatIndex => "flat_index",
        }
    }

    #[must_use]
    pub const fn ordinal(self) -> usize {
        self as usize
    }
}

/// Nanoseconds since the first telemetry call in this process.
#[must_use]
pub fn monotonic_ns() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Event schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RecomputeEvent {
    /// A pass with pending changes began.
    PassStarted {
        generation: u64,
        changes: Vec<&'static str>,
        timestamp_ns: u64,
    },

    StageCompleted {
        stage: Stage,
        duration_us: u64,
        timestamp_ns: u64,
    },

    /// The stage's inputs were unchanged; its previous output was reused.
    StageSkipped { stage: Stage, timestamp_ns: u64 },

    /// A rupture passed the rate filter but could not be materialized.
    RuptureSkipped {
        rupture_id: u32,
        reason: String,
        timestamp_ns: u64,
    },

    /// Aleatory spread underflowed; the rupture used the zero-spread path.
    UnderflowFallback { rupture_id: u32, timestamp_ns: u64 },

    /// A time-dependent model was built without any last-event data.
    MissingLastEventData { timestamp_ns: u64 },

    PassCompleted {
        generation: u64,
        source_count: usize,
        rupture_count: usize,
        duration_us: u64,
        timestamp_ns: u64,
    },

    PassFailed { error: String, timestamp_ns: u64 },

    /// Cancellation observed before `stage` ran.
    Cancelled { stage: &'static str, timestamp_ns: u64 },
}

impl RecomputeEvent {
    #[must_use]
    pub const fn timestamp_ns(&self) -> u64 {
        match self {
            Self::PassStarted { timestamp_ns, .. }
            | Self::StageCompleted { timestamp_ns, .. }
            | Self::StageSkipped { timestamp_ns, .. }
            | Self::RuptureSkipped { timestamp_ns, .. }
            | Self::UnderflowFallback { timestamp_ns, .. }
            | Self::MissingLastEventData { timestamp_ns }
            | Self::PassCompleted { timestamp_ns, .. }
            | Self::PassFailed { timestamp_ns, .. }
            | Self::Cancelled { timestamp_ns, .. } => *timestamp_ns,
        }
    }

    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::PassStarted { .. } => "pass_started",
            Self::StageCompleted { .. } => "stage_completed",
            Self::StageSkipped { .. } => "stage_skipped",
            Self::RuptureSkipped { .. } => "rupture_skipped",
            Self::UnderflowFallback { .. } => "underflow_fallback",
            Self::MissingLastEventData { .. } => "missing_last_event_data",
            Self::PassCompleted { .. } => "pass_completed",
            Self::PassFailed { .. } => "pass_failed",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

pub trait RecomputeObserver: Send + Sync {
    fn on_event(&self, event: &RecomputeEvent);
}

pub struct NoOpRecomputeObserver;

impl RecomputeObserver for NoOpRecomputeObserver {
    #[inline(always)]
    fn on_event(&self, _event: &RecomputeEvent) {}
}

/// Keeps the last N events for diagnostics.
pub struct RecomputeRingBuffer {
    events: parking_lot::Mutex<RingInner>,
}

struct RingInner {
    buf: Vec<RecomputeEvent>,
    capacity: usize,
    write_pos: usize,
    count: usize,
}

impl RecomputeRingBuffer {
    /// Capacity is clamped to at least one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: parking_lot::Mutex::new(RingInner {
                buf: Vec::with_capacity(capacity),
                capacity,
                write_pos: 0,
                count: 0,
            }),
        }
    }

    /// Stored events, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<RecomputeEvent> {
        let inner = self.events.lock();
        let n = inner.count.min(inner.capacity);
        let start = if inner.count >= inner.capacity {
            inner.write_pos
        } else {
            0
        };
        (0..n)
            .map(|i| inner.buf[(start + i) % inner.capacity].clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.events.lock();
        inner.count.min(inner.capacity)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecomputeObserver for RecomputeRingBuffer {
    fn on_event(&self, event: &RecomputeEvent) {
        let mut inner = self.events.lock();
        let pos = inner.write_pos;
        if inner.buf.len() < inner.capacity {
            inner.buf.push(event.clone());
        } else {
            inner.buf[pos] = event.clone();
        }
        inner.write_pos = (pos + 1) % inner.capacity;
        inner.count += 1;
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RecomputeMetrics {
    passes_started: AtomicU64,
    passes_completed: AtomicU64,
    passes_failed: AtomicU64,
    passes_cancelled: AtomicU64,
    /// Calls that found nothing to do.
    passes_clean: AtomicU64,
    stage_runs: [AtomicU64; 6],
    ruptures_skipped: AtomicU64,
    underflow_fallbacks: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecomputeMetricsSnapshot {
    pub passes_started: u64,
    pub passes_completed: u64,
    pub passes_failed: u64,
    pub passes_cancelled: u64,
    pub passes_clean: u64,
    /// Executions per stage, in [`Stage::ALL`] order.
    pub stage_runs: [u64; 6],
    pub ruptures_skipped: u64,
    pub underflow_fallbacks: u64,
}

impl RecomputeMetricsSnapshot {
    #[must_use]
    pub const fn stage_runs_of(&self, stage: Stage) -> u64 {
        self.stage_runs[stage.ordinal()]
    }
}

impl RecomputeMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_pass_started(&self) {
        self.passes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pass_completed(&self) {
        self.passes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pass_failed(&self) {
        self.passes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pass_cancelled(&self) {
        self.passes_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pass_clean(&self) {
        self.passes_clean.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stage_run(&self, stage: Stage) {
        self.stage_runs[stage.ordinal()].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ruptures_skipped(&self, n: usize) {
        self.ruptures_skipped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_underflow_fallbacks(&self, n: usize) {
        self.underflow_fallbacks.fetch_add(n as u64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> RecomputeMetricsSnapshot {
        RecomputeMetricsSnapshot {
            passes_started: self.passes_started.load(Ordering::Relaxed),
            passes_completed: self.passes_completed.load(Ordering::Relaxed),
            passes_failed: self.passes_failed.load(Ordering::Relaxed),
            passes_cancelled: self.passes_cancelled.load(Ordering::Relaxed),
            passes_clean: self.passes_clean.load(Ordering::Relaxed),
            stage_runs: std::array::from_fn(|i| self.stage_runs[i].load(Ordering::Relaxed)),
            ruptures_skipped: self.ruptures_skipped.load(Ordering::Relaxed),
            underflow_fallbacks: self.underflow_fallbacks.load(Ordering::Relaxed),
        }
    }
}

// ===========================================================================
// Tests: conformance
// ===========================================================================
