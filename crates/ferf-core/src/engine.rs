//! Forecast engine: configuration surface, staged recompute pipeline, and
//! query API.
//!
//! States: `Uninitialized → Consistent`, passing through `Recomputing` on
//! every pass. A pass runs these stages in order, each only when its inputs
//! changed:
//!
//! 1. dataset reload
//! 2. background sizing and materialization
//! 3. index rebuild (admission filter, rupture ⇄ source tables)
//! 4. probability-model rebuild
//! 5. fault-source materialization
//! 6. flat rupture index rebuild
//!
//! The result is published as a new immutable [`ForecastSnapshot`] only
//! after every stage succeeded; a failed or cancelled pass leaves the
//! previous snapshot in place.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Instant;

use ferf_error::{ForecastError, Result};
use ferf_model::{BptCalculatorFactory, ProbabilityModel, RenewalCalculatorFactory};
use ferf_types::config::{
    validate_aleatory_std_dev, validate_grid_spacing, validate_historic_open_interval,
};
use ferf_types::{
    Aperiodicity, BackgroundInclusion, BackgroundRuptureType, BlendWeights, BptAveraging,
    ChangeSet, Cx, ForecastConfig, ProbabilityModelKind, Region, RuptureDataset, Source,
    TimeWindow,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::background::build_background;
use crate::flat_index::{FlatIndex, GlobalRuptureAddress};
use crate::index::{IndexTables, SkippedRupture};
use crate::loader::{DatasetLoader, DatasetSource, JsonDatasetLoader};
use crate::materialize::SourceMaterializer;
use crate::region_cache::RegionCache;
use crate::snapshot::ForecastSnapshot;
use crate::telemetry::{
    NoOpRecomputeObserver, RecomputeEvent, RecomputeMetrics, RecomputeMetricsSnapshot,
    RecomputeObserver, Stage, monotonic_ns,
};
use crate::tracker::ChangeTracker;

/// Inputs that can invalidate background sources.
const BACKGROUND_INPUTS: ChangeSet = ChangeSet::DATASET
    .union(ChangeSet::BACKGROUND_RUPTURE_TYPE)
    .union(ChangeSet::BACKGROUND_INCLUSION)
    .union(ChangeSet::TIME_WINDOW)
    .union(ChangeSet::AFTERSHOCK_CORRECTION);

/// Inputs that can change the number of background sources.
const BACKGROUND_SIZING_INPUTS: ChangeSet = ChangeSet::DATASET
    .union(ChangeSet::BACKGROUND_RUPTURE_TYPE)
    .union(ChangeSet::BACKGROUND_INCLUSION);

const MODEL_INPUTS: ChangeSet = ChangeSet::DATASET
    .union(ChangeSet::APERIODICITY)
    .union(ChangeSet::PROBABILITY_MODEL);

const SOURCE_INPUTS: ChangeSet = ChangeSet::DATASET
    .union(ChangeSet::GRID_SPACING)
    .union(ChangeSet::ALEATORY_STD_DEV)
    .union(ChangeSet::AFTERSHOCK_CORRECTION)
    .union(ChangeSet::SURFACE_APPROXIMATION)
    .union(ChangeSet::PROBABILITY_MODEL)
    .union(ChangeSet::APERIODICITY)
    .union(ChangeSet::TIME_WINDOW)
    .union(ChangeSet::HISTORIC_OPEN_INTERVAL)
    .union(ChangeSet::BACKGROUND_INCLUSION);

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    /// No snapshot has been published yet.
    Uninitialized = 0,
    /// A pass is running.
    Recomputing = 1,
    /// A snapshot is published and queries are valid.
    Consistent = 2,
}

impl EngineState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Recomputing,
            2 => Self::Consistent,
            _ => Self::Uninitialized,
        }
    }
}

/// Everything the writer lock protects.
struct WriterState {
    config: ForecastConfig,
    source: DatasetSource,
    tracker: ChangeTracker,
    /// Dataset used by the last successful pass, with any last-event edits
    /// made since.
    working: Option<Arc<RuptureDataset>>,
}

impl WriterState {
    /// The dataset the next pass will use, unshared for editing.
    fn editable_dataset(&mut self) -> Result<&mut RuptureDataset> {
        if self.tracker.pending().contains(ChangeSet::DATASET) {
            return match &mut self.source {
                DatasetSource::Live(dataset) => Ok(Arc::make_mut(dataset)),
                DatasetSource::Path(_) => Err(ForecastError::NotReady),
            };
        }
        match &mut self.working {
            Some(dataset) => Ok(Arc::make_mut(dataset)),
            None => Err(ForecastError::NotReady),
        }
    }
}

/// Output of a successful pipeline run, before publication.
struct PassOutput {
    snapshot: ForecastSnapshot,
    dataset: Arc<RuptureDataset>,
}

// ---------------------------------------------------------------------------
// ForecastEngine
// ---------------------------------------------------------------------------

/// Long-term rupture forecast over a fault-system dataset.
///
/// `Send + Sync`: readers query the published snapshot concurrently while
/// at most one writer recomputes. Setters and `recompute` fail with
/// [`ForecastError::RecomputeInProgress`] instead of waiting on a running
/// pass.
pub struct ForecastEngine {
    writer: Mutex<WriterState>,
    current: RwLock<Option<Arc<ForecastSnapshot>>>,
    state: AtomicU8,
    /// Bumped each time a pass takes the writer lock, after `state` is
    /// set to `Recomputing`.
    passes_admitted: AtomicU64,
    renewal: Arc<dyn RenewalCalculatorFactory>,
    loader: Arc<dyn DatasetLoader>,
    observer: Arc<dyn RecomputeObserver>,
    metrics: RecomputeMetrics,
}

impl std::fmt::Debug for ForecastEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastEngine")
            .field("state", &self.state())
            .field("generation", &self.current.read().as_ref().map(|s| s.generation))
            .finish_non_exhaustive()
    }
}

impl ForecastEngine {
    /// Create an engine. Nothing is computed until [`ForecastEngine::recompute`].
    pub fn new(source: impl Into<DatasetSource>, config: ForecastConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            writer: Mutex::new(WriterState {
                config,
                source: source.into(),
                tracker: ChangeTracker::new(),
                working: None,
            }),
            current: RwLock::new(None),
            state: AtomicU8::new(EngineState::Uninitialized as u8),
            passes_admitted: AtomicU64::new(0),
            renewal: Arc::new(BptCalculatorFactory),
            loader: Arc::new(JsonDatasetLoader),
            observer: Arc::new(NoOpRecomputeObserver),
            metrics: RecomputeMetrics::new(),
        })
    }

    #[must_use]
    pub fn with_renewal_factory(mut self, factory: Arc<dyn RenewalCalculatorFactory>) -> Self {
        self.renewal = factory;
        self
    }

    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn DatasetLoader>) -> Self {
        self.loader = loader;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RecomputeObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn metrics(&self) -> RecomputeMetricsSnapshot {
        self.metrics.snapshot()
    }

    // -----------------------------------------------------------------------
    // Configuration surface
    // -----------------------------------------------------------------------

    /// Run `f` under the writer lock, failing fast while a pass runs.
    fn with_writer<T>(&self, f: impl FnOnce(&mut WriterState) -> Result<T>) -> Result<T> {
        if let Some(mut writer) = self.writer.try_lock() {
            return f(&mut writer);
        }
        let seen = self.passes_admitted.load(Ordering::Acquire);
        if self.state() == EngineState::Recomputing {
            return Err(ForecastError::RecomputeInProgress);
        }
        // Another setter holds the lock briefly, or a pass has taken it and
        // not yet published its state. The epoch tells the two apart.
        let mut writer = self.writer.lock();
        if self.passes_admitted.load(Ordering::Acquire) != seen {
            return Err(ForecastError::RecomputeInProgress);
        }
        f(&mut writer)
    }

    /// Store `value` and mark `flag` if it differs from the current value.
    fn set_field<T: PartialEq + std::fmt::Debug>(
        &self,
        flag: ChangeSet,
        value: T,
        field: impl FnOnce(&mut ForecastConfig) -> &mut T,
    ) -> Result<()> {
        self.with_writer(|w| {
            let slot = field(&mut w.config);
            if *slot != value {
                debug!(target: "ferf.engine", changed = ?flag.names(), value = ?value, "configuration changed");
                *slot = value;
                w.tracker.mark(flag);
            }
            Ok(())
        })
    }

    /// Replace the dataset. Always marks the dataset as changed.
    pub fn set_dataset(&self, source: impl Into<DatasetSource>) -> Result<()> {
        let source = source.into();
        self.with_writer(|w| {
            w.source = source;
            w.tracker.mark(ChangeSet::DATASET);
            Ok(())
        })
    }

    pub fn set_grid_spacing(&self, km: f64) -> Result<()> {
        validate_grid_spacing(km)?;
        self.set_field(ChangeSet::GRID_SPACING, km, |c| &mut c.grid_spacing_km)
    }

    pub fn set_aleatory_std_dev(&self, std_dev: f64) -> Result<()> {
        validate_aleatory_std_dev(std_dev)?;
        self.set_field(ChangeSet::ALEATORY_STD_DEV, std_dev, |c| {
            &mut c.aleatory_std_dev
        })
    }

    pub fn set_aftershock_correction(&self, enabled: bool) -> Result<()> {
        self.set_field(ChangeSet::AFTERSHOCK_CORRECTION, enabled, |c| {
            &mut c.aftershock_correction
        })
    }

    pub fn set_surface_approximation(&self, enabled: bool) -> Result<()> {
        self.set_field(ChangeSet::SURFACE_APPROXIMATION, enabled, |c| {
            &mut c.surface_approximation
        })
    }

    pub fn set_probability_model(&self, kind: ProbabilityModelKind) -> Result<()> {
        self.set_field(ChangeSet::PROBABILITY_MODEL, kind, |c| {
            &mut c.probability_model
        })
    }

    pub fn set_blend_weights(&self, weights: BlendWeights) -> Result<()> {
        weights.validate()?;
        self.set_field(ChangeSet::PROBABILITY_MODEL, weights, |c| {
            &mut c.blend_weights
        })
    }

    pub fn set_aperiodicity(&self, aperiodicity: Aperiodicity) -> Result<()> {
        self.set_field(ChangeSet::APERIODICITY, aperiodicity, |c| {
            &mut c.aperiodicity
        })
    }

    pub fn set_historic_open_interval(&self, years: f64) -> Result<()> {
        validate_historic_open_interval(years)?;
        self.set_field(ChangeSet::HISTORIC_OPEN_INTERVAL, years, |c| {
            &mut c.historic_open_interval
        })
    }

    /// Averaging only enters at gain evaluation, so it shares the
    /// historic-open-interval flag.
    pub fn set_bpt_averaging(&self, averaging: BptAveraging) -> Result<()> {
        self.set_field(ChangeSet::HISTORIC_OPEN_INTERVAL, averaging, |c| {
            &mut c.bpt_averaging
        })
    }

    pub fn set_background_inclusion(&self, inclusion: BackgroundInclusion) -> Result<()> {
        self.set_field(ChangeSet::BACKGROUND_INCLUSION, inclusion, |c| {
            &mut c.background_inclusion
        })
    }

    pub fn set_background_rupture_type(&self, kind: BackgroundRuptureType) -> Result<()> {
        self.set_field(ChangeSet::BACKGROUND_RUPTURE_TYPE, kind, |c| {
            &mut c.background_rupture_type
        })
    }

    pub fn set_time_window(&self, window: TimeWindow) -> Result<()> {
        window.validate()?;
        self.set_field(ChangeSet::TIME_WINDOW, window, |c| &mut c.time_window)
    }

    pub fn set_duration(&self, years: f64) -> Result<()> {
        let start_year = self.with_writer(|w| Ok(w.config.time_window.start_year))?;
        self.set_time_window(TimeWindow::new(start_year, years)?)
    }

    pub fn set_start_year(&self, year: i32) -> Result<()> {
        let duration = self.with_writer(|w| Ok(w.config.time_window.duration_years))?;
        self.set_time_window(TimeWindow::new(year, duration)?)
    }

    /// Replace the whole configuration, marking only fields that differ.
    pub fn apply_config(&self, config: ForecastConfig) -> Result<ChangeSet> {
        config.validate()?;
        self.with_writer(|w| {
            let changes = config.changes_from(&w.config);
            w.config = config;
            w.tracker.mark(changes);
            Ok(changes)
        })
    }

    /// Set or clear a section's last-event date for the next pass.
    pub fn set_section_last_event(&self, section_id: u32, epoch_millis: Option<i64>) -> Result<()> {
        self.with_writer(|w| {
            w.editable_dataset()?
                .set_section_last_event(section_id, epoch_millis)?;
            w.tracker.mark(ChangeSet::PROBABILITY_MODEL);
            Ok(())
        })
    }

    /// Set the last-event date of every section of a rupture.
    pub fn set_rupture_last_event(&self, rupture_id: u32, epoch_millis: i64) -> Result<()> {
        self.with_writer(|w| {
            w.editable_dataset()?
                .set_rupture_last_event(rupture_id, epoch_millis)?;
            w.tracker.mark(ChangeSet::PROBABILITY_MODEL);
            Ok(())
        })
    }

    /// Configuration the next pass will use.
    pub fn pending_config(&self) -> Result<ForecastConfig> {
        self.with_writer(|w| Ok(w.config.clone()))
    }

    /// Dimensions changed since the last successful pass.
    pub fn pending_changes(&self) -> Result<ChangeSet> {
        self.with_writer(|w| Ok(w.tracker.pending()))
    }

    // -----------------------------------------------------------------------
    // Recompute pipeline
    // -----------------------------------------------------------------------

    /// Bring the published snapshot up to date with the configuration.
    ///
    /// Returns the snapshot in force afterwards. With no pending changes
    /// this is the current snapshot, untouched.
    pub fn recompute(&self, cx: &Cx) -> Result<Arc<ForecastSnapshot>> {
        let mut writer = self
            .writer
            .try_lock()
            .ok_or(ForecastError::RecomputeInProgress)?;
        let resumed = self.admit_pass();
        let changes = writer.tracker.pending();
        let previous = self.current.read().clone();
        if let Some(prev) = &previous {
            if changes.is_empty() {
                self.state.store(resumed as u8, Ordering::Release);
                debug!(target: "ferf.engine", generation = prev.generation, "nothing to recompute");
                self.metrics.record_pass_clean();
                return Ok(Arc::clone(prev));
            }
        }

        let generation = previous.as_ref().map_or(1, |p| p.generation + 1);
        self.metrics.record_pass_started();
        info!(target: "ferf.engine", generation, changes = ?changes.names(), "recompute started");
        self.emit(RecomputeEvent::PassStarted {
            generation,
            changes: changes.names(),
            timestamp_ns: monotonic_ns(),
        });

        let started = Instant::now();
        match self.run_pipeline(&writer, changes, previous.as_deref(), generation, cx) {
            Ok(out) => {
                let snapshot = Arc::new(out.snapshot);
                writer.working = Some(out.dataset);
                writer.tracker.clear(changes);
                *self.current.write() = Some(Arc::clone(&snapshot));
                self.state
                    .store(EngineState::Consistent as u8, Ordering::Release);
                self.metrics.record_pass_completed();

                let duration_us = elapsed_us(started);
                info!(
                    target: "ferf.engine",
                    generation,
                    sources = snapshot.source_count(),
                    ruptures = snapshot.rupture_count(),
                    duration_us,
                    "recompute completed"
                );
                self.emit(RecomputeEvent::PassCompleted {
                    generation,
                    source_count: snapshot.source_count(),
                    rupture_count: snapshot.rupture_count(),
                    duration_us,
                    timestamp_ns: monotonic_ns(),
                });
                Ok(snapshot)
            }
            Err(err) => {
                let restored = if previous.is_some() {
                    EngineState::Consistent
                } else {
                    EngineState::Uninitialized
                };
                self.state.store(restored as u8, Ordering::Release);
                if let ForecastError::Cancelled { stage } = err {
                    self.metrics.record_pass_cancelled();
                    warn!(target: "ferf.engine", generation, stage, "recompute cancelled");
                    self.emit(RecomputeEvent::Cancelled {
                        stage,
                        timestamp_ns: monotonic_ns(),
                    });
                } else {
                    self.metrics.record_pass_failed();
                    error!(target: "ferf.engine", generation, error = %err, "recompute failed");
                    self.emit(RecomputeEvent::PassFailed {
                        error: err.to_string(),
                        timestamp_ns: monotonic_ns(),
                    });
                }
                Err(err)
            }
        }
    }

    /// Mark a pass as running. Called with the writer lock held; returns
    /// the state to restore if the pass turns out to be clean.
    fn admit_pass(&self) -> EngineState {
        let resumed = EngineState::from_u8(
            self.state
                .swap(EngineState::Recomputing as u8, Ordering::AcqRel),
        );
        self.passes_admitted.fetch_add(1, Ordering::AcqRel);
        resumed
    }

    fn run_pipeline(
        &self,
        writer: &WriterState,
        changes: ChangeSet,
        prev: Option<&ForecastSnapshot>,
        generation: u64,
        cx: &Cx,
    ) -> Result<PassOutput> {
        let config = &writer.config;
        let first = prev.is_none();

        // 1. Dataset reload.
        let dataset_changed = first || changes.contains(ChangeSet::DATASET);
        let dataset = self.run_stage(cx, Stage::DatasetReload, dataset_changed, || {
            self.resolve_dataset(&writer.source)
        })?;
        let dataset = match dataset {
            Some(d) => d,
            None => writer
                .working
                .clone()
                .ok_or_else(|| ForecastError::internal("no dataset in force"))?,
        };

        // 2. Background sizing and materialization.
        let sizing = dataset_changed || changes.intersects(BACKGROUND_SIZING_INPUTS);
        let background = self
            .run_stage(
                cx,
                Stage::Background,
                first || changes.intersects(BACKGROUND_INPUTS),
                || build_background(&dataset, config).map(Arc::new),
            )?
            .map_or_else(|| reuse(prev, |p| &p.background), Ok)?;

        // 3. Index rebuild.
        let rebuilt_index = self.run_stage(cx, Stage::IndexRebuild, dataset_changed, || {
            IndexTables::build(&dataset).map(Arc::new)
        })?;
        let index_rebuilt = rebuilt_index.is_some();
        let (index, regions) = match rebuilt_index {
            Some(index) => {
                self.metrics.record_ruptures_skipped(index.skipped().len());
                for skipped in index.skipped() {
                    self.emit(RecomputeEvent::RuptureSkipped {
                        rupture_id: skipped.rupture_id,
                        reason: skipped.reason.clone(),
                        timestamp_ns: monotonic_ns(),
                    });
                }
                (index, Arc::new(RegionCache::new()))
            }
            None => (
                reuse(prev, |p| &p.index)?,
                reuse(prev, |p| &p.regions)?,
            ),
        };

        // 4. Probability model.
        let model = self
            .run_stage(
                cx,
                Stage::ProbabilityModel,
                first || changes.intersects(MODEL_INPUTS),
                || self.build_model(&dataset, config).map(Arc::new),
            )?
            .map_or_else(|| reuse(prev, |p| &p.model), Ok)?;

        // 5. Fault-source materialization.
        let materialized = self.run_stage(
            cx,
            Stage::SourceMaterialization,
            first || changes.intersects(SOURCE_INPUTS),
            || SourceMaterializer::new(&dataset, &index, &model, config).materialize_all(),
        )?;
        let (fault_sources, underflow_fallbacks) = match materialized {
            Some(out) => {
                self.metrics
                    .record_underflow_fallbacks(out.underflow_fallbacks.len());
                for &rupture_id in &out.underflow_fallbacks {
                    self.emit(RecomputeEvent::UnderflowFallback {
                        rupture_id,
                        timestamp_ns: monotonic_ns(),
                    });
                }
                (Arc::new(out.sources), Arc::new(out.underflow_fallbacks))
            }
            None => (
                reuse(prev, |p| &p.fault_sources)?,
                reuse(prev, |p| &p.underflow_fallbacks)?,
            ),
        };

        // 6. Flat index, when rupture counts may have changed.
        let counts: Vec<usize> = fault_sources
            .iter()
            .chain(background.iter())
            .map(Source::rupture_count)
            .collect();
        let counts_changed = prev.is_none_or(|p| !p.flat.matches_counts(&counts));
        let flat = self
            .run_stage(
                cx,
                Stage::FlatIndex,
                sizing || index_rebuilt || counts_changed,
                || {
                    FlatIndex::build(
                        fault_sources
                            .iter()
                            .chain(background.iter())
                            .map(|s| (s.rupture_count(), s.rupture_id())),
                    )
                    .map(Arc::new)
                },
            )?
            .map_or_else(|| reuse(prev, |p| &p.flat), Ok)?;

        let total: usize = counts.iter().sum();
        if total != flat.len() {
            return Err(ForecastError::internal(format!(
                "flat index holds {} ruptures but sources hold {total}",
                flat.len()
            )));
        }

        let fingerprint =
            ForecastSnapshot::compute_fingerprint(&index, &fault_sources, &background, &flat);
        Ok(PassOutput {
            snapshot: ForecastSnapshot {
                generation,
                config: config.clone(),
                dataset: Arc::clone(&dataset),
                background,
                index,
                regions,
                model,
                fault_sources,
                underflow_fallbacks,
                flat,
                fingerprint,
            },
            dataset,
        })
    }

    /// Run `build` if `needed`, with a cancellation checkpoint first.
    fn run_stage<T>(
        &self,
        cx: &Cx,
        stage: Stage,
        needed: bool,
        build: impl FnOnce() -> Result<T>,
    ) -> Result<Option<T>> {
        cx.checkpoint_with(stage.as_str())?;
        if !needed {
            debug!(target: "ferf.engine", stage = stage.as_str(), "stage skipped");
            self.emit(RecomputeEvent::StageSkipped {
                stage,
                timestamp_ns: monotonic_ns(),
            });
            return Ok(None);
        }
        let started = Instant::now();
        let out = build()?;
        let duration_us = elapsed_us(started);
        self.metrics.record_stage_run(stage);
        debug!(target: "ferf.engine", stage = stage.as_str(), duration_us, "stage completed");
        self.emit(RecomputeEvent::StageCompleted {
            stage,
            duration_us,
            timestamp_ns: monotonic_ns(),
        });
        Ok(Some(out))
    }

    fn resolve_dataset(&self, source: &DatasetSource) -> Result<Arc<RuptureDataset>> {
        match source {
            DatasetSource::Live(dataset) => Ok(Arc::clone(dataset)),
            DatasetSource::Path(path) => self.loader.load(path).map(Arc::new),
        }
    }

    fn build_model(
        &self,
        dataset: &Arc<RuptureDataset>,
        config: &ForecastConfig,
    ) -> Result<ProbabilityModel> {
        let model = ProbabilityModel::build(
            config.probability_model,
            config.aperiodicity,
            &config.blend_weights,
            dataset,
            self.renewal.as_ref(),
        )?;
        if model.is_time_dependent() && !dataset.has_last_event_data() {
            warn!(
                target: "ferf.engine",
                model = ?config.probability_model,
                historic_open_interval = config.historic_open_interval,
                "no section has last-event data; renewal gains use the historic open interval only"
            );
            self.emit(RecomputeEvent::MissingLastEventData {
                timestamp_ns: monotonic_ns(),
            });
        }
        Ok(model)
    }

    fn emit(&self, event: RecomputeEvent) {
        self.observer.on_event(&event);
    }

    // -----------------------------------------------------------------------
    // Query API
    // -----------------------------------------------------------------------

    /// The published snapshot.
    pub fn snapshot(&self) -> Result<Arc<ForecastSnapshot>> {
        self.current
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(ForecastError::NotReady)
    }

    pub fn source_count(&self) -> Result<usize> {
        Ok(self.snapshot()?.source_count())
    }

    pub fn source(&self, index: usize) -> Result<Source> {
        self.snapshot()?.source(index).cloned()
    }

    pub fn rupture_count(&self) -> Result<usize> {
        Ok(self.snapshot()?.rupture_count())
    }

    pub fn rupture(&self, flat_index: usize) -> Result<GlobalRuptureAddress> {
        self.snapshot()?.rupture(flat_index)
    }

    pub fn long_term_rate(&self, rupture_id: u32) -> Result<f64> {
        self.snapshot()?.long_term_rate(rupture_id)
    }

    pub fn fault_source_count(&self) -> Result<usize> {
        Ok(self.snapshot()?.fault_source_count())
    }

    pub fn background_source_count(&self) -> Result<usize> {
        Ok(self.snapshot()?.background_source_count())
    }

    pub fn fault_rupture_count(&self) -> Result<usize> {
        Ok(self.snapshot()?.fault_rupture_count())
    }

    pub fn rupture_id_for_source(&self, source: usize) -> Result<u32> {
        self.snapshot()?.rupture_id_for_source(source)
    }

    pub fn source_for_rupture(&self, rupture_id: u32) -> Result<Option<usize>> {
        self.snapshot()?.source_for_rupture(rupture_id)
    }

    pub fn flat_indices_for_source(&self, source: usize) -> Result<std::ops::Range<usize>> {
        self.snapshot()?.flat_indices_for_source(source)
    }

    pub fn flat_index_for(&self, source: usize, rupture: usize) -> Result<usize> {
        self.snapshot()?.flat_index_for(source, rupture)
    }

    pub fn skipped_ruptures(&self) -> Result<Vec<SkippedRupture>> {
        Ok(self.snapshot()?.skipped_ruptures().to_vec())
    }

    pub fn generation(&self) -> Result<u64> {
        Ok(self.snapshot()?.generation())
    }

    pub fn fingerprint(&self) -> Result<u64> {
        Ok(self.snapshot()?.fingerprint())
    }

    pub fn source_names(&self) -> Result<Vec<String>> {
        Ok(self
            .snapshot()?
            .source_names()
            .into_iter()
            .map(str::to_owned)
            .collect())
    }

    pub fn is_rupture_inside(&self, region: &Region, rupture_id: u32) -> Result<bool> {
        self.snapshot()?.is_rupture_inside(region, rupture_id)
    }
}

/// The previous snapshot's copy of a part a skipped stage would have built.
fn reuse<T: ?Sized>(
    prev: Option<&ForecastSnapshot>,
    part: impl FnOnce(&ForecastSnapshot) -> &Arc<T>,
) -> Result<Arc<T>> {
    prev.map(|p| Arc::clone(part(p)))
        .ok_or_else(|| ForecastError::internal("stage skipped on the first pass"))
}

fn elapsed_us(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferf_types::{Location, RuptureRecord, SectionRecord};

    fn dataset() -> RuptureDataset {
        RuptureDataset::new(
            vec![SectionRecord {
                id: 0,
                name: "Only".to_owned(),
                trace: vec![Location::new(34.0, -118.0)],
                dip_deg: 90.0,
                upper_depth_km: 0.0,
                lower_depth_km: 10.0,
                min_mag: 0.0,
                last_event_epoch_millis: None,
            }],
            vec![RuptureRecord {
                id: 0,
                section_ids: vec![0],
                magnitude: 7.0,
                rake: 0.0,
                area_m2: 1e8,
                rate: 0.01,
                mfd: None,
            }],
        )
        .expect("valid")
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            EngineState::Uninitialized,
            EngineState::Recomputing,
            EngineState::Consistent,
        ] {
            assert_eq!(EngineState::from_u8(state as u8), state);
        }
        assert_eq!(EngineState::from_u8(9), EngineState::Uninitialized);
    }

    #[test]
    fn test_stage_inputs_cover_every_dimension() {
        let all = BACKGROUND_INPUTS | MODEL_INPUTS | SOURCE_INPUTS;
        assert_eq!(all, ChangeSet::all());
        assert!(BACKGROUND_INPUTS.contains(BACKGROUND_SIZING_INPUTS));
    }

    #[test]
    fn test_setters_mark_only_real_changes() {
        let engine = ForecastEngine::new(dataset(), ForecastConfig::default()).expect("engine");
        engine.recompute(&Cx::new()).expect("first");
        engine.set_surface_approximation(false).expect("same");
        assert!(engine.pending_changes().expect("idle").is_empty());
        engine.set_surface_approximation(true).expect("changed");
        engine.set_start_year(2020).expect("changed");
        assert_eq!(
            engine.pending_changes().expect("idle"),
            ChangeSet::SURFACE_APPROXIMATION | ChangeSet::TIME_WINDOW
        );
        assert_eq!(engine.pending_config().expect("idle").time_window.start_year, 2020);
    }

    #[test]
    fn test_setter_waiting_on_admitted_pass_is_rejected() {
        let engine = Arc::new(
            ForecastEngine::new(dataset(), ForecastConfig::default()).expect("engine"),
        );
        engine.recompute(&Cx::new()).expect("first");

        // Lock taken by a pass that has not published `Recomputing` yet.
        let guard = engine.writer.lock();
        assert_eq!(engine.state(), EngineState::Consistent);
        let started = Arc::new(std::sync::Barrier::new(2));
        let setter = {
            let engine = Arc::clone(&engine);
            let started = Arc::clone(&started);
            std::thread::spawn(move || {
                started.wait();
                engine.set_grid_spacing(2.0)
            })
        };
        started.wait();
        std::thread::sleep(std::time::Duration::from_millis(50));
        let resumed = engine.admit_pass();
        assert_eq!(resumed, EngineState::Consistent);
        assert_eq!(engine.state(), EngineState::Recomputing);
        std::thread::sleep(std::time::Duration::from_millis(50));
        engine.state.store(resumed as u8, Ordering::Release);
        drop(guard);

        assert!(matches!(
            setter.join().expect("setter"),
            Err(ForecastError::RecomputeInProgress)
        ));
        assert_eq!(engine.pending_config().expect("idle").grid_spacing_km, 1.0);
        assert!(engine.pending_changes().expect("idle").is_empty());
    }

    #[test]
    fn test_clean_pass_restores_state() {
        let engine = ForecastEngine::new(dataset(), ForecastConfig::default()).expect("engine");
        engine.recompute(&Cx::new()).expect("first");
        engine.recompute(&Cx::new()).expect("clean");
        assert_eq!(engine.state(), EngineState::Consistent);
        assert_eq!(engine.passes_admitted.load(Ordering::Acquire), 2);
    }

    #[test]
    fn test_last_event_on_path_source_before_first_pass_is_not_ready() {
        let engine = ForecastEngine::new(
            DatasetSource::Path("unused.json".into()),
            ForecastConfig::default(),
        )
        .expect("engine");
        assert!(matches!(
            engine.set_section_last_event(0, Some(0)),
            Err(ForecastError::NotReady)
        ));
    }
}
