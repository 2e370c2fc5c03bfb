use std::io::Write;
use std::sync::Arc;

use ferf_core::{
    DatasetDocument, DatasetSource, EngineState, ForecastEngine, ForecastError,
    GridBackgroundProvider, GridCell, RecomputeEvent, RecomputeObserver, RecomputeRingBuffer,
    SnapshotPart, Stage,
};
use ferf_types::{
    Aperiodicity, BackgroundRuptureType, BptAveraging, ChangeSet, Cx, DiscretizedMfd,
    ForecastConfig, Location, ProbabilityModelKind, RuptureDataset, RuptureRecord, SectionRecord,
};

fn section(id: u32, lat: f64) -> SectionRecord {
    SectionRecord {
        id,
        name: format!("S{id}"),
        trace: vec![Location::new(lat, -120.0), Location::new(lat + 0.1, -120.0)],
        dip_deg: 60.0,
        upper_depth_km: 0.0,
        lower_depth_km: 14.0,
        min_mag: 0.0,
        last_event_epoch_millis: None,
    }
}

fn dataset() -> RuptureDataset {
    let rupture = |id: u32, section_ids: Vec<u32>, rate: f64| RuptureRecord {
        id,
        section_ids,
        magnitude: 6.9,
        rake: 90.0,
        area_m2: 2.5e8,
        rate,
        mfd: None,
    };
    let provider = GridBackgroundProvider::new(vec![GridCell {
        location: Location::new(35.0, -119.5),
        mfd: DiscretizedMfd::new(5.05, 0.1, vec![0.01, 0.005]),
        rake: 0.0,
        strike_deg: 0.0,
    }]);
    RuptureDataset::new(
        vec![section(0, 35.0), section(1, 35.2), section(2, 35.4)],
        vec![
            rupture(0, vec![0], 0.004),
            rupture(1, vec![0, 1], 0.002),
            rupture(2, vec![1, 2], 0.001),
            rupture(3, vec![2], 0.0),
        ],
    )
    .expect("valid dataset")
    .with_background(Arc::new(provider))
}

fn stage_runs(events: &[RecomputeEvent]) -> Vec<Stage> {
    events
        .iter()
        .filter_map(|e| match e {
            RecomputeEvent::StageCompleted { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Idempotence and minimal rebuilds
// ---------------------------------------------------------------------------

#[test]
fn test_recompute_without_changes_is_idempotent() {
    let engine = ForecastEngine::new(dataset(), ForecastConfig::default()).expect("engine");
    let cx = Cx::new();
    let first = engine.recompute(&cx).expect("first");
    let second = engine.recompute(&cx).expect("second");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.fingerprint(), second.fingerprint());
    assert_eq!(engine.generation().expect("ready"), 1);
    let metrics = engine.metrics();
    assert_eq!(metrics.passes_completed, 1);
    assert_eq!(metrics.passes_clean, 1);
}

#[test]
fn test_setting_the_same_value_marks_nothing() {
    let engine = ForecastEngine::new(dataset(), ForecastConfig::default()).expect("engine");
    let cx = Cx::new();
    let first = engine.recompute(&cx).expect("first");
    engine.set_duration(30.0).expect("same duration");
    engine.set_grid_spacing(1.0).expect("same spacing");
    engine
        .set_probability_model(ProbabilityModelKind::TimeIndependent)
        .expect("same model");
    assert!(engine.pending_changes().expect("idle").is_empty());
    assert!(Arc::ptr_eq(&first, &engine.recompute(&cx).expect("second")));
}

#[test]
fn test_duration_change_reuses_index_tables() {
    let ring = Arc::new(RecomputeRingBuffer::new(256));
    let engine = ForecastEngine::new(dataset(), ForecastConfig::default())
        .expect("engine")
        .with_observer(ring.clone());
    let cx = Cx::new();
    let first = engine.recompute(&cx).expect("first");
    assert_eq!(stage_runs(&ring.drain()).len(), Stage::ALL.len());

    engine.set_duration(5.0).expect("set duration");
    assert_eq!(
        engine.pending_changes().expect("idle"),
        ChangeSet::TIME_WINDOW
    );
    let before = ring.len();
    let second = engine.recompute(&cx).expect("second");

    assert!(second.shares_part(&first, SnapshotPart::Dataset));
    assert!(second.shares_part(&first, SnapshotPart::Index));
    assert!(second.shares_part(&first, SnapshotPart::Model));
    assert!(second.shares_part(&first, SnapshotPart::FlatIndex));
    assert!(!second.shares_part(&first, SnapshotPart::FaultSources));
    assert!(!second.shares_part(&first, SnapshotPart::Background));
    assert_ne!(first.fingerprint(), second.fingerprint());
    assert_eq!(second.generation(), 2);

    let events: Vec<_> = ring.drain().into_iter().skip(before).collect();
    assert_eq!(
        stage_runs(&events),
        vec![Stage::Background, Stage::SourceMaterialization]
    );
    assert!((second.source(0).expect("source").duration_years - 5.0).abs() < 1e-12);
}

#[test]
fn test_aperiodicity_change_rebuilds_model_only_when_needed() {
    let engine = ForecastEngine::new(dataset(), ForecastConfig::default()).expect("engine");
    let cx = Cx::new();
    let first = engine.recompute(&cx).expect("first");

    engine.set_aperiodicity(Aperiodicity::High).expect("set");
    let second = engine.recompute(&cx).expect("second");
    assert!(!second.shares_part(&first, SnapshotPart::Model));
    assert!(second.shares_part(&first, SnapshotPart::Index));
    assert!(second.shares_part(&first, SnapshotPart::Background));

    engine
        .set_bpt_averaging(BptAveraging::AveRateAveNormTimeSince)
        .expect("same averaging");
    engine.set_historic_open_interval(150.0).expect("set");
    let third = engine.recompute(&cx).expect("third");
    assert!(third.shares_part(&second, SnapshotPart::Model));
    assert!(!third.shares_part(&second, SnapshotPart::FaultSources));
}

#[test]
fn test_background_type_change_resizes_flat_index() {
    let engine = ForecastEngine::new(dataset(), ForecastConfig::default()).expect("engine");
    let cx = Cx::new();
    let first = engine.recompute(&cx).expect("first");
    assert_eq!(first.rupture_count(), 3 + 2);

    engine
        .set_background_rupture_type(BackgroundRuptureType::CrossHair)
        .expect("set");
    let second = engine.recompute(&cx).expect("second");
    assert!(!second.shares_part(&first, SnapshotPart::FlatIndex));
    assert!(second.shares_part(&first, SnapshotPart::FaultSources));
    assert_eq!(second.rupture_count(), 3 + 4);
}

#[test]
fn test_apply_config_reports_changed_dimensions() {
    let engine = ForecastEngine::new(dataset(), ForecastConfig::default()).expect("engine");
    engine.recompute(&Cx::new()).expect("first");
    let mut config = ForecastConfig::default();
    config.grid_spacing_km = 0.5;
    config.blend_weights.low = 0.2;
    config.blend_weights.poisson = 0.1;
    let changes = engine.apply_config(config).expect("apply");
    assert_eq!(
        changes,
        ChangeSet::GRID_SPACING | ChangeSet::PROBABILITY_MODEL
    );
    assert_eq!(engine.pending_changes().expect("idle"), changes);
}

// ---------------------------------------------------------------------------
// Failure and cancellation
// ---------------------------------------------------------------------------

struct CancelBefore {
    cx: Cx,
    after: Stage,
}

impl RecomputeObserver for CancelBefore {
    fn on_event(&self, event: &RecomputeEvent) {
        if let RecomputeEvent::StageCompleted { stage, .. } = event {
            if *stage == self.after {
                self.cx.cancel();
            }
        }
    }
}

#[test]
fn test_cancelled_pass_keeps_previous_snapshot() {
    let cx = Cx::new();
    let engine = ForecastEngine::new(dataset(), ForecastConfig::default())
        .expect("engine")
        .with_observer(Arc::new(CancelBefore {
            cx: cx.clone(),
            after: Stage::SourceMaterialization,
        }));
    let err = engine.recompute(&cx).expect_err("cancelled");
    assert!(matches!(err, ForecastError::Cancelled { stage: "flat_index" }));
    assert!(err.is_transient());
    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert!(matches!(engine.snapshot(), Err(ForecastError::NotReady)));
    assert_eq!(engine.pending_changes().expect("idle"), ChangeSet::all());
    assert_eq!(engine.metrics().passes_cancelled, 1);

    let snapshot = engine.recompute(&Cx::new()).expect("retry");
    assert_eq!(snapshot.generation(), 1);
    assert!(engine.pending_changes().expect("idle").is_empty());
}

#[test]
fn test_failed_load_keeps_previous_snapshot() {
    let dir = tempfile::tempdir().expect("temp dir");
    let good = dir.path().join("good.json");
    let doc = DatasetDocument {
        sections: vec![section(0, 35.0)],
        ruptures: vec![RuptureRecord {
            id: 7,
            section_ids: vec![0],
            magnitude: 6.6,
            rake: 0.0,
            area_m2: 1.0e8,
            rate: 0.003,
            mfd: None,
        }],
        background: None,
    };
    let mut file = std::fs::File::create(&good).expect("create");
    file.write_all(serde_json::to_string(&doc).expect("encode").as_bytes())
        .expect("write");

    let engine = ForecastEngine::new(DatasetSource::Path(good), ForecastConfig::default())
        .expect("engine");
    let cx = Cx::new();
    let first = engine.recompute(&cx).expect("first");
    assert_eq!(first.source_count(), 1);
    assert_eq!(first.rupture_id_for_source(0).expect("source"), 7);

    engine
        .set_dataset(DatasetSource::Path(dir.path().join("missing.json")))
        .expect("set");
    let err = engine.recompute(&cx).expect_err("missing file");
    assert!(matches!(err, ForecastError::DatasetLoad { .. }));
    assert_eq!(engine.state(), EngineState::Consistent);
    assert!(Arc::ptr_eq(&first, &engine.snapshot().expect("previous")));
    assert!(engine
        .pending_changes()
        .expect("idle")
        .contains(ChangeSet::DATASET));
    assert_eq!(engine.metrics().passes_failed, 1);
}

// ---------------------------------------------------------------------------
// Last-event updates
// ---------------------------------------------------------------------------

#[test]
fn test_last_event_update_rebuilds_model() {
    let mut config = ForecastConfig::default();
    config.probability_model = ProbabilityModelKind::TimeDependent;
    let start = config.time_window.start_epoch_millis();
    let engine = ForecastEngine::new(dataset(), config).expect("engine");
    let cx = Cx::new();
    let first = engine.recompute(&cx).expect("first");
    let before = first.source(0).expect("source").ruptures[0].probability;

    engine
        .set_rupture_last_event(0, start - 1_000)
        .expect("working dataset");
    assert_eq!(
        engine.pending_changes().expect("idle"),
        ChangeSet::PROBABILITY_MODEL
    );
    let second = engine.recompute(&cx).expect("second");
    let after = second.source(0).expect("source").ruptures[0].probability;
    assert!(after < before);
    assert!(second.shares_part(&first, SnapshotPart::Index));
    assert!(!second.shares_part(&first, SnapshotPart::Model));
    // The published dataset of the first snapshot is untouched.
    assert_eq!(
        first.dataset().section(0).and_then(|s| s.last_event_epoch_millis),
        None
    );
    assert!(second.dataset().has_last_event_data());
}

#[test]
fn test_last_event_update_rejects_unknown_ids() {
    let engine = ForecastEngine::new(dataset(), ForecastConfig::default()).expect("engine");
    engine.recompute(&Cx::new()).expect("first");
    assert!(engine.set_section_last_event(99, Some(0)).is_err());
    assert!(engine.set_rupture_last_event(99, 0).is_err());
    assert!(engine.pending_changes().expect("idle").is_empty());
}

#[test]
fn test_missing_last_event_data_is_reported() {
    let ring = Arc::new(RecomputeRingBuffer::new(64));
    let mut config = ForecastConfig::default();
    config.probability_model = ProbabilityModelKind::Blend;
    let engine = ForecastEngine::new(dataset(), config)
        .expect("engine")
        .with_observer(ring.clone());
    engine.recompute(&Cx::new()).expect("recompute");
    assert!(ring
        .drain()
        .iter()
        .any(|e| matches!(e, RecomputeEvent::MissingLastEventData { .. })));
}
