//! Crash recovery, bookkeeping retries and the status/reset surface.

use crate::common::{
    catalog, request, snapshot, Fixture, RecordingTools, ScriptedEngine, ONE_GROUPING,
};
use eload_ingest::catalog::MemoryCatalog;
use eload_ingest::orchestrator::{reset_stage, status_report, StageOutcome};
use eload_ingest::runner::ProcessExit;
use eload_ingest::stages::StageError;
use eload_ingest::{IngestionError, Stage, StageRecord, StageState, StageStatus};

fn complete_record() -> StageRecord {
    let mut record = StageRecord::new();
    record.start(None, "2026-01-01T00:00:00Z").unwrap();
    record.complete("2026-01-01T00:10:00Z").unwrap();
    record
}

#[tokio::test]
async fn test_interrupted_engine_stage_is_resumed_after_crash() {
    let fx = Fixture::new();
    let layout = fx.layout();
    layout.prepare().unwrap();
    let interrupted = layout.root().join("nextflow_accession_interrupted");
    let stray = layout.root().join("nextflow_variant_load_stray");
    std::fs::create_dir_all(&interrupted).unwrap();
    std::fs::create_dir_all(&stray).unwrap();

    let mut running = StageRecord::new();
    running
        .start(Some(interrupted.clone()), "2026-01-01T00:00:00Z")
        .unwrap();
    let mut store = fx.store();
    store
        .put_stage_record(Stage::MetadataLoad, &complete_record())
        .unwrap();
    store.put_stage_record(Stage::Accession, &running).unwrap();
    store.flush().unwrap();

    let catalog = catalog();
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::default();
    let report = fx
        .ingest(&catalog, &engine, &tools, &request(&[Stage::Accession], true))
        .await
        .unwrap();

    assert_eq!(
        report.reconciled.recovered,
        vec![(Stage::Accession, StageStatus::Resumable)]
    );
    assert_eq!(report.reconciled.orphans, vec![stray.clone()]);
    assert_eq!(report.plan, vec![Stage::Accession]);

    let launches = engine.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].work_dir, interrupted);
    assert!(launches[0].resume);
    assert_eq!(tools.count(), 0);
    assert_eq!(fx.record(Stage::Accession).state, StageState::Complete);
    assert!(stray.is_dir(), "orphaned directories are never deleted");
}

#[tokio::test]
async fn test_interrupted_in_process_stage_reruns_from_scratch() {
    let fx = Fixture::new();
    let mut running = StageRecord::new();
    running.start(None, "2026-01-01T00:00:00Z").unwrap();
    let mut store = fx.store();
    store.put_stage_record(Stage::MetadataLoad, &running).unwrap();
    store.flush().unwrap();

    let catalog = catalog();
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::default();
    let report = fx
        .ingest(&catalog, &engine, &tools, &request(&[Stage::MetadataLoad], false))
        .await
        .unwrap();

    assert_eq!(
        report.reconciled.recovered,
        vec![(Stage::MetadataLoad, StageStatus::Pending)]
    );
    assert_eq!(tools.count(), 1);
    let record = fx.record(Stage::MetadataLoad);
    assert_eq!(record.state, StageState::Complete);
    assert_eq!(record.attempt, 2);
}

#[tokio::test]
async fn test_failed_bookkeeping_is_retried_without_relaunch() {
    let fx = Fixture::new();
    // No VCF rows for the project, so publishing browsable files fails.
    let mut contents = snapshot(ONE_GROUPING);
    contents.analyses[0].files[0].file_type = "tabix".into();
    let broken = MemoryCatalog::new(contents);
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::default();
    let stages = [Stage::MetadataLoad, Stage::Accession];

    let err = fx
        .ingest(&broken, &engine, &tools, &request(&stages, false))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestionError::Stage(StageError::Inconsistency(_))));
    let record = fx.record(Stage::Accession);
    assert_eq!(record.state, StageState::Complete);
    assert!(record.pending_finalize);
    assert_eq!(engine.launches().len(), 1);

    let fixed = catalog();
    let report = fx
        .ingest(&fixed, &engine, &tools, &request(&stages, false))
        .await
        .unwrap();

    assert_eq!(engine.launches().len(), 1, "the engine run is not repeated");
    assert!(report
        .outcomes
        .contains(&(Stage::Accession, StageOutcome::Finalized)));
    let record = fx.record(Stage::Accession);
    assert!(!record.pending_finalize);
    assert_eq!(record.outputs.get("browsable_files"), Some(&serde_json::json!(1)));
    assert_eq!(fixed.snapshot().study_browser_refreshes, 1);
}

#[tokio::test]
async fn test_missing_instance_id_leaves_record_untouched() {
    let fx = Fixture::new();
    let catalog = catalog();
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::default();
    let mut without_instance = request(&[Stage::Accession], false);
    without_instance.options.instance_id = None;

    let err = fx
        .ingest(&catalog, &engine, &tools, &without_instance)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IngestionError::Stage(StageError::MissingOption {
            option: "instance-id",
            ..
        })
    ));
    assert!(engine.launches().is_empty());
    assert_eq!(fx.record(Stage::MetadataLoad).state, StageState::Complete);
    assert_eq!(fx.record(Stage::Accession).state, StageState::Pending);
}

#[tokio::test]
async fn test_status_and_reset_after_failure() {
    let fx = Fixture::new();
    let catalog = catalog();
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::with_exits([ProcessExit::Failure { code: Some(1) }]);

    fx.ingest(&catalog, &engine, &tools, &request(&[Stage::Accession], false))
        .await
        .unwrap_err();
    let work_dir = engine.launches()[0].work_dir.clone();

    let mut store = fx.store();
    let status = status_report(&store).unwrap();
    assert_eq!(status.stages.len(), Stage::ALL.len());
    assert_eq!(status.stages[&Stage::Accession].status(), StageStatus::Resumable);
    assert_eq!(status.stages[&Stage::VariantLoad].status(), StageStatus::Pending);
    assert_eq!(status.status, None);
    let text = status.to_string();
    assert!(text.contains("accession"));
    assert!(text.contains(&work_dir.display().to_string()));

    let kept = reset_stage(&mut store, Stage::Accession).unwrap();
    assert_eq!(kept, Some(work_dir.clone()));
    assert!(work_dir.is_dir());
    assert_eq!(fx.record(Stage::Accession).state, StageState::Pending);
}
