//! Engine failures and resumption across process restarts.

use crate::common::{catalog, request, Fixture, RecordingTools, ScriptedEngine};
use eload_ingest::orchestrator::StageOutcome;
use eload_ingest::runner::{ProcessExit, RunnerError};
use eload_ingest::{IngestionError, Stage, StageState};

fn failed_work_dir(err: &IngestionError) -> std::path::PathBuf {
    match err {
        IngestionError::Runner(RunnerError::EngineFailed { work_dir, .. }) => work_dir.clone(),
        other => panic!("expected an engine failure, got {other}"),
    }
}

#[tokio::test]
async fn test_failed_accession_resumes_from_preserved_work_dir() {
    let fx = Fixture::new();
    let catalog = catalog();
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::with_exits([ProcessExit::Failure { code: Some(1) }]);
    let stages = [Stage::MetadataLoad, Stage::Accession];

    let err = fx
        .ingest(&catalog, &engine, &tools, &request(&stages, false))
        .await
        .unwrap_err();
    let work_dir = failed_work_dir(&err);

    assert!(work_dir.is_dir(), "failed run must keep its work directory");
    assert!(work_dir.starts_with(fx.layout().root()));
    assert_eq!(fx.record(Stage::MetadataLoad).state, StageState::Complete);
    assert_eq!(
        fx.record(Stage::Accession).state,
        StageState::Resumable {
            resumption_token: work_dir.clone()
        }
    );
    assert_eq!(catalog.call_count("insert_browsable_files"), 0);

    let report = fx
        .ingest(&catalog, &engine, &tools, &request(&stages, true))
        .await
        .unwrap();

    let launches = engine.launches_of("accession");
    assert_eq!(launches.len(), 2);
    assert_eq!(launches[1].work_dir, work_dir);
    assert!(launches[1].resume);
    assert!(!launches[0].resume);

    let accession = fx.record(Stage::Accession);
    assert_eq!(accession.state, StageState::Complete);
    assert_eq!(accession.resumption_token(), None);
    assert!(!accession.pending_finalize);
    assert_eq!(accession.attempt, 2);
    assert!(!work_dir.exists(), "work directory is removed on success");

    assert!(report.outcomes.contains(&(Stage::MetadataLoad, StageOutcome::AlreadyComplete)));
    assert!(report
        .outcomes
        .contains(&(Stage::Accession, StageOutcome::Completed { resumed: true })));
    assert_eq!(tools.count(), 1, "metadata load ran once");
    assert_eq!(catalog.snapshot().browsable_files.len(), 1);
}

#[tokio::test]
async fn test_missing_work_dir_starts_fresh() {
    let fx = Fixture::new();
    let catalog = catalog();
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::with_exits([ProcessExit::Failure { code: Some(2) }]);
    let stages = [Stage::Accession];

    let err = fx
        .ingest(&catalog, &engine, &tools, &request(&stages, false))
        .await
        .unwrap_err();
    let stale = failed_work_dir(&err);
    std::fs::remove_dir_all(&stale).unwrap();

    let report = fx
        .ingest(&catalog, &engine, &tools, &request(&stages, true))
        .await
        .unwrap();

    let launches = engine.launches_of("accession");
    assert_eq!(launches.len(), 2);
    assert_ne!(launches[1].work_dir, stale);
    assert!(!launches[1].resume);
    assert!(report
        .outcomes
        .contains(&(Stage::Accession, StageOutcome::Completed { resumed: false })));
    assert_eq!(fx.record(Stage::Accession).state, StageState::Complete);
}

#[tokio::test]
async fn test_rerun_without_resume_abandons_previous_work_dir() {
    let fx = Fixture::new();
    let catalog = catalog();
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::with_exits([ProcessExit::Failure { code: None }]);
    let stages = [Stage::Accession];

    let err = fx
        .ingest(&catalog, &engine, &tools, &request(&stages, false))
        .await
        .unwrap_err();
    let previous = failed_work_dir(&err);

    fx.ingest(&catalog, &engine, &tools, &request(&stages, false))
        .await
        .unwrap();

    let launches = engine.launches_of("accession");
    assert_ne!(launches[1].work_dir, previous);
    assert!(!launches[1].resume);
    assert!(previous.is_dir(), "abandoned work directory is left on disk");
}

#[tokio::test]
async fn test_complete_stages_are_not_rerun() {
    let fx = Fixture::new();
    let catalog = catalog();
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::default();
    let stages = [Stage::MetadataLoad, Stage::Accession];

    fx.ingest(&catalog, &engine, &tools, &request(&stages, false))
        .await
        .unwrap();
    let metadata_load = fx.record(Stage::MetadataLoad);
    let accession = fx.record(Stage::Accession);
    let before = std::fs::read(&fx.checkpoint).unwrap();

    let report = fx
        .ingest(&catalog, &engine, &tools, &request(&stages, true))
        .await
        .unwrap();

    assert_eq!(
        std::fs::read(&fx.checkpoint).unwrap(),
        before,
        "a run with nothing to do leaves the checkpoint unchanged"
    );
    assert_eq!(engine.launches().len(), 1);
    assert_eq!(tools.count(), 1);
    assert_eq!(fx.record(Stage::MetadataLoad), metadata_load);
    assert_eq!(fx.record(Stage::Accession), accession);
    assert_eq!(
        report.outcomes,
        vec![
            (Stage::MetadataLoad, StageOutcome::AlreadyComplete),
            (Stage::Accession, StageOutcome::AlreadyComplete),
        ]
    );
}

#[tokio::test]
async fn test_new_work_refreshes_completion_time() {
    let fx = Fixture::new();
    let catalog = catalog();
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::default();

    fx.ingest(&catalog, &engine, &tools, &request(&[Stage::MetadataLoad], false))
        .await
        .unwrap();
    let mut store = fx.store();
    assert_eq!(
        store.ingestion(&["status"]),
        Some(&serde_json::json!("ingested"))
    );
    store.set_ingestion(&["completed_at"], "2000-01-01T00:00:00Z").unwrap();
    store.flush().unwrap();

    fx.ingest(&catalog, &engine, &tools, &request(&[Stage::Accession], false))
        .await
        .unwrap();

    let completed_at = fx.store().ingestion(&["completed_at"]).cloned();
    assert_ne!(completed_at, Some(serde_json::json!("2000-01-01T00:00:00Z")));
}
