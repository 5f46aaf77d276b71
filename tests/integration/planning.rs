//! Stage selection, folding, skips and precondition enforcement.

use crate::common::{
    catalog, request, snapshot, Fixture, RecordingTools, ScriptedEngine, ONE_GROUPING, PROJECT,
    TWO_GROUPINGS,
};
use eload_ingest::catalog::{AssemblyEntry, MemoryCatalog, SupportedAssembly};
use eload_ingest::layout::ProjectDir;
use eload_ingest::orchestrator::StageOutcome;
use eload_ingest::preconditions::{CheckKind, PreconditionError};
use eload_ingest::stages::StageError;
use eload_ingest::{IngestionError, Stage, StageRecord, StageState};
use serde_json::json;

#[tokio::test]
async fn test_annotation_with_variant_load_launches_once() {
    let fx = Fixture::new();
    let catalog = catalog();
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::default();

    let report = fx
        .ingest(
            &catalog,
            &engine,
            &tools,
            &request(&[Stage::VariantLoad, Stage::Annotation], false),
        )
        .await
        .unwrap();

    assert_eq!(
        report.plan,
        vec![Stage::MetadataLoad, Stage::Accession, Stage::VariantLoad]
    );
    assert_eq!(engine.launches_of("variant_load").len(), 1);
    let params: serde_json::Value = serde_json::from_slice(
        &std::fs::read(&engine.launches_of("variant_load")[0].params_file).unwrap(),
    )
    .unwrap();
    assert_eq!(params["annotation_only"], json!(false));
    assert_eq!(params["load_job_props"]["input.study.name"], json!("Chicken variation"));

    let annotation = fx.record(Stage::Annotation);
    assert_eq!(annotation.state, StageState::Complete);
    assert_eq!(annotation.outputs.get("folded_into"), Some(&json!("variant_load")));
    assert!(report.outcomes.contains(&(Stage::Annotation, StageOutcome::Folded)));
    assert_eq!(catalog.loaded_assembly(10).as_deref(), Some("GCA_1"));

    // A later annotation request finds nothing to do.
    let again = fx
        .ingest(&catalog, &engine, &tools, &request(&[Stage::Annotation], false))
        .await
        .unwrap();
    assert_eq!(
        again.outcomes,
        vec![(Stage::Annotation, StageOutcome::AlreadyComplete)]
    );
    assert_eq!(engine.launches_of("variant_load").len(), 1);
}

#[tokio::test]
async fn test_folding_abandons_resumable_annotation_work_dir() {
    let fx = Fixture::new();
    let layout = fx.layout();
    layout.prepare().unwrap();
    let previous = layout.new_work_dir(Stage::Annotation);
    std::fs::create_dir_all(&previous).unwrap();
    let mut resumable = StageRecord::new();
    resumable
        .start(Some(previous.clone()), "2026-01-01T00:00:00Z")
        .unwrap();
    resumable.suspend("2026-01-01T00:05:00Z").unwrap();
    let mut store = fx.store();
    store.put_stage_record(Stage::Annotation, &resumable).unwrap();
    store.flush().unwrap();

    let catalog = catalog();
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::default();
    let report = fx
        .ingest(
            &catalog,
            &engine,
            &tools,
            &request(&[Stage::VariantLoad, Stage::Annotation], true),
        )
        .await
        .unwrap();

    assert!(report.reconciled.orphans.is_empty());
    assert!(report.outcomes.contains(&(Stage::Annotation, StageOutcome::Folded)));
    assert!(engine.launches().iter().all(|l| l.work_dir != previous));
    let annotation = fx.record(Stage::Annotation);
    assert_eq!(annotation.state, StageState::Complete);
    assert_eq!(annotation.resumption_token(), None);
    assert_eq!(annotation.outputs.get("folded_into"), Some(&json!("variant_load")));
    assert!(previous.is_dir(), "abandoned work directory is left on disk");

    let again = fx
        .ingest(&catalog, &engine, &tools, &request(&[Stage::Annotation], false))
        .await
        .unwrap();
    assert_eq!(again.reconciled.orphans, vec![previous]);
}

#[tokio::test]
async fn test_annotation_alone_runs_in_annotation_only_mode() {
    let fx = Fixture::new();
    let catalog = catalog();
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::default();

    fx.ingest(
        &catalog,
        &engine,
        &tools,
        &request(&[Stage::Accession, Stage::Annotation], false),
    )
    .await
    .unwrap();

    let launches = engine.launches_of("variant_load");
    assert_eq!(launches.len(), 1);
    let params: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&launches[0].params_file).unwrap()).unwrap();
    assert_eq!(params["annotation_only"], json!(true));
    assert_eq!(fx.record(Stage::VariantLoad).state, StageState::Pending);
    assert_eq!(fx.record(Stage::Annotation).state, StageState::Complete);
}

#[tokio::test]
async fn test_cross_taxonomy_remap_is_skipped_without_engine_call() {
    let fx = Fixture::new();
    let mut contents = snapshot(ONE_GROUPING);
    contents.assemblies.push(AssemblyEntry {
        accession: "GCA_9".into(),
        taxonomy_id: 9606,
        ..AssemblyEntry::default()
    });
    contents.supported_assemblies.push(SupportedAssembly {
        taxonomy_id: 9031,
        assembly_accession: "GCA_9".into(),
        current: true,
    });
    let catalog = MemoryCatalog::new(contents);
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::default();

    let report = fx
        .ingest(
            &catalog,
            &engine,
            &tools,
            &request(&[Stage::RemapAndCluster], false),
        )
        .await
        .unwrap();

    assert_eq!(report.plan, vec![Stage::RemapAndCluster]);
    assert!(engine.launches().is_empty());
    assert_eq!(fx.record(Stage::Accession).state, StageState::Pending);
    let record = fx.record(Stage::RemapAndCluster);
    let StageState::Skipped { reason } = &record.state else {
        panic!("expected a skip, got {:?}", record.state);
    };
    assert!(reason.contains("different taxonomy"));
    assert_eq!(record.outputs.get("target_assembly"), Some(&json!("GCA_9")));
    assert!(matches!(
        report.outcomes.last(),
        Some((Stage::RemapAndCluster, StageOutcome::Skipped { .. }))
    ));
}

#[tokio::test]
async fn test_same_taxonomy_remap_requires_accession() {
    let fx = Fixture::new();
    let mut contents = snapshot(ONE_GROUPING);
    contents.supported_assemblies.push(SupportedAssembly {
        taxonomy_id: 9031,
        assembly_accession: "GCA_1".into(),
        current: true,
    });
    let catalog = MemoryCatalog::new(contents);
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::default();

    let err = fx
        .ingest(
            &catalog,
            &engine,
            &tools,
            &request(&[Stage::RemapAndCluster], false),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IngestionError::Stage(StageError::MissingPrerequisite {
            stage: Stage::RemapAndCluster,
            requires: Stage::Accession,
        })
    ));
    assert!(engine.launches().is_empty());
    assert_eq!(fx.record(Stage::RemapAndCluster).state, StageState::Pending);
    assert_eq!(fx.record(Stage::Accession).state, StageState::Pending);
}

#[tokio::test]
async fn test_database_bindings_resolved_once_per_assembly() {
    let fx = Fixture::with_groupings(TWO_GROUPINGS);
    let catalog = MemoryCatalog::new(snapshot(TWO_GROUPINGS));
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::default();
    let stages = [Stage::MetadataLoad];

    fx.ingest(&catalog, &engine, &tools, &request(&stages, false))
        .await
        .unwrap();
    fx.ingest(&catalog, &engine, &tools, &request(&stages, false))
        .await
        .unwrap();

    assert_eq!(catalog.call_count("resolve_database_name"), 2);
    assert_eq!(catalog.call_count("provision_variant_database"), 2);
    let store = fx.store();
    assert_eq!(
        store.ingestion(&["database", "GCA_1", "db_name"]),
        Some(&json!("eva_gg_gca_1"))
    );
    assert_eq!(
        store.ingestion(&["database", "GCA_2", "db_name"]),
        Some(&json!("eva_gg_gca_2"))
    );
    assert!(catalog.snapshot().provisioned_databases.contains("eva_gg_gca_2"));
}

#[tokio::test]
async fn test_undeclared_valid_file_aborts_before_any_stage() {
    let fx = Fixture::new();
    let valid = fx.layout().dir(ProjectDir::Valid);
    std::fs::create_dir_all(&valid).unwrap();
    std::fs::write(valid.join("stray.vcf.gz"), b"vcf").unwrap();
    let catalog = catalog();
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::default();

    let err = fx
        .ingest(&catalog, &engine, &tools, &request(&[], false))
        .await
        .unwrap_err();

    let IngestionError::Precondition(PreconditionError::Violations(violations)) = &err else {
        panic!("expected precondition violations, got {err}");
    };
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].check, CheckKind::InputDrift);
    assert!(violations[0].reason.contains("stray.vcf.gz"));

    assert_eq!(tools.count(), 0);
    assert!(engine.launches().is_empty());
    assert_eq!(catalog.call_count("resolve_database_name"), 0);
    assert!(fx.store().stage_records().unwrap().is_empty());
    assert!(fx.store().ingestion(&["ingestion_date"]).is_none());
}

#[tokio::test]
async fn test_missing_aggregation_aborts_before_layout() {
    let fx = Fixture::new();
    let mut store = fx.store();
    store.remove(&["validation"]);
    store.flush().unwrap();
    let catalog = catalog();
    let tools = RecordingTools::default();
    let engine = ScriptedEngine::default();

    let err = fx
        .ingest(&catalog, &engine, &tools, &request(&[Stage::MetadataLoad], false))
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        IngestionError::Precondition(PreconditionError::Violations(v))
            if v.iter().all(|v| v.check == CheckKind::Aggregation)
    ));
    assert!(!fx.config.projects_dir.join(PROJECT).exists());
    assert_eq!(tools.count(), 0);
}
