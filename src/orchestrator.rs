//! Control flow for one ingestion run.
//!
//! ```text
//! load unit ─▶ gate (document) ─▶ layout + reconcile ─▶ gate (inputs)
//!           ─▶ bindings ─▶ plan ─▶ manifest ─▶ stages in order ─▶ ingested
//! ```
//!
//! Stages run one at a time. The first failure stops the run with the
//! checkpoint holding whatever was last committed; running again (with
//! `--resume` for engine stages) is the recovery path.

use crate::catalog::MetadataCatalog;
use crate::checkpoint::CheckpointStore;
use crate::config::IngestConfig;
use crate::error::IngestionError;
use crate::layout::ProjectLayout;
use crate::models::{Stage, StageRecord, StageState, StageStatus, UnitOfWork};
use crate::preconditions::{
    fill_vep_versions, BindingResolver, PreconditionError, PreconditionGate,
};
use crate::runner::{
    self, EngineLauncher, EngineSettings, ExternalWorkflowRunner, ReconcileReport, RunOutcome,
    ToolLauncher,
};
use crate::stages::{
    write_ingest_manifest, HandlerRegistry, RunOptions, StageContext, StageHandler, StagePlan,
};
use crate::workflow;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Unit of work id for a checkpoint: the name of the directory holding it.
#[must_use]
pub fn unit_id(checkpoint: &Path) -> String {
    checkpoint
        .parent()
        .and_then(Path::file_name)
        .or_else(|| checkpoint.file_stem())
        .map_or_else(|| "unknown".to_string(), |n| n.to_string_lossy().into_owned())
}

/// What to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestRequest {
    /// Requested stages; empty means all.
    pub stages: Vec<Stage>,
    /// Command-line options.
    pub options: RunOptions,
}

/// What happened to one planned stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Already complete, nothing ran.
    AlreadyComplete,
    /// The stage's work ran and its bookkeeping finished.
    Completed {
        /// An engine work directory was reused.
        resumed: bool,
    },
    /// Only the bookkeeping left over from an earlier run ran.
    Finalized,
    /// Not applicable to this unit of work.
    Skipped {
        /// Why.
        reason: String,
    },
    /// Covered by the `variant_load` invocation.
    Folded,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// Unit of work id.
    pub unit_id: String,
    /// Stages in the order they were dispatched.
    pub plan: Vec<Stage>,
    /// Outcome per dispatched stage, folded annotation included.
    pub outcomes: Vec<(Stage, StageOutcome)>,
    /// Crash recovery performed at start.
    pub reconciled: ReconcileReport,
    /// Ingest manifest written this run.
    pub manifest: Option<PathBuf>,
}

/// Per-run values threaded into every stage.
struct StageRun<'r> {
    unit: &'r UnitOfWork,
    layout: &'r ProjectLayout,
    options: &'r RunOptions,
    manifest: Option<&'r Path>,
}

/// Runs ingestion for one checkpoint.
pub struct Orchestrator<'a> {
    catalog: &'a dyn MetadataCatalog,
    engine: &'a dyn EngineLauncher,
    tools: &'a dyn ToolLauncher,
    config: &'a IngestConfig,
    settings: EngineSettings,
    handlers: HandlerRegistry,
}

impl<'a> Orchestrator<'a> {
    /// Orchestrator with the standard stage handlers.
    #[must_use]
    pub fn new(
        catalog: &'a dyn MetadataCatalog,
        engine: &'a dyn EngineLauncher,
        tools: &'a dyn ToolLauncher,
        config: &'a IngestConfig,
    ) -> Self {
        Self {
            catalog,
            engine,
            tools,
            config,
            settings: config.engine_settings(),
            handlers: HandlerRegistry::standard(),
        }
    }

    /// Replace the stage handlers.
    #[must_use]
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Run the requested stages for the unit of work in `store`.
    ///
    /// # Errors
    ///
    /// Returns the first error met. Nothing runs if a precondition fails.
    pub async fn ingest(
        &self,
        store: &mut CheckpointStore,
        request: &IngestRequest,
    ) -> Result<IngestReport, IngestionError> {
        let unit = UnitOfWork::from_document(unit_id(store.path()), store.document())?;
        info!(unit = %unit.id, stages = ?request.stages, "starting ingestion");

        let gate = PreconditionGate::new(&unit);
        let violations = gate.document_violations(store.document());
        if !violations.is_empty() {
            for violation in &violations {
                error!(check = %violation.check, "{}", violation.reason);
            }
            return Err(PreconditionError::Violations(violations).into());
        }
        let project = unit.project_accession.clone().ok_or_else(|| {
            PreconditionError::MetadataInconsistency("unit of work has no project accession".into())
        })?;

        let layout = ProjectLayout::new(&self.config.projects_dir, &project);
        layout.prepare()?;
        let reconciled = runner::reconcile(store, &layout)?;
        layout.stage_inputs(&unit)?;
        gate.evaluate(store.document(), &layout.valid_vcfs()?)?;

        if store.ingestion(&["ingestion_date"]).is_none() {
            store.set_ingestion(&["ingestion_date"], now())?;
        }
        store.set_ingestion(&["project_dir"], layout.root())?;
        gate.record_aggregation(store)?;
        store.flush()?;

        BindingResolver::new(self.catalog)
            .resolve_all(store, &unit)
            .await?;

        let records = store.stage_records()?;
        let plan = workflow::plan(&request.stages, |stage| {
            records
                .get(&stage)
                .map_or(StageStatus::Pending, StageRecord::status)
        })?;
        info!(stages = ?plan.stage_names(), "execution plan");

        let manifest = if plan.stages.iter().any(|p| p.stage.needs_ingest_manifest()) {
            if plan
                .stages
                .iter()
                .any(|p| matches!(p.stage, Stage::VariantLoad | Stage::Annotation))
            {
                fill_vep_versions(
                    self.catalog,
                    store,
                    &unit,
                    request.options.vep_cache_assembly_name.as_deref(),
                )
                .await?;
            }
            Some(write_ingest_manifest(store, &unit)?)
        } else {
            None
        };

        let run = StageRun {
            unit: &unit,
            layout: &layout,
            options: &request.options,
            manifest: manifest.as_deref(),
        };
        let mut outcomes = Vec::new();
        for planned in &plan.stages {
            let outcome = self.run_stage(store, &run, planned.stage).await?;
            outcomes.push((planned.stage, outcome));
            if planned.folds_annotation && Self::mark_annotation_folded(store)? {
                outcomes.push((Stage::Annotation, StageOutcome::Folded));
            }
        }

        let did_work = outcomes
            .iter()
            .any(|(_, outcome)| *outcome != StageOutcome::AlreadyComplete);
        if did_work || store.ingestion(&["status"]) != Some(&json!("ingested")) {
            store.set_ingestion(&["status"], "ingested")?;
            store.set_ingestion(&["completed_at"], now())?;
            store.flush()?;
            info!(unit = %unit.id, "ingestion complete");
        } else {
            info!(unit = %unit.id, "nothing to do, every requested stage was already complete");
        }

        Ok(IngestReport {
            unit_id: unit.id.clone(),
            plan: plan.stage_names(),
            outcomes,
            reconciled,
            manifest,
        })
    }

    fn context<'s>(&'s self, store: &'s CheckpointStore, run: &StageRun<'s>) -> StageContext<'s> {
        StageContext {
            unit: run.unit,
            store,
            layout: run.layout,
            catalog: self.catalog,
            tools: self.tools,
            config: self.config,
            options: run.options,
            manifest: run.manifest,
        }
    }

    async fn run_stage(
        &self,
        store: &mut CheckpointStore,
        run: &StageRun<'_>,
        stage: Stage,
    ) -> Result<StageOutcome, IngestionError> {
        let handler = self
            .handlers
            .get(stage)
            .ok_or(IngestionError::NoHandler(stage))?;

        let mut record = store.stage_record(stage)?;
        if record.is_complete() {
            if !record.pending_finalize {
                info!(%stage, "stage already complete, skipping");
                return Ok(StageOutcome::AlreadyComplete);
            }
            info!(%stage, "stage ran but its bookkeeping did not finish, retrying bookkeeping");
            self.finalize(store, run, handler).await?;
            return Ok(StageOutcome::Finalized);
        }

        let plan = handler.prepare(&self.context(store, run)).await?;
        let outcome = match plan {
            StagePlan::Skip { reason, outputs } => {
                record.outputs.extend(outputs);
                record.skip(reason.clone(), now());
                store.commit_stage(stage, &record)?;
                info!(%stage, %reason, "stage skipped");
                return Ok(StageOutcome::Skipped { reason });
            }
            StagePlan::InProcess { outputs } => {
                record.outputs.extend(outputs);
                record.start(None, now())?;
                store.commit_stage(stage, &record)?;
                info!(%stage, "stage started");

                match handler.execute(&self.context(store, run)).await {
                    Ok(outputs) => {
                        record.outputs.extend(outputs);
                        record.complete(now())?;
                        record.pending_finalize = true;
                        store.commit_stage(stage, &record)?;
                        StageOutcome::Completed { resumed: false }
                    }
                    Err(e) => {
                        record.fail(e.to_string(), now());
                        store.commit_stage(stage, &record)?;
                        error!(%stage, error = %e, "stage failed");
                        return Err(e.into());
                    }
                }
            }
            StagePlan::Engine { job, outputs } => {
                record.outputs.extend(outputs);
                store.put_stage_record(stage, &record)?;
                let runner = ExternalWorkflowRunner::new(self.engine, &self.settings);
                match runner
                    .run(store, run.layout, stage, &job, run.options.resume)
                    .await?
                {
                    RunOutcome::AlreadyComplete => return Ok(StageOutcome::AlreadyComplete),
                    RunOutcome::Completed { resumed, .. } => StageOutcome::Completed { resumed },
                }
            }
        };

        self.finalize(store, run, handler).await?;
        Ok(outcome)
    }

    async fn finalize(
        &self,
        store: &mut CheckpointStore,
        run: &StageRun<'_>,
        handler: &dyn StageHandler,
    ) -> Result<(), IngestionError> {
        let stage = handler.stage();
        let outputs = match handler.finalize(&self.context(store, run)).await {
            Ok(outputs) => outputs,
            Err(e) => {
                error!(
                    %stage,
                    error = %e,
                    "bookkeeping failed, it will be retried on the next run"
                );
                return Err(e.into());
            }
        };

        let mut record = store.stage_record(stage)?;
        record.outputs.extend(outputs);
        record.pending_finalize = false;
        record.updated_at = Some(now());
        store.commit_stage(stage, &record)?;
        info!(%stage, "stage complete");
        Ok(())
    }

    /// Record `annotation` as done by the `variant_load` invocation.
    fn mark_annotation_folded(store: &mut CheckpointStore) -> Result<bool, IngestionError> {
        let mut record = store.stage_record(Stage::Annotation)?;
        if record.is_complete() {
            return Ok(false);
        }
        if let Some(dir) = record.resumption_token() {
            warn!(
                stage = %Stage::Annotation,
                work_dir = %dir.display(),
                "annotation ran inside variant_load, previous work directory abandoned"
            );
        }
        let at = now();
        record.start(None, at.clone())?;
        record.complete(at)?;
        record
            .outputs
            .insert("folded_into".into(), json!(Stage::VariantLoad));
        store.commit_stage(Stage::Annotation, &record)?;
        info!("annotation ran as part of variant_load");
        Ok(true)
    }
}

/// Stage records and run status of one checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    /// Checkpoint file.
    pub checkpoint: PathBuf,
    /// `ingested` once a run finished.
    pub status: Option<String>,
    /// Project directory used by the last run.
    pub project_dir: Option<PathBuf>,
    /// Every stage, pending when never recorded.
    pub stages: BTreeMap<Stage, StageRecord>,
}

/// Read the status of every stage.
///
/// # Errors
///
/// Returns a checkpoint error if a record is malformed.
pub fn status_report(store: &CheckpointStore) -> Result<StatusReport, IngestionError> {
    let stages = Stage::ALL
        .iter()
        .map(|&stage| store.stage_record(stage).map(|record| (stage, record)))
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    Ok(StatusReport {
        checkpoint: store.path().to_path_buf(),
        status: store.get_as(&["ingestion", "status"])?,
        project_dir: store.get_as(&["ingestion", "project_dir"])?,
        stages,
    })
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Checkpoint: {}", self.checkpoint.display())?;
        writeln!(f, "Status:     {}", self.status.as_deref().unwrap_or("not ingested"))?;
        if let Some(dir) = &self.project_dir {
            writeln!(f, "Project:    {}", dir.display())?;
        }
        writeln!(f)?;
        for (stage, record) in &self.stages {
            write!(f, "  {:<18} {:<10}", stage.as_str(), record.status().to_string())?;
            if let Some(token) = record.resumption_token() {
                write!(f, " {}", token.display())?;
            }
            match &record.state {
                StageState::Skipped { reason } | StageState::Failed { reason } => {
                    write!(f, " ({reason})")?;
                }
                _ => {}
            }
            if record.pending_finalize {
                write!(f, " [bookkeeping pending]")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Return a stage to `Pending`.
///
/// The recorded work directory, if any, is returned and left on disk.
///
/// # Errors
///
/// Returns a checkpoint error if the record cannot be read or written.
pub fn reset_stage(
    store: &mut CheckpointStore,
    stage: Stage,
) -> Result<Option<PathBuf>, IngestionError> {
    let mut record = store.stage_record(stage)?;
    let work_dir = record.resumption_token().map(Path::to_path_buf);
    record.reset(now());
    store.commit_stage(stage, &record)?;
    if let Some(dir) = &work_dir {
        warn!(%stage, work_dir = %dir.display(), "stage reset, work directory left on disk");
    } else {
        info!(%stage, "stage reset");
    }
    Ok(work_dir)
}
