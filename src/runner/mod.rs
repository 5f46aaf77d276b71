//! External workflow runner.
//!
//! Each engine-backed stage owns one working directory at a time, recorded as
//! the stage's resumption token. The runner drives the stage record through
//!
//! ```text
//! Pending ──launch──▶ Running(dir) ──exit 0──▶ Complete
//!                         │
//!                         └──exit ≠ 0──▶ Resumable(dir) ──resume──▶ Running(dir)
//! ```
//!
//! and commits the checkpoint on every transition. The `Running` record is
//! flushed before the engine is launched, so a crash can never leave a
//! working directory that the checkpoint does not know about.

pub mod process;

pub use process::{
    EngineInvocation, EngineLauncher, NextflowLauncher, ProcessExit, ProcessToolLauncher,
    ToolCommand, ToolLauncher,
};

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::layout::{LayoutError, ProjectDir, ProjectLayout};
use crate::models::{Stage, StageState, StageStatus, TransitionError};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors raised while running an engine-backed stage.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The engine exited non-zero. The stage is resumable.
    #[error(
        "{workflow} workflow for stage {stage} failed (exit {}); results might not be complete. \
         See engine logs in {} or pipeline logs in {} for more details",
        exit_code.map_or_else(|| "by signal".to_string(), |c| c.to_string()),
        engine_log.display(),
        logs_dir.display()
    )]
    EngineFailed {
        /// Stage that failed.
        stage: Stage,
        /// Workflow name.
        workflow: String,
        /// Exit code, `None` if killed by a signal.
        exit_code: Option<i32>,
        /// Preserved working directory.
        work_dir: PathBuf,
        /// Engine log file.
        engine_log: PathBuf,
        /// Project log directory.
        logs_dir: PathBuf,
    },

    /// The engine process could not be started.
    #[error("failed to launch {workflow} workflow for stage {stage}: {source}")]
    Spawn {
        /// Stage being launched.
        stage: Stage,
        /// Workflow name.
        workflow: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Filesystem error around the working directory or parameter file.
    #[error("{action} {path}: {source}")]
    Io {
        /// What was being done.
        action: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The stage record refused a transition.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Checkpoint read or write failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Project directory could not be listed.
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Engine settings shared by every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Directory holding `<workflow>.nf` scripts.
    pub workflows_dir: PathBuf,
    /// Value for `NXF_OPTS`.
    pub java_opts: Option<String>,
}

/// Engine work a stage asks the runner to perform.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineJob {
    /// Workflow name.
    pub workflow: &'static str,
    /// Parameter manifest contents.
    pub params: serde_json::Value,
}

/// Result of a successful [`ExternalWorkflowRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The stage was already complete; nothing was launched.
    AlreadyComplete,
    /// The engine ran and exited successfully.
    Completed {
        /// Working directory used (now removed).
        work_dir: PathBuf,
        /// Whether a previous working directory was reused.
        resumed: bool,
    },
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn io_error(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> RunnerError {
    let path = path.to_path_buf();
    move |source| RunnerError::Io {
        action,
        path,
        source,
    }
}

/// Drives engine-backed stages through their state machine.
pub struct ExternalWorkflowRunner<'a> {
    launcher: &'a dyn EngineLauncher,
    settings: &'a EngineSettings,
}

impl<'a> ExternalWorkflowRunner<'a> {
    /// Runner using the given launcher and settings.
    #[must_use]
    pub fn new(launcher: &'a dyn EngineLauncher, settings: &'a EngineSettings) -> Self {
        Self { launcher, settings }
    }

    /// Run `job` for `stage`.
    ///
    /// A complete stage is left alone. With `resume` set, a recorded working
    /// directory that still exists is reused and the engine is told to
    /// resume; otherwise a fresh directory is allocated.
    ///
    /// On success the working directory is removed and the record becomes
    /// `Complete` with `pending_finalize` set, in one commit.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::EngineFailed` when the engine exits non-zero (the
    /// stage is then `Resumable`), `RunnerError::Spawn` when it cannot be
    /// started, or a checkpoint/filesystem error.
    pub async fn run(
        &self,
        store: &mut CheckpointStore,
        layout: &ProjectLayout,
        stage: Stage,
        job: &EngineJob,
        resume: bool,
    ) -> Result<RunOutcome, RunnerError> {
        let mut record = store.stage_record(stage)?;
        if record.is_complete() {
            info!(%stage, "engine run already completed, skipping");
            return Ok(RunOutcome::AlreadyComplete);
        }

        let params_file = layout.root().join(format!("{}_params.json", job.workflow));
        let params = serde_json::to_vec_pretty(&job.params)
            .map_err(|e| io_error("serializing", &params_file)(std::io::Error::other(e)))?;
        std::fs::write(&params_file, params).map_err(io_error("writing", &params_file))?;

        let previous = record.resumption_token().map(Path::to_path_buf);
        let (work_dir, resumed) = match previous {
            Some(dir) if resume && dir.is_dir() => {
                info!(%stage, work_dir = %dir.display(), "resuming from work directory");
                (dir, true)
            }
            previous => {
                if let Some(dir) = &previous {
                    if resume {
                        warn!(
                            %stage,
                            work_dir = %dir.display(),
                            "work directory not found, starting from scratch"
                        );
                    } else {
                        warn!(
                            %stage,
                            work_dir = %dir.display(),
                            "resume not requested, previous work directory abandoned"
                        );
                    }
                }
                let dir = layout.new_work_dir(stage);
                std::fs::create_dir_all(&dir).map_err(io_error("creating", &dir))?;
                (dir, false)
            }
        };

        record.start(Some(work_dir.clone()), now())?;
        store.commit_stage(stage, &record)?;

        let invocation = EngineInvocation {
            workflow: job.workflow.to_string(),
            script: self
                .settings
                .workflows_dir
                .join(format!("{}.nf", job.workflow)),
            params_file,
            work_dir: work_dir.clone(),
            resume: resumed,
            current_dir: store.dir().to_path_buf(),
            env: self
                .settings
                .java_opts
                .iter()
                .map(|opts| ("NXF_OPTS".to_string(), opts.clone()))
                .collect(),
        };

        match self.launcher.launch(&invocation).await {
            Ok(ProcessExit::Success) => {
                if let Err(e) = std::fs::remove_dir_all(&work_dir) {
                    warn!(
                        %stage,
                        work_dir = %work_dir.display(),
                        error = %e,
                        "could not remove work directory"
                    );
                }
                record.complete(now())?;
                record.pending_finalize = true;
                store.commit_stage(stage, &record)?;
                info!(%stage, workflow = job.workflow, "engine run complete");
                Ok(RunOutcome::Completed { work_dir, resumed })
            }
            Ok(ProcessExit::Failure { code }) => {
                record.suspend(now())?;
                store.commit_stage(stage, &record)?;
                let err = RunnerError::EngineFailed {
                    stage,
                    workflow: job.workflow.to_string(),
                    exit_code: code,
                    work_dir,
                    engine_log: store.dir().join(".nextflow.log"),
                    logs_dir: layout.dir(ProjectDir::Logs),
                };
                error!(%stage, "{err}");
                Err(err)
            }
            Err(source) => {
                if resumed {
                    record.suspend(now())?;
                } else {
                    record.fail(format!("engine could not be started: {source}"), now());
                    if let Err(e) = std::fs::remove_dir(&work_dir) {
                        warn!(
                            %stage,
                            work_dir = %work_dir.display(),
                            error = %e,
                            "could not remove unused work directory"
                        );
                    }
                }
                store.commit_stage(stage, &record)?;
                error!(%stage, error = %source, "engine could not be started");
                Err(RunnerError::Spawn {
                    stage,
                    workflow: job.workflow.to_string(),
                    source,
                })
            }
        }
    }
}

/// What [`reconcile`] found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Stages whose `Running` record was rewritten, with their new status.
    pub recovered: Vec<(Stage, StageStatus)>,
    /// Engine working directories no record refers to.
    pub orphans: Vec<PathBuf>,
}

/// Bring stage records in line with the filesystem after a crash.
///
/// A `Running` record means the previous process died before recording the
/// outcome. If its working directory exists the stage becomes `Resumable`;
/// otherwise it goes back to `Pending`. Working directories that no record
/// refers to are reported as orphans and left on disk.
///
/// # Errors
///
/// Returns a checkpoint or layout error.
pub fn reconcile(
    store: &mut CheckpointStore,
    layout: &ProjectLayout,
) -> Result<ReconcileReport, RunnerError> {
    let mut report = ReconcileReport::default();
    let mut referenced = BTreeSet::new();

    for (stage, mut record) in store.stage_records()? {
        if let StageState::Running { resumption_token } = &record.state {
            match resumption_token {
                Some(dir) if dir.is_dir() => {
                    warn!(%stage, work_dir = %dir.display(), "stage was interrupted, resumable");
                    record.suspend(now())?;
                }
                Some(dir) => {
                    warn!(
                        %stage,
                        work_dir = %dir.display(),
                        "stage was interrupted and its work directory is gone, resetting"
                    );
                    record.reset(now());
                }
                None => {
                    warn!(%stage, "stage was interrupted, resetting");
                    record.reset(now());
                }
            }
            store.put_stage_record(stage, &record)?;
            report.recovered.push((stage, record.status()));
        }
        if let Some(token) = record.resumption_token() {
            referenced.insert(token.to_path_buf());
        }
    }

    if !report.recovered.is_empty() {
        store.flush()?;
    }

    for dir in layout.engine_work_dirs()? {
        if !referenced.contains(&dir) {
            warn!(work_dir = %dir.display(), "orphaned engine work directory, ignoring");
            report.orphans.push(dir);
        }
    }

    Ok(report)
}
