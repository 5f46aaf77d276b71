//! Top-level error for an ingestion run.
//!
//! Every subsystem has its own error enum; [`IngestionError`] wraps them so
//! the binary can print a suggestion next to the failure.

use crate::catalog::CatalogError;
use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::layout::LayoutError;
use crate::models::{Stage, TransitionError, UnitOfWorkError};
use crate::preconditions::PreconditionError;
use crate::runner::RunnerError;
use crate::stages::StageError;
use crate::workflow::DagError;
use thiserror::Error;

/// Errors that stop an ingestion run.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// The checkpoint does not describe a usable unit of work.
    #[error(transparent)]
    UnitOfWork(#[from] UnitOfWorkError),

    /// A precondition failed or pre-stage setup could not complete.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// Checkpoint read or write failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Project directory could not be prepared.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// Stages could not be ordered.
    #[error(transparent)]
    Plan(#[from] DagError),

    /// Engine-backed stage failed.
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// Stage logic failed.
    #[error(transparent)]
    Stage(#[from] StageError),

    /// A stage record refused a transition.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Catalog call failed outside a stage.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No handler is registered for a planned stage.
    #[error("no handler registered for stage {0}")]
    NoHandler(Stage),
}

impl IngestionError {
    /// A hint for resolving this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::UnitOfWork(_) => {
                "The checkpoint must carry the submission section written by the \
                 submission phase. Check that the path points at the right checkpoint."
            }
            Self::Precondition(PreconditionError::Violations(_)) => {
                "Fix every listed violation, then run ingestion again. Undeclared files \
                 in the valid directory must either be removed or added to brokering."
            }
            Self::Precondition(PreconditionError::MetadataInconsistency(_))
            | Self::Catalog(CatalogError::Inconsistency(_)) => {
                "An earlier phase did not complete correctly. Check the metadata \
                 catalog rows for this project before retrying."
            }
            Self::Precondition(_) | Self::Catalog(_) => {
                "Check that the metadata catalog is reachable and the snapshot file is readable."
            }
            Self::Checkpoint(_) => {
                "The checkpoint directory must be writable and the checkpoint must be valid \
                 JSON. The previous document is never overwritten by a failed write."
            }
            Self::Layout(_) => {
                "Check that projects_dir exists and is writable, and that the brokered \
                 input files are still present."
            }
            Self::Plan(_) => "The stage graph is invalid. This is a bug.",
            Self::Runner(RunnerError::EngineFailed { .. }) => {
                "Read the engine log and the project logs, fix the cause, then run \
                 again with --resume to continue from the preserved work directory."
            }
            Self::Runner(RunnerError::Spawn { .. }) => {
                "Check engine.executable in the configuration (or ELOAD_INGEST_NEXTFLOW) \
                 and that it is on PATH."
            }
            Self::Runner(_) | Self::Transition(_) => {
                "Check that the project directory is writable. Run `eload-ingest status` \
                 to see the recorded stage states."
            }
            Self::Stage(StageError::MissingOption { .. }) => {
                "Pass the missing option on the command line."
            }
            Self::Stage(StageError::MissingConfig { .. }) => {
                "Add the missing key to the configuration file. \
                 Run `eload-ingest config validate` to list every problem."
            }
            Self::Stage(StageError::MissingPrerequisite { .. }) => {
                "Request the required stage as well, for example \
                 `--tasks accession remap_and_cluster`."
            }
            Self::Stage(StageError::ToolFailed { .. } | StageError::ToolSpawn { .. }) => {
                "Check the helper tool configuration and its output above."
            }
            Self::Stage(_) => {
                "An engine run that already completed is not repeated; running again \
                 only retries the bookkeeping that failed."
            }
            Self::Config(_) => "Run `eload-ingest config paths` to see which files are read.",
            Self::NoHandler(_) => "Every stage needs a registered handler. This is a bug.",
        }
    }

    /// The error with its details and a suggestion, for CLI output.
    #[must_use]
    pub fn display_rich(&self) -> String {
        use std::fmt::Write;
        let mut output = format!("Error: {self}");

        match self {
            Self::Precondition(PreconditionError::Violations(violations)) => {
                output.push_str("\n\nViolations:");
                for violation in violations {
                    let _ = write!(output, "\n  - {violation}");
                }
            }
            Self::Runner(RunnerError::EngineFailed { work_dir, .. }) => {
                let _ = write!(output, "\n\nWork directory: {}", work_dir.display());
            }
            _ => {}
        }

        let _ = write!(output, "\n\nSuggestion:\n  {}", self.suggestion());
        output
    }
}
