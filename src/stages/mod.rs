//! Stage implementations.
//!
//! A [`StageHandler`] decides what a stage needs (in-process work, an engine
//! run, or a skip), and performs the catalog bookkeeping that follows a
//! successful run. Handlers never touch stage records: whatever they want
//! recorded comes back as [`Outputs`] and the orchestrator writes it.

pub mod accession;
pub mod manifest;
pub mod metadata_load;
pub mod properties;
pub mod remap_cluster;
pub mod variant_load;

pub use accession::AccessionHandler;
pub use manifest::{write_ingest_manifest, ManifestRow, INGEST_MANIFEST_FILE};
pub use metadata_load::MetadataLoadHandler;
pub use properties::PropertiesFile;
pub use remap_cluster::RemapClusterHandler;
pub use variant_load::VariantLoadHandler;

use crate::catalog::{CatalogError, MetadataCatalog};
use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::config::IngestConfig;
use crate::layout::ProjectLayout;
use crate::models::{Stage, UnitOfWork};
use crate::runner::{EngineJob, ToolLauncher};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Named artifacts a stage hands back for its record.
pub type Outputs = BTreeMap<String, Value>;

/// Errors raised by stage implementations.
#[derive(Debug, Error)]
pub enum StageError {
    /// A run option the stage cannot do without was not given.
    #[error("stage {stage} requires --{option}")]
    MissingOption {
        /// Stage that needs it.
        stage: Stage,
        /// Option name as given on the command line.
        option: &'static str,
    },

    /// A configuration value the stage cannot do without is unset.
    #[error("stage {stage} requires '{key}' to be configured")]
    MissingConfig {
        /// Stage that needs it.
        stage: Stage,
        /// Dotted configuration key.
        key: &'static str,
    },

    /// Output of another stage this one consumes has not been produced yet.
    #[error("stage {stage} requires {requires} to be complete")]
    MissingPrerequisite {
        /// Stage that was about to run.
        stage: Stage,
        /// Stage whose output is missing.
        requires: Stage,
    },

    /// The catalog returned zero or several rows where exactly one was expected.
    #[error("metadata inconsistency: {0}")]
    Inconsistency(String),

    /// A helper program exited non-zero.
    #[error("{tool} failed (exit {})", exit_code.map_or_else(|| "by signal".to_string(), |c| c.to_string()))]
    ToolFailed {
        /// Tool name.
        tool: &'static str,
        /// Exit code, if any.
        exit_code: Option<i32>,
    },

    /// A helper program could not be started.
    #[error("could not start {tool}: {source}")]
    ToolSpawn {
        /// Tool name.
        tool: &'static str,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Filesystem error while writing a stage artifact.
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

    /// The ingest manifest could not be written.
    #[error("failed to write ingest manifest: {0}")]
    Manifest(#[from] csv::Error),

    /// Catalog call failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Checkpoint read failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl StageError {
    pub(crate) fn io(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Io {
            action,
            path,
            source,
        }
    }
}

/// Per-run options given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Accessioning instance.
    pub instance_id: Option<u32>,
    /// Clustering instance.
    pub clustering_instance_id: Option<u32>,
    /// Override for the VEP cache assembly name.
    pub vep_cache_assembly_name: Option<String>,
    /// Resume engine runs from their recorded working directories.
    pub resume: bool,
}

/// What a stage needs to do this run.
#[derive(Debug, Clone, PartialEq)]
pub enum StagePlan {
    /// Work done by [`StageHandler::execute`] in this process.
    InProcess {
        /// Outputs to record before the work starts.
        outputs: Outputs,
    },
    /// Work done by the external engine.
    Engine {
        /// Workflow and parameters.
        job: EngineJob,
        /// Outputs to record before the engine is launched.
        outputs: Outputs,
    },
    /// Nothing to do; the reason is recorded on the stage.
    Skip {
        /// Why.
        reason: String,
        /// Outputs to record anyway.
        outputs: Outputs,
    },
}

/// Everything a stage may read.
pub struct StageContext<'a> {
    /// The unit of work.
    pub unit: &'a UnitOfWork,
    /// Checkpoint, read-only for handlers.
    pub store: &'a CheckpointStore,
    /// Project directories.
    pub layout: &'a ProjectLayout,
    /// Metadata catalog.
    pub catalog: &'a dyn MetadataCatalog,
    /// Helper program launcher.
    pub tools: &'a dyn ToolLauncher,
    /// Effective configuration.
    pub config: &'a IngestConfig,
    /// Command-line options.
    pub options: &'a RunOptions,
    /// Ingest manifest written for this run, if any stage needed one.
    pub manifest: Option<&'a Path>,
}

impl StageContext<'_> {
    /// Project accession; the precondition gate guarantees it is set.
    ///
    /// # Errors
    ///
    /// Returns `StageError::Inconsistency` if it is missing anyway.
    pub fn project_accession(&self) -> Result<&str, StageError> {
        self.unit
            .project_accession
            .as_deref()
            .ok_or_else(|| {
                StageError::Inconsistency("unit of work has no project accession".into())
            })
    }

    /// Ingest manifest path.
    ///
    /// # Errors
    ///
    /// Returns `StageError::Inconsistency` if no manifest was written this run.
    pub fn manifest_path(&self, stage: Stage) -> Result<&Path, StageError> {
        self.manifest.ok_or_else(|| {
            StageError::Inconsistency(format!("no ingest manifest was prepared for stage {stage}"))
        })
    }

    /// `executables` and `jars` tables, as passed to every engine workflow.
    #[must_use]
    pub fn tool_tables(&self) -> (Value, Value) {
        (
            serde_json::to_value(&self.config.executables).unwrap_or(Value::Null),
            serde_json::to_value(&self.config.jars).unwrap_or(Value::Null),
        )
    }
}

/// Domain logic for one stage.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Stage this handler implements.
    fn stage(&self) -> Stage;

    /// Decide what to do and assemble engine parameters.
    ///
    /// # Errors
    ///
    /// Returns `StageError` if the stage cannot be prepared.
    async fn prepare(&self, ctx: &StageContext<'_>) -> Result<StagePlan, StageError>;

    /// In-process body for [`StagePlan::InProcess`].
    ///
    /// # Errors
    ///
    /// Returns `StageError` if the work fails.
    async fn execute(&self, _ctx: &StageContext<'_>) -> Result<Outputs, StageError> {
        Ok(Outputs::new())
    }

    /// Bookkeeping after the stage's work succeeded. Must be safe to repeat.
    ///
    /// # Errors
    ///
    /// Returns `StageError` if the bookkeeping fails; the stage stays
    /// complete and only this step is retried next time.
    async fn finalize(&self, _ctx: &StageContext<'_>) -> Result<Outputs, StageError> {
        Ok(Outputs::new())
    }
}

impl std::fmt::Debug for dyn StageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StageHandler({})", self.stage())
    }
}

/// Maps stages to their handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Stage, Box<dyn StageHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a handler for every stage.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(MetadataLoadHandler));
        registry.register(Box::new(AccessionHandler));
        registry.register(Box::new(RemapClusterHandler));
        registry.register(Box::new(VariantLoadHandler::new(Stage::VariantLoad)));
        registry.register(Box::new(VariantLoadHandler::new(Stage::Annotation)));
        registry
    }

    /// Register a handler, replacing any existing one for its stage.
    pub fn register(&mut self, handler: Box<dyn StageHandler>) {
        self.handlers.insert(handler.stage(), handler);
    }

    /// Handler for `stage`.
    #[must_use]
    pub fn get(&self, stage: Stage) -> Option<&dyn StageHandler> {
        self.handlers.get(&stage).map(AsRef::as_ref)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut stages: Vec<Stage> = self.handlers.keys().copied().collect();
        stages.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &stages)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_covers_every_stage() {
        let registry = HandlerRegistry::standard();
        assert_eq!(registry.len(), Stage::ALL.len());
        for stage in Stage::ALL {
            assert_eq!(registry.get(stage).map(|h| h.stage()), Some(stage));
        }
    }

    #[test]
    fn test_register_replaces_existing_handler() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        registry.register(Box::new(AccessionHandler));
        registry.register(Box::new(AccessionHandler));
        assert_eq!(registry.len(), 1);
        assert!(format!("{registry:?}").contains("Accession"));
    }
}
