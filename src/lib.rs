//! eload-ingest - resumable ingestion of brokered submissions
//!
//! Drives a submission through its ingestion stages (metadata load,
//! accessioning, variant load, annotation, remapping and clustering). Heavy
//! work is delegated to an external workflow engine; every transition is
//! committed to a checkpoint document so a failed or interrupted run can be
//! resumed from the engine's preserved working directory.

pub mod catalog;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod error;
pub mod layout;
pub mod models;
pub mod orchestrator;
pub mod preconditions;
pub mod runner;
pub mod stages;
pub mod workflow;

pub use catalog::{CatalogError, MemoryCatalog, MetadataCatalog};
pub use checkpoint::{CheckpointError, CheckpointStore};
pub use config::{load_config, IngestConfig};
pub use error::IngestionError;
pub use models::{Stage, StageRecord, StageState, StageStatus, UnitOfWork};
pub use orchestrator::{IngestReport, IngestRequest, Orchestrator, StageOutcome};
pub use runner::{EngineLauncher, ExternalWorkflowRunner, NextflowLauncher, RunnerError};
pub use stages::{HandlerRegistry, RunOptions, StageHandler};
