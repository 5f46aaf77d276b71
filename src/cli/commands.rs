//! CLI commands for eload-ingest.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::models::Stage;

/// eload-ingest - resumable ingestion of brokered submissions
#[derive(Parser, Debug)]
#[command(
    name = "eload-ingest",
    version,
    about = "Resumable ingestion of brokered submissions"
)]
pub struct Cli {
    /// Configuration profile to use
    #[arg(long, global = true, env = "ELOAD_INGEST_PROFILE")]
    pub profile: Option<String>,

    /// Path to config file (overrides default locations)
    #[arg(long, global = true, env = "ELOAD_INGEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// The subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run ingestion stages for a checkpoint
    Ingest {
        /// Checkpoint document of the submission
        checkpoint: PathBuf,

        /// Stages to run (default: all). `annotation` together with
        /// `variant_load` runs as part of the variant load.
        #[arg(long = "tasks", value_name = "STAGE", num_args = 1..)]
        tasks: Vec<Stage>,

        /// Accessioning instance id (required by `accession`)
        #[arg(long)]
        instance_id: Option<u32>,

        /// Clustering instance id (required by `remap_and_cluster`)
        #[arg(long)]
        clustering_instance_id: Option<u32>,

        /// Assembly name to use for the VEP cache lookup
        #[arg(long)]
        vep_cache_assembly_name: Option<String>,

        /// Resume engine stages from their preserved work directories
        #[arg(long)]
        resume: bool,

        /// Metadata catalog snapshot (JSON)
        #[arg(long, env = "ELOAD_INGEST_CATALOG")]
        catalog: PathBuf,

        /// Projects directory (overrides configuration)
        #[arg(long)]
        projects_dir: Option<PathBuf>,
    },

    /// Show stage records of a checkpoint
    Status {
        /// Checkpoint document of the submission
        checkpoint: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Return a stage to pending (its work directory is kept)
    Reset {
        /// Checkpoint document of the submission
        checkpoint: PathBuf,

        /// Stage to reset
        stage: Stage,
    },

    /// Configuration management
    Config {
        /// Config subcommand
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show resolved configuration
    Show,
    /// Validate configuration
    Validate,
    /// Show config file locations
    Paths,
}

impl Cli {
    /// Parse command-line arguments.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
