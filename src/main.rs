//! eload-ingest - resumable ingestion of brokered submissions

use anyhow::{Context, Result};
use eload_ingest::catalog::MemoryCatalog;
use eload_ingest::checkpoint::CheckpointStore;
use eload_ingest::cli::{Cli, Commands, ConfigCommands};
use eload_ingest::config::{
    format_config, format_config_paths, load_config, validate_config, ConfigSources,
};
use eload_ingest::orchestrator::{
    reset_stage, status_report, IngestRequest, Orchestrator, StageOutcome,
};
use eload_ingest::runner::{NextflowLauncher, ProcessToolLauncher};
use eload_ingest::stages::RunOptions;
use eload_ingest::IngestionError;
use tracing_subscriber::EnvFilter;

/// Displays an error with rich context and suggestions if available.
fn display_error(err: &anyhow::Error) {
    if let Some(ingestion_err) = err.downcast_ref::<IngestionError>() {
        eprintln!("{}", ingestion_err.display_rich());
        return;
    }

    // Check the error chain for ingestion errors
    for cause in err.chain() {
        if let Some(ingestion_err) = cause.downcast_ref::<IngestionError>() {
            eprintln!("Error: {err}\n");
            eprintln!("Caused by: {}", ingestion_err.display_rich());
            return;
        }
    }

    eprintln!("Error: {err:#}");
}

#[tokio::main]
async fn main() {
    // Initialize logging
    let filter = match "eload_ingest=info".parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run().await {
        display_error(&e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Config { command } => {
            let sources = ConfigSources::discover().with_custom_config(cli.config.clone());
            let config = load_config(cli.profile.as_deref(), cli.config.as_ref())?;

            match command {
                ConfigCommands::Show => {
                    print!("{}", format_config(&config, &sources));
                }
                ConfigCommands::Validate => {
                    let errors = validate_config(&config);
                    if errors.is_empty() {
                        println!("Configuration is valid.");
                    } else {
                        eprintln!("Configuration errors:");
                        for error in &errors {
                            eprintln!("  - {error}");
                        }
                        std::process::exit(1);
                    }
                }
                ConfigCommands::Paths => {
                    print!("{}", format_config_paths(&sources));
                }
            }
        }

        Commands::Status { checkpoint, json } => {
            let store = CheckpointStore::open(&checkpoint).map_err(IngestionError::from)?;
            let report = status_report(&store)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{report}");
            }
        }

        Commands::Reset { checkpoint, stage } => {
            let mut store = CheckpointStore::open(&checkpoint).map_err(IngestionError::from)?;
            match reset_stage(&mut store, stage)? {
                Some(dir) => println!(
                    "Stage {stage} reset. Work directory kept: {}",
                    dir.display()
                ),
                None => println!("Stage {stage} reset."),
            }
        }

        Commands::Ingest {
            checkpoint,
            tasks,
            instance_id,
            clustering_instance_id,
            vep_cache_assembly_name,
            resume,
            catalog,
            projects_dir,
        } => {
            let mut config = load_config(cli.profile.as_deref(), cli.config.as_ref())?;
            if let Some(dir) = projects_dir {
                config.projects_dir = dir;
            }
            if config.projects_dir.as_os_str().is_empty() {
                anyhow::bail!(
                    "projects_dir not configured. Set ELOAD_INGEST_PROJECTS_DIR, pass \
                     --projects-dir or add it to a config file."
                );
            }

            let mut store = CheckpointStore::open(&checkpoint)
                .map_err(IngestionError::from)
                .with_context(|| format!("loading checkpoint {}", checkpoint.display()))?;
            let catalog_db = MemoryCatalog::load(&catalog).map_err(IngestionError::from)?;
            let engine = NextflowLauncher::new(&config.engine.executable);
            let tools = ProcessToolLauncher;

            let request = IngestRequest {
                stages: tasks,
                options: RunOptions {
                    instance_id,
                    clustering_instance_id,
                    vep_cache_assembly_name,
                    resume,
                },
            };
            let orchestrator = Orchestrator::new(&catalog_db, &engine, &tools, &config);
            let result = orchestrator.ingest(&mut store, &request).await;

            // Catalog changes made before a failure are kept too.
            catalog_db
                .persist(&catalog)
                .map_err(IngestionError::from)
                .with_context(|| format!("saving catalog snapshot {}", catalog.display()))?;
            let report = result?;

            println!("Ingestion of {} complete.", report.unit_id);
            for (stage, outcome) in &report.outcomes {
                let text = match outcome {
                    StageOutcome::AlreadyComplete => "already complete".to_string(),
                    StageOutcome::Completed { resumed: true } => "completed (resumed)".to_string(),
                    StageOutcome::Completed { resumed: false } => "completed".to_string(),
                    StageOutcome::Finalized => "bookkeeping completed".to_string(),
                    StageOutcome::Skipped { reason } => format!("skipped: {reason}"),
                    StageOutcome::Folded => "ran as part of variant_load".to_string(),
                };
                println!("  {:<18} {text}", stage.as_str());
            }
            for orphan in &report.reconciled.orphans {
                println!("  orphaned work directory left on disk: {}", orphan.display());
            }
        }
    }

    Ok(())
}
