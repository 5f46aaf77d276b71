//! `metadata_load`: copy study and analysis metadata from ENA into the catalog.

use super::{Outputs, StageContext, StageError, StageHandler, StagePlan};
use crate::models::Stage;
use crate::runner::{ProcessExit, ToolCommand};
use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info, warn};

const TOOL: &str = "load_from_ena";

/// Runs the ENA metadata loader, then makes every analysis point at the
/// assembly set the catalog holds for its assembly.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataLoadHandler;

/// Numeric part of a unit id (`ELOAD_123` gives `123`).
fn submission_number(id: &str) -> &str {
    let digits = id.trim_start_matches(|c: char| !c.is_ascii_digit());
    if digits.is_empty() {
        id
    } else {
        digits
    }
}

impl MetadataLoadHandler {
    fn commands(ctx: &StageContext<'_>) -> Result<Vec<ToolCommand>, StageError> {
        let script = ctx
            .config
            .tools
            .load_from_ena
            .as_ref()
            .ok_or(StageError::MissingConfig {
                stage: Stage::MetadataLoad,
                key: "tools.load_from_ena",
            })?;
        let project = ctx.project_accession()?;
        let scratch = ctx.store.dir().display().to_string();

        let base: Vec<String> = vec![
            script.display().to_string(),
            "-p".into(),
            project.to_string(),
            "-c".into(),
            "submitted".into(),
            "-v".into(),
            "1".into(),
            "-l".into(),
            scratch,
            "-e".into(),
            submission_number(&ctx.unit.id).to_string(),
        ];
        let command = |extra: Vec<String>| ToolCommand {
            program: ctx.config.tools.perl.clone().into(),
            args: base.iter().cloned().chain(extra).collect(),
            current_dir: ctx.store.dir().to_path_buf(),
        };

        if ctx.unit.existing_project {
            Ok(ctx
                .unit
                .brokered_analyses
                .values()
                .map(|analysis| command(vec!["-A".into(), "-a".into(), analysis.clone()]))
                .collect())
        } else {
            Ok(vec![command(Vec::new())])
        }
    }

    async fn reconcile_assembly_sets(ctx: &StageContext<'_>) -> Result<Vec<String>, StageError> {
        let mut corrected = Vec::new();
        for (alias, assembly) in &ctx.unit.submitted_assemblies {
            let Some(analysis) = ctx.unit.brokered_analyses.get(alias) else {
                warn!(analysis = %alias, "analysis was not brokered, assembly set left alone");
                continue;
            };
            let expected = ctx
                .catalog
                .assembly_set_id(ctx.unit.taxonomy_id, assembly)
                .await?;
            match ctx.catalog.analysis_assembly_set(analysis).await? {
                Some(current) if current == expected => continue,
                Some(current) => {
                    error!(
                        analysis = %analysis,
                        previous = current,
                        corrected = expected,
                        "previous assembly set for analysis was wrong and will be updated"
                    );
                    corrected.push(analysis.clone());
                }
                None => {
                    info!(analysis = %analysis, assembly_set = expected, "recording assembly set");
                }
            }
            ctx.catalog
                .set_analysis_assembly_set(analysis, expected)
                .await?;
        }
        Ok(corrected)
    }
}

#[async_trait]
impl StageHandler for MetadataLoadHandler {
    fn stage(&self) -> Stage {
        Stage::MetadataLoad
    }

    async fn prepare(&self, ctx: &StageContext<'_>) -> Result<StagePlan, StageError> {
        Self::commands(ctx)?;
        Ok(StagePlan::InProcess {
            outputs: Outputs::new(),
        })
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<Outputs, StageError> {
        for command in Self::commands(ctx)? {
            info!(args = ?command.args, "loading metadata from ENA");
            match ctx.tools.run(&command).await {
                Ok(ProcessExit::Success) => {}
                Ok(ProcessExit::Failure { code }) => {
                    error!("ENA metadata load failed: aborting ingestion");
                    return Err(StageError::ToolFailed {
                        tool: TOOL,
                        exit_code: code,
                    });
                }
                Err(source) => return Err(StageError::ToolSpawn { tool: TOOL, source }),
            }
        }

        // Covers a loader run that skipped the analysis update because the
        // project already existed.
        let corrected = Self::reconcile_assembly_sets(ctx).await?;

        let mut outputs = Outputs::new();
        outputs.insert("ena_load".into(), json!("success"));
        if !corrected.is_empty() {
            outputs.insert("corrected_assembly_sets".into(), json!(corrected));
        }
        Ok(outputs)
    }
}
