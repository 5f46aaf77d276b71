//! `variant_load` and `annotation`: both launch the variant load workflow.

use super::{Outputs, StageContext, StageError, StageHandler, StagePlan};
use crate::layout::ProjectDir;
use crate::models::Stage;
use crate::runner::EngineJob;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

/// Variant load workflow, optionally restricted to annotation.
#[derive(Debug, Clone, Copy)]
pub struct VariantLoadHandler {
    stage: Stage,
}

impl VariantLoadHandler {
    /// Handler for [`Stage::VariantLoad`] or [`Stage::Annotation`].
    #[must_use]
    pub const fn new(stage: Stage) -> Self {
        Self { stage }
    }

    const fn annotation_only(&self) -> bool {
        matches!(self.stage, Stage::Annotation)
    }
}

async fn study_title(ctx: &StageContext<'_>, project: &str) -> Result<String, StageError> {
    let mut titles = ctx.catalog.study_titles(project).await?;
    match titles.len() {
        1 => Ok(titles.remove(0)),
        n => Err(StageError::Inconsistency(format!(
            "expected exactly one project with accession {project} in the metadata catalog, found {n}"
        ))),
    }
}

#[async_trait]
impl StageHandler for VariantLoadHandler {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn prepare(&self, ctx: &StageContext<'_>) -> Result<StagePlan, StageError> {
        let project = ctx.project_accession()?;
        let manifest = ctx.manifest_path(self.stage)?;
        let study_name = study_title(ctx, project).await?;
        let (executable, jar) = ctx.tool_tables();
        let tools = &ctx.config.tools;

        let params = json!({
            "valid_vcfs": manifest,
            "vep_path": tools.vep_path,
            "load_job_props": {
                "input.study.id": project,
                "input.study.name": study_name,
                "output.dir": ctx.layout.dir(ProjectDir::Transformed),
                "output.dir.annotation": ctx.layout.dir(ProjectDir::Annotation),
                "output.dir.statistics": ctx.layout.dir(ProjectDir::Stats),
            },
            "acc_import_job_props": {"db.collections.variants.name": "variants_2_0"},
            "project_accession": project,
            "project_dir": ctx.layout.root(),
            "logs_dir": ctx.layout.dir(ProjectDir::Logs),
            "eva_pipeline_props": tools.eva_pipeline_props,
            "executable": executable,
            "jar": jar,
            "annotation_only": self.annotation_only(),
        });

        let mut outputs = Outputs::new();
        outputs.insert("annotation_only".into(), json!(self.annotation_only()));
        Ok(StagePlan::Engine {
            job: EngineJob {
                workflow: "variant_load",
                params,
            },
            outputs,
        })
    }

    async fn finalize(&self, ctx: &StageContext<'_>) -> Result<Outputs, StageError> {
        let project = ctx.project_accession()?;
        let rows = ctx.catalog.file_assemblies(project).await?;
        if rows.is_empty() {
            return Err(StageError::Inconsistency(format!(
                "no browsable files with an assembly for project {project}; \
                 something went wrong with loading from ENA"
            )));
        }
        for (file_id, assembly) in &rows {
            ctx.catalog.set_loaded_assembly(*file_id, assembly).await?;
        }
        info!(project, files = rows.len(), "recorded loaded assembly on browsable files");

        let mut outputs = Outputs::new();
        outputs.insert("loaded_files".into(), json!(rows.len()));
        Ok(outputs)
    }
}
