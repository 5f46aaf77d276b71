//! `accession`: assign accessions, then publish the project's browsable files.

use super::{Outputs, StageContext, StageError, StageHandler, StagePlan};
use crate::layout::ProjectDir;
use crate::models::Stage;
use crate::runner::EngineJob;
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Public FTP location of a project's files.
#[must_use]
pub fn ftp_path(project_accession: &str, filename: &str) -> String {
    format!("/ftp.ebi.ac.uk/pub/databases/eva/{project_accession}/{filename}")
}

/// Accessioning engine run plus browsable-file bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessionHandler;

impl AccessionHandler {
    async fn insert_browsable_files(
        ctx: &StageContext<'_>,
        project: &str,
    ) -> Result<usize, StageError> {
        let existing = ctx.catalog.browsable_files(project).await?;
        if existing.is_empty() {
            info!(project, "inserting browsable files");
            return Ok(ctx.catalog.insert_browsable_files(project).await?);
        }

        let expected: BTreeSet<_> = ctx
            .catalog
            .expected_browsable_files(project)
            .await?
            .into_iter()
            .collect();
        let existing: BTreeSet<_> = existing.into_iter().collect();
        if existing == expected {
            info!(project, "browsable files already inserted, skipping");
        } else {
            let expected_names: Vec<&str> = expected.iter().map(|f| f.filename.as_str()).collect();
            warn!(
                project,
                found = existing.len(),
                expected = ?expected_names,
                "browsable file rows differ from the expected ones"
            );
        }
        Ok(0)
    }
}

#[async_trait]
impl StageHandler for AccessionHandler {
    fn stage(&self) -> Stage {
        Stage::Accession
    }

    async fn prepare(&self, ctx: &StageContext<'_>) -> Result<StagePlan, StageError> {
        let instance_id = ctx.options.instance_id.ok_or(StageError::MissingOption {
            stage: Stage::Accession,
            option: "instance-id",
        })?;
        let public_ftp_dir = ctx.config.public_ftp_dir.as_ref().ok_or(StageError::MissingConfig {
            stage: Stage::Accession,
            key: "public_ftp_dir",
        })?;
        let project = ctx.project_accession()?;
        let manifest = ctx.manifest_path(Stage::Accession)?;
        let (executable, jar) = ctx.tool_tables();

        let params = json!({
            "valid_vcfs": manifest,
            "project_accession": project,
            "instance_id": instance_id,
            "accession_job_props": {
                "parameters.taxonomyAccession": ctx.unit.taxonomy_id,
                "parameters.projectAccession": project,
                "accessioning.instanceId": format!("instance-{instance_id}"),
            },
            "public_ftp_dir": public_ftp_dir,
            "accessions_dir": ctx.layout.dir(ProjectDir::Accessions),
            "public_dir": ctx.layout.dir(ProjectDir::Public),
            "logs_dir": ctx.layout.dir(ProjectDir::Logs),
            "executable": executable,
            "jar": jar,
        });

        let mut outputs = Outputs::new();
        outputs.insert("instance_id".into(), json!(instance_id));
        Ok(StagePlan::Engine {
            job: EngineJob {
                workflow: "accession",
                params,
            },
            outputs,
        })
    }

    async fn finalize(&self, ctx: &StageContext<'_>) -> Result<Outputs, StageError> {
        let project = ctx.project_accession()?;
        let inserted = Self::insert_browsable_files(ctx, project).await?;

        let release_date = ctx.unit.release_date();
        if release_date.is_none() {
            warn!(project, "no hold date recorded by brokering, release date left empty");
        }
        ctx.catalog
            .mark_browsable_files_loaded(project, release_date.as_deref())
            .await?;

        let files = ctx.catalog.browsable_files(project).await?;
        if files.is_empty() {
            return Err(StageError::Inconsistency(format!(
                "no browsable files for project {project}; something went wrong with loading from ENA"
            )));
        }
        for file in &files {
            ctx.catalog
                .set_ftp_path(file.file_id, &ftp_path(project, &file.filename))
                .await?;
        }

        ctx.catalog.refresh_study_browser().await?;
        info!(project, files = files.len(), "browsable files published");

        let mut outputs = Outputs::new();
        outputs.insert("browsable_files".into(), json!(files.len()));
        outputs.insert("browsable_files_inserted".into(), json!(inserted));
        if let Some(date) = release_date {
            outputs.insert("release_date".into(), json!(date));
        }
        Ok(outputs)
    }
}
