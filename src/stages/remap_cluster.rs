//! `remap_and_cluster`: remap to the current supported assembly and cluster.
//!
//! Only runs when the taxonomy has a current target assembly that belongs to
//! the same taxonomy. Every other case is a recorded skip, not an error.
//! A run that goes ahead needs the accessioned variants, so `accession` must
//! already be complete.

use super::{Outputs, PropertiesFile, StageContext, StageError, StageHandler, StagePlan};
use crate::layout::ProjectDir;
use crate::models::{Stage, HUMAN_TAXONOMY_ID};
use crate::runner::EngineJob;
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

/// Remapping and clustering engine run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemapClusterHandler;

fn skip(reason: String, outputs: Outputs) -> StagePlan {
    StagePlan::Skip { reason, outputs }
}

#[async_trait]
impl StageHandler for RemapClusterHandler {
    fn stage(&self) -> Stage {
        Stage::RemapAndCluster
    }

    async fn prepare(&self, ctx: &StageContext<'_>) -> Result<StagePlan, StageError> {
        let taxonomy = ctx.unit.taxonomy_id;
        let mut outputs = Outputs::new();

        if taxonomy == HUMAN_TAXONOMY_ID {
            let reason = "no remapping or clustering for human studies".to_string();
            info!("{reason}");
            return Ok(skip(reason, outputs));
        }

        let mut targets = ctx.catalog.current_target_assemblies(taxonomy).await?;
        let target = match targets.len() {
            0 => {
                let reason = format!(
                    "could not find any current supported assembly for {taxonomy}, \
                     skipping clustering"
                );
                warn!("{reason}");
                return Ok(skip(reason, outputs));
            }
            1 => targets.remove(0),
            n => {
                return Err(StageError::Inconsistency(format!(
                    "{n} current supported assemblies for taxonomy {taxonomy}"
                )))
            }
        };
        outputs.insert("target_assembly".into(), json!(target));

        let target_taxonomy = ctx.catalog.assembly_taxonomy(&target).await?;
        if target_taxonomy != taxonomy {
            let reason = format!(
                "target assembly {target} is from a different taxonomy {target_taxonomy} compared \
                 to the current project {taxonomy}, remapping will not be carried out"
            );
            warn!("{reason}");
            return Ok(skip(reason, outputs));
        }

        if !ctx.store.stage_record(Stage::Accession)?.is_complete() {
            return Err(StageError::MissingPrerequisite {
                stage: Stage::RemapAndCluster,
                requires: Stage::Accession,
            });
        }

        let clustering_instance =
            ctx.options
                .clustering_instance_id
                .ok_or(StageError::MissingOption {
                    stage: Stage::RemapAndCluster,
                    option: "clustering-instance-id",
                })?;
        let project = ctx.project_accession()?;
        let output_dir = ctx.layout.dir(ProjectDir::Clustering);

        let extraction = output_dir.join("remapping_extraction.properties");
        PropertiesFile::new()
            .with("parameters.taxonomy", taxonomy)
            .with("parameters.projects", project)
            .write(&extraction)?;

        let ingestion = output_dir.join("remapping_ingestion.properties");
        PropertiesFile::new()
            .with("parameters.assemblyAccession", &target)
            .with("parameters.loadTo", "EVA")
            .write(&ingestion)?;

        let clustering = output_dir.join("clustering_template.properties");
        PropertiesFile::new()
            .with("accessioning.instanceId", format!("instance-{clustering_instance}"))
            .with("parameters.assemblyAccession", &target)
            .with("parameters.projects", project)
            .with("parameters.rsReportPath", format!("{target}_rs_report.txt"))
            .write(&clustering)?;

        let (executable, jar) = ctx.tool_tables();
        let source_assemblies: Vec<String> = ctx.unit.assembly_accessions().into_iter().collect();
        let params = json!({
            "taxonomy_id": taxonomy,
            "source_assemblies": source_assemblies,
            "target_assembly_accession": target,
            "species_name": ctx.unit.scientific_name,
            "output_dir": output_dir,
            "genome_assembly_dir": ctx.config.tools.genome_assembly_dir,
            "extraction_properties": extraction,
            "ingestion_properties": ingestion,
            "clustering_properties": clustering,
            "clustering_instance": clustering_instance,
            "executable": executable,
            "jar": jar,
        });

        outputs.insert("clustering_instance_id".into(), json!(clustering_instance));
        outputs.insert("clustering_properties".into(), json!(clustering));
        Ok(StagePlan::Engine {
            job: EngineJob {
                workflow: "remap_and_cluster",
                params,
            },
            outputs,
        })
    }
}
