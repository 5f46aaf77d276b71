//! Common test utilities.
//!
//! Every scenario runs against a temporary directory holding the brokered
//! input files, a checkpoint, a projects directory and a public FTP
//! directory. The engine and helper tools are replaced by recording fakes so
//! no external process is ever started.

use async_trait::async_trait;
use eload_ingest::catalog::{
    AnalysisEntry, AssemblyEntry, CatalogFile, CatalogSnapshot, MemoryCatalog, ProjectEntry,
};
use eload_ingest::checkpoint::CheckpointStore;
use eload_ingest::config::IngestConfig;
use eload_ingest::layout::ProjectLayout;
use eload_ingest::orchestrator::{IngestReport, IngestRequest, Orchestrator};
use eload_ingest::runner::{
    EngineInvocation, EngineLauncher, ProcessExit, ToolCommand, ToolLauncher,
};
use eload_ingest::stages::RunOptions;
use eload_ingest::{IngestionError, Stage, StageRecord};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tempfile::TempDir;

/// Project accession used by every fixture.
pub const PROJECT: &str = "PRJEB1";

/// Engine fake that plays back scripted exits and records each launch.
///
/// Once the script is exhausted every launch succeeds.
#[derive(Default)]
pub struct ScriptedEngine {
    script: Mutex<VecDeque<ProcessExit>>,
    launches: Mutex<Vec<EngineInvocation>>,
}

impl ScriptedEngine {
    /// Engine that exits with `exits` in order, then succeeds.
    #[must_use]
    pub fn with_exits(exits: impl IntoIterator<Item = ProcessExit>) -> Self {
        Self {
            script: Mutex::new(exits.into_iter().collect()),
            launches: Mutex::default(),
        }
    }

    /// Every invocation seen so far.
    #[must_use]
    pub fn launches(&self) -> Vec<EngineInvocation> {
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Invocations of one workflow.
    #[must_use]
    pub fn launches_of(&self, workflow: &str) -> Vec<EngineInvocation> {
        self.launches()
            .into_iter()
            .filter(|launch| launch.workflow == workflow)
            .collect()
    }
}

#[async_trait]
impl EngineLauncher for ScriptedEngine {
    async fn launch(&self, invocation: &EngineInvocation) -> std::io::Result<ProcessExit> {
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation.clone());
        Ok(self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(ProcessExit::Success))
    }
}

/// Helper tool fake that always succeeds.
#[derive(Default)]
pub struct RecordingTools {
    seen: Mutex<Vec<ToolCommand>>,
}

impl RecordingTools {
    /// Number of tool runs so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl ToolLauncher for RecordingTools {
    async fn run(&self, command: &ToolCommand) -> std::io::Result<ProcessExit> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.clone());
        Ok(ProcessExit::Success)
    }
}

/// One brokered analysis of the fixture.
pub struct Grouping {
    pub alias: &'static str,
    pub analysis: &'static str,
    pub assembly: &'static str,
    pub vcf: &'static str,
    pub file_id: i64,
    pub assembly_set_id: i64,
}

/// The single-grouping chicken submission most scenarios use.
pub const ONE_GROUPING: &[Grouping] = &[Grouping {
    alias: "a1",
    analysis: "ERZ1",
    assembly: "GCA_1",
    vcf: "one.vcf.gz",
    file_id: 10,
    assembly_set_id: 5,
}];

/// Two analyses on two assemblies.
pub const TWO_GROUPINGS: &[Grouping] = &[
    Grouping {
        alias: "a1",
        analysis: "ERZ1",
        assembly: "GCA_1",
        vcf: "one.vcf.gz",
        file_id: 10,
        assembly_set_id: 5,
    },
    Grouping {
        alias: "a2",
        analysis: "ERZ2",
        assembly: "GCA_2",
        vcf: "two.vcf.gz",
        file_id: 20,
        assembly_set_id: 6,
    },
];

/// Temporary workspace with a ready-to-ingest checkpoint.
pub struct Fixture {
    pub tmp: TempDir,
    pub checkpoint: PathBuf,
    pub config: IngestConfig,
}

impl Fixture {
    /// Fixture for the one-grouping submission.
    ///
    /// # Panics
    ///
    /// Panics if the temporary files cannot be written.
    #[must_use]
    pub fn new() -> Self {
        Self::with_groupings(ONE_GROUPING)
    }

    /// Fixture declaring `groupings`, with their VCF and index files on disk.
    ///
    /// # Panics
    ///
    /// Panics if the temporary files cannot be written.
    #[must_use]
    pub fn with_groupings(groupings: &[Grouping]) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();

        let inputs = root.join("brokered");
        std::fs::create_dir_all(&inputs).unwrap();
        for grouping in groupings {
            std::fs::write(inputs.join(grouping.vcf), b"vcf").unwrap();
            std::fs::write(inputs.join(format!("{}.csi", grouping.vcf)), b"csi").unwrap();
        }

        let workflows_dir = root.join("workflows");
        std::fs::create_dir_all(&workflows_dir).unwrap();
        let load_from_ena = root.join("load_from_ena.pl");
        std::fs::write(&load_from_ena, b"#!/usr/bin/env perl\n").unwrap();
        std::fs::create_dir_all(root.join("ftp")).unwrap();

        let checkpoint = root.join("eloads/ELOAD_42/checkpoint.json");
        std::fs::create_dir_all(checkpoint.parent().unwrap()).unwrap();
        let document = submission_document(&inputs, groupings);
        std::fs::write(&checkpoint, serde_json::to_vec_pretty(&document).unwrap()).unwrap();

        let mut config = IngestConfig {
            projects_dir: root.join("projects"),
            public_ftp_dir: Some(root.join("ftp")),
            ..IngestConfig::default()
        };
        config.engine.workflows_dir = workflows_dir;
        config.tools.load_from_ena = Some(load_from_ena);

        Self {
            tmp,
            checkpoint,
            config,
        }
    }

    /// Layout of the fixture project.
    #[must_use]
    pub fn layout(&self) -> ProjectLayout {
        ProjectLayout::new(&self.config.projects_dir, PROJECT)
    }

    /// Open the checkpoint from disk.
    ///
    /// # Panics
    ///
    /// Panics if the checkpoint cannot be read.
    #[must_use]
    pub fn store(&self) -> CheckpointStore {
        CheckpointStore::open(&self.checkpoint).unwrap()
    }

    /// Stage record as persisted on disk.
    ///
    /// # Panics
    ///
    /// Panics if the checkpoint cannot be read.
    #[must_use]
    pub fn record(&self, stage: Stage) -> StageRecord {
        self.store().stage_record(stage).unwrap()
    }

    /// Run one ingestion against a freshly opened checkpoint, the way a new
    /// process would.
    ///
    /// # Panics
    ///
    /// Panics if the checkpoint cannot be opened.
    pub async fn ingest(
        &self,
        catalog: &MemoryCatalog,
        engine: &ScriptedEngine,
        tools: &RecordingTools,
        request: &IngestRequest,
    ) -> Result<IngestReport, IngestionError> {
        let mut store = self.store();
        Orchestrator::new(catalog, engine, tools, &self.config)
            .ingest(&mut store, request)
            .await
    }
}

/// Request for `stages` with the instance ids every stage may need.
#[must_use]
pub fn request(stages: &[Stage], resume: bool) -> IngestRequest {
    IngestRequest {
        stages: stages.to_vec(),
        options: RunOptions {
            instance_id: Some(1),
            clustering_instance_id: Some(2),
            vep_cache_assembly_name: None,
            resume,
        },
    }
}

fn submission_document(inputs: &Path, groupings: &[Grouping]) -> Value {
    let submitted: serde_json::Map<String, Value> = groupings
        .iter()
        .map(|g| (g.alias.to_string(), json!({"assembly_accession": g.assembly})))
        .collect();
    let accessions: serde_json::Map<String, Value> = groupings
        .iter()
        .map(|g| (g.alias.to_string(), json!(g.analysis)))
        .collect();
    let brokered: serde_json::Map<String, Value> = groupings
        .iter()
        .map(|g| {
            let vcf = inputs.join(g.vcf);
            let csi = inputs.join(format!("{}.csi", g.vcf));
            (
                g.alias.to_string(),
                json!({
                    "assembly_accession": g.assembly,
                    "assembly_fasta": format!("/ref/{}.fa", g.assembly),
                    "assembly_report": format!("/ref/{}_report.txt", g.assembly),
                    "vcf_files": {vcf.display().to_string(): {"csi": csi}},
                }),
            )
        })
        .collect();
    let aggregation: serde_json::Map<String, Value> = groupings
        .iter()
        .map(|g| (g.alias.to_string(), json!("none")))
        .collect();

    json!({
        "submission": {
            "taxonomy_id": 9031,
            "scientific_name": "Gallus gallus",
            "analyses": submitted,
        },
        "brokering": {
            "ena": {
                "PROJECT": PROJECT,
                "ANALYSIS": accessions,
                "hold_date": "2026-03-04",
            },
            "analyses": brokered,
        },
        "validation": {
            "aggregation_check": {"analyses": aggregation},
        },
    })
}

/// Catalog snapshot matching `groupings`: chicken assemblies with their
/// databases, one analysis per grouping and a single project row.
#[must_use]
pub fn snapshot(groupings: &[Grouping]) -> CatalogSnapshot {
    CatalogSnapshot {
        assemblies: groupings
            .iter()
            .map(|g| AssemblyEntry {
                accession: g.assembly.to_string(),
                taxonomy_id: 9031,
                db_name: Some(format!("eva_gg_{}", g.assembly.to_lowercase())),
                assembly_set_id: Some(g.assembly_set_id),
            })
            .collect(),
        analyses: groupings
            .iter()
            .map(|g| AnalysisEntry {
                accession: g.analysis.to_string(),
                project_accession: PROJECT.to_string(),
                assembly_set_id: Some(g.assembly_set_id),
                vcf_reference_accession: Some(g.assembly.to_string()),
                files: vec![CatalogFile {
                    file_id: g.file_id,
                    filename: g.vcf.to_string(),
                    file_type: "vcf".into(),
                    ..CatalogFile::default()
                }],
            })
            .collect(),
        projects: vec![ProjectEntry {
            accession: PROJECT.to_string(),
            title: "Chicken variation".into(),
        }],
        ..CatalogSnapshot::default()
    }
}

/// Catalog for the one-grouping submission.
#[must_use]
pub fn catalog() -> MemoryCatalog {
    MemoryCatalog::new(snapshot(ONE_GROUPING))
}
