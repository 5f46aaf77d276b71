//! Ingest manifest: one CSV row per input VCF.
//!
//! The accession and variant load workflows read the file list, assembly,
//! database binding and annotation versions from here rather than from the
//! checkpoint.

use super::StageError;
use crate::checkpoint::CheckpointStore;
use crate::models::UnitOfWork;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name of the manifest, written next to the checkpoint.
pub const INGEST_MANIFEST_FILE: &str = "vcf_files_to_ingest.csv";

/// One manifest row. Field order is column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestRow {
    /// Input VCF.
    pub vcf_file: String,
    /// Assembly the file is aligned to.
    pub assembly_accession: String,
    /// Reference FASTA.
    pub fasta: Option<String>,
    /// Assembly report.
    pub report: Option<String>,
    /// Brokered analysis accession.
    pub analysis_accession: Option<String>,
    /// Variant warehouse database.
    pub db_name: Option<String>,
    /// VEP release, empty when annotation is skipped.
    pub vep_version: Option<u32>,
    /// VEP cache release, empty when annotation is skipped.
    pub vep_cache_version: Option<u32>,
    /// VEP species, empty when annotation is skipped.
    pub vep_species: Option<String>,
    /// Aggregation classification.
    pub aggregation: Option<String>,
}

fn display(path: Option<&PathBuf>) -> Option<String> {
    path.map(|p| p.display().to_string())
}

/// Build the manifest rows from the unit of work and the recorded bindings.
///
/// # Errors
///
/// Returns `StageError::Checkpoint` if a recorded value has the wrong shape.
pub fn manifest_rows(
    store: &CheckpointStore,
    unit: &UnitOfWork,
) -> Result<Vec<ManifestRow>, StageError> {
    let mut rows = Vec::new();
    for grouping in &unit.groupings {
        if grouping.files.is_empty() {
            warn!(analysis = %grouping.alias, "VCF files for analysis not found");
            continue;
        }
        let assembly = grouping.assembly_accession.as_str();
        let db_name: Option<String> =
            store.get_as(&["ingestion", "database", assembly, "db_name"])?;

        let version: Option<u32> = store.get_as(&["ingestion", "vep", assembly, "version"])?;
        let cache_version: Option<u32> =
            store.get_as(&["ingestion", "vep", assembly, "cache_version"])?;
        let (vep_version, vep_cache_version, vep_species) = match (version, cache_version) {
            (Some(v), Some(c)) => (
                Some(v),
                Some(c),
                store.get_as(&["ingestion", "vep", assembly, "species"])?,
            ),
            _ => (None, None, None),
        };

        let aggregation = match &grouping.analysis_accession {
            Some(accession) => store.get_as(&["ingestion", "aggregation", accession.as_str()])?,
            None => None,
        };

        for file in &grouping.files {
            rows.push(ManifestRow {
                vcf_file: file.path.display().to_string(),
                assembly_accession: grouping.assembly_accession.clone(),
                fasta: display(grouping.assembly_fasta.as_ref()),
                report: display(grouping.assembly_report.as_ref()),
                analysis_accession: grouping.analysis_accession.clone(),
                db_name: db_name.clone(),
                vep_version,
                vep_cache_version,
                vep_species: vep_species.clone(),
                aggregation: aggregation.clone(),
            });
        }
    }
    Ok(rows)
}

/// Write the manifest next to the checkpoint and return its path.
///
/// # Errors
///
/// Returns `StageError::Manifest` if the CSV cannot be written.
pub fn write_ingest_manifest(
    store: &CheckpointStore,
    unit: &UnitOfWork,
) -> Result<PathBuf, StageError> {
    let path = store.dir().join(INGEST_MANIFEST_FILE);
    let rows = manifest_rows(store, unit)?;
    write_rows(&path, &rows)?;
    info!(path = %path.display(), rows = rows.len(), "wrote ingest manifest");
    Ok(path)
}

fn write_rows(path: &Path, rows: &[ManifestRow]) -> Result<(), StageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(StageError::io("creating", parent))?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    if rows.is_empty() {
        writer.write_record([
            "vcf_file",
            "assembly_accession",
            "fasta",
            "report",
            "analysis_accession",
            "db_name",
            "vep_version",
            "vep_cache_version",
            "vep_species",
            "aggregation",
        ])?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(StageError::io("writing", path))?;
    Ok(())
}
