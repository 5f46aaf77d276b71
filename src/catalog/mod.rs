//! Metadata catalog boundary.
//!
//! The catalog is the relational store that knows about assemblies,
//! taxonomies, analyses and browsable files. Every query either returns the
//! rows the caller expects or fails; ambiguous answers are reported as
//! [`CatalogError::Inconsistency`] and never resolved by picking a row.

mod memory;

pub use memory::{
    AnalysisEntry, AssemblyEntry, BrowsableRow, CatalogFile, CatalogSnapshot, MemoryCatalog,
    ProjectEntry, SupportedAssembly,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Zero or several rows where exactly one was expected.
    #[error("metadata inconsistency: {0}")]
    Inconsistency(String),

    /// The backing store failed.
    #[error("catalog backend error: {0}")]
    Backend(String),

    /// A catalog snapshot could not be read or written.
    #[error("catalog snapshot {path}: {message}")]
    Snapshot {
        /// Snapshot file.
        path: std::path::PathBuf,
        /// What went wrong.
        message: String,
    },
}

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Outcome of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Rows were created.
    Inserted,
    /// Matching rows were already present.
    AlreadyExists,
}

/// Annotation tool versions for one assembly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VepVersions {
    /// VEP release.
    pub version: Option<u32>,
    /// VEP cache release.
    pub cache_version: Option<u32>,
    /// Species name used by the cache.
    pub species: Option<String>,
}

/// Identity columns of a browsable file row.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BrowsableFile {
    /// Catalog file id.
    pub file_id: i64,
    /// ENA submission file id.
    pub ena_submission_file_id: Option<String>,
    /// File name.
    pub filename: String,
    /// Owning project.
    pub project_accession: String,
    /// Assembly set of the owning analysis.
    pub assembly_set_id: Option<i64>,
}

/// Operations ingestion performs against the metadata catalog.
#[async_trait]
pub trait MetadataCatalog: Send + Sync {
    /// Variant warehouse database name for a taxonomy and assembly.
    ///
    /// `Ok(None)` means the name could neither be found nor constructed.
    async fn resolve_database_name(
        &self,
        taxonomy_id: u32,
        assembly_accession: &str,
    ) -> Result<Option<String>>;

    /// Register the assembly and taxonomy, tolerating existing rows.
    async fn insert_assembly_and_taxonomy(
        &self,
        taxonomy_id: u32,
        assembly_accession: &str,
    ) -> Result<InsertOutcome>;

    /// Make sure the variant warehouse database exists.
    async fn provision_variant_database(&self, db_name: &str) -> Result<InsertOutcome>;

    /// Annotation versions to use for an assembly.
    async fn vep_versions(
        &self,
        db_name: &str,
        assembly_accession: &str,
        cache_assembly_name: Option<&str>,
    ) -> Result<VepVersions>;

    /// Assembly set for a taxonomy and assembly. Exactly one must exist.
    async fn assembly_set_id(&self, taxonomy_id: u32, assembly_accession: &str) -> Result<i64>;

    /// Assembly set currently recorded on an analysis.
    async fn analysis_assembly_set(&self, analysis_accession: &str) -> Result<Option<i64>>;

    /// Overwrite an analysis' assembly set.
    async fn set_analysis_assembly_set(
        &self,
        analysis_accession: &str,
        assembly_set_id: i64,
    ) -> Result<()>;

    /// Titles of every project row with this accession.
    async fn study_titles(&self, project_accession: &str) -> Result<Vec<String>>;

    /// Browsable file rows already present for a project.
    async fn browsable_files(&self, project_accession: &str) -> Result<Vec<BrowsableFile>>;

    /// Browsable file rows the project's VCF files should produce.
    async fn expected_browsable_files(&self, project_accession: &str)
        -> Result<Vec<BrowsableFile>>;

    /// Insert the expected browsable file rows. Returns the number inserted.
    async fn insert_browsable_files(&self, project_accession: &str) -> Result<usize>;

    /// Flag the project's browsable files as loaded, with a release date.
    async fn mark_browsable_files_loaded(
        &self,
        project_accession: &str,
        release_date: Option<&str>,
    ) -> Result<()>;

    /// Record the public FTP path of a file.
    async fn set_ftp_path(&self, file_id: i64, ftp_path: &str) -> Result<()>;

    /// `(file_id, assembly accession)` for each browsable file of a project.
    async fn file_assemblies(&self, project_accession: &str) -> Result<Vec<(i64, String)>>;

    /// Record the assembly a browsable file was loaded against.
    async fn set_loaded_assembly(&self, file_id: i64, assembly_accession: &str) -> Result<()>;

    /// Refresh the study browser view.
    async fn refresh_study_browser(&self) -> Result<()>;

    /// Assemblies currently supported for a taxonomy.
    async fn current_target_assemblies(&self, taxonomy_id: u32) -> Result<Vec<String>>;

    /// Taxonomy an assembly belongs to.
    async fn assembly_taxonomy(&self, assembly_accession: &str) -> Result<u32>;
}
