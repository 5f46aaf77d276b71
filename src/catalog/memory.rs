//! In-memory catalog backed by a JSON snapshot.

use super::{BrowsableFile, CatalogError, InsertOutcome, MetadataCatalog, Result, VepVersions};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Assembly known to the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyEntry {
    /// Assembly accession.
    pub accession: String,
    /// Taxonomy the assembly belongs to.
    pub taxonomy_id: u32,
    /// Variant warehouse database for this pair.
    #[serde(default)]
    pub db_name: Option<String>,
    /// Assembly set row, once registered.
    #[serde(default)]
    pub assembly_set_id: Option<i64>,
}

/// File attached to an analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogFile {
    /// File id.
    pub file_id: i64,
    /// ENA submission file id.
    #[serde(default)]
    pub ena_submission_file_id: Option<String>,
    /// File name.
    pub filename: String,
    /// File type (`vcf`, `tabix`, ...).
    pub file_type: String,
    /// Public FTP path.
    #[serde(default)]
    pub ftp_file: Option<String>,
}

/// Analysis row with its files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisEntry {
    /// Analysis accession.
    pub accession: String,
    /// Owning project.
    pub project_accession: String,
    /// Recorded assembly set.
    #[serde(default)]
    pub assembly_set_id: Option<i64>,
    /// Assembly the VCFs reference.
    #[serde(default)]
    pub vcf_reference_accession: Option<String>,
    /// Attached files.
    #[serde(default)]
    pub files: Vec<CatalogFile>,
}

/// Project row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEntry {
    /// Project accession.
    pub accession: String,
    /// Study title.
    pub title: String,
}

/// Supported assembly tracker row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedAssembly {
    /// Taxonomy.
    pub taxonomy_id: u32,
    /// Assembly accession.
    pub assembly_accession: String,
    /// Whether this is the current target.
    #[serde(default)]
    pub current: bool,
}

/// Browsable file row with its load bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowsableRow {
    /// Identity columns.
    #[serde(flatten)]
    pub file: BrowsableFile,
    /// Set once the project is ingested.
    #[serde(default)]
    pub loaded: bool,
    /// Release date, `YYYYMMDD`.
    #[serde(default)]
    pub eva_release: Option<String>,
    /// Assembly the file was loaded against.
    #[serde(default)]
    pub loaded_assembly: Option<String>,
}

/// Serializable catalog contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// Assemblies.
    #[serde(default)]
    pub assemblies: Vec<AssemblyEntry>,
    /// Analyses.
    #[serde(default)]
    pub analyses: Vec<AnalysisEntry>,
    /// Projects.
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
    /// Supported assembly tracker.
    #[serde(default)]
    pub supported_assemblies: Vec<SupportedAssembly>,
    /// Annotation versions per assembly.
    #[serde(default)]
    pub vep: BTreeMap<String, VepVersions>,
    /// Provisioned variant warehouse databases.
    #[serde(default)]
    pub provisioned_databases: BTreeSet<String>,
    /// Browsable file rows.
    #[serde(default)]
    pub browsable_files: Vec<BrowsableRow>,
    /// Number of study browser refreshes.
    #[serde(default)]
    pub study_browser_refreshes: u32,
}

#[derive(Debug, Default)]
struct State {
    snapshot: CatalogSnapshot,
    calls: BTreeMap<&'static str, usize>,
}

/// Catalog held in memory, loadable from and persistable to a JSON file.
///
/// Counts calls per operation so callers can check how often a lookup ran.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<State>,
}

impl MemoryCatalog {
    /// Create a catalog from a snapshot.
    #[must_use]
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            state: Mutex::new(State {
                snapshot,
                calls: BTreeMap::new(),
            }),
        }
    }

    /// Load a snapshot file.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Snapshot` if the file is unreadable or malformed.
    pub fn load(path: &Path) -> Result<Self> {
        let snapshot_err = |message: String| CatalogError::Snapshot {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| snapshot_err(e.to_string()))?;
        let snapshot = serde_json::from_str(&content).map_err(|e| snapshot_err(e.to_string()))?;
        Ok(Self::new(snapshot))
    }

    /// Write the current contents back to a snapshot file.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Snapshot` if the file cannot be written.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        let json = serde_json::to_vec_pretty(&snapshot).map_err(|e| CatalogError::Snapshot {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, json).map_err(|e| CatalogError::Snapshot {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> CatalogSnapshot {
        self.lock().snapshot.clone()
    }

    /// How many times `operation` was called.
    #[must_use]
    pub fn call_count(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Loaded assembly recorded for a browsable file.
    #[must_use]
    pub fn loaded_assembly(&self, file_id: i64) -> Option<String> {
        self.lock()
            .snapshot
            .browsable_files
            .iter()
            .find(|row| row.file.file_id == file_id)
            .and_then(|row| row.loaded_assembly.clone())
    }

    /// Release date recorded for a browsable file.
    #[must_use]
    pub fn release_date(&self, file_id: i64) -> Option<String> {
        self.lock()
            .snapshot
            .browsable_files
            .iter()
            .find(|row| row.file.file_id == file_id)
            .and_then(|row| row.eva_release.clone())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, operation: &'static str) -> MutexGuard<'_, State> {
        let mut state = self.lock();
        *state.calls.entry(operation).or_insert(0) += 1;
        state
    }
}

fn expected_rows(snapshot: &CatalogSnapshot, project_accession: &str) -> Vec<BrowsableFile> {
    snapshot
        .analyses
        .iter()
        .filter(|a| a.project_accession == project_accession)
        .flat_map(|a| {
            a.files
                .iter()
                .filter(|f| f.file_type.eq_ignore_ascii_case("vcf"))
                .map(|f| BrowsableFile {
                    file_id: f.file_id,
                    ena_submission_file_id: f.ena_submission_file_id.clone(),
                    filename: f.filename.clone(),
                    project_accession: project_accession.to_string(),
                    assembly_set_id: a.assembly_set_id,
                })
        })
        .collect()
}

#[async_trait]
impl MetadataCatalog for MemoryCatalog {
    async fn resolve_database_name(
        &self,
        taxonomy_id: u32,
        assembly_accession: &str,
    ) -> Result<Option<String>> {
        let state = self.record("resolve_database_name");
        Ok(state
            .snapshot
            .assemblies
            .iter()
            .find(|a| a.accession == assembly_accession && a.taxonomy_id == taxonomy_id)
            .and_then(|a| a.db_name.clone()))
    }

    async fn insert_assembly_and_taxonomy(
        &self,
        taxonomy_id: u32,
        assembly_accession: &str,
    ) -> Result<InsertOutcome> {
        let mut state = self.record("insert_assembly_and_taxonomy");
        let next_id = state
            .snapshot
            .assemblies
            .iter()
            .filter_map(|a| a.assembly_set_id)
            .max()
            .unwrap_or(0)
            + 1;
        let assemblies = &mut state.snapshot.assemblies;
        match assemblies
            .iter_mut()
            .find(|a| a.accession == assembly_accession && a.taxonomy_id == taxonomy_id)
        {
            Some(entry) if entry.assembly_set_id.is_some() => Ok(InsertOutcome::AlreadyExists),
            Some(entry) => {
                entry.assembly_set_id = Some(next_id);
                Ok(InsertOutcome::Inserted)
            }
            None => {
                assemblies.push(AssemblyEntry {
                    accession: assembly_accession.to_string(),
                    taxonomy_id,
                    db_name: None,
                    assembly_set_id: Some(next_id),
                });
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn provision_variant_database(&self, db_name: &str) -> Result<InsertOutcome> {
        let mut state = self.record("provision_variant_database");
        if state
            .snapshot
            .provisioned_databases
            .insert(db_name.to_string())
        {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::AlreadyExists)
        }
    }

    async fn vep_versions(
        &self,
        _db_name: &str,
        assembly_accession: &str,
        cache_assembly_name: Option<&str>,
    ) -> Result<VepVersions> {
        let state = self.record("vep_versions");
        let key = cache_assembly_name.unwrap_or(assembly_accession);
        Ok(state.snapshot.vep.get(key).cloned().unwrap_or_default())
    }

    async fn assembly_set_id(&self, taxonomy_id: u32, assembly_accession: &str) -> Result<i64> {
        let state = self.record("assembly_set_id");
        let ids: Vec<i64> = state
            .snapshot
            .assemblies
            .iter()
            .filter(|a| a.accession == assembly_accession && a.taxonomy_id == taxonomy_id)
            .filter_map(|a| a.assembly_set_id)
            .collect();
        match ids.as_slice() {
            [id] => Ok(*id),
            [] => Err(CatalogError::Inconsistency(format!(
                "no assembly set for taxonomy {taxonomy_id} and assembly {assembly_accession}"
            ))),
            _ => Err(CatalogError::Inconsistency(format!(
                "{} assembly sets for taxonomy {taxonomy_id} and assembly {assembly_accession}",
                ids.len()
            ))),
        }
    }

    async fn analysis_assembly_set(&self, analysis_accession: &str) -> Result<Option<i64>> {
        let state = self.record("analysis_assembly_set");
        Ok(state
            .snapshot
            .analyses
            .iter()
            .find(|a| a.accession == analysis_accession)
            .and_then(|a| a.assembly_set_id))
    }

    async fn set_analysis_assembly_set(
        &self,
        analysis_accession: &str,
        assembly_set_id: i64,
    ) -> Result<()> {
        let mut state = self.record("set_analysis_assembly_set");
        let analysis = state
            .snapshot
            .analyses
            .iter_mut()
            .find(|a| a.accession == analysis_accession)
            .ok_or_else(|| {
                CatalogError::Inconsistency(format!("analysis {analysis_accession} not found"))
            })?;
        analysis.assembly_set_id = Some(assembly_set_id);
        Ok(())
    }

    async fn study_titles(&self, project_accession: &str) -> Result<Vec<String>> {
        let state = self.record("study_titles");
        Ok(state
            .snapshot
            .projects
            .iter()
            .filter(|p| p.accession == project_accession)
            .map(|p| p.title.clone())
            .collect())
    }

    async fn browsable_files(&self, project_accession: &str) -> Result<Vec<BrowsableFile>> {
        let state = self.record("browsable_files");
        Ok(state
            .snapshot
            .browsable_files
            .iter()
            .filter(|row| row.file.project_accession == project_accession)
            .map(|row| row.file.clone())
            .collect())
    }

    async fn expected_browsable_files(
        &self,
        project_accession: &str,
    ) -> Result<Vec<BrowsableFile>> {
        let state = self.record("expected_browsable_files");
        Ok(expected_rows(&state.snapshot, project_accession))
    }

    async fn insert_browsable_files(&self, project_accession: &str) -> Result<usize> {
        let mut state = self.record("insert_browsable_files");
        let expected = expected_rows(&state.snapshot, project_accession);
        let mut inserted = 0;
        for file in expected {
            if !state
                .snapshot
                .browsable_files
                .iter()
                .any(|row| row.file.file_id == file.file_id)
            {
                state.snapshot.browsable_files.push(BrowsableRow {
                    file,
                    ..BrowsableRow::default()
                });
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn mark_browsable_files_loaded(
        &self,
        project_accession: &str,
        release_date: Option<&str>,
    ) -> Result<()> {
        let mut state = self.record("mark_browsable_files_loaded");
        for row in state
            .snapshot
            .browsable_files
            .iter_mut()
            .filter(|row| row.file.project_accession == project_accession)
        {
            row.loaded = true;
            row.eva_release = release_date.map(str::to_string);
        }
        Ok(())
    }

    async fn set_ftp_path(&self, file_id: i64, ftp_path: &str) -> Result<()> {
        let mut state = self.record("set_ftp_path");
        for file in state
            .snapshot
            .analyses
            .iter_mut()
            .flat_map(|a| a.files.iter_mut())
            .filter(|f| f.file_id == file_id)
        {
            file.ftp_file = Some(ftp_path.to_string());
        }
        Ok(())
    }

    async fn file_assemblies(&self, project_accession: &str) -> Result<Vec<(i64, String)>> {
        let state = self.record("file_assemblies");
        let snapshot = &state.snapshot;
        Ok(snapshot
            .browsable_files
            .iter()
            .filter(|row| row.file.project_accession == project_accession)
            .filter_map(|row| {
                snapshot
                    .analyses
                    .iter()
                    .find(|a| a.files.iter().any(|f| f.file_id == row.file.file_id))
                    .and_then(|a| a.vcf_reference_accession.clone())
                    .map(|asm| (row.file.file_id, asm))
            })
            .collect())
    }

    async fn set_loaded_assembly(&self, file_id: i64, assembly_accession: &str) -> Result<()> {
        let mut state = self.record("set_loaded_assembly");
        for row in state
            .snapshot
            .browsable_files
            .iter_mut()
            .filter(|row| row.file.file_id == file_id)
        {
            row.loaded_assembly = Some(assembly_accession.to_string());
        }
        Ok(())
    }

    async fn refresh_study_browser(&self) -> Result<()> {
        let mut state = self.record("refresh_study_browser");
        state.snapshot.study_browser_refreshes += 1;
        Ok(())
    }

    async fn current_target_assemblies(&self, taxonomy_id: u32) -> Result<Vec<String>> {
        let state = self.record("current_target_assemblies");
        Ok(state
            .snapshot
            .supported_assemblies
            .iter()
            .filter(|s| s.taxonomy_id == taxonomy_id && s.current)
            .map(|s| s.assembly_accession.clone())
            .collect())
    }

    async fn assembly_taxonomy(&self, assembly_accession: &str) -> Result<u32> {
        let state = self.record("assembly_taxonomy");
        let taxonomies: BTreeSet<u32> = state
            .snapshot
            .assemblies
            .iter()
            .filter(|a| a.accession == assembly_accession)
            .map(|a| a.taxonomy_id)
            .collect();
        let mut iter = taxonomies.into_iter();
        match (iter.next(), iter.next()) {
            (Some(taxonomy), None) => Ok(taxonomy),
            (None, _) => Err(CatalogError::Inconsistency(format!(
                "no taxonomy recorded for assembly {assembly_accession}"
            ))),
            (Some(_), Some(_)) => Err(CatalogError::Inconsistency(format!(
                "assembly {assembly_accession} is recorded under several taxonomies"
            ))),
        }
    }
}
