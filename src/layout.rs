//! Per-project filesystem layout.
//!
//! Every project lives under `<projects_dir>/<project_accession>` with a fixed
//! set of numbered subdirectories. Engine working directories are created
//! directly under the project root as `nextflow_<stage>_<uuid>`.

use crate::models::{Stage, UnitOfWork};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Prefix of engine working directories.
pub const WORK_DIR_PREFIX: &str = "nextflow_";

/// Filesystem error with the path that caused it.
#[derive(Debug, Error)]
#[error("{action} {path}: {source}")]
pub struct LayoutError {
    /// What was being done.
    pub action: &'static str,
    /// Path involved.
    pub path: PathBuf,
    /// Underlying error.
    #[source]
    pub source: std::io::Error,
}

impl LayoutError {
    fn new(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Named project subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectDir {
    /// Stage and engine logs.
    Logs,
    /// Validated input files.
    Valid,
    /// Transformed outputs.
    Transformed,
    /// Statistics.
    Stats,
    /// Annotation outputs.
    Annotation,
    /// Accessioning artifacts.
    Accessions,
    /// Remapping and clustering artifacts.
    Clustering,
    /// Publicly exposed files.
    Public,
    /// Externally submitted inputs.
    External,
    /// Retired outputs.
    Deprecated,
}

impl ProjectDir {
    /// Every subdirectory.
    pub const ALL: [Self; 10] = [
        Self::Logs,
        Self::Valid,
        Self::Transformed,
        Self::Stats,
        Self::Annotation,
        Self::Accessions,
        Self::Clustering,
        Self::Public,
        Self::External,
        Self::Deprecated,
    ];

    /// Directory name on disk.
    #[must_use]
    pub const fn dir_name(&self) -> &'static str {
        match self {
            Self::Logs => "00_logs",
            Self::Valid => "30_eva_valid",
            Self::Transformed => "40_transformed",
            Self::Stats => "50_stats",
            Self::Annotation => "51_annotation",
            Self::Accessions => "52_accessions",
            Self::Clustering => "53_clustering",
            Self::Public => "60_eva_public",
            Self::External => "70_external_submissions",
            Self::Deprecated => "80_deprecated",
        }
    }
}

/// Layout of one project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    /// Layout rooted at `<projects_dir>/<project_accession>`.
    #[must_use]
    pub fn new(projects_dir: &Path, project_accession: &str) -> Self {
        Self {
            root: projects_dir.join(project_accession),
        }
    }

    /// Layout rooted at an explicit directory.
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a named subdirectory.
    #[must_use]
    pub fn dir(&self, dir: ProjectDir) -> PathBuf {
        self.root.join(dir.dir_name())
    }

    /// Create the root and every subdirectory.
    ///
    /// # Errors
    ///
    /// Returns `LayoutError` if a directory cannot be created.
    pub fn prepare(&self) -> Result<(), LayoutError> {
        for dir in ProjectDir::ALL {
            let path = self.dir(dir);
            std::fs::create_dir_all(&path)
                .map_err(|e| LayoutError::new("creating", &path, e))?;
        }
        debug!(root = %self.root.display(), "project layout ready");
        Ok(())
    }

    /// Copy every declared input file and its index into the valid and public
    /// directories. Files already present are left alone.
    ///
    /// Returns the number of files copied.
    ///
    /// # Errors
    ///
    /// Returns `LayoutError` if a copy fails.
    pub fn stage_inputs(&self, unit: &UnitOfWork) -> Result<usize, LayoutError> {
        let targets = [self.dir(ProjectDir::Valid), self.dir(ProjectDir::Public)];
        let mut copied = 0;
        for file in unit.input_files() {
            match &file.index {
                Some(index) => {
                    for target in &targets {
                        copied += usize::from(copy_if_absent(&file.path, target)?);
                        copied += usize::from(copy_if_absent(index, target)?);
                    }
                }
                None => {
                    warn!(file = %file.path.display(), "no index recorded for input file");
                    for target in &targets {
                        copied += usize::from(copy_if_absent(&file.path, target)?);
                    }
                }
            }
        }
        info!(copied, "staged input files");
        Ok(copied)
    }

    /// `*.vcf.gz` files present in the valid directory.
    ///
    /// # Errors
    ///
    /// Returns `LayoutError` if the directory cannot be listed.
    pub fn valid_vcfs(&self) -> Result<Vec<PathBuf>, LayoutError> {
        let dir = self.dir(ProjectDir::Valid);
        let mut files = list_dir(&dir)?
            .into_iter()
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .is_some_and(|n| n.to_string_lossy().ends_with(".vcf.gz"))
            })
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }

    /// Fresh, not yet created, engine working directory for a stage.
    #[must_use]
    pub fn new_work_dir(&self, stage: Stage) -> PathBuf {
        self.root.join(format!(
            "{WORK_DIR_PREFIX}{}_{}",
            stage.as_str(),
            uuid::Uuid::new_v4().simple()
        ))
    }

    /// Engine working directories present under the project root.
    ///
    /// # Errors
    ///
    /// Returns `LayoutError` if the root cannot be listed.
    pub fn engine_work_dirs(&self) -> Result<Vec<PathBuf>, LayoutError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut dirs = list_dir(&self.root)?
            .into_iter()
            .filter(|p| {
                p.is_dir()
                    && p.file_name()
                        .is_some_and(|n| n.to_string_lossy().starts_with(WORK_DIR_PREFIX))
            })
            .collect::<Vec<_>>();
        dirs.sort();
        Ok(dirs)
    }
}

fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, LayoutError> {
    std::fs::read_dir(dir)
        .map_err(|e| LayoutError::new("listing", dir, e))?
        .map(|entry| {
            entry
                .map(|e| e.path())
                .map_err(|e| LayoutError::new("listing", dir, e))
        })
        .collect()
}

fn copy_if_absent(source: &Path, target_dir: &Path) -> Result<bool, LayoutError> {
    let Some(name) = source.file_name() else {
        return Ok(false);
    };
    let target = target_dir.join(name);
    if target.exists() {
        warn!(
            file = %name.to_string_lossy(),
            dir = %target_dir.display(),
            "already exists, not copying"
        );
        return Ok(false);
    }
    std::fs::copy(source, &target).map_err(|e| LayoutError::new("copying", source, e))?;
    Ok(true)
}
