//! Unit of Work and its read-only inputs.
//!
//! The unit is read from the `submission`, `brokering` and `validation`
//! sections that earlier phases wrote into the checkpoint document.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Taxonomy id for which no remapping or clustering is done.
pub const HUMAN_TAXONOMY_ID: u32 = 9606;

/// A section the unit of work needs is missing or malformed.
#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    /// Required section absent.
    #[error("checkpoint document has no '{0}' section")]
    MissingSection(&'static str),
    /// Section present but does not have the expected shape.
    #[error("malformed '{section}' section: {source}")]
    Malformed {
        /// Section name.
        section: &'static str,
        /// Decoding error.
        #[source]
        source: serde_json::Error,
    },
}

/// One input file with its optional index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    /// Path to the compressed VCF.
    pub path: PathBuf,
    /// Path to its CSI index.
    pub index: Option<PathBuf>,
}

impl InputFile {
    /// File name component, lossily converted.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A set of input files sharing one target assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisGrouping {
    /// Submitter's alias for the analysis.
    pub alias: String,
    /// Accession assigned by ENA during brokering.
    pub analysis_accession: Option<String>,
    /// Assembly accession the files are aligned to.
    pub assembly_accession: String,
    /// Reference FASTA.
    pub assembly_fasta: Option<PathBuf>,
    /// Assembly report.
    pub assembly_report: Option<PathBuf>,
    /// Input files.
    pub files: Vec<InputFile>,
}

/// Resolved mapping from (taxonomy, assembly) to a storage target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseBinding {
    /// Taxonomy id.
    pub taxonomy_id: u32,
    /// Assembly accession.
    pub assembly_accession: String,
    /// Variant warehouse database name.
    pub db_name: String,
}

/// One ingestion run's identity and inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWork {
    /// Run identifier (the submission's directory name).
    pub id: String,
    /// Project accession from brokering.
    pub project_accession: Option<String>,
    /// Taxonomy of the submission.
    pub taxonomy_id: u32,
    /// Scientific name of the species.
    pub scientific_name: Option<String>,
    /// Whether brokering attached analyses to a pre-existing project.
    pub existing_project: bool,
    /// Public release date from brokering, as written by that phase.
    pub hold_date: Option<String>,
    /// Analysis alias to analysis accession, as brokered.
    pub brokered_analyses: BTreeMap<String, String>,
    /// Analysis alias to assembly accession, as submitted.
    pub submitted_assemblies: BTreeMap<String, String>,
    /// Brokered analysis groupings.
    pub groupings: Vec<AnalysisGrouping>,
}

#[derive(Debug, Deserialize)]
struct SubmissionSection {
    taxonomy_id: u32,
    #[serde(default)]
    scientific_name: Option<String>,
    #[serde(default)]
    analyses: BTreeMap<String, SubmittedAnalysis>,
}

#[derive(Debug, Deserialize)]
struct SubmittedAnalysis {
    assembly_accession: String,
}

#[derive(Debug, Default, Deserialize)]
struct BrokeringSection {
    #[serde(default)]
    ena: EnaSection,
    #[serde(default)]
    analyses: BTreeMap<String, BrokeredAnalysis>,
}

#[derive(Debug, Default, Deserialize)]
struct EnaSection {
    #[serde(rename = "PROJECT", default)]
    project: Option<String>,
    #[serde(rename = "ANALYSIS", default)]
    analysis: BTreeMap<String, String>,
    #[serde(default)]
    existing_project: bool,
    #[serde(default)]
    hold_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BrokeredAnalysis {
    assembly_accession: String,
    #[serde(default)]
    assembly_fasta: Option<PathBuf>,
    #[serde(default)]
    assembly_report: Option<PathBuf>,
    #[serde(default)]
    vcf_files: Option<BTreeMap<PathBuf, BrokeredFile>>,
}

#[derive(Debug, Default, Deserialize)]
struct BrokeredFile {
    #[serde(default)]
    csi: Option<PathBuf>,
}

fn section<T: serde::de::DeserializeOwned>(
    document: &serde_json::Value,
    name: &'static str,
) -> Result<Option<T>, UnitOfWorkError> {
    match document.get(name) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|source| UnitOfWorkError::Malformed {
                section: name,
                source,
            }),
    }
}

impl UnitOfWork {
    /// Build the unit of work from a checkpoint document.
    ///
    /// Only the `submission` section is mandatory; a missing `brokering`
    /// section yields a unit with no groupings, which the precondition gate
    /// then reports.
    ///
    /// # Errors
    ///
    /// Returns `UnitOfWorkError` if `submission` is missing or a section is malformed.
    pub fn from_document(
        id: impl Into<String>,
        document: &serde_json::Value,
    ) -> Result<Self, UnitOfWorkError> {
        let submission: SubmissionSection = section(document, "submission")?
            .ok_or(UnitOfWorkError::MissingSection("submission"))?;
        let brokering: BrokeringSection = section(document, "brokering")?.unwrap_or_default();

        let groupings = brokering
            .analyses
            .into_iter()
            .map(|(alias, analysis)| {
                let files = analysis
                    .vcf_files
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(path, info)| InputFile {
                        path,
                        index: info.csi,
                    })
                    .collect();
                AnalysisGrouping {
                    analysis_accession: brokering.ena.analysis.get(&alias).cloned(),
                    alias,
                    assembly_accession: analysis.assembly_accession,
                    assembly_fasta: analysis.assembly_fasta,
                    assembly_report: analysis.assembly_report,
                    files,
                }
            })
            .collect();

        Ok(Self {
            id: id.into(),
            project_accession: brokering.ena.project,
            taxonomy_id: submission.taxonomy_id,
            scientific_name: submission.scientific_name,
            existing_project: brokering.ena.existing_project,
            hold_date: brokering.ena.hold_date,
            brokered_analyses: brokering.ena.analysis,
            submitted_assemblies: submission
                .analyses
                .into_iter()
                .map(|(alias, a)| (alias, a.assembly_accession))
                .collect(),
            groupings,
        })
    }

    /// Distinct assembly accessions named by the submission.
    #[must_use]
    pub fn assembly_accessions(&self) -> BTreeSet<String> {
        self.submitted_assemblies.values().cloned().collect()
    }

    /// Every brokered input file across groupings.
    pub fn input_files(&self) -> impl Iterator<Item = &InputFile> {
        self.groupings.iter().flat_map(|g| g.files.iter())
    }

    /// True when `candidate` has the same file name as a declared input.
    #[must_use]
    pub fn declares_file(&self, candidate: &Path) -> bool {
        let Some(name) = candidate.file_name() else {
            return false;
        };
        self.input_files().any(|f| f.path.file_name() == Some(name))
    }

    /// Release date as `YYYYMMDD`, from the brokering hold date.
    ///
    /// Accepts a plain date or an RFC 3339 timestamp.
    #[must_use]
    pub fn release_date(&self) -> Option<String> {
        let raw = self.hold_date.as_deref()?;
        let date = chrono::NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()?;
        Some(date.format("%Y%m%d").to_string())
    }
}
