//! Precondition gate.
//!
//! The checks here run before any stage executes. Each one looks at the unit
//! of work, the checkpoint document and the project's valid directory and
//! returns the violations it found. The gate runs all of them and fails with
//! every violation at once, so an operator can fix a submission in one pass.
//!
//! Idempotent setup that has to happen before stages run (database bindings,
//! annotation versions) lives in [`bindings`].

pub mod bindings;

pub use bindings::{fill_vep_versions, BindingResolver};

use crate::catalog::CatalogError;
use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::layout::LayoutError;
use crate::models::UnitOfWork;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::error;

/// Which check produced a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    /// Aggregation classification recorded during validation.
    Aggregation,
    /// Brokering produced files and a project accession.
    Brokering,
    /// Files in the valid directory are all declared.
    InputDrift,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Aggregation => "aggregation",
            Self::Brokering => "brokering",
            Self::InputDrift => "input drift",
        })
    }
}

/// One failed precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Check that failed.
    pub check: CheckKind,
    /// What is missing or wrong.
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.check, self.reason)
    }
}

/// Errors from the gate and from pre-stage setup.
#[derive(Debug, Error)]
pub enum PreconditionError {
    /// One or more checks failed.
    #[error("{} precondition(s) failed: {}", .0.len(), join_violations(.0))]
    Violations(Vec<Violation>),

    /// The catalog returned zero or several rows where one was expected.
    #[error("metadata inconsistency: {0}")]
    MetadataInconsistency(String),

    /// Catalog call failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Checkpoint read or write failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Project layout could not be prepared.
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Every brokered analysis has an aggregation classification from validation.
#[must_use]
pub fn check_aggregation(unit: &UnitOfWork, document: &Value) -> Vec<Violation> {
    unit.brokered_analyses
        .keys()
        .filter(|alias| aggregation_for(document, alias).is_none())
        .map(|alias| Violation {
            check: CheckKind::Aggregation,
            reason: format!(
                "aggregation type was not determined during validation for {alias} \
                 (rerun validation with the aggregation_check task)"
            ),
        })
        .collect()
}

/// Brokering produced at least one input file and a project accession.
#[must_use]
pub fn check_brokering(unit: &UnitOfWork) -> Vec<Violation> {
    let mut violations = Vec::new();
    if unit.input_files().next().is_none() {
        violations.push(Violation {
            check: CheckKind::Brokering,
            reason: "no brokered VCF files found".to_string(),
        });
    }
    if unit.project_accession.is_none() {
        violations.push(Violation {
            check: CheckKind::Brokering,
            reason: "no project accession recorded; check that brokering to ENA is done"
                .to_string(),
        });
    }
    violations
}

/// Every `*.vcf.gz` in the valid directory is declared by some grouping.
#[must_use]
pub fn check_input_drift(unit: &UnitOfWork, valid_vcfs: &[PathBuf]) -> Vec<Violation> {
    valid_vcfs
        .iter()
        .filter(|path| !unit.declares_file(path))
        .map(|path| Violation {
            check: CheckKind::InputDrift,
            reason: format!(
                "found {} in the valid folder that is not in the brokered analyses",
                path.display()
            ),
        })
        .collect()
}

fn aggregation_for<'a>(document: &'a Value, alias: &str) -> Option<&'a Value> {
    document
        .get("validation")?
        .get("aggregation_check")?
        .get("analyses")?
        .get(alias)
        .filter(|v| !v.is_null())
}

/// Runs the pre-stage checks and reports every violation together.
#[derive(Debug, Clone, Copy)]
pub struct PreconditionGate<'a> {
    unit: &'a UnitOfWork,
}

impl<'a> PreconditionGate<'a> {
    /// Gate for a unit of work.
    #[must_use]
    pub const fn new(unit: &'a UnitOfWork) -> Self {
        Self { unit }
    }

    /// Checks that do not need the project directory.
    #[must_use]
    pub fn document_violations(&self, document: &Value) -> Vec<Violation> {
        let mut violations = check_aggregation(self.unit, document);
        violations.extend(check_brokering(self.unit));
        violations
    }

    /// Run every check.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::Violations` listing everything that failed.
    pub fn evaluate(
        &self,
        document: &Value,
        valid_vcfs: &[PathBuf],
    ) -> Result<(), PreconditionError> {
        let mut violations = self.document_violations(document);
        violations.extend(check_input_drift(self.unit, valid_vcfs));
        if violations.is_empty() {
            return Ok(());
        }
        for violation in &violations {
            error!(check = %violation.check, "{}", violation.reason);
        }
        Err(PreconditionError::Violations(violations))
    }

    /// Copy each analysis' aggregation classification to
    /// `ingestion.aggregation.<analysis_accession>`.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointError` if the document cannot be updated.
    pub fn record_aggregation(&self, store: &mut CheckpointStore) -> Result<(), CheckpointError> {
        for (alias, accession) in &self.unit.brokered_analyses {
            if let Some(aggregation) = aggregation_for(store.document(), alias).cloned() {
                store.set_ingestion(&["aggregation", accession.as_str()], aggregation)?;
            }
        }
        Ok(())
    }
}
