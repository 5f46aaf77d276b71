//! Stage identifiers and per-stage records.
//!
//! A [`StageRecord`] is what the checkpoint document stores under
//! `ingestion.stages.<stage>`. Its [`StageState`] is a tagged state so that a
//! resumption token only exists in the states where it means something.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// A named ingestion stage.
///
/// Declaration order doubles as the tie-break order when several stages are
/// ready at once, so `accession` runs before `remap_and_cluster`, which runs
/// before `variant_load`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Load study/analysis metadata from ENA into the metadata catalog.
    MetadataLoad,
    /// Assign accessions to submitted variants.
    Accession,
    /// Remap to the current supported assembly and cluster.
    #[serde(alias = "optional_remap_and_cluster")]
    RemapAndCluster,
    /// Load variants (with annotation) into the variant warehouse.
    VariantLoad,
    /// Annotation-only pass over already loaded variants.
    Annotation,
}

impl Stage {
    /// Every stage, in tie-break order.
    pub const ALL: [Self; 5] = [
        Self::MetadataLoad,
        Self::Accession,
        Self::RemapAndCluster,
        Self::VariantLoad,
        Self::Annotation,
    ];

    /// Canonical snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MetadataLoad => "metadata_load",
            Self::Accession => "accession",
            Self::RemapAndCluster => "remap_and_cluster",
            Self::VariantLoad => "variant_load",
            Self::Annotation => "annotation",
        }
    }

    /// Stages that must be complete before this one may run.
    ///
    /// `remap_and_cluster` has no static dependency: whether it needs
    /// accessioned output is only known once its target assembly is.
    #[must_use]
    pub const fn depends_on(&self) -> &'static [Self] {
        match self {
            Self::MetadataLoad | Self::RemapAndCluster => &[],
            Self::Accession | Self::Annotation => &[Self::MetadataLoad],
            Self::VariantLoad => &[Self::MetadataLoad, Self::Accession],
        }
    }

    /// Name of the external engine workflow this stage launches, if any.
    ///
    /// `annotation` reuses the variant load workflow in annotation-only mode.
    #[must_use]
    pub const fn workflow_name(&self) -> Option<&'static str> {
        match self {
            Self::MetadataLoad => None,
            Self::Accession => Some("accession"),
            Self::RemapAndCluster => Some("remap_and_cluster"),
            Self::VariantLoad | Self::Annotation => Some("variant_load"),
        }
    }

    /// True when the stage reads the ingest manifest (files, bindings, VEP versions).
    #[must_use]
    pub const fn needs_ingest_manifest(&self) -> bool {
        matches!(self, Self::Accession | Self::VariantLoad | Self::Annotation)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown stage name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown stage '{0}' (expected one of metadata_load, accession, variant_load, annotation, remap_and_cluster)")]
pub struct ParseStageError(pub String);

impl FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "metadata_load" => Ok(Self::MetadataLoad),
            "accession" => Ok(Self::Accession),
            "remap_and_cluster" | "optional_remap_and_cluster" => Ok(Self::RemapAndCluster),
            "variant_load" => Ok(Self::VariantLoad),
            "annotation" => Ok(Self::Annotation),
            other => Err(ParseStageError(other.to_string())),
        }
    }
}

/// Coarse status of a stage, used for display and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Never started, or reset.
    Pending,
    /// Launched; the checkpoint has not seen the outcome yet.
    Running,
    /// The engine failed; its working directory is kept for resumption.
    Resumable,
    /// Finished successfully. Sticky.
    Complete,
    /// Deliberately not run (for example a cross-species remap).
    Skipped,
    /// Failed without anything to resume from.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Resumable => "resumable",
            Self::Complete => "complete",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tagged stage state.
///
/// The resumption token is the engine's working directory. `Complete` carries
/// no token, so "resume a completed stage" cannot be expressed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageState {
    /// Not started.
    #[default]
    Pending,
    /// In flight. In-process stages have no token.
    Running {
        /// Engine working directory, when the stage delegates to the engine.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resumption_token: Option<PathBuf>,
    },
    /// Engine exited non-zero; the working directory is preserved.
    Resumable {
        /// Engine working directory to resume from.
        resumption_token: PathBuf,
    },
    /// Done.
    Complete,
    /// Not run, with the reason recorded.
    Skipped {
        /// Why the stage was skipped.
        reason: String,
    },
    /// Failed with nothing to resume.
    Failed {
        /// Failure description.
        reason: String,
    },
}

impl StageState {
    /// Coarse status for this state.
    #[must_use]
    pub const fn status(&self) -> StageStatus {
        match self {
            Self::Pending => StageStatus::Pending,
            Self::Running { .. } => StageStatus::Running,
            Self::Resumable { .. } => StageStatus::Resumable,
            Self::Complete => StageStatus::Complete,
            Self::Skipped { .. } => StageStatus::Skipped,
            Self::Failed { .. } => StageStatus::Failed,
        }
    }

    /// The recorded working directory, if the state carries one.
    #[must_use]
    pub fn resumption_token(&self) -> Option<&Path> {
        match self {
            Self::Running {
                resumption_token: Some(token),
            }
            | Self::Resumable {
                resumption_token: token,
            } => Some(token.as_path()),
            _ => None,
        }
    }
}

/// Rejected stage transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal transition for stage record: {from} -> {to}")]
pub struct TransitionError {
    /// Status before the attempted transition.
    pub from: StageStatus,
    /// Requested status.
    pub to: StageStatus,
}

/// Persisted record of one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Current state.
    #[serde(default)]
    pub state: StageState,
    /// Named artifacts (instance ids, generated file paths, counts).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// Set when the engine completed but post-run bookkeeping has not.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending_finalize: bool,
    /// Number of launches (fresh or resumed).
    #[serde(default)]
    pub attempt: u32,
    /// When the current attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// When the record last changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl StageRecord {
    /// Create a pending record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Coarse status.
    #[must_use]
    pub const fn status(&self) -> StageStatus {
        self.state.status()
    }

    /// True once the stage has completed.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.state, StageState::Complete)
    }

    /// The recorded working directory, if any.
    #[must_use]
    pub fn resumption_token(&self) -> Option<&Path> {
        self.state.resumption_token()
    }

    /// Move to `Running`.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` when the stage is already complete.
    pub fn start(
        &mut self,
        resumption_token: Option<PathBuf>,
        now: impl Into<String>,
    ) -> Result<(), TransitionError> {
        if self.is_complete() {
            return Err(TransitionError {
                from: StageStatus::Complete,
                to: StageStatus::Running,
            });
        }
        let now = now.into();
        self.state = StageState::Running { resumption_token };
        self.attempt += 1;
        self.started_at = Some(now.clone());
        self.updated_at = Some(now);
        Ok(())
    }

    /// Move from `Running` with a token to `Resumable`, keeping the token.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` unless the stage is running with a token.
    pub fn suspend(&mut self, now: impl Into<String>) -> Result<(), TransitionError> {
        match &self.state {
            StageState::Running {
                resumption_token: Some(token),
            } => {
                self.state = StageState::Resumable {
                    resumption_token: token.clone(),
                };
                self.updated_at = Some(now.into());
                Ok(())
            }
            other => Err(TransitionError {
                from: other.status(),
                to: StageStatus::Resumable,
            }),
        }
    }

    /// Move from `Running` to `Complete`, dropping any token.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` unless the stage is running.
    pub fn complete(&mut self, now: impl Into<String>) -> Result<(), TransitionError> {
        if !matches!(self.state, StageState::Running { .. }) {
            return Err(TransitionError {
                from: self.status(),
                to: StageStatus::Complete,
            });
        }
        self.state = StageState::Complete;
        self.updated_at = Some(now.into());
        Ok(())
    }

    /// Record a failure with nothing to resume.
    pub fn fail(&mut self, reason: impl Into<String>, now: impl Into<String>) {
        self.state = StageState::Failed {
            reason: reason.into(),
        };
        self.updated_at = Some(now.into());
    }

    /// Record a deliberate skip.
    pub fn skip(&mut self, reason: impl Into<String>, now: impl Into<String>) {
        self.state = StageState::Skipped {
            reason: reason.into(),
        };
        self.updated_at = Some(now.into());
    }

    /// Return to `Pending`, forgetting any token. Outputs are kept.
    pub fn reset(&mut self, now: impl Into<String>) {
        self.state = StageState::Pending;
        self.pending_finalize = false;
        self.updated_at = Some(now.into());
    }
}
