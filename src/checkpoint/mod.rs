//! Durable checkpoint document.
//!
//! The checkpoint is one JSON document per unit of work. Earlier phases own
//! the `submission`, `brokering` and `validation` sections; ingestion owns
//! the `ingestion` section, including the stage records at
//! `ingestion.stages.<stage>`.
//!
//! Every flush writes a temporary file in the same directory, syncs it and
//! renames it over the previous document, so readers only ever see a fully
//! written document.

use crate::models::{Stage, StageRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Top-level section owned by ingestion.
pub const INGESTION_SECTION: &str = "ingestion";

/// Errors raised by the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Reading or writing the document failed.
    #[error("checkpoint I/O error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file exists but is not valid JSON.
    #[error("checkpoint {path} is not a valid document: {source}")]
    Parse {
        /// File involved.
        path: PathBuf,
        /// Parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A value on the path is not an object, so no child can be set below it.
    #[error("checkpoint key '{0}' holds a non-object value")]
    NotAnObject(String),

    /// `set` was called with an empty path.
    #[error("empty checkpoint key path")]
    EmptyPath,

    /// A value could not be converted to or from its typed form.
    #[error("checkpoint value at '{key}' has an unexpected shape: {source}")]
    Shape {
        /// Dotted key.
        key: String,
        /// Conversion error.
        #[source]
        source: serde_json::Error,
    },

    /// The temporary file could not replace the document.
    #[error("failed to replace checkpoint {path}: {source}")]
    Persist {
        /// Destination.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Hierarchical document loaded from, and flushed to, one file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    document: Value,
}

impl CheckpointStore {
    /// Load a checkpoint.
    ///
    /// A missing or empty file yields an empty document.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointError::Parse` if the file holds invalid JSON, or
    /// `CheckpointError::Io` if it cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Value::Object(Map::new()),
            Ok(content) => {
                serde_json::from_str(&content).map_err(|source| CheckpointError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Value::Object(Map::new()),
            Err(source) => return Err(CheckpointError::Io { path, source }),
        };
        debug!(path = %path.display(), "loaded checkpoint");
        Ok(Self { path, document })
    }

    /// In-memory store that has never been flushed.
    #[must_use]
    pub fn from_document(path: impl Into<PathBuf>, document: Value) -> Self {
        Self {
            path: path.into(),
            document,
        }
    }

    /// Path of the document on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the document.
    #[must_use]
    pub fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// The whole document.
    #[must_use]
    pub const fn document(&self) -> &Value {
        &self.document
    }

    /// Value at `path`, if every level exists.
    #[must_use]
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.document, |node, key| node.get(*key))
            .filter(|v| !v.is_null())
    }

    /// Typed value at `path`.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointError::Shape` if the value does not decode as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, path: &[&str]) -> Result<Option<T>> {
        self.get(path)
            .map(|v| {
                serde_json::from_value(v.clone()).map_err(|source| CheckpointError::Shape {
                    key: path.join("."),
                    source,
                })
            })
            .transpose()
    }

    /// Set the value at `path`, creating intermediate objects.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointError::NotAnObject` if an intermediate level holds a
    /// scalar or array, and `CheckpointError::Shape` if `value` cannot be
    /// serialized.
    pub fn set(&mut self, path: &[&str], value: impl Serialize) -> Result<()> {
        let (leaf, parents) = path.split_last().ok_or(CheckpointError::EmptyPath)?;
        let value = serde_json::to_value(value).map_err(|source| CheckpointError::Shape {
            key: path.join("."),
            source,
        })?;

        if !self.document.is_object() {
            if self.document.is_null() {
                self.document = Value::Object(Map::new());
            } else {
                return Err(CheckpointError::NotAnObject(String::new()));
            }
        }

        let mut node = &mut self.document;
        for (depth, key) in parents.iter().enumerate() {
            let Value::Object(map) = node else {
                return Err(CheckpointError::NotAnObject(parents[..depth].join(".")));
            };
            let child = map
                .entry((*key).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if child.is_null() {
                *child = Value::Object(Map::new());
            }
            node = child;
        }

        match node {
            Value::Object(map) => {
                map.insert((*leaf).to_string(), value);
                Ok(())
            }
            _ => Err(CheckpointError::NotAnObject(parents.join("."))),
        }
    }

    /// Remove the value at `path`, returning it.
    pub fn remove(&mut self, path: &[&str]) -> Option<Value> {
        let (leaf, parents) = path.split_last()?;
        let mut node = &mut self.document;
        for key in parents {
            node = node.get_mut(*key)?;
        }
        node.as_object_mut()?.remove(*leaf)
    }

    /// Atomically write the document to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be written or renamed.
    /// The previous document is left untouched in that case.
    pub fn flush(&self) -> Result<()> {
        let dir = self.dir();
        let io_err = |source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };

        std::fs::create_dir_all(dir).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        let bytes = serde_json::to_vec_pretty(&self.document).map_err(|source| {
            CheckpointError::Shape {
                key: String::new(),
                source,
            }
        })?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path)
            .map_err(|e| CheckpointError::Persist {
                path: self.path.clone(),
                source: e.error,
            })?;

        debug!(path = %self.path.display(), "flushed checkpoint");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Stage records
    // ---------------------------------------------------------------------

    /// Record for `stage`, or a pending record if none is stored.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointError::Shape` if the stored record is malformed.
    pub fn stage_record(&self, stage: Stage) -> Result<StageRecord> {
        Ok(self
            .get_as(&[INGESTION_SECTION, "stages", stage.as_str()])?
            .unwrap_or_default())
    }

    /// Store a stage record in memory.
    ///
    /// # Errors
    ///
    /// See [`CheckpointStore::set`].
    pub fn put_stage_record(&mut self, stage: Stage, record: &StageRecord) -> Result<()> {
        self.set(&[INGESTION_SECTION, "stages", stage.as_str()], record)
    }

    /// Store a stage record and flush.
    ///
    /// # Errors
    ///
    /// See [`CheckpointStore::set`] and [`CheckpointStore::flush`].
    pub fn commit_stage(&mut self, stage: Stage, record: &StageRecord) -> Result<()> {
        self.put_stage_record(stage, record)?;
        self.flush()
    }

    /// Every stored stage record.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointError::Shape` if a stored record is malformed.
    pub fn stage_records(&self) -> Result<BTreeMap<Stage, StageRecord>> {
        Stage::ALL
            .iter()
            .filter(|stage| {
                self.get(&[INGESTION_SECTION, "stages", stage.as_str()])
                    .is_some()
            })
            .map(|&stage| Ok((stage, self.stage_record(stage)?)))
            .collect()
    }

    /// Value under the `ingestion` section.
    #[must_use]
    pub fn ingestion(&self, path: &[&str]) -> Option<&Value> {
        let mut full = Vec::with_capacity(path.len() + 1);
        full.push(INGESTION_SECTION);
        full.extend_from_slice(path);
        self.get(&full)
    }

    /// Set a value under the `ingestion` section.
    ///
    /// # Errors
    ///
    /// See [`CheckpointStore::set`].
    pub fn set_ingestion(&mut self, path: &[&str], value: impl Serialize) -> Result<()> {
        let mut full = Vec::with_capacity(path.len() + 1);
        full.push(INGESTION_SECTION);
        full.extend_from_slice(path);
        self.set(&full, value)
    }
}
