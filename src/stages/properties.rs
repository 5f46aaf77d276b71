//! Java `.properties` files consumed by the remapping and clustering jobs.

use super::StageError;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

/// Ordered `key=value` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertiesFile {
    entries: BTreeMap<String, String>,
}

impl PropertiesFile {
    /// Empty file.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a property.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.entries.insert(key.into(), value.to_string());
        self
    }

    /// Value of a property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// File contents, one property per line, keys sorted.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            let _ = writeln!(out, "{}={}", escape(key, true), escape(value, false));
        }
        out
    }

    /// Write the file, replacing any previous version.
    ///
    /// # Errors
    ///
    /// Returns `StageError::Io` if the file cannot be written.
    pub fn write(&self, path: &Path) -> Result<(), StageError> {
        std::fs::write(path, self.render()).map_err(StageError::io("writing", path))
    }
}

fn escape(raw: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '=' | ':' | ' ' if is_key => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}
