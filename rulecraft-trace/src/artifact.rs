//! # Artifact Storage
//!
//! Named text blobs attached to a run. One flat namespace per run; writing an
//! existing name overwrites it.
//!
//! A run key is a `/`-separated path: a nested run's key extends its parent's,
//! so everything one refinement produces lives under a single top-level key.
//! Artifact names are limited to `[A-Za-z0-9._-]` in every backend so each name
//! maps to exactly one file.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Artifact backend trait
pub trait ArtifactStore: Send + Sync {
    fn write(&mut self, run: &str, name: &str, content: &str) -> Result<()>;
    fn read(&self, run: &str, name: &str) -> Option<String>;
    /// Artifact names for a run, sorted
    fn names(&self, run: &str) -> Vec<String>;
}

/// Reject names that are empty, dot-only or outside `[A-Za-z0-9._-]`
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::tracing(format!("invalid artifact name {:?}", name))
            .with_operation("artifacts::write")
            .with_context("artifact", name))
    }
}

/// In-memory artifacts (volatile, but useful for testing and `--no-persist`)
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifacts {
    data: HashMap<String, HashMap<String, String>>,
}

impl MemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for MemoryArtifacts {
    fn write(&mut self, run: &str, name: &str, content: &str) -> Result<()> {
        validate_name(name)?;
        self.data
            .entry(run.to_string())
            .or_default()
            .insert(name.to_string(), content.to_string());
        Ok(())
    }

    fn read(&self, run: &str, name: &str) -> Option<String> {
        self.data.get(run)?.get(name).cloned()
    }

    fn names(&self, run: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .data
            .get(run)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

/// File-backed artifacts
///
/// Structure:
/// ```text
/// {base_path}/
///   {run_uuid}/
///     artifacts/
///       {name}.txt
///     {child_run_uuid}/
///       artifacts/
///         {name}.txt
/// ```
pub struct FileArtifacts {
    base_path: PathBuf,
}

impl FileArtifacts {
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path).map_err(|e| {
            Error::storage_failed(format!("failed to create artifact dir {}", base_path.display()))
                .with_operation("artifacts::new")
                .set_source(e)
        })?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory for a run key; each `/` segment becomes one level
    pub fn run_dir(&self, run: &str) -> Result<PathBuf> {
        let mut dir = self.base_path.clone();
        for segment in run.split('/') {
            validate_name(segment).map_err(|e| e.with_context("run", run))?;
            dir.push(segment);
        }
        Ok(dir)
    }

    fn artifact_path(&self, run: &str, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.run_dir(run)?.join("artifacts").join(format!("{}.txt", name)))
    }
}

impl ArtifactStore for FileArtifacts {
    fn write(&mut self, run: &str, name: &str, content: &str) -> Result<()> {
        let path = self.artifact_path(run, name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::storage_failed(format!("failed to create {}", parent.display()))
                    .with_operation("artifacts::write")
                    .set_source(e)
            })?;
        }
        std::fs::write(&path, content).map_err(|e| {
            Error::storage_failed(format!("failed to write {}", path.display()))
                .with_operation("artifacts::write")
                .with_context("artifact", name)
                .set_source(e)
        })
    }

    fn read(&self, run: &str, name: &str) -> Option<String> {
        std::fs::read_to_string(self.artifact_path(run, name).ok()?).ok()
    }

    fn names(&self, run: &str) -> Vec<String> {
        let Ok(dir) = self.run_dir(run) else {
            return Vec::new();
        };
        let mut names: Vec<String> = std::fs::read_dir(dir.join("artifacts"))
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| {
                        let path = e.path();
                        if path.extension().map(|ext| ext == "txt").unwrap_or(false) {
                            path.file_stem()
                                .and_then(|s| s.to_str())
                                .map(|s| s.to_string())
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}
