//! Ephemeral staging directories for bundle repacking.
//!
//! A run owns two fixed-name directories under `temp_root`: a staging copy of
//! the source bundles and an extraction/result directory. [`TempWorkspace`]
//! is the guard for both. Acquiring it clears anything an interrupted run
//! left behind, the directories themselves are created on first use, and
//! they are removed by [`TempWorkspace::teardown`] or, failing that, on drop.

use std::io;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::PipelineError;
use crate::paths::{result_path, staging_path};

/// Scoped owner of the staging and result directories.
#[derive(Debug)]
pub struct TempWorkspace {
    staging: PathBuf,
    result: PathBuf,
    released: bool,
}

impl TempWorkspace {
    /// Take ownership of the workspace directories for this run.
    ///
    /// # Errors
    ///
    /// Returns an error if leftovers from a previous run cannot be removed.
    pub fn acquire(config: &Config) -> Result<Self, PipelineError> {
        Self::at(staging_path(config), result_path(config))
    }

    /// Take ownership of two explicit directories.
    ///
    /// # Errors
    ///
    /// Returns an error if either directory exists and cannot be removed.
    pub fn at(staging: PathBuf, result: PathBuf) -> Result<Self, PipelineError> {
        remove_dir_if_exists(&staging)?;
        remove_dir_if_exists(&result)?;
        tracing::debug!(staging = %staging.display(), result = %result.display(), "workspace acquired");
        Ok(Self {
            staging,
            result,
            released: false,
        })
    }

    /// Staging directory path (may not exist yet).
    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    /// Result directory path (may not exist yet).
    pub fn result_path(&self) -> &Path {
        &self.result
    }

    /// Staging directory, created if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn staging_dir(&self) -> Result<&Path, PipelineError> {
        ensure_dir(&self.staging)?;
        Ok(&self.staging)
    }

    /// Result directory, created if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn result_dir(&self) -> Result<&Path, PipelineError> {
        ensure_dir(&self.result)?;
        Ok(&self.result)
    }

    /// Remove both directories.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory exists and cannot be removed. The
    /// guard still will not retry on drop.
    pub fn teardown(mut self) -> Result<(), PipelineError> {
        self.released = true;
        remove_dir_if_exists(&self.staging)?;
        remove_dir_if_exists(&self.result)?;
        tracing::debug!("workspace released");
        Ok(())
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = remove_dir_if_exists(&self.staging) {
            tracing::warn!("workspace cleanup failed: {e}");
        }
        if let Err(e) = remove_dir_if_exists(&self.result) {
            tracing::warn!("workspace cleanup failed: {e}");
        }
    }
}

/// Create `path` and its parents unless it already exists.
///
/// # Errors
///
/// Returns an error if creation fails.
pub fn ensure_dir(path: &Path) -> Result<(), PipelineError> {
    std::fs::create_dir_all(path).map_err(|e| PipelineError::fs("Create directory", path, e))
}

/// Remove a directory tree; absent paths are not an error.
///
/// # Errors
///
/// Returns an error if the path exists and cannot be removed.
pub fn remove_dir_if_exists(path: &Path) -> Result<(), PipelineError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::fs("Remove directory", path, e)),
    }
}
