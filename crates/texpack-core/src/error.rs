//! Error types for the compression pipeline.
//!
//! Failures come in two flavours. A [`PipelineError`] is structural (a bad
//! manifest, a missing source file, a corrupt zip) and stops the run. An
//! [`Issue`] is a content or tool failure that the stage records and steps
//! over; the driver collects them into the final report.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::ConfigError;

/// Unrecovered failure that halts the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The manifest is missing or is not a valid JSON array of entries.
    #[error("Manifest unreadable [{}]: {reason}", path.display())]
    ManifestUnreadable {
        /// Manifest location that was read.
        path: PathBuf,
        /// Underlying parse or IO failure.
        reason: String,
    },

    /// A required file or directory was absent or could not be touched.
    #[error("{action} failed [{}]: {source}", path.display())]
    Filesystem {
        /// What the pipeline was doing (e.g. "Copy archive").
        action: &'static str,
        /// Path the operation failed on.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A zip bundle could not be opened, read or written.
    #[error("Archive error [{}]: {message}", path.display())]
    Archive {
        /// Bundle path.
        path: PathBuf,
        /// Description from the zip layer.
        message: String,
    },

    /// The texture compressor failed while strict mode is on.
    #[error("Compressor failed for [{}]: {detail}", source_path.display())]
    CompressorTool {
        /// Image that was being compressed.
        source_path: PathBuf,
        /// Exit status and stderr summary.
        detail: String,
    },

    /// Configuration could not be built.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Wrap an IO error with the action and path it happened on.
    pub fn fs(action: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Filesystem {
            action,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap a zip-layer failure for the given bundle.
    pub fn archive(path: impl AsRef<Path>, message: impl std::fmt::Display) -> Self {
        Self::Archive {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }
}

/// Recovered failure: logged, counted, and otherwise ignored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    /// The compressor wrote to stderr, exited non-zero, or could not start.
    #[error("Compressor reported a problem for [{}]: {detail}", source_path.display())]
    CompressorTool {
        /// Image that was being compressed.
        source_path: PathBuf,
        /// Exit status and stderr summary.
        detail: String,
    },

    /// An extracted bundle member had an extension other than png or gaf.
    #[error("Unexpected file format in GAF zip [{member}]")]
    ArchiveMemberFormat {
        /// Bundle file name.
        archive: String,
        /// Offending member, relative to the bundle root.
        member: String,
    },

    /// No member of a bundle made it into the rebuilt archive.
    #[error("No any files in GAF zip [{archive}]")]
    EmptyArchive {
        /// Bundle file name.
        archive: String,
    },

    /// A path inside the slot contains characters that are invalid in file names.
    #[error("Wrong symbols in path: {}", path.display())]
    InvalidPath {
        /// Offending path.
        path: PathBuf,
    },
}
