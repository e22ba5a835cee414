//! GAF bundle repacking.
//!
//! A bundle is a zip holding animation data (`.gaf`) and bitmap atlases
//! (`.png`). Repacking replaces every bitmap with its compressed `.atf`
//! counterpart and leaves the layout otherwise intact.
//!
//! Each bundle moves through these states:
//!
//! ```text
//! staged --> extracted --> classified --> rebuilt --> delivered
//! ```
//!
//! 1. **Staged**: copied from the slot into the workspace staging directory.
//! 2. **Extracted**: unpacked into `<result>/<entry name>/`.
//! 3. **Classified**: every extracted file is visited. Bitmaps are compressed
//!    (all of them concurrently), animation data is taken verbatim, anything
//!    else is reported and skipped.
//! 4. **Rebuilt**: if at least one member survived, a new zip is written to
//!    `<result>/<bundle file name>` and the extraction directory removed.
//! 5. **Delivered**: after the pass, every rebuilt zip is moved back into its
//!    slot location, PVR passes appending the low-quality suffix.
//!
//! Compression results are gathered before anything is appended to the new
//! archive, and appends then happen in member order on the calling task, so
//! the writer is never shared between concurrent completions.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::codec::Codec;
use crate::compressor::AtlasCompressor;
use crate::config::Config;
use crate::error::{Issue, PipelineError};
use crate::paths::{entry_name_from_file, resolve_file_path};
use crate::reporter::Reporter;
use crate::workspace::{TempWorkspace, ensure_dir, remove_dir_if_exists};

/// Extension of bitmap members.
const BITMAP_EXT: &str = "png";
/// Extension of animation data members.
const ANIMATION_EXT: &str = "gaf";
/// Extension given to compressed bitmap members.
const COMPRESSED_EXT: &str = "atf";
/// Extension of bundles.
const BUNDLE_EXT: &str = "zip";

/// Role of an extracted bundle member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// `.png` atlas, compressed before re-adding.
    Bitmap,
    /// `.gaf` animation data, re-added verbatim.
    AnimationData,
    /// Anything else; rejected.
    Other,
}

impl MemberKind {
    /// Classify a member by extension.
    pub fn classify(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case(BITMAP_EXT) => Self::Bitmap,
            Some(ext) if ext.eq_ignore_ascii_case(ANIMATION_EXT) => Self::AnimationData,
            _ => Self::Other,
        }
    }
}

/// A file found in an extracted bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    /// Path relative to the extraction root.
    pub relative: PathBuf,
    /// Classification.
    pub kind: MemberKind,
}

/// An extracted bundle.
#[derive(Debug, Clone)]
pub struct Archive {
    /// Extraction root.
    pub root: PathBuf,
    /// Files under `root`, in listing order.
    pub members: Vec<ArchiveMember>,
}

/// Result of repacking one bundle.
#[derive(Debug, Clone)]
pub struct RepackOutcome {
    /// Bundle file name.
    pub archive: String,
    /// Rebuilt zip in the result directory, if one was written.
    pub written: Option<PathBuf>,
    /// Members added to the rebuilt zip.
    pub members_added: usize,
    /// Recovered problems.
    pub issues: Vec<Issue>,
}

/// Result of one codec pass over all staged bundles.
#[derive(Debug, Clone)]
pub struct PassReport {
    /// Codec used for bitmap members.
    pub codec: Codec,
    /// Per-bundle outcomes, in staging order.
    pub outcomes: Vec<RepackOutcome>,
    /// Final slot paths of delivered bundles.
    pub delivered: Vec<PathBuf>,
}

impl PassReport {
    /// All recovered problems of the pass.
    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.outcomes.iter().flat_map(|o| o.issues.iter())
    }
}

/// Extract a zip bundle into `dest_dir` and list what came out.
///
/// Entries whose names would escape `dest_dir` are skipped.
///
/// # Errors
///
/// Returns an error if the bundle cannot be opened or read, or a file cannot
/// be written.
pub fn extract(archive_path: &Path, dest_dir: &Path) -> Result<Archive, PipelineError> {
    let file = File::open(archive_path).map_err(|e| PipelineError::fs("Open archive", archive_path, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| PipelineError::archive(archive_path, e))?;

    ensure_dir(dest_dir)?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| PipelineError::archive(archive_path, e))?;
        let Some(relative_path) = entry.enclosed_name() else {
            tracing::warn!(archive = %archive_path.display(), name = entry.name(), "skipping unsafe entry");
            continue;
        };

        let absolute_path = dest_dir.join(&relative_path);
        if entry.is_dir() {
            ensure_dir(&absolute_path)?;
            continue;
        }
        if let Some(parent) = absolute_path.parent() {
            ensure_dir(parent)?;
        }

        let mut outfile =
            File::create(&absolute_path).map_err(|e| PipelineError::fs("Extract member", &absolute_path, e))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|e| PipelineError::fs("Extract member", &absolute_path, e))?;
    }

    Ok(Archive {
        root: dest_dir.to_path_buf(),
        members: scan_members(dest_dir)?,
    })
}

/// List every file under `root`, sorted by path, classified by extension.
///
/// # Errors
///
/// Returns an error if the directory cannot be walked.
pub fn scan_members(root: &Path) -> Result<Vec<ArchiveMember>, PipelineError> {
    let mut members = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            PipelineError::fs("List archive members", path, io::Error::other(e.to_string()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        members.push(ArchiveMember {
            relative: relative.to_path_buf(),
            kind: MemberKind::classify(relative),
        });
    }
    Ok(members)
}

/// Zip entry name for a relative path: components joined with `/`.
pub fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Write `entries` as a zip at `path`, deflated at the maximum level.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_zip(path: &Path, entries: &[(String, Vec<u8>)]) -> Result<(), PipelineError> {
    let file = File::create(path).map_err(|e| PipelineError::fs("Create archive", path, e))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(9));

    for (name, data) in entries {
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| PipelineError::archive(path, e))?;
        writer
            .write_all(data)
            .map_err(|e| PipelineError::fs("Write archive member", path, e))?;
    }

    writer.finish().map_err(|e| PipelineError::archive(path, e))?;
    Ok(())
}

/// Move a file, preferring an atomic rename and falling back to copy+delete
/// across filesystems. An existing destination is replaced.
///
/// # Errors
///
/// Returns an error if both the rename and the copy fail.
pub fn move_file(from: &Path, to: &Path) -> Result<(), PipelineError> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(|e| PipelineError::fs("Copy file", from, e))?;
    fs::remove_file(from).map_err(|e| PipelineError::fs("Remove file", from, e))?;
    Ok(())
}

/// Files (not directories) directly inside `dir` with extension `ext`,
/// sorted by name.
fn list_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| PipelineError::fs("List directory", dir, e))?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == ext))
        .collect();
    files.sort();
    Ok(files)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned())
}

/// Drives bundle repacking for one run.
pub struct ArchiveRepacker<'a> {
    config: &'a Config,
    compressor: &'a AtlasCompressor,
    reporter: &'a dyn Reporter,
}

impl std::fmt::Debug for ArchiveRepacker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveRepacker")
            .field("compressor", &self.compressor)
            .finish_non_exhaustive()
    }
}

impl<'a> ArchiveRepacker<'a> {
    /// Create a repacker.
    pub fn new(config: &'a Config, compressor: &'a AtlasCompressor, reporter: &'a dyn Reporter) -> Self {
        Self {
            config,
            compressor,
            reporter,
        }
    }

    /// Repack `archives` for every codec of the configured platform.
    ///
    /// Owns a [`TempWorkspace`] for the duration and removes it afterwards,
    /// whether the passes succeeded or not.
    ///
    /// # Errors
    ///
    /// Returns the first structural failure (missing bundle, corrupt zip,
    /// filesystem error) or a strict-mode compressor failure.
    pub async fn repack_all(&self, archives: &[PathBuf]) -> Result<Vec<PassReport>, PipelineError> {
        let workspace = TempWorkspace::acquire(self.config)?;
        let outcome = self.run_passes(&workspace, archives).await;
        let cleanup = workspace.teardown();
        let reports = outcome?;
        cleanup?;
        Ok(reports)
    }

    async fn run_passes(
        &self,
        workspace: &TempWorkspace,
        archives: &[PathBuf],
    ) -> Result<Vec<PassReport>, PipelineError> {
        self.stage(workspace, archives)?;
        let mut reports = Vec::new();
        for &codec in self.config.platform.codecs() {
            reports.push(self.run_pass(workspace, codec).await?);
        }
        Ok(reports)
    }

    /// Copy bundles into the staging directory, replacing earlier copies.
    ///
    /// # Errors
    ///
    /// Returns an error if a bundle is missing or cannot be copied.
    pub fn stage(&self, workspace: &TempWorkspace, archives: &[PathBuf]) -> Result<Vec<PathBuf>, PipelineError> {
        let staging = workspace.staging_dir()?;
        archives
            .iter()
            .map(|archive| {
                let target = staging.join(file_name_of(archive));
                fs::copy(archive, &target).map_err(|e| PipelineError::fs("Copy archive", archive, e))?;
                tracing::debug!(from = %archive.display(), to = %target.display(), "staged");
                Ok(target)
            })
            .collect()
    }

    /// Repack every staged bundle with `codec`, then deliver the results.
    ///
    /// # Errors
    ///
    /// See [`ArchiveRepacker::repack_all`].
    pub async fn run_pass(&self, workspace: &TempWorkspace, codec: Codec) -> Result<PassReport, PipelineError> {
        self.reporter.section(&format!(
            "Preparing {} GAF zips...",
            codec.as_str().to_uppercase()
        ));
        tracing::info!(%codec, "bundle pass started");

        let staged = list_with_extension(workspace.staging_dir()?, BUNDLE_EXT)?;
        let mut outcomes = Vec::new();
        for archive in staged {
            let entry = entry_name_from_file(self.config, &file_name_of(&archive));
            if !self.config.target.matches(&entry) {
                continue;
            }
            let outcome = self.repack_one(workspace, &archive, codec).await?;
            for issue in &outcome.issues {
                tracing::warn!(archive = %outcome.archive, "{issue}");
                self.reporter.error(&issue.to_string());
            }
            outcomes.push(outcome);
        }

        let delivered = self.deliver(workspace, codec)?;
        Ok(PassReport {
            codec,
            outcomes,
            delivered,
        })
    }

    /// Extract, classify and rebuild one staged bundle.
    ///
    /// # Errors
    ///
    /// Returns an error for structural failures; member-level problems are
    /// recorded in the outcome instead.
    pub async fn repack_one(
        &self,
        workspace: &TempWorkspace,
        staged: &Path,
        codec: Codec,
    ) -> Result<RepackOutcome, PipelineError> {
        let archive_name = file_name_of(staged);
        let result_dir = workspace.result_dir()?;
        let extract_dir = result_dir.join(entry_name_from_file(self.config, &archive_name));

        remove_dir_if_exists(&extract_dir)?;
        let archive = extract(staged, &extract_dir)?;
        tracing::debug!(archive = %archive_name, members = archive.members.len(), "extracted");

        let bitmaps: Vec<_> = archive
            .members
            .iter()
            .filter(|m| m.kind == MemberKind::Bitmap)
            .map(|m| self.compressor.task(archive.root.join(&m.relative), codec, true))
            .collect();
        let mut compressed = self
            .compressor
            .compress_all(&bitmaps)
            .await?
            .into_iter()
            .zip(bitmaps.iter());

        let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
        let mut issues = Vec::new();

        for member in &archive.members {
            match member.kind {
                MemberKind::Bitmap => {
                    let Some((tool_issue, task)) = compressed.next() else {
                        continue;
                    };
                    let had_issue = tool_issue.is_some();
                    issues.extend(tool_issue);
                    match fs::read(&task.destination) {
                        Ok(data) => {
                            let name = entry_name(&member.relative.with_extension(COMPRESSED_EXT));
                            entries.push((name, data));
                        }
                        Err(e) if !had_issue => issues.push(Issue::CompressorTool {
                            source_path: task.source.clone(),
                            detail: format!("no output at {}: {e}", task.destination.display()),
                        }),
                        Err(_) => {}
                    }
                }
                MemberKind::AnimationData => {
                    let path = archive.root.join(&member.relative);
                    let data = fs::read(&path).map_err(|e| PipelineError::fs("Read archive member", &path, e))?;
                    entries.push((entry_name(&member.relative), data));
                }
                MemberKind::Other => issues.push(Issue::ArchiveMemberFormat {
                    archive: archive_name.clone(),
                    member: entry_name(&member.relative),
                }),
            }
        }

        if entries.is_empty() {
            issues.push(Issue::EmptyArchive {
                archive: archive_name.clone(),
            });
            return Ok(RepackOutcome {
                archive: archive_name,
                written: None,
                members_added: 0,
                issues,
            });
        }

        let output = result_dir.join(&archive_name);
        write_zip(&output, &entries)?;
        remove_dir_if_exists(&extract_dir)?;
        tracing::debug!(archive = %archive_name, members = entries.len(), "rebuilt");

        Ok(RepackOutcome {
            archive: archive_name,
            written: Some(output),
            members_added: entries.len(),
            issues,
        })
    }

    /// Move every rebuilt bundle from the result directory to its slot path.
    ///
    /// `hud-0001.zip` goes to `<root>/hud/<locale>/hud-0001.zip`, or to
    /// `hud-0001.zip_low` on a PVR pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the result directory cannot be listed or a move
    /// fails.
    pub fn deliver(&self, workspace: &TempWorkspace, codec: Codec) -> Result<Vec<PathBuf>, PipelineError> {
        let result_dir = workspace.result_path();
        if !result_dir.exists() {
            return Ok(Vec::new());
        }

        let suffix = if codec.is_suffixed() {
            self.config.pvr_suffix.as_str()
        } else {
            ""
        };

        let mut delivered = Vec::new();
        for rebuilt in list_with_extension(result_dir, BUNDLE_EXT)? {
            let file_name = file_name_of(&rebuilt);
            let entry = entry_name_from_file(self.config, &file_name);
            let destination = resolve_file_path(self.config, &entry, &format!("{file_name}{suffix}"));
            if let Some(parent) = destination.parent() {
                ensure_dir(parent)?;
            }
            move_file(&rebuilt, &destination)?;
            tracing::debug!(to = %destination.display(), "delivered");
            delivered.push(destination);
        }
        Ok(delivered)
    }
}
