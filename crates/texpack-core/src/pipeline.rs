//! Stage planning and the sequential run driver.
//!
//! A run is a fixed, ordered list of [`Stage`]s derived from the platform,
//! the requested command and the post-processing flags:
//!
//! | platform | `atf` | `gaf` | `all` |
//! |---|---|---|---|
//! | web | rgba | repack (rgba) | rgba, repack |
//! | ios | rgba, pvr | repack (rgba, pvr) | rgba, pvr, repack |
//! | android | etc | repack (etc) | etc, repack |
//!
//! Path inspection, when enabled, runs first. Manifest update (ios only) and
//! source pruning (ios and android) are appended last. Stages never overlap;
//! concurrency exists only inside a stage, between compressor processes.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::archive::ArchiveRepacker;
use crate::codec::Codec;
use crate::compressor::{AtlasCompressor, Launcher};
use crate::config::{BuildCommand, Config, Platform};
use crate::error::{Issue, PipelineError};
use crate::manifest::{Manifest, derive_archive_list, derive_atlas_tasks};
use crate::paths::{manifest_path, resolution_root};
use crate::postprocess::{inspect_paths, prune_sources, update_manifest};
use crate::reporter::Reporter;

/// One step of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Report slot paths containing reserved characters.
    InspectPaths,
    /// Compress every eligible standalone atlas with one codec.
    CompressAtlases(Codec),
    /// Repack every eligible bundle, one pass per platform codec.
    RepackArchives,
    /// Add the low-quality markers to the manifest.
    UpdateManifest,
    /// Remove everything but compressed assets from the slot.
    PruneSources,
}

impl Stage {
    /// Section heading shown when the stage starts. Bundle repacking announces
    /// each of its passes instead.
    pub fn title(self) -> Option<String> {
        match self {
            Self::InspectPaths => Some("Inspecting paths...".to_string()),
            Self::CompressAtlases(codec) => Some(format!(
                "Preparing {} atlases...",
                codec.as_str().to_uppercase()
            )),
            Self::RepackArchives => None,
            Self::UpdateManifest => Some("Updating manifest...".to_string()),
            Self::PruneSources => Some("Removing sources...".to_string()),
        }
    }

    fn reads_manifest(self) -> bool {
        matches!(self, Self::CompressAtlases(_) | Self::RepackArchives)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InspectPaths => f.write_str("inspect-paths"),
            Self::CompressAtlases(codec) => write!(f, "compress-{codec}"),
            Self::RepackArchives => f.write_str("repack-archives"),
            Self::UpdateManifest => f.write_str("update-manifest"),
            Self::PruneSources => f.write_str("prune-sources"),
        }
    }
}

/// Ordered stage list for a config.
pub fn plan(config: &Config) -> Vec<Stage> {
    let mut stages = Vec::new();

    if config.inspect_paths {
        stages.push(Stage::InspectPaths);
    }
    if matches!(config.command, BuildCommand::All | BuildCommand::Atf) {
        stages.extend(config.platform.codecs().iter().map(|&c| Stage::CompressAtlases(c)));
    }
    if matches!(config.command, BuildCommand::All | BuildCommand::Gaf) {
        stages.push(Stage::RepackArchives);
    }
    if config.platform == Platform::Ios && config.update_manifest {
        stages.push(Stage::UpdateManifest);
    }
    if config.platform != Platform::Web && config.remove_sources {
        stages.push(Stage::PruneSources);
    }

    stages
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Stages that ran, in order.
    pub stages: Vec<Stage>,
    /// Every recovered problem, in the order it was found.
    pub issues: Vec<Issue>,
    /// Compressor launches.
    pub invocations: usize,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl RunReport {
    /// Whether the run finished without recovered problems.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Runs the planned stages for one config.
pub struct Pipeline {
    config: Arc<Config>,
    compressor: AtlasCompressor,
    reporter: Arc<dyn Reporter>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("compressor", &self.compressor)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create a pipeline that runs the compressor through `launcher` and
    /// reports to `reporter`.
    pub fn new(config: Arc<Config>, launcher: Arc<dyn Launcher>, reporter: Arc<dyn Reporter>) -> Self {
        let compressor = AtlasCompressor::new(&config, launcher);
        Self {
            config,
            compressor,
            reporter,
        }
    }

    /// The config this pipeline runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every planned stage in order.
    ///
    /// # Errors
    ///
    /// Returns the first unrecovered failure. Stages after it do not run;
    /// recovered issues found so far are logged but not returned.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let stages = plan(&self.config);
        tracing::info!(
            platform = %self.config.platform,
            target = %self.config.target,
            stages = stages.len(),
            "pipeline started"
        );

        let manifest = if stages.iter().any(|s| s.reads_manifest()) {
            Manifest::load(&manifest_path(&self.config)).await?
        } else {
            Manifest::default()
        };

        let mut issues = Vec::new();
        for &stage in &stages {
            tracing::info!(%stage, "stage started");
            if let Some(title) = stage.title() {
                self.reporter.section(&title);
            }
            let found = self.run_stage(stage, &manifest).await?;
            tracing::debug!(%stage, issues = found.len(), "stage finished");
            issues.extend(found);
        }

        let report = RunReport {
            stages,
            issues,
            invocations: self.compressor.invocations(),
            elapsed: started.elapsed(),
        };
        tracing::info!(
            invocations = report.invocations,
            issues = report.issues.len(),
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            "pipeline finished"
        );
        Ok(report)
    }

    async fn run_stage(&self, stage: Stage, manifest: &Manifest) -> Result<Vec<Issue>, PipelineError> {
        match stage {
            Stage::InspectPaths => {
                let issues = inspect_paths(&self.config);
                self.report(&issues);
                Ok(issues)
            }
            Stage::CompressAtlases(codec) => {
                let tasks = derive_atlas_tasks(manifest, &self.config, codec);
                let issues: Vec<Issue> = self
                    .compressor
                    .compress_all(&tasks)
                    .await?
                    .into_iter()
                    .flatten()
                    .collect();
                self.report(&issues);
                Ok(issues)
            }
            Stage::RepackArchives => {
                let archives = derive_archive_list(manifest, &self.config);
                let repacker = ArchiveRepacker::new(&self.config, &self.compressor, self.reporter.as_ref());
                let passes = repacker.repack_all(&archives).await?;
                Ok(passes.iter().flat_map(|p| p.issues().cloned()).collect())
            }
            Stage::UpdateManifest => {
                update_manifest(&self.config).await?;
                Ok(Vec::new())
            }
            Stage::PruneSources => {
                let config = Arc::clone(&self.config);
                tokio::task::spawn_blocking(move || prune_sources(&config))
                    .await
                    .map_err(|e| {
                        PipelineError::fs(
                            "Prune sources",
                            resolution_root(&self.config),
                            io::Error::other(e.to_string()),
                        )
                    })??;
                Ok(Vec::new())
            }
        }
    }

    fn report(&self, issues: &[Issue]) {
        for issue in issues {
            self.reporter.error(&issue.to_string());
        }
    }
}
