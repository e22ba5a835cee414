//! Texture compressor invocation.
//!
//! Every atlas is compressed by one run of the external `png2atf` tool. The
//! process boundary sits behind [`Launcher`] so the pipeline can be driven by
//! a fake in tests; [`ProcessLauncher`] is the real implementation.
//!
//! # Failure policy
//!
//! By default a compressor that writes to stderr, exits non-zero, or cannot be
//! started produces an [`Issue`]: it is logged and the run carries on, which
//! may leave the compressed file missing. With `strict_compressor` set the
//! same condition becomes a [`PipelineError::CompressorTool`] and stops the
//! run.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::future::join_all;

use crate::codec::Codec;
use crate::config::Config;
use crate::error::{Issue, PipelineError};

/// Captured result of one external tool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Whether the exit status was success.
    pub success: bool,
    /// Everything the process wrote to stderr.
    pub stderr: String,
}

/// Capability to run an external program to completion.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Run `program` with `args`, wait for it to exit, and return its status
    /// and stderr. stdout is discarded.
    async fn launch(&self, program: &Path, args: &[OsString]) -> io::Result<ToolOutput>;
}

/// [`Launcher`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, program: &Path, args: &[OsString]) -> io::Result<ToolOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(ToolOutput {
            code: output.status.code(),
            success: output.status.success(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// One image to compress with one codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionTask {
    /// Input PNG.
    pub source: PathBuf,
    /// Output ATF.
    pub destination: PathBuf,
    /// Codec to encode with.
    pub codec: Codec,
    /// Whether the image was extracted from a bundle.
    pub is_archive_member: bool,
}

impl CompressionTask {
    /// Build a task, deriving the destination from the source.
    pub fn new(source: PathBuf, codec: Codec, is_archive_member: bool, pvr_suffix: &str) -> Self {
        let destination = compressed_path(&source, codec, is_archive_member, pvr_suffix);
        Self {
            source,
            destination,
            codec,
            is_archive_member,
        }
    }
}

/// Output path for a compressed image: the source stem with `.atf`, followed
/// by `pvr_suffix` for standalone PVR atlases.
///
/// `hud-0001.png` becomes `hud-0001.atf` (rgba, etc, any bundle member) or
/// `hud-0001.atf_low` (pvr).
pub fn compressed_path(
    source: &Path,
    codec: Codec,
    is_archive_member: bool,
    pvr_suffix: &str,
) -> PathBuf {
    let stem = source
        .file_stem()
        .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
    let suffix = if codec.is_suffixed() && !is_archive_member {
        pvr_suffix
    } else {
        ""
    };
    source.with_file_name(format!("{stem}.atf{suffix}"))
}

/// Runs the texture compressor for atlases and bundle members.
pub struct AtlasCompressor {
    program: PathBuf,
    quantization: u32,
    pvr_suffix: String,
    strict: bool,
    launcher: Arc<dyn Launcher>,
    invocations: AtomicUsize,
}

impl std::fmt::Debug for AtlasCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtlasCompressor")
            .field("program", &self.program)
            .field("quantization", &self.quantization)
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

impl AtlasCompressor {
    /// Create a compressor from config, running the tool through `launcher`.
    pub fn new(config: &Config, launcher: Arc<dyn Launcher>) -> Self {
        let program = match &config.tools_dir {
            Some(dir) => dir.join(&config.compressor),
            None => PathBuf::from(&config.compressor),
        };
        Self {
            program,
            quantization: config.quantization,
            pvr_suffix: config.pvr_suffix.clone(),
            strict: config.strict_compressor,
            launcher,
            invocations: AtomicUsize::new(0),
        }
    }

    /// Executable that will be launched.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Number of tool launches so far.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Build a task for `source` using this compressor's naming rules.
    pub fn task(&self, source: PathBuf, codec: Codec, is_archive_member: bool) -> CompressionTask {
        CompressionTask::new(source, codec, is_archive_member, &self.pvr_suffix)
    }

    /// Tool arguments for a task.
    ///
    /// | codec | arguments |
    /// |---|---|
    /// | rgba | `. -e -q <Q> -i <in> -o <out>` |
    /// | pvr | `. -c p -r -e -i <in> -o <out>` |
    /// | etc | `. -c e -r -e -i <in> -o <out>` |
    pub fn arguments(&self, task: &CompressionTask) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![".".into()];
        match task.codec {
            Codec::Rgba => {
                args.extend(["-e".into(), "-q".into(), self.quantization.to_string().into()]);
            }
            Codec::Pvr => args.extend(["-c", "p", "-r", "-e"].map(OsString::from)),
            Codec::Etc => args.extend(["-c", "e", "-r", "-e"].map(OsString::from)),
        }
        args.push("-i".into());
        args.push(task.source.clone().into_os_string());
        args.push("-o".into());
        args.push(task.destination.clone().into_os_string());
        args
    }

    /// Compress one image.
    ///
    /// Returns `Ok(None)` on a clean run and `Ok(Some(issue))` when the tool
    /// complained. Never retries and never times out.
    ///
    /// # Errors
    ///
    /// In strict mode, any tool complaint is returned as
    /// [`PipelineError::CompressorTool`].
    pub async fn compress(&self, task: &CompressionTask) -> Result<Option<Issue>, PipelineError> {
        tracing::debug!(
            codec = %task.codec,
            source = %task.source.display(),
            destination = %task.destination.display(),
            "launching compressor"
        );
        self.invocations.fetch_add(1, Ordering::Relaxed);

        let args = self.arguments(task);
        let detail = match self.launcher.launch(&self.program, &args).await {
            Ok(output) => describe_failure(&output),
            Err(e) => Some(format!("failed to launch {}: {e}", self.program.display())),
        };

        let Some(detail) = detail else {
            return Ok(None);
        };

        tracing::warn!(source = %task.source.display(), %detail, "compressor reported a problem");
        if self.strict {
            return Err(PipelineError::CompressorTool {
                source_path: task.source.clone(),
                detail,
            });
        }
        Ok(Some(Issue::CompressorTool {
            source_path: task.source.clone(),
            detail,
        }))
    }

    /// Compress every task concurrently and wait for all of them to settle.
    ///
    /// Results are returned in task order, one per task.
    ///
    /// # Errors
    ///
    /// In strict mode, returns the first failure after every launch has
    /// finished.
    pub async fn compress_all(
        &self,
        tasks: &[CompressionTask],
    ) -> Result<Vec<Option<Issue>>, PipelineError> {
        join_all(tasks.iter().map(|task| self.compress(task)))
            .await
            .into_iter()
            .collect()
    }
}

/// `None` for a clean run, otherwise a one-line summary of what went wrong.
fn describe_failure(output: &ToolOutput) -> Option<String> {
    let stderr = output.stderr.trim();
    if output.success && stderr.is_empty() {
        return None;
    }
    let status = match output.code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    };
    if stderr.is_empty() {
        Some(status)
    } else {
        Some(format!("{status}: {stderr}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records launches and answers with a fixed output.
    struct ScriptedLauncher {
        calls: Mutex<Vec<Vec<OsString>>>,
        output: io::Result<ToolOutput>,
    }

    impl ScriptedLauncher {
        fn replying(output: ToolOutput) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                output: Ok(output),
            })
        }

        fn missing() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                output: Err(io::Error::from(io::ErrorKind::NotFound)),
            })
        }
    }

    #[async_trait]
    impl Launcher for ScriptedLauncher {
        async fn launch(&self, _program: &Path, args: &[OsString]) -> io::Result<ToolOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            match &self.output {
                Ok(out) => Ok(out.clone()),
                Err(e) => Err(io::Error::from(e.kind())),
            }
        }
    }

    fn clean() -> ToolOutput {
        ToolOutput {
            code: Some(0),
            success: true,
            stderr: String::new(),
        }
    }

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_compressed_path_suffix_rules() {
        let src = Path::new("/a/hud/en_US/hud-0001.png");
        assert_eq!(
            compressed_path(src, Codec::Rgba, false, "_low"),
            PathBuf::from("/a/hud/en_US/hud-0001.atf")
        );
        assert_eq!(
            compressed_path(src, Codec::Pvr, false, "_low"),
            PathBuf::from("/a/hud/en_US/hud-0001.atf_low")
        );
        assert_eq!(
            compressed_path(src, Codec::Etc, false, "_low"),
            PathBuf::from("/a/hud/en_US/hud-0001.atf")
        );
        assert_eq!(
            compressed_path(src, Codec::Pvr, true, "_low"),
            PathBuf::from("/a/hud/en_US/hud-0001.atf")
        );
    }

    #[test]
    fn test_arguments_per_codec() {
        let config = Config {
            quantization: 7,
            ..Config::default()
        };
        let compressor = AtlasCompressor::new(&config, ScriptedLauncher::replying(clean()));
        let src = PathBuf::from("in.png");

        let rgba = compressor.arguments(&compressor.task(src.clone(), Codec::Rgba, false));
        assert_eq!(strings(&rgba), [".", "-e", "-q", "7", "-i", "in.png", "-o", "in.atf"]);

        let pvr = compressor.arguments(&compressor.task(src.clone(), Codec::Pvr, false));
        assert_eq!(
            strings(&pvr),
            [".", "-c", "p", "-r", "-e", "-i", "in.png", "-o", "in.atf_low"]
        );

        let etc = compressor.arguments(&compressor.task(src, Codec::Etc, false));
        assert_eq!(
            strings(&etc),
            [".", "-c", "e", "-r", "-e", "-i", "in.png", "-o", "in.atf"]
        );
    }

    #[test]
    fn test_program_joins_tools_dir() {
        let config = Config {
            tools_dir: Some(PathBuf::from("/opt/atf")),
            ..Config::default()
        };
        let compressor = AtlasCompressor::new(&config, ScriptedLauncher::replying(clean()));
        assert_eq!(compressor.program(), Path::new("/opt/atf/png2atf"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_recovered_by_default() {
        let launcher = ScriptedLauncher::replying(ToolOutput {
            code: Some(2),
            success: false,
            stderr: "bad png\n".to_string(),
        });
        let compressor = AtlasCompressor::new(&Config::default(), launcher);
        let task = compressor.task(PathBuf::from("x.png"), Codec::Rgba, false);

        let issue = compressor.compress(&task).await.unwrap();
        match issue {
            Some(Issue::CompressorTool { detail, .. }) => {
                assert_eq!(detail, "exit code 2: bad png");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stderr_on_success_is_still_reported() {
        let launcher = ScriptedLauncher::replying(ToolOutput {
            code: Some(0),
            success: true,
            stderr: "warning: padded".to_string(),
        });
        let compressor = AtlasCompressor::new(&Config::default(), launcher);
        let task = compressor.task(PathBuf::from("x.png"), Codec::Etc, false);
        assert!(compressor.compress(&task).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_strict_mode_propagates() {
        let config = Config {
            strict_compressor: true,
            ..Config::default()
        };
        let compressor = AtlasCompressor::new(&config, ScriptedLauncher::missing());
        let task = compressor.task(PathBuf::from("x.png"), Codec::Pvr, false);
        let err = compressor.compress(&task).await.unwrap_err();
        assert!(matches!(err, PipelineError::CompressorTool { .. }));
    }

    #[tokio::test]
    async fn test_compress_all_runs_every_task() {
        let launcher = ScriptedLauncher::replying(clean());
        let compressor = AtlasCompressor::new(&Config::default(), launcher.clone());
        let tasks: Vec<_> = ["a.png", "b.png", "c.png"]
            .into_iter()
            .map(|s| compressor.task(PathBuf::from(s), Codec::Rgba, false))
            .collect();

        let results = compressor.compress_all(&tasks).await.unwrap();
        assert_eq!(results, vec![None, None, None]);
        assert_eq!(compressor.invocations(), 3);
        assert_eq!(launcher.calls.lock().unwrap().len(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_launcher_captures_stderr_and_status() {
        let args: Vec<OsString> = vec!["-c".into(), "echo oops >&2; exit 3".into()];
        let output = ProcessLauncher
            .launch(Path::new("/bin/sh"), &args)
            .await
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert!(!output.success);
        assert_eq!(output.stderr.trim(), "oops");
    }
}
