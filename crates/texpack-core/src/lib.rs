//! Manifest-driven texture compression and GAF bundle repacking.
//!
//! [`Pipeline`] plans the stages for a [`Config`] and runs them in order.
//! Everything that touches the outside world goes through a seam: the
//! compressor binary through [`Launcher`], user-facing output through
//! [`Reporter`].

/// Bundle extraction, member compression and rebuilding.
pub mod archive;
/// Texture codecs.
pub mod codec;
/// External compressor invocation.
pub mod compressor;
/// Run configuration.
pub mod config;
/// Fatal errors and recovered issues.
pub mod error;
/// Slot manifest.
pub mod manifest;
/// Slot path layout.
pub mod paths;
/// Stage planning and driver.
pub mod pipeline;
/// Manifest update, source pruning and path inspection.
pub mod postprocess;
/// User-facing output sink.
pub mod reporter;
/// Ephemeral staging directories.
pub mod workspace;

pub use codec::Codec;
pub use compressor::{AtlasCompressor, Launcher, ProcessLauncher, ToolOutput};
pub use config::{BuildCommand, Config, ConfigError, ConfigOverrides, Platform, Target};
pub use error::{Issue, PipelineError};
pub use pipeline::{Pipeline, RunReport, Stage};
pub use reporter::{NullReporter, Reporter};
