//! texpack - texture atlas compression and GAF bundle repacking
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
//!
//! Reads a slot manifest, compresses every listed atlas with `png2atf` for
//! the target platform, and rebuilds animation bundles with compressed
//! bitmaps.
//!
//! # Slot Layout
//!
//! ```text
//! <work_dir>/slots/<slot>/960x640/
//! ├── manifest.json
//! ├── hud/en_US/hud-0001.png      -> hud-0001.atf, hud-0001.atf_low (ios)
//! └── hero/en_US/hero-0001.zip    -> rebuilt in place, hero-0001.zip_low (ios)
//! ```

pub mod ui;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use texpack_core::{BuildCommand, Config, ConfigOverrides, Platform, Target};

/// Config file picked up from the current directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "texpack.toml";

#[derive(Debug, Parser)]
#[command(name = "texpack")]
#[command(author, version, about = "texpack - compress texture atlases and repack GAF bundles")]
pub struct Cli {
    /// Config file (TOML). Defaults to ./texpack.toml when present
    #[arg(long, env = "TEXPACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Target platform
    #[arg(short, long, value_enum)]
    pub platform: Option<Platform>,

    /// Which stages to run
    #[arg(short, long, value_enum)]
    pub command: Option<BuildCommand>,

    /// Process a single manifest entry, or `all`
    #[arg(short, long)]
    pub target: Option<Target>,

    /// Directory containing the `slots` folder
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Slot name
    #[arg(long)]
    pub slot: Option<String>,

    /// Where the temporary staging directories are created
    #[arg(long)]
    pub temp_root: Option<PathBuf>,

    /// Directory containing the png2atf executable (otherwise found on PATH)
    #[arg(long, env = "TEXPACK_TOOLS_DIR")]
    pub tools_dir: Option<PathBuf>,

    /// Add low-quality variant markers to the manifest (ios)
    #[arg(long)]
    pub update_manifest: bool,

    /// Delete everything but compressed assets from the slot (ios, android)
    #[arg(long)]
    pub remove_sources: bool,

    /// Report slot paths containing characters invalid in file names
    #[arg(long)]
    pub inspect_paths: bool,

    /// Stop on the first compressor failure instead of logging it
    #[arg(long)]
    pub strict: bool,
}

/// `Some(true)` for a set flag, `None` to keep the configured value.
fn flag(set: bool) -> Option<bool> {
    set.then_some(true)
}

impl Cli {
    /// Command-line values that override the config file.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            work_dir: self.work_dir.clone(),
            slot_name: self.slot.clone(),
            temp_root: self.temp_root.clone(),
            tools_dir: self.tools_dir.clone(),
            platform: self.platform,
            command: self.command,
            target: self.target.clone(),
            update_manifest: flag(self.update_manifest),
            remove_sources: flag(self.remove_sources),
            inspect_paths: flag(self.inspect_paths),
            strict_compressor: flag(self.strict),
        }
    }

    /// The config file to load: `--config`, else `texpack.toml` in `cwd` if
    /// it exists.
    pub fn config_file(&self, cwd: &Path) -> Option<PathBuf> {
        self.config.clone().or_else(|| {
            let candidate = cwd.join(DEFAULT_CONFIG_FILE);
            candidate.is_file().then_some(candidate)
        })
    }
}

/// Build the run config from the config file and command-line overrides.
pub fn load_config(cli: &Cli, cwd: &Path) -> Result<Config> {
    let file = cli.config_file(cwd);
    let config = Config::load(file.as_deref()).with_context(|| match &file {
        Some(path) => format!("Failed to load config from {}", path.display()),
        None => "Failed to build default config".to_string(),
    })?;
    config
        .with_overrides(cli.overrides())
        .context("Invalid command-line options")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_short_flags() {
        let cli = Cli::try_parse_from(["texpack", "-p", "ios", "-c", "gaf", "-t", "hud"]).unwrap();
        assert_eq!(cli.platform, Some(Platform::Ios));
        assert_eq!(cli.command, Some(BuildCommand::Gaf));
        assert_eq!(cli.target, Some(Target::Named("hud".to_string())));
    }

    #[test]
    fn test_rejects_unknown_platform() {
        assert!(Cli::try_parse_from(["texpack", "-p", "windows"]).is_err());
    }

    #[test]
    fn test_unset_flags_keep_config_values() {
        let cli = Cli::try_parse_from(["texpack", "--strict"]).unwrap();
        let overrides = cli.overrides();
        assert_eq!(overrides.strict_compressor, Some(true));
        assert_eq!(overrides.update_manifest, None);
        assert_eq!(overrides.platform, None);
    }

    #[test]
    fn test_config_file_discovery() {
        let dir = tempdir().unwrap();
        let cli = Cli::try_parse_from(["texpack"]).unwrap();
        assert_eq!(cli.config_file(dir.path()), None);

        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "platform = \"android\"\n").unwrap();
        assert_eq!(
            cli.config_file(dir.path()),
            Some(dir.path().join(DEFAULT_CONFIG_FILE))
        );

        let config = load_config(&cli, dir.path()).unwrap();
        assert_eq!(config.platform, Platform::Android);
    }

    #[test]
    fn test_command_line_beats_config_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("custom.toml");
        std::fs::write(&file, "platform = \"android\"\nslot_name = \"main\"\n").unwrap();

        let cli = Cli::try_parse_from([
            "texpack",
            "--config",
            file.to_str().unwrap(),
            "-p",
            "web",
        ])
        .unwrap();
        let config = load_config(&cli, dir.path()).unwrap();
        assert_eq!(config.platform, Platform::Web);
        assert_eq!(config.slot_name, "main");
    }
}
