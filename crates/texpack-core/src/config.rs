//! Run configuration.
//!
//! A [`Config`] is built once at startup from built-in defaults, an optional
//! `texpack.toml`, and command-line overrides, then shared read-only (usually
//! as `Arc<Config>`) with every stage.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::codec::Codec;

/// Errors raised while building a [`Config`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("Failed to read config [{}]: {source}", path.display())]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("Failed to parse config [{}]: {source}", path.display())]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is present but unusable.
    #[error("Invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Deployment platform. Decides which codecs are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Browser build: RGBA only.
    #[default]
    Web,
    /// iOS build: RGBA plus PVR.
    Ios,
    /// Android build: ETC only.
    Android,
}

impl Platform {
    /// Codecs this platform needs, in production order.
    pub fn codecs(self) -> &'static [Codec] {
        match self {
            Self::Web => &[Codec::Rgba],
            Self::Ios => &[Codec::Rgba, Codec::Pvr],
            Self::Android => &[Codec::Etc],
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Web => "web",
            Self::Ios => "ios",
            Self::Android => "android",
        })
    }
}

/// Which group of stages to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BuildCommand {
    /// Atlas compression followed by bundle repacking.
    #[default]
    All,
    /// Atlas compression only.
    Atf,
    /// Bundle repacking only.
    Gaf,
}

/// Asset filter: everything, or a single manifest entry by exact name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum Target {
    /// Process every eligible entry.
    #[default]
    All,
    /// Process only the entry with this name.
    Named(String),
}

impl Target {
    /// Whether an entry with this name passes the filter.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(target) => target == name,
        }
    }
}

impl From<String> for Target {
    fn from(value: String) -> Self {
        if value == "all" {
            Self::All
        } else {
            Self::Named(value)
        }
    }
}

impl FromStr for Target {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Immutable pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root that contains the `slots` tree.
    pub work_dir: PathBuf,
    /// Directory under `work_dir` holding the slots.
    pub work_sub_dir: String,
    /// Slot this run operates on.
    pub slot_name: String,
    /// Resolution directory inside the slot (e.g. `960x640`).
    pub resolution: String,
    /// Locale directory inside each entry (e.g. `en_US`).
    pub locale: String,
    /// Build revision token appended to file stems.
    pub version_suffix: String,
    /// Entries whose name contains this token never get PVR/ETC output.
    pub excluded_family: String,
    /// Suffix marking the low-quality (PVR) variant.
    pub pvr_suffix: String,
    /// Manifest file name inside the resolution directory.
    pub manifest_file_name: String,
    /// Extensions kept when pruning sources, without the leading dot.
    pub asset_extensions: Vec<String>,
    /// Parent directory of the ephemeral workspace.
    pub temp_root: PathBuf,
    /// Staging directory name for copied bundles.
    pub staging_dir: String,
    /// Extraction and rebuild directory name.
    pub result_dir: String,
    /// Directory that contains the compressor executable.
    pub tools_dir: Option<PathBuf>,
    /// Compressor executable name.
    pub compressor: String,
    /// Quantization level passed to RGBA encodes.
    pub quantization: u32,
    /// Treat compressor failures as fatal instead of logging them.
    pub strict_compressor: bool,
    /// Target platform.
    pub platform: Platform,
    /// Stage group to run.
    pub command: BuildCommand,
    /// Entry filter.
    pub target: Target,
    /// Append PVR variant markers to the manifest (iOS only).
    pub update_manifest: bool,
    /// Prune non-compressed sources from the slot (iOS and Android).
    pub remove_sources: bool,
    /// Report slot paths containing invalid characters before running.
    pub inspect_paths: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            work_sub_dir: "slots".to_string(),
            slot_name: "default".to_string(),
            resolution: "960x640".to_string(),
            locale: "en_US".to_string(),
            version_suffix: "-0001".to_string(),
            excluded_family: "fonts".to_string(),
            pvr_suffix: "_low".to_string(),
            manifest_file_name: "manifest.json".to_string(),
            asset_extensions: ["atf", "atf_low", "zip", "zip_low"]
                .into_iter()
                .map(String::from)
                .collect(),
            temp_root: PathBuf::from("."),
            staging_dir: "tmp".to_string(),
            result_dir: "tmp_result_gaf".to_string(),
            tools_dir: None,
            compressor: "png2atf".to_string(),
            quantization: 0,
            strict_compressor: false,
            platform: Platform::Web,
            command: BuildCommand::All,
            target: Target::All,
            update_manifest: false,
            remove_sources: false,
            inspect_paths: false,
        }
    }
}

/// Per-run overrides, typically from the command line. `None` keeps the
/// loaded value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override for [`Config::work_dir`].
    pub work_dir: Option<PathBuf>,
    /// Override for [`Config::slot_name`].
    pub slot_name: Option<String>,
    /// Override for [`Config::temp_root`].
    pub temp_root: Option<PathBuf>,
    /// Override for [`Config::tools_dir`].
    pub tools_dir: Option<PathBuf>,
    /// Override for [`Config::platform`].
    pub platform: Option<Platform>,
    /// Override for [`Config::command`].
    pub command: Option<BuildCommand>,
    /// Override for [`Config::target`].
    pub target: Option<Target>,
    /// Override for [`Config::update_manifest`].
    pub update_manifest: Option<bool>,
    /// Override for [`Config::remove_sources`].
    pub remove_sources: Option<bool>,
    /// Override for [`Config::inspect_paths`].
    pub inspect_paths: Option<bool>,
    /// Override for [`Config::strict_compressor`].
    pub strict_compressor: Option<bool>,
}

impl Config {
    /// Build a config from defaults, merged with the TOML file at `path`
    /// when one is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a loaded
    /// value fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&content).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a config from TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for malformed input or unknown keys.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Return a copy with every `Some` override applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the merged config fails validation.
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let ConfigOverrides {
            work_dir,
            slot_name,
            temp_root,
            tools_dir,
            platform,
            command,
            target,
            update_manifest,
            remove_sources,
            inspect_paths,
            strict_compressor,
        } = overrides;

        if let Some(v) = work_dir {
            self.work_dir = v;
        }
        if let Some(v) = slot_name {
            self.slot_name = v;
        }
        if let Some(v) = temp_root {
            self.temp_root = v;
        }
        if tools_dir.is_some() {
            self.tools_dir = tools_dir;
        }
        if let Some(v) = platform {
            self.platform = v;
        }
        if let Some(v) = command {
            self.command = v;
        }
        if let Some(v) = target {
            self.target = v;
        }
        if let Some(v) = update_manifest {
            self.update_manifest = v;
        }
        if let Some(v) = remove_sources {
            self.remove_sources = v;
        }
        if let Some(v) = inspect_paths {
            self.inspect_paths = v;
        }
        if let Some(v) = strict_compressor {
            self.strict_compressor = v;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let non_empty = [
            ("work_sub_dir", &self.work_sub_dir),
            ("slot_name", &self.slot_name),
            ("resolution", &self.resolution),
            ("locale", &self.locale),
            ("manifest_file_name", &self.manifest_file_name),
            ("staging_dir", &self.staging_dir),
            ("result_dir", &self.result_dir),
            ("compressor", &self.compressor),
        ];
        for (field, value) in non_empty {
            if value.is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
        }

        if self.staging_dir == self.result_dir {
            return Err(ConfigError::Invalid {
                field: "result_dir",
                reason: "must differ from staging_dir".to_string(),
            });
        }

        if self.pvr_suffix.is_empty() {
            return Err(ConfigError::Invalid {
                field: "pvr_suffix",
                reason: "an empty suffix would overwrite RGBA output".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_slot_layout() {
        let config = Config::default();
        assert_eq!(config.resolution, "960x640");
        assert_eq!(config.locale, "en_US");
        assert_eq!(config.version_suffix, "-0001");
        assert_eq!(config.pvr_suffix, "_low");
        assert_eq!(config.target, Target::All);
    }

    #[test]
    fn test_toml_partial_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            work_dir = "/assets"
            slot_name = "release"
            platform = "ios"
            quantization = 12
            "#,
        )
        .unwrap();
        assert_eq!(config.work_dir, PathBuf::from("/assets"));
        assert_eq!(config.platform, Platform::Ios);
        assert_eq!(config.quantization, 12);
        assert_eq!(config.manifest_file_name, "manifest.json");
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(Config::from_toml("slto_name = \"typo\"").is_err());
    }

    #[test]
    fn test_target_from_string() {
        assert_eq!(Target::from("all".to_string()), Target::All);
        assert_eq!(
            Target::from("hud".to_string()),
            Target::Named("hud".to_string())
        );
        let config = Config::from_toml("target = \"hud\"").unwrap();
        assert!(config.target.matches("hud"));
        assert!(!config.target.matches("menu"));
    }

    #[test]
    fn test_overrides_apply_only_some() {
        let base = Config::default();
        let merged = base
            .with_overrides(ConfigOverrides {
                platform: Some(Platform::Android),
                remove_sources: Some(true),
                ..ConfigOverrides::default()
            })
            .unwrap();
        assert_eq!(merged.platform, Platform::Android);
        assert!(merged.remove_sources);
        assert_eq!(merged.command, BuildCommand::All);
        assert!(!merged.update_manifest);
    }

    #[test]
    fn test_validate_rejects_shared_workspace_dirs() {
        let err = Config::from_toml("staging_dir = \"x\"\nresult_dir = \"x\"")
            .unwrap()
            .with_overrides(ConfigOverrides::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "result_dir", .. }));
    }

    #[test]
    fn test_platform_codecs() {
        assert_eq!(Platform::Web.codecs(), &[Codec::Rgba]);
        assert_eq!(Platform::Ios.codecs(), &[Codec::Rgba, Codec::Pvr]);
        assert_eq!(Platform::Android.codecs(), &[Codec::Etc]);
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
