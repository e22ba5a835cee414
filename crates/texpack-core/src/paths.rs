//! Slot and workspace path layout.

use std::path::{Path, PathBuf};

use crate::config::Config;

/// Slot directory: `<work_dir>/slots/<slot>`
pub fn slot_path(config: &Config) -> PathBuf {
    config
        .work_dir
        .join(&config.work_sub_dir)
        .join(&config.slot_name)
}

/// Resolution root inside the slot: `<slot>/<resolution>`
pub fn resolution_root(config: &Config) -> PathBuf {
    slot_path(config).join(&config.resolution)
}

/// Manifest path: `<slot>/<resolution>/manifest.json`
pub fn manifest_path(config: &Config) -> PathBuf {
    resolution_root(config).join(&config.manifest_file_name)
}

/// Resolve an asset file: `<slot>/<resolution>/<dir>/<locale>/<file_name>`
pub fn resolve_file_path(config: &Config, dir: &str, file_name: &str) -> PathBuf {
    resolution_root(config)
        .join(dir)
        .join(&config.locale)
        .join(file_name)
}

/// Versioned file name for an entry: `<name><version_suffix>.<ext>`
pub fn versioned_file_name(config: &Config, name: &str, ext: &str) -> String {
    format!("{name}{}.{ext}", config.version_suffix)
}

/// Staging directory for copied bundles: `<temp_root>/tmp`
pub fn staging_path(config: &Config) -> PathBuf {
    config.temp_root.join(&config.staging_dir)
}

/// Extraction and rebuild directory: `<temp_root>/tmp_result_gaf`
pub fn result_path(config: &Config) -> PathBuf {
    config.temp_root.join(&config.result_dir)
}

/// Entry name for a versioned file name, e.g. `hud-0001.zip` -> `hud`.
///
/// Cuts at the last occurrence of the version suffix. Names without the
/// suffix fall back to the stem.
pub fn entry_name_from_file(config: &Config, file_name: &str) -> String {
    if !config.version_suffix.is_empty() {
        if let Some(idx) = file_name.rfind(&config.version_suffix) {
            return file_name[..idx].to_string();
        }
    }
    Path::new(file_name)
        .file_stem()
        .map_or_else(String::new, |s| s.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            work_dir: PathBuf::from("/work"),
            slot_name: "main".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_resolve_file_path_layout() {
        let cfg = config();
        let file = versioned_file_name(&cfg, "hud", "png");
        assert_eq!(
            resolve_file_path(&cfg, "hud", &file),
            PathBuf::from("/work/slots/main/960x640/hud/en_US/hud-0001.png")
        );
    }

    #[test]
    fn test_manifest_path_layout() {
        assert_eq!(
            manifest_path(&config()),
            PathBuf::from("/work/slots/main/960x640/manifest.json")
        );
    }

    #[test]
    fn test_entry_name_strips_version_suffix() {
        let cfg = config();
        assert_eq!(entry_name_from_file(&cfg, "hud-0001.zip"), "hud");
        assert_eq!(entry_name_from_file(&cfg, "hud-0001"), "hud");
        assert_eq!(entry_name_from_file(&cfg, "a-0001-b-0001.zip"), "a-0001-b");
        assert_eq!(entry_name_from_file(&cfg, "plain.zip"), "plain");
    }
}
