//! Slot manifest parsing and task derivation.
//!
//! The manifest (`<slot>/<resolution>/manifest.json`) is a JSON array of
//! `{ "n": <name>, "e": [<extensions>] }` objects. Each entry names one atlas
//! or bundle and lists the file variants known to exist for it. Entries may
//! carry other keys; they are preserved untouched when the manifest is
//! written back.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;

use crate::codec::Codec;
use crate::compressor::CompressionTask;
use crate::config::Config;
use crate::error::PipelineError;
use crate::paths::{resolve_file_path, versioned_file_name};

/// Extension marker for compressed atlases.
pub const ATF_MARKER: &str = "atf";
/// Extension marker for animation bundles.
pub const ZIP_MARKER: &str = "zip";

/// One manifest entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Asset name (`n`).
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Known file variants (`e`), in manifest order.
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
    /// Any other keys, kept for write-back.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ManifestEntry {
    /// Create an entry with a name and extension list.
    pub fn new(name: impl Into<String>, extensions: &[&str]) -> Self {
        Self {
            name: Some(name.into()),
            extensions: Some(extensions.iter().map(|e| (*e).to_string()).collect()),
            extra: Map::new(),
        }
    }

    /// Name and extensions, if both are present. Entries missing either are
    /// never processed.
    pub fn parts(&self) -> Option<(&str, &[String])> {
        match (&self.name, &self.extensions) {
            (Some(n), Some(e)) if !n.is_empty() => Some((n.as_str(), e.as_slice())),
            _ => None,
        }
    }

    /// Whether the extension list contains `marker`.
    pub fn has_extension(&self, marker: &str) -> bool {
        self.extensions
            .as_deref()
            .is_some_and(|exts| exts.iter().any(|e| e == marker))
    }
}

/// The whole manifest, in file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    /// Entries in file order.
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Parse manifest JSON. `path` is only used for the error.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ManifestUnreadable`] if `content` is not a
    /// JSON array of objects.
    pub fn parse(path: &Path, content: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(content).map_err(|e| PipelineError::ManifestUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Read and parse the manifest at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ManifestUnreadable`] if the file is missing,
    /// unreadable or malformed.
    pub async fn load(path: &Path) -> Result<Self, PipelineError> {
        let content =
            fs::read_to_string(path)
                .await
                .map_err(|e| PipelineError::ManifestUnreadable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
        Self::parse(path, &content)
    }

    /// Serialize as JSON indented with four spaces and a trailing newline.
    pub fn to_pretty_json(&self) -> String {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        // Maps with string keys and string arrays cannot fail to serialize.
        if self.serialize(&mut ser).is_err() {
            return "[]\n".to_string();
        }
        let mut text = String::from_utf8_lossy(&buf).into_owned();
        text.push('\n');
        text
    }

    /// Atomically write the manifest back to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Filesystem`] if writing or the final rename
    /// fails.
    pub async fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, self.to_pretty_json())
            .await
            .map_err(|e| PipelineError::fs("Write manifest", &temp_path, e))?;
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| PipelineError::fs("Replace manifest", path, e))?;
        Ok(())
    }
}

/// Whether an entry is eligible for atlas compression with `codec`.
///
/// It needs an `atf` marker; PVR and ETC additionally skip names containing
/// the excluded family token. RGBA compresses excluded atlases too.
pub fn atlas_eligible(entry: &ManifestEntry, codec: Codec, excluded_family: &str) -> bool {
    let Some((name, _)) = entry.parts() else {
        return false;
    };
    if !entry.has_extension(ATF_MARKER) {
        return false;
    }
    !(codec.skips_excluded_family() && !excluded_family.is_empty() && name.contains(excluded_family))
}

/// Build one compression task per eligible atlas that passes the target
/// filter, in manifest order.
pub fn derive_atlas_tasks(manifest: &Manifest, config: &Config, codec: Codec) -> Vec<CompressionTask> {
    manifest
        .entries
        .iter()
        .filter(|entry| atlas_eligible(entry, codec, &config.excluded_family))
        .filter_map(ManifestEntry::parts)
        .filter(|(name, _)| config.target.matches(name))
        .map(|(name, _)| {
            let file_name = versioned_file_name(config, name, "png");
            let source = resolve_file_path(config, name, &file_name);
            CompressionTask::new(source, codec, false, &config.pvr_suffix)
        })
        .collect()
}

/// Resolve the slot path of every bundle entry that passes the target filter,
/// in manifest order.
pub fn derive_archive_list(manifest: &Manifest, config: &Config) -> Vec<PathBuf> {
    manifest
        .entries
        .iter()
        .filter(|entry| entry.has_extension(ZIP_MARKER))
        .filter_map(ManifestEntry::parts)
        .filter(|(name, _)| config.target.matches(name))
        .map(|(name, _)| {
            let file_name = versioned_file_name(config, name, "zip");
            resolve_file_path(config, name, &file_name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Target;

    fn config() -> Config {
        Config {
            work_dir: PathBuf::from("/w"),
            slot_name: "s".to_string(),
            ..Config::default()
        }
    }

    fn manifest(json: &str) -> Manifest {
        Manifest::parse(Path::new("manifest.json"), json).unwrap()
    }

    #[test]
    fn test_parse_rejects_non_array() {
        let err = Manifest::parse(Path::new("m.json"), r#"{"n":"hud"}"#).unwrap_err();
        assert!(matches!(err, PipelineError::ManifestUnreadable { .. }));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = Manifest::parse(Path::new("m.json"), "not json").unwrap_err();
        assert!(matches!(err, PipelineError::ManifestUnreadable { .. }));
    }

    #[test]
    fn test_rgba_one_task_per_atf_entry() {
        let m = manifest(
            r#"[
                {"n":"hud","e":["png","atf","json"]},
                {"n":"menu","e":["atf"]},
                {"n":"sounds","e":["mp3"]},
                {"n":"fonts_main","e":["atf"]}
            ]"#,
        );
        let tasks = derive_atlas_tasks(&m, &config(), Codec::Rgba);
        let names: Vec<_> = tasks
            .iter()
            .map(|t| t.source.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["hud-0001.png", "menu-0001.png", "fonts_main-0001.png"]);
    }

    #[test]
    fn test_pvr_and_etc_skip_excluded_family() {
        let m = manifest(r#"[{"n":"hud","e":["atf"]},{"n":"fonts","e":["atf"]}]"#);
        for codec in [Codec::Pvr, Codec::Etc] {
            let tasks = derive_atlas_tasks(&m, &config(), codec);
            assert_eq!(tasks.len(), 1);
            assert!(tasks[0].source.ends_with("hud/en_US/hud-0001.png"));
        }
    }

    #[test]
    fn test_entries_missing_fields_are_ignored() {
        let m = manifest(r#"[{"n":"hud"},{"e":["atf"]},{"n":"","e":["atf"]}]"#);
        assert!(derive_atlas_tasks(&m, &config(), Codec::Rgba).is_empty());
        assert!(derive_archive_list(&m, &config()).is_empty());
    }

    #[test]
    fn test_target_filter_limits_tasks() {
        let m = manifest(
            r#"[{"n":"hud","e":["atf","zip"]},{"n":"menu","e":["atf","zip"]}]"#,
        );
        let cfg = Config {
            target: Target::Named("menu".to_string()),
            ..config()
        };
        let tasks = derive_atlas_tasks(&m, &cfg, Codec::Rgba);
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].source.ends_with("menu/en_US/menu-0001.png"));

        let archives = derive_archive_list(&m, &cfg);
        assert_eq!(
            archives,
            [PathBuf::from("/w/slots/s/960x640/menu/en_US/menu-0001.zip")]
        );
    }

    #[test]
    fn test_archive_list_requires_zip_marker() {
        let m = manifest(r#"[{"n":"hero","e":["zip"]},{"n":"hud","e":["atf"]}]"#);
        let archives = derive_archive_list(&m, &config());
        assert_eq!(archives.len(), 1);
        assert!(archives[0].ends_with("hero/en_US/hero-0001.zip"));
    }

    #[test]
    fn test_pretty_json_preserves_extra_keys() {
        let m = manifest(r#"[{"n":"hud","e":["atf"],"v":3}]"#);
        let text = m.to_pretty_json();
        assert!(text.contains("\n    {\n        \"n\": \"hud\""));
        assert!(text.contains("\"v\": 3"));
        assert!(text.ends_with("]\n"));
        assert_eq!(manifest(&text), m);
    }
}
