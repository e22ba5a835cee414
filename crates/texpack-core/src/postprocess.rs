//! Steps that run after compression: manifest write-back, source pruning and
//! path inspection.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::{Config, Platform};
use crate::error::{Issue, PipelineError};
use crate::manifest::{ATF_MARKER, Manifest, ZIP_MARKER};
use crate::paths::{manifest_path, resolution_root, slot_path, staging_path};
use crate::workspace::{ensure_dir, remove_dir_if_exists};

/// Characters that may not appear in an asset path component.
const INVALID_PATH_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Append the low-quality markers (`atf_low`, `zip_low`) to every entry that
/// has the base marker, skipping the excluded family.
///
/// Returns how many markers were appended; a second call returns 0.
pub fn add_compressed_variant_extensions(manifest: &mut Manifest, excluded_family: &str, pvr_suffix: &str) -> usize {
    let atf_low = format!("{ATF_MARKER}{pvr_suffix}");
    let zip_low = format!("{ZIP_MARKER}{pvr_suffix}");
    let mut added = 0;

    for entry in &mut manifest.entries {
        let Some(name) = entry.name.as_deref() else {
            continue;
        };
        if !excluded_family.is_empty() && name.contains(excluded_family) {
            continue;
        }
        let Some(extensions) = entry.extensions.as_mut() else {
            continue;
        };
        for (base, low) in [(ATF_MARKER, &atf_low), (ZIP_MARKER, &zip_low)] {
            if extensions.iter().any(|e| e == base) && !extensions.iter().any(|e| e == low) {
                extensions.push(low.clone());
                added += 1;
            }
        }
    }
    added
}

/// Load the slot manifest, add the low-quality markers and write it back.
///
/// # Errors
///
/// Returns an error if the manifest cannot be read, parsed or written.
pub async fn update_manifest(config: &Config) -> Result<usize, PipelineError> {
    let path = manifest_path(config);
    let mut manifest = Manifest::load(&path).await?;
    let added = add_compressed_variant_extensions(&mut manifest, &config.excluded_family, &config.pvr_suffix);
    manifest.save(&path).await?;
    tracing::info!(added, path = %path.display(), "manifest updated");
    Ok(added)
}

/// Whether a file survives pruning.
fn is_retained_file(config: &Config, name: &str) -> bool {
    if config.platform == Platform::Ios && name == config.manifest_file_name {
        return true;
    }
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| config.asset_extensions.iter().any(|a| a == ext))
}

fn walk_error(root: &Path, e: &walkdir::Error) -> PipelineError {
    let path = e.path().unwrap_or(root).to_path_buf();
    PipelineError::fs("Walk directory", path, io::Error::other(e.to_string()))
}

/// Copy the retained part of `src` into `dst`: every directory, and every
/// file with an allow-listed extension (plus the manifest on iOS). Anything
/// whose name contains the excluded family is dropped, directory subtrees
/// included.
fn copy_retained(config: &Config, src: &Path, dst: &Path) -> Result<usize, PipelineError> {
    let excluded = config.excluded_family.as_str();
    let walker = WalkDir::new(src)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| excluded.is_empty() || !e.file_name().to_string_lossy().contains(excluded));

    let mut copied = 0;
    for entry in walker {
        let entry = entry.map_err(|e| walk_error(src, &e))?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else if is_retained_file(config, &entry.file_name().to_string_lossy()) {
            fs::copy(entry.path(), &target).map_err(|e| PipelineError::fs("Copy file", entry.path(), e))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Remove every empty directory below `root`, deepest first. Directories left
/// empty by their children's removal go too. `root` itself is kept.
fn remove_empty_dirs(root: &Path) -> Result<(), PipelineError> {
    let dirs: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_dir())
        .map(walkdir::DirEntry::into_path)
        .collect();

    for dir in dirs {
        let is_empty = fs::read_dir(&dir)
            .map_err(|e| PipelineError::fs("List directory", &dir, e))?
            .next()
            .is_none();
        if is_empty {
            fs::remove_dir(&dir).map_err(|e| PipelineError::fs("Remove directory", &dir, e))?;
        }
    }
    Ok(())
}

/// Strip everything but compressed assets (and on iOS the manifest) from the
/// slot's resolution root.
///
/// The retained files are copied to a holding directory, empty directories
/// are dropped there, the resolution root is deleted and the holding
/// directory copied back in its place. Running it again is a no-op.
///
/// # Errors
///
/// Returns an error on any filesystem failure. A failure after the
/// resolution root has been deleted leaves the retained files in the holding
/// directory.
pub fn prune_sources(config: &Config) -> Result<usize, PipelineError> {
    let root = resolution_root(config);
    let holding = staging_path(config);

    remove_dir_if_exists(&holding)?;
    ensure_dir(&holding)?;

    let retained = if root.is_dir() {
        copy_retained(config, &root, &holding)?
    } else {
        0
    };
    remove_empty_dirs(&holding)?;

    remove_dir_if_exists(&root)?;
    ensure_dir(&root)?;
    fs_extra::dir::copy(
        &holding,
        &root,
        &fs_extra::dir::CopyOptions::new()
            .content_only(true)
            .overwrite(true),
    )
    .map_err(|e| PipelineError::fs("Restore pruned sources", &root, io::Error::other(e.to_string())))?;

    remove_dir_if_exists(&holding)?;
    tracing::info!(retained, root = %root.display(), "sources pruned");
    Ok(retained)
}

/// Whether a single path component is free of reserved characters.
fn is_valid_component(component: &str) -> bool {
    !component
        .chars()
        .any(|c| c.is_control() || INVALID_PATH_CHARS.contains(&c))
}

/// Report every path inside the slot whose name contains characters that
/// are invalid in file names. A missing slot yields nothing.
pub fn inspect_paths(config: &Config) -> Vec<Issue> {
    let slot = slot_path(config);
    if !slot.exists() {
        return Vec::new();
    }

    let mut issues = Vec::new();
    for entry in WalkDir::new(&slot).min_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("skipping unreadable path: {e}");
                continue;
            }
        };
        if !is_valid_component(&entry.file_name().to_string_lossy()) {
            issues.push(Issue::InvalidPath {
                path: entry.into_path(),
            });
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;
    use tempfile::tempdir;

    fn config(root: &Path, platform: Platform) -> Config {
        Config {
            work_dir: root.join("work"),
            temp_root: root.join("temp"),
            slot_name: "main".to_string(),
            platform,
            ..Config::default()
        }
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn files_under(root: &Path) -> Vec<String> {
        let mut files: Vec<_> = WalkDir::new(root)
            .into_iter()
            .flatten()
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                e.path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_variant_markers_are_added_once() {
        let mut manifest = Manifest {
            entries: vec![
                ManifestEntry::new("hud", &["png", "atf"]),
                ManifestEntry::new("hero", &["zip"]),
                ManifestEntry::new("fonts", &["atf"]),
                ManifestEntry::new("sfx", &["mp3"]),
            ],
        };

        assert_eq!(add_compressed_variant_extensions(&mut manifest, "fonts", "_low"), 2);
        assert_eq!(
            manifest.entries[0].extensions.as_deref().unwrap(),
            ["png", "atf", "atf_low"]
        );
        assert_eq!(manifest.entries[1].extensions.as_deref().unwrap(), ["zip", "zip_low"]);
        assert_eq!(manifest.entries[2].extensions.as_deref().unwrap(), ["atf"]);

        let snapshot = manifest.clone();
        assert_eq!(add_compressed_variant_extensions(&mut manifest, "fonts", "_low"), 0);
        assert_eq!(manifest, snapshot);
    }

    #[tokio::test]
    async fn test_update_manifest_writes_back() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), Platform::Ios);
        let path = manifest_path(&cfg);
        touch(&path);
        fs::write(&path, r#"[{"n":"hud","e":["atf"]}]"#).unwrap();

        assert_eq!(update_manifest(&cfg).await.unwrap(), 1);
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"atf_low\""));
        assert!(written.ends_with('\n'));
    }

    #[test]
    fn test_prune_keeps_only_compressed_assets() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), Platform::Ios);
        let root = resolution_root(&cfg);
        for rel in [
            "manifest.json",
            "hud/en_US/hud-0001.png",
            "hud/en_US/hud-0001.atf",
            "hud/en_US/hud-0001.atf_low",
            "hero/en_US/hero-0001.zip",
            "hero/en_US/hero-0001.zip_low",
            "fonts/en_US/fonts-0001.atf",
            "sfx/en_US/click.mp3",
        ] {
            touch(&root.join(rel));
        }

        prune_sources(&cfg).unwrap();
        let first = files_under(&root);
        assert_eq!(
            first,
            [
                "hero/en_US/hero-0001.zip",
                "hero/en_US/hero-0001.zip_low",
                "hud/en_US/hud-0001.atf",
                "hud/en_US/hud-0001.atf_low",
                "manifest.json",
            ]
        );
        assert!(!root.join("sfx").exists());
        assert!(!root.join("fonts").exists());
        assert!(!staging_path(&cfg).exists());

        prune_sources(&cfg).unwrap();
        assert_eq!(files_under(&root), first);
    }

    #[test]
    fn test_prune_drops_manifest_off_ios() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), Platform::Android);
        let root = resolution_root(&cfg);
        touch(&root.join("manifest.json"));
        touch(&root.join("hud/en_US/hud-0001.atf"));

        prune_sources(&cfg).unwrap();
        assert_eq!(files_under(&root), ["hud/en_US/hud-0001.atf"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_inspect_reports_reserved_characters() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), Platform::Web);
        let root = resolution_root(&cfg);
        touch(&root.join("hud/en_US/hud-0001.png"));
        touch(&root.join("hud/en_US/bad?name.png"));

        let issues = inspect_paths(&cfg);
        assert_eq!(issues.len(), 1);
        match &issues[0] {
            Issue::InvalidPath { path } => assert!(path.ends_with("bad?name.png")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_inspect_missing_slot_is_quiet() {
        let dir = tempdir().unwrap();
        assert!(inspect_paths(&config(dir.path(), Platform::Web)).is_empty());
    }
}
