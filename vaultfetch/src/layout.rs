//! Directory layout normalization after extraction.
//!
//! Archives routinely wrap their content in a superfluous top-level
//! directory (often named after the release). The normalizer flattens such
//! wrappers into the target root, rebuilds the manifest from the final
//! tree, and strips junk (`.url` shortcuts, `_CommonRedist` subtrees).
//! Everything here is best-effort: a move that fails is logged and left
//! behind, never escalated into a run failure.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::archive::{self, FileManifest, REDIST_DIR};
use crate::descriptor::descriptor_path;

/// Header images the caller drops beside the content; never moved or
/// overwritten.
const HEADER_IMAGES: [&str; 3] = ["header.jpg", "header.png", "header.webp"];

/// Errors from layout normalization. Only raised when the target root
/// itself cannot be read; per-entry problems are logged and skipped.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Keep only characters that are safe in a directory name across
/// platforms: ASCII alphanumerics, `-_.()` and space.
pub fn sanitize_folder_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '(' | ')' | ' '))
        .collect()
}

/// Flattens wrapper directories and rebuilds the manifest.
#[derive(Debug)]
pub struct LayoutNormalizer {
    target_root: PathBuf,
    target: String,
}

impl LayoutNormalizer {
    pub fn new(target_root: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            target_root: target_root.into(),
            target: target.into(),
        }
    }

    /// Normalize the tree: flatten candidates, purge junk, rebuild the
    /// manifest from what is actually on disk.
    pub fn normalize(&self) -> Result<FileManifest, LayoutError> {
        for candidate in self.flatten_candidates()? {
            self.flatten_into_root(&candidate);
        }
        self.remove_junk();
        Ok(self.rebuild_manifest())
    }

    /// Flatten one explicitly named wrapper directory (retry-folder flow),
    /// then purge junk and rebuild the manifest.
    pub fn flatten_named(&self, folder: &str) -> Result<FileManifest, LayoutError> {
        let dir = self.target_root.join(sanitize_folder_name(folder));
        if dir.is_dir() {
            self.flatten_into_root(&dir);
        } else {
            tracing::warn!(path = %dir.display(), "named wrapper directory not found");
        }
        self.remove_junk();
        Ok(self.rebuild_manifest())
    }

    /// Wrapper directories eligible for flattening.
    ///
    /// 1. A subdirectory named after the sanitized target.
    /// 2. The only subdirectory at the root, when the root holds no other
    ///    content files and the subdirectory is non-empty.
    fn flatten_candidates(&self) -> Result<Vec<PathBuf>, LayoutError> {
        let mut candidates = Vec::new();

        let named = self.target_root.join(sanitize_folder_name(&self.target));
        if named.is_dir() {
            candidates.push(named);
        }

        let mut content_dirs = Vec::new();
        let mut has_root_files = false;
        let entries = fs::read_dir(&self.target_root).map_err(|e| LayoutError::ReadDir {
            path: self.target_root.clone(),
            source: e,
        })?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if name != REDIST_DIR && !is_metadata_name(&name, &self.target) {
                    content_dirs.push(path);
                }
            } else if !is_metadata_name(&name, &self.target) {
                has_root_files = true;
            }
        }

        if !has_root_files && content_dirs.len() == 1 {
            let lone = content_dirs.remove(0);
            let non_empty = fs::read_dir(&lone)
                .map(|mut d| d.next().is_some())
                .unwrap_or(false);
            if non_empty && !candidates.contains(&lone) {
                candidates.push(lone);
            }
        }

        Ok(candidates)
    }

    /// Move every entry of `dir` up into the target root.
    ///
    /// Protected destinations and self-moves are skipped; pre-existing
    /// destinations are replaced wholesale. The emptied wrapper is removed;
    /// a partially moved wrapper is left in place and logged.
    fn flatten_into_root(&self, dir: &Path) {
        tracing::info!(dir = %dir.display(), "flattening wrapper directory");

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "cannot read wrapper");
                return;
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let source = entry.path();
            let destination = self.target_root.join(entry.file_name());

            if self.is_protected(&destination) {
                tracing::debug!(path = %destination.display(), "skipping protected destination");
                continue;
            }
            // Self-move guard: never move the wrapper onto itself.
            if destination == *dir {
                continue;
            }

            if destination.exists() {
                let removed = if destination.is_dir() {
                    fs::remove_dir_all(&destination)
                } else {
                    fs::remove_file(&destination)
                };
                if let Err(e) = removed {
                    tracing::warn!(
                        path = %destination.display(),
                        error = %e,
                        "cannot replace existing entry, skipping move"
                    );
                    continue;
                }
            }

            if let Err(e) = fs::rename(&source, &destination) {
                tracing::warn!(
                    from = %source.display(),
                    to = %destination.display(),
                    error = %e,
                    "move failed"
                );
            }
        }

        match fs::read_dir(dir).map(|mut d| d.next().is_none()) {
            Ok(true) => {
                if let Err(e) = fs::remove_dir(dir) {
                    tracing::warn!(dir = %dir.display(), error = %e, "cannot remove wrapper");
                }
            }
            _ => {
                tracing::warn!(
                    dir = %dir.display(),
                    "wrapper not empty after flatten, leaving in place"
                );
            }
        }
    }

    /// Rebuild the manifest from a walk of the final tree.
    fn rebuild_manifest(&self) -> FileManifest {
        let mut manifest = FileManifest::new();
        for entry in WalkDir::new(&self.target_root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let relative = match entry.path().strip_prefix(&self.target_root) {
                Ok(r) => r.to_path_buf(),
                Err(_) => continue,
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if archive::is_junk_path(&relative)
                || archive::has_archive_extension(&relative)
                || is_metadata_name(&name, &self.target)
            {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            manifest.insert(&relative, size);
        }
        manifest
    }

    /// Delete shortcut files and redistributable subtrees anywhere in the
    /// tree.
    fn remove_junk(&self) {
        let mut shortcuts = Vec::new();
        let mut redist_dirs = Vec::new();
        for entry in WalkDir::new(&self.target_root)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().is_dir() && name == REDIST_DIR {
                redist_dirs.push(entry.path().to_path_buf());
            } else if entry.file_type().is_file()
                && name.to_lowercase().ends_with(".url")
            {
                shortcuts.push(entry.path().to_path_buf());
            }
        }

        for path in shortcuts {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "cannot delete shortcut");
            }
        }
        for path in redist_dirs {
            tracing::info!(path = %path.display(), "removing redistributable directory");
            if let Err(e) = fs::remove_dir_all(&path) {
                tracing::warn!(path = %path.display(), error = %e, "cannot delete redist dir");
            }
        }
    }

    /// Paths that must never be displaced by a flatten.
    fn is_protected(&self, destination: &Path) -> bool {
        if *destination == descriptor_path(&self.target_root, &self.target)
            || *destination == archive::manifest_path(&self.target_root, &self.target)
        {
            return true;
        }
        destination
            .file_name()
            .map(|n| {
                let name = n.to_string_lossy().to_lowercase();
                HEADER_IMAGES.contains(&name.as_str())
            })
            .unwrap_or(false)
    }
}

/// Whether a file or directory name belongs to the pipeline's own metadata
/// for this target.
fn is_metadata_name(name: &str, target: &str) -> bool {
    name == format!("{}.descriptor.json", target)
        || name.starts_with("filemap.")
        || HEADER_IMAGES.contains(&name.to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path, body: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_sanitize_folder_name() {
        assert_eq!(sanitize_folder_name("My Game (v1.2)"), "My Game (v1.2)");
        assert_eq!(sanitize_folder_name("a/b\\c:d*e"), "abcde");
        assert_eq!(sanitize_folder_name("héllo wörld"), "hllo wrld");
        assert_eq!(sanitize_folder_name("under_score-dash"), "under_score-dash");
    }

    #[test]
    fn test_flatten_named_wrapper() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("My Game/game.exe"), b"EXE");
        touch(&temp.path().join("My Game/data/pak01.bin"), b"PAK");

        let normalizer = LayoutNormalizer::new(temp.path(), "My Game");
        let manifest = normalizer.normalize().unwrap();

        assert!(temp.path().join("game.exe").exists());
        assert!(temp.path().join("data/pak01.bin").exists());
        assert!(!temp.path().join("My Game").exists());
        assert_eq!(manifest.len(), 2);
    }

    #[test]
    fn test_flatten_single_unexplained_subdir() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("Release-1.0/game.exe"), b"EXE");
        touch(&temp.path().join("Other Game.descriptor.json"), b"{}");

        let normalizer = LayoutNormalizer::new(temp.path(), "Other Game");
        normalizer.normalize().unwrap();

        assert!(temp.path().join("game.exe").exists());
        assert!(!temp.path().join("Release-1.0").exists());
    }

    #[test]
    fn test_no_flatten_when_root_has_content_files() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("game.exe"), b"EXE");
        touch(&temp.path().join("extras/bonus.bin"), b"B");

        let normalizer = LayoutNormalizer::new(temp.path(), "Some Game");
        normalizer.normalize().unwrap();

        // extras/ is not a wrapper: the root already holds real content.
        assert!(temp.path().join("extras/bonus.bin").exists());
    }

    #[test]
    fn test_no_flatten_with_multiple_subdirs() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("bin/game.exe"), b"EXE");
        touch(&temp.path().join("data/pak01.bin"), b"PAK");

        let normalizer = LayoutNormalizer::new(temp.path(), "Some Game");
        normalizer.normalize().unwrap();

        assert!(temp.path().join("bin/game.exe").exists());
        assert!(temp.path().join("data/pak01.bin").exists());
    }

    #[test]
    fn test_flatten_never_displaces_protected_files() {
        let temp = TempDir::new().unwrap();
        let descriptor = temp.path().join("My Game.descriptor.json");
        touch(&descriptor, b"{\"target\": \"My Game\"}");
        // Wrapper carries an impostor descriptor.
        touch(
            &temp.path().join("My Game/My Game.descriptor.json"),
            b"{\"impostor\": true}",
        );
        touch(&temp.path().join("My Game/game.exe"), b"EXE");

        let normalizer = LayoutNormalizer::new(temp.path(), "My Game");
        normalizer.normalize().unwrap();

        let body = fs::read_to_string(&descriptor).unwrap();
        assert!(body.contains("target"), "real descriptor untouched");
        assert!(temp.path().join("game.exe").exists());
        // Wrapper still holds the impostor, so it is left in place.
        assert!(temp.path().join("My Game").exists());
    }

    #[test]
    fn test_flatten_overwrites_unprotected_duplicates() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("My Game/game.exe"), b"NEW");
        touch(&temp.path().join("game.exe"), b"OLD");
        // A root content file would normally veto candidate 2, but the
        // named candidate still applies.
        let normalizer = LayoutNormalizer::new(temp.path(), "My Game");
        normalizer.normalize().unwrap();

        assert_eq!(fs::read(temp.path().join("game.exe")).unwrap(), b"NEW");
    }

    #[test]
    fn test_junk_removed_everywhere() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("game.exe"), b"EXE");
        touch(&temp.path().join("More Games.url"), b"[InternetShortcut]");
        touch(&temp.path().join("deep/nested/Site.URL"), b"x");
        touch(&temp.path().join("_CommonRedist/vcredist.exe"), b"MZ");
        touch(&temp.path().join("deep/_CommonRedist/dx.exe"), b"MZ");

        let normalizer = LayoutNormalizer::new(temp.path(), "Some Game");
        let manifest = normalizer.normalize().unwrap();

        assert!(!temp.path().join("More Games.url").exists());
        assert!(!temp.path().join("deep/nested/Site.URL").exists());
        assert!(!temp.path().join("_CommonRedist").exists());
        assert!(!temp.path().join("deep/_CommonRedist").exists());
        assert_eq!(manifest.len(), 1);
        assert!(manifest.contains(Path::new("game.exe")));
    }

    #[test]
    fn test_rebuilt_manifest_excludes_side_files_and_archives() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("game.exe"), b"EXE");
        touch(&temp.path().join("leftover.zip"), b"PK\x03\x04");
        touch(&temp.path().join("Some Game.descriptor.json"), b"{}");
        touch(&temp.path().join("filemap.Some Game.json"), b"{}");
        touch(&temp.path().join("header.jpg"), b"JPG");

        let normalizer = LayoutNormalizer::new(temp.path(), "Some Game");
        let manifest = normalizer.normalize().unwrap();

        assert_eq!(manifest.len(), 1);
        assert!(manifest.contains(Path::new("game.exe")));
    }

    #[test]
    fn test_flatten_named_flow() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("Wrapped Game/game.exe"), b"EXE");
        touch(&temp.path().join("stale.url"), b"x");

        let normalizer = LayoutNormalizer::new(temp.path(), "Some Game");
        let manifest = normalizer.flatten_named("Wrapped Game").unwrap();

        assert!(temp.path().join("game.exe").exists());
        assert!(!temp.path().join("Wrapped Game").exists());
        assert!(!temp.path().join("stale.url").exists());
        assert!(manifest.contains(Path::new("game.exe")));
    }
}
