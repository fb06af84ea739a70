//! The extracted-file manifest.
//!
//! Maps each real content file (path relative to the target root, forward
//! slashes) to its expected byte size. Built by the extraction engine,
//! rebuilt by the layout normalizer, consumed once by the verifier.
//! Persisted as `filemap.<target>.json` beside the content so verification
//! can run without re-reading the archives.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ArchiveError;
use crate::descriptor;

/// Path of the manifest file for a target inside its directory.
pub fn manifest_path(target_dir: &Path, target: &str) -> PathBuf {
    target_dir.join(format!("filemap.{}.json", target))
}

/// Expected metadata for one extracted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Declared (archive header) or observed byte size.
    pub size: u64,
}

/// Mapping of relative paths to expected sizes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileManifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl FileManifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file with its expected size. Paths are normalized to
    /// forward slashes so the manifest is portable across hosts.
    pub fn insert(&mut self, relative: &Path, size: u64) {
        self.entries.insert(normalize(relative), ManifestEntry { size });
    }

    /// Remove a recorded file.
    pub fn remove(&mut self, relative: &Path) -> Option<ManifestEntry> {
        self.entries.remove(&normalize(relative))
    }

    pub fn contains(&self, relative: &Path) -> bool {
        self.entries.contains_key(&normalize(relative))
    }

    pub fn get(&self, relative: &Path) -> Option<ManifestEntry> {
        self.entries.get(&normalize(relative)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ManifestEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge another manifest into this one, overwriting duplicates.
    pub fn extend(&mut self, other: FileManifest) {
        self.entries.extend(other.entries);
    }

    /// Atomically persist to `filemap.<target>.json`.
    pub fn save(&self, target_dir: &Path, target: &str) -> Result<(), ArchiveError> {
        let path = manifest_path(target_dir, target);
        descriptor::write_json(&path, self).map_err(|e| ArchiveError::ManifestWrite {
            path,
            reason: e.to_string(),
        })
    }

    /// Load a previously persisted manifest.
    pub fn load(target_dir: &Path, target: &str) -> Result<Self, ArchiveError> {
        let path = manifest_path(target_dir, target);
        let body = fs::read_to_string(&path).map_err(|e| ArchiveError::ManifestRead {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&body).map_err(|e| ArchiveError::ManifestRead {
            path,
            reason: e.to_string(),
        })
    }
}

fn normalize(relative: &Path) -> String {
    let raw = relative.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        raw.to_string()
    } else {
        raw.replace(std::path::MAIN_SEPARATOR, "/")
    }
}
