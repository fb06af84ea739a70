//! Nested-archive discovery and the extraction work queue.
//!
//! Installers frequently ship as archives containing further archives. The
//! engine processes a queue seeded with the downloaded artifact, then
//! rescans the target tree for archive files it has not yet processed and
//! repeats until a pass discovers nothing new. The loop is bounded by a
//! rescan-pass cap and a total-archive cap so a pathological
//! archive-in-archive input cannot run away with the disk.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::extract::{extract_rar, extract_zip};
use super::format::{has_archive_extension, ArchiveKind, Detection};
use super::manifest::FileManifest;
use super::ArchiveError;

/// Default cap on rescan passes.
const DEFAULT_MAX_PASSES: usize = 8;

/// Default cap on total archives processed in one run.
const DEFAULT_MAX_ARCHIVES: usize = 1000;

/// Recursive archive extractor.
#[derive(Debug)]
pub struct ExtractionEngine {
    max_passes: usize,
    max_archives: usize,
}

impl Default for ExtractionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionEngine {
    pub fn new() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            max_archives: DEFAULT_MAX_ARCHIVES,
        }
    }

    /// Override the rescan-pass bound.
    pub fn with_max_passes(mut self, passes: usize) -> Self {
        self.max_passes = passes.max(1);
        self
    }

    /// Override the total-archive bound.
    pub fn with_max_archives(mut self, archives: usize) -> Self {
        self.max_archives = archives.max(1);
        self
    }

    /// Extract `initial_archive` and every nested archive discovered under
    /// `target_root`, returning the manifest of extracted content files.
    ///
    /// Individual archive failures (corruption, missing rar capability,
    /// unsupported formats) are logged and skipped; the run continues.
    pub fn run(
        &self,
        initial_archive: &Path,
        target_root: &Path,
    ) -> Result<FileManifest, ArchiveError> {
        let mut manifest = FileManifest::new();
        let mut processed: HashSet<PathBuf> = HashSet::new();
        let mut pending = vec![initial_archive.to_path_buf()];
        let mut passes = 0;

        while !pending.is_empty() {
            if passes >= self.max_passes {
                tracing::warn!(
                    passes,
                    remaining = pending.len(),
                    "nested extraction pass bound reached, stopping discovery"
                );
                break;
            }
            passes += 1;

            for archive in pending.drain(..) {
                let key = canonical_key(&archive);
                if !processed.insert(key) {
                    continue;
                }
                if processed.len() > self.max_archives {
                    tracing::warn!(
                        cap = self.max_archives,
                        "archive cap reached, stopping extraction"
                    );
                    return Ok(manifest);
                }
                self.extract_one(&archive, target_root, &mut manifest);
            }

            pending = self.scan_for_archives(target_root, &processed);
        }

        Ok(manifest)
    }

    /// Extract a single archive, dispatching on its magic-byte kind, and
    /// delete it on success.
    fn extract_one(&self, archive: &Path, target_root: &Path, manifest: &mut FileManifest) {
        if !archive.exists() {
            return;
        }

        let detection = match Detection::detect(archive) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(path = %archive.display(), error = %e, "cannot probe archive");
                return;
            }
        };

        let result = match detection.kind {
            ArchiveKind::Zip => extract_zip(archive, target_root, manifest),
            ArchiveKind::Rar => extract_rar(archive, target_root, manifest),
            ArchiveKind::SevenZ => {
                tracing::warn!(
                    path = %archive.display(),
                    "7z archives are not supported, skipping"
                );
                return;
            }
            ArchiveKind::Sfx => {
                tracing::warn!(
                    path = %archive.display(),
                    "self-extracting executable left in place"
                );
                return;
            }
            ArchiveKind::Unknown => {
                tracing::debug!(
                    path = %archive.display(),
                    magic = %detection.magic_hex(),
                    "not an archive, skipping"
                );
                return;
            }
        };

        match result {
            Ok(count) => {
                tracing::info!(
                    path = %archive.display(),
                    kind = %detection.kind,
                    files = count,
                    "archive extracted"
                );
                if let Err(e) = fs::remove_file(archive) {
                    tracing::warn!(
                        path = %archive.display(),
                        error = %e,
                        "could not remove source archive"
                    );
                }
                // A consumed nested archive is not content.
                if let Ok(relative) = archive.strip_prefix(target_root) {
                    manifest.remove(relative);
                }
            }
            Err(e) => {
                tracing::warn!(path = %archive.display(), error = %e, "archive skipped");
            }
        }
    }

    /// Find archive-extension files under the root not yet processed.
    fn scan_for_archives(&self, target_root: &Path, processed: &HashSet<PathBuf>) -> Vec<PathBuf> {
        WalkDir::new(target_root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .filter(|p| has_archive_extension(p))
            .filter(|p| !processed.contains(&canonical_key(p)))
            .collect()
    }
}

/// Stable identity for a processed archive path.
///
/// Canonicalization resolves the path once so renames into the processed
/// set cannot re-enqueue the same physical file; a path that no longer
/// exists falls back to its literal form.
fn canonical_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
