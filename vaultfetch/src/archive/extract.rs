//! Format-specific extractors.
//!
//! Zip is handled natively and validates the archive's CRC table before any
//! member is written. Rar goes through the external unrar library; when that
//! capability is missing or the archive is damaged the archive is skipped
//! with a logged failure instead of aborting the run. 7z and self-extracting
//! executables are recognized but explicitly unsupported.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::manifest::FileManifest;
use super::ArchiveError;

/// Directory name for bundled runtime redistributables, excluded from the
/// manifest and deleted after extraction.
pub const REDIST_DIR: &str = "_CommonRedist";

/// Extension of browser shortcut files bundled by some uploaders.
pub const SHORTCUT_EXT: &str = "url";

/// Whether an archive member path is junk that should neither be extracted
/// nor recorded.
pub fn is_junk_member(member: &str) -> bool {
    let lowered = member.to_lowercase();
    if lowered.ends_with(".url") {
        return true;
    }
    member
        .split(['/', '\\'])
        .any(|component| component == REDIST_DIR)
}

/// Whether a filesystem path under the target root is junk.
pub fn is_junk_path(relative: &Path) -> bool {
    if relative
        .extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(SHORTCUT_EXT))
        .unwrap_or(false)
    {
        return true;
    }
    relative
        .components()
        .any(|c| c.as_os_str() == REDIST_DIR)
}

/// Extract a zip archive into `target_root`, recording each real member in
/// `manifest`. Returns the number of files written.
///
/// The archive is CRC-validated up front; corruption fails the whole
/// archive before anything is written. Per-member extraction errors after
/// that are logged and leave the member out of the manifest.
pub fn extract_zip(
    archive_path: &Path,
    target_root: &Path,
    manifest: &mut FileManifest,
) -> Result<usize, ArchiveError> {
    let file = File::open(archive_path).map_err(|e| ArchiveError::Io {
        path: archive_path.to_path_buf(),
        source: e,
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| ArchiveError::CorruptArchive {
        path: archive_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    validate_zip(&mut archive, archive_path)?;

    let mut written = 0;
    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(index, error = %e, "skipping unreadable zip member");
                continue;
            }
        };

        if is_junk_member(entry.name()) {
            continue;
        }

        // Reject members that would escape the target root.
        let relative = match entry.enclosed_name() {
            Some(p) => p,
            None => {
                tracing::warn!(member = entry.name(), "skipping unsafe zip member path");
                continue;
            }
        };
        let destination = target_root.join(&relative);

        if entry.is_dir() {
            if let Err(e) = fs::create_dir_all(&destination) {
                tracing::warn!(path = %destination.display(), error = %e, "mkdir failed");
            }
            continue;
        }

        let declared_size = entry.size();
        if let Err(e) = write_member(&mut entry, &destination) {
            tracing::warn!(
                member = %relative.display(),
                error = %e,
                "failed to extract zip member"
            );
            continue;
        }

        manifest.insert(&relative, declared_size);
        written += 1;
    }

    Ok(written)
}

fn write_member(entry: &mut impl io::Read, destination: &Path) -> io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(destination)?;
    io::copy(entry, &mut out)?;
    Ok(())
}

/// Stream every member to a sink so stored CRCs are checked before
/// extraction begins.
fn validate_zip(
    archive: &mut zip::ZipArchive<File>,
    archive_path: &Path,
) -> Result<(), ArchiveError> {
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ArchiveError::CorruptArchive {
                path: archive_path.to_path_buf(),
                reason: e.to_string(),
            })?;
        io::copy(&mut entry, &mut io::sink()).map_err(|e| ArchiveError::CorruptArchive {
            path: archive_path.to_path_buf(),
            reason: format!("CRC validation failed: {}", e),
        })?;
    }
    Ok(())
}

/// Extract a rar archive into `target_root` via the unrar library.
///
/// Rar extraction cannot enumerate-then-extract the way zip can, so the
/// manifest is built from a before/after walk of the target tree. Junk
/// paths are excluded from the manifest (they are deleted later by the
/// layout cleanup).
pub fn extract_rar(
    archive_path: &Path,
    target_root: &Path,
    manifest: &mut FileManifest,
) -> Result<usize, ArchiveError> {
    let archive_str = archive_path
        .to_str()
        .ok_or_else(|| ArchiveError::UnsupportedPath {
            path: archive_path.to_path_buf(),
        })?;
    let root_str = target_root
        .to_str()
        .ok_or_else(|| ArchiveError::UnsupportedPath {
            path: target_root.to_path_buf(),
        })?;

    let before = snapshot_files(target_root);

    rar::Archive::extract_all(archive_str, root_str, "").map_err(|e| {
        ArchiveError::RarUnavailable {
            path: archive_path.to_path_buf(),
            reason: format!("{:?}", e),
        }
    })?;

    let mut written = 0;
    for path in snapshot_files(target_root) {
        if before.contains(&path) {
            continue;
        }
        let relative = match path.strip_prefix(target_root) {
            Ok(r) => r.to_path_buf(),
            Err(_) => continue,
        };
        if is_junk_path(&relative) {
            continue;
        }
        let size = path.metadata().map(|m| m.len()).unwrap_or(0);
        manifest.insert(&relative, size);
        written += 1;
    }

    Ok(written)
}

fn snapshot_files(root: &Path) -> BTreeSet<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect()
}
