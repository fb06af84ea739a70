//! Archive classification, extraction, and the extracted-file manifest.
//!
//! The downloaded artifact is classified from magic bytes (never the URL
//! extension), renamed to its canonical extension, and fed through
//! [`ExtractionEngine`], which unpacks nested archives until none remain
//! and produces the [`FileManifest`] the verifier consumes.

mod extract;
mod format;
mod manifest;
mod nested;

use std::path::PathBuf;

use thiserror::Error;

pub use extract::{extract_rar, extract_zip, is_junk_member, is_junk_path, REDIST_DIR, SHORTCUT_EXT};
pub use format::{correct_extension, has_archive_extension, ArchiveKind, Detection};
pub use manifest::{manifest_path, FileManifest, ManifestEntry};
pub use nested::ExtractionEngine;

/// Errors from archive handling.
///
/// All of these are scoped to a single archive; the extraction engine logs
/// them and continues with the rest of the queue.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Filesystem I/O failure on an archive or member.
    #[error("archive I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The archive's structure or CRC table is damaged.
    #[error("corrupt archive {path}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    /// Rar extraction failed: the unrar capability is missing or the
    /// archive is damaged.
    #[error("rar extraction unavailable for {path}: {reason}")]
    RarUnavailable { path: PathBuf, reason: String },

    /// A path could not be passed to the external unpacker.
    #[error("path is not representable: {path}")]
    UnsupportedPath { path: PathBuf },

    /// Failed to persist the manifest.
    #[error("failed to write manifest {path}: {reason}")]
    ManifestWrite { path: PathBuf, reason: String },

    /// Failed to load the manifest.
    #[error("failed to read manifest {path}: {reason}")]
    ManifestRead { path: PathBuf, reason: String },
}
