//! Archive format detection from magic bytes.
//!
//! The URL-derived extension is only a hint; mirrors routinely serve zips
//! renamed to `.rar` and vice versa. Classification reads the first eight
//! bytes of the file and never trusts the name.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use super::ArchiveError;

/// Number of magic bytes inspected.
const MAGIC_LEN: usize = 8;

/// Classified archive kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Rar,
    SevenZ,
    /// Self-extracting executable (PE image).
    Sfx,
    Unknown,
}

impl ArchiveKind {
    /// Canonical file extension for the kind, if it has one.
    pub fn canonical_extension(&self) -> Option<&'static str> {
        match self {
            ArchiveKind::Zip => Some("zip"),
            ArchiveKind::Rar => Some("rar"),
            ArchiveKind::SevenZ => Some("7z"),
            ArchiveKind::Sfx => Some("exe"),
            ArchiveKind::Unknown => None,
        }
    }

    /// Classify a magic-byte prefix. First match wins.
    fn from_magic(magic: &[u8]) -> Self {
        const ZIP_PREFIXES: [&[u8]; 3] = [b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];
        const RAR_V4: &[u8] = b"Rar!\x1A\x07\x00";
        const RAR_V5: &[u8] = b"Rar!\x1A\x07\x01\x00";
        const SEVEN_Z: &[u8] = b"7z\xBC\xAF\x27\x1C";

        if ZIP_PREFIXES.iter().any(|p| magic.starts_with(p)) {
            ArchiveKind::Zip
        } else if magic.starts_with(RAR_V4) || magic.starts_with(RAR_V5) {
            ArchiveKind::Rar
        } else if magic.starts_with(SEVEN_Z) {
            ArchiveKind::SevenZ
        } else if magic.starts_with(b"MZ") {
            ArchiveKind::Sfx
        } else {
            ArchiveKind::Unknown
        }
    }
}

impl std::fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::Rar => "rar",
            ArchiveKind::SevenZ => "7z",
            ArchiveKind::Sfx => "self-extracting exe",
            ArchiveKind::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Result of probing a file's magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub kind: ArchiveKind,
    magic: [u8; MAGIC_LEN],
    read: usize,
}

impl Detection {
    /// Inspect the first bytes of `path` and classify the file.
    pub fn detect(path: &Path) -> Result<Self, ArchiveError> {
        let mut file = File::open(path).map_err(|e| ArchiveError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut magic = [0u8; MAGIC_LEN];
        let mut read = 0;
        // A file shorter than eight bytes is classified from what it has.
        while read < MAGIC_LEN {
            let n = file
                .read(&mut magic[read..])
                .map_err(|e| ArchiveError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            if n == 0 {
                break;
            }
            read += n;
        }

        Ok(Self {
            kind: ArchiveKind::from_magic(&magic[..read]),
            magic,
            read,
        })
    }

    /// Hex rendering of the observed magic bytes, for diagnostics on
    /// unknown files.
    pub fn magic_hex(&self) -> String {
        self.magic[..self.read]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Rename `path` so its extension matches the detected kind.
///
/// Returns the (possibly unchanged) path and the detection. A pre-existing
/// file at the corrected name is removed first so the rename cannot leave a
/// stale duplicate behind.
pub fn correct_extension(path: &Path) -> Result<(PathBuf, Detection), ArchiveError> {
    let detection = Detection::detect(path)?;

    let canonical = match detection.kind.canonical_extension() {
        Some(ext) => ext,
        None => {
            tracing::debug!(
                path = %path.display(),
                magic = %detection.magic_hex(),
                "unrecognized file format, keeping name"
            );
            return Ok((path.to_path_buf(), detection));
        }
    };

    let current = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    if current.as_deref() == Some(canonical) {
        return Ok((path.to_path_buf(), detection));
    }

    let corrected = path.with_extension(canonical);
    if corrected.exists() {
        fs::remove_file(&corrected).map_err(|e| ArchiveError::Io {
            path: corrected.clone(),
            source: e,
        })?;
    }
    fs::rename(path, &corrected).map_err(|e| ArchiveError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    tracing::info!(
        from = %path.display(),
        to = %corrected.display(),
        kind = %detection.kind,
        "corrected archive extension"
    );
    Ok((corrected, detection))
}

/// Whether a path carries an extension the extraction engine treats as an
/// archive to unpack.
pub fn has_archive_extension(path: &Path) -> bool {
    matches!(
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .as_deref(),
        Some("zip") | Some("rar") | Some("7z")
    )
}
