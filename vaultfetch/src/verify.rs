//! Post-extraction verification.
//!
//! Walks the file manifest and reconciles it against the target directory.
//! A missing file produces a structured [`VerifyFailure`]; a size mismatch
//! is logged but does not fail verification (the expected sizes come from
//! archive headers, and installers that patch files in place during
//! extraction make strict size checks produce false alarms).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::archive::FileManifest;

/// One failed manifest entry, persisted into the descriptor for the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyFailure {
    /// Path relative to the target root.
    pub file: String,

    /// Human-readable failure reason.
    pub error: String,

    /// Expected size from the manifest, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_size: Option<u64>,
}

/// Check every manifest entry against the filesystem.
///
/// Directory entries and the manifest's own sidecar file are skipped.
/// Returns the (possibly empty) list of failures; an empty list means the
/// run completed verified.
pub fn verify_manifest(manifest: &FileManifest, target_root: &Path) -> Vec<VerifyFailure> {
    let mut failures = Vec::new();

    for (relative, entry) in manifest.iter() {
        if relative.starts_with("filemap.") {
            continue;
        }

        let full = target_root.join(relative);
        if full.is_dir() {
            continue;
        }

        let metadata = match full.metadata() {
            Ok(m) => m,
            Err(_) => {
                failures.push(VerifyFailure {
                    file: relative.to_string(),
                    error: "file not found".to_string(),
                    expected_size: Some(entry.size),
                });
                continue;
            }
        };

        // Size check is advisory only.
        if metadata.len() != entry.size {
            tracing::warn!(
                file = relative,
                expected = entry.size,
                actual = metadata.len(),
                "size mismatch (advisory)"
            );
        }
    }

    if failures.is_empty() {
        tracing::info!(files = manifest.len(), "all extracted files verified");
    } else {
        tracing::warn!(failures = failures.len(), "verification found missing files");
    }

    failures
}
