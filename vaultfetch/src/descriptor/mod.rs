//! The per-target download descriptor: an atomically-written, crash-safe
//! status record polled by the external caller.
//!
//! No pipeline stage mutates shared state except through
//! [`DescriptorStore`], and every store mutation is mirrored to disk with a
//! temp-file + rename so a concurrent reader never sees a torn write.

mod atomic;
mod record;
mod store;

use std::path::PathBuf;

use thiserror::Error;

pub use atomic::write_json;
pub use record::{
    DownloadDescriptor, DownloadingData, FailureData, Phase, ProgressData,
};
pub use store::{descriptor_path, DescriptorStore};

/// Errors from descriptor persistence.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// Failed to read the descriptor file.
    #[error("failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write or rename the descriptor file.
    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Descriptor path has no parent directory.
    #[error("invalid descriptor path: {path}")]
    InvalidPath { path: PathBuf },

    /// The file on disk is not valid descriptor JSON.
    #[error("malformed descriptor: {0}")]
    Malformed(#[from] serde_json::Error),
}
