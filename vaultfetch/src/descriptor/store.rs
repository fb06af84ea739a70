//! Descriptor persistence.
//!
//! [`DescriptorStore`] owns the in-memory descriptor and its on-disk mirror.
//! Every mutation goes through [`DescriptorStore::update`], which persists
//! atomically before returning, so the file always reflects the last
//! completed state change.

use std::fs;
use std::path::{Path, PathBuf};

use super::atomic;
use super::record::{DownloadDescriptor, Phase};
use super::DescriptorError;
use crate::verify::VerifyFailure;

/// Path of the descriptor file for a target inside its directory.
pub fn descriptor_path(target_dir: &Path, target: &str) -> PathBuf {
    target_dir.join(format!("{}.descriptor.json", target))
}

/// Descriptor plus the file it mirrors to.
#[derive(Debug)]
pub struct DescriptorStore {
    path: PathBuf,
    record: DownloadDescriptor,
}

impl DescriptorStore {
    /// Create a store around a fresh descriptor and write the initial state.
    pub fn create(
        target_dir: &Path,
        record: DownloadDescriptor,
    ) -> Result<Self, DescriptorError> {
        let store = Self {
            path: descriptor_path(target_dir, &record.target),
            record,
        };
        store.persist()?;
        Ok(store)
    }

    /// Load an existing descriptor for an update run.
    ///
    /// Returns `Ok(None)` when no descriptor file exists yet.
    pub fn load(target_dir: &Path, target: &str) -> Result<Option<Self>, DescriptorError> {
        let path = descriptor_path(target_dir, target);
        if !path.exists() {
            return Ok(None);
        }
        let body = fs::read_to_string(&path).map_err(|e| DescriptorError::ReadFailed {
            path: path.clone(),
            source: e,
        })?;
        let record: DownloadDescriptor = serde_json::from_str(&body)?;
        Ok(Some(Self { path, record }))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The current in-memory descriptor.
    pub fn record(&self) -> &DownloadDescriptor {
        &self.record
    }

    /// Mutate the descriptor and persist the result atomically.
    pub fn update<F>(&mut self, mutate: F) -> Result<(), DescriptorError>
    where
        F: FnOnce(&mut DownloadDescriptor),
    {
        mutate(&mut self.record);
        self.persist()
    }

    /// Set the active pipeline phase.
    pub fn set_phase(&mut self, phase: Phase) -> Result<(), DescriptorError> {
        self.update(|r| r.progress_mut().set_phase(phase))
    }

    /// Write a progress tick (percent / speed / ETA).
    pub fn set_progress(
        &mut self,
        percent: &str,
        speed: &str,
        eta: &str,
    ) -> Result<(), DescriptorError> {
        self.update(|r| {
            let p = r.progress_mut();
            p.progress_completed = percent.to_string();
            p.progress_download_speeds = speed.to_string();
            p.time_until_complete = eta.to_string();
        })
    }

    /// Record verification failures without leaving the active shape.
    pub fn set_verify_errors(
        &mut self,
        errors: Vec<VerifyFailure>,
    ) -> Result<(), DescriptorError> {
        self.update(|r| {
            r.progress_mut().verify_error = Some(errors);
        })
    }

    /// Degrade to the terminal failure shape.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), DescriptorError> {
        self.update(|r| r.fail(message))
    }

    /// Strip the progress sub-structure after full success.
    pub fn complete(&mut self) -> Result<(), DescriptorError> {
        self.update(|r| r.complete())
    }

    fn persist(&self) -> Result<(), DescriptorError> {
        atomic::write_json(&self.path, &self.record)
    }
}
