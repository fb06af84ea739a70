//! The download descriptor wire format.
//!
//! One descriptor exists per target, written to `<target>.descriptor.json`
//! in the target directory. The launcher that spawned this process polls the
//! file to render progress, so field names are part of the caller contract
//! and serialize in camelCase.
//!
//! The descriptor moves through three shapes over a run:
//! - active: identity fields plus a `downloadingData` progress object,
//! - failed: identity fields cleared, `downloadingData` replaced by
//!   `{error, message}`,
//! - complete: `downloadingData` removed entirely, identity only.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::verify::VerifyFailure;

/// Pipeline phase reflected in the descriptor's progress flags.
///
/// Exactly one of the downloading/extracting/verifying flags is set at a
/// time; `Idle` clears all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Downloading,
    Extracting,
    Verifying,
}

/// Per-target status record persisted for the external caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDescriptor {
    /// Target name, also the target directory's base name.
    pub target: String,

    /// Optional external catalog identifier, opaque to the pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,

    /// Caller-supplied metadata flags. Cleared (null) on terminal failure.
    pub online: Option<bool>,
    pub dlc: Option<bool>,
    pub is_vr: Option<bool>,

    /// Requested version string; empty when unknown.
    pub version: String,

    /// Human-readable size hint supplied by the caller (e.g. "12 GB").
    pub size: String,

    /// Predicted main executable path inside the target directory.
    pub executable: String,

    /// Whether the caller has the target running. Always written false by
    /// this pipeline; owned by the caller afterwards.
    pub is_running: bool,

    /// Progress sub-structure. Absent after a fully successful run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloading_data: Option<DownloadingData>,
}

/// The mutable progress portion of the descriptor.
///
/// Untagged: an active run serializes the full progress shape, a terminal
/// failure serializes only `{error, message}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DownloadingData {
    Progress(ProgressData),
    Failed(FailureData),
}

/// Live progress fields, mirrored to disk on every reporting tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressData {
    pub downloading: bool,
    pub extracting: bool,
    pub verifying: bool,
    pub updating: bool,

    /// Two-decimal percent string, or "<n.n>MB" while total size is unknown.
    pub progress_completed: String,

    /// Human-readable transfer speed, e.g. "3.21 MB/s".
    pub progress_download_speeds: String,

    /// Human-readable ETA, e.g. "4m 12s", or "Calculating...".
    pub time_until_complete: String,

    /// Structured verification failures; present only when verification
    /// finished with errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_error: Option<Vec<VerifyFailure>>,
}

/// Terminal failure shape replacing the progress fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureData {
    pub error: bool,
    pub message: String,
}

impl Default for ProgressData {
    fn default() -> Self {
        Self {
            downloading: false,
            extracting: false,
            verifying: false,
            updating: false,
            progress_completed: "0.00".to_string(),
            progress_download_speeds: "0.00 KB/s".to_string(),
            time_until_complete: "0s".to_string(),
            verify_error: None,
        }
    }
}

impl ProgressData {
    /// Set the phase flags so that exactly the given phase is active.
    pub fn set_phase(&mut self, phase: Phase) {
        self.downloading = phase == Phase::Downloading;
        self.extracting = phase == Phase::Extracting;
        self.verifying = phase == Phase::Verifying;
    }
}

impl DownloadDescriptor {
    /// Create a fresh descriptor for a new run.
    pub fn new(
        target: impl Into<String>,
        online: bool,
        dlc: bool,
        is_vr: bool,
        version: impl Into<String>,
        size: impl Into<String>,
        target_dir: &Path,
    ) -> Self {
        let target = target.into();
        let executable = target_dir
            .join(format!("{}.exe", target))
            .to_string_lossy()
            .to_string();
        Self {
            target,
            catalog_id: None,
            online: Some(online),
            dlc: Some(dlc),
            is_vr: Some(is_vr),
            version: version.into(),
            size: size.into(),
            executable,
            is_running: false,
            downloading_data: Some(DownloadingData::Progress(ProgressData::default())),
        }
    }

    /// Attach an external catalog ID.
    pub fn with_catalog_id(mut self, id: impl Into<String>) -> Self {
        self.catalog_id = Some(id.into());
        self
    }

    /// Access the progress data if the run is still active.
    pub fn progress(&self) -> Option<&ProgressData> {
        match &self.downloading_data {
            Some(DownloadingData::Progress(p)) => Some(p),
            _ => None,
        }
    }

    /// Mutable access to the progress data, creating it if the descriptor
    /// was loaded without one (update runs over a completed install).
    pub fn progress_mut(&mut self) -> &mut ProgressData {
        let needs_init = !matches!(
            self.downloading_data,
            Some(DownloadingData::Progress(_))
        );
        if needs_init {
            self.downloading_data = Some(DownloadingData::Progress(ProgressData::default()));
        }
        match self.downloading_data {
            Some(DownloadingData::Progress(ref mut p)) => p,
            _ => unreachable!("progress data initialized above"),
        }
    }

    /// Whether the descriptor is in the terminal failure shape.
    pub fn is_failed(&self) -> bool {
        matches!(self.downloading_data, Some(DownloadingData::Failed(_)))
    }

    /// Degrade to the terminal failure shape: identity cleared, progress
    /// replaced by the error record.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.online = None;
        self.dlc = None;
        self.is_vr = None;
        self.version.clear();
        self.executable.clear();
        self.is_running = false;
        self.downloading_data = Some(DownloadingData::Failed(FailureData {
            error: true,
            message: message.into(),
        }));
    }

    /// Strip the progress sub-structure after a fully successful run.
    pub fn complete(&mut self) {
        self.downloading_data = None;
    }
}
