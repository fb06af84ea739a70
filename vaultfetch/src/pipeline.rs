//! Pipeline orchestration.
//!
//! Drives transfer, format detection, extraction, layout normalization,
//! and verification over one shared descriptor, updating the phase flags
//! before and after each stage. Every stage failure is caught here and
//! degraded into the descriptor's terminal error shape; the process only
//! aborts abnormally for the fatal startup cases the caller handles
//! (malformed arguments, target directory creation).

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::archive::{correct_extension, ArchiveError, ExtractionEngine};
use crate::config::Settings;
use crate::descriptor::{DescriptorError, DescriptorStore, DownloadDescriptor, Phase};
use crate::external::Notifier;
use crate::layout::{LayoutError, LayoutNormalizer};
use crate::transfer::{
    CancelFlag, CircuitBreaker, ProgressSnapshot, TransferConfig, TransferEngine, TransferError,
};
use crate::verify::{verify_manifest, VerifyFailure};

/// Fallback artifact extension when the server gives no usable hint.
const DEFAULT_ARCHIVE_EXT: &str = "rar";

/// Caller-supplied parameters for a download run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub url: String,
    pub target: String,
    pub download_dir: PathBuf,
    pub online: bool,
    pub dlc: bool,
    pub is_vr: bool,
    /// This run replaces a previous successful install.
    pub update_flow: bool,
    pub version: String,
    pub size_hint: String,
    pub catalog_id: Option<String>,
    pub notify_theme: Option<String>,
    /// Cookie for the alternate provider path.
    pub cookie: Option<String>,
    pub settings: Settings,
}

/// Caller-supplied parameters for the retry-folder flow.
#[derive(Debug, Clone)]
pub struct RetryFolderConfig {
    pub target: String,
    pub download_dir: PathBuf,
    pub online: bool,
    pub dlc: bool,
    pub version: String,
    pub size_hint: String,
    /// Name of the already-extracted wrapper directory to flatten.
    pub new_folder: String,
    pub notify_theme: Option<String>,
}

/// Fatal startup failures. Everything past startup degrades the
/// descriptor instead of surfacing here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot create target directory {path}: {source}")]
    CreateDirFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// How the run ended. All variants mean the process exits 0; failure is
/// reported through the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Everything downloaded, extracted, and verified.
    Completed,
    /// Pipeline finished but verification flagged missing files.
    CompletedWithWarnings { verify_failures: usize },
    /// A stage failed; the descriptor carries the error record.
    Failed { message: String },
}

/// A caught stage failure, carrying the stable code recorded for the
/// caller UI.
#[derive(Debug)]
struct StageError {
    code: &'static str,
    message: String,
}

impl StageError {
    fn descriptor_message(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl From<TransferError> for StageError {
    fn from(e: TransferError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl From<ArchiveError> for StageError {
    fn from(e: ArchiveError) -> Self {
        Self {
            code: "extraction_error",
            message: e.to_string(),
        }
    }
}

impl From<LayoutError> for StageError {
    fn from(e: LayoutError) -> Self {
        Self {
            code: "layout_error",
            message: e.to_string(),
        }
    }
}

impl From<DescriptorError> for StageError {
    fn from(e: DescriptorError) -> Self {
        Self {
            code: "state_error",
            message: e.to_string(),
        }
    }
}

/// The download-extract-verify pipeline for one target.
pub struct Pipeline {
    config: PipelineConfig,
    target_dir: PathBuf,
    store: DescriptorStore,
    notifier: Notifier,
    breaker: Arc<CircuitBreaker>,
    cancel: CancelFlag,
}

impl Pipeline {
    /// Prepare the target directory and descriptor.
    ///
    /// For update runs an existing descriptor is loaded and annotated with
    /// the `updating` flag; otherwise a fresh descriptor is created.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let target_dir = config.download_dir.join(&config.target);
        std::fs::create_dir_all(&target_dir).map_err(|e| PipelineError::CreateDirFailed {
            path: target_dir.clone(),
            source: e,
        })?;

        let existing = if config.update_flow {
            DescriptorStore::load(&target_dir, &config.target)?
        } else {
            None
        };

        let mut store = match existing {
            Some(store) => store,
            None => {
                let mut record = DownloadDescriptor::new(
                    &config.target,
                    config.online,
                    config.dlc,
                    config.is_vr,
                    &config.version,
                    &config.size_hint,
                    &target_dir,
                );
                if let Some(id) = &config.catalog_id {
                    record = record.with_catalog_id(id);
                }
                DescriptorStore::create(&target_dir, record)?
            }
        };

        if config.update_flow {
            store.update(|r| r.progress_mut().updating = true)?;
        }

        let theme = config
            .notify_theme
            .clone()
            .or_else(|| config.settings.notify_theme.clone());

        Ok(Self {
            notifier: Notifier::new(theme),
            breaker: Arc::new(CircuitBreaker::default()),
            cancel: CancelFlag::new(),
            target_dir,
            store,
            config,
        })
    }

    /// The shared cancellation flag (raised internally when the circuit
    /// breaker opens; exposed for callers that install signal handlers).
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run the pipeline to completion or failure. Never panics through;
    /// the returned outcome mirrors what was written to the descriptor.
    pub fn run(mut self) -> PipelineOutcome {
        self.notifier.notify(
            "Download Started",
            &format!("Starting download for {}", self.config.target),
        );

        match self.execute() {
            Ok(failures) if failures.is_empty() => {
                if let Err(e) = self.store.complete() {
                    tracing::error!(error = %e, "could not finalize descriptor");
                }
                self.notifier.notify(
                    "Download Complete",
                    &format!(
                        "Successfully downloaded and extracted {}",
                        self.config.target
                    ),
                );
                tracing::info!(target = %self.config.target, "pipeline complete");
                PipelineOutcome::Completed
            }
            Ok(failures) => {
                let count = failures.len();
                if let Err(e) = self.store.set_verify_errors(failures) {
                    tracing::error!(error = %e, "could not record verify errors");
                }
                self.notifier.notify(
                    "Verification Failed",
                    &format!(
                        "{} {} failed to verify",
                        count,
                        if count == 1 { "file" } else { "files" }
                    ),
                );
                PipelineOutcome::CompletedWithWarnings {
                    verify_failures: count,
                }
            }
            Err(stage_error) => {
                let message = stage_error.descriptor_message();
                tracing::error!(code = stage_error.code, error = %stage_error.message, "pipeline failed");
                if let Err(e) = self.store.fail(&message) {
                    tracing::error!(error = %e, "could not degrade descriptor");
                }
                PipelineOutcome::Failed { message }
            }
        }
    }

    /// All stages; any error is caught by `run` and degraded.
    fn execute(&mut self) -> Result<Vec<VerifyFailure>, StageError> {
        // Stage 1: transfer.
        self.store.set_phase(Phase::Downloading)?;
        let archive_path = self.fetch_artifact()?;

        // Stage 2: classification; the on-disk extension follows the
        // magic bytes, not the URL.
        let (archive_path, detection) = correct_extension(&archive_path)?;
        tracing::info!(kind = %detection.kind, path = %archive_path.display(), "artifact classified");

        // Stage 3: extraction.
        self.store.set_phase(Phase::Extracting)?;
        let manifest = ExtractionEngine::new().run(&archive_path, &self.target_dir)?;
        manifest.save(&self.target_dir, &self.config.target)?;

        // Stage 4: layout normalization rebuilds the manifest.
        let normalizer = LayoutNormalizer::new(&self.target_dir, &self.config.target);
        let manifest = normalizer.normalize()?;
        manifest.save(&self.target_dir, &self.config.target)?;
        self.notifier.notify(
            "Extraction Complete",
            &format!("Extracted {} files for {}", manifest.len(), self.config.target),
        );

        // Stage 5: verification.
        self.store.set_phase(Phase::Verifying)?;
        let failures = verify_manifest(&manifest, &self.target_dir);
        self.store.set_phase(Phase::Idle)?;

        Ok(failures)
    }

    /// Probe for a name hint, then download the artifact.
    fn fetch_artifact(&mut self) -> Result<PathBuf, StageError> {
        let transfer_config = TransferConfig::default()
            .with_pool_size(self.config.settings.thread_count)
            .with_speed_limit_kbps(self.config.settings.download_limit_kbps)
            .with_cookie(self.config.cookie.clone());

        let mut engine = TransferEngine::new(
            transfer_config,
            Arc::clone(&self.breaker),
            self.cancel.clone(),
        )?;

        let extension = engine
            .probe(&self.config.url)?
            .extension_hint
            .unwrap_or_else(|| DEFAULT_ARCHIVE_EXT.to_string());
        let archive_path = self
            .target_dir
            .join(format!("{}.{}", self.config.target, extension));

        let store = &mut self.store;
        let mut on_progress = |snapshot: &ProgressSnapshot| {
            if let Err(e) = store.set_progress(&snapshot.percent, &snapshot.speed, &snapshot.eta)
            {
                tracing::warn!(error = %e, "progress write failed");
            }
        };
        let outcome = engine.fetch(&self.config.url, &archive_path, &mut on_progress)?;
        tracing::info!(bytes = outcome.bytes(), "transfer finished");

        Ok(archive_path)
    }
}

/// Re-run the normalize/cleanup/finalize tail against an already-extracted
/// wrapper directory. Used by the caller when a previous run downloaded
/// and extracted but died before normalizing.
pub fn run_retry_folder(config: RetryFolderConfig) -> Result<PipelineOutcome, PipelineError> {
    let target_dir = config.download_dir.join(&config.target);
    std::fs::create_dir_all(&target_dir).map_err(|e| PipelineError::CreateDirFailed {
        path: target_dir.clone(),
        source: e,
    })?;

    let mut store = match DescriptorStore::load(&target_dir, &config.target)? {
        Some(store) => store,
        None => {
            let record = DownloadDescriptor::new(
                &config.target,
                config.online,
                config.dlc,
                false,
                &config.version,
                &config.size_hint,
                &target_dir,
            );
            DescriptorStore::create(&target_dir, record)?
        }
    };

    store.set_phase(Phase::Extracting)?;

    let normalizer = LayoutNormalizer::new(&target_dir, &config.target);
    let outcome = match normalizer.flatten_named(&config.new_folder) {
        Ok(manifest) => {
            if let Err(e) = manifest.save(&target_dir, &config.target) {
                tracing::warn!(error = %e, "could not persist rebuilt manifest");
            }
            store.complete()?;
            Notifier::new(config.notify_theme.clone()).notify(
                "Extraction Complete",
                &format!("Repaired layout for {}", config.target),
            );
            PipelineOutcome::Completed
        }
        Err(e) => {
            let message = format!("[layout_error] {}", e);
            store.fail(&message)?;
            PipelineOutcome::Failed { message }
        }
    };

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn retry_config(download_dir: &std::path::Path) -> RetryFolderConfig {
        RetryFolderConfig {
            target: "Some Game".to_string(),
            download_dir: download_dir.to_path_buf(),
            online: false,
            dlc: false,
            version: "1.0".to_string(),
            size_hint: "1 GB".to_string(),
            new_folder: "Some.Game.v1.0".to_string(),
            notify_theme: None,
        }
    }

    #[test]
    fn test_retry_folder_flattens_and_finalizes() {
        let temp = TempDir::new().unwrap();
        let target_dir = temp.path().join("Some Game");
        fs::create_dir_all(target_dir.join("Some.Game.v1.0/data")).unwrap();
        fs::write(target_dir.join("Some.Game.v1.0/game.exe"), b"EXE").unwrap();
        fs::write(target_dir.join("Some.Game.v1.0/data/pak.bin"), b"PAK").unwrap();
        fs::write(target_dir.join("Some.Game.v1.0/link.url"), b"x").unwrap();

        let outcome = run_retry_folder(retry_config(temp.path())).unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed);

        assert!(target_dir.join("game.exe").exists());
        assert!(target_dir.join("data/pak.bin").exists());
        assert!(!target_dir.join("Some.Game.v1.0").exists());
        assert!(!target_dir.join("link.url").exists());

        // Descriptor finalized: no downloadingData.
        let body = fs::read_to_string(target_dir.join("Some Game.descriptor.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(json.get("downloadingData").is_none());

        // Manifest rebuilt from the flattened tree.
        let manifest = fs::read_to_string(target_dir.join("filemap.Some Game.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        assert!(json.get("game.exe").is_some());
    }

    #[test]
    fn test_retry_folder_missing_wrapper_still_finalizes() {
        let temp = TempDir::new().unwrap();
        let target_dir = temp.path().join("Some Game");
        fs::create_dir_all(&target_dir).unwrap();
        fs::write(target_dir.join("game.exe"), b"EXE").unwrap();

        let outcome = run_retry_folder(retry_config(temp.path())).unwrap();
        // Wrapper absent is a warning, not a failure: the tree may already
        // be flat.
        assert_eq!(outcome, PipelineOutcome::Completed);
    }

    #[test]
    fn test_pipeline_new_creates_descriptor() {
        let temp = TempDir::new().unwrap();
        let config = PipelineConfig {
            url: "http://127.0.0.1:9/file".to_string(),
            target: "Fresh Game".to_string(),
            download_dir: temp.path().to_path_buf(),
            online: true,
            dlc: false,
            is_vr: false,
            update_flow: false,
            version: "2.0".to_string(),
            size_hint: "5 GB".to_string(),
            catalog_id: Some("777".to_string()),
            notify_theme: None,
            cookie: None,
            settings: Settings::default(),
        };

        let pipeline = Pipeline::new(config).unwrap();
        let record = pipeline.store.record();
        assert_eq!(record.target, "Fresh Game");
        assert_eq!(record.catalog_id.as_deref(), Some("777"));
        assert!(temp
            .path()
            .join("Fresh Game/Fresh Game.descriptor.json")
            .exists());
    }

    #[test]
    fn test_update_flow_annotates_existing_descriptor() {
        let temp = TempDir::new().unwrap();
        let target_dir = temp.path().join("Old Game");
        fs::create_dir_all(&target_dir).unwrap();

        // A completed install: descriptor without downloadingData.
        let mut record = DownloadDescriptor::new(
            "Old Game",
            true,
            true,
            false,
            "1.0",
            "1 GB",
            &target_dir,
        );
        record.complete();
        DescriptorStore::create(&target_dir, record).unwrap();

        let config = PipelineConfig {
            url: "http://127.0.0.1:9/file".to_string(),
            target: "Old Game".to_string(),
            download_dir: temp.path().to_path_buf(),
            online: false,
            dlc: false,
            is_vr: false,
            update_flow: true,
            version: "1.1".to_string(),
            size_hint: "1 GB".to_string(),
            catalog_id: None,
            notify_theme: None,
            cookie: None,
            settings: Settings::default(),
        };

        let pipeline = Pipeline::new(config).unwrap();
        let record = pipeline.store.record();
        // Identity from the existing install survives.
        assert_eq!(record.online, Some(true));
        assert_eq!(record.dlc, Some(true));
        assert!(record.progress().unwrap().updating);
    }

    #[test]
    fn test_unreachable_server_degrades_descriptor() {
        let temp = TempDir::new().unwrap();
        let config = PipelineConfig {
            // Closed port: probe fails immediately.
            url: "http://127.0.0.1:9/file.rar".to_string(),
            target: "Doomed Game".to_string(),
            download_dir: temp.path().to_path_buf(),
            online: false,
            dlc: false,
            is_vr: false,
            update_flow: false,
            version: "1.0".to_string(),
            size_hint: "1 GB".to_string(),
            catalog_id: None,
            notify_theme: None,
            cookie: None,
            settings: Settings::default(),
        };

        let outcome = Pipeline::new(config).unwrap().run();
        assert!(matches!(outcome, PipelineOutcome::Failed { .. }));

        let body = fs::read_to_string(
            temp.path().join("Doomed Game/Doomed Game.descriptor.json"),
        )
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["downloadingData"]["error"], true);
        assert_eq!(json["online"], serde_json::Value::Null);
    }
}
