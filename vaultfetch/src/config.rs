//! Shared settings file.
//!
//! The launcher writes `settings.json` under the platform config directory;
//! this process reads it once at startup and treats it as static for the
//! run. A missing or corrupt file silently falls back to defaults, matching
//! the caller's expectations for a helper tool it may spawn before ever
//! writing settings.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default connection pool size.
const DEFAULT_THREAD_COUNT: usize = 4;

/// Settings shared with the launcher.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Connection pool size. The transfer itself stays sequential; this
    /// only sizes the HTTP client's pool.
    pub thread_count: usize,

    /// Download cap in KB/s; 0 disables the cap.
    pub download_limit_kbps: u64,

    /// Default notification theme when the caller passes none.
    pub notify_theme: Option<String>,

    /// Post-download power action. Opaque here: the launcher acts on it,
    /// this process only carries it.
    pub power_action: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            thread_count: DEFAULT_THREAD_COUNT,
            download_limit_kbps: 0,
            notify_theme: None,
            power_action: None,
        }
    }
}

impl Settings {
    /// Load from the platform config directory, defaulting on any problem.
    pub fn load() -> Self {
        match settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from an explicit path, defaulting on any problem.
    pub fn load_from(path: &Path) -> Self {
        let body = match fs::read_to_string(path) {
            Ok(body) => body,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str::<Settings>(&body) {
            Ok(mut settings) => {
                settings.thread_count = settings.thread_count.max(1);
                settings
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt settings file, using defaults");
                Self::default()
            }
        }
    }
}

/// `<config_dir>/vaultfetch/settings.json`, when a config dir exists.
pub fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vaultfetch").join("settings.json"))
}
