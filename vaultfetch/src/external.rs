//! External collaborator processes.
//!
//! User-facing notifications and crash reporting are handled by sibling
//! executables shipped next to this one. Both are fire-and-forget: a
//! missing helper is logged and ignored, because the pipeline must keep
//! working on installs that ship without them.

use std::path::PathBuf;
use std::process::Command;

/// Notification helper executable name (platform suffix added on Windows).
const NOTIFIER_NAME: &str = "vaultfetch-notifier";

/// Crash reporter executable name.
const CRASH_REPORTER_NAME: &str = "vaultfetch-crash-reporter";

/// Component tag the crash reporter records for this binary.
const COMPONENT: &str = "downloader";

/// Toast notification launcher bound to a theme.
#[derive(Debug, Clone)]
pub struct Notifier {
    theme: Option<String>,
}

impl Notifier {
    /// A notifier that emits with the given theme, or stays silent when
    /// the caller requested no notifications.
    pub fn new(theme: Option<String>) -> Self {
        Self { theme }
    }

    /// Whether notifications are enabled for this run.
    pub fn enabled(&self) -> bool {
        self.theme.is_some()
    }

    /// Fire a toast via the helper executable. Never fails the caller.
    pub fn notify(&self, title: &str, message: &str) {
        let theme = match &self.theme {
            Some(theme) => theme,
            None => return,
        };
        let Some(helper) = sibling_executable(NOTIFIER_NAME) else {
            tracing::warn!(helper = NOTIFIER_NAME, "notification helper not found");
            return;
        };

        let spawned = Command::new(&helper)
            .arg("--theme")
            .arg(theme)
            .arg("--title")
            .arg(title)
            .arg("--message")
            .arg(message)
            .spawn();

        match spawned {
            Ok(_) => tracing::debug!(title, "notification dispatched"),
            Err(e) => tracing::warn!(error = %e, "failed to launch notification helper"),
        }
    }
}

/// Report a fatal startup failure through the crash reporter, then return.
/// The caller decides the exit code.
pub fn report_crash(error_code: i32, message: &str) {
    let Some(reporter) = sibling_executable(CRASH_REPORTER_NAME) else {
        tracing::error!(
            helper = CRASH_REPORTER_NAME,
            code = error_code,
            message,
            "crash reporter not found"
        );
        return;
    };

    let spawned = Command::new(&reporter)
        .arg(COMPONENT)
        .arg(error_code.to_string())
        .arg(message)
        .spawn();

    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to launch crash reporter");
    }
}

/// Resolve a helper executable living next to the current one.
fn sibling_executable(name: &str) -> Option<PathBuf> {
    let exe_dir = std::env::current_exe().ok()?.parent()?.to_path_buf();
    let file_name = if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    };
    let path = exe_dir.join(file_name);
    path.exists().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_notifier_is_silent() {
        let notifier = Notifier::new(None);
        assert!(!notifier.enabled());
        // Must not panic or spawn anything.
        notifier.notify("Title", "Message");
    }

    #[test]
    fn test_missing_helper_does_not_fail() {
        let notifier = Notifier::new(Some("dark".to_string()));
        assert!(notifier.enabled());
        // Helper executables do not exist in the test environment; the
        // call must degrade to a log line.
        notifier.notify("Download Started", "Starting download");
    }

    #[test]
    fn test_missing_crash_reporter_does_not_fail() {
        report_crash(1, "no arguments provided");
    }
}
