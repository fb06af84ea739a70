//! CLI error types.

use std::fmt;

/// Errors that abort the process with a non-zero exit code.
///
/// Only startup problems land here; once the pipeline is running,
/// failures are reported through the descriptor file and the process
/// still exits 0.
#[derive(Debug)]
pub enum CliError {
    /// Target directory or descriptor could not be prepared.
    Startup(String),
}

impl CliError {
    /// Error code passed to the crash reporter.
    pub fn code(&self) -> i32 {
        match self {
            CliError::Startup(_) => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Startup(msg) => write!(f, "startup failed: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl From<vaultfetch::pipeline::PipelineError> for CliError {
    fn from(e: vaultfetch::pipeline::PipelineError) -> Self {
        CliError::Startup(e.to_string())
    }
}
