//! The chunked, resumable transfer engine.
//!
//! Downloads a remote file in bounded byte ranges with per-chunk and
//! per-session retry, resuming from whatever partial file a previous
//! (possibly killed) invocation left behind. Progress, speed, and ETA are
//! surfaced through a callback so the pipeline can mirror them into the
//! descriptor.

mod chunk;
mod engine;
mod probe;
mod progress;
mod retry;
#[cfg(test)]
pub(crate) mod test_server;

use std::path::PathBuf;

use thiserror::Error;

pub use chunk::{ByteRange, ChunkPlan, DEFAULT_CHUNK_SIZE};
pub use engine::{FetchOutcome, TransferConfig, TransferEngine};
pub use probe::{probe, ServerCapabilities};
pub use progress::{
    format_eta, format_speed, ProgressSnapshot, ProgressTracker, DEFAULT_REPORT_INTERVAL,
    DEFAULT_STALL_TICKS,
};
pub use retry::{Backoff, CancelFlag, CircuitBreaker};

/// Errors from the transfer engine, classified for retry decisions and for
/// the error code recorded in the descriptor.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Transient request failure: reset, timeout, truncated body.
    #[error("request failed: {0}")]
    Request(String),

    /// Connection patterns that indicate the provider is refusing this
    /// client (TLS handshake failures, forcibly closed connections).
    #[error("provider blocked the connection: {0}")]
    ProviderBlocked(String),

    /// The server answered with an HTML page where a file should be.
    #[error("server returned an HTML page instead of a file")]
    HtmlResponse,

    /// The capability probe was rejected outright.
    #[error("probe rejected with HTTP {status}")]
    ProbeRejected { status: u16 },

    /// A chunk request came back with an unexpected status.
    #[error("HTTP {status} for range {range}")]
    ChunkStatus { status: u16, range: String },

    /// Received byte count does not match the requested range.
    #[error("length mismatch: expected {expected} bytes, received {received}")]
    LengthMismatch { expected: u64, received: u64 },

    /// Progress stopped moving across the stall threshold.
    #[error("transfer stalled with no observable progress")]
    Stalled,

    /// The shared cancel flag was raised.
    #[error("transfer cancelled")]
    Cancelled,

    /// The shared circuit breaker opened.
    #[error("circuit breaker open after {failures} session failures")]
    CircuitOpen { failures: u32 },

    /// All session-level retries were spent.
    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),

    /// Local file I/O failure.
    #[error("file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("could not build HTTP client: {0}")]
    ClientBuild(String),
}

impl TransferError {
    /// Classify a reqwest error into provider-blocked vs transient.
    pub(crate) fn from_request(e: reqwest::Error) -> Self {
        let message = e.to_string();
        let lowered = message.to_lowercase();
        let blocked = lowered.contains("tls")
            || lowered.contains("handshake")
            || lowered.contains("certificate")
            || lowered.contains("forcibly closed");
        if blocked {
            TransferError::ProviderBlocked(message)
        } else {
            TransferError::Request(message)
        }
    }

    /// Whether the failure is worth another session attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Request(_)
            | TransferError::LengthMismatch { .. }
            | TransferError::Stalled => true,
            TransferError::ChunkStatus { status, .. } | TransferError::ProbeRejected { status } => {
                *status == 429 || (500..600).contains(status)
            }
            _ => false,
        }
    }

    /// Stable error code recorded in the descriptor so the caller UI can
    /// react to specific failure classes.
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Request(_) => "network_error",
            TransferError::ProviderBlocked(_) => "provider_blocked",
            TransferError::HtmlResponse => "content_type_error",
            TransferError::ProbeRejected { .. } => "probe_rejected",
            TransferError::ChunkStatus { .. } => "bad_status",
            TransferError::LengthMismatch { .. } => "length_mismatch",
            TransferError::Stalled => "stalled",
            TransferError::Cancelled => "cancelled",
            TransferError::CircuitOpen { .. } => "circuit_open",
            TransferError::RetriesExhausted(_) => "retries_exhausted",
            TransferError::Io { .. } => "io_error",
            TransferError::ClientBuild(_) => "client_error",
        }
    }
}
