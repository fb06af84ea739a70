//! The transfer engine proper.
//!
//! One `fetch` call drives the whole transfer for a destination file:
//! probe, resume decision, sequential chunk loop, retries, and progress
//! reporting. Chunks are requested in monotonically increasing offset
//! order and appended; a killed process therefore always leaves a valid
//! partial file that the next invocation resumes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header;
use reqwest::StatusCode;

use super::chunk::{ByteRange, ChunkPlan, DEFAULT_CHUNK_SIZE};
use super::probe::{probe, ServerCapabilities};
use super::progress::{ProgressSnapshot, ProgressTracker, DEFAULT_REPORT_INTERVAL, DEFAULT_STALL_TICKS};
use super::retry::{Backoff, CancelFlag, CircuitBreaker};
use super::TransferError;

/// Read/write buffer size (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Default per-request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Transfer engine tuning.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Maximum bytes per ranged request.
    pub chunk_size: u64,
    /// Retry attempts per chunk.
    pub chunk_retries: u32,
    /// Retry attempts per session (probe + full plan).
    pub session_retries: u32,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Connection pool size (from the caller's threadCount setting).
    pub pool_size: usize,
    /// Download cap in KB/s; 0 disables the cap.
    pub speed_limit_kbps: u64,
    /// Cookie attached to every request (alternate provider path).
    pub cookie: Option<String>,
    /// Minimum interval between progress reports.
    pub report_interval: Duration,
    /// Unchanged ticks before a stall abort.
    pub stall_ticks: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_retries: 3,
            session_retries: 3,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            pool_size: 4,
            speed_limit_kbps: 0,
            cookie: None,
            report_interval: DEFAULT_REPORT_INTERVAL,
            stall_ticks: DEFAULT_STALL_TICKS,
        }
    }
}

impl TransferConfig {
    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = bytes.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    pub fn with_speed_limit_kbps(mut self, kbps: u64) -> Self {
        self.speed_limit_kbps = kbps;
        self
    }

    pub fn with_cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn with_session_retries(mut self, retries: u32) -> Self {
        self.session_retries = retries;
        self
    }

    pub fn with_chunk_retries(mut self, retries: u32) -> Self {
        self.chunk_retries = retries.max(1);
        self
    }
}

/// What `fetch` accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Bytes were transferred and the file is complete.
    Downloaded { bytes: u64 },
    /// The file on disk already matched the remote size.
    AlreadyComplete { bytes: u64 },
}

impl FetchOutcome {
    pub fn bytes(&self) -> u64 {
        match self {
            FetchOutcome::Downloaded { bytes } | FetchOutcome::AlreadyComplete { bytes } => *bytes,
        }
    }
}

/// Sequential chunked downloader with retry and resume.
pub struct TransferEngine {
    config: TransferConfig,
    breaker: Arc<CircuitBreaker>,
    cancel: CancelFlag,
    client: Client,
}

impl TransferEngine {
    pub fn new(
        config: TransferConfig,
        breaker: Arc<CircuitBreaker>,
        cancel: CancelFlag,
    ) -> Result<Self, TransferError> {
        let client = build_client(&config)?;
        Ok(Self {
            config,
            breaker,
            cancel,
            client,
        })
    }

    /// Probe server capabilities without transferring.
    pub fn probe(&self, url: &str) -> Result<ServerCapabilities, TransferError> {
        probe(&self.client, url, self.config.cookie.as_deref())
    }

    /// Download `url` into `dest`, resuming an existing partial file when
    /// the server supports ranges.
    ///
    /// Retries whole sessions up to the configured bound; every retry
    /// rebuilds the HTTP client so a poisoned connection pool cannot leak
    /// into the next attempt.
    pub fn fetch(
        &mut self,
        url: &str,
        dest: &Path,
        on_progress: &mut dyn FnMut(&ProgressSnapshot),
    ) -> Result<FetchOutcome, TransferError> {
        let mut backoff = Backoff::default();
        let mut last_error: Option<TransferError> = None;

        for attempt in 0..=self.config.session_retries {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            if self.breaker.is_open() {
                return Err(TransferError::CircuitOpen {
                    failures: self.breaker.failure_count(),
                });
            }
            if attempt > 0 {
                let delay = backoff.next_delay();
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying transfer session"
                );
                std::thread::sleep(delay);
                self.client = build_client(&self.config)?;
            }

            match self.attempt_transfer(url, dest, on_progress) {
                Ok(outcome) => {
                    self.breaker.record_success();
                    return Ok(outcome);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(error = %e, attempt, "transfer session failed");
                    if self.breaker.record_failure() {
                        self.cancel.cancel();
                        return Err(TransferError::CircuitOpen {
                            failures: self.breaker.failure_count(),
                        });
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        Err(TransferError::RetriesExhausted(reason))
    }

    /// One full transfer attempt: probe, resume decision, chunk loop.
    fn attempt_transfer(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &mut dyn FnMut(&ProgressSnapshot),
    ) -> Result<FetchOutcome, TransferError> {
        let caps = probe(&self.client, url, self.config.cookie.as_deref())?;
        let existing = dest.metadata().map(|m| m.len()).unwrap_or(0);

        match caps.total_size {
            Some(total) if caps.accepts_ranges => {
                let resume = if existing == total {
                    tracing::info!(bytes = total, "destination already complete");
                    return Ok(FetchOutcome::AlreadyComplete { bytes: total });
                } else if existing > total {
                    tracing::warn!(
                        existing,
                        total,
                        "partial file larger than remote, restarting"
                    );
                    truncate(dest)?;
                    0
                } else {
                    if existing > 0 {
                        tracing::info!(offset = existing, total, "resuming partial download");
                    }
                    existing
                };
                self.transfer_chunked(url, dest, resume, total, on_progress)
            }
            Some(total) => {
                if existing == total {
                    return Ok(FetchOutcome::AlreadyComplete { bytes: total });
                }
                if existing > 0 {
                    // No range support: a partial file cannot be trusted.
                    tracing::info!(existing, "server lacks range support, discarding partial");
                    truncate(dest)?;
                }
                self.transfer_streaming(url, dest, Some(total), on_progress)
            }
            None => {
                if existing > 0 {
                    truncate(dest)?;
                }
                self.transfer_streaming(url, dest, None, on_progress)
            }
        }
    }

    /// Ranged transfer: request each planned chunk in order and append.
    fn transfer_chunked(
        &self,
        url: &str,
        dest: &Path,
        resume: u64,
        total: u64,
        on_progress: &mut dyn FnMut(&ProgressSnapshot),
    ) -> Result<FetchOutcome, TransferError> {
        let plan = ChunkPlan::new(resume, total, self.config.chunk_size);
        let mut tracker = ProgressTracker::new(Some(total), resume)
            .with_interval(self.config.report_interval)
            .with_stall_ticks(self.config.stall_ticks);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dest)
            .map_err(|e| TransferError::Io {
                path: dest.to_path_buf(),
                source: e,
            })?;

        tracing::info!(
            chunks = plan.len(),
            resume,
            total,
            "starting chunked transfer"
        );

        for range in plan.iter() {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            let started = Instant::now();
            match self.download_chunk_with_retry(url, &file, range, &mut tracker, on_progress)? {
                ChunkOutcome::Written => {}
                ChunkOutcome::RangeExhausted => {
                    // 416: the server says nothing remains.
                    tracing::info!(range = %range.header_value(), "range not satisfiable, treating as complete");
                    break;
                }
            }
            self.throttle(range.len(), started);
        }

        on_progress(&tracker.snapshot());
        Ok(FetchOutcome::Downloaded {
            bytes: tracker.downloaded(),
        })
    }

    /// Chunk download with bounded retry and backoff. Each retry uses a
    /// fresh client so the connection pool is reset.
    fn download_chunk_with_retry(
        &self,
        url: &str,
        file: &File,
        range: &ByteRange,
        tracker: &mut ProgressTracker,
        on_progress: &mut dyn FnMut(&ProgressSnapshot),
    ) -> Result<ChunkOutcome, TransferError> {
        let mut backoff = Backoff::default();
        let mut last_error = None;

        for attempt in 0..self.config.chunk_retries {
            let fresh;
            let client = if attempt == 0 {
                &self.client
            } else {
                let delay = backoff.next_delay();
                tracing::warn!(
                    range = %range.header_value(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying chunk"
                );
                std::thread::sleep(delay);
                fresh = build_client(&self.config)?;
                &fresh
            };

            match self.download_chunk(client, url, file, range, tracker, on_progress) {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() => {
                    // Publish the corrected byte count before retrying.
                    on_progress(&tracker.snapshot());
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TransferError::RetriesExhausted(format!(
                "chunk {} failed every attempt",
                range.header_value()
            ))
        }))
    }

    /// Request one range and append its body. On any failure the file is
    /// truncated back to the chunk start and the tracker's byte count is
    /// corrected, so a retry starts clean.
    fn download_chunk(
        &self,
        client: &Client,
        url: &str,
        file: &File,
        range: &ByteRange,
        tracker: &mut ProgressTracker,
        on_progress: &mut dyn FnMut(&ProgressSnapshot),
    ) -> Result<ChunkOutcome, TransferError> {
        let mut request = client.get(url).header(header::RANGE, range.header_value());
        if let Some(cookie) = self.config.cookie.as_deref() {
            request = request.header(header::COOKIE, cookie);
        }
        let mut response = request.send().map_err(TransferError::from_request)?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(ChunkOutcome::RangeExhausted);
        }
        if !(status.is_success() || status == StatusCode::PARTIAL_CONTENT) {
            return Err(TransferError::ChunkStatus {
                status: status.as_u16(),
                range: range.header_value(),
            });
        }

        // A range-honoring server must answer with exactly the bytes asked.
        if let Some(length) = response.content_length() {
            if length != range.len() {
                return Err(TransferError::LengthMismatch {
                    expected: range.len(),
                    received: length,
                });
            }
        }

        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut written: u64 = 0;
        let mut writer = &*file;

        loop {
            let n = match response.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    self.rollback_chunk(file, range.start, written, tracker);
                    return Err(TransferError::Request(format!("read error: {}", e)));
                }
            };
            if let Err(e) = writer.write_all(&buffer[..n]) {
                self.rollback_chunk(file, range.start, written, tracker);
                return Err(TransferError::Io {
                    path: std::path::PathBuf::new(),
                    source: e,
                });
            }
            written += n as u64;
            tracker.advance(n as u64);
            if let Some(snapshot) = tracker.tick() {
                on_progress(&snapshot);
                if tracker.is_stalled() {
                    self.rollback_chunk(file, range.start, written, tracker);
                    return Err(TransferError::Stalled);
                }
            }
        }

        if written != range.len() {
            self.rollback_chunk(file, range.start, written, tracker);
            return Err(TransferError::LengthMismatch {
                expected: range.len(),
                received: written,
            });
        }

        Ok(ChunkOutcome::Written)
    }

    /// Single streaming GET for servers without range support or without a
    /// known total size.
    fn transfer_streaming(
        &self,
        url: &str,
        dest: &Path,
        total: Option<u64>,
        on_progress: &mut dyn FnMut(&ProgressSnapshot),
    ) -> Result<FetchOutcome, TransferError> {
        let mut tracker = ProgressTracker::new(total, 0)
            .with_interval(self.config.report_interval)
            .with_stall_ticks(self.config.stall_ticks);

        let mut request = self.client.get(url);
        if let Some(cookie) = self.config.cookie.as_deref() {
            request = request.header(header::COOKIE, cookie);
        }
        let mut response = request.send().map_err(TransferError::from_request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::ChunkStatus {
                status: status.as_u16(),
                range: "full body".to_string(),
            });
        }

        let mut file = File::create(dest).map_err(|e| TransferError::Io {
            path: dest.to_path_buf(),
            source: e,
        })?;

        tracing::info!(total = ?total, "starting streaming transfer");

        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut written: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            let n = match response.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => return Err(TransferError::Request(format!("read error: {}", e))),
            };
            file.write_all(&buffer[..n]).map_err(|e| TransferError::Io {
                path: dest.to_path_buf(),
                source: e,
            })?;
            written += n as u64;
            tracker.advance(n as u64);
            if let Some(snapshot) = tracker.tick() {
                on_progress(&snapshot);
                if tracker.is_stalled() {
                    return Err(TransferError::Stalled);
                }
            }
        }

        match total {
            Some(expected) if written < expected => {
                return Err(TransferError::LengthMismatch {
                    expected,
                    received: written,
                })
            }
            None if written == 0 => {
                return Err(TransferError::Request(
                    "server closed the stream before any data".to_string(),
                ))
            }
            _ => {}
        }

        on_progress(&tracker.snapshot());
        Ok(FetchOutcome::Downloaded { bytes: written })
    }

    fn rollback_chunk(&self, file: &File, start: u64, written: u64, tracker: &mut ProgressTracker) {
        tracker.rollback(written);
        if let Err(e) = file.set_len(start) {
            tracing::warn!(start, error = %e, "could not truncate after failed chunk");
        }
    }

    /// Post-chunk sleep enforcing the configured download cap.
    fn throttle(&self, bytes: u64, started: Instant) {
        if self.config.speed_limit_kbps == 0 {
            return;
        }
        let budget = Duration::from_secs_f64(
            bytes as f64 / (self.config.speed_limit_kbps as f64 * 1024.0),
        );
        let elapsed = started.elapsed();
        if elapsed < budget {
            std::thread::sleep(budget - elapsed);
        }
    }
}

/// Discard a partial file that cannot be resumed.
fn truncate(path: &Path) -> Result<(), TransferError> {
    File::create(path)
        .map(|_| ())
        .map_err(|e| TransferError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}

fn build_client(config: &TransferConfig) -> Result<Client, TransferError> {
    Client::builder()
        .timeout(config.timeout)
        .pool_max_idle_per_host(config.pool_size)
        .build()
        .map_err(|e| TransferError::ClientBuild(e.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkOutcome {
    Written,
    RangeExhausted,
}
