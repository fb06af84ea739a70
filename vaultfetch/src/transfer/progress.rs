//! Transfer progress: speed, ETA, percent formatting, stall detection.
//!
//! The tracker rate-limits descriptor writes to one per interval and
//! watches for a stalled connection: if the rendered percentage stops
//! changing across enough consecutive ticks, the attempt is aborted and
//! retried rather than hanging forever.

use std::time::{Duration, Instant};

/// Default minimum interval between emitted progress snapshots.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(500);

/// Default number of consecutive unchanged ticks before a stall is declared.
pub const DEFAULT_STALL_TICKS: u32 = 120;

/// A rendered progress update, ready for the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// "42.00" of a known total, or "12.3MB" while the total is unknown.
    pub percent: String,
    /// "3.21 MB/s"
    pub speed: String,
    /// "4m 12s" or "Calculating..."
    pub eta: String,
    pub bytes_downloaded: u64,
    pub total_size: Option<u64>,
}

/// Session progress state.
#[derive(Debug)]
pub struct ProgressTracker {
    total_size: Option<u64>,
    /// Bytes on disk before this session started (resume offset).
    base_bytes: u64,
    /// Bytes transferred during this session.
    session_bytes: u64,
    started: Instant,
    interval: Duration,
    last_report: Option<Instant>,
    last_percent: Option<String>,
    unchanged_ticks: u32,
    stall_ticks: u32,
}

impl ProgressTracker {
    pub fn new(total_size: Option<u64>, base_bytes: u64) -> Self {
        Self {
            total_size,
            base_bytes,
            session_bytes: 0,
            started: Instant::now(),
            interval: DEFAULT_REPORT_INTERVAL,
            last_report: None,
            last_percent: None,
            unchanged_ticks: 0,
            stall_ticks: DEFAULT_STALL_TICKS,
        }
    }

    /// Override the reporting interval (tests use zero).
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Override the stall threshold.
    pub fn with_stall_ticks(mut self, ticks: u32) -> Self {
        self.stall_ticks = ticks.max(1);
        self
    }

    /// Record received bytes.
    pub fn advance(&mut self, bytes: u64) {
        self.session_bytes += bytes;
    }

    /// Remove partially-counted bytes before a chunk retry.
    pub fn rollback(&mut self, bytes: u64) {
        self.session_bytes = self.session_bytes.saturating_sub(bytes);
    }

    /// Total bytes accounted for (resume base + this session).
    pub fn downloaded(&self) -> u64 {
        self.base_bytes + self.session_bytes
    }

    /// Emit a snapshot if the reporting interval has elapsed.
    pub fn tick(&mut self) -> Option<ProgressSnapshot> {
        let now = Instant::now();
        if let Some(last) = self.last_report {
            if now.duration_since(last) < self.interval {
                return None;
            }
        }
        self.last_report = Some(now);

        let snapshot = self.snapshot();
        if self.last_percent.as_deref() == Some(snapshot.percent.as_str()) {
            self.unchanged_ticks += 1;
        } else {
            self.unchanged_ticks = 0;
            self.last_percent = Some(snapshot.percent.clone());
        }
        Some(snapshot)
    }

    /// Whether progress has not moved across the stall threshold.
    pub fn is_stalled(&self) -> bool {
        self.unchanged_ticks >= self.stall_ticks
    }

    /// Render the current state unconditionally.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let downloaded = self.downloaded();
        let elapsed = self.started.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 {
            self.session_bytes as f64 / elapsed
        } else {
            0.0
        };

        let percent = match self.total_size {
            Some(total) if total > 0 => {
                format!("{:.2}", downloaded as f64 / total as f64 * 100.0)
            }
            _ => format!("{:.1}MB", downloaded as f64 / 1_000_000.0),
        };

        let eta = match self.total_size {
            Some(total) if speed > 0.0 && total > downloaded => {
                format_eta((total - downloaded) as f64 / speed)
            }
            Some(total) if total <= downloaded => "0s".to_string(),
            _ => "Calculating...".to_string(),
        };

        ProgressSnapshot {
            percent,
            speed: format_speed(speed),
            eta,
            bytes_downloaded: downloaded,
            total_size: self.total_size,
        }
    }
}

/// Render bytes/second for the descriptor.
pub fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec < 1024.0 {
        format!("{:.2} B/s", bytes_per_sec)
    } else if bytes_per_sec < 1024.0 * 1024.0 {
        format!("{:.2} KB/s", bytes_per_sec / 1024.0)
    } else {
        format!("{:.2} MB/s", bytes_per_sec / (1024.0 * 1024.0))
    }
}

/// Render a seconds estimate as "1h 2m 3s" / "2m 3s" / "45s".
pub fn format_eta(seconds: f64) -> String {
    let total = seconds.round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
