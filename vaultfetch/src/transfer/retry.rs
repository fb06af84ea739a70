//! Retry policy, circuit breaker, and cooperative cancellation.
//!
//! All retry state is explicit and injected: the engine owns a
//! [`Backoff`] value per retry loop, shares one [`CircuitBreaker`] across
//! the session, and polls a [`CancelFlag`] between units of work. Nothing
//! lives in module-level mutable state.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a capped maximum and optional jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: bool,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(8))
    }
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: true,
            attempt: 0,
        }
    }

    /// Disable jitter (deterministic delays, used by tests).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay for the next attempt: base * 2^n, capped, with ±25% jitter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.base.saturating_mul(1u32 << self.attempt.min(16));
        let capped = exp.min(self.cap);
        self.attempt = self.attempt.saturating_add(1);

        if !self.jitter {
            return capped;
        }
        let factor = rand::thread_rng().gen_range(0.75f64..1.25f64);
        Duration::from_secs_f64(capped.as_secs_f64() * factor)
    }

    /// Reset to the first attempt (after a success).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Threshold-based circuit breaker for session-level failures.
///
/// Shared between retry loops; once the failure count reaches the
/// threshold the breaker opens and callers stop retrying for this run.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    failures: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: AtomicU32::new(0),
        }
    }

    /// Record a failure; returns true if the breaker is now open.
    pub fn record_failure(&self) -> bool {
        let count = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        count >= self.threshold
    }

    /// Record a success, closing the breaker again.
    pub fn record_success(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.failures.load(Ordering::SeqCst) >= self.threshold
    }

    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Shared cancellation flag checked cooperatively after each unit of work.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
