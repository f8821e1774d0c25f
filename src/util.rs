// src/util.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds since an arbitrary process-local epoch. Only meaningful for
/// computing deltas, never as a wall-clock timestamp.
#[inline]
pub fn now_nanos() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}

/// Coalesces a recurring log line to at most once per `window_ns`, mirroring
/// the teacher's gap-log rate limit in its recovery loop.
pub struct LogRateLimiter {
    last_ns: AtomicU64,
    window_ns: u64,
}

impl LogRateLimiter {
    pub fn new(window_ns: u64) -> Self {
        Self { last_ns: AtomicU64::new(0), window_ns }
    }

    /// Returns `true` if the caller should log now, and records that a log
    /// just happened.
    pub fn allow(&self) -> bool {
        let now = now_nanos();
        let last = self.last_ns.load(Ordering::Relaxed);
        if now.saturating_sub(last) >= self.window_ns {
            self.last_ns.store(now, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

/// Backoff budget for `retrigger_subpartition_request`: tracks how many
/// milliseconds the next retry should wait, doubling each time, until a
/// caller-supplied ceiling is exceeded.
#[derive(Debug, Clone, Copy)]
pub struct BackoffBudget {
    current_ms: u32,
    max_ms: u32,
}

impl BackoffBudget {
    pub fn new(initial_ms: u32, max_ms: u32) -> Self {
        Self { current_ms: initial_ms, max_ms }
    }

    /// Returns the backoff to use for the next retry and advances the
    /// budget, or `None` once the budget is exhausted.
    pub fn next(&mut self) -> Option<Duration> {
        if self.current_ms > self.max_ms {
            return None;
        }
        let d = Duration::from_millis(self.current_ms as u64);
        self.current_ms = if self.current_ms == 0 { 1 } else { self.current_ms.saturating_mul(2) };
        Some(d)
    }
}

/// Coarse poll-wait used by `to_new_remote_input_channel` to drain the
/// received-buffers queue before tearing the old channel down. Deliberately
/// not a spin loop: this path is not latency sensitive.
#[inline]
pub fn coarse_sleep() {
    std::thread::sleep(Duration::from_millis(1));
}
