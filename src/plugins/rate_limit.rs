//! Sliding-window quotas for one mounted iframe.
//!
//! Each window keeps only the timestamps still inside it and checks the
//! count before recording the new request, so a rejected request does not
//! consume budget.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::RateLimitConfig;

use super::error::BridgeError;

/// Millisecond clock used for quota windows.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by `chrono`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(by, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Ordered request timestamps within a rolling window.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    window_ms: u64,
    max: usize,
    timestamps: VecDeque<u64>,
}

impl SlidingWindow {
    pub fn new(window: Duration, max: usize) -> Self {
        Self {
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
            max,
            timestamps: VecDeque::with_capacity(max),
        }
    }

    /// Record a request at `now_ms` unless the window is already full.
    pub fn try_record(&mut self, now_ms: u64) -> bool {
        let window_ms = self.window_ms;
        while self
            .timestamps
            .front()
            .is_some_and(|&ts| now_ms.saturating_sub(ts) >= window_ms)
        {
            self.timestamps.pop_front();
        }

        if self.timestamps.len() >= self.max {
            return false;
        }
        self.timestamps.push_back(now_ms);
        true
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// The two quotas every session carries.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    general: SlidingWindow,
    sensitive: SlidingWindow,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            general: SlidingWindow::new(config.general_window(), config.general_max_requests),
            sensitive: SlidingWindow::new(config.sensitive_window(), config.sensitive_max_requests),
        }
    }

    /// Charge one request against the general quota.
    pub fn check_general(&mut self, now_ms: u64) -> Result<(), BridgeError> {
        if self.general.try_record(now_ms) {
            Ok(())
        } else {
            Err(BridgeError::MaxRequestsPerMinute)
        }
    }

    /// Charge one navigation or permission prompt.
    pub fn check_sensitive(&mut self, now_ms: u64) -> Result<(), BridgeError> {
        if self.sensitive.try_record(now_ms) {
            Ok(())
        } else {
            Err(BridgeError::MaxNavigatesPer5Secs)
        }
    }

    pub fn general_in_window(&self) -> usize {
        self.general.len()
    }

    pub fn sensitive_in_window(&self) -> usize {
        self.sensitive.len()
    }
}
