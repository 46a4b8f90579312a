//! Rolling per-account send-rate windows.
//!
//! Counters are shared across every task targeting the account and checked
//! and incremented under one lock, so two processors racing on the same
//! account cannot overshoot the ceiling. Windows roll: an hour window that
//! started more than an hour ago resets to zero, likewise the day window —
//! limits recover over time instead of counting lifetime sends.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use sendhive_core::types::RateLimits;

#[derive(Debug, Clone, Copy)]
struct Windows {
    hour_start: DateTime<Utc>,
    hour_count: u32,
    day_start: DateTime<Utc>,
    day_count: u32,
}

impl Windows {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            hour_start: now,
            hour_count: 0,
            day_start: now,
            day_count: 0,
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        if now - self.hour_start >= Duration::hours(1) {
            self.hour_start = now;
            self.hour_count = 0;
        }
        if now - self.day_start >= Duration::days(1) {
            self.day_start = now;
            self.day_count = 0;
        }
    }
}

/// Shared, concurrency-safe rolling counters per account.
#[derive(Default)]
pub struct RateTracker {
    windows: Mutex<HashMap<String, Windows>>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve one send slot for the account. Returns false (and consumes
    /// nothing) when either the hourly or daily ceiling is reached.
    pub fn try_acquire(&self, account_id: &str, limits: &RateLimits) -> bool {
        self.try_acquire_at(account_id, limits, Utc::now())
    }

    /// Clock-injectable variant used by tests.
    pub fn try_acquire_at(
        &self,
        account_id: &str,
        limits: &RateLimits,
        now: DateTime<Utc>,
    ) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let entry = windows
            .entry(account_id.to_string())
            .or_insert_with(|| Windows::fresh(now));
        entry.roll(now);

        if entry.hour_count >= limits.hourly || entry.day_count >= limits.daily {
            return false;
        }
        entry.hour_count += 1;
        entry.day_count += 1;
        true
    }

    /// Sends counted in the current hour window, for observability.
    pub fn hour_count(&self, account_id: &str) -> u32 {
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(account_id)
            .map(|w| w.hour_count)
            .unwrap_or(0)
    }
}
