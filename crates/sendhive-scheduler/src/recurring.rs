//! Standing cron registrations for recurring tasks.
//!
//! Exactly one timer per task id: registering again replaces the old timer
//! (abort first, then insert), and cancelling aborts it — no orphaned
//! timers accumulate, and after a cancel no further firings can happen.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{FixedOffset, Utc};
use tokio::task::JoinHandle;

use crate::cron;

#[derive(Default)]
pub struct CronRegistry {
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl CronRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a standing timer for the task. `fire` is invoked on every
    /// matching minute; the expression must already be validated.
    pub fn register<F>(&self, task_id: &str, expression: &str, offset: FixedOffset, fire: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let expr = expression.to_string();
        let id = task_id.to_string();
        let handle = tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(next) = cron::next_run_with_offset(&expr, offset, now) else {
                    tracing::warn!("Cron '{}' for {} has no future firing; timer ends", expr, id);
                    break;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                tracing::debug!("⏰ Recurring task {} fired", id);
                fire();
            }
        });

        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = timers.insert(task_id.to_string(), handle) {
            old.abort();
            tracing::debug!("Replaced standing timer for {}", task_id);
        }
    }

    /// Stop the standing timer. Returns whether one existed.
    pub fn cancel(&self, task_id: &str) -> bool {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        match timers.remove(task_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.timers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort every timer (shutdown path).
    pub fn cancel_all(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }
}
