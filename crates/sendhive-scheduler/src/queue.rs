//! Per-type job queue with bounded worker concurrency.
//!
//! Jobs carry an explicit retry policy — max attempts plus a backoff
//! strategy — attached at enqueue time, so retry behavior is reproducible
//! without any particular broker library. Delivery is at-least-once: a
//! worker that dies mid-job may cause a redelivery.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use sendhive_core::types::{Task, TaskConfig, TaskType};
use serde::Serialize;
use tokio::sync::{Notify, watch};

/// How long to back off before a retry attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { base: Duration, cap: Duration },
}

impl Backoff {
    /// Delay before the given attempt number (1-based; attempt 1 ran with
    /// no delay). Exponential delays carry up to 10% jitter so a burst of
    /// failures doesn't retry in lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base, cap } => {
                let shift = attempt.saturating_sub(1).min(20);
                let ms = (base.as_millis() as u64)
                    .saturating_mul(1u64 << shift)
                    .min(cap.as_millis() as u64);
                let jitter = if ms >= 10 {
                    rand::thread_rng().gen_range(0..=ms / 10)
                } else {
                    0
                };
                Duration::from_millis(ms + jitter)
            }
        }
    }
}

/// Explicit retry policy attached to every job at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential { base, cap },
        }
    }
}

/// One execution attempt of a task (or one occurrence of a recurring
/// task). Owned by the queue, discarded after retries are exhausted.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub task_id: String,
    pub owner_id: String,
    pub task_type: TaskType,
    /// Copied from the task so the job runs without re-reading the record.
    pub config: TaskConfig,
    pub attempt: u32,
    pub policy: RetryPolicy,
    pub run_at: DateTime<Utc>,
}

impl Job {
    pub fn for_task(task: &Task, policy: RetryPolicy, run_at: DateTime<Utc>) -> Self {
        Self {
            id: format!("job-{}", uuid::Uuid::new_v4()),
            task_id: task.id.clone(),
            owner_id: task.owner_id.clone(),
            task_type: task.task_type,
            config: task.config.clone(),
            attempt: 1,
            policy,
            run_at,
        }
    }

    /// The retry of this job, delayed by the policy's backoff.
    pub fn next_attempt(&self) -> Job {
        let delay = self.policy.backoff.delay_for(self.attempt);
        Job {
            id: format!("job-{}", uuid::Uuid::new_v4()),
            attempt: self.attempt + 1,
            run_at: Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default(),
            ..self.clone()
        }
    }
}

#[derive(Default)]
struct QueueInner {
    waiting: VecDeque<Job>,
    delayed: Vec<Job>,
    /// Task ids currently being processed (one entry per active job).
    active: Vec<String>,
    completed: u64,
    failed: u64,
}

/// Observability counters for one queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queue: &'static str,
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
}

/// One logical queue per task type.
pub struct TaskQueue {
    pub task_type: TaskType,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a job; future `run_at` parks it in the delayed set.
    pub fn enqueue(&self, job: Job) {
        {
            let mut inner = self.lock();
            if job.run_at > Utc::now() {
                inner.delayed.push(job);
            } else {
                inner.waiting.push_back(job);
            }
        }
        self.notify.notify_one();
    }

    fn promote_due(inner: &mut QueueInner) {
        let now = Utc::now();
        if inner.delayed.is_empty() {
            return;
        }
        // keep submission order among due jobs
        inner.delayed.sort_by_key(|j| j.run_at);
        while inner.delayed.first().is_some_and(|j| j.run_at <= now) {
            let job = inner.delayed.remove(0);
            inner.waiting.push_back(job);
        }
    }

    /// Block until a job is available or shutdown is signalled.
    pub async fn next(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Job> {
        loop {
            if *shutdown.borrow() {
                return None;
            }
            let sleep_hint = {
                let mut inner = self.lock();
                Self::promote_due(&mut inner);
                if let Some(job) = inner.waiting.pop_front() {
                    inner.active.push(job.task_id.clone());
                    return Some(job);
                }
                inner
                    .delayed
                    .iter()
                    .map(|j| j.run_at)
                    .min()
                    .map(|at| (at - Utc::now()).to_std().unwrap_or_default())
            };

            let sleep_for = sleep_hint.unwrap_or(Duration::from_secs(3600));
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(sleep_for) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return None;
                    }
                }
            }
        }
    }

    /// Job finished terminally; updates the outcome counters.
    pub fn finish(&self, task_id: &str, success: bool) {
        let mut inner = self.lock();
        if let Some(pos) = inner.active.iter().position(|t| t == task_id) {
            inner.active.remove(pos);
        }
        if success {
            inner.completed += 1;
        } else {
            inner.failed += 1;
        }
        drop(inner);
        self.notify.notify_one();
    }

    /// Release the active slot without counting an outcome (skipped job).
    pub fn release(&self, task_id: &str) {
        let mut inner = self.lock();
        if let Some(pos) = inner.active.iter().position(|t| t == task_id) {
            inner.active.remove(pos);
        }
        drop(inner);
        self.notify.notify_one();
    }

    /// Park a retry: releases the current slot and re-enqueues the job.
    pub fn requeue(&self, current_task_id: &str, job: Job) {
        {
            let mut inner = self.lock();
            if let Some(pos) = inner.active.iter().position(|t| t == current_task_id) {
                inner.active.remove(pos);
            }
            if job.run_at > Utc::now() {
                inner.delayed.push(job);
            } else {
                inner.waiting.push_back(job);
            }
        }
        self.notify.notify_one();
    }

    /// Drop every waiting/delayed job referencing the task. Returns how
    /// many were removed.
    pub fn remove_task_jobs(&self, task_id: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.waiting.len() + inner.delayed.len();
        inner.waiting.retain(|j| j.task_id != task_id);
        inner.delayed.retain(|j| j.task_id != task_id);
        before - (inner.waiting.len() + inner.delayed.len())
    }

    /// Whether a job for the task is currently being processed.
    pub fn has_active(&self, task_id: &str) -> bool {
        self.lock().active.iter().any(|t| t == task_id)
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        QueueStats {
            queue: self.task_type.queue_name(),
            waiting: inner.waiting.len(),
            delayed: inner.delayed.len(),
            active: inner.active.len(),
            completed: inner.completed,
            failed: inner.failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sendhive_core::types::TaskConfig;

    fn job(task_id: &str, run_at: DateTime<Utc>) -> Job {
        Job {
            id: format!("job-{}", uuid::Uuid::new_v4()),
            task_id: task_id.into(),
            owner_id: "owner-1".into(),
            task_type: TaskType::BulkMessage,
            config: TaskConfig::default(),
            attempt: 1,
            policy: RetryPolicy::exponential(
                3,
                Duration::from_millis(10),
                Duration::from_millis(100),
            ),
            run_at,
        }
    }

    fn shutdown_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[test]
    fn test_exponential_backoff_growth() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(5000),
        };
        let d1 = backoff.delay_for(1);
        let d2 = backoff.delay_for(2);
        let d4 = backoff.delay_for(4);
        assert!(d1 >= Duration::from_millis(1000) && d1 <= Duration::from_millis(1100));
        assert!(d2 >= Duration::from_millis(2000) && d2 <= Duration::from_millis(2200));
        // capped (jitter included)
        assert!(d4 <= Duration::from_millis(5500));
    }

    #[tokio::test]
    async fn test_immediate_job_dequeues() {
        let queue = TaskQueue::new(TaskType::BulkMessage);
        queue.enqueue(job("task-1", Utc::now()));

        let (_tx, mut rx) = shutdown_pair();
        let picked = queue.next(&mut rx).await.unwrap();
        assert_eq!(picked.task_id, "task-1");
        assert!(queue.has_active("task-1"));

        queue.finish("task-1", true);
        assert!(!queue.has_active("task-1"));
        assert_eq!(queue.stats().completed, 1);
    }

    #[tokio::test]
    async fn test_delayed_job_waits_for_run_at() {
        let queue = TaskQueue::new(TaskType::BulkMessage);
        queue.enqueue(job("task-1", Utc::now() + chrono::Duration::milliseconds(80)));

        assert_eq!(queue.stats().delayed, 1);

        let (_tx, mut rx) = shutdown_pair();
        let start = std::time::Instant::now();
        let picked = queue.next(&mut rx).await.unwrap();
        assert_eq!(picked.task_id, "task-1");
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_worker() {
        let queue = std::sync::Arc::new(TaskQueue::new(TaskType::BulkMessage));
        let (tx, mut rx) = shutdown_pair();

        let q = queue.clone();
        let worker = tokio::spawn(async move { q.next(&mut rx).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        assert!(worker.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_task_jobs() {
        let queue = TaskQueue::new(TaskType::BulkMessage);
        queue.enqueue(job("task-1", Utc::now()));
        queue.enqueue(job("task-1", Utc::now() + chrono::Duration::seconds(60)));
        queue.enqueue(job("task-2", Utc::now()));

        assert_eq!(queue.remove_task_jobs("task-1"), 2);
        let stats = queue.stats();
        assert_eq!(stats.waiting + stats.delayed, 1);
    }

    #[tokio::test]
    async fn test_fifo_order_preserved() {
        let queue = TaskQueue::new(TaskType::BulkMessage);
        for i in 0..3 {
            queue.enqueue(job(&format!("task-{i}"), Utc::now()));
        }
        let (_tx, mut rx) = shutdown_pair();
        for i in 0..3 {
            let picked = queue.next(&mut rx).await.unwrap();
            assert_eq!(picked.task_id, format!("task-{i}"));
        }
    }

    #[test]
    fn test_next_attempt_increments_and_delays() {
        let first = job("task-1", Utc::now());
        let retry = first.next_attempt();
        assert_eq!(retry.attempt, 2);
        assert!(retry.run_at > first.run_at);
        assert_ne!(retry.id, first.id);
        assert_eq!(retry.task_id, first.task_id);
    }
}
