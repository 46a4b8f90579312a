//! Scheduler facade — the task-side surface route handlers call into.
//!
//! Owns the mapping from a durable task to its queue jobs and cron
//! registration: one queue per task type, per-queue worker pools, standing
//! timers for recurring tasks, and the shared cancellation flags.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use sendhive_core::config::SchedulerConfig;
use sendhive_core::error::{Result, SendHiveError};
use sendhive_core::traits::MessageSender;
use sendhive_core::types::{Platform, Task, TaskSchedule, TaskStatus, TaskType};
use sendhive_runtime::AccountOrchestrator;
use sendhive_store::StoreDb;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cron;
use crate::processors::{
    BulkMessageProcessor, CancelFlags, FleetCheckProcessor, ProcessorContext, TaskProcessor,
};
use crate::queue::{Job, QueueStats, RetryPolicy, TaskQueue};
use crate::rate::RateTracker;
use crate::recurring::CronRegistry;

pub struct TaskScheduler {
    store: Arc<StoreDb>,
    queues: HashMap<TaskType, Arc<TaskQueue>>,
    processors: Mutex<HashMap<TaskType, Arc<dyn TaskProcessor>>>,
    cron: Arc<CronRegistry>,
    ctx: Arc<ProcessorContext>,
    cancelled: Arc<CancelFlags>,
    config: SchedulerConfig,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(
        store: Arc<StoreDb>,
        orchestrator: Arc<AccountOrchestrator>,
        senders: HashMap<Platform, Arc<dyn MessageSender>>,
        config: SchedulerConfig,
    ) -> Self {
        let mut queues = HashMap::new();
        for task_type in TaskType::ALL {
            queues.insert(task_type, Arc::new(TaskQueue::new(task_type)));
        }

        let cancelled = Arc::new(CancelFlags::default());
        let ctx = Arc::new(ProcessorContext {
            orchestrator,
            store: store.clone(),
            rate: Arc::new(RateTracker::new()),
            senders,
            cancelled: cancelled.clone(),
        });

        let mut processors: HashMap<TaskType, Arc<dyn TaskProcessor>> = HashMap::new();
        processors.insert(
            TaskType::BulkMessage,
            Arc::new(BulkMessageProcessor::new()),
        );
        processors.insert(TaskType::FleetCheck, Arc::new(FleetCheckProcessor::new()));

        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            queues,
            processors: Mutex::new(processors),
            cron: Arc::new(CronRegistry::new()),
            ctx,
            cancelled,
            config,
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Swap in a processor for one task type. Call before `start`.
    pub fn register_processor(&self, processor: Arc<dyn TaskProcessor>) {
        let mut processors = self.processors.lock().unwrap_or_else(|e| e.into_inner());
        processors.insert(processor.task_type(), processor);
    }

    /// Spawn the per-queue worker pools.
    pub fn start(&self) {
        let processors = self
            .processors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for task_type in TaskType::ALL {
            let Some(processor) = processors.get(&task_type) else {
                continue;
            };
            let queue = self.queues[&task_type].clone();
            for worker_idx in 0..self.config.queue_concurrency.max(1) {
                let queue = queue.clone();
                let processor = processor.clone();
                let ctx = self.ctx.clone();
                let shutdown = self.shutdown_tx.subscribe();
                workers.push(tokio::spawn(async move {
                    worker_loop(queue, processor, ctx, shutdown, worker_idx).await;
                }));
            }
        }
        tracing::info!(
            "⚙️ Scheduler started: {} queues × {} workers",
            self.queues.len(),
            self.config.queue_concurrency.max(1)
        );
    }

    fn queue_for(&self, task_type: TaskType) -> Result<&Arc<TaskQueue>> {
        self.queues.get(&task_type).ok_or_else(|| {
            SendHiveError::BrokerUnavailable(format!(
                "no queue for task type {}",
                task_type.queue_name()
            ))
        })
    }

    fn default_policy(&self, retry_times: u32) -> RetryPolicy {
        RetryPolicy::exponential(
            retry_times,
            Duration::from_millis(self.config.backoff_base_ms),
            Duration::from_millis(self.config.backoff_cap_ms),
        )
    }

    /// Queue a task. Immediate tasks run as soon as a worker frees up,
    /// delayed tasks at their start time (a past start time runs now), and
    /// recurring tasks are routed to a standing cron registration instead
    /// of a single job.
    pub fn add_task(&self, task: &Task) -> Result<()> {
        if matches!(task.config.schedule, TaskSchedule::Recurring { .. }) {
            return self.add_recurring_task(task);
        }

        let now = Utc::now();
        let run_at = match &task.config.schedule {
            TaskSchedule::Immediate => now,
            TaskSchedule::Delayed { start_at } => (*start_at).max(now),
            TaskSchedule::Recurring { .. } => unreachable!("routed above"),
        };

        let queue = self.queue_for(task.task_type)?;
        if self.store.get_task(&task.id)?.is_none() {
            self.store.insert_task(task)?;
        }
        self.store.mark_task_queued(&task.id, now)?;

        let policy = self.default_policy(task.config.limits.retry_times);
        queue.enqueue(Job::for_task(task, policy, run_at));
        tracing::info!(
            "📬 Task {} queued on {} (run_at={})",
            task.id,
            task.task_type.queue_name(),
            run_at.to_rfc3339()
        );
        Ok(())
    }

    /// Register a standing cron timer for the task. Exactly one timer per
    /// task id — re-registering replaces the previous timer.
    pub fn add_recurring_task(&self, task: &Task) -> Result<()> {
        let TaskSchedule::Recurring {
            cron: expression,
            timezone,
        } = &task.config.schedule
        else {
            return Err(SendHiveError::InvalidSchedule(format!(
                "task {} has no recurring schedule",
                task.id
            )));
        };
        cron::validate(expression)?;
        let offset = cron::parse_offset(timezone)?;

        if self.store.get_task(&task.id)?.is_none() {
            self.store.insert_task(task)?;
        }
        self.store.mark_task_queued(&task.id, Utc::now())?;

        let queue = self.queue_for(task.task_type)?.clone();
        let store = self.store.clone();
        let policy = self.default_policy(task.config.limits.retry_times);
        let snapshot = task.clone();
        self.cron.register(&task.id, expression, offset, move || {
            // each firing produces a fresh job with a fresh id; a task that
            // went terminal in the meantime produces nothing
            match store.get_task(&snapshot.id) {
                Ok(Some(current)) if !current.status.is_terminal() => {
                    store.mark_task_queued(&snapshot.id, Utc::now()).ok();
                    queue.enqueue(Job::for_task(&snapshot, policy, Utc::now()));
                }
                _ => {}
            }
        });

        tracing::info!(
            "🔁 Recurring task {} registered ({} {})",
            task.id,
            expression,
            timezone
        );
        Ok(())
    }

    /// Cancel a task everywhere: drop its pending jobs across all queues,
    /// flag any active job to stop at the next checkpoint, deregister its
    /// cron timer, and mark the durable record cancelled. Safe on a task
    /// that already completed — nothing beyond the (rejected) store write.
    pub fn cancel_task(&self, task_id: &str) -> Result<()> {
        self.store
            .get_task(task_id)?
            .ok_or_else(|| SendHiveError::TaskNotFound(task_id.to_string()))?;

        let had_timer = self.cron.cancel(task_id);
        self.cancelled.raise(task_id);

        let mut removed = 0;
        for queue in self.queues.values() {
            removed += queue.remove_task_jobs(task_id);
        }
        let changed = self.store.mark_task_cancelled(task_id)?;

        let still_active = self.queues.values().any(|q| q.has_active(task_id));
        if !still_active {
            self.cancelled.clear(task_id);
        }

        tracing::info!(
            "🛑 Task {task_id} cancelled (jobs removed: {removed}, timer: {had_timer}, \
             store changed: {changed})"
        );
        Ok(())
    }

    /// Whether a standing cron timer exists for the task.
    pub fn has_recurring(&self, task_id: &str) -> bool {
        self.cron.contains(task_id)
    }

    /// Read-only per-queue counters.
    pub fn get_queue_stats(&self) -> Vec<QueueStats> {
        let mut stats: Vec<QueueStats> = self.queues.values().map(|q| q.stats()).collect();
        stats.sort_by_key(|s| s.queue);
        stats
    }

    /// Signal every worker to stop, abort standing timers, and wait for
    /// the pools to drain.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send(true).ok();
        self.cron.cancel_all();
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for worker in workers {
            worker.await.ok();
        }
        tracing::info!("Scheduler shut down");
    }
}

async fn worker_loop(
    queue: Arc<TaskQueue>,
    processor: Arc<dyn TaskProcessor>,
    ctx: Arc<ProcessorContext>,
    mut shutdown: watch::Receiver<bool>,
    worker_idx: usize,
) {
    loop {
        let Some(job) = queue.next(&mut shutdown).await else {
            break;
        };

        // cancelled or terminal tasks are dropped on pickup
        let pickable = !ctx.is_cancelled(&job.task_id)
            && ctx
                .store
                .mark_task_running(&job.task_id, Utc::now())
                .unwrap_or(false);
        if !pickable {
            queue.release(&job.task_id);
            if ctx.is_cancelled(&job.task_id) && !queue.has_active(&job.task_id) {
                ctx.cancelled.clear(&job.task_id);
            }
            continue;
        }

        tracing::debug!(
            "Worker {}/{} picked job {} (task {}, attempt {}/{})",
            queue.task_type.queue_name(),
            worker_idx,
            job.id,
            job.task_id,
            job.attempt,
            job.policy.max_attempts
        );

        let recurring = matches!(job.config.schedule, TaskSchedule::Recurring { .. });
        match processor.process(&job, &ctx).await {
            Ok(()) => {
                if ctx.is_cancelled(&job.task_id) {
                    // processor stopped at a checkpoint; store already says cancelled
                    queue.release(&job.task_id);
                    ctx.cancelled.clear(&job.task_id);
                } else if recurring {
                    ctx.store
                        .update_task_status_if(&job.task_id, &[TaskStatus::Running], TaskStatus::Queued)
                        .ok();
                    queue.finish(&job.task_id, true);
                } else {
                    if let Err(e) = ctx.store.mark_task_completed(&job.task_id) {
                        tracing::warn!("⚠️ Failed to mark {} completed: {e}", job.task_id);
                    }
                    queue.finish(&job.task_id, true);
                }
            }
            Err(e) => {
                // "no healthy account" fails immediately, not after retries
                let fail_now = matches!(e, SendHiveError::AccountUnhealthy(_))
                    || job.attempt >= job.policy.max_attempts;
                if fail_now {
                    tracing::warn!(
                        "❌ Task {} failed terminally on attempt {}/{}: {e}",
                        job.task_id,
                        job.attempt,
                        job.policy.max_attempts
                    );
                    ctx.store.mark_task_failed(&job.task_id, &e.to_string()).ok();
                    queue.finish(&job.task_id, false);
                } else {
                    tracing::warn!(
                        "Task {} attempt {}/{} failed, backing off: {e}",
                        job.task_id,
                        job.attempt,
                        job.policy.max_attempts
                    );
                    queue.requeue(&job.task_id, job.next_attempt());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sendhive_core::config::SendHiveConfig;
    use sendhive_core::traits::ContainerRuntime;
    use sendhive_core::types::{
        Account, AccountConfig, RateLimits, RuntimeHandle, RuntimeInspection, RuntimeSpec,
        RuntimeStatus, SendReceipt, TargetOutcome, TaskConfig, TaskLimits,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Runtime whose environments are always healthy once started.
    struct TestRuntime {
        next_port: AtomicU32,
    }

    impl TestRuntime {
        fn new() -> Self {
            Self {
                next_port: AtomicU32::new(10101),
            }
        }
    }

    #[async_trait]
    impl ContainerRuntime for TestRuntime {
        async fn create(&self, spec: &RuntimeSpec) -> sendhive_core::Result<RuntimeHandle> {
            Ok(RuntimeHandle {
                id: format!("test-{}", spec.account_id),
                port: self.next_port.fetch_add(1, Ordering::SeqCst) as u16,
            })
        }
        async fn start(&self, _handle: &RuntimeHandle) -> sendhive_core::Result<()> {
            Ok(())
        }
        async fn stop(&self, _handle: &RuntimeHandle) -> sendhive_core::Result<()> {
            Ok(())
        }
        async fn remove(&self, _handle: &RuntimeHandle) -> sendhive_core::Result<()> {
            Ok(())
        }
        async fn inspect(&self, handle: &RuntimeHandle) -> sendhive_core::Result<RuntimeInspection> {
            Ok(RuntimeInspection {
                status: RuntimeStatus::Running,
                port: Some(handle.port),
            })
        }
    }

    /// Sender recording every (account, target) pair.
    struct TestSender {
        sends: Mutex<Vec<(String, String)>>,
    }

    impl TestSender {
        fn new() -> Self {
            Self {
                sends: Mutex::new(Vec::new()),
            }
        }

        fn sends(&self) -> Vec<(String, String)> {
            self.sends.lock().unwrap().clone()
        }

        fn count_for(&self, account_id: &str) -> usize {
            self.sends()
                .iter()
                .filter(|(acc, _)| acc == account_id)
                .count()
        }
    }

    #[async_trait]
    impl sendhive_core::traits::MessageSender for TestSender {
        fn platform(&self) -> Platform {
            Platform::Whatsapp
        }
        async fn send(
            &self,
            account: &Account,
            target: &str,
            _content: &str,
        ) -> sendhive_core::Result<SendReceipt> {
            self.sends
                .lock()
                .unwrap()
                .push((account.id.clone(), target.to_string()));
            Ok(SendReceipt {
                message_id: format!("msg-{}", uuid::Uuid::new_v4()),
                at: Utc::now(),
            })
        }
    }

    struct Harness {
        store: Arc<StoreDb>,
        orchestrator: Arc<AccountOrchestrator>,
        scheduler: TaskScheduler,
        sender: Arc<TestSender>,
    }

    async fn setup() -> Harness {
        let mut cfg = SendHiveConfig::default();
        cfg.monitor.poll_interval_secs = 60;
        cfg.scheduler.queue_concurrency = 2;
        cfg.scheduler.backoff_base_ms = 1;
        cfg.scheduler.backoff_cap_ms = 10;

        let store = Arc::new(StoreDb::in_memory().unwrap());
        let orchestrator = Arc::new(AccountOrchestrator::new(
            store.clone(),
            Arc::new(TestRuntime::new()),
            &cfg,
        ));

        let sender = Arc::new(TestSender::new());
        let mut senders: HashMap<Platform, Arc<dyn MessageSender>> = HashMap::new();
        senders.insert(Platform::Whatsapp, sender.clone());

        let scheduler = TaskScheduler::new(
            store.clone(),
            orchestrator.clone(),
            senders,
            cfg.scheduler.clone(),
        );
        scheduler.start();

        Harness {
            store,
            orchestrator,
            scheduler,
            sender,
        }
    }

    async fn healthy_account(h: &Harness, hourly: u32) -> Account {
        let account = h
            .orchestrator
            .create_account(
                "owner-1",
                Platform::Whatsapp,
                AccountConfig {
                    rate_limits: RateLimits { hourly, daily: 1000 },
                    ..Default::default()
                },
            )
            .unwrap();
        h.orchestrator.start_account(&account.id).await.unwrap();
        h.orchestrator.record_heartbeat(&account.id).unwrap();
        account
    }

    fn bulk_task(accounts: &[&Account], targets: usize, delay_ms: u64) -> Task {
        Task::new(
            "owner-1",
            TaskType::BulkMessage,
            TaskConfig {
                accounts: accounts.iter().map(|a| a.id.clone()).collect(),
                targets: (0..targets).map(|i| format!("+8490000{i:04}")).collect(),
                content: "hello from sendhive".into(),
                limits: TaskLimits {
                    retry_times: 3,
                    message_delay_ms: delay_ms,
                },
                schedule: TaskSchedule::Immediate,
            },
        )
    }

    async fn wait_for_status(store: &StoreDb, task_id: &str, expected: TaskStatus) -> Task {
        for _ in 0..200 {
            let task = store.get_task(task_id).unwrap().unwrap();
            if task.status == expected {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let task = store.get_task(task_id).unwrap().unwrap();
        panic!(
            "task {task_id} never reached {expected:?}, stuck at {:?}",
            task.status
        );
    }

    #[tokio::test]
    async fn test_bulk_round_robin_across_two_accounts() {
        let h = setup().await;
        let a = healthy_account(&h, 5).await;
        let b = healthy_account(&h, 5).await;

        let task = bulk_task(&[&a, &b], 10, 0);
        h.scheduler.add_task(&task).unwrap();

        let done = wait_for_status(&h.store, &task.id, TaskStatus::Completed).await;
        assert_eq!(done.progress.completed, 10);
        assert_eq!(done.progress.failed, 0);
        assert_eq!(done.results.len(), 10);
        assert!(done.results.iter().all(|r| r.outcome == TargetOutcome::Sent));

        // 5/5 split, none rate-limited
        assert_eq!(h.sender.count_for(&a.id), 5);
        assert_eq!(h.sender.count_for(&b.id), 5);
    }

    #[tokio::test]
    async fn test_bulk_rate_limit_single_account() {
        let h = setup().await;
        let a = healthy_account(&h, 5).await;

        let task = bulk_task(&[&a], 10, 0);
        h.scheduler.add_task(&task).unwrap();

        // rate-limited targets never fail the task
        let done = wait_for_status(&h.store, &task.id, TaskStatus::Completed).await;
        assert_eq!(done.progress.completed, 5);
        assert_eq!(done.progress.failed, 5);
        let limited = done
            .results
            .iter()
            .filter(|r| r.outcome == TargetOutcome::RateLimited)
            .count();
        assert_eq!(limited, 5);
        assert_eq!(h.sender.sends().len(), 5);
    }

    #[tokio::test]
    async fn test_bulk_preserves_target_order() {
        let h = setup().await;
        let a = healthy_account(&h, 100).await;

        let task = bulk_task(&[&a], 5, 0);
        h.scheduler.add_task(&task).unwrap();
        wait_for_status(&h.store, &task.id, TaskStatus::Completed).await;

        let sent: Vec<String> = h.sender.sends().into_iter().map(|(_, t)| t).collect();
        assert_eq!(sent, task.config.targets);
    }

    #[tokio::test]
    async fn test_no_healthy_account_fails_without_retries() {
        let h = setup().await;
        // account exists but was never started — not healthy
        let account = h
            .orchestrator
            .create_account("owner-1", Platform::Whatsapp, AccountConfig::default())
            .unwrap();

        let task = bulk_task(&[&account], 4, 0);
        h.scheduler.add_task(&task).unwrap();

        let failed = wait_for_status(&h.store, &task.id, TaskStatus::Failed).await;
        assert!(failed.error.unwrap().contains("no healthy account"));
        assert!(h.sender.sends().is_empty());

        // failed immediately: exactly one job outcome, no retries
        let stats = h.scheduler.get_queue_stats();
        let bulk = stats.iter().find(|s| s.queue == "bulk_message").unwrap();
        assert_eq!(bulk.failed, 1);
    }

    struct AlwaysFailingProcessor {
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl TaskProcessor for AlwaysFailingProcessor {
        fn task_type(&self) -> TaskType {
            TaskType::FleetCheck
        }
        async fn process(&self, _job: &Job, _ctx: &ProcessorContext) -> sendhive_core::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SendHiveError::Send("instance API unreachable".into()))
        }
    }

    #[tokio::test]
    async fn test_retry_times_three_means_three_attempts() {
        let mut cfg = SendHiveConfig::default();
        cfg.scheduler.queue_concurrency = 1;
        cfg.scheduler.backoff_base_ms = 1;
        cfg.scheduler.backoff_cap_ms = 5;

        let store = Arc::new(StoreDb::in_memory().unwrap());
        let orchestrator = Arc::new(AccountOrchestrator::new(
            store.clone(),
            Arc::new(TestRuntime::new()),
            &cfg,
        ));
        let scheduler = TaskScheduler::new(
            store.clone(),
            orchestrator,
            HashMap::new(),
            cfg.scheduler.clone(),
        );

        let attempts = Arc::new(AtomicU32::new(0));
        scheduler.register_processor(Arc::new(AlwaysFailingProcessor {
            attempts: attempts.clone(),
        }));
        scheduler.start();

        let task = Task::new(
            "owner-1",
            TaskType::FleetCheck,
            TaskConfig {
                limits: TaskLimits {
                    retry_times: 3,
                    message_delay_ms: 0,
                },
                ..Default::default()
            },
        );
        scheduler.add_task(&task).unwrap();

        let failed = wait_for_status(&store, &task.id, TaskStatus::Failed).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(failed.error.unwrap().contains("instance API unreachable"));
    }

    #[tokio::test]
    async fn test_cancel_mid_task_keeps_recorded_results() {
        let h = setup().await;
        let a = healthy_account(&h, 100).await;

        let task = bulk_task(&[&a], 10, 40);
        h.scheduler.add_task(&task).unwrap();

        // let a few targets go through
        for _ in 0..200 {
            if h.sender.sends().len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        h.scheduler.cancel_task(&task.id).unwrap();

        let cancelled = wait_for_status(&h.store, &task.id, TaskStatus::Cancelled).await;
        // in-flight send may finish; after that nothing new
        tokio::time::sleep(Duration::from_millis(120)).await;
        let frozen = h.sender.sends().len();
        assert!(frozen >= 3 && frozen < 10, "got {frozen} sends");
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(h.sender.sends().len(), frozen);

        // recorded results survive cancellation
        let results = h.store.list_target_results(&cancelled.id).unwrap();
        assert!(results.len() >= 3);
    }

    #[tokio::test]
    async fn test_cancel_completed_task_is_noop() {
        let h = setup().await;
        let a = healthy_account(&h, 100).await;

        let task = bulk_task(&[&a], 2, 0);
        h.scheduler.add_task(&task).unwrap();
        wait_for_status(&h.store, &task.id, TaskStatus::Completed).await;

        h.scheduler.cancel_task(&task.id).unwrap();
        let still = h.store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(still.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_unknown_task() {
        let h = setup().await;
        let err = h.scheduler.cancel_task("task-ghost").unwrap_err();
        assert!(matches!(err, SendHiveError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn test_recurring_registers_once_and_cancel_stops_firings() {
        let h = setup().await;
        let task = Task::new(
            "owner-1",
            TaskType::FleetCheck,
            TaskConfig {
                schedule: TaskSchedule::Recurring {
                    cron: "0 3 * * *".into(),
                    timezone: "UTC".into(),
                },
                ..Default::default()
            },
        );

        h.scheduler.add_task(&task).unwrap();
        assert!(h.scheduler.has_recurring(&task.id));

        // re-adding replaces, never duplicates
        h.scheduler.add_task(&task).unwrap();
        assert!(h.scheduler.has_recurring(&task.id));

        h.scheduler.cancel_task(&task.id).unwrap();
        assert!(!h.scheduler.has_recurring(&task.id));

        let cancelled = h.store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        // no job for the task remains anywhere
        let stats = h.scheduler.get_queue_stats();
        assert!(stats.iter().all(|s| s.waiting == 0 && s.delayed == 0));
    }

    #[tokio::test]
    async fn test_invalid_cron_rejected() {
        let h = setup().await;
        let task = Task::new(
            "owner-1",
            TaskType::FleetCheck,
            TaskConfig {
                schedule: TaskSchedule::Recurring {
                    cron: "not a cron".into(),
                    timezone: "UTC".into(),
                },
                ..Default::default()
            },
        );
        let err = h.scheduler.add_task(&task).unwrap_err();
        assert!(matches!(err, SendHiveError::InvalidSchedule(_)));
        assert!(!h.scheduler.has_recurring(&task.id));
    }

    #[tokio::test]
    async fn test_delayed_task_runs_after_start_time() {
        let h = setup().await;
        let a = healthy_account(&h, 100).await;

        let start_at = Utc::now() + chrono::Duration::milliseconds(120);
        let mut task = bulk_task(&[&a], 1, 0);
        task.config.schedule = TaskSchedule::Delayed { start_at };
        h.scheduler.add_task(&task).unwrap();

        let done = wait_for_status(&h.store, &task.id, TaskStatus::Completed).await;
        assert!(done.started_at.unwrap() >= start_at - chrono::Duration::milliseconds(20));
    }

    #[tokio::test]
    async fn test_fleet_check_records_account_health() {
        let h = setup().await;
        let a = healthy_account(&h, 10).await;
        let b = h
            .orchestrator
            .create_account("owner-1", Platform::Whatsapp, AccountConfig::default())
            .unwrap();

        let task = Task::new(
            "owner-1",
            TaskType::FleetCheck,
            TaskConfig {
                accounts: vec![a.id.clone(), b.id.clone()],
                ..Default::default()
            },
        );
        h.scheduler.add_task(&task).unwrap();

        let done = wait_for_status(&h.store, &task.id, TaskStatus::Completed).await;
        assert_eq!(done.progress.completed, 1);
        assert_eq!(done.progress.failed, 1);
        let healthy_row = done.results.iter().find(|r| r.target == a.id).unwrap();
        assert_eq!(healthy_row.outcome, TargetOutcome::Sent);
    }

    #[tokio::test]
    async fn test_queue_stats_reflect_outcomes() {
        let h = setup().await;
        let a = healthy_account(&h, 100).await;

        let task = bulk_task(&[&a], 1, 0);
        h.scheduler.add_task(&task).unwrap();
        wait_for_status(&h.store, &task.id, TaskStatus::Completed).await;

        let stats = h.scheduler.get_queue_stats();
        assert_eq!(stats.len(), TaskType::ALL.len());
        let bulk = stats.iter().find(|s| s.queue == "bulk_message").unwrap();
        assert_eq!(bulk.completed, 1);
        assert_eq!(bulk.active, 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_workers() {
        let h = setup().await;
        h.scheduler.shutdown().await;

        // a task queued after shutdown stays queued
        let a = healthy_account(&h, 10).await;
        let task = bulk_task(&[&a], 1, 0);
        h.scheduler.add_task(&task).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let still = h.store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(still.status, TaskStatus::Queued);
    }
}
