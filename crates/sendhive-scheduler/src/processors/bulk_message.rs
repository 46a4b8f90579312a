//! Bulk message dispatch — the workhorse processor.
//!
//! Targets are round-robined across the healthy subset of the task's
//! accounts in submission order. Rate-limited and failed targets are
//! recorded and counted, never retried within the job; only a job-level
//! error (no healthy account at all) fails the task.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sendhive_core::error::{Result, SendHiveError};
use sendhive_core::types::{TargetOutcome, TargetResult, TaskType};

use super::{ProcessorContext, TaskProcessor};
use crate::queue::Job;

#[derive(Default)]
pub struct BulkMessageProcessor;

impl BulkMessageProcessor {
    pub fn new() -> Self {
        Self
    }

    fn record(
        ctx: &ProcessorContext,
        job: &Job,
        target: &str,
        account_id: &str,
        outcome: TargetOutcome,
        detail: Option<String>,
    ) {
        let result = TargetResult {
            target: target.to_string(),
            account_id: account_id.to_string(),
            outcome,
            detail,
            at: Utc::now(),
        };
        if let Err(e) = ctx.store.append_target_result(&job.task_id, &result) {
            tracing::warn!("⚠️ Failed to record result for {}: {e}", job.task_id);
        }
        let (completed, failed) = match outcome {
            TargetOutcome::Sent => (1, 0),
            _ => (0, 1),
        };
        if let Err(e) = ctx.store.incr_task_progress(&job.task_id, completed, failed) {
            tracing::warn!("⚠️ Failed to update progress for {}: {e}", job.task_id);
        }
    }
}

#[async_trait]
impl TaskProcessor for BulkMessageProcessor {
    fn task_type(&self) -> TaskType {
        TaskType::BulkMessage
    }

    async fn process(&self, job: &Job, ctx: &ProcessorContext) -> Result<()> {
        let targets = &job.config.targets;
        ctx.store.set_task_total(&job.task_id, targets.len() as u32)?;

        // Only healthy, connected accounts participate.
        let mut healthy = Vec::new();
        for account_id in &job.config.accounts {
            match ctx.orchestrator.get_status(account_id).await {
                Ok(report) if report.healthy => healthy.push(report.account),
                Ok(report) => tracing::debug!(
                    "Account {} skipped for bulk send (status {})",
                    account_id,
                    report.account.status.as_str()
                ),
                Err(e) => tracing::debug!("Account {} skipped for bulk send: {e}", account_id),
            }
        }
        if healthy.is_empty() {
            // fail the task, don't silently drop the work
            return Err(SendHiveError::AccountUnhealthy(format!(
                "no healthy account available for task {}",
                job.task_id
            )));
        }

        // A redelivered job resumes where the last attempt stopped.
        let already_done = ctx.store.list_target_results(&job.task_id)?.len();
        if already_done > 0 {
            tracing::info!(
                "Task {} resuming at target {}/{} (at-least-once redelivery)",
                job.task_id,
                already_done,
                targets.len()
            );
        }

        let delay = Duration::from_millis(job.config.limits.message_delay_ms);
        for (i, target) in targets.iter().enumerate().skip(already_done) {
            // safe checkpoint: an in-flight send finishes, then we stop
            if ctx.is_cancelled(&job.task_id) {
                tracing::info!(
                    "Task {} cancelled after {}/{} targets",
                    job.task_id,
                    i,
                    targets.len()
                );
                return Ok(());
            }

            let account = &healthy[i % healthy.len()];

            if !ctx.rate.try_acquire(&account.id, &account.config.rate_limits) {
                Self::record(
                    ctx,
                    job,
                    target,
                    &account.id,
                    TargetOutcome::RateLimited,
                    Some(format!(
                        "hourly {} / daily {} ceiling reached",
                        account.config.rate_limits.hourly, account.config.rate_limits.daily
                    )),
                );
                continue;
            }

            // An account stopped mid-task fails fast per target, it does
            // not abort the rest of the list.
            if !ctx.orchestrator.registry().contains(&account.id).await {
                Self::record(
                    ctx,
                    job,
                    target,
                    &account.id,
                    TargetOutcome::Failed,
                    Some("account not connected".into()),
                );
                continue;
            }

            let Some(sender) = ctx.senders.get(&account.platform) else {
                Self::record(
                    ctx,
                    job,
                    target,
                    &account.id,
                    TargetOutcome::Skipped,
                    Some(format!("no sender for platform {}", account.platform.as_str())),
                );
                continue;
            };

            match sender.send(account, target, &job.config.content).await {
                Ok(receipt) => {
                    tracing::debug!(
                        "Sent to {} via {} (msg={})",
                        target,
                        account.id,
                        receipt.message_id
                    );
                    Self::record(
                        ctx,
                        job,
                        target,
                        &account.id,
                        TargetOutcome::Sent,
                        Some(receipt.message_id),
                    );
                }
                Err(e) => {
                    Self::record(
                        ctx,
                        job,
                        target,
                        &account.id,
                        TargetOutcome::Failed,
                        Some(e.to_string()),
                    );
                }
            }

            if i + 1 < targets.len() && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(())
    }
}
