//! Fleet check — status sweep across a set of accounts.
//!
//! Typically scheduled as a recurring task; each firing records one
//! outcome row per account so the dashboard can trend fleet health.

use async_trait::async_trait;
use chrono::Utc;
use sendhive_core::error::Result;
use sendhive_core::types::{TargetOutcome, TargetResult, TaskType};

use super::{ProcessorContext, TaskProcessor};
use crate::queue::Job;

#[derive(Default)]
pub struct FleetCheckProcessor;

impl FleetCheckProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskProcessor for FleetCheckProcessor {
    fn task_type(&self) -> TaskType {
        TaskType::FleetCheck
    }

    async fn process(&self, job: &Job, ctx: &ProcessorContext) -> Result<()> {
        let account_ids = &job.config.accounts;
        // every firing is a fresh sweep; result rows keep the history
        ctx.store
            .reset_task_progress(&job.task_id, account_ids.len() as u32)?;

        for account_id in account_ids {
            if ctx.is_cancelled(&job.task_id) {
                return Ok(());
            }

            let (outcome, detail) = match ctx.orchestrator.get_status(account_id).await {
                Ok(report) if report.healthy => (TargetOutcome::Sent, "healthy".to_string()),
                Ok(report) => (
                    TargetOutcome::Failed,
                    format!(
                        "status {} (errors {})",
                        report.account.status.as_str(),
                        report.account.health.consecutive_errors
                    ),
                ),
                Err(e) => (TargetOutcome::Failed, e.to_string()),
            };

            let (completed, failed) = match outcome {
                TargetOutcome::Sent => (1, 0),
                _ => (0, 1),
            };
            ctx.store.append_target_result(
                &job.task_id,
                &TargetResult {
                    target: account_id.clone(),
                    account_id: account_id.clone(),
                    outcome,
                    detail: Some(detail),
                    at: Utc::now(),
                },
            )?;
            ctx.store
                .incr_task_progress(&job.task_id, completed, failed)?;
        }

        Ok(())
    }
}
