//! Task CRUD, guarded status transitions, and atomic progress counters.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use sendhive_core::error::{Result, SendHiveError};
use sendhive_core::types::{
    TargetOutcome, TargetResult, Task, TaskProgress, TaskStatus, TaskType,
};

use crate::{StoreDb, parse_ts, ts};

const TASK_COLS: &str = "id, task_type, owner_id, config_json, status, progress_completed, \
     progress_failed, progress_total, queued_at, started_at, finished_at, error, created_at";

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let task_type: String = row.get(1)?;
    let config_json: String = row.get(3)?;
    let status: String = row.get(4)?;
    let queued_at: Option<String> = row.get(8)?;
    let started_at: Option<String> = row.get(9)?;
    let finished_at: Option<String> = row.get(10)?;
    let created_at: String = row.get(12)?;

    Ok(Task {
        id: row.get(0)?,
        task_type: TaskType::from_slug(&task_type).unwrap_or(TaskType::BulkMessage),
        owner_id: row.get(2)?,
        config: serde_json::from_str(&config_json).unwrap_or_default(),
        status: TaskStatus::from_slug(&status),
        progress: TaskProgress {
            completed: row.get(5)?,
            failed: row.get(6)?,
            total: row.get(7)?,
        },
        results: Vec::new(), // filled in by the caller
        queued_at: queued_at.as_deref().and_then(parse_ts),
        started_at: started_at.as_deref().and_then(parse_ts),
        finished_at: finished_at.as_deref().and_then(parse_ts),
        error: row.get(11)?,
        created_at: parse_ts(&created_at).unwrap_or_default(),
    })
}

fn status_list(statuses: &[TaskStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

impl StoreDb {
    /// Persist a new task.
    pub fn insert_task(&self, task: &Task) -> Result<()> {
        let conn = self.lock()?;
        let config_json = serde_json::to_string(&task.config)
            .map_err(|e| SendHiveError::store(format!("Serialize task config: {e}")))?;
        conn.execute(
            "INSERT INTO tasks (id, task_type, owner_id, config_json, status, \
             progress_completed, progress_failed, progress_total, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                task.id,
                task.task_type.queue_name(),
                task.owner_id,
                config_json,
                task.status.as_str(),
                task.progress.completed,
                task.progress.failed,
                task.progress.total,
                ts(task.created_at),
            ],
        )
        .map_err(|e| SendHiveError::store(format!("Insert task: {e}")))?;
        Ok(())
    }

    /// Fetch one task with its result list, `None` when absent.
    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let task = {
            let conn = self.lock()?;
            conn.query_row(
                &format!("SELECT {TASK_COLS} FROM tasks WHERE id=?1"),
                params![id],
                row_to_task,
            )
            .optional()
            .map_err(|e| SendHiveError::store(format!("Get task: {e}")))?
        };
        match task {
            Some(mut task) => {
                task.results = self.list_target_results(id)?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// List tasks in one of the given statuses (results not loaded).
    pub fn list_tasks_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TASK_COLS} FROM tasks WHERE status IN ({}) ORDER BY created_at",
                status_list(statuses)
            ))
            .map_err(|e| SendHiveError::store(format!("Prepare: {e}")))?;
        let tasks = stmt
            .query_map([], row_to_task)
            .map_err(|e| SendHiveError::store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tasks)
    }

    /// Conditional transition: applies only when the current status is one
    /// of `from`. Returns whether a row changed.
    pub fn update_task_status_if(
        &self,
        id: &str,
        from: &[TaskStatus],
        to: TaskStatus,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                &format!(
                    "UPDATE tasks SET status=?1 WHERE id=?2 AND status IN ({})",
                    status_list(from)
                ),
                params![to.as_str(), id],
            )
            .map_err(|e| SendHiveError::store(format!("Update task status: {e}")))?;
        Ok(changed > 0)
    }

    /// `pending|queued → queued`, stamping `queued_at`.
    pub fn mark_task_queued(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET status='queued', queued_at=COALESCE(queued_at, ?1) \
                 WHERE id=?2 AND status IN ('pending', 'queued')",
                params![ts(at), id],
            )
            .map_err(|e| SendHiveError::store(format!("Mark queued: {e}")))?;
        Ok(changed > 0)
    }

    /// `queued → running`, stamping `started_at` on the first pickup.
    /// Also succeeds when already running (a retry attempt of the same
    /// task), but never resurrects a terminal or merely-pending task.
    pub fn mark_task_running(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET status='running', started_at=COALESCE(started_at, ?1) \
                 WHERE id=?2 AND status IN ('queued', 'running')",
                params![ts(at), id],
            )
            .map_err(|e| SendHiveError::store(format!("Mark running: {e}")))?;
        Ok(changed > 0)
    }

    /// `running → completed`. A cancelled task stays cancelled.
    pub fn mark_task_completed(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET status='completed', finished_at=?1 \
                 WHERE id=?2 AND status='running'",
                params![ts(Utc::now()), id],
            )
            .map_err(|e| SendHiveError::store(format!("Mark completed: {e}")))?;
        Ok(changed > 0)
    }

    /// Terminal failure with the error attached. No-op on terminal tasks.
    pub fn mark_task_failed(&self, id: &str, error: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET status='failed', error=?1, finished_at=?2 \
                 WHERE id=?3 AND status NOT IN ('completed', 'failed', 'cancelled')",
                params![error, ts(Utc::now()), id],
            )
            .map_err(|e| SendHiveError::store(format!("Mark failed: {e}")))?;
        Ok(changed > 0)
    }

    /// Cancel unless already terminal — safe on a completed task.
    pub fn mark_task_cancelled(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET status='cancelled', finished_at=?1 \
                 WHERE id=?2 AND status NOT IN ('completed', 'failed', 'cancelled')",
                params![ts(Utc::now()), id],
            )
            .map_err(|e| SendHiveError::store(format!("Mark cancelled: {e}")))?;
        Ok(changed > 0)
    }

    /// Set the denominator before a processor starts working through
    /// targets. Existing counters are kept so a redelivered job resumes.
    pub fn set_task_total(&self, id: &str, total: u32) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE tasks SET progress_total=?1 WHERE id=?2",
            params![total, id],
        )
        .map_err(|e| SendHiveError::store(format!("Set total: {e}")))?;
        Ok(())
    }

    /// Zero the counters and set a fresh denominator — each firing of a
    /// recurring task starts a new progress cycle.
    pub fn reset_task_progress(&self, id: &str, total: u32) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE tasks SET progress_completed=0, progress_failed=0, progress_total=?1 \
             WHERE id=?2",
            params![total, id],
        )
        .map_err(|e| SendHiveError::store(format!("Reset progress: {e}")))?;
        Ok(())
    }

    /// Atomic progress increment, guarded so `completed + failed` can never
    /// exceed `total`. Returns false when the guard rejects the update.
    pub fn incr_task_progress(&self, id: &str, completed: u32, failed: u32) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET progress_completed = progress_completed + ?1, \
                 progress_failed = progress_failed + ?2 \
                 WHERE id=?3 AND progress_completed + progress_failed + ?1 + ?2 <= progress_total",
                params![completed, failed, id],
            )
            .map_err(|e| SendHiveError::store(format!("Incr progress: {e}")))?;
        Ok(changed > 0)
    }

    /// Append one per-target outcome row.
    pub fn append_target_result(&self, task_id: &str, result: &TargetResult) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO task_results (task_id, target, account_id, outcome, detail, at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                task_id,
                result.target,
                result.account_id,
                result.outcome.as_str(),
                result.detail,
                ts(result.at),
            ],
        )
        .map_err(|e| SendHiveError::store(format!("Append result: {e}")))?;
        Ok(())
    }

    /// Result rows for one task, in insertion order.
    pub fn list_target_results(&self, task_id: &str) -> Result<Vec<TargetResult>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT target, account_id, outcome, detail, at FROM task_results \
                 WHERE task_id=?1 ORDER BY rowid",
            )
            .map_err(|e| SendHiveError::store(format!("Prepare: {e}")))?;
        let results = stmt
            .query_map(params![task_id], |row| {
                let outcome: String = row.get(2)?;
                let at: String = row.get(4)?;
                Ok(TargetResult {
                    target: row.get(0)?,
                    account_id: row.get(1)?,
                    outcome: TargetOutcome::from_slug(&outcome),
                    detail: row.get(3)?,
                    at: parse_ts(&at).unwrap_or_default(),
                })
            })
            .map_err(|e| SendHiveError::store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(results)
    }

    /// Purge a task and its results.
    pub fn delete_task(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM tasks WHERE id=?1", params![id])
            .map_err(|e| SendHiveError::store(format!("Delete task: {e}")))?;
        conn.execute("DELETE FROM task_results WHERE task_id=?1", params![id])
            .map_err(|e| SendHiveError::store(format!("Delete results: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sendhive_core::types::TaskConfig;

    fn sample_task() -> Task {
        Task::new(
            "owner-1",
            TaskType::BulkMessage,
            TaskConfig {
                targets: vec!["t1".into(), "t2".into()],
                content: "hello".into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_task_lifecycle_transitions() {
        let db = StoreDb::in_memory().unwrap();
        let task = sample_task();
        db.insert_task(&task).unwrap();

        assert!(db.mark_task_queued(&task.id, Utc::now()).unwrap());
        assert!(db.mark_task_running(&task.id, Utc::now()).unwrap());
        // a retry attempt may re-mark a running task
        assert!(db.mark_task_running(&task.id, Utc::now()).unwrap());
        assert!(db.mark_task_completed(&task.id).unwrap());
        // but a terminal task is never picked up again
        assert!(!db.mark_task_running(&task.id, Utc::now()).unwrap());

        let loaded = db.get_task(&task.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert!(loaded.queued_at.is_some());
        assert!(loaded.started_at.is_some());
        assert!(loaded.finished_at.is_some());
    }

    #[test]
    fn test_completed_task_never_cancelled_or_requeued() {
        let db = StoreDb::in_memory().unwrap();
        let task = sample_task();
        db.insert_task(&task).unwrap();
        db.mark_task_queued(&task.id, Utc::now()).unwrap();
        db.mark_task_running(&task.id, Utc::now()).unwrap();
        db.mark_task_completed(&task.id).unwrap();

        assert!(!db.mark_task_cancelled(&task.id).unwrap());
        assert!(!db.mark_task_queued(&task.id, Utc::now()).unwrap());
        let loaded = db.get_task(&task.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
    }

    #[test]
    fn test_cancel_running_task() {
        let db = StoreDb::in_memory().unwrap();
        let task = sample_task();
        db.insert_task(&task).unwrap();
        db.mark_task_queued(&task.id, Utc::now()).unwrap();
        db.mark_task_running(&task.id, Utc::now()).unwrap();

        assert!(db.mark_task_cancelled(&task.id).unwrap());
        // completion after cancellation is rejected
        assert!(!db.mark_task_completed(&task.id).unwrap());
        let loaded = db.get_task(&task.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_progress_guard() {
        let db = StoreDb::in_memory().unwrap();
        let task = sample_task();
        db.insert_task(&task).unwrap();
        db.set_task_total(&task.id, 2).unwrap();

        assert!(db.incr_task_progress(&task.id, 1, 0).unwrap());
        assert!(db.incr_task_progress(&task.id, 0, 1).unwrap());
        // completed + failed == total: further increments are rejected
        assert!(!db.incr_task_progress(&task.id, 1, 0).unwrap());

        let loaded = db.get_task(&task.id).unwrap().unwrap();
        assert_eq!(loaded.progress.completed, 1);
        assert_eq!(loaded.progress.failed, 1);
        assert_eq!(loaded.progress.total, 2);
    }

    #[test]
    fn test_reset_progress_for_new_cycle() {
        let db = StoreDb::in_memory().unwrap();
        let task = sample_task();
        db.insert_task(&task).unwrap();
        db.set_task_total(&task.id, 2).unwrap();
        db.incr_task_progress(&task.id, 1, 1).unwrap();

        db.reset_task_progress(&task.id, 3).unwrap();
        let loaded = db.get_task(&task.id).unwrap().unwrap();
        assert_eq!(loaded.progress.completed, 0);
        assert_eq!(loaded.progress.failed, 0);
        assert_eq!(loaded.progress.total, 3);
        // counters are usable again after the reset
        assert!(db.incr_task_progress(&task.id, 1, 0).unwrap());
    }

    #[test]
    fn test_target_results_ordered() {
        let db = StoreDb::in_memory().unwrap();
        let task = sample_task();
        db.insert_task(&task).unwrap();

        for (i, outcome) in [TargetOutcome::Sent, TargetOutcome::RateLimited]
            .iter()
            .enumerate()
        {
            db.append_target_result(
                &task.id,
                &TargetResult {
                    target: format!("t{i}"),
                    account_id: "acc-1".into(),
                    outcome: *outcome,
                    detail: None,
                    at: Utc::now(),
                },
            )
            .unwrap();
        }

        let loaded = db.get_task(&task.id).unwrap().unwrap();
        assert_eq!(loaded.results.len(), 2);
        assert_eq!(loaded.results[0].target, "t0");
        assert_eq!(loaded.results[1].outcome, TargetOutcome::RateLimited);
    }

    #[test]
    fn test_mark_failed_records_error() {
        let db = StoreDb::in_memory().unwrap();
        let task = sample_task();
        db.insert_task(&task).unwrap();
        db.mark_task_queued(&task.id, Utc::now()).unwrap();

        assert!(db.mark_task_failed(&task.id, "send failed: boom").unwrap());
        let loaded = db.get_task(&task.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("send failed: boom"));
    }
}
