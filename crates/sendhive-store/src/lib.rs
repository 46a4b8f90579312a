//! Durable store for Account and Task records.
//!
//! SQLite behind a mutex, WAL mode for concurrent reads. The store is the
//! system of record; every in-memory cache above it is rebuildable. Status
//! transitions use conditional writes (`... AND status = ?`) so concurrent
//! writers cannot lose updates, and progress counters are incremented in
//! SQL rather than read-modify-write.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use sendhive_core::error::{Result, SendHiveError};

mod accounts;
mod tasks;

/// SQLite-backed store for all durable SendHive state.
pub struct StoreDb {
    conn: Mutex<Connection>,
}

impl StoreDb {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| SendHiveError::store(format!("DB open: {e}")))?;

        // WAL for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SendHiveError::store(format!("DB open: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SendHiveError::store(format!("Lock: {e}")))
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                config_json TEXT NOT NULL DEFAULT '{}',
                last_heartbeat TEXT,
                consecutive_errors INTEGER NOT NULL DEFAULT 0,
                quality TEXT NOT NULL DEFAULT 'good',
                observed_runtime TEXT,
                runtime_json TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                task_type TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                config_json TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'pending',
                progress_completed INTEGER NOT NULL DEFAULT 0,
                progress_failed INTEGER NOT NULL DEFAULT 0,
                progress_total INTEGER NOT NULL DEFAULT 0,
                queued_at TEXT,
                started_at TEXT,
                finished_at TEXT,
                error TEXT,
                created_at TEXT NOT NULL
            );

            -- Per-target outcome rows; appending is a plain INSERT so
            -- concurrent processors never clobber each other's results.
            CREATE TABLE IF NOT EXISTS task_results (
                task_id TEXT NOT NULL,
                target TEXT NOT NULL,
                account_id TEXT NOT NULL,
                outcome TEXT NOT NULL,
                detail TEXT,
                at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_task_results_task
                ON task_results(task_id);
            ",
        )
        .map_err(|e| SendHiveError::store(format!("Migration: {e}")))?;
        Ok(())
    }
}

pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn parse_ts(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
