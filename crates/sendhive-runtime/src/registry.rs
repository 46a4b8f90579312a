//! In-memory map of account id → live runtime handle.
//!
//! Pure bookkeeping, no external calls. One registry instance is shared by
//! reference through the orchestrator — all mutation goes through it, and
//! task processors only ever read.

use std::collections::HashMap;

use sendhive_core::types::{RuntimeHandle, RuntimeStatus};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// One live instance as the registry sees it.
pub struct InstanceRecord {
    pub account_id: String,
    pub handle: RuntimeHandle,
    pub last_status: RuntimeStatus,
    /// Monitor loop for this instance; aborted when the record is removed.
    monitor: Option<JoinHandle<()>>,
}

/// Concurrency-safe owner of all runtime-handle state.
#[derive(Default)]
pub struct InstanceRegistry {
    inner: RwLock<HashMap<String, InstanceRecord>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly provisioned instance.
    pub async fn insert(&self, account_id: &str, handle: RuntimeHandle) {
        let mut inner = self.inner.write().await;
        inner.insert(
            account_id.to_string(),
            InstanceRecord {
                account_id: account_id.to_string(),
                handle,
                last_status: RuntimeStatus::Starting,
                monitor: None,
            },
        );
    }

    /// Attach the monitor loop handle to an existing record.
    pub async fn attach_monitor(&self, account_id: &str, monitor: JoinHandle<()>) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.get_mut(account_id) {
            // replace never leaks: abort any previous loop first
            if let Some(old) = record.monitor.take() {
                old.abort();
            }
            record.monitor = Some(monitor);
        } else {
            // record vanished between provision and attach; don't orphan
            monitor.abort();
        }
    }

    /// Look up the runtime handle for an account.
    pub async fn get_handle(&self, account_id: &str) -> Option<RuntimeHandle> {
        let inner = self.inner.read().await;
        inner.get(account_id).map(|r| r.handle.clone())
    }

    pub async fn contains(&self, account_id: &str) -> bool {
        let inner = self.inner.read().await;
        inner.contains_key(account_id)
    }

    /// Record the last status observed by the monitor.
    pub async fn set_status(&self, account_id: &str, status: RuntimeStatus) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.get_mut(account_id) {
            record.last_status = status;
        }
    }

    pub async fn last_status(&self, account_id: &str) -> Option<RuntimeStatus> {
        let inner = self.inner.read().await;
        inner.get(account_id).map(|r| r.last_status)
    }

    /// Remove the record and abort its monitor loop, returning the handle
    /// so the caller can tear the environment down. No-op when absent.
    ///
    /// A monitor loop removing its own record must finish its store writes
    /// BEFORE calling this — the abort lands at its next await point.
    pub async fn remove(&self, account_id: &str) -> Option<RuntimeHandle> {
        let mut inner = self.inner.write().await;
        inner.remove(account_id).map(|record| {
            if let Some(monitor) = record.monitor {
                monitor.abort();
            }
            record.handle
        })
    }

    /// Account ids of every registered instance.
    pub async fn account_ids(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        let inner = self.inner.read().await;
        inner.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
