//! In-memory `ContainerRuntime` used by unit tests across this crate.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sendhive_core::error::{Result, SendHiveError};
use sendhive_core::traits::ContainerRuntime;
use sendhive_core::types::{
    RuntimeHandle, RuntimeInspection, RuntimeSpec, RuntimeStatus,
};

#[derive(Default)]
pub struct MockRuntime {
    next_port: AtomicU16,
    pub fail_create: AtomicBool,
    pub fail_start: AtomicBool,
    /// Artificial inspect latency, for timeout tests.
    pub inspect_delay: Mutex<Option<Duration>>,
    pub created: Mutex<Vec<RuntimeSpec>>,
    statuses: Mutex<HashMap<String, RuntimeStatus>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            next_port: AtomicU16::new(10101),
            ..Default::default()
        }
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    /// Simulate the environment dying underneath us.
    pub fn set_status(&self, handle_id: &str, status: RuntimeStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(handle_id.to_string(), status);
    }

    pub fn set_inspect_delay(&self, delay: Duration) {
        *self.inspect_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create(&self, spec: &RuntimeSpec) -> Result<RuntimeHandle> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(SendHiveError::provision("mock create failure"));
        }
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        let handle = RuntimeHandle {
            id: format!("mock-{}", spec.account_id),
            port,
        };
        self.created.lock().unwrap().push(spec.clone());
        self.statuses
            .lock()
            .unwrap()
            .insert(handle.id.clone(), RuntimeStatus::Starting);
        Ok(handle)
    }

    async fn start(&self, handle: &RuntimeHandle) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(SendHiveError::provision("mock start failure"));
        }
        self.statuses
            .lock()
            .unwrap()
            .insert(handle.id.clone(), RuntimeStatus::Running);
        Ok(())
    }

    async fn stop(&self, handle: &RuntimeHandle) -> Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .insert(handle.id.clone(), RuntimeStatus::Exited);
        Ok(())
    }

    async fn remove(&self, handle: &RuntimeHandle) -> Result<()> {
        self.statuses.lock().unwrap().remove(&handle.id);
        Ok(())
    }

    async fn inspect(&self, handle: &RuntimeHandle) -> Result<RuntimeInspection> {
        let delay = *self.inspect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let status = self
            .statuses
            .lock()
            .unwrap()
            .get(&handle.id)
            .copied()
            .unwrap_or(RuntimeStatus::Dead);
        Ok(RuntimeInspection {
            status,
            port: status.is_live().then_some(handle.port),
        })
    }
}
