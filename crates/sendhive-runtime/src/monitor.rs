//! Health monitor — one cancellable polling loop per live instance.
//!
//! Process liveness is polled; application liveness arrives as pushed
//! heartbeats (see `AccountOrchestrator::record_heartbeat`). Both signals
//! are needed: a process can be running at the OS level while its session
//! logic is wedged.

use std::sync::Arc;
use std::time::Duration;

use sendhive_core::traits::ContainerRuntime;
use sendhive_core::types::{AccountStatus, ConnectionQuality, RuntimeStatus};
use sendhive_store::StoreDb;
use tokio::task::JoinHandle;

use crate::registry::InstanceRegistry;

#[derive(Clone)]
pub struct HealthMonitor {
    registry: Arc<InstanceRegistry>,
    store: Arc<StoreDb>,
    runtime: Arc<dyn ContainerRuntime>,
    poll_interval: Duration,
    inspect_timeout: Duration,
    error_threshold: u32,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        store: Arc<StoreDb>,
        runtime: Arc<dyn ContainerRuntime>,
        poll_interval: Duration,
        inspect_timeout: Duration,
        error_threshold: u32,
    ) -> Self {
        Self {
            registry,
            store,
            runtime,
            poll_interval,
            inspect_timeout,
            error_threshold,
        }
    }

    /// Spawn the polling loop for one account. The returned handle is
    /// attached to the registry record so teardown always cleans it up.
    pub fn spawn_for(&self, account_id: &str) -> JoinHandle<()> {
        let monitor = self.clone();
        let account_id = account_id.to_string();
        tokio::spawn(async move {
            monitor.run(&account_id).await;
        })
    }

    async fn run(&self, account_id: &str) {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;

            let Some(handle) = self.registry.get_handle(account_id).await else {
                break; // deregistered elsewhere
            };

            let status = match tokio::time::timeout(
                self.inspect_timeout,
                self.runtime.inspect(&handle),
            )
            .await
            {
                Ok(Ok(inspection)) => inspection.status,
                Ok(Err(e)) => {
                    tracing::warn!("Inspect failed for {}: {e}", account_id);
                    RuntimeStatus::Unknown
                }
                Err(_) => {
                    tracing::warn!(
                        "Inspect timed out for {} after {:?}",
                        account_id,
                        self.inspect_timeout
                    );
                    RuntimeStatus::Unknown
                }
            };

            if status.is_gone() {
                tracing::warn!("💀 Instance for {} is {}; evicting", account_id, status.as_str());
                self.mark_stopped(account_id, status);
                // durable writes done; removing our record aborts this loop
                self.registry.remove(account_id).await;
                break;
            }

            if status == RuntimeStatus::Unknown {
                self.record_unreachable(account_id);
            } else if let Err(e) = self.store.set_observed_runtime(account_id, status) {
                tracing::warn!("⚠️ Failed to persist observed status for {}: {e}", account_id);
            }
            self.registry.set_status(account_id, status).await;
        }
        tracing::debug!("Monitor loop for {} ended", account_id);
    }

    fn mark_stopped(&self, account_id: &str, observed: RuntimeStatus) {
        self.store.set_observed_runtime(account_id, observed).ok();
        self.store.set_account_runtime(account_id, None).ok();
        for from in [
            AccountStatus::Connected,
            AccountStatus::Provisioning,
            AccountStatus::Degraded,
        ] {
            match self
                .store
                .update_account_status_if(account_id, from, AccountStatus::Stopped)
            {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("⚠️ Failed to mark {} stopped: {e}", account_id);
                    break;
                }
            }
        }
    }

    fn record_unreachable(&self, account_id: &str) {
        match self.store.bump_consecutive_errors(account_id) {
            Ok(errors) if errors >= self.error_threshold => {
                self.store
                    .set_account_quality(account_id, ConnectionQuality::Poor)
                    .ok();
                if let Ok(true) = self.store.update_account_status_if(
                    account_id,
                    AccountStatus::Connected,
                    AccountStatus::Degraded,
                ) {
                    tracing::warn!(
                        "Account {} degraded after {} consecutive errors",
                        account_id,
                        errors
                    );
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("⚠️ Failed to bump error count for {}: {e}", account_id),
        }
    }
}
