//! Account Orchestrator — the facade route handlers call into.
//!
//! Wraps provisioning, the registry, the health monitor, and the command
//! channel with durable-state bookkeeping. Every runtime-handle mutation in
//! the system goes through here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sendhive_core::config::SendHiveConfig;
use sendhive_core::error::{Result, SendHiveError};
use sendhive_core::traits::ContainerRuntime;
use sendhive_core::types::{
    Account, AccountConfig, AccountConfigPatch, AccountStatus, CommandEnvelope, Platform,
    RuntimeDescriptor, RuntimeStatus,
};
use sendhive_store::StoreDb;
use serde::Serialize;

use crate::commands::CommandChannel;
use crate::monitor::HealthMonitor;
use crate::provisioner::Provisioner;
use crate::registry::InstanceRegistry;

/// Read-only status aggregation for one account.
#[derive(Debug, Clone, Serialize)]
pub struct AccountStatusReport {
    pub account: Account,
    /// Live process-level state, `None` when no instance is registered.
    pub runtime_status: Option<RuntimeStatus>,
    pub healthy: bool,
}

/// Fleet-wide health aggregation.
#[derive(Debug, Clone, Serialize)]
pub struct FleetHealth {
    pub total: usize,
    pub connected: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub stopped: usize,
    pub reports: Vec<AccountStatusReport>,
}

pub struct AccountOrchestrator {
    store: Arc<StoreDb>,
    registry: Arc<InstanceRegistry>,
    provisioner: Provisioner,
    monitor: HealthMonitor,
    commands: Arc<CommandChannel>,
    settle_delay: Duration,
    error_threshold: u32,
}

impl AccountOrchestrator {
    pub fn new(
        store: Arc<StoreDb>,
        runtime: Arc<dyn ContainerRuntime>,
        config: &SendHiveConfig,
    ) -> Self {
        let registry = Arc::new(InstanceRegistry::new());
        let provisioner = Provisioner::new(
            runtime.clone(),
            registry.clone(),
            &config.runtime.callback_url,
        );
        let monitor = HealthMonitor::new(
            registry.clone(),
            store.clone(),
            runtime,
            Duration::from_secs(config.monitor.poll_interval_secs),
            Duration::from_secs(config.monitor.inspect_timeout_secs),
            config.monitor.error_threshold,
        );
        Self {
            store,
            registry,
            provisioner,
            monitor,
            commands: Arc::new(CommandChannel::new()),
            settle_delay: Duration::from_millis(config.runtime.settle_delay_ms),
            error_threshold: config.monitor.error_threshold,
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn commands(&self) -> &Arc<CommandChannel> {
        &self.commands
    }

    fn require_account(&self, id: &str) -> Result<Account> {
        self.store
            .get_account(id)?
            .ok_or_else(|| SendHiveError::AccountNotFound(id.to_string()))
    }

    /// Persist a new account in `pending`. Does not provision a runtime.
    pub fn create_account(
        &self,
        owner_id: &str,
        platform: Platform,
        config: AccountConfig,
    ) -> Result<Account> {
        if owner_id.trim().is_empty() {
            return Err(SendHiveError::Config("owner_id must not be empty".into()));
        }
        let account = Account::new(owner_id, platform, config);
        self.store.insert_account(&account)?;
        tracing::info!(
            "📇 Account created: {} ({}, owner={})",
            account.id,
            platform.as_str(),
            owner_id
        );
        Ok(account)
    }

    /// Provision and start the account's instance, transition the durable
    /// status, and begin health monitoring.
    ///
    /// Calling twice without an intervening stop returns the existing
    /// runtime descriptor and creates no second environment.
    pub async fn start_account(&self, id: &str) -> Result<RuntimeDescriptor> {
        let account = self.require_account(id)?;

        if let Some(handle) = self.registry.get_handle(id).await {
            tracing::debug!("start_account({id}): already registered, returning existing handle");
            return Ok(account
                .runtime
                .filter(|d| d.handle_id == handle.id)
                .unwrap_or(RuntimeDescriptor {
                    handle_id: handle.id,
                    port: handle.port,
                    created_at: Utc::now(),
                }));
        }

        if account.status == AccountStatus::Banned {
            return Err(SendHiveError::AccountUnhealthy(format!(
                "account {id} is banned"
            )));
        }
        // re-provisioning from a crashed provisioning attempt is allowed
        if account.status != AccountStatus::Provisioning
            && !account.status.can_transition(AccountStatus::Provisioning)
        {
            return Err(SendHiveError::AccountUnhealthy(format!(
                "account {id} cannot start from status {}",
                account.status.as_str()
            )));
        }
        if !account.config.enabled {
            return Err(SendHiveError::AccountUnhealthy(format!(
                "account {id} is disabled"
            )));
        }

        let handle = match self.provisioner.provision(&account).await {
            Ok(handle) => handle,
            Err(e) => {
                // unrecoverable provisioning failure: error, not stopped
                self.store.update_account_status(id, AccountStatus::Error)?;
                return Err(e);
            }
        };

        if !self
            .store
            .update_account_status_if(id, account.status, AccountStatus::Provisioning)?
        {
            tracing::warn!(
                "start_account({id}): status changed underneath us (was {})",
                account.status.as_str()
            );
        }

        let descriptor = RuntimeDescriptor {
            handle_id: handle.id.clone(),
            port: handle.port,
            created_at: Utc::now(),
        };
        self.store.set_account_runtime(id, Some(&descriptor))?;

        let monitor_handle = self.monitor.spawn_for(id);
        self.registry.attach_monitor(id, monitor_handle).await;

        tracing::info!("▶️ Account {id} starting (port={})", descriptor.port);
        Ok(descriptor)
    }

    /// Terminate the instance (idempotent), stop its monitor loop, and mark
    /// the account `stopped`.
    pub async fn stop_account(&self, id: &str) -> Result<()> {
        self.require_account(id)?;
        self.provisioner.terminate(id).await?;

        for from in [
            AccountStatus::Connected,
            AccountStatus::Provisioning,
            AccountStatus::Degraded,
        ] {
            if self
                .store
                .update_account_status_if(id, from, AccountStatus::Stopped)?
            {
                break;
            }
        }
        self.store.set_account_runtime(id, None)?;
        self.store.clear_account_errors(id)?;
        tracing::info!("⏹ Account {id} stopped");
        Ok(())
    }

    /// Stop, settle, start. A start failure after a successful stop leaves
    /// the account in `error` — never silently back at `stopped`.
    pub async fn restart_account(&self, id: &str) -> Result<RuntimeDescriptor> {
        self.stop_account(id).await?;
        tokio::time::sleep(self.settle_delay).await;

        match self.start_account(id).await {
            Ok(descriptor) => Ok(descriptor),
            Err(e) => {
                self.store.update_account_status(id, AccountStatus::Error)?;
                tracing::error!("Restart of {id} failed after stop: {e}");
                Err(e)
            }
        }
    }

    /// Merge a config patch durably; if an instance is live, push the new
    /// config over the command channel (best-effort, may be lost).
    pub async fn update_config(&self, id: &str, patch: &AccountConfigPatch) -> Result<Account> {
        let account = self.require_account(id)?;
        let merged = account.config.merged(patch);
        self.store.update_account_config(id, &merged)?;

        if self.registry.contains(id).await {
            let payload = serde_json::to_value(&merged)
                .map_err(|e| SendHiveError::Config(format!("serialize config: {e}")))?;
            let reached = self
                .commands
                .publish(id, CommandEnvelope::new("update_config", payload));
            tracing::debug!("Config push for {id} reached {reached} subscriber(s)");
        }

        self.require_account(id)
    }

    /// Stop, then purge the durable record and all cached state. Safe on an
    /// already-stopped account.
    pub async fn delete_account(&self, id: &str) -> Result<()> {
        self.require_account(id)?;
        self.provisioner.terminate(id).await?;
        self.commands.drop_topic(id);
        self.store.delete_account(id)?;
        tracing::info!("🗑 Account {id} deleted");
        Ok(())
    }

    /// Heartbeat push from the instance itself (via the HTTP layer).
    ///
    /// The first heartbeat is the "instance reports ready" signal that
    /// completes `provisioning → connected`; one also recovers a degraded
    /// account.
    pub fn record_heartbeat(&self, id: &str) -> Result<()> {
        self.require_account(id)?;
        self.store.record_heartbeat(id, Utc::now())?;
        self.store
            .update_account_status_if(id, AccountStatus::Provisioning, AccountStatus::Connected)?;
        self.store
            .update_account_status_if(id, AccountStatus::Degraded, AccountStatus::Connected)?;
        Ok(())
    }

    /// External platform-rejection signal. Terminal: the orchestrator never
    /// sets this on its own.
    pub async fn mark_banned(&self, id: &str) -> Result<()> {
        self.require_account(id)?;
        self.provisioner.terminate(id).await?;
        self.store.update_account_status(id, AccountStatus::Banned)?;
        self.store.set_account_runtime(id, None)?;
        tracing::warn!("🚫 Account {id} banned by platform signal");
        Ok(())
    }

    /// Read-only status for one account: durable record + live inspection.
    /// Never mutates state.
    pub async fn get_status(&self, id: &str) -> Result<AccountStatusReport> {
        let account = self.require_account(id)?;
        let runtime_status = if self.registry.contains(id).await {
            Some(self.provisioner.inspect_status(id).await)
        } else {
            None
        };
        let healthy = account.is_healthy(self.error_threshold, Utc::now());
        Ok(AccountStatusReport {
            account,
            runtime_status,
            healthy,
        })
    }

    /// Fleet-wide read-only health aggregation.
    pub async fn health_check(&self) -> Result<FleetHealth> {
        let accounts = self.store.list_accounts()?;
        let reports: Vec<AccountStatusReport> = futures::future::join_all(
            accounts.iter().map(|account| self.get_status(&account.id)),
        )
        .await
        .into_iter()
        .filter_map(|r| r.ok())
        .collect();

        Ok(FleetHealth {
            total: reports.len(),
            connected: reports
                .iter()
                .filter(|r| r.account.status == AccountStatus::Connected)
                .count(),
            healthy: reports.iter().filter(|r| r.healthy).count(),
            degraded: reports
                .iter()
                .filter(|r| r.account.status == AccountStatus::Degraded)
                .count(),
            stopped: reports
                .iter()
                .filter(|r| r.account.status == AccountStatus::Stopped)
                .count(),
            reports,
        })
    }

    /// Rebuild the registry cache after a process restart: accounts whose
    /// durable record says they were live get restarted (when
    /// auto-reconnect allows) or marked stopped. The cache itself is never
    /// trusted — only the store plus live inspection.
    pub async fn readopt_accounts(&self) -> Result<usize> {
        let live = self.store.list_accounts_by_status(&[
            AccountStatus::Provisioning,
            AccountStatus::Connected,
            AccountStatus::Degraded,
        ])?;
        let mut readopted = 0;
        for account in live {
            if account.config.enabled && account.config.auto_reconnect {
                match self.start_account(&account.id).await {
                    Ok(_) => readopted += 1,
                    Err(e) => {
                        tracing::warn!("Re-adopt of {} failed: {e}", account.id);
                    }
                }
            } else {
                self.store
                    .update_account_status(&account.id, AccountStatus::Stopped)?;
                self.store.set_account_runtime(&account.id, None)?;
            }
        }
        Ok(readopted)
    }
}
