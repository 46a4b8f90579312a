//! Allocates and tears down isolated environments, one per account.
//!
//! The provisioner is the only component that talks to the container
//! runtime for lifecycle changes; the registry entry it creates is what
//! makes `start` idempotent.

use std::collections::BTreeMap;
use std::sync::Arc;

use sendhive_core::error::{Result, SendHiveError};
use sendhive_core::traits::ContainerRuntime;
use sendhive_core::types::{Account, RuntimeHandle, RuntimeSpec, RuntimeStatus};

use crate::registry::InstanceRegistry;

pub struct Provisioner {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<InstanceRegistry>,
    callback_url: String,
}

impl Provisioner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<InstanceRegistry>,
        callback_url: &str,
    ) -> Self {
        Self {
            runtime,
            registry,
            callback_url: callback_url.to_string(),
        }
    }

    fn spec_for(&self, account: &Account) -> RuntimeSpec {
        let mut env = BTreeMap::new();
        env.insert("SENDHIVE_OWNER_ID".to_string(), account.owner_id.clone());
        env.insert(
            "SENDHIVE_CALLBACK_URL".to_string(),
            self.callback_url.clone(),
        );
        env.insert(
            "SENDHIVE_AUTO_RECONNECT".to_string(),
            account.config.auto_reconnect.to_string(),
        );
        for (key, value) in &account.config.behavior {
            env.insert(format!("SENDHIVE_BEHAVIOR_{}", key.to_uppercase()), value.to_string());
        }
        RuntimeSpec {
            account_id: account.id.clone(),
            platform: account.platform,
            env,
        }
    }

    /// Allocate and start an environment for the account.
    ///
    /// Idempotent per account id: a live registry entry short-circuits to
    /// the existing handle instead of creating a duplicate environment.
    pub async fn provision(&self, account: &Account) -> Result<RuntimeHandle> {
        if let Some(existing) = self.registry.get_handle(&account.id).await {
            tracing::debug!(
                "Instance for {} already registered (handle={})",
                account.id,
                existing.id
            );
            return Ok(existing);
        }

        let spec = self.spec_for(account);
        let handle = self
            .runtime
            .create(&spec)
            .await
            .map_err(|e| SendHiveError::provision(format!("{}: {e}", account.id)))?;

        if let Err(e) = self.runtime.start(&handle).await {
            // don't leak a created-but-dead environment
            self.runtime.remove(&handle).await.ok();
            return Err(SendHiveError::provision(format!("{}: {e}", account.id)));
        }

        self.registry.insert(&account.id, handle.clone()).await;
        tracing::info!(
            "🧩 Provisioned instance for {} (handle={}, port={})",
            account.id,
            handle.id,
            handle.port
        );
        Ok(handle)
    }

    /// Stop and fully remove the environment. Safe when nothing is
    /// registered — a no-op, not an error.
    pub async fn terminate(&self, account_id: &str) -> Result<()> {
        let Some(handle) = self.registry.remove(account_id).await else {
            return Ok(());
        };
        self.runtime.stop(&handle).await.ok();
        self.runtime.remove(&handle).await.ok();
        tracing::info!("🗑 Terminated instance for {}", account_id);
        Ok(())
    }

    /// Live process-level state for the account's environment.
    pub async fn inspect_status(&self, account_id: &str) -> RuntimeStatus {
        let Some(handle) = self.registry.get_handle(account_id).await else {
            return RuntimeStatus::Exited;
        };
        match self.runtime.inspect(&handle).await {
            Ok(inspection) => inspection.status,
            Err(_) => RuntimeStatus::Unknown,
        }
    }
}
