//! Child-process implementation of `ContainerRuntime`.
//!
//! One instance binary per account, launched with a generated config file.
//! The config is ALWAYS regenerated from the durable record on start — the
//! store is the source of truth, not whatever the last run left on disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use async_trait::async_trait;
use sendhive_core::error::{Result, SendHiveError};
use sendhive_core::traits::ContainerRuntime;
use sendhive_core::types::{
    RuntimeHandle, RuntimeInspection, RuntimeSpec, RuntimeStatus,
};

struct Prepared {
    account_id: String,
    port: u16,
    config_path: PathBuf,
    env: Vec<(String, String)>,
}

#[derive(Default)]
struct ProcState {
    /// Created but not yet started, by handle id.
    pending: HashMap<String, Prepared>,
    /// Started children, by handle id.
    children: HashMap<String, Child>,
    /// Ports in use, by handle id (pending and started).
    ports: HashMap<String, u16>,
}

/// Process-per-account runtime.
pub struct ProcessRuntime {
    instance_bin: String,
    data_dir: PathBuf,
    base_port: u16,
    state: Mutex<ProcState>,
}

impl ProcessRuntime {
    pub fn new(instance_bin: &str, data_dir: impl Into<PathBuf>, base_port: u16) -> Self {
        Self {
            instance_bin: instance_bin.to_string(),
            data_dir: data_dir.into(),
            base_port,
            state: Mutex::new(ProcState::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ProcState>> {
        self.state
            .lock()
            .map_err(|e| SendHiveError::provision(format!("runtime state lock: {e}")))
    }

    fn next_port(state: &ProcState, base: u16) -> u16 {
        let mut port = base;
        while state.ports.values().any(|p| *p == port) {
            port += 1;
        }
        port
    }

    fn render_config(spec: &RuntimeSpec, port: u16) -> String {
        let mut content = format!(
            r#"account_id = "{}"
platform = "{}"
port = {}
"#,
            spec.account_id,
            spec.platform.as_str(),
            port
        );
        if !spec.env.is_empty() {
            content.push_str("\n[env]\n");
            for (key, value) in &spec.env {
                content.push_str(&format!("{key} = \"{value}\"\n"));
            }
        }
        content
    }
}

#[async_trait]
impl ContainerRuntime for ProcessRuntime {
    async fn create(&self, spec: &RuntimeSpec) -> Result<RuntimeHandle> {
        let instance_dir = self.data_dir.join(&spec.account_id);
        std::fs::create_dir_all(&instance_dir)
            .map_err(|e| SendHiveError::provision(format!("instance dir: {e}")))?;

        let config_path = instance_dir.join("instance.toml");
        let mut state = self.lock()?;
        let port = Self::next_port(&state, self.base_port);

        std::fs::write(&config_path, Self::render_config(spec, port))
            .map_err(|e| SendHiveError::provision(format!("write instance config: {e}")))?;

        let handle = RuntimeHandle {
            id: format!("proc-{}", uuid::Uuid::new_v4()),
            port,
        };
        state.ports.insert(handle.id.clone(), port);
        state.pending.insert(
            handle.id.clone(),
            Prepared {
                account_id: spec.account_id.clone(),
                port,
                config_path,
                env: spec.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            },
        );
        tracing::debug!(
            "Prepared instance env for {} (handle={}, port={})",
            spec.account_id,
            handle.id,
            port
        );
        Ok(handle)
    }

    async fn start(&self, handle: &RuntimeHandle) -> Result<()> {
        let mut state = self.lock()?;
        let Some(prepared) = state.pending.remove(&handle.id) else {
            if state.children.contains_key(&handle.id) {
                return Ok(()); // already started
            }
            return Err(SendHiveError::provision(format!(
                "no prepared environment for handle {}",
                handle.id
            )));
        };

        let mut cmd = Command::new(&self.instance_bin);
        cmd.args(["serve", "--port", &prepared.port.to_string()])
            .env("SENDHIVE_CONFIG", &prepared.config_path)
            .env("SENDHIVE_ACCOUNT_ID", &prepared.account_id)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        for (key, value) in &prepared.env {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|e| {
            // failed start: hand the port back so it isn't leaked
            state.ports.remove(&handle.id);
            SendHiveError::provision(format!("spawn {}: {e}", self.instance_bin))
        })?;

        tracing::info!(
            "🚀 Started instance for {} (pid={}, port={})",
            prepared.account_id,
            child.id(),
            prepared.port
        );
        state.children.insert(handle.id.clone(), child);
        Ok(())
    }

    async fn stop(&self, handle: &RuntimeHandle) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(child) = state.children.get_mut(&handle.id) {
            child.kill().ok();
            child.wait().ok();
            tracing::info!("⏹ Stopped instance (handle={})", handle.id);
        }
        Ok(())
    }

    async fn remove(&self, handle: &RuntimeHandle) -> Result<()> {
        let mut state = self.lock()?;
        state.pending.remove(&handle.id);
        if let Some(mut child) = state.children.remove(&handle.id) {
            // kill again in case stop was skipped
            child.kill().ok();
            child.wait().ok();
        }
        state.ports.remove(&handle.id);
        Ok(())
    }

    async fn inspect(&self, handle: &RuntimeHandle) -> Result<RuntimeInspection> {
        let mut state = self.lock()?;
        if state.pending.contains_key(&handle.id) {
            return Ok(RuntimeInspection {
                status: RuntimeStatus::Starting,
                port: Some(handle.port),
            });
        }
        match state.children.get_mut(&handle.id) {
            Some(child) => match child.try_wait() {
                Ok(None) => Ok(RuntimeInspection {
                    status: RuntimeStatus::Running,
                    port: Some(handle.port),
                }),
                Ok(Some(_)) => Ok(RuntimeInspection {
                    status: RuntimeStatus::Exited,
                    port: None,
                }),
                Err(e) => {
                    tracing::warn!("Instance {} unreachable: {e}", handle.id);
                    Ok(RuntimeInspection {
                        status: RuntimeStatus::Unknown,
                        port: None,
                    })
                }
            },
            None => Ok(RuntimeInspection {
                status: RuntimeStatus::Dead,
                port: None,
            }),
        }
    }
}
