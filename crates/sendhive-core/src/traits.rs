//! Trait seams for the external collaborators the core is built against:
//! the container/process runtime and the per-platform send primitive.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Account, Platform, RuntimeHandle, RuntimeInspection, RuntimeSpec, SendReceipt};

/// Isolated execution environments, one per account.
///
/// Implementations must surface "runtime unreachable" as
/// `RuntimeStatus::Unknown` from `inspect`, distinct from a stopped
/// environment.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Allocate an environment for the spec. Does not start it.
    async fn create(&self, spec: &RuntimeSpec) -> Result<RuntimeHandle>;

    /// Start a created environment.
    async fn start(&self, handle: &RuntimeHandle) -> Result<()>;

    /// Stop a running environment. Safe to call when already stopped.
    async fn stop(&self, handle: &RuntimeHandle) -> Result<()>;

    /// Remove the environment and its resources.
    async fn remove(&self, handle: &RuntimeHandle) -> Result<()>;

    /// Query the live state of the environment.
    async fn inspect(&self, handle: &RuntimeHandle) -> Result<RuntimeInspection>;
}

/// Platform send primitive — one message to one target through one
/// account's running instance. Opaque to the core: any failure surfaces as
/// `SendHiveError::Send`.
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn platform(&self) -> Platform;

    async fn send(&self, account: &Account, target: &str, content: &str) -> Result<SendReceipt>;
}
