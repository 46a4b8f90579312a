//! # SendHive Runtime
//!
//! Lifecycle, health, and command dispatch for per-account runtime
//! processes:
//!
//! ```text
//! AccountOrchestrator (facade)
//!   ├── Provisioner ──→ ContainerRuntime (ProcessRuntime in production)
//!   ├── InstanceRegistry — in-memory handle cache, single writer
//!   ├── HealthMonitor — one cancellable poll loop per live instance
//!   └── CommandChannel — best-effort config pushes, at-most-once
//! ```
//!
//! The registry is an optimization over the durable store, rebuilt from
//! the store plus live inspection after a restart — never the source of
//! truth for business decisions.

pub mod commands;
pub mod monitor;
pub mod orchestrator;
pub mod process;
pub mod provisioner;
pub mod registry;

#[cfg(test)]
pub(crate) mod testutil;

pub use commands::CommandChannel;
pub use monitor::HealthMonitor;
pub use orchestrator::{AccountOrchestrator, AccountStatusReport, FleetHealth};
pub use process::ProcessRuntime;
pub use provisioner::Provisioner;
pub use registry::InstanceRegistry;
