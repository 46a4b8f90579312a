//! SendHive error taxonomy.
//!
//! One enum for the whole workspace — route handlers and callers above the
//! facade boundary only ever see these variants, never raw runtime/broker
//! errors.

use thiserror::Error;

/// Workspace-wide result alias.
pub type Result<T> = std::result::Result<T, SendHiveError>;

/// All error kinds surfaced by the orchestrator and scheduler facades.
#[derive(Debug, Error)]
pub enum SendHiveError {
    /// No durable account record with the given id.
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// The runtime could not create or start an isolated environment.
    #[error("provisioning failed: {0}")]
    Provision(String),

    /// The operation requires a connected, healthy instance.
    #[error("account unhealthy: {0}")]
    AccountUnhealthy(String),

    /// Malformed cron expression or delay descriptor.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No durable task record with the given id.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Per-target send-rate limit hit (non-fatal, recorded per target).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Send primitive failed (non-fatal per target, retried at job level).
    #[error("send failed: {0}")]
    Send(String),

    /// Queue/pub-sub infrastructure is down — fatal for the operation.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// Configuration could not be read, parsed, or validated.
    #[error("config error: {0}")]
    Config(String),

    /// Durable store failure.
    #[error("store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SendHiveError {
    /// Shorthand for a provisioning failure with a formatted cause.
    pub fn provision(msg: impl Into<String>) -> Self {
        Self::Provision(msg.into())
    }

    /// Shorthand for a store failure with a formatted cause.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}
