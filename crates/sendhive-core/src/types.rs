//! Account and task data model — the durable records the whole system
//! revolves around, plus the in-memory runtime descriptors.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Heartbeats older than this make an account unhealthy regardless of what
/// the process-level runtime reports.
pub const HEARTBEAT_FRESH_SECS: i64 = 300;

// ── Accounts ───────────────────────────────────────────

/// Messaging platform a single account speaks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Whatsapp,
    Telegram,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Whatsapp => "whatsapp",
            Platform::Telegram => "telegram",
        }
    }

    pub fn from_slug(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "whatsapp" => Some(Platform::Whatsapp),
            "telegram" => Some(Platform::Telegram),
            _ => None,
        }
    }
}

/// Account lifecycle status. Transitions go through `can_transition` only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Pending,
    Provisioning,
    Connected,
    Degraded,
    Stopped,
    Error,
    Banned,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Pending => "pending",
            AccountStatus::Provisioning => "provisioning",
            AccountStatus::Connected => "connected",
            AccountStatus::Degraded => "degraded",
            AccountStatus::Stopped => "stopped",
            AccountStatus::Error => "error",
            AccountStatus::Banned => "banned",
        }
    }

    pub fn from_slug(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "provisioning" => AccountStatus::Provisioning,
            "connected" | "running" => AccountStatus::Connected,
            "degraded" => AccountStatus::Degraded,
            "stopped" | "disconnected" => AccountStatus::Stopped,
            "error" => AccountStatus::Error,
            "banned" => AccountStatus::Banned,
            _ => AccountStatus::Pending,
        }
    }

    /// Whether this status may move to `to`.
    ///
    /// `banned` is terminal. `error` and `banned` are reachable from any
    /// non-terminal state (unrecoverable failure / external platform signal).
    pub fn can_transition(&self, to: AccountStatus) -> bool {
        use AccountStatus::*;
        if *self == Banned {
            return false;
        }
        if to == Error || to == Banned {
            return true;
        }
        matches!(
            (*self, to),
            (Pending, Provisioning)
                | (Provisioning, Connected)
                | (Provisioning, Stopped)
                | (Connected, Provisioning)
                | (Connected, Degraded)
                | (Connected, Stopped)
                | (Degraded, Provisioning)
                | (Degraded, Stopped)
                | (Degraded, Connected)
                | (Stopped, Provisioning)
                | (Error, Provisioning)
        )
    }
}

/// Observed connection quality tier, written by the health monitor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    #[default]
    Good,
    Fair,
    Poor,
}

impl ConnectionQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionQuality::Good => "good",
            ConnectionQuality::Fair => "fair",
            ConnectionQuality::Poor => "poor",
        }
    }

    pub fn from_slug(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "fair" => ConnectionQuality::Fair,
            "poor" => ConnectionQuality::Poor,
            _ => ConnectionQuality::Good,
        }
    }
}

/// Per-account send-rate ceilings (rolling windows).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimits {
    #[serde(default = "default_hourly")]
    pub hourly: u32,
    #[serde(default = "default_daily")]
    pub daily: u32,
}

fn default_hourly() -> u32 {
    30
}
fn default_daily() -> u32 {
    200
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            hourly: default_hourly(),
            daily: default_daily(),
        }
    }
}

/// Durable per-account configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub rate_limits: RateLimits,
    #[serde(default = "bool_true")]
    pub auto_reconnect: bool,
    /// Free-form behavior toggles pushed down to the instance.
    #[serde(default)]
    pub behavior: BTreeMap<String, bool>,
}

fn bool_true() -> bool {
    true
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_limits: RateLimits::default(),
            auto_reconnect: true,
            behavior: BTreeMap::new(),
        }
    }
}

/// Partial config update — `None` fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfigPatch {
    pub enabled: Option<bool>,
    pub rate_limits: Option<RateLimits>,
    pub auto_reconnect: Option<bool>,
    pub behavior: Option<BTreeMap<String, bool>>,
}

impl AccountConfig {
    /// Merge a patch into this config, returning the merged result.
    pub fn merged(&self, patch: &AccountConfigPatch) -> AccountConfig {
        AccountConfig {
            enabled: patch.enabled.unwrap_or(self.enabled),
            rate_limits: patch.rate_limits.unwrap_or(self.rate_limits),
            auto_reconnect: patch.auto_reconnect.unwrap_or(self.auto_reconnect),
            behavior: patch
                .behavior
                .clone()
                .unwrap_or_else(|| self.behavior.clone()),
        }
    }
}

/// Application-level liveness snapshot, written only by the health monitor
/// (and cleared by the orchestrator on explicit stop/delete).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthSnapshot {
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    #[serde(default)]
    pub quality: ConnectionQuality,
}

impl HealthSnapshot {
    /// Heartbeat age in seconds, or `None` when never seen.
    pub fn heartbeat_age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_heartbeat.map(|hb| (now - hb).num_seconds())
    }

    pub fn heartbeat_fresh(&self, now: DateTime<Utc>) -> bool {
        matches!(self.heartbeat_age_secs(now), Some(age) if age < HEARTBEAT_FRESH_SECS)
    }
}

/// Where and how the account's isolated runtime is running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeDescriptor {
    pub handle_id: String,
    pub port: u16,
    pub created_at: DateTime<Utc>,
}

/// Durable messaging account record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Globally unique, immutable once created.
    pub id: String,
    pub owner_id: String,
    pub platform: Platform,
    pub status: AccountStatus,
    pub config: AccountConfig,
    pub health: HealthSnapshot,
    pub runtime: Option<RuntimeDescriptor>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(owner_id: &str, platform: Platform, config: AccountConfig) -> Self {
        let now = Utc::now();
        Self {
            id: format!("acc-{}", uuid::Uuid::new_v4()),
            owner_id: owner_id.to_string(),
            platform,
            status: AccountStatus::Pending,
            config,
            health: HealthSnapshot::default(),
            runtime: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The health rule: connected, fresh heartbeat, error count under the
    /// threshold. A running process with a stale heartbeat is NOT healthy.
    pub fn is_healthy(&self, error_threshold: u32, now: DateTime<Utc>) -> bool {
        self.status == AccountStatus::Connected
            && self.health.heartbeat_fresh(now)
            && self.health.consecutive_errors < error_threshold
    }
}

// ── Runtime environments ───────────────────────────────

/// Process/container-level state as observed from the runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    Starting,
    Running,
    Exited,
    Dead,
    /// The runtime itself was unreachable — distinct from "not running".
    Unknown,
}

impl RuntimeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeStatus::Starting => "starting",
            RuntimeStatus::Running => "running",
            RuntimeStatus::Exited => "exited",
            RuntimeStatus::Dead => "dead",
            RuntimeStatus::Unknown => "unknown",
        }
    }

    /// Starting or running — the environment still exists.
    pub fn is_live(&self) -> bool {
        matches!(self, RuntimeStatus::Starting | RuntimeStatus::Running)
    }

    /// Exited or dead — the environment is gone and should be evicted.
    pub fn is_gone(&self) -> bool {
        matches!(self, RuntimeStatus::Exited | RuntimeStatus::Dead)
    }
}

/// Everything the runtime needs to build one isolated environment.
#[derive(Debug, Clone)]
pub struct RuntimeSpec {
    pub account_id: String,
    pub platform: Platform,
    /// Environment passed to the instance (identity, callback URL, toggles).
    pub env: BTreeMap<String, String>,
}

/// Reference to one provisioned environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeHandle {
    pub id: String,
    pub port: u16,
}

/// Result of a live runtime inspection.
#[derive(Debug, Clone)]
pub struct RuntimeInspection {
    pub status: RuntimeStatus,
    pub port: Option<u16>,
}

// ── Tasks ──────────────────────────────────────────────

/// Task kind — one logical queue per kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    BulkMessage,
    FleetCheck,
}

impl TaskType {
    pub const ALL: [TaskType; 2] = [TaskType::BulkMessage, TaskType::FleetCheck];

    pub fn queue_name(&self) -> &'static str {
        match self {
            TaskType::BulkMessage => "bulk_message",
            TaskType::FleetCheck => "fleet_check",
        }
    }

    pub fn from_slug(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bulk_message" => Some(TaskType::BulkMessage),
            "fleet_check" => Some(TaskType::FleetCheck),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_slug(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => TaskStatus::Queued,
            "running" => TaskStatus::Running,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Pending,
        }
    }

    /// Terminal statuses never re-enter `queued`/`running`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// When a task's work should be produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskSchedule {
    Immediate,
    Delayed { start_at: DateTime<Utc> },
    Recurring { cron: String, timezone: String },
}

impl Default for TaskSchedule {
    fn default() -> Self {
        TaskSchedule::Immediate
    }
}

/// Retry and pacing knobs for one task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskLimits {
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,
    #[serde(default = "default_message_delay_ms")]
    pub message_delay_ms: u64,
}

fn default_retry_times() -> u32 {
    3
}
fn default_message_delay_ms() -> u64 {
    1500
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self {
            retry_times: default_retry_times(),
            message_delay_ms: default_message_delay_ms(),
        }
    }
}

/// Everything a job needs to run without re-reading the task mid-flight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Account ids the task may use.
    #[serde(default)]
    pub accounts: Vec<String>,
    /// Targets (phone numbers / chat ids) in submission order.
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub limits: TaskLimits,
    #[serde(default)]
    pub schedule: TaskSchedule,
}

/// Progress counters. `completed + failed <= total` at all times.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskProgress {
    pub completed: u32,
    pub failed: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetOutcome {
    Sent,
    Failed,
    RateLimited,
    Skipped,
}

impl TargetOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetOutcome::Sent => "sent",
            TargetOutcome::Failed => "failed",
            TargetOutcome::RateLimited => "rate_limited",
            TargetOutcome::Skipped => "skipped",
        }
    }

    pub fn from_slug(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "sent" => TargetOutcome::Sent,
            "rate_limited" => TargetOutcome::RateLimited,
            "skipped" => TargetOutcome::Skipped,
            _ => TargetOutcome::Failed,
        }
    }
}

/// One per-target outcome row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetResult {
    pub target: String,
    pub account_id: String,
    pub outcome: TargetOutcome,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Durable unit of requested work, independent of how many job attempts it
/// takes to finish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub owner_id: String,
    pub config: TaskConfig,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    pub results: Vec<TargetResult>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(owner_id: &str, task_type: TaskType, config: TaskConfig) -> Self {
        Self {
            id: format!("task-{}", uuid::Uuid::new_v4()),
            task_type,
            owner_id: owner_id.to_string(),
            config,
            status: TaskStatus::Pending,
            progress: TaskProgress::default(),
            results: Vec::new(),
            queued_at: None,
            started_at: None,
            finished_at: None,
            error: None,
            created_at: Utc::now(),
        }
    }
}

// ── Command channel ────────────────────────────────────

/// Fire-and-forget envelope pushed to a running instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl CommandEnvelope {
    pub fn new(command: &str, payload: serde_json::Value) -> Self {
        Self {
            command: command.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Receipt returned by a platform send primitive.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
    pub at: DateTime<Utc>,
}
