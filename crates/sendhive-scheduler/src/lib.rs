//! # SendHive Scheduler
//!
//! Typed job queues on top of the account orchestrator:
//!
//! ```text
//! TaskScheduler (facade)
//!   ├── TaskQueue per task type — waiting/delayed jobs, worker pool,
//!   │   explicit RetryPolicy { max_attempts, backoff } per job
//!   ├── CronRegistry — one standing timer per recurring task
//!   ├── RateTracker — rolling per-account hour/day send windows
//!   └── TaskProcessor impls
//!         ├── BulkMessageProcessor — round-robin sends across healthy
//!         │   accounts, rate-limit skips, cancellation checkpoints
//!         └── FleetCheckProcessor — per-account health sweep
//! ```
//!
//! Jobs are delivered at-least-once with bounded retries and exponential
//! backoff; the durable Task record is the system of record for status and
//! progress.

pub mod cron;
pub mod facade;
pub mod processors;
pub mod queue;
pub mod rate;
pub mod recurring;

pub use facade::TaskScheduler;
pub use processors::{
    BulkMessageProcessor, CancelFlags, FleetCheckProcessor, ProcessorContext, TaskProcessor,
};
pub use queue::{Backoff, Job, QueueStats, RetryPolicy, TaskQueue};
pub use rate::RateTracker;
pub use recurring::CronRegistry;
