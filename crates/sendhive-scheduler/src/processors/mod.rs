//! Task processors — per-task-type handlers consuming jobs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sendhive_core::error::Result;
use sendhive_core::traits::MessageSender;
use sendhive_core::types::{Platform, TaskType};
use sendhive_runtime::AccountOrchestrator;
use sendhive_store::StoreDb;

use crate::queue::Job;
use crate::rate::RateTracker;

pub mod bulk_message;
pub mod fleet_check;

pub use bulk_message::BulkMessageProcessor;
pub use fleet_check::FleetCheckProcessor;

/// Cancellation flags shared between the scheduler facade and active jobs.
/// Processors poll these between units of work; a raised flag means stop at
/// the next safe checkpoint.
#[derive(Default)]
pub struct CancelFlags {
    flags: Mutex<HashSet<String>>,
}

impl CancelFlags {
    pub fn raise(&self, task_id: &str) {
        self.flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_id.to_string());
    }

    pub fn clear(&self, task_id: &str) {
        self.flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(task_id);
    }

    pub fn is_raised(&self, task_id: &str) -> bool {
        self.flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(task_id)
    }
}

/// Everything a processor needs to drive work across account instances.
pub struct ProcessorContext {
    pub orchestrator: Arc<AccountOrchestrator>,
    pub store: Arc<StoreDb>,
    pub rate: Arc<RateTracker>,
    pub senders: HashMap<Platform, Arc<dyn MessageSender>>,
    pub(crate) cancelled: Arc<CancelFlags>,
}

impl ProcessorContext {
    /// Cancellation checkpoint — processors call this between sends.
    pub fn is_cancelled(&self, task_id: &str) -> bool {
        self.cancelled.is_raised(task_id)
    }
}

/// One handler per task type, registered with its queue.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    fn task_type(&self) -> TaskType;

    /// Consume one job. Per-target failures are recorded in the result
    /// list, never returned as errors; a returned error is a job-level
    /// failure that triggers the retry policy.
    async fn process(&self, job: &Job, ctx: &ProcessorContext) -> Result<()>;
}
