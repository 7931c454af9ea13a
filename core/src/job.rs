//! Scheduled job trait.
//!
//! RULE: Every recurring task implements ScheduledJob.
//! The scheduler calls run() on each registered job in registration
//! order whenever the daily schedule fires.
//! Execution order is fixed and documented in scheduler.rs.

use crate::{engine::DuesEngine, error::DuesResult, event::DuesEvent};

/// The contract every scheduled job must fulfill.
pub trait ScheduledJob: Send {
    /// Unique stable name for this job.
    fn name(&self) -> &'static str;

    /// Called once per scheduler run.
    ///
    /// Jobs go through the engine's public operations only, the same ones
    /// manual callers use. Those operations log their own fine-grained
    /// events; the returned vec carries the job's summary events, which
    /// the scheduler appends to the event log.
    fn run(&mut self, engine: &DuesEngine) -> DuesResult<Vec<DuesEvent>>;
}
