//! Cron schedules and the per-subscription scheduler.
//!
//! [`cron`] is pure: expression validation and next-fire computation from a
//! reference time, with no global clock involved. [`scheduler`] owns the
//! detached worker task per subscription that sleeps until the next fire
//! and runs the fetch pipeline.

mod cron;
mod scheduler;

pub use cron::{CronError, CronExpr};
pub use scheduler::Scheduler;
