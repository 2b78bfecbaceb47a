//! transit-ingest
//!
//! The ingestion tasks and scheduler that pull agencies, routes,
//! predictions, and vehicle locations from the upstream feed into the
//! [`Store`](transit_core::Store).
//!
//! - `tasks`: [`IngestionTasks`], the five operations spec'd in §4.6.
//! - `scheduler`: [`Scheduler`], the periodic runner spec'd in §4.7.
#![warn(missing_docs)]

/// Periodic task runner.
pub mod scheduler;
/// The five ingestion operations.
pub mod tasks;

pub use scheduler::{Scheduler, SchedulerConfig};
pub use tasks::IngestionTasks;
