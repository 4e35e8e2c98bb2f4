// queue/mod.rs
//
// Job lifecycle: submission, priority scheduling, deduplication, and
// bounded retention of finished records.

mod item;
mod queue;

pub use item::{JobEvent, JobId, JobRecord, JobStatus, Priority};
pub use queue::JobQueue;
