//! 由合并触发器驱动的后台维护任务，以及按 cron 定时触发它们的调度器。

mod retention;
pub mod schedule;
mod snapshot;

pub use retention::{RetentionJob, RetentionOutcome};
pub use snapshot::{Snapshot, SnapshotJob, SnapshotReason};
