//! Core library for the artifact depot: per-client request throttling and
//! coalesced background maintenance (retention sweeps, state snapshots).

pub mod clock;
pub mod config;
mod error;
pub mod maintenance;
mod store;
mod throttle;
mod trigger;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{RetentionConfig, ThrottleConfig, TriggerConfig};
pub use error::{DepotError, Result};
pub use maintenance::schedule::MaintenanceScheduler;
pub use maintenance::{RetentionJob, RetentionOutcome, Snapshot, SnapshotJob, SnapshotReason};
pub use store::{ArtifactInfo, ArtifactStore, FsArtifactStore};
pub use throttle::RequestThrottler;
pub use trigger::{CoalescingTrigger, Maintenance, TriggerStats};
