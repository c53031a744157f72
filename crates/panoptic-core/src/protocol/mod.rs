//! Wire and configuration types shared by every module.
//!
//! [`JobSpec`] is what operators write; [`TaskBundle`] is what travels over
//! the event bus and to the compute pool.

/// Task bundle exchanged between scheduler, executor and reporter.
pub mod bundle;
/// Job configuration types.
pub mod types;

pub use bundle::{ResultState, Task, TaskBundle, TaskMetadata, BUNDLE_VERSION};
pub use types::{
    CollectorId, JobConfigs, JobSpec, Schedule, SubSource, SubSourceKind, TaskParams, TaskSchedule,
};
