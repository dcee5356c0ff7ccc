//! Timer synchronization across a container scope.
//!
//! Cards in the same scope that sit at the same stage and state and whose
//! timers fall within the tolerance window are pulled onto the earliest of
//! those timers, so they come due together.

pub mod engine;
pub mod grouping;
pub mod locks;
pub mod types;

pub use engine::SyncEngine;
pub use grouping::{partition, plan_group, MergePlan, Partition, TimedCard};
pub use locks::ContainerLocks;
pub use types::{
    GroupKey, GroupOutcome, GroupStatus, ScopeOutcome, ScopeReport, SkipReason, SkippedCard,
    SweepReport, SyncResult,
};
