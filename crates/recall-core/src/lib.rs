//! # Recall Core Library
//!
//! Card lifecycle and timer synchronization for a spaced-repetition system.
//! All operations are available through the `recall` CLI binary, which is a
//! thin layer over this library.
//!
//! ## Architecture
//!
//! - **Card**: the card record and the state classifier that derives one
//!   lifecycle state from its timer fields
//! - **Scheduler**: pure stage transitions for answers, plus a service that
//!   applies them to stored cards
//! - **Sync**: groups cards of a container scope by stage and state and pulls
//!   near-identical timers onto the earliest one
//! - **Trigger**: post-answer and periodic entry points into the sync engine
//! - **Store / Storage**: record store traits, an in-memory store, the SQLite
//!   database and TOML configuration
//!
//! ## Key Components
//!
//! - [`classify`]: single source of truth for card state precedence
//! - [`ReviewService`]: answer, freeze, overdue and reset operations
//! - [`SyncEngine`]: per-scope timer synchronization
//! - [`SyncTrigger`]: `on_answer_recorded` and `sweep_all`
//! - [`Database`]: SQLite record store
//! - [`Config`]: application configuration management

pub mod card;
pub mod error;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod sync;
pub mod trigger;

pub use card::{classify, timer_end_time, Card, CardId, CardState, ContainerId, TimerPatch};
pub use error::{ConfigError, CoreError, DatabaseError, EntityKind};
pub use scheduler::{IntervalTable, ReviewScheduler, ReviewService};
pub use storage::{Config, Database};
pub use store::{
    CardQuery, CardScan, CardStore, CardUpdate, Container, ContainerHierarchy, MemoryStore,
    UnreadableCard,
};
pub use sync::{SweepReport, SyncEngine, SyncResult};
pub use trigger::{CancelToken, SyncTrigger};
