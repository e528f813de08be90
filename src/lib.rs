//! prepboard — a shared task board for event prep.
//!
//! The client core is a local-first snapshot plus a pull/push
//! reconciliation loop against one remote JSON document (last-writer-wins
//! on a version counter). The crate also ships the minimal server half of
//! that document protocol so a board can be self-hosted.

pub mod board;
pub mod cache;
pub mod docserver;
pub mod engine;
pub mod remote;
pub mod session;
pub mod settings;

pub use board::{
    append_log, apply_task_update, build_mutation, describe_task_update, Intent, LogEntry,
    Mutation, Snapshot, Task, TaskStatus, TaskUpdate, LOG_CAP,
};
pub use cache::{CacheError, CacheFile};
pub use engine::{SyncEngine, SyncStatus};
pub use remote::{DocumentStore, HttpStore, RemoteError};
pub use session::{Session, SessionError};
pub use settings::Settings;
