//! Sync engine, payload codec and balance reconciler for usersync.
//!
//! Moves per-player flat files (`<key>.yml`) in and out of the relational
//! store. Presence signals drive the per-player workflows, schedulers drive
//! the periodic ones, and administrators drive the bulk ones through
//! [`commands`].
//!
//! # Architecture
//!
//! ```text
//! PresenceEvent --> PresenceListener --+--> WorkerPool --> SyncEngine --> RecordStore
//!                                      |                       |
//! Scheduler ---------------------------+                       +--> UserdataDir
//!                                      |
//!                                      v
//!                                 HostNotice --> HostContext --> BalanceReconciler --> Ledger
//! ```
//!
//! # Modules
//!
//! - [`codec`] -- Compression tag, section filter and size cap.
//! - [`fields`] -- Name and balance extraction from flat files.
//! - [`userdata`] -- The flat-file directory.
//! - [`engine`] -- Load, save, import, export and cleanup workflows.
//! - [`reconciler`] -- [`Ledger`] trait and balance cache reconciliation.
//! - [`pool`] -- Bounded worker pool with awaitable handles.
//! - [`presence`] -- Roster, presence events and the listener.
//! - [`host`] -- Single consumer of ledger-side follow-ups.
//! - [`scheduler`] -- Auto-save, cleanup and resync timers.
//! - [`commands`] -- Administrative commands.
//! - [`config`] -- YAML configuration.
//! - [`error`] -- Error types.
//!
//! [`Ledger`]: reconciler::Ledger

pub mod codec;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod fields;
pub mod host;
pub mod pool;
pub mod presence;
pub mod reconciler;
pub mod scheduler;
pub mod userdata;

pub use commands::{Command, CommandReply, CommandRunner, CommandSettings};
pub use config::UsersyncConfig;
pub use engine::{BackupHook, BatchReport, RecordView, SyncEngine, SyncSettings};
pub use error::{CodecError, CommandError, FileIoError, LedgerError, ReconcileError, SyncError};
pub use host::{HostContext, HostStats};
pub use pool::{SyncHandle, WorkerPool};
pub use presence::{HostNotice, PresenceEvent, PresenceListener, PresenceSettings, Roster};
pub use reconciler::{BalanceReconciler, Ledger, MemoryLedger, ReconcileOutcome};
pub use scheduler::Scheduler;
pub use userdata::UserdataDir;
