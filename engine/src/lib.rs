//! # Ledger Sync
//!
//! Local-first sync, versioning and conflict resolution for a personal
//! finance tracker.
//!
//! The application owns its state (transactions, accounts, settings) and
//! hands snapshots of it to this crate. The crate pushes them to a per-user
//! remote document, notices when another device got there first, keeps a
//! retained history of restore points and records an audit log.
//!
//! ## Design Principles
//!
//! - **Local first**: every operation works without a backend; syncs simply
//!   report [`SyncStatus::Offline`]
//! - **Never lose data**: a remote that moved ahead is a [`Conflict`] for the
//!   user to resolve, never a silent overwrite
//! - **Injected collaborators**: storage, remote backend, session and clock
//!   are passed in, so everything runs in tests without mocks of globals
//!
//! ## Core Concepts
//!
//! ### Versioned document
//!
//! Each user has one [`RemoteDocument`] holding the serialized state, its
//! checksum and a version that increases by one per successful write. Each
//! device remembers the last version it saw in its [`SyncMeta`].
//!
//! ### Conflicts
//!
//! [`detect_conflict`] compares versions when both are known, falls back to
//! timestamps, and otherwise reports no conflict. Resolving as
//! [`Resolution::Remote`] hands back the verified remote state; resolving as
//! [`Resolution::Local`] makes the next sync overwrite the remote.
//!
//! ### Scheduling
//!
//! [`SyncService::queue_change`] debounces bursts of edits into one sync.
//! [`SyncService::start_auto_sync`] adds periodic syncs and retry backoff.
//!
//! ### Restore points and audit log
//!
//! Named snapshots ([`RestorePoint`]) and audit entries ([`AuditLogEntry`])
//! are stored per user, newest first, with bounded retention.
//!
//! ## Quick Start
//!
//! ```rust
//! use ledger_sync::{
//!     ApplicationState, EngineConfig, MemoryDocumentStore, MemoryStore, SessionContext,
//!     SyncOptions, SyncOutcome, SyncService,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> ledger_sync::Result<()> {
//! let session = Arc::new(SessionContext::new("laptop").with_user("user-1"));
//! let service = SyncService::new(
//!     EngineConfig::default(),
//!     session,
//!     Arc::new(MemoryDocumentStore::new()),
//!     Arc::new(MemoryStore::new()),
//! );
//!
//! let state = ApplicationState::default()
//!     .with_transactions(json!([{ "id": "tx-1", "amount": -12.5 }]));
//! service.queue_change();
//!
//! match service.trigger_sync(&state, SyncOptions::default()).await? {
//!     SyncOutcome::Synced { version, .. } => assert_eq!(version, 1),
//!     other => panic!("unexpected outcome: {:?}", other),
//! }
//! assert_eq!(service.pending_changes(), 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistence
//!
//! Local data goes through a [`KeyValueStore`]. [`MemoryStore`] keeps it in
//! memory; [`FileStore`] writes one JSON file per key.

pub mod audit;
pub mod checksum;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod kv;
pub mod meta;
pub mod record;
pub mod remote;
pub mod restore;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod snapshot;
pub mod store;

// Re-export main types at crate root
pub use audit::{AuditChange, AuditLog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig, RetryPolicy};
pub use conflict::{
    detect_conflict, ActiveConflict, Conflict, ConflictInputs, ConflictSet, Resolution,
    ResolutionOutcome,
};
pub use engine::{SyncEngine, SyncOptions, SyncOutcome, SyncStatus};
pub use error::{Error, ErrorClass, RecommendedAction, Result};
pub use kv::{FileStore, KeyValueStore, MemoryStore};
pub use meta::{MetaStore, SyncMeta};
pub use record::{
    AuditAction, AuditLogEntry, RestorePoint, ScopedRecord, SnapshotType, AUDIT_LOG_RETENTION,
    RESTORE_POINT_RETENTION,
};
pub use remote::{
    Capabilities, ConflictPatch, LocalOnly, MemoryDocumentStore, RemoteDocument,
    RemoteDocumentStore, RemoteError,
};
pub use restore::RestorePointManager;
pub use scheduler::{Scheduler, SyncTrigger};
pub use service::{StateSource, SyncService};
pub use session::SessionContext;
pub use snapshot::{ApplicationState, StateBlob};
pub use store::ScopedStore;

/// Type aliases for clarity
pub type UserId = String;
pub type DeviceId = String;
pub type Version = u64;
pub type Timestamp = chrono::DateTime<chrono::Utc>;
