//! # Tempo Client
//!
//! Device-side sync runtime for Tempo. Wraps the pure merge rules of
//! [`tempo_engine`] with everything a device actually needs to stay
//! converged with its account:
//!
//! - [`store::LocalStore`] - durable keyed storage for the local snapshot
//! - [`queue::OfflineQueue`] - append-only log of work awaiting upload
//! - [`identity::IdentityGuard`] - keeps one user's leftovers out of
//!   another user's account on shared devices
//! - [`remote::HttpRemote`] - pull/push transport over the account REST API
//! - [`orchestrator::SyncOrchestrator`] - the event-driven sync cycle
//!
//! ## Guarantees
//!
//! - Completed work is durable before anything else sees it: sessions hit
//!   the offline queue before they are applied locally, and the merged
//!   snapshot is written locally before it is pushed.
//! - Sync cycles are mutually exclusive; overlapping triggers are dropped.
//! - Local storage corruption degrades to empty defaults, never to a
//!   crash or an error surfaced to the user.

pub mod config;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod queue;
pub mod remote;
pub mod store;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use identity::{Identity, IdentityGuard, IdentityProvider};
pub use orchestrator::{SyncEvent, SyncOrchestrator, SyncStatus, SyncTrigger};
pub use queue::{OfflineQueue, QueueEntry, QueueKind};
pub use remote::{HttpRemote, RemoteTransport, ServerAck};
pub use store::LocalStore;
