//! # Tempo Engine
//!
//! The deterministic merge engine for Tempo productivity data.
//!
//! This crate holds the pure core of the sync system: the snapshot data
//! model (focus sessions, tasks, streaks, per-day statistics) and the
//! reconciliation rules that decide, field by field, which copy of the
//! user's data wins when a device and an account disagree.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of files, network, or platform
//! - **Deterministic**: the same inputs always produce the same outputs
//! - **Idempotent**: merging a snapshot with itself is a no-op
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Snapshots
//!
//! A [`UserSnapshot`] is the full set of a user's data at one point in
//! time, local or remote:
//! - `sessions`: append-only list of completed focus sessions
//! - `tasks`: editable task list
//! - `streaks`: streak counters plus the embedded per-day stat map
//!
//! Streak counters are caches: they are always re-derivable from the
//! day-stat map and are recomputed after every merge and every applied
//! session (see [`streaks`]).
//!
//! ### Merge
//!
//! [`merge`] reconciles two snapshots with per-entity rules:
//! - sessions: union with de-duplication (60 second timestamp tolerance)
//! - tasks: union keyed by id, falling back to exact text
//! - day buckets: last-writer-wins by `lastUpdate`, component-wise max
//!   when timestamps tie or are absent
//! - a non-empty side always beats an empty one, so a freshly created
//!   account can never erase real local history (and vice versa)
//!
//! ## Quick Start
//!
//! ```rust
//! use tempo_engine::{merge, SessionMode, SessionRecord, UserSnapshot};
//!
//! let mut local = UserSnapshot::default();
//! local.sessions.push(SessionRecord::new(
//!     "2024-06-01",
//!     25,
//!     SessionMode::Classic,
//!     1717236000000,
//! ));
//!
//! let remote = UserSnapshot::default();
//!
//! // An empty remote never erases local history.
//! let merged = merge(&local, &remote);
//! assert_eq!(merged.sessions.len(), 1);
//! ```

pub mod error;
pub mod merge;
pub mod snapshot;
pub mod streaks;

// Re-export main types at crate root
pub use error::Error;
pub use merge::{merge, SESSION_DEDUP_TOLERANCE_MS};
pub use snapshot::{DayStat, SessionMode, SessionRecord, Streaks, TaskRecord, UserSnapshot};
pub use streaks::{apply_session, current_streak, longest_streak, recompute};

/// Type aliases for clarity
pub type Timestamp = u64;
pub type DateKey = String;
pub type UserId = String;
