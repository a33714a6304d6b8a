//! Unified error handling for the sync client.
//!
//! The taxonomy separates faults by what resolves them, not by where
//! they occurred: anything fixed by "try again later" stays inside the
//! engine (queue + next trigger); anything that means client and server
//! disagree about the shape of data is surfaced immediately and never
//! retried with the same payload.

use thiserror::Error;

/// All failure kinds the sync client distinguishes.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A locally stored value failed to parse. Recovered in place: the
    /// store logs, discards the value, and returns the entity default.
    /// Never propagated past the store.
    #[error("local value for '{key}' is corrupt: {reason}")]
    LocalStorageCorrupt { key: String, reason: String },

    /// Transient network or server fault (connection error, 5xx).
    /// Queued work stays pending and the next trigger retries.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// The server rejected the payload shape (4xx). Retrying the same
    /// payload would fail identically, so this is surfaced instead.
    #[error("remote rejected the request: {0}")]
    RemoteRejected(String),

    /// Local data is presumed to belong to a previously authenticated
    /// identity. Resolved by purging, not shown as an error.
    #[error("local data does not belong to the current identity")]
    IdentityMismatch,

    /// A trigger fired while a cycle was already in flight. Dropped,
    /// logged only; the next trigger catches up.
    #[error("sync already in progress, trigger dropped")]
    ConcurrentSyncSkipped,

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("engine error: {0}")]
    Engine(#[from] tempo_engine::Error),
}

impl SyncError {
    /// Whether retrying later can resolve this failure.
    ///
    /// Retry logic switches on this instead of matching message strings.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteUnavailable(_) | SyncError::ConcurrentSyncSkipped
        )
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(SyncError::RemoteUnavailable("timeout".into()).is_transient());
        assert!(SyncError::ConcurrentSyncSkipped.is_transient());
        assert!(!SyncError::RemoteRejected("schema".into()).is_transient());
        assert!(!SyncError::IdentityMismatch.is_transient());
    }

    #[test]
    fn error_display() {
        let err = SyncError::LocalStorageCorrupt {
            key: "sessions".into(),
            reason: "unexpected EOF".into(),
        };
        assert_eq!(
            err.to_string(),
            "local value for 'sessions' is corrupt: unexpected EOF"
        );
    }
}
