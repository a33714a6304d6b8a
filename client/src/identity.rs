//! Identity ownership checks for local data.
//!
//! A device store can outlive the account that produced it: user A logs
//! out, user B logs in on the same machine, and A's sessions are still
//! on disk. Pushing them would graft A's history onto B's account, so a
//! login-triggered sync first decides whether the local data can be
//! trusted, and purges it when it cannot.
//!
//! The decision is a heuristic (the store does not tag values with an
//! owner): data found on disk within moments of a login, when the
//! snapshot is non-trivial, is presumed to be leftovers from a previous
//! identity.

use crate::config::SyncConfig;
use crate::error::Result;
use crate::store::{LocalStore, KEY_SESSIONS, KEY_STREAKS, KEY_TASKS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tempo_engine::Timestamp;

/// Keys holding user-owned data. Purged on contamination; the identity
/// key itself is never touched.
const USER_DATA_KEYS: &[&str] = &[KEY_SESSIONS, KEY_TASKS, KEY_STREAKS];

/// Key prefixes for auxiliary per-user values.
const USER_DATA_PREFIXES: &[&str] = &["userData.", "stats."];

/// The authenticated account as the host application reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// When this identity authenticated on this device (ms since epoch).
    pub login_time: Timestamp,
}

/// Source of the currently authenticated identity.
///
/// The orchestrator consults this at the start of every cycle; `None`
/// means signed out, and no cycle runs.
pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;
}

/// Decides whether local data belongs to the current identity.
#[derive(Debug, Clone)]
pub struct IdentityGuard {
    login_trust_window: Duration,
    min_sessions: usize,
}

impl IdentityGuard {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            login_trust_window: config.login_trust_window,
            min_sessions: config.contamination_min_sessions,
        }
    }

    /// Whether the store holds any user-owned data at all.
    pub fn has_any_local_user_data(&self, store: &LocalStore) -> bool {
        USER_DATA_KEYS.iter().any(|key| store.has_value(key))
    }

    /// Whether the local data can be attributed to `identity`.
    ///
    /// Returns `false` when the login is recent (inside the trust
    /// window) and the store already holds a non-trivial snapshot: a
    /// fresh login cannot have produced that data, so it must belong to
    /// whoever was signed in before.
    pub fn is_local_data_owned_by(
        &self,
        identity: &Identity,
        now: Timestamp,
        store: &LocalStore,
    ) -> bool {
        let login_age = Duration::from_millis(now.saturating_sub(identity.login_time));
        if login_age > self.login_trust_window {
            // An established login has been writing this data all along.
            return true;
        }

        let snapshot = store.read_snapshot();
        let non_trivial = snapshot.sessions.len() >= self.min_sessions
            || !snapshot.streaks.productivity_stats_by_day.is_empty();
        !non_trivial
    }

    /// Remove every user-owned value from the store. The identity key
    /// and unrelated application settings survive.
    pub fn purge_local_user_data(&self, store: &mut LocalStore) -> Result<()> {
        let mut doomed: Vec<String> = store
            .keys()
            .filter(|key| {
                USER_DATA_KEYS.contains(key)
                    || USER_DATA_PREFIXES.iter().any(|p| key.starts_with(p))
            })
            .map(String::from)
            .collect();
        doomed.sort();

        for key in doomed {
            tracing::info!(key, "purging local value owned by previous identity");
            store.remove(&key)?;
        }
        Ok(())
    }
}
