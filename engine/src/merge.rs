//! Reconciliation logic for merging local and remote snapshots.
//!
//! This is the core of determinism. Given the device's snapshot and the
//! account's snapshot, [`merge`] produces one consistent result that both
//! sides can converge on, no matter which of them runs the merge or how
//! many times it runs.
//!
//! # Per-entity rules
//!
//! 1. Sessions: union with de-duplication (same date, duration, and
//!    timestamps within [`SESSION_DEDUP_TOLERANCE_MS`])
//! 2. Tasks: union keyed by stable id, falling back to exact text
//! 3. Day buckets: last-writer-wins by `lastUpdate`; component-wise max
//!    when timestamps tie or are absent
//! 4. Empty-side protection: a non-empty entity always beats an empty
//!    one, on either side
//!
//! Rule 4 is the engine's single most important correctness property: a
//! freshly created, unpopulated account must never erase real local
//! history, and a momentarily-empty local cache must never erase remote
//! history.

use crate::{
    snapshot::DayStat, streaks, DateKey, SessionRecord, Streaks, TaskRecord, UserSnapshot,
};
use std::collections::BTreeMap;

/// Two session records within this many milliseconds of each other (same
/// date, same duration) describe the same real-world event.
pub const SESSION_DEDUP_TOLERANCE_MS: u64 = 60_000;

/// Merge a local and a remote snapshot into one consistent result.
///
/// Pure function: neither input is mutated, and no storage is touched.
/// The caller (the sync orchestrator) writes the result back locally and
/// pushes it to the account.
///
/// Idempotent (`merge(s, s) == s` modulo ordering) and commutative up to
/// list ordering, so concurrent cycles from multiple tabs converge.
pub fn merge(local: &UserSnapshot, remote: &UserSnapshot) -> UserSnapshot {
    UserSnapshot {
        sessions: merge_sessions(&local.sessions, &remote.sessions),
        tasks: merge_tasks(&local.tasks, &remote.tasks),
        streaks: merge_streaks(&local.streaks, &remote.streaks),
    }
}

/// Union of both session lists, de-duplicated, sorted ascending by
/// timestamp (date as tiebreak).
fn merge_sessions(local: &[SessionRecord], remote: &[SessionRecord]) -> Vec<SessionRecord> {
    // Empty-side protection
    if local.is_empty() {
        let mut merged = remote.to_vec();
        sort_sessions(&mut merged);
        return merged;
    }
    if remote.is_empty() {
        let mut merged = local.to_vec();
        sort_sessions(&mut merged);
        return merged;
    }

    let mut merged = local.to_vec();
    for session in remote {
        let duplicate = merged
            .iter()
            .any(|s| s.same_event(session, SESSION_DEDUP_TOLERANCE_MS));
        if !duplicate {
            merged.push(session.clone());
        }
    }

    sort_sessions(&mut merged);
    merged
}

fn sort_sessions(sessions: &mut [SessionRecord]) {
    sessions.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.date.cmp(&b.date)));
}

/// Union of both task lists. Locally created tasks keep their position;
/// remote-only additions follow.
fn merge_tasks(local: &[TaskRecord], remote: &[TaskRecord]) -> Vec<TaskRecord> {
    if local.is_empty() {
        return remote.to_vec();
    }
    if remote.is_empty() {
        return local.to_vec();
    }

    let mut merged = local.to_vec();
    for task in remote {
        if !merged.iter().any(|t| t.same_task(task)) {
            merged.push(task.clone());
        }
    }
    merged
}

/// Merge the streak entity: day buckets first, then the free-form
/// counters, then the cached streak numbers re-derived from the result.
fn merge_streaks(local: &Streaks, remote: &Streaks) -> Streaks {
    // Empty-side protection for the whole entity
    if local.is_empty() {
        return remote.clone();
    }
    if remote.is_empty() {
        return local.clone();
    }

    let mut merged = Streaks {
        current_streak: 0,
        longest_streak: 0,
        productivity_stats_by_day: merge_day_stats(
            &local.productivity_stats_by_day,
            &remote.productivity_stats_by_day,
        ),
        counters: merge_counters(&local.counters, &remote.counters),
    };

    // Streak numbers are caches over the day map, never merged directly.
    streaks::recompute_from_latest(&mut merged);

    // A device that only holds a slice of history may not see the full
    // longest run; keep the better cache when the map cannot prove it.
    merged.longest_streak = merged
        .longest_streak
        .max(local.longest_streak)
        .max(remote.longest_streak);

    merged
}

/// Per date key: one side only takes it; both sides resolve by
/// `lastUpdate` (later wins outright), falling back to component-wise
/// max when timestamps tie or are absent.
fn merge_day_stats(
    local: &BTreeMap<DateKey, DayStat>,
    remote: &BTreeMap<DateKey, DayStat>,
) -> BTreeMap<DateKey, DayStat> {
    if local.is_empty() {
        return remote.clone();
    }
    if remote.is_empty() {
        return local.clone();
    }

    let mut merged = BTreeMap::new();
    for key in local.keys().chain(remote.keys()) {
        if merged.contains_key(key) {
            continue;
        }
        let stat = match (local.get(key), remote.get(key)) {
            (Some(l), None) => l.clone(),
            (None, Some(r)) => r.clone(),
            (Some(l), Some(r)) => match (l.last_update, r.last_update) {
                (Some(lt), Some(rt)) if lt > rt => l.clone(),
                (Some(lt), Some(rt)) if rt > lt => r.clone(),
                // Equal or absent timestamps: no ordering evidence,
                // take the component-wise max (never the sum).
                _ => l.component_max(r),
            },
            (None, None) => unreachable!("key came from one of the maps"),
        };
        merged.insert(key.clone(), stat);
    }
    merged
}

/// Free-form counters carry no ordering metadata: numbers merge by max
/// (mirroring the day-bucket tie rule), anything else keeps the local
/// value.
fn merge_counters(
    local: &BTreeMap<String, serde_json::Value>,
    remote: &BTreeMap<String, serde_json::Value>,
) -> BTreeMap<String, serde_json::Value> {
    let mut merged = remote.clone();
    for (key, value) in local {
        match (value.as_f64(), merged.get(key).and_then(|v| v.as_f64())) {
            (Some(l), Some(r)) if r > l => {} // keep the remote number
            _ => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}
