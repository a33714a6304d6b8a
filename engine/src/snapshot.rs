//! Snapshot types - the unit of data exchanged between device and account.
//!
//! A snapshot is the full set of sessions, tasks and day statistics at one
//! point in time. The same shape is read from local storage, pulled from
//! the account service, and produced by [`crate::merge`].
//!
//! Every collection field defaults, so a partially-present or empty JSON
//! document always parses to empty collections rather than failing or
//! yielding `null` where a list is expected. Day stats live in a
//! `BTreeMap` for deterministic serialization order.

use crate::{error::Result, DateKey, Error, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The kind of a completed focus session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// A classic countdown focus session
    Classic,
    /// A count-up ("reverse") focus session
    Reverse,
    /// A break between focus sessions
    Break,
}

impl SessionMode {
    /// Whether this mode counts as focus activity (breaks do not).
    pub fn is_focus(self) -> bool {
        !matches!(self, SessionMode::Break)
    }
}

/// One completed session. Entries are never mutated, only added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Calendar date of the session (`YYYY-MM-DD`, user's local calendar)
    pub date: DateKey,
    /// Session length in minutes
    pub duration: u32,
    /// Session kind
    pub mode: SessionMode,
    /// Completion time (milliseconds since epoch)
    pub timestamp: Timestamp,
}

impl SessionRecord {
    /// Create a new session record.
    pub fn new(
        date: impl Into<DateKey>,
        duration: u32,
        mode: SessionMode,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            date: date.into(),
            duration,
            mode,
            timestamp,
        }
    }

    /// Whether two records describe the same real-world event.
    ///
    /// Same date and duration, with timestamps within `tolerance_ms` of
    /// each other. Two devices logging the same session rarely agree on
    /// the exact millisecond.
    pub fn same_event(&self, other: &SessionRecord, tolerance_ms: u64) -> bool {
        self.date == other.date
            && self.duration == other.duration
            && self.timestamp.abs_diff(other.timestamp) <= tolerance_ms
    }
}

/// A task on the user's list. May be edited or deleted locally.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Stable identifier, when the creating client assigned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Task text
    #[serde(default)]
    pub text: String,
    /// Completion flag
    #[serde(default)]
    pub completed: bool,
    /// Optional longer description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TaskRecord {
    /// Create a task from its text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Create a task with a stable identifier.
    pub fn with_id(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            text: text.into(),
            ..Default::default()
        }
    }

    /// Identity for de-duplication: stable id when both sides have one,
    /// exact text match otherwise.
    pub fn same_task(&self, other: &TaskRecord) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.text == other.text,
        }
    }
}

/// Aggregated counters for one calendar date (a "day bucket").
///
/// `classic`/`reverse`/`break` are monotone counters incremented by one
/// per completed session of that kind. `total_minutes` only grows over
/// the life of a date key and accumulates focus minutes only.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayStat {
    #[serde(default)]
    pub classic: u32,
    #[serde(default)]
    pub reverse: u32,
    #[serde(rename = "break", default)]
    pub breaks: u32,
    #[serde(default)]
    pub total_minutes: u32,
    /// When this bucket was last touched, for conflict resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<Timestamp>,
}

impl DayStat {
    /// Component-wise maximum of two buckets.
    ///
    /// Used when timestamps tie or are absent. Never the sum: sessions
    /// are already de-duplicated in the session list, so summing would
    /// double-count. This is what makes merging a bucket with itself a
    /// no-op.
    pub fn component_max(&self, other: &DayStat) -> DayStat {
        DayStat {
            classic: self.classic.max(other.classic),
            reverse: self.reverse.max(other.reverse),
            breaks: self.breaks.max(other.breaks),
            total_minutes: self.total_minutes.max(other.total_minutes),
            last_update: match (self.last_update, other.last_update) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            },
        }
    }
}

/// Streak counters plus the embedded per-day stat map.
///
/// `current_streak` and `longest_streak` are caches: they must always be
/// re-derivable from `productivity_stats_by_day` and are recomputed after
/// every merge and every applied session. Unknown counters written by the
/// UI layer are preserved in `counters`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Streaks {
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub longest_streak: u32,
    #[serde(default)]
    pub productivity_stats_by_day: BTreeMap<DateKey, DayStat>,
    /// Free-form counters the core does not interpret
    #[serde(flatten)]
    pub counters: BTreeMap<String, serde_json::Value>,
}

impl Streaks {
    /// Whether this side carries no streak data at all.
    pub fn is_empty(&self) -> bool {
        self.current_streak == 0
            && self.longest_streak == 0
            && self.productivity_stats_by_day.is_empty()
            && self.counters.is_empty()
    }
}

/// The full set of a user's data at one point in time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub streaks: Streaks,
}

impl UserSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the snapshot carries no data at all.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.tasks.is_empty() && self.streaks.is_empty()
    }

    /// Whether the snapshot holds non-trivial user history.
    ///
    /// This is the signal the identity guard uses: any session or any
    /// populated day bucket counts as history worth protecting.
    pub fn has_user_data(&self) -> bool {
        !self.sessions.is_empty()
            || !self.tasks.is_empty()
            || !self.streaks.productivity_stats_by_day.is_empty()
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }
}
