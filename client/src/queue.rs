//! Append-only offline queue.
//!
//! Completed sessions and pending actions are appended to per-kind JSONL
//! logs before anything else happens to them - enqueue is the durability
//! point. Entries are never rewritten in place: a sync that uploads an
//! entry appends a `synced` marker line, and a later [`OfflineQueue::purge_synced`]
//! compacts the log by rewriting it without the acknowledged entries.
//!
//! Replay on open tolerates a torn tail: a line that fails to parse is
//! logged and skipped, and every line before it is preserved.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tempo_engine::Timestamp;
use uuid::Uuid;

const SESSIONS_LOG: &str = "sessions.log";
const ACTIONS_LOG: &str = "actions.log";

/// What a queue entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// A completed focus/break session, replayable through the engine.
    Session,
    /// A user action, acknowledged once the server accepts a snapshot
    /// that reflects it.
    Action,
}

/// One durably queued item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: Uuid,
    pub kind: QueueKind,
    pub payload: Value,
    pub enqueued_at: Timestamp,
    #[serde(default)]
    pub synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<Timestamp>,
}

/// One line of a queue log.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "line", rename_all = "lowercase")]
enum LogLine {
    Entry(QueueEntry),
    Synced { id: Uuid, at: Timestamp },
}

/// Durable FIFO queue of work awaiting upload.
#[derive(Debug)]
pub struct OfflineQueue {
    dir: PathBuf,
    entries: BTreeMap<Uuid, QueueEntry>,
    order: Vec<Uuid>,
    sessions_log: File,
    actions_log: File,
}

impl OfflineQueue {
    /// Open the queue at `dir`, replaying both logs into memory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut entries = BTreeMap::new();
        let mut order = Vec::new();
        replay_log(&dir.join(SESSIONS_LOG), &mut entries, &mut order)?;
        replay_log(&dir.join(ACTIONS_LOG), &mut entries, &mut order)?;
        order.sort_by_key(|id| entries[id].enqueued_at);

        let sessions_log = append_handle(&dir.join(SESSIONS_LOG))?;
        let actions_log = append_handle(&dir.join(ACTIONS_LOG))?;

        Ok(Self {
            dir,
            entries,
            order,
            sessions_log,
            actions_log,
        })
    }

    /// Append a session entry. Durable before this returns.
    pub fn enqueue_session<T: Serialize>(
        &mut self,
        payload: &T,
        enqueued_at: Timestamp,
    ) -> Result<QueueEntry> {
        self.enqueue(QueueKind::Session, payload, enqueued_at)
    }

    /// Append an action entry. Durable before this returns.
    pub fn enqueue_action<T: Serialize>(
        &mut self,
        payload: &T,
        enqueued_at: Timestamp,
    ) -> Result<QueueEntry> {
        self.enqueue(QueueKind::Action, payload, enqueued_at)
    }

    fn enqueue<T: Serialize>(
        &mut self,
        kind: QueueKind,
        payload: &T,
        enqueued_at: Timestamp,
    ) -> Result<QueueEntry> {
        let entry = QueueEntry {
            id: Uuid::new_v4(),
            kind,
            payload: serde_json::to_value(payload)?,
            enqueued_at,
            synced: false,
            synced_at: None,
        };

        self.append_line(kind, &LogLine::Entry(entry.clone()))?;
        self.order.push(entry.id);
        self.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    /// Unsynced entries of one kind, oldest first.
    pub fn list_unsynced(&self, kind: QueueKind) -> Vec<&QueueEntry> {
        let mut pending: Vec<_> = self
            .order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .filter(|e| e.kind == kind && !e.synced)
            .collect();
        pending.sort_by_key(|e| e.enqueued_at);
        pending
    }

    /// Mark an entry as uploaded. Idempotent; unknown ids are ignored.
    pub fn mark_synced(&mut self, id: Uuid, at: Timestamp) -> Result<()> {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Ok(());
        };
        if entry.synced {
            return Ok(());
        }
        entry.synced = true;
        entry.synced_at = Some(at);
        let kind = entry.kind;
        self.append_line(kind, &LogLine::Synced { id, at })?;
        Ok(())
    }

    /// Rewrite both logs without acknowledged entries.
    pub fn purge_synced(&mut self) -> Result<()> {
        self.order.retain(|id| !self.entries[id].synced);
        self.entries.retain(|_, e| !e.synced);

        for (name, kind) in [(SESSIONS_LOG, QueueKind::Session), (ACTIONS_LOG, QueueKind::Action)] {
            let path = self.dir.join(name);
            let tmp = path.with_extension("log.tmp");
            {
                let mut out = File::create(&tmp)?;
                for id in &self.order {
                    let entry = &self.entries[id];
                    if entry.kind == kind {
                        serde_json::to_writer(&mut out, &LogLine::Entry(entry.clone()))?;
                        out.write_all(b"\n")?;
                    }
                }
                out.sync_data()?;
            }
            fs::rename(&tmp, &path)?;
        }

        // Reopen append handles against the compacted files.
        self.sessions_log = append_handle(&self.dir.join(SESSIONS_LOG))?;
        self.actions_log = append_handle(&self.dir.join(ACTIONS_LOG))?;
        Ok(())
    }

    /// Drop every entry, synced or not, and truncate both logs.
    ///
    /// Used when local data is disowned wholesale (a login by a
    /// different identity): queued work from the previous user must not
    /// survive to be replayed into the new account.
    pub fn purge_all(&mut self) -> Result<()> {
        self.entries.clear();
        self.order.clear();

        for name in [SESSIONS_LOG, ACTIONS_LOG] {
            let path = self.dir.join(name);
            let tmp = path.with_extension("log.tmp");
            File::create(&tmp)?.sync_data()?;
            fs::rename(&tmp, &path)?;
        }

        self.sessions_log = append_handle(&self.dir.join(SESSIONS_LOG))?;
        self.actions_log = append_handle(&self.dir.join(ACTIONS_LOG))?;
        Ok(())
    }

    /// Entries still awaiting upload, across both kinds.
    pub fn count_unsynced(&self) -> usize {
        self.entries.values().filter(|e| !e.synced).count()
    }

    fn append_line(&mut self, kind: QueueKind, line: &LogLine) -> Result<()> {
        let log = match kind {
            QueueKind::Session => &mut self.sessions_log,
            QueueKind::Action => &mut self.actions_log,
        };
        serde_json::to_writer(&mut *log, line)?;
        log.write_all(b"\n")?;
        log.flush()?;
        log.sync_data()?;
        Ok(())
    }
}

fn append_handle(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn replay_log(
    path: &Path,
    entries: &mut BTreeMap<Uuid, QueueEntry>,
    order: &mut Vec<Uuid>,
) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let reader = BufReader::new(File::open(path)?);
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogLine>(&line) {
            Ok(LogLine::Entry(entry)) => {
                if entries.insert(entry.id, entry.clone()).is_none() {
                    order.push(entry.id);
                }
            }
            Ok(LogLine::Synced { id, at }) => {
                if let Some(entry) = entries.get_mut(&id) {
                    entry.synced = true;
                    entry.synced_at = Some(at);
                }
            }
            Err(err) => {
                let corrupt = SyncError::LocalStorageCorrupt {
                    key: path.display().to_string(),
                    reason: err.to_string(),
                };
                tracing::warn!(
                    line = number + 1,
                    error = %corrupt,
                    "skipping unreadable queue line"
                );
            }
        }
    }
    Ok(())
}
