//! Local store accessor - typed, durable access to the device copy of
//! the user's data.
//!
//! One JSON document per key under a store directory, fronted by a
//! write-behind cache. Writes land in the cache and become durable on
//! [`LocalStore::flush`], which the orchestrator calls before every sync
//! cycle reads - that explicit flush is what prevents races between
//! "just wrote" and "about to sync".
//!
//! Reads never fail: a missing or corrupt value is logged, discarded,
//! and replaced by the entity's empty default. Collections are never
//! `null`.

use crate::error::{Result, SyncError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempo_engine::{Timestamp, UserSnapshot};

/// Fixed keys the sync core depends on.
pub const KEY_SESSIONS: &str = "sessions";
pub const KEY_TASKS: &str = "tasks";
pub const KEY_STREAKS: &str = "streaks";
pub const KEY_LAST_SYNC: &str = "lastSyncTime";

/// The identity key is owned by the authentication collaborator; the
/// store carries it but the identity guard never purges it.
pub const KEY_IDENTITY: &str = "identity";

/// Durable keyed JSON storage with a write-behind cache.
#[derive(Debug)]
pub struct LocalStore {
    dir: PathBuf,
    cache: BTreeMap<String, Value>,
    dirty: BTreeSet<String>,
}

impl LocalStore {
    /// Open (or create) a store rooted at `dir`, loading every persisted
    /// key. Corrupt documents are dropped with a warning and treated as
    /// absent.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut cache = BTreeMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match read_document(&path) {
                Ok(value) => {
                    cache.insert(key.to_string(), value);
                }
                Err(err) => {
                    let corrupt = SyncError::LocalStorageCorrupt {
                        key: key.to_string(),
                        reason: err.to_string(),
                    };
                    tracing::warn!(key, error = %corrupt, "discarding corrupt local value");
                }
            }
        }

        Ok(Self {
            dir,
            cache,
            dirty: BTreeSet::new(),
        })
    }

    /// Read a typed value for `key`, or its default when the key is
    /// absent or the stored value does not fit the expected shape.
    pub fn read<T>(&self, key: &str) -> T
    where
        T: DeserializeOwned + Default,
    {
        let Some(value) = self.cache.get(key) else {
            return T::default();
        };
        match serde_json::from_value(value.clone()) {
            Ok(parsed) => parsed,
            Err(err) => {
                let corrupt = SyncError::LocalStorageCorrupt {
                    key: key.to_string(),
                    reason: err.to_string(),
                };
                tracing::warn!(key, error = %corrupt, "stored value has wrong shape, using default");
                T::default()
            }
        }
    }

    /// Write a typed value for `key` into the cache. Durable after the
    /// next [`flush`](Self::flush).
    pub fn write<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.cache.insert(key.to_string(), value);
        self.dirty.insert(key.to_string());
        Ok(())
    }

    /// Persist every dirty key (atomic per key: temp file + rename).
    pub fn flush(&mut self) -> Result<()> {
        for key in std::mem::take(&mut self.dirty) {
            let Some(value) = self.cache.get(&key) else {
                continue; // removed after being written
            };
            let path = self.key_path(&key);
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, serde_json::to_vec(value)?)?;
            fs::rename(&tmp, &path)?;
        }
        Ok(())
    }

    /// Remove a key from cache and disk.
    pub fn remove(&mut self, key: &str) -> Result<()> {
        self.cache.remove(key);
        self.dirty.remove(key);
        let path = self.key_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// All keys currently present.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.cache.keys().map(String::as_str)
    }

    /// Whether a key holds a non-empty value (non-empty array/object,
    /// or any non-null scalar).
    pub fn has_value(&self, key: &str) -> bool {
        match self.cache.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            Some(_) => true,
        }
    }

    /// Assemble the full local snapshot from its entity keys.
    pub fn read_snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            sessions: self.read(KEY_SESSIONS),
            tasks: self.read(KEY_TASKS),
            streaks: self.read(KEY_STREAKS),
        }
    }

    /// Write a full snapshot back to its entity keys.
    pub fn write_snapshot(&mut self, snapshot: &UserSnapshot) -> Result<()> {
        self.write(KEY_SESSIONS, &snapshot.sessions)?;
        self.write(KEY_TASKS, &snapshot.tasks)?;
        self.write(KEY_STREAKS, &snapshot.streaks)?;
        Ok(())
    }

    /// The persisted time of the last successful sync cycle.
    pub fn last_sync_time(&self) -> Option<Timestamp> {
        self.read(KEY_LAST_SYNC)
    }

    pub fn set_last_sync_time(&mut self, at: Timestamp) -> Result<()> {
        self.write(KEY_LAST_SYNC, &Some(at))
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

fn read_document(path: &Path) -> std::result::Result<Value, Box<dyn std::error::Error>> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_engine::{SessionMode, SessionRecord};

    fn temp_store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn read_missing_key_returns_default() {
        let (_dir, store) = temp_store();
        let sessions: Vec<SessionRecord> = store.read(KEY_SESSIONS);
        assert!(sessions.is_empty());
        assert!(store.last_sync_time().is_none());
    }

    #[test]
    fn write_flush_reopen_roundtrip() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mut store = LocalStore::open(dir.path()).unwrap();
            let sessions = vec![SessionRecord::new(
                "2024-06-01",
                25,
                SessionMode::Classic,
                1000,
            )];
            store.write(KEY_SESSIONS, &sessions).unwrap();
            store.flush().unwrap();
        }

        let store = LocalStore::open(dir.path()).unwrap();
        let sessions: Vec<SessionRecord> = store.read(KEY_SESSIONS);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].duration, 25);
    }

    #[test]
    fn unflushed_write_is_not_durable() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mut store = LocalStore::open(dir.path()).unwrap();
            store.write(KEY_TASKS, &vec!["pending".to_string()]).unwrap();
            // no flush - simulated crash
        }

        let store = LocalStore::open(dir.path()).unwrap();
        let tasks: Vec<String> = store.read(KEY_TASKS);
        assert!(tasks.is_empty());
    }

    #[test]
    fn corrupt_file_on_open_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sessions.json"), "{truncated").unwrap();

        let store = LocalStore::open(dir.path()).unwrap();
        let sessions: Vec<SessionRecord> = store.read(KEY_SESSIONS);
        assert!(sessions.is_empty());
    }

    #[test]
    fn wrong_shape_reads_as_default() {
        let (_dir, mut store) = temp_store();
        store.write(KEY_SESSIONS, &"not a list").unwrap();

        let sessions: Vec<SessionRecord> = store.read(KEY_SESSIONS);
        assert!(sessions.is_empty());
    }

    #[test]
    fn snapshot_roundtrip() {
        let (_dir, mut store) = temp_store();

        let mut snapshot = UserSnapshot::default();
        snapshot
            .sessions
            .push(SessionRecord::new("2024-06-01", 25, SessionMode::Classic, 1000));
        store.write_snapshot(&snapshot).unwrap();

        assert_eq!(store.read_snapshot(), snapshot);
    }

    #[test]
    fn remove_deletes_from_cache_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LocalStore::open(dir.path()).unwrap();

        store.write("userData.notes", &vec!["a"]).unwrap();
        store.flush().unwrap();
        assert!(dir.path().join("userData.notes.json").exists());

        store.remove("userData.notes").unwrap();
        assert!(!dir.path().join("userData.notes.json").exists());
        assert!(!store.has_value("userData.notes"));
    }

    #[test]
    fn has_value_semantics() {
        let (_dir, mut store) = temp_store();

        assert!(!store.has_value("missing"));
        store.write("empty", &Vec::<u32>::new()).unwrap();
        assert!(!store.has_value("empty"));
        store.write("full", &vec![1, 2, 3]).unwrap();
        assert!(store.has_value("full"));
        store.write("scalar", &42u32).unwrap();
        assert!(store.has_value("scalar"));
    }

    #[test]
    fn last_sync_time_roundtrip() {
        let (_dir, mut store) = temp_store();
        store.set_last_sync_time(1_717_236_000_000).unwrap();
        assert_eq!(store.last_sync_time(), Some(1_717_236_000_000));
    }
}
