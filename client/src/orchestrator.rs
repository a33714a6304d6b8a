//! Sync orchestration - the event-driven cycle that keeps the device
//! and the account converged.
//!
//! Every cycle runs the same shape: drain the offline queue into the
//! local snapshot, pull the account copy, merge, write the merged result
//! locally, push it back, and only then acknowledge the queued entries.
//! The local write always lands before the push, so a connection lost
//! mid-cycle can cost an upload but never data.
//!
//! Cycles are mutually exclusive. A trigger that fires while one is in
//! flight is dropped with [`SyncError::ConcurrentSyncSkipped`]; the next
//! trigger picks up whatever that one would have carried.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::identity::{IdentityGuard, IdentityProvider};
use crate::queue::{OfflineQueue, QueueKind};
use crate::remote::RemoteTransport;
use crate::store::LocalStore;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tempo_engine::{
    apply_session, current_streak, merge, streaks::format_date_key, SessionMode, SessionRecord,
    Timestamp,
};
use tokio::sync::broadcast;
use uuid::Uuid;

/// What caused a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// A login just completed; runs the identity guard before syncing.
    LoginCompleted,
    /// The app restored a previous authenticated state on startup.
    SessionRestored,
    /// Background interval fired.
    Periodic,
    /// Connectivity came back after an offline stretch.
    BackOnline,
    /// The app regained the user's attention after a long idle.
    AttentionRegained,
}

/// How much of the cycle a trigger runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleKind {
    /// Pull, merge, write, push.
    Full,
    /// Pull, merge, write - refreshes the view without an upload.
    PullOnly,
}

/// Observable sync lifecycle notifications.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    SyncStart,
    SyncComplete { at: Timestamp },
    SyncError { reason: String, retryable: bool },
    ConnectionChanged { is_online: bool },
}

/// Point-in-time view of the sync machinery, for UI surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub last_sync_time: Option<Timestamp>,
    pub sync_in_progress: bool,
    pub is_online: bool,
    pub pending_queue_length: usize,
}

/// State that must only be touched by one cycle step at a time. The
/// lock is never held across an await point.
#[derive(Debug)]
struct Inner {
    store: LocalStore,
    queue: OfflineQueue,
}

/// Drives sync cycles against a [`RemoteTransport`], keyed by whatever
/// identity the [`IdentityProvider`] reports.
pub struct SyncOrchestrator<R, I> {
    inner: Mutex<Inner>,
    remote: R,
    identity: I,
    guard: IdentityGuard,
    config: SyncConfig,
    in_progress: AtomicBool,
    online: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
}

/// Clears the in-progress flag on every exit path of a cycle.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<R, I> SyncOrchestrator<R, I>
where
    R: RemoteTransport,
    I: IdentityProvider,
{
    pub fn new(
        store: LocalStore,
        queue: OfflineQueue,
        remote: R,
        identity: I,
        config: SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(Inner { store, queue }),
            guard: IdentityGuard::new(&config),
            remote,
            identity,
            config,
            in_progress: AtomicBool::new(false),
            online: AtomicBool::new(true),
            events,
        }
    }

    /// Subscribe to sync lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Current sync state, for status surfaces.
    pub fn status(&self) -> SyncStatus {
        let inner = self.lock();
        SyncStatus {
            last_sync_time: inner.store.last_sync_time(),
            sync_in_progress: self.in_progress.load(Ordering::SeqCst),
            is_online: self.online.load(Ordering::SeqCst),
            pending_queue_length: inner.queue.count_unsynced(),
        }
    }

    /// Record a connectivity change. Emits [`SyncEvent::ConnectionChanged`]
    /// on actual transitions; callers follow an offline-to-online edge
    /// with a [`SyncTrigger::BackOnline`] trigger.
    pub fn set_online(&self, is_online: bool) {
        let was = self.online.swap(is_online, Ordering::SeqCst);
        if was != is_online {
            tracing::info!(is_online, "connectivity changed");
            let _ = self.events.send(SyncEvent::ConnectionChanged { is_online });
        }
    }

    /// Record a completed session: durably queued first, then folded
    /// into the local snapshot. The upload happens on the next cycle.
    pub fn record_completed_session(
        &self,
        mode: SessionMode,
        duration: u32,
        completed_at: DateTime<Local>,
    ) -> Result<()> {
        let session = SessionRecord::new(
            format_date_key(completed_at.date_naive()),
            duration,
            mode,
            completed_at.timestamp_millis() as Timestamp,
        );

        let mut inner = self.lock();
        inner.queue.enqueue_session(&session, now_ms())?;

        let mut snapshot = inner.store.read_snapshot();
        if apply_session(&mut snapshot, session, completed_at.date_naive()) {
            inner.store.write_snapshot(&snapshot)?;
        }
        inner.store.flush()?;
        Ok(())
    }

    /// Queue an opaque user action for upload on the next cycle.
    pub fn record_action(&self, action: &Value) -> Result<()> {
        let mut inner = self.lock();
        inner.queue.enqueue_action(action, now_ms())?;
        Ok(())
    }

    /// React to a sync trigger. Returns [`SyncError::ConcurrentSyncSkipped`]
    /// when a cycle is already in flight.
    pub async fn handle_trigger(&self, trigger: SyncTrigger) -> Result<()> {
        match trigger {
            SyncTrigger::LoginCompleted => {
                self.enforce_identity_ownership()?;
                self.run_cycle(CycleKind::Full).await
            }
            SyncTrigger::SessionRestored | SyncTrigger::AttentionRegained => {
                self.run_cycle(CycleKind::PullOnly).await
            }
            SyncTrigger::Periodic => {
                if !self.online.load(Ordering::SeqCst) {
                    tracing::debug!("periodic sync skipped while offline");
                    return Ok(());
                }
                self.run_cycle(CycleKind::Full).await
            }
            SyncTrigger::BackOnline => self.run_cycle(CycleKind::Full).await,
        }
    }

    /// Convenience for attention tracking: triggers a pull-only cycle
    /// when the idle stretch crossed the configured threshold.
    pub async fn attention_regained(&self, idle_for: Duration) -> Result<()> {
        if idle_for < self.config.attention_idle_threshold {
            return Ok(());
        }
        self.handle_trigger(SyncTrigger::AttentionRegained).await
    }

    /// Purge local data that cannot belong to the just-logged-in
    /// identity - store and offline queue both, or queued entries from
    /// the previous user would be replayed into the purged snapshot on
    /// the very next cycle. Pre-cycle step for
    /// [`SyncTrigger::LoginCompleted`].
    fn enforce_identity_ownership(&self) -> Result<()> {
        let Some(identity) = self.identity.current_identity() else {
            return Ok(());
        };

        let mut inner = self.lock();
        if !self.guard.has_any_local_user_data(&inner.store) {
            return Ok(());
        }
        if self
            .guard
            .is_local_data_owned_by(&identity, now_ms(), &inner.store)
        {
            return Ok(());
        }

        tracing::warn!(
            user_id = %identity.user_id,
            error = %SyncError::IdentityMismatch,
            "purging local data before first sync"
        );
        self.guard.purge_local_user_data(&mut inner.store)?;
        inner.queue.purge_all()?;
        inner.store.flush()?;
        Ok(())
    }

    async fn run_cycle(&self, kind: CycleKind) -> Result<()> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("sync trigger dropped, cycle already in flight");
            return Err(SyncError::ConcurrentSyncSkipped);
        }
        let _cycle = CycleGuard(&self.in_progress);

        let Some(identity) = self.identity.current_identity() else {
            tracing::debug!("no authenticated identity, skipping sync");
            return Ok(());
        };

        tracing::info!(user_id = %identity.user_id, ?kind, "sync cycle started");
        let _ = self.events.send(SyncEvent::SyncStart);

        let today = Local::now().date_naive();

        // Step 1: fold queued sessions into the local snapshot so the
        // merge below sees everything this device knows.
        let unreadable = self.drain_queue_locally(today)?;

        // Step 2: pull. A failed pull aborts the cycle - pushing without
        // having merged the account copy could overwrite remote history.
        let remote_snapshot = match self.remote.pull(&identity.user_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => return self.fail_cycle("pull", err),
        };

        // Step 3: merge and make the result durable locally.
        let (merged, pending) = {
            let mut inner = self.lock();
            let local = inner.store.read_snapshot();
            let mut merged = merge(&local, &remote_snapshot);
            // Re-anchor only the current streak at the real local date.
            // The merged longest streak stays as-is: the day map alone
            // cannot prove a record run this device no longer holds
            // buckets for.
            merged.streaks.current_streak =
                current_streak(&merged.streaks.productivity_stats_by_day, today);
            inner.store.write_snapshot(&merged)?;
            inner.store.flush()?;

            let mut pending: Vec<_> = inner
                .queue
                .list_unsynced(QueueKind::Session)
                .iter()
                .map(|e| e.id)
                .collect();
            pending.extend(
                inner
                    .queue
                    .list_unsynced(QueueKind::Action)
                    .iter()
                    .map(|e| e.id),
            );
            // Entries that failed to replay stay unacknowledged.
            pending.retain(|id| !unreadable.contains(id));
            (merged, pending)
        };

        // Step 4: push the merged snapshot (full cycles only).
        if kind == CycleKind::Full {
            match self.remote.push(&identity.user_id, &merged).await {
                Ok(ack) if ack.accepted => {}
                Ok(_) => {
                    return self.fail_cycle(
                        "push",
                        SyncError::RemoteRejected("server did not accept the snapshot".into()),
                    );
                }
                Err(err) => return self.fail_cycle("push", err),
            }

            // Step 5: the upload is acknowledged, so queued entries are
            // now redundant.
            let now = now_ms();
            let mut inner = self.lock();
            for id in pending {
                inner.queue.mark_synced(id, now)?;
            }
            inner.queue.purge_synced()?;
        }

        let at = now_ms();
        {
            let mut inner = self.lock();
            inner.store.set_last_sync_time(at)?;
            inner.store.flush()?;
        }

        tracing::info!(user_id = %identity.user_id, "sync cycle complete");
        let _ = self.events.send(SyncEvent::SyncComplete { at });
        Ok(())
    }

    /// Replay unsynced session entries through the engine. Entries that
    /// no longer parse are skipped and left unsynced; the sweep keeps
    /// going and their ids are returned so they are not acknowledged.
    fn drain_queue_locally(&self, today: NaiveDate) -> Result<Vec<Uuid>> {
        let mut inner = self.lock();
        let inner = &mut *inner;

        let pending: Vec<_> = inner
            .queue
            .list_unsynced(QueueKind::Session)
            .into_iter()
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut snapshot = inner.store.read_snapshot();
        let mut changed = false;
        let mut unreadable = Vec::new();
        for entry in pending {
            match serde_json::from_value::<SessionRecord>(entry.payload.clone()) {
                Ok(session) => {
                    changed |= apply_session(&mut snapshot, session, today);
                }
                Err(err) => {
                    tracing::warn!(id = %entry.id, %err, "skipping unreadable queue entry");
                    unreadable.push(entry.id);
                }
            }
        }

        if changed {
            inner.store.write_snapshot(&snapshot)?;
            inner.store.flush()?;
        }
        Ok(unreadable)
    }

    fn fail_cycle(&self, step: &str, err: SyncError) -> Result<()> {
        let retryable = err.is_transient();
        if retryable {
            tracing::warn!(step, error = %err, "sync cycle aborted, will retry");
        } else {
            tracing::error!(step, error = %err, "sync cycle aborted");
        }
        let _ = self.events.send(SyncEvent::SyncError {
            reason: err.to_string(),
            retryable,
        });
        Err(err)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another cycle panicked mid-step;
        // the store and queue are still structurally valid.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<R, I> SyncOrchestrator<R, I>
where
    R: RemoteTransport + 'static,
    I: IdentityProvider + 'static,
{
    /// Run the periodic trigger loop until the handle is aborted.
    pub fn spawn_periodic(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.sync_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                if let Err(err) = this.handle_trigger(SyncTrigger::Periodic).await {
                    if err.is_transient() {
                        tracing::debug!(error = %err, "periodic sync deferred");
                    } else {
                        tracing::warn!(error = %err, "periodic sync failed");
                    }
                }
            }
        })
    }
}

fn now_ms() -> Timestamp {
    Utc::now().timestamp_millis() as Timestamp
}
