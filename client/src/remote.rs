//! Remote transport - how snapshots move between device and account.
//!
//! The orchestrator only ever sees the [`RemoteTransport`] trait; the
//! HTTP implementation lives here, and tests swap in in-memory fakes.
//!
//! Failure classification is part of the contract: transport faults and
//! 5xx responses come back as [`SyncError::RemoteUnavailable`] (retry
//! later), 4xx responses as [`SyncError::RemoteRejected`] (retrying the
//! same payload cannot help).

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempo_engine::{SessionRecord, Streaks, TaskRecord, Timestamp, UserSnapshot};

/// Server acknowledgement of an accepted push.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerAck {
    #[serde(default)]
    pub accepted: bool,
    #[serde(default)]
    pub server_time: Option<Timestamp>,
}

/// Pull/push endpoint pair against the account store.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Fetch the account's full snapshot. A user with no server-side
    /// data yet yields an empty snapshot, not an error.
    async fn pull(&self, user_id: &str) -> Result<UserSnapshot>;

    /// Upload the merged snapshot as the account's new state.
    async fn push(&self, user_id: &str, snapshot: &UserSnapshot) -> Result<ServerAck>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    data: UserSnapshot,
}

/// The push body names its fields explicitly so the upload can never
/// grow extra keys the server does not expect.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncPayload<'a> {
    sessions: &'a [SessionRecord],
    tasks: &'a [TaskRecord],
    streaks: &'a Streaks,
}

/// [`RemoteTransport`] over the account service's REST API.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::RemoteUnavailable(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn user_url(&self, user_id: &str, tail: &str) -> String {
        format!("{}/api/user/{user_id}/{tail}", self.base_url)
    }
}

#[async_trait]
impl RemoteTransport for HttpRemote {
    async fn pull(&self, user_id: &str) -> Result<UserSnapshot> {
        let url = self.user_url(user_id, "data");
        tracing::debug!(%url, "pulling account snapshot");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::RemoteUnavailable(e.to_string()))?;

        let response = classify_status(response)?;
        let body: PullResponse = response
            .json()
            .await
            .map_err(|e| SyncError::RemoteRejected(format!("malformed pull response: {e}")))?;
        Ok(body.data)
    }

    async fn push(&self, user_id: &str, snapshot: &UserSnapshot) -> Result<ServerAck> {
        let url = self.user_url(user_id, "sync");
        tracing::debug!(
            %url,
            sessions = snapshot.sessions.len(),
            tasks = snapshot.tasks.len(),
            "pushing merged snapshot"
        );

        let payload = SyncPayload {
            sessions: &snapshot.sessions,
            tasks: &snapshot.tasks,
            streaks: &snapshot.streaks,
        };

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SyncError::RemoteUnavailable(e.to_string()))?;

        let response = classify_status(response)?;
        let ack: ServerAck = response
            .json()
            .await
            .map_err(|e| SyncError::RemoteRejected(format!("malformed sync response: {e}")))?;
        Ok(ack)
    }
}

fn classify_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status.is_server_error() {
        Err(SyncError::RemoteUnavailable(format!("server returned {status}")))
    } else {
        Err(SyncError::RemoteRejected(format!("server returned {status}")))
    }
}
