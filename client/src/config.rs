//! Configuration for the sync client.

use std::env;
use std::time::Duration;

/// Sync client configuration.
///
/// `Default` gives the values the application ships with; [`SyncConfig::from_env`]
/// lets a host override them through environment variables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the account service (e.g. `https://api.example.com`)
    pub base_url: String,
    /// Interval between periodic background sync cycles
    pub sync_interval: Duration,
    /// How long the app must have been idle for regained attention to
    /// trigger a pull-only cycle
    pub attention_idle_threshold: Duration,
    /// Login age below which pre-existing local data is presumed to be
    /// another identity's leftovers
    pub login_trust_window: Duration,
    /// Minimum number of local sessions that counts as "non-trivial"
    /// data for contamination detection
    pub contamination_min_sessions: usize,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            sync_interval: Duration::from_secs(300),
            attention_idle_threshold: Duration::from_secs(600),
            login_trust_window: Duration::from_secs(30),
            contamination_min_sessions: 1,
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let base_url = env::var("TEMPO_API_URL").unwrap_or(defaults.base_url);

        let sync_interval = read_secs("TEMPO_SYNC_INTERVAL_SECS", defaults.sync_interval)?;
        let attention_idle_threshold =
            read_secs("TEMPO_ATTENTION_IDLE_SECS", defaults.attention_idle_threshold)?;
        let login_trust_window =
            read_secs("TEMPO_LOGIN_TRUST_WINDOW_SECS", defaults.login_trust_window)?;
        let request_timeout = read_secs("TEMPO_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?;

        Ok(Self {
            base_url,
            sync_interval,
            attention_idle_threshold,
            login_trust_window,
            contamination_min_sessions: defaults.contamination_min_sessions,
            request_timeout,
        })
    }
}

fn read_secs(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidDuration(var)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid duration value for {0}")]
    InvalidDuration(&'static str),
}
