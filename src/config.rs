//! Client Configuration
//!
//! Options recognized by both the live client and the replay engine, and
//! the credential wrapper used everywhere an access key travels.

use std::time::Duration;

use chrono::NaiveDate;

use crate::backoff;
use crate::provider::Provider;

/// Access-key wrapper whose `Debug` output redacts the key.
#[derive(Clone)]
pub struct Credentials {
    access_key: String,
}

impl Credentials {
    /// Wrap an access key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty.
    pub fn new(access_key: impl Into<String>) -> Result<Self, ConfigError> {
        let access_key = access_key.into();
        if access_key.trim().is_empty() {
            return Err(ConfigError::MissingAccessKey);
        }
        Ok(Self { access_key })
    }

    /// The raw access key.
    #[must_use]
    pub fn access_key(&self) -> &str {
        &self.access_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &"[REDACTED]")
            .finish()
    }
}

/// Configuration for [`crate::Client`] and [`crate::ReplayClient`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream feed. Selects auth and WebSocket hosts.
    pub provider: Provider,
    /// Host (optionally `host:port`) for [`Provider::Manual`]; plaintext
    /// HTTP/WS.
    pub ip_address: Option<String>,
    /// Client-wide trades-only default, OR'd with each channel's flag.
    pub trades_only: bool,
    /// Authenticate with an `Authorization: Public` header instead of an
    /// API-key query parameter, and skip process signal handlers.
    pub is_public_key: bool,
    /// Request the server-side delayed feed even when real-time is entitled.
    pub delayed: bool,
    /// Trading day to replay instead of streaming live.
    pub replay_date: Option<NaiveDate>,
    /// Pace replay output to wall-clock, reproducing inter-arrival gaps.
    pub replay_as_if_live: bool,
    /// Unlink downloaded tick files after the replay completes.
    pub replay_delete_file_when_done: bool,
    /// Install a Ctrl-C hook that stops the session. Off in library mode.
    pub handle_shutdown_signal: bool,
    /// Waits between self-heal attempts; the last entry repeats.
    pub reconnect_schedule: Vec<Duration>,
    /// Interval between application-level heartbeats while connected.
    pub heartbeat_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: Provider::Realtime,
            ip_address: None,
            trades_only: false,
            is_public_key: false,
            delayed: false,
            replay_date: None,
            replay_as_if_live: false,
            replay_delete_file_when_done: false,
            handle_shutdown_signal: false,
            reconnect_schedule: backoff::DEFAULT_SCHEDULE.to_vec(),
            heartbeat_interval: Duration::from_secs(20),
        }
    }
}

impl Config {
    /// Check the configuration for contradictions.
    ///
    /// # Errors
    ///
    /// Returns an error when `Manual` is selected without a host, or the
    /// reconnect schedule is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider == Provider::Manual
            && self.ip_address.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::MissingManualHost);
        }
        if self.reconnect_schedule.is_empty() {
            return Err(ConfigError::EmptyReconnectSchedule);
        }
        Ok(())
    }

    /// The manual host, when one applies.
    #[must_use]
    pub fn manual_host(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }
}

/// Construction-time configuration errors.
///
/// These are the only failures surfaced synchronously; everything
/// recoverable is handled inside the session and logged.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No access key was provided.
    #[error("access key must not be empty")]
    MissingAccessKey,

    /// `Provider::Manual` requires `ip_address`.
    #[error("provider MANUAL requires an ip_address")]
    MissingManualHost,

    /// The reconnect schedule has no entries to saturate on.
    #[error("reconnect schedule must not be empty")]
    EmptyReconnectSchedule,

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_reject_empty_key() {
        assert!(matches!(
            Credentials::new(""),
            Err(ConfigError::MissingAccessKey)
        ));
        assert!(matches!(
            Credentials::new("   "),
            Err(ConfigError::MissingAccessKey)
        ));
    }

    #[test]
    fn credentials_debug_redacts_key() {
        let creds = Credentials::new("super_secret_key").unwrap();
        let debug = format!("{creds:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super_secret_key"));
    }

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn manual_provider_requires_host() {
        let config = Config {
            provider: Provider::Manual,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingManualHost)
        ));

        let config = Config {
            provider: Provider::Manual,
            ip_address: Some("127.0.0.1:8080".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_reconnect_schedule_rejected() {
        let config = Config {
            reconnect_schedule: Vec::new(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyReconnectSchedule)
        ));
    }

    #[test]
    fn default_schedule_is_the_fixed_one() {
        let config = Config::default();
        assert_eq!(
            config.reconnect_schedule,
            vec![
                Duration::from_secs(10),
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(600),
            ]
        );
    }
}
