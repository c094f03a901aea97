use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest page the wall method accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error occurred reading {path}: {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    ParseError {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid option {0}")]
    Invalid(String),
}

/// # Retry Options
///
/// Fixed retry policy shared by every remote call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryOptions {
    /// Attempts per remote call before giving up.
    pub max_attempts: u32,
    /// Pause after a "too many requests" answer, in milliseconds.
    pub too_many_requests_delay_ms: u64,
    /// Upper bound on rate-limit waits for calls where they do not consume an attempt.
    pub max_rate_limit_waits: u32,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            too_many_requests_delay_ms: 150,
            max_rate_limit_waits: 20,
        }
    }
}

impl RetryOptions {
    pub fn too_many_requests_delay(&self) -> Duration {
        Duration::from_millis(self.too_many_requests_delay_ms)
    }
}

/// # Long Poll Options
///
/// Settings of the direct-message watcher.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct LongPollOptions {
    /// Version of the long poll protocol requested on handshake and history calls.
    pub long_poll_version: u32,
    /// No activity in a row max sleep steps multiplier.
    pub max_sleep_steps: u32,
    /// Sleep time of one step in milliseconds.
    pub step_sleep_time_msec: u64,
    /// Characters of message text to return in history, `None` for the full text.
    pub history_preview_length: Option<u32>,
    /// Whether friends' online/offline events are included in history.
    pub history_onlines: bool,
    /// Profile fields requested along with history.
    pub history_fields: Vec<String>,
}

impl Default for LongPollOptions {
    fn default() -> Self {
        Self {
            long_poll_version: 2,
            max_sleep_steps: 3,
            step_sleep_time_msec: 333,
            history_preview_length: None,
            history_onlines: false,
            history_fields: Vec::new(),
        }
    }
}

/// # Wall Watch Options
///
/// Settings of the wall watcher and its page fetcher.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct WallWatchOptions {
    /// Size of the first page of each watch tick.
    pub probe_load_count: u32,
    /// Size of every other page, at most 100.
    pub max_load_count: u32,
    /// Emit posts page by page instead of once the whole tick is loaded.
    pub inform_immediately: bool,
    /// No new posts in a row max sleep steps multiplier.
    pub max_sleep_steps: u32,
    /// Sleep time of one step in milliseconds.
    pub step_sleep_time_msec: u64,
}

impl Default for WallWatchOptions {
    fn default() -> Self {
        Self {
            probe_load_count: 10,
            max_load_count: MAX_PAGE_SIZE,
            inform_immediately: true,
            max_sleep_steps: 3,
            step_sleep_time_msec: 5000,
        }
    }
}

impl WallWatchOptions {
    /// Page size clamped to what the wall method accepts.
    pub fn page_size(&self) -> u32 {
        self.max_load_count.clamp(1, MAX_PAGE_SIZE)
    }

    /// Probe size, never larger than the regular page size.
    pub fn probe_size(&self) -> u32 {
        self.probe_load_count.clamp(1, self.page_size())
    }
}

/// # API Options
///
/// Connection settings of the HTTP method client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiOptions {
    pub base_url: String,
    pub access_token: Option<String>,
    pub api_version: String,
    /// Account the token belongs to, used in log lines.
    pub user_id: Option<i64>,
    pub request_timeout_secs: u64,
}

impl Default for ApiOptions {
    fn default() -> Self {
        Self {
            base_url: "https://api.vk.com/".to_string(),
            access_token: None,
            api_version: "5.131".to_string(),
            user_id: None,
            request_timeout_secs: 35,
        }
    }
}

/// # Watch Config
///
/// Everything a process needs to run one message watcher and a set of wall watchers.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchConfig {
    pub api: ApiOptions,
    pub retry: RetryOptions,
    pub long_poll: LongPollOptions,
    pub wall: WallWatchOptions,
    /// Walls to watch; negative ids are communities.
    pub walls: Vec<i64>,
    /// Whether the message watcher runs at all.
    pub watch_messages: bool,
}

impl WatchConfig {
    /// Rejects combinations the watchers cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.maxAttempts must be at least 1".into()));
        }
        if self.long_poll.max_sleep_steps == 0 || self.wall.max_sleep_steps == 0 {
            return Err(ConfigError::Invalid("maxSleepSteps must be at least 1".into()));
        }
        if self.wall.max_load_count > MAX_PAGE_SIZE {
            log::warn!(
                "wall.maxLoadCount {} exceeds {}, pages will be clamped",
                self.wall.max_load_count,
                MAX_PAGE_SIZE
            );
        }
        Ok(())
    }
}

/// Reads a [`WatchConfig`] from a JSON file and validates it.
pub fn load_from_path(path: &Path) -> Result<WatchConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::IoError {
        path: path.display().to_string(),
        source,
    })?;
    let config: WatchConfig =
        serde_json::from_str(&text).map_err(|source| ConfigError::ParseError {
            path: path.display().to_string(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = WatchConfig::default();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.too_many_requests_delay(), Duration::from_millis(150));
        assert_eq!(config.long_poll.max_sleep_steps, 3);
        assert_eq!(config.long_poll.step_sleep_time_msec, 333);
        assert_eq!(config.wall.step_sleep_time_msec, 5000);
        assert_eq!(config.wall.probe_load_count, 10);
        assert!(config.wall.inform_immediately);
    }

    #[test]
    fn test_page_size_is_clamped() {
        let wall = WallWatchOptions {
            max_load_count: 250,
            probe_load_count: 500,
            ..Default::default()
        };
        assert_eq!(wall.page_size(), 100);
        assert_eq!(wall.probe_size(), 100);

        let tiny = WallWatchOptions {
            max_load_count: 0,
            probe_load_count: 0,
            ..Default::default()
        };
        assert_eq!(tiny.page_size(), 1);
        assert_eq!(tiny.probe_size(), 1);
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "api": {{ "accessToken": "abc", "userId": 7 }},
                "longPoll": {{ "maxSleepSteps": 5 }},
                "walls": [-1, -42]
            }}"#
        )
        .unwrap();

        let config = load_from_path(file.path()).unwrap();
        assert_eq!(config.api.access_token.as_deref(), Some("abc"));
        assert_eq!(config.api.user_id, Some(7));
        assert_eq!(config.api.api_version, "5.131");
        assert_eq!(config.long_poll.max_sleep_steps, 5);
        assert_eq!(config.long_poll.step_sleep_time_msec, 333);
        assert_eq!(config.walls, vec![-1, -42]);
    }

    #[test]
    fn test_load_rejects_zero_attempts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "retry": {{ "maxAttempts": 0 }} }}"#).unwrap();

        let err = load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
