//! SFU service configuration.
//!
//! Configuration is loaded from environment variables. Every value has a
//! default; malformed numeric or enum values are rejected rather than
//! silently replaced.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default lower bound of the media worker RTC port range.
pub const DEFAULT_RTC_MIN_PORT: u16 = 40000;

/// Default upper bound of the media worker RTC port range.
pub const DEFAULT_RTC_MAX_PORT: u16 = 49999;

/// Default IP announced in ICE candidates.
pub const DEFAULT_ANNOUNCED_IP: &str = "127.0.0.1";

/// Default directory for recording output and stream descriptions.
pub const DEFAULT_RECORDINGS_DIR: &str = "recordings";

/// Default transcoder executable.
pub const DEFAULT_TRANSCODER_PATH: &str = "ffmpeg";

/// Default composite recording bounding box.
pub const DEFAULT_RECORDING_MAX_WIDTH: u32 = 1920;
pub const DEFAULT_RECORDING_MAX_HEIGHT: u32 = 1080;

/// Default delay between transcoder spawn and consumer resume.
pub const DEFAULT_RECORDING_SETTLE_DELAY_MS: u64 = 500;

/// Default keyframe request interval during recording.
pub const DEFAULT_KEYFRAME_INTERVAL_MS: u64 = 2000;

/// Default page size for chat history.
pub const DEFAULT_CHAT_HISTORY_LIMIT: usize = 50;

/// Default base URL used to build recording download links.
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:3000";

/// What to do when a join names a `(roomId, userId)` that is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateJoinPolicy {
    /// Refuse the second join with an error reply.
    Reject,
    /// Tear down the prior session (closing its media) and admit the new one.
    Replace,
    /// Replace the peer entry without closing the prior session's handles.
    Overwrite,
}

impl DuplicateJoinPolicy {
    /// Returns the configuration token for the policy.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DuplicateJoinPolicy::Reject => "reject",
            DuplicateJoinPolicy::Replace => "replace",
            DuplicateJoinPolicy::Overwrite => "overwrite",
        }
    }
}

impl fmt::Display for DuplicateJoinPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicateJoinPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(DuplicateJoinPolicy::Reject),
            "replace" => Ok(DuplicateJoinPolicy::Replace),
            "overwrite" => Ok(DuplicateJoinPolicy::Overwrite),
            other => Err(ConfigError::InvalidValue(format!(
                "SFU_DUPLICATE_JOIN_POLICY must be reject, replace or overwrite, got {other}"
            ))),
        }
    }
}

/// SFU service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket bind address (default: "0.0.0.0:3000").
    pub bind_address: String,

    /// Number of media workers (default: max(1, logical cores / 2)).
    pub worker_count: usize,

    /// Lowest RTC port a worker may bind.
    pub rtc_min_port: u16,

    /// Highest RTC port a worker may bind.
    pub rtc_max_port: u16,

    /// IP announced in ICE candidates.
    pub announced_ip: String,

    /// Directory for recording output and stream-description files.
    pub recordings_dir: PathBuf,

    /// Transcoder executable path.
    pub transcoder_path: String,

    /// Composite recording bounding width.
    pub recording_max_width: u32,

    /// Composite recording bounding height.
    pub recording_max_height: u32,

    /// Delay between transcoder spawn and consumer resume (ms).
    pub recording_settle_delay_ms: u64,

    /// Interval between keyframe requests while recording (ms).
    pub keyframe_interval_ms: u64,

    /// Behavior for a join that collides with an existing peer.
    pub duplicate_join_policy: DuplicateJoinPolicy,

    /// Default chat history page size.
    pub chat_history_limit: usize,

    /// Base URL for recording download links.
    pub public_base_url: String,

    /// Emit JSON-formatted logs.
    pub log_json: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("SFU_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let worker_count = match vars.get("SFU_WORKER_COUNT") {
            Some(raw) => {
                let count: usize = parse_value("SFU_WORKER_COUNT", raw)?;
                if count == 0 {
                    return Err(ConfigError::InvalidValue(
                        "SFU_WORKER_COUNT must be at least 1".to_string(),
                    ));
                }
                count
            }
            None => default_worker_count(),
        };

        let rtc_min_port = optional_value(vars, "SFU_RTC_MIN_PORT", DEFAULT_RTC_MIN_PORT)?;
        let rtc_max_port = optional_value(vars, "SFU_RTC_MAX_PORT", DEFAULT_RTC_MAX_PORT)?;
        if rtc_min_port > rtc_max_port {
            return Err(ConfigError::InvalidValue(format!(
                "SFU_RTC_MIN_PORT ({rtc_min_port}) must not exceed SFU_RTC_MAX_PORT ({rtc_max_port})"
            )));
        }

        let announced_ip = vars
            .get("SFU_ANNOUNCED_IP")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ANNOUNCED_IP.to_string());

        let recordings_dir = vars
            .get("SFU_RECORDINGS_DIR")
            .map_or_else(|| PathBuf::from(DEFAULT_RECORDINGS_DIR), PathBuf::from);

        let transcoder_path = vars
            .get("SFU_TRANSCODER_PATH")
            .cloned()
            .unwrap_or_else(|| DEFAULT_TRANSCODER_PATH.to_string());

        let recording_max_width = optional_value(
            vars,
            "SFU_RECORDING_MAX_WIDTH",
            DEFAULT_RECORDING_MAX_WIDTH,
        )?;
        let recording_max_height = optional_value(
            vars,
            "SFU_RECORDING_MAX_HEIGHT",
            DEFAULT_RECORDING_MAX_HEIGHT,
        )?;
        if recording_max_width == 0 || recording_max_height == 0 {
            return Err(ConfigError::InvalidValue(
                "recording dimensions must be non-zero".to_string(),
            ));
        }

        let recording_settle_delay_ms = optional_value(
            vars,
            "SFU_RECORDING_SETTLE_DELAY_MS",
            DEFAULT_RECORDING_SETTLE_DELAY_MS,
        )?;

        let keyframe_interval_ms = optional_value(
            vars,
            "SFU_KEYFRAME_INTERVAL_MS",
            DEFAULT_KEYFRAME_INTERVAL_MS,
        )?;
        if keyframe_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "SFU_KEYFRAME_INTERVAL_MS must be non-zero".to_string(),
            ));
        }

        let duplicate_join_policy = match vars.get("SFU_DUPLICATE_JOIN_POLICY") {
            Some(raw) => raw.parse()?,
            None => DuplicateJoinPolicy::Replace,
        };

        let chat_history_limit = optional_value(
            vars,
            "SFU_CHAT_HISTORY_LIMIT",
            DEFAULT_CHAT_HISTORY_LIMIT,
        )?;

        let public_base_url = vars
            .get("SFU_PUBLIC_BASE_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_PUBLIC_BASE_URL.to_string());

        let log_json = optional_value(vars, "SFU_LOG_JSON", false)?;

        Ok(Config {
            bind_address,
            worker_count,
            rtc_min_port,
            rtc_max_port,
            announced_ip,
            recordings_dir,
            transcoder_path,
            recording_max_width,
            recording_max_height,
            recording_settle_delay_ms,
            keyframe_interval_ms,
            duplicate_join_policy,
            chat_history_limit,
            public_base_url,
            log_json,
        })
    }

    /// Delay between transcoder spawn and consumer resume.
    #[must_use]
    pub fn recording_settle_delay(&self) -> Duration {
        Duration::from_millis(self.recording_settle_delay_ms)
    }

    /// Interval between keyframe requests while recording.
    #[must_use]
    pub fn keyframe_interval(&self) -> Duration {
        Duration::from_millis(self.keyframe_interval_ms)
    }
}

/// Half of the host's logical cores, at least one.
#[must_use]
pub fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    (cores / 2).max(1)
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}")))
}

fn optional_value<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    vars.get(name)
        .map_or(Ok(default), |raw| parse_value(name, raw))
}
