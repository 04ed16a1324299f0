//! Environment-backed runtime configuration for `sync-smoke`.

use std::{env, error::Error, fmt, path::PathBuf};

use sync_core::SyncTuning;

const DEFAULT_BASE_URL: &str = "https://api.example.org";
const DEFAULT_STORE_PATH: &str = "./.tripchat-smoke-store.json";

/// Runtime configuration used by the smoke binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    /// API base URL.
    pub base_url: String,
    /// Bearer token; without it the smoke run stays offline.
    pub auth_token: Option<String>,
    /// Viewer user ID; own messages never count unread.
    pub viewer_id: Option<String>,
    /// Location of the JSON key-value store file.
    pub store_path: PathBuf,
    /// Optional engine tuning forwarded to `ChatCommand::Init`.
    pub tuning: Option<SyncTuning>,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let base_url = optional_trimmed_env("TRIPCHAT_API_BASE_URL", &mut lookup)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        let auth_token = optional_trimmed_env("TRIPCHAT_API_TOKEN", &mut lookup);
        let viewer_id = optional_trimmed_env("TRIPCHAT_VIEWER_ID", &mut lookup);
        let store_path = optional_trimmed_env("TRIPCHAT_STORE_PATH", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH));

        let tuning = SyncTuning {
            poll_base_ms: parse_optional_u64("TRIPCHAT_POLL_BASE_MS", &mut lookup)?,
            poll_step_ms: parse_optional_u64("TRIPCHAT_POLL_STEP_MS", &mut lookup)?,
            poll_max_ms: parse_optional_u64("TRIPCHAT_POLL_MAX_MS", &mut lookup)?,
            poll_idle_after_ms: parse_optional_u64("TRIPCHAT_POLL_IDLE_AFTER_MS", &mut lookup)?,
            poll_failure_threshold: parse_optional_u32(
                "TRIPCHAT_POLL_FAILURE_THRESHOLD",
                &mut lookup,
            )?,
            unread_sweep_interval_ms: parse_optional_u64(
                "TRIPCHAT_UNREAD_SWEEP_INTERVAL_MS",
                &mut lookup,
            )?,
            unread_window: parse_optional_u16("TRIPCHAT_UNREAD_WINDOW", &mut lookup)?,
            page_size: parse_optional_u16("TRIPCHAT_PAGE_SIZE", &mut lookup)?,
            log_max_items: parse_optional_usize("TRIPCHAT_LOG_MAX_ITEMS", &mut lookup)?,
            request_timeout_ms: parse_optional_u64("TRIPCHAT_REQUEST_TIMEOUT_MS", &mut lookup)?,
        };
        let tuning = if tuning == SyncTuning::default() {
            None
        } else {
            Some(tuning)
        };

        Ok(Self {
            base_url,
            auth_token,
            viewer_id,
            store_path,
            tuning,
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u16<F>(key: &'static str, lookup: &mut F) -> Result<Option<u16>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .parse::<u16>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u32<F>(key: &'static str, lookup: &mut F) -> Result<Option<u32>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .parse::<u32>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_usize<F>(key: &'static str, lookup: &mut F) -> Result<Option<usize>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .parse::<usize>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<SmokeConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        SmokeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn falls_back_to_defaults_without_environment() {
        let cfg = config_from_pairs(&[]).expect("empty config should parse");
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.auth_token, None);
        assert_eq!(cfg.viewer_id, None);
        assert_eq!(cfg.store_path, PathBuf::from(DEFAULT_STORE_PATH));
        assert!(cfg.tuning.is_none());
    }

    #[test]
    fn parses_connection_fields() {
        let cfg = config_from_pairs(&[
            ("TRIPCHAT_API_BASE_URL", "https://api.tripchat.test"),
            ("TRIPCHAT_API_TOKEN", "secret-token"),
            ("TRIPCHAT_VIEWER_ID", "user-me"),
            ("TRIPCHAT_STORE_PATH", "/tmp/tripchat-store.json"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.base_url, "https://api.tripchat.test");
        assert_eq!(cfg.auth_token.as_deref(), Some("secret-token"));
        assert_eq!(cfg.viewer_id.as_deref(), Some("user-me"));
        assert_eq!(cfg.store_path, PathBuf::from("/tmp/tripchat-store.json"));
    }

    #[test]
    fn parses_engine_tuning_when_present() {
        let cfg = config_from_pairs(&[
            ("TRIPCHAT_POLL_BASE_MS", "2000"),
            ("TRIPCHAT_UNREAD_WINDOW", "25"),
        ])
        .expect("config should parse");

        let tuning = cfg.tuning.expect("tuning should be present");
        assert_eq!(tuning.poll_base_ms, Some(2_000));
        assert_eq!(tuning.unread_window, Some(25));
        assert_eq!(tuning.poll_max_ms, None);
    }

    #[test]
    fn rejects_invalid_numeric_values() {
        let err = config_from_pairs(&[("TRIPCHAT_POLL_BASE_MS", "fast")])
            .expect_err("invalid poll base should fail");

        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "TRIPCHAT_POLL_BASE_MS",
                ..
            }
        ));
    }

    #[test]
    fn blank_values_read_as_unset() {
        let cfg = config_from_pairs(&[("TRIPCHAT_API_TOKEN", "   ")])
            .expect("blank token should parse");
        assert_eq!(cfg.auth_token, None);
    }
}
