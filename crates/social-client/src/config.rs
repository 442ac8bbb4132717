//! Client setup, optionally read from the process environment.

use std::{collections::HashMap, env, path::PathBuf, time::Duration};

use social_core::RetryPolicy;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.example.com/";
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_FEED_MAX_ITEMS: usize = 500;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_NOTICE_BUFFER: usize = 64;
const DEFAULT_SESSION_SERVICE: &str = "social-client";

/// Runtime configuration of one client context.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Application token issued by the service; sent as the basic-auth user.
    pub app_token: String,
    /// Service base URL, always ending in `/`.
    pub api_base: Url,
    /// Automatic event flush period. Zero disables the timer.
    pub flush_interval: Duration,
    /// Tracing filter used when neither `RUST_LOG` nor `SOCIAL_CLIENT_LOG` is set.
    pub log_filter: Option<String>,
    pub retry_policy: RetryPolicy,
    /// Cap on cached feed entries.
    pub feed_max_items: usize,
    pub request_timeout: Duration,
    /// Capacity of the notice broadcast buffer.
    pub notice_buffer: usize,
    /// JSON file used for session persistence when no other store is wired.
    pub session_store_path: Option<PathBuf>,
    /// Service name under which the session is persisted.
    pub session_service: String,
}

impl ClientConfig {
    pub fn new(app_token: impl Into<String>, api_base: Url) -> Self {
        Self {
            app_token: app_token.into(),
            api_base: with_trailing_slash(api_base),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            log_filter: None,
            retry_policy: RetryPolicy::default(),
            feed_max_items: DEFAULT_FEED_MAX_ITEMS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            notice_buffer: DEFAULT_NOTICE_BUFFER,
            session_store_path: None,
            session_service: DEFAULT_SESSION_SERVICE.to_owned(),
        }
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Result<Self, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        Self::from_lookup(|key| map.get(key).cloned())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let app_token = optional_trimmed_env("SOCIAL_APP_TOKEN", &mut lookup)
            .ok_or(ConfigError::Missing("SOCIAL_APP_TOKEN"))?;
        let api_base = optional_trimmed_env("SOCIAL_API_BASE", &mut lookup)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_owned());
        let mut config = Self::new(app_token, parse_api_base("SOCIAL_API_BASE", &api_base)?);

        if let Some(secs) = parse_optional_u64("SOCIAL_FLUSH_INTERVAL_SECS", &mut lookup)? {
            config.flush_interval = Duration::from_secs(secs);
        }
        config.log_filter = optional_trimmed_env("SOCIAL_LOG", &mut lookup);

        let base_delay_ms = parse_optional_u64("SOCIAL_RETRY_BASE_MS", &mut lookup)?
            .unwrap_or(config.retry_policy.base_delay_ms());
        let max_delay_ms = parse_optional_u64("SOCIAL_RETRY_MAX_MS", &mut lookup)?
            .unwrap_or(config.retry_policy.max_delay_ms());
        let max_attempts = parse_optional_u32("SOCIAL_RETRY_MAX_ATTEMPTS", &mut lookup)?
            .unwrap_or(config.retry_policy.max_attempts());
        if max_delay_ms < base_delay_ms {
            return Err(ConfigError::InvalidValue {
                key: "SOCIAL_RETRY_MAX_MS",
                value: max_delay_ms.to_string(),
                reason: format!("must be at least the base delay ({base_delay_ms})"),
            });
        }
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SOCIAL_RETRY_MAX_ATTEMPTS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        config.retry_policy =
            RetryPolicy::new(base_delay_ms, max_delay_ms).with_max_attempts(max_attempts);

        if let Some(max_items) = parse_optional_u64("SOCIAL_FEED_MAX_ITEMS", &mut lookup)? {
            if max_items == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "SOCIAL_FEED_MAX_ITEMS",
                    value: "0".to_owned(),
                    reason: "must be at least 1".to_owned(),
                });
            }
            config.feed_max_items = usize::try_from(max_items).unwrap_or(usize::MAX);
        }
        if let Some(timeout_ms) = parse_optional_u64("SOCIAL_REQUEST_TIMEOUT_MS", &mut lookup)? {
            config.request_timeout = Duration::from_millis(timeout_ms);
        }
        config.session_store_path =
            optional_trimmed_env("SOCIAL_SESSION_FILE", &mut lookup).map(PathBuf::from);

        Ok(config)
    }
}

/// Errors produced while building a client configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required {0}")]
    Missing(&'static str),
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Relative joins drop the last path segment unless the base ends in `/`.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn parse_api_base(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|err| ConfigError::InvalidValue {
        key,
        value: value.to_owned(),
        reason: err.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_owned(),
            reason: "scheme must be http or https".to_owned(),
        });
    }
    Ok(with_trailing_slash(url))
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
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

fn parse_optional_u32<F>(key: &'static str, lookup: &mut F) -> Result<Option<u32>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
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
