use std::time::Duration;

use serde::Deserialize;

use crate::config::ConfigError;

pub const DEFAULT_BASE_URL: &str = "https://api.mcs3.miele.com";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const MIN_POLL_INTERVAL_SECS: u64 = 1;
pub const MAX_POLL_INTERVAL_SECS: u64 = 60;

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_request_timeout() -> u64 {
    10
}

/// Configuration for the Miele cloud integration
#[derive(Clone, Deserialize)]
pub struct Config {
    /// OAuth bearer token for the Miele 3rd-party API
    pub access_token: String,

    /// API root, without a trailing `/v1`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Language for localized values (`value_localized`, type names)
    #[serde(default = "default_language")]
    pub language: String,

    /// Seconds between device listing polls (1-60)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

// Keep the token out of logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("access_token", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("language", &self.language)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_token.trim().is_empty() {
            return Err(ConfigError::invalid(
                "integrations.miele.access_token",
                "must not be empty",
            ));
        }
        if self.language.trim().is_empty() {
            return Err(ConfigError::invalid(
                "integrations.miele.language",
                "must not be empty",
            ));
        }
        if !(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&self.poll_interval_secs) {
            return Err(ConfigError::invalid(
                "integrations.miele.poll_interval_secs",
                format!(
                    "must be between {} and {} seconds, got {}",
                    MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS, self.poll_interval_secs
                ),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "integrations.miele.request_timeout_secs",
                "must be greater than zero",
            ));
        }
        if !(self.base_url.starts_with("https://") || self.base_url.starts_with("http://")) {
            return Err(ConfigError::invalid(
                "integrations.miele.base_url",
                format!("expected an http(s) URL, got {:?}", self.base_url),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests(base_url: &str) -> Self {
        Self {
            access_token: "token".to_string(),
            base_url: base_url.to_string(),
            language: default_language(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            request_timeout_secs: default_request_timeout(),
        }
    }
}
