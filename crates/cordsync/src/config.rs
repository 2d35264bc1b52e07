//! Configuration for the REST side of the mirror.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::SyncError;

/// Default REST API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://discord.com/api/v6";

const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 300;

/// Settings used by [`HttpSink`](crate::HttpSink).
///
/// ```
/// use cordsync::ClientConfig;
///
/// let config = ClientConfig::default()
///     .with_token("bot-token")
///     .with_timeout_secs(15);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL that endpoint paths are appended to.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Bot token sent as `Authorization: Bot <token>`.
    ///
    /// Never serialized.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Value of the `User-Agent` header.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!(
        "DiscordBot (https://github.com/cordsync/cordsync, {})",
        env!("CARGO_PKG_VERSION")
    )
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            token: None,
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// Keeps the token out of logs.
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("user_agent", &self.user_agent)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ClientConfig {
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Check the configuration for values the HTTP sink cannot use.
    pub fn validate(&self) -> Result<(), SyncError> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            return Err(SyncError::Config(format!(
                "api_base_url must be an http(s) URL, got '{}'",
                self.api_base_url
            )));
        }
        if matches!(&self.token, Some(token) if token.trim().is_empty()) {
            return Err(SyncError::Config("token must not be empty".to_string()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(SyncError::Config("user_agent must not be empty".to_string()));
        }
        for (name, secs) in [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("timeout_secs", self.timeout_secs),
        ] {
            if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&secs) {
                return Err(SyncError::Config(format!(
                    "{} must be between {} and {}, got {}",
                    name, MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS, secs
                )));
            }
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub(crate) fn base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }
}
