//! Client configuration.
//!
//! A `ClientConfig` is built once and shared read-only by every call the
//! client makes. `Debug` output never includes the API key.

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

/// Production endpoint used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.notify.dev";

/// Default per-call timeout: 30 seconds.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

pub const ENV_API_KEY: &str = "NOTIFY_API_KEY";
pub const ENV_BASE_URL: &str = "NOTIFY_BASE_URL";
pub const ENV_TIMEOUT_SECS: &str = "NOTIFY_TIMEOUT_SECS";
pub const ENV_MAX_RETRIES: &str = "NOTIFY_MAX_RETRIES";

#[derive(Clone)]
pub struct ClientConfig {
    api_key: String,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    user_agent: String,
}

impl ClientConfig {
    pub fn builder(api_key: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(api_key)
    }

    /// Shorthand for a config with every default except the API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::builder(api_key).build()
    }

    /// Load from `NOTIFY_API_KEY` (required), `NOTIFY_BASE_URL`,
    /// `NOTIFY_TIMEOUT_SECS` and `NOTIFY_MAX_RETRIES`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key =
            lookup(ENV_API_KEY).ok_or_else(|| Error::Config(format!("{ENV_API_KEY} is not set")))?;
        let mut builder = Self::builder(api_key);

        if let Some(base_url) = lookup(ENV_BASE_URL) {
            builder = builder.base_url(base_url);
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| Error::Config(format!("{ENV_TIMEOUT_SECS} is not a number: {raw}")))?;
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(raw) = lookup(ENV_MAX_RETRIES) {
            let retries = raw
                .trim()
                .parse::<u32>()
                .map_err(|_| Error::Config(format!("{ENV_MAX_RETRIES} is not a number: {raw}")))?;
            builder = builder.max_retries(retries);
        }

        builder.build()
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Builder for [`ClientConfig`]. Validation happens in [`build`](Self::build).
#[derive(Clone)]
pub struct ClientConfigBuilder {
    api_key: String,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    user_agent: String,
}

impl ClientConfigBuilder {
    fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            user_agent: default_user_agent(),
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Validate and freeze the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the API key is blank, the base URL is
    /// not an absolute http(s) URL, or the timeout is zero.
    pub fn build(self) -> Result<ClientConfig> {
        let api_key = self.api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(Error::Config("API key must not be empty".to_string()));
        }

        let base_url = self.base_url.trim().trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("invalid base URL {base_url:?}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "base URL must use http or https, got {}",
                parsed.scheme()
            )));
        }

        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than zero".to_string()));
        }

        let user_agent = if self.user_agent.trim().is_empty() {
            default_user_agent()
        } else {
            self.user_agent
        };

        Ok(ClientConfig {
            api_key,
            base_url,
            timeout: self.timeout,
            max_retries: self.max_retries,
            user_agent,
        })
    }
}

fn default_user_agent() -> String {
    format!("notify-core/{}", env!("CARGO_PKG_VERSION"))
}
