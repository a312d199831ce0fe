//! Error types for the notify client.
//!
//! # Design
//! Two failure families reach callers. `Api` is a response the service
//! actually sent (non-2xx, not retried, or a 429 after the retry budget ran
//! out). `Transport` means no response arrived at all; it is retried with
//! exponential backoff before being surfaced unchanged.

use serde_json::Value;
use thiserror::Error;

/// Result type alias for notify client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the client and its resource wrappers.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Status code of the response behind this error, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api(e) => Some(e.status),
            _ => None,
        }
    }
}

/// A non-2xx response from the service.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("HTTP {status}: {message}")]
pub struct ApiError {
    pub status: u16,
    /// The body's `message` field, or `HTTP <status>` when absent or blank.
    pub message: String,
    /// Parsed response body, kept for diagnostics.
    pub body: Value,
}

impl ApiError {
    pub fn new(status: u16, body: Value) -> Self {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {status}"));
        Self {
            status,
            message,
            body,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// The request never produced a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The per-call timeout elapsed.
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other failure while sending or reading the response.
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}
