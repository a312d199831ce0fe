//! Request dispatcher: builds the request, runs it through a [`Transport`]
//! and applies the retry policy.
//!
//! # Retry policy
//! A call makes at most `1 + max_retries` attempts. For attempt index `a`
//! (starting at 0) a retry is allowed while `a < max_retries`; the same
//! predicate governs both retryable cases.
//!
//! - 2xx: the parsed body is returned.
//! - 429: sleep for `retry-after` seconds (1 s when absent or malformed).
//! - Transport failure: sleep for `2^a` seconds.
//! - Any other status, or a retryable case with no budget left: fail.
//!
//! Retry state lives only in the loop of a single call.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{ApiError, Error, Result, TransportError};
use crate::http::{ApiResponse, HttpMethod, HttpRequest, HttpResponse};
use crate::transport::{ReqwestTransport, Transport};

/// Tracing target for dispatcher events.
pub const TRACING_TARGET: &str = "notify_core::dispatch";

/// Delay before retrying a 429 that carries no usable `retry-after`.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Upper bound on a server-requested 429 delay.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Per-call additions to the request: header overrides and an idempotency
/// key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    headers: Vec<(String, String)>,
    idempotency_key: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header. It replaces any default header with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Use a fresh random idempotency key.
    pub fn with_generated_idempotency_key(self) -> Self {
        self.with_idempotency_key(Uuid::new_v4().to_string())
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }
}

/// How the dispatcher should treat one completed round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(ApiResponse),
    RateLimited {
        retry_after: Duration,
        error: ApiError,
    },
    Rejected(ApiError),
}

/// Classify a raw response.
///
/// A 429 waits for its `retry-after` (or [`DEFAULT_RETRY_AFTER`]), never
/// longer than [`MAX_RETRY_AFTER`].
pub fn classify(response: HttpResponse) -> Outcome {
    if response.is_success() {
        return Outcome::Success(ApiResponse::from_http(response));
    }

    let retry_after = response
        .retry_after()
        .unwrap_or(DEFAULT_RETRY_AFTER)
        .min(MAX_RETRY_AFTER);
    let parsed = ApiResponse::from_http(response);
    let error = ApiError::new(parsed.status, parsed.body);
    if error.is_rate_limited() {
        Outcome::RateLimited { retry_after, error }
    } else {
        Outcome::Rejected(error)
    }
}

/// Exponential backoff after a transport failure on attempt `attempt`:
/// 1 s, 2 s, 4 s, ...
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

/// Sends requests for the resource wrappers. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher over the default reqwest transport.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.timeout())?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolve `path` against the base URL.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.config.base_url())
        } else {
            format!("{}/{path}", self.config.base_url())
        }
    }

    /// Build the request for one call without sending it.
    ///
    /// A body passed with a method that does not carry one is dropped.
    pub fn build_request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<HttpRequest> {
        let mut headers = Vec::new();
        set_header(
            &mut headers,
            "authorization",
            format!("Bearer {}", self.config.api_key()),
        );
        set_header(&mut headers, "content-type", "application/json");
        set_header(&mut headers, "accept", "application/json");
        set_header(&mut headers, "user-agent", self.config.user_agent());
        if let Some(key) = options.idempotency_key() {
            set_header(&mut headers, IDEMPOTENCY_KEY_HEADER, key);
        }
        for (name, value) in &options.headers {
            set_header(&mut headers, name, value);
        }

        let body = match body {
            Some(value) if method.carries_body() => {
                let encoded = serde_json::to_string(value)?;
                set_header(&mut headers, "content-length", encoded.len().to_string());
                Some(encoded)
            }
            Some(_) => {
                debug!(
                    target: TRACING_TARGET,
                    %method,
                    path,
                    "Dropping body for method without payload"
                );
                None
            }
            None => None,
        };

        Ok(HttpRequest {
            method,
            url: self.url(path),
            headers,
            body,
        })
    }

    /// Send a call and return the parsed JSON body.
    pub async fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<Value> {
        self.send_raw(method, path, body, options)
            .await
            .map(ApiResponse::into_body)
    }

    /// Send a call and return status, headers and parsed body.
    pub async fn send_raw(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<ApiResponse> {
        let request = self.build_request(method, path, body, options)?;
        self.execute(&request).await
    }

    /// Run the retry loop for an already built request.
    pub async fn execute(&self, request: &HttpRequest) -> Result<ApiResponse> {
        let max_retries = self.config.max_retries();
        let mut last_error: Option<Error> = None;

        for attempt in 0..=max_retries {
            let retries_left = attempt < max_retries;

            debug!(
                target: TRACING_TARGET,
                method = %request.method,
                url = %request.url,
                attempt,
                max_retries,
                "Sending request"
            );

            match self.transport.execute(request).await {
                Ok(response) => match classify(response) {
                    Outcome::Success(response) => {
                        debug!(
                            target: TRACING_TARGET,
                            status = response.status,
                            attempt,
                            "Request succeeded"
                        );
                        return Ok(response);
                    }
                    Outcome::RateLimited { retry_after, error } if retries_left => {
                        warn!(
                            target: TRACING_TARGET,
                            url = %request.url,
                            attempt,
                            delay = ?retry_after,
                            "Rate limited, retrying"
                        );
                        last_error = Some(error.into());
                        tokio::time::sleep(retry_after).await;
                    }
                    Outcome::RateLimited { error, .. } | Outcome::Rejected(error) => {
                        debug!(
                            target: TRACING_TARGET,
                            status = error.status,
                            message = %error.message,
                            attempt,
                            "Request rejected"
                        );
                        return Err(error.into());
                    }
                },
                Err(err) if retries_left => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        target: TRACING_TARGET,
                        url = %request.url,
                        attempt,
                        ?delay,
                        error = %err,
                        "Transport failure, retrying"
                    );
                    last_error = Some(err.into());
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    debug!(
                        target: TRACING_TARGET,
                        url = %request.url,
                        attempt,
                        error = %err,
                        "Transport failure, retries exhausted"
                    );
                    return Err(err.into());
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TransportError::Request("request loop ended without an attempt".to_string()).into()
        }))
    }
}

/// Replace every header named `name` (any case) with a single value.
fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: impl Into<String>) {
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value.into()));
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::{dispatcher, respond, ScriptedTransport};
    use super::*;

    fn gaps(times: &[tokio::time::Instant]) -> Vec<Duration> {
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[test]
    fn build_request_sets_auth_and_json_headers() {
        let d = dispatcher(0, ScriptedTransport::new([]));
        let req = d
            .build_request(HttpMethod::Get, "/api/v1/flows", None, &RequestOptions::new())
            .unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://localhost:3000/api/v1/flows");
        assert_eq!(req.header("Authorization"), Some("Bearer sk_test"));
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert!(req.header("content-length").is_none());
        assert!(req.body.is_none());
    }

    #[test]
    fn build_request_encodes_body_with_length() {
        let d = dispatcher(0, ScriptedTransport::new([]));
        let body = json!({"name": "welcome"});
        let req = d
            .build_request(HttpMethod::Post, "api/v1/templates", Some(&body), &RequestOptions::new())
            .unwrap();
        assert_eq!(req.url, "http://localhost:3000/api/v1/templates");
        let encoded = req.body.as_deref().unwrap();
        assert_eq!(serde_json::from_str::<Value>(encoded).unwrap(), body);
        assert_eq!(req.header("content-length"), Some(encoded.len().to_string().as_str()));
    }

    #[test]
    fn build_request_drops_body_for_get() {
        let d = dispatcher(0, ScriptedTransport::new([]));
        let body = json!({"ignored": true});
        let req = d
            .build_request(HttpMethod::Get, "/api/v1/users", Some(&body), &RequestOptions::new())
            .unwrap();
        assert!(req.body.is_none());
    }

    #[test]
    fn caller_headers_override_defaults() {
        let d = dispatcher(0, ScriptedTransport::new([]));
        let options = RequestOptions::new()
            .header("Content-Type", "application/merge-patch+json")
            .header("x-trace", "abc")
            .with_idempotency_key("evt-1");
        let req = d
            .build_request(HttpMethod::Patch, "/api/v1/users/u1", None, &options)
            .unwrap();
        let content_types: Vec<_> = req
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .collect();
        assert_eq!(content_types.len(), 1);
        assert_eq!(req.header("content-type"), Some("application/merge-patch+json"));
        assert_eq!(req.header("x-trace"), Some("abc"));
        assert_eq!(req.header(IDEMPOTENCY_KEY_HEADER), Some("evt-1"));
    }

    #[test]
    fn generated_idempotency_keys_differ() {
        let a = RequestOptions::new().with_generated_idempotency_key();
        let b = RequestOptions::new().with_generated_idempotency_key();
        assert!(a.idempotency_key().is_some());
        assert_ne!(a.idempotency_key(), b.idempotency_key());
    }

    #[test]
    fn classify_maps_statuses() {
        assert!(matches!(classify(respond(201, &[], "{}")), Outcome::Success(_)));
        assert!(matches!(
            classify(respond(429, &[("retry-after", "3")], "{}")),
            Outcome::RateLimited { retry_after, .. } if retry_after == Duration::from_secs(3)
        ));
        assert!(matches!(
            classify(respond(429, &[("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")], "")),
            Outcome::RateLimited { retry_after, .. } if retry_after == DEFAULT_RETRY_AFTER
        ));
        assert!(matches!(
            classify(respond(404, &[], r#"{"message":"user not found"}"#)),
            Outcome::Rejected(ApiError { status: 404, ref message, .. }) if message == "user not found"
        ));
    }

    #[test]
    fn oversized_retry_after_is_capped() {
        assert!(matches!(
            classify(respond(429, &[("retry-after", "86400")], "")),
            Outcome::RateLimited { retry_after, .. } if retry_after == MAX_RETRY_AFTER
        ));
        assert!(matches!(
            classify(respond(429, &[("retry-after", "60")], "")),
            Outcome::RateLimited { retry_after, .. } if retry_after == Duration::from_secs(60)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_retry_after_waits_at_most_the_cap() {
        let transport = ScriptedTransport::new([
            Ok(respond(429, &[("retry-after", "18446744073709551615")], "")),
            Ok(respond(200, &[], "{}")),
        ]);
        let d = dispatcher(1, transport.clone());
        d.send(HttpMethod::Get, "/api/v1/flows", None, &RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(gaps(&transport.attempt_times()), vec![MAX_RETRY_AFTER]);
    }

    #[test]
    fn backoff_doubles_from_one_second() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(200), Duration::from_secs(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn success_returns_json_unchanged() {
        let transport = ScriptedTransport::new([Ok(respond(200, &[], r#"{"id":"e1","ok":true}"#))]);
        let d = dispatcher(3, transport.clone());
        let body = d
            .send(HttpMethod::Get, "/api/v1/flows", None, &RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(body, json!({"id": "e1", "ok": true}));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_json_success_becomes_message() {
        let transport = ScriptedTransport::new([Ok(respond(200, &[], "OK"))]);
        let d = dispatcher(0, transport);
        let body = d
            .send(HttpMethod::Delete, "/api/v1/users/u1", None, &RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(body, json!({"message": "OK"}));
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_is_not_retried() {
        let transport = ScriptedTransport::new([
            Ok(respond(500, &[], "boom")),
            Ok(respond(200, &[], "{}")),
        ]);
        let d = dispatcher(0, transport.clone());
        let err = d
            .send(HttpMethod::Get, "/api/v1/flows", None, &RequestOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn client_error_fails_immediately_even_with_budget() {
        let transport = ScriptedTransport::new([Ok(respond(
            422,
            &[],
            r#"{"message":"event_name is required"}"#,
        ))]);
        let d = dispatcher(5, transport.clone());
        let err = d
            .send(HttpMethod::Post, "/api/v1/events", Some(&json!({})), &RequestOptions::new())
            .await
            .unwrap_err();
        match err {
            Error::Api(api) => {
                assert_eq!(api.status, 422);
                assert_eq!(api.message, "event_name is required");
            }
            other => panic!("expected API error, got {other:?}"),
        }
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_for_retry_after() {
        let transport = ScriptedTransport::new([
            Ok(respond(429, &[("Retry-After", "5")], "")),
            Ok(respond(429, &[], "")),
            Ok(respond(202, &[], r#"{"status":"queued"}"#)),
        ]);
        let d = dispatcher(3, transport.clone());
        let body = d
            .send(HttpMethod::Post, "/api/v1/events", Some(&json!({})), &RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(body, json!({"status": "queued"}));
        assert_eq!(
            gaps(&transport.attempt_times()),
            vec![Duration::from_secs(5), DEFAULT_RETRY_AFTER]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_without_budget_is_an_api_error() {
        let transport = ScriptedTransport::new([
            Ok(respond(429, &[("retry-after", "2")], r#"{"message":"slow down"}"#)),
            Ok(respond(429, &[("retry-after", "2")], r#"{"message":"slow down"}"#)),
        ]);
        let d = dispatcher(1, transport.clone());
        let err = d
            .send(HttpMethod::Get, "/api/v1/flows", None, &RequestOptions::new())
            .await
            .unwrap_err();
        match err {
            Error::Api(api) => {
                assert!(api.is_rate_limited());
                assert_eq!(api.message, "slow down");
            }
            other => panic!("expected API error, got {other:?}"),
        }
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_back_off_exponentially() {
        let refused = || Err(TransportError::Connect("connection refused".to_string()));
        let transport = ScriptedTransport::new([refused(), refused(), refused(), refused()]);
        let d = dispatcher(3, transport.clone());
        let err = d
            .send(HttpMethod::Get, "/api/v1/flows", None, &RequestOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::Connect(ref msg)) if msg == "connection refused"
        ));
        assert_eq!(
            gaps(&transport.attempt_times()),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_recovers() {
        let transport = ScriptedTransport::new([
            Err(TransportError::Timeout("deadline".to_string())),
            Ok(respond(200, &[], r#"{"ok":true}"#)),
        ]);
        let d = dispatcher(2, transport.clone());
        let body = d
            .send(HttpMethod::Get, "/api/v1/flows", None, &RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(body, json!({"ok": true}));
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_consumes_attempt_index() {
        let transport = ScriptedTransport::new([
            Ok(respond(429, &[("retry-after", "0")], "")),
            Err(TransportError::Request("reset".to_string())),
            Ok(respond(200, &[], "{}")),
        ]);
        let d = dispatcher(2, transport.clone());
        d.send(HttpMethod::Get, "/api/v1/flows", None, &RequestOptions::new())
            .await
            .unwrap();
        // The transport failure happened on attempt 1, so it waits 2^1 s.
        assert_eq!(
            gaps(&transport.attempt_times()),
            vec![Duration::ZERO, Duration::from_secs(2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_sends_the_same_request() {
        let transport = ScriptedTransport::new([
            Err(TransportError::Timeout("deadline".to_string())),
            Ok(respond(200, &[], "{}")),
        ]);
        let d = dispatcher(1, transport.clone());
        let options = RequestOptions::new().with_idempotency_key("batch-7");
        d.send(HttpMethod::Post, "/api/v1/events/batch", Some(&json!({"events": []})), &options)
            .await
            .unwrap();
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
        assert_eq!(requests[1].header(IDEMPOTENCY_KEY_HEADER), Some("batch-7"));
    }
}
