//! Entry point for the notification API.
//!
//! # Design
//! `NotifyClient` owns a [`Dispatcher`] and hands out borrowed resource
//! wrappers. Cloning is cheap and clones share the configuration and the
//! connection pool, so one client can serve any number of concurrent calls.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::dispatch::{Dispatcher, RequestOptions};
use crate::error::Result;
use crate::http::{ApiResponse, HttpMethod};
use crate::resources::{Events, Flows, Templates, Users, Webhooks};
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct NotifyClient {
    dispatcher: Dispatcher,
}

impl NotifyClient {
    /// Client with default settings for the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_config(ClientConfig::new(api_key)?)
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            dispatcher: Dispatcher::new(config)?,
        })
    }

    /// Client configured from `NOTIFY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::with_config(ClientConfig::from_env()?)
    }

    /// Client that sends through a custom [`Transport`].
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            dispatcher: Dispatcher::with_transport(config, transport),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        self.dispatcher.config()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn events(&self) -> Events<'_> {
        Events::new(&self.dispatcher)
    }

    pub fn users(&self) -> Users<'_> {
        Users::new(&self.dispatcher)
    }

    pub fn flows(&self) -> Flows<'_> {
        Flows::new(&self.dispatcher)
    }

    pub fn templates(&self) -> Templates<'_> {
        Templates::new(&self.dispatcher)
    }

    pub fn webhooks(&self) -> Webhooks<'_> {
        Webhooks::new(&self.dispatcher)
    }

    /// Call any endpoint. `path` is relative to the base URL.
    pub async fn request<T: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&T>,
    ) -> Result<Value> {
        self.request_with(method, path, body, &RequestOptions::new())
            .await
    }

    pub async fn request_with<T: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&T>,
        options: &RequestOptions,
    ) -> Result<Value> {
        self.request_raw(method, path, body, options)
            .await
            .map(ApiResponse::into_body)
    }

    /// Like [`request_with`](Self::request_with) but keeps status and
    /// headers, e.g. to read [`RateLimit`](crate::http::RateLimit).
    pub async fn request_raw<T: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&T>,
        options: &RequestOptions,
    ) -> Result<ApiResponse> {
        let body = body.map(serde_json::to_value).transpose()?;
        self.dispatcher
            .send_raw(method, path, body.as_ref(), options)
            .await
    }
}
