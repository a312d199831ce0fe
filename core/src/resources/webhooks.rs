use serde::Serialize;
use serde_json::Value;

use super::{path, to_json, ListOptions};
use crate::dispatch::{Dispatcher, RequestOptions};
use crate::error::Result;
use crate::http::HttpMethod;

/// Webhook subscriptions: `/api/v1/webhooks`.
#[derive(Debug, Clone, Copy)]
pub struct Webhooks<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> Webhooks<'a> {
    pub(crate) fn new(dispatcher: &'a Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn list(&self, options: &ListOptions) -> Result<Value> {
        let target = format!("{}{}", path(&["webhooks"]), options.to_query());
        self.dispatcher
            .send(HttpMethod::Get, &target, None, &RequestOptions::new())
            .await
    }

    pub async fn create<T: Serialize + ?Sized>(&self, webhook: &T) -> Result<Value> {
        let body = to_json(webhook)?;
        self.dispatcher
            .send(HttpMethod::Post, &path(&["webhooks"]), Some(&body), &RequestOptions::new())
            .await
    }
}
