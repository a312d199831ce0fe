use serde::Serialize;
use serde_json::Value;

use super::{path, to_json, ListOptions};
use crate::dispatch::{Dispatcher, RequestOptions};
use crate::error::Result;
use crate::http::HttpMethod;

/// Notification flows: `/api/v1/flows`.
#[derive(Debug, Clone, Copy)]
pub struct Flows<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> Flows<'a> {
    pub(crate) fn new(dispatcher: &'a Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn list(&self, options: &ListOptions) -> Result<Value> {
        let target = format!("{}{}", path(&["flows"]), options.to_query());
        self.dispatcher
            .send(HttpMethod::Get, &target, None, &RequestOptions::new())
            .await
    }

    pub async fn create<T: Serialize + ?Sized>(&self, flow: &T) -> Result<Value> {
        let body = to_json(flow)?;
        self.dispatcher
            .send(HttpMethod::Post, &path(&["flows"]), Some(&body), &RequestOptions::new())
            .await
    }
}
