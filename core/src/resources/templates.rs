use serde::Serialize;
use serde_json::Value;

use super::{path, to_json, ListOptions};
use crate::dispatch::{Dispatcher, RequestOptions};
use crate::error::Result;
use crate::http::HttpMethod;

/// Message templates: `/api/v1/templates`.
#[derive(Debug, Clone, Copy)]
pub struct Templates<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> Templates<'a> {
    pub(crate) fn new(dispatcher: &'a Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// List templates, e.g. filtered by `channel`.
    pub async fn list(&self, options: &ListOptions) -> Result<Value> {
        let target = format!("{}{}", path(&["templates"]), options.to_query());
        self.send(HttpMethod::Get, &target, None).await
    }

    pub async fn get(&self, template_id: &str) -> Result<Value> {
        self.send(HttpMethod::Get, &path(&["templates", template_id]), None)
            .await
    }

    pub async fn create<T: Serialize + ?Sized>(&self, template: &T) -> Result<Value> {
        let body = to_json(template)?;
        self.send(HttpMethod::Post, &path(&["templates"]), Some(&body))
            .await
    }

    pub async fn update<T: Serialize + ?Sized>(
        &self,
        template_id: &str,
        template: &T,
    ) -> Result<Value> {
        let body = to_json(template)?;
        self.send(HttpMethod::Put, &path(&["templates", template_id]), Some(&body))
            .await
    }

    pub async fn delete(&self, template_id: &str) -> Result<Value> {
        self.send(HttpMethod::Delete, &path(&["templates", template_id]), None)
            .await
    }

    async fn send(&self, method: HttpMethod, target: &str, body: Option<&Value>) -> Result<Value> {
        self.dispatcher
            .send(method, target, body, &RequestOptions::new())
            .await
    }
}
