use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use super::{path, to_json};
use crate::dispatch::{Dispatcher, RequestOptions};
use crate::error::Result;
use crate::http::HttpMethod;

/// Field the service reads the occurrence time from.
pub const OCCURRED_AT: &str = "occurred_at";

/// Event ingestion: `/api/v1/events`.
#[derive(Debug, Clone, Copy)]
pub struct Events<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> Events<'a> {
    pub(crate) fn new(dispatcher: &'a Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Ingest one event. A missing `occurred_at` is set to now.
    pub async fn ingest<T: Serialize + ?Sized>(&self, event: &T) -> Result<Value> {
        self.ingest_with(event, &RequestOptions::new()).await
    }

    /// [`ingest`](Self::ingest) with extra headers or an idempotency key.
    pub async fn ingest_with<T: Serialize + ?Sized>(
        &self,
        event: &T,
        options: &RequestOptions,
    ) -> Result<Value> {
        let event = with_occurred_at(to_json(event)?, Utc::now());
        self.dispatcher
            .send(HttpMethod::Post, &path(&["events"]), Some(&event), options)
            .await
    }

    /// Ingest several events as `{"events": [...]}`, filling `occurred_at`
    /// on each. Per-event results are decided by the service.
    pub async fn ingest_batch<T: Serialize>(&self, events: &[T]) -> Result<Value> {
        self.ingest_batch_with(events, &RequestOptions::new()).await
    }

    pub async fn ingest_batch_with<T: Serialize>(
        &self,
        events: &[T],
        options: &RequestOptions,
    ) -> Result<Value> {
        let now = Utc::now();
        let events = events
            .iter()
            .map(|event| to_json(event).map(|v| with_occurred_at(v, now)))
            .collect::<Result<Vec<_>>>()?;
        let body = json!({ "events": events });
        self.dispatcher
            .send(HttpMethod::Post, &path(&["events", "batch"]), Some(&body), options)
            .await
    }
}

/// Set `occurred_at` on a JSON object when it is missing or null.
///
/// Non-object values are returned untouched.
pub fn with_occurred_at(mut event: Value, now: DateTime<Utc>) -> Value {
    if let Value::Object(fields) = &mut event {
        let missing = fields.get(OCCURRED_AT).map_or(true, Value::is_null);
        if missing {
            fields.insert(
                OCCURRED_AT.to_string(),
                Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
    }
    event
}
