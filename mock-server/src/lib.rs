//! In-memory stand-in for the notification service.
//!
//! Serves the `/api/v1` surface with permissive validation, records every
//! request it sees and can be scripted to answer the next requests with
//! canned responses (rate limits, outages) before normal routing resumes.

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::Arc,
};

use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// A request as the server received it.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A canned answer returned instead of routing.
#[derive(Clone, Debug)]
pub struct ScriptedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ScriptedResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Default)]
struct Store {
    api_key: Option<String>,
    users: HashMap<String, Value>,
    templates: HashMap<String, Value>,
    flows: Vec<Value>,
    webhooks: Vec<Value>,
    events: Vec<Value>,
    requests: Vec<RecordedRequest>,
    script: VecDeque<ScriptedResponse>,
}

/// Shared server state. Clones observe the same store.
#[derive(Clone, Default)]
pub struct MockState {
    store: Arc<RwLock<Store>>,
}

impl MockState {
    /// State that accepts any bearer token.
    pub fn new() -> Self {
        Self::default()
    }

    /// State that only accepts `Bearer <api_key>`.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        let store = Store {
            api_key: Some(api_key.into()),
            ..Store::default()
        };
        Self {
            store: Arc::new(RwLock::new(store)),
        }
    }

    /// Answer the next unanswered request with `response`.
    pub async fn enqueue(&self, response: ScriptedResponse) {
        self.store.write().await.script.push_back(response);
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.store.read().await.requests.clone()
    }

    pub async fn events(&self) -> Vec<Value> {
        self.store.read().await.events.clone()
    }
}

pub fn app() -> Router {
    app_with_state(MockState::new())
}

pub fn app_with_state(state: MockState) -> Router {
    let api = Router::new()
        .route("/api/v1/events", post(ingest_event))
        .route("/api/v1/events/batch", post(ingest_batch))
        .route("/api/v1/users", get(list_users).post(identify_user))
        .route("/api/v1/users/batch", post(batch_users))
        .route(
            "/api/v1/users/{id}",
            get(get_user).patch(update_user).delete(delete_user),
        )
        .route(
            "/api/v1/users/{id}/channel_data",
            put(set_channel_data),
        )
        .route(
            "/api/v1/users/{id}/preferences",
            get(get_preferences).put(set_preferences),
        )
        .route("/api/v1/flows", get(list_flows).post(create_flow))
        .route("/api/v1/templates", get(list_templates).post(create_template))
        .route(
            "/api/v1/templates/{id}",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/api/v1/webhooks", get(list_webhooks).post(create_webhook))
        .layer(middleware::from_fn_with_state(state.clone(), intercept));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    serve(listener, MockState::new()).await
}

pub async fn serve(listener: TcpListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

/// Bind a random local port and serve `state` on a background task.
pub async fn spawn(state: MockState) -> Result<SocketAddr, std::io::Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = serve(listener, state).await {
            tracing::error!(error = %e, "mock server stopped");
        }
    });
    Ok(addr)
}

/// Records the request, replays scripted responses, then checks auth.
async fn intercept(State(state): State<MockState>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return error(StatusCode::BAD_REQUEST, "unreadable body"),
    };

    let recorded = RecordedRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts
            .headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect(),
        body: serde_json::from_slice(&bytes).ok(),
    };
    tracing::debug!(method = %recorded.method, path = %recorded.path, "request");

    let (scripted, expected_key) = {
        let mut store = state.store.write().await;
        store.requests.push(recorded.clone());
        (store.script.pop_front(), store.api_key.clone())
    };

    if let Some(scripted) = scripted {
        return scripted_response(scripted);
    }

    let token = recorded
        .header("authorization")
        .and_then(|v| v.strip_prefix("Bearer "));
    let authorized = match (token, expected_key) {
        (None, _) => false,
        (Some(token), Some(expected)) => token == expected,
        (Some(token), None) => !token.is_empty(),
    };
    if !authorized {
        return error(StatusCode::UNAUTHORIZED, "invalid API key");
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

fn scripted_response(scripted: ScriptedResponse) -> Response {
    let status = StatusCode::from_u16(scripted.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, scripted.body).into_response();
    for (name, value) in scripted.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn not_found(what: &str) -> Response {
    error(StatusCode::NOT_FOUND, &format!("{what} not found"))
}

async fn health() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], "OK")
}

// --- events ---

async fn ingest_event(State(state): State<MockState>, Json(event): Json<Value>) -> Response {
    if event.get("event_name").and_then(Value::as_str).is_none() {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "event_name is required");
    }
    let event_id = event
        .get("event_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    state.store.write().await.events.push(event);
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "event_id": event_id })),
    )
        .into_response()
}

async fn ingest_batch(State(state): State<MockState>, Json(batch): Json<Value>) -> Response {
    let Some(events) = batch.get("events").and_then(Value::as_array) else {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "events must be an array");
    };
    let results: Vec<Value> = events
        .iter()
        .map(|e| match e.get("event_name").and_then(Value::as_str) {
            Some(_) => json!({ "status": "accepted" }),
            None => json!({ "status": "rejected", "message": "event_name is required" }),
        })
        .collect();
    let mut store = state.store.write().await;
    store.events.extend(
        events
            .iter()
            .filter(|e| e.get("event_name").is_some())
            .cloned(),
    );
    (StatusCode::ACCEPTED, Json(json!({ "results": results }))).into_response()
}

// --- users ---

#[derive(Deserialize)]
struct Paging {
    limit: Option<usize>,
    channel: Option<String>,
}

async fn identify_user(State(state): State<MockState>, Json(user): Json<Value>) -> Response {
    let Some(id) = user.get("id").and_then(Value::as_str).map(str::to_string) else {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "id is required");
    };
    let mut store = state.store.write().await;
    let entry = store.users.entry(id).or_insert_with(|| json!({}));
    merge(entry, &user);
    Json(entry.clone()).into_response()
}

async fn list_users(State(state): State<MockState>, Query(paging): Query<Paging>) -> Json<Value> {
    let store = state.store.read().await;
    let mut users: Vec<Value> = store.users.values().cloned().collect();
    users.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
    if let Some(limit) = paging.limit {
        users.truncate(limit);
    }
    Json(json!({ "data": users }))
}

async fn get_user(State(state): State<MockState>, Path(id): Path<String>) -> Response {
    match state.store.read().await.users.get(&id) {
        Some(user) => Json(user.clone()).into_response(),
        None => not_found("user"),
    }
}

async fn update_user(
    State(state): State<MockState>,
    Path(id): Path<String>,
    Json(patch): Json<Value>,
) -> Response {
    let mut store = state.store.write().await;
    let Some(user) = store.users.get_mut(&id) else {
        return not_found("user");
    };
    merge(user, &patch);
    user["id"] = Value::String(id);
    Json(user.clone()).into_response()
}

async fn delete_user(State(state): State<MockState>, Path(id): Path<String>) -> Response {
    match state.store.write().await.users.remove(&id) {
        Some(_) => Json(json!({ "id": id, "deleted": true })).into_response(),
        None => not_found("user"),
    }
}

async fn set_channel_data(
    State(state): State<MockState>,
    Path(id): Path<String>,
    Json(data): Json<Value>,
) -> Response {
    set_user_field(state, id, "channel_data", data).await
}

async fn get_preferences(State(state): State<MockState>, Path(id): Path<String>) -> Response {
    match state.store.read().await.users.get(&id) {
        Some(user) => Json(user.get("preferences").cloned().unwrap_or_else(|| json!({})))
            .into_response(),
        None => not_found("user"),
    }
}

async fn set_preferences(
    State(state): State<MockState>,
    Path(id): Path<String>,
    Json(preferences): Json<Value>,
) -> Response {
    set_user_field(state, id, "preferences", preferences).await
}

async fn set_user_field(state: MockState, id: String, field: &str, value: Value) -> Response {
    let mut store = state.store.write().await;
    let Some(user) = store.users.get_mut(&id) else {
        return not_found("user");
    };
    user[field] = value.clone();
    Json(value).into_response()
}

async fn batch_users(State(state): State<MockState>, Json(batch): Json<Value>) -> Response {
    let Some(users) = batch.get("users").and_then(Value::as_array) else {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "users must be an array");
    };
    let mut store = state.store.write().await;
    let mut results = Vec::with_capacity(users.len());
    for user in users {
        match user.get("id").and_then(Value::as_str) {
            Some(id) => {
                let entry = store.users.entry(id.to_string()).or_insert_with(|| json!({}));
                merge(entry, user);
                results.push(json!({ "id": id, "status": "ok" }));
            }
            None => results.push(json!({ "status": "rejected", "message": "id is required" })),
        }
    }
    Json(json!({ "results": results })).into_response()
}

// --- flows, templates, webhooks ---

async fn list_flows(State(state): State<MockState>) -> Json<Value> {
    Json(json!({ "data": state.store.read().await.flows.clone() }))
}

async fn create_flow(State(state): State<MockState>, Json(flow): Json<Value>) -> Response {
    let flow = with_id(flow, "flow");
    state.store.write().await.flows.push(flow.clone());
    (StatusCode::CREATED, Json(flow)).into_response()
}

async fn list_templates(
    State(state): State<MockState>,
    Query(paging): Query<Paging>,
) -> Json<Value> {
    let store = state.store.read().await;
    let mut templates: Vec<Value> = store
        .templates
        .values()
        .filter(|t| match &paging.channel {
            Some(channel) => t.get("channel").and_then(Value::as_str) == Some(channel.as_str()),
            None => true,
        })
        .cloned()
        .collect();
    templates.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
    if let Some(limit) = paging.limit {
        templates.truncate(limit);
    }
    Json(json!({ "data": templates }))
}

async fn create_template(State(state): State<MockState>, Json(template): Json<Value>) -> Response {
    let template = with_id(template, "tpl");
    let id = template["id"].as_str().unwrap_or_default().to_string();
    state
        .store
        .write()
        .await
        .templates
        .insert(id, template.clone());
    (StatusCode::CREATED, Json(template)).into_response()
}

async fn get_template(State(state): State<MockState>, Path(id): Path<String>) -> Response {
    match state.store.read().await.templates.get(&id) {
        Some(template) => Json(template.clone()).into_response(),
        None => not_found("template"),
    }
}

async fn update_template(
    State(state): State<MockState>,
    Path(id): Path<String>,
    Json(mut template): Json<Value>,
) -> Response {
    let mut store = state.store.write().await;
    if !store.templates.contains_key(&id) {
        return not_found("template");
    }
    if template.is_object() {
        template["id"] = Value::String(id.clone());
    }
    store.templates.insert(id, template.clone());
    Json(template).into_response()
}

async fn delete_template(State(state): State<MockState>, Path(id): Path<String>) -> Response {
    match state.store.write().await.templates.remove(&id) {
        Some(_) => Json(json!({ "id": id, "deleted": true })).into_response(),
        None => not_found("template"),
    }
}

async fn list_webhooks(State(state): State<MockState>) -> Json<Value> {
    Json(json!({ "data": state.store.read().await.webhooks.clone() }))
}

async fn create_webhook(State(state): State<MockState>, Json(webhook): Json<Value>) -> Response {
    if webhook.get("url").and_then(Value::as_str).is_none() {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "url is required");
    }
    let webhook = with_id(webhook, "wh");
    state.store.write().await.webhooks.push(webhook.clone());
    (StatusCode::CREATED, Json(webhook)).into_response()
}

/// Shallow-merge the fields of `patch` into `target` when both are objects.
fn merge(target: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
        for (k, v) in patch {
            target.insert(k.clone(), v.clone());
        }
    }
}

/// Give an object payload a generated `id` unless it already has one.
fn with_id(value: Value, prefix: &str) -> Value {
    let mut fields = match value {
        Value::Object(fields) => fields,
        other => {
            let mut fields = Map::new();
            fields.insert("value".to_string(), other);
            fields
        }
    };
    fields
        .entry("id")
        .or_insert_with(|| Value::String(format!("{prefix}_{}", Uuid::new_v4().simple())));
    Value::Object(fields)
}
