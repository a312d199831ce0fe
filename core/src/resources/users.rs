use serde::Serialize;
use serde_json::{json, Value};

use super::{path, to_json, ListOptions};
use crate::dispatch::{Dispatcher, RequestOptions};
use crate::error::Result;
use crate::http::HttpMethod;

/// Recipients: `/api/v1/users`.
#[derive(Debug, Clone, Copy)]
pub struct Users<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> Users<'a> {
    pub(crate) fn new(dispatcher: &'a Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Create or update a user from its payload.
    pub async fn identify<T: Serialize + ?Sized>(&self, user: &T) -> Result<Value> {
        let body = to_json(user)?;
        self.post(&path(&["users"]), &body).await
    }

    pub async fn get(&self, user_id: &str) -> Result<Value> {
        self.dispatcher
            .send(HttpMethod::Get, &path(&["users", user_id]), None, &RequestOptions::new())
            .await
    }

    /// Partial update of user attributes.
    pub async fn update<T: Serialize + ?Sized>(&self, user_id: &str, patch: &T) -> Result<Value> {
        let body = to_json(patch)?;
        self.dispatcher
            .send(
                HttpMethod::Patch,
                &path(&["users", user_id]),
                Some(&body),
                &RequestOptions::new(),
            )
            .await
    }

    pub async fn delete(&self, user_id: &str) -> Result<Value> {
        self.dispatcher
            .send(HttpMethod::Delete, &path(&["users", user_id]), None, &RequestOptions::new())
            .await
    }

    pub async fn list(&self, options: &ListOptions) -> Result<Value> {
        let target = format!("{}{}", path(&["users"]), options.to_query());
        self.dispatcher
            .send(HttpMethod::Get, &target, None, &RequestOptions::new())
            .await
    }

    /// Replace per-channel delivery data (device tokens, phone numbers...).
    pub async fn set_channel_data<T: Serialize + ?Sized>(
        &self,
        user_id: &str,
        data: &T,
    ) -> Result<Value> {
        let body = to_json(data)?;
        self.put(&path(&["users", user_id, "channel_data"]), &body).await
    }

    pub async fn get_preferences(&self, user_id: &str) -> Result<Value> {
        self.dispatcher
            .send(
                HttpMethod::Get,
                &path(&["users", user_id, "preferences"]),
                None,
                &RequestOptions::new(),
            )
            .await
    }

    pub async fn set_preferences<T: Serialize + ?Sized>(
        &self,
        user_id: &str,
        preferences: &T,
    ) -> Result<Value> {
        let body = to_json(preferences)?;
        self.put(&path(&["users", user_id, "preferences"]), &body).await
    }

    /// Identify many users at once, sent as `{"users": [...]}`.
    pub async fn batch<T: Serialize>(&self, users: &[T]) -> Result<Value> {
        let users = users.iter().map(to_json).collect::<Result<Vec<_>>>()?;
        self.post(&path(&["users", "batch"]), &json!({ "users": users }))
            .await
    }

    async fn post(&self, target: &str, body: &Value) -> Result<Value> {
        self.dispatcher
            .send(HttpMethod::Post, target, Some(body), &RequestOptions::new())
            .await
    }

    async fn put(&self, target: &str, body: &Value) -> Result<Value> {
        self.dispatcher
            .send(HttpMethod::Put, target, Some(body), &RequestOptions::new())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{dispatcher, respond, ScriptedTransport};
    use crate::error::Error;

    #[tokio::test]
    async fn each_operation_hits_its_endpoint() {
        let transport = ScriptedTransport::new([]);
        let d = dispatcher(0, transport.clone());
        let users = Users::new(&d);

        users.identify(&json!({"id": "u1", "email": "a@b.c"})).await.unwrap();
        users.get("u1").await.unwrap();
        users.update("u1", &json!({"name": "An"})).await.unwrap();
        users.delete("u1").await.unwrap();
        users.list(&ListOptions::new().limit(10)).await.unwrap();
        users
            .set_channel_data("u1", &json!({"zns": {"phone": "+84900000000"}}))
            .await
            .unwrap();
        users.get_preferences("u1").await.unwrap();
        users
            .set_preferences("u1", &json!({"marketing": false}))
            .await
            .unwrap();
        users.batch(&[json!({"id": "u2"}), json!({"id": "u3"})]).await.unwrap();

        let seen: Vec<(HttpMethod, String)> = transport
            .requests()
            .into_iter()
            .map(|r| (r.method, r.url.trim_start_matches("http://localhost:3000").to_string()))
            .collect();
        assert_eq!(
            seen,
            vec![
                (HttpMethod::Post, "/api/v1/users".to_string()),
                (HttpMethod::Get, "/api/v1/users/u1".to_string()),
                (HttpMethod::Patch, "/api/v1/users/u1".to_string()),
                (HttpMethod::Delete, "/api/v1/users/u1".to_string()),
                (HttpMethod::Get, "/api/v1/users?limit=10".to_string()),
                (HttpMethod::Put, "/api/v1/users/u1/channel_data".to_string()),
                (HttpMethod::Get, "/api/v1/users/u1/preferences".to_string()),
                (HttpMethod::Put, "/api/v1/users/u1/preferences".to_string()),
                (HttpMethod::Post, "/api/v1/users/batch".to_string()),
            ]
        );

        let batch = transport.requests().pop().unwrap();
        let body: Value = serde_json::from_str(batch.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"users": [{"id": "u2"}, {"id": "u3"}]}));
    }

    #[tokio::test]
    async fn missing_user_surfaces_not_found() {
        let transport = ScriptedTransport::new([Ok(respond(
            404,
            &[],
            r#"{"message":"user not found"}"#,
        ))]);
        let d = dispatcher(2, transport.clone());
        let err = Users::new(&d).get("ghost").await.unwrap_err();
        match err {
            Error::Api(api) => assert!(api.is_not_found()),
            other => panic!("expected API error, got {other:?}"),
        }
        assert_eq!(transport.requests().len(), 1);
    }
}
