//! REST client for seeding and tearing down Taskdeck data
//!
//! Creates and removes entities through `{BASE_URL}/api` so tests never
//! depend on the UI for setup. Every request is bounded by the configured
//! timeout; failures come back as [`E2eError::Network`] (no response) or
//! [`E2eError::ApiRequest`] (non-2xx response).

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use taskdeck_common::{
    EntityKind, Identifier, Label, NewLabel, NewStatus, NewTask, NewUser, Status, Task, User,
};
use tracing::{debug, warn};

use crate::config::HarnessConfig;
use crate::error::{E2eError, E2eResult};

/// Kind-keyed CRUD surface used by factories, cleanup and bulk deletion.
///
/// [`ApiClient`] is the real implementation; tests substitute
/// [`InMemoryApi`](crate::testing::InMemoryApi).
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Every record of `kind`
    async fn list(&self, kind: EntityKind) -> E2eResult<Vec<Value>>;

    /// Persist `body` and return the server's representation
    async fn create(&self, kind: EntityKind, body: Value) -> E2eResult<Value>;

    async fn delete(&self, kind: EntityKind, id: &Identifier) -> E2eResult<()>;
}

/// HTTP client for the Taskdeck REST API
pub struct ApiClient {
    http: reqwest::Client,
    api_base: String,
    auth_token: RwLock<Option<String>>,
}

impl ApiClient {
    /// Create a client for the application rooted at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> E2eResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| E2eError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: format!("{}/api", base_url.trim_end_matches('/')),
            auth_token: RwLock::new(None),
        })
    }

    pub fn from_config(config: &HarnessConfig) -> E2eResult<Self> {
        Self::new(config.base_url(), config.request_timeout())
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Token sent as `Authorization: Bearer <token>` on every request
    pub fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.write() = token;
    }

    pub fn auth_token(&self) -> Option<String> {
        self.auth_token.read().clone()
    }

    /// Issue a request and return the parsed body.
    ///
    /// JSON responses are parsed, anything else is returned as a string and
    /// an empty body is `null`. The body is only sent for POST, PUT and PATCH.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> E2eResult<Value> {
        let url = format!("{}{}", self.api_base, endpoint);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .header(CONTENT_TYPE, "application/json");

        if let Some(token) = self.auth_token() {
            req = req.bearer_auth(token);
        }

        if let Some(body) = body {
            if method == Method::POST || method == Method::PUT || method == Method::PATCH {
                req = req.json(body);
            }
        }

        debug!("{} {}", method, url);

        let response = req
            .send()
            .await
            .map_err(|e| E2eError::Network(format!("{} {}: {}", method, url, e)))?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);

        let text = response
            .text()
            .await
            .map_err(|e| E2eError::Network(format!("{} {}: reading body: {}", method, url, e)))?;

        let parsed = parse_body(text, is_json);

        if !status.is_success() {
            return Err(E2eError::ApiRequest {
                method: method.to_string(),
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body: parsed,
            });
        }

        Ok(parsed)
    }

    pub async fn get(&self, endpoint: &str) -> E2eResult<Value> {
        self.request(Method::GET, endpoint, None).await
    }

    pub async fn post(&self, endpoint: &str, body: &Value) -> E2eResult<Value> {
        self.request(Method::POST, endpoint, Some(body)).await
    }

    pub async fn put(&self, endpoint: &str, body: &Value) -> E2eResult<Value> {
        self.request(Method::PUT, endpoint, Some(body)).await
    }

    pub async fn patch(&self, endpoint: &str, body: &Value) -> E2eResult<Value> {
        self.request(Method::PATCH, endpoint, Some(body)).await
    }

    pub async fn delete(&self, endpoint: &str) -> E2eResult<Value> {
        self.request(Method::DELETE, endpoint, None).await
    }

    async fn fetch<T: DeserializeOwned>(&self, endpoint: &str) -> E2eResult<T> {
        Ok(serde_json::from_value(self.get(endpoint).await?)?)
    }

    async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: &B,
    ) -> E2eResult<T> {
        let body = serde_json::to_value(body)?;
        Ok(serde_json::from_value(self.request(method, endpoint, Some(&body)).await?)?)
    }

    // ==================== Users ====================

    pub async fn get_users(&self) -> E2eResult<Vec<User>> {
        self.fetch(EntityKind::User.endpoint()).await
    }

    pub async fn create_user(&self, user: &NewUser) -> E2eResult<User> {
        self.send(Method::POST, EntityKind::User.endpoint(), user).await
    }

    pub async fn get_user(&self, id: &Identifier) -> E2eResult<User> {
        self.fetch(&EntityKind::User.item_endpoint(id)).await
    }

    pub async fn update_user(&self, id: &Identifier, user: &NewUser) -> E2eResult<User> {
        self.send(Method::PUT, &EntityKind::User.item_endpoint(id), user).await
    }

    pub async fn delete_user(&self, id: &Identifier) -> E2eResult<()> {
        self.delete(&EntityKind::User.item_endpoint(id)).await.map(drop)
    }

    pub async fn delete_user_by_email(&self, email: &str) -> E2eResult<()> {
        let user = self
            .get_users()
            .await?
            .into_iter()
            .find(|u| u.email == email)
            .ok_or_else(|| not_found(EntityKind::User, email))?;
        self.delete_user(&user.id).await
    }

    // ==================== Statuses ====================

    pub async fn get_statuses(&self) -> E2eResult<Vec<Status>> {
        self.fetch(EntityKind::Status.endpoint()).await
    }

    pub async fn create_status(&self, status: &NewStatus) -> E2eResult<Status> {
        self.send(Method::POST, EntityKind::Status.endpoint(), status).await
    }

    pub async fn get_status(&self, id: &Identifier) -> E2eResult<Status> {
        self.fetch(&EntityKind::Status.item_endpoint(id)).await
    }

    pub async fn update_status(&self, id: &Identifier, status: &NewStatus) -> E2eResult<Status> {
        self.send(Method::PUT, &EntityKind::Status.item_endpoint(id), status).await
    }

    pub async fn delete_status(&self, id: &Identifier) -> E2eResult<()> {
        self.delete(&EntityKind::Status.item_endpoint(id)).await.map(drop)
    }

    pub async fn delete_status_by_slug(&self, slug: &str) -> E2eResult<()> {
        let status = self
            .get_statuses()
            .await?
            .into_iter()
            .find(|s| s.slug == slug)
            .ok_or_else(|| not_found(EntityKind::Status, slug))?;
        self.delete_status(&status.id).await
    }

    // ==================== Labels ====================

    pub async fn get_labels(&self) -> E2eResult<Vec<Label>> {
        self.fetch(EntityKind::Label.endpoint()).await
    }

    pub async fn create_label(&self, label: &NewLabel) -> E2eResult<Label> {
        self.send(Method::POST, EntityKind::Label.endpoint(), label).await
    }

    pub async fn get_label(&self, id: &Identifier) -> E2eResult<Label> {
        self.fetch(&EntityKind::Label.item_endpoint(id)).await
    }

    pub async fn update_label(&self, id: &Identifier, label: &NewLabel) -> E2eResult<Label> {
        self.send(Method::PUT, &EntityKind::Label.item_endpoint(id), label).await
    }

    pub async fn delete_label(&self, id: &Identifier) -> E2eResult<()> {
        self.delete(&EntityKind::Label.item_endpoint(id)).await.map(drop)
    }

    pub async fn delete_label_by_name(&self, name: &str) -> E2eResult<()> {
        let label = self
            .get_labels()
            .await?
            .into_iter()
            .find(|l| l.name == name)
            .ok_or_else(|| not_found(EntityKind::Label, name))?;
        self.delete_label(&label.id).await
    }

    // ==================== Tasks ====================

    pub async fn get_tasks(&self) -> E2eResult<Vec<Task>> {
        self.fetch(EntityKind::Task.endpoint()).await
    }

    pub async fn create_task(&self, task: &NewTask) -> E2eResult<Task> {
        self.send(Method::POST, EntityKind::Task.endpoint(), task).await
    }

    pub async fn get_task(&self, id: &Identifier) -> E2eResult<Task> {
        self.fetch(&EntityKind::Task.item_endpoint(id)).await
    }

    pub async fn update_task(&self, id: &Identifier, task: &NewTask) -> E2eResult<Task> {
        self.send(Method::PUT, &EntityKind::Task.item_endpoint(id), task).await
    }

    pub async fn delete_task(&self, id: &Identifier) -> E2eResult<()> {
        self.delete(&EntityKind::Task.item_endpoint(id)).await.map(drop)
    }

    pub async fn delete_task_by_title(&self, title: &str) -> E2eResult<()> {
        let task = self
            .get_tasks()
            .await?
            .into_iter()
            .find(|t| t.title == title)
            .ok_or_else(|| not_found(EntityKind::Task, title))?;
        self.delete_task(&task.id).await
    }

    // ==================== Auth ====================

    /// Post credentials; a `token` in the response is kept for later
    /// requests. Cookie-session deployments simply return no token.
    pub async fn login(&self, username: &str, password: &str) -> E2eResult<Value> {
        let response = self
            .post("/login", &json!({ "username": username, "password": password }))
            .await?;

        if let Some(token) = response.get("token").and_then(Value::as_str) {
            self.set_auth_token(Some(token.to_string()));
        }

        Ok(response)
    }

    pub async fn logout(&self) -> E2eResult<()> {
        self.request(Method::POST, "/logout", None).await?;
        self.set_auth_token(None);
        Ok(())
    }

    // ==================== Bulk ====================

    /// See [`delete_all`]
    pub async fn delete_all(&self, kind: EntityKind) -> E2eResult<usize> {
        delete_all(self, kind).await
    }

    /// See [`cleanup_test_data`]
    pub async fn cleanup_test_data(&self, kinds: &[EntityKind]) -> BTreeMap<EntityKind, usize> {
        cleanup_test_data(self, kinds).await
    }
}

#[async_trait]
impl ResourceApi for ApiClient {
    async fn list(&self, kind: EntityKind) -> E2eResult<Vec<Value>> {
        match self.get(kind.endpoint()).await? {
            Value::Null => Ok(Vec::new()),
            other => Ok(serde_json::from_value(other)?),
        }
    }

    async fn create(&self, kind: EntityKind, body: Value) -> E2eResult<Value> {
        self.post(kind.endpoint(), &body).await
    }

    async fn delete(&self, kind: EntityKind, id: &Identifier) -> E2eResult<()> {
        ApiClient::delete(self, &kind.item_endpoint(id)).await.map(drop)
    }
}

fn parse_body(text: String, is_json: bool) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    if is_json {
        if let Ok(value) = serde_json::from_str(&text) {
            return value;
        }
    }
    Value::String(text)
}

fn not_found(kind: EntityKind, key: &str) -> E2eError {
    E2eError::NotFound {
        kind,
        key: key.to_string(),
    }
}

/// Delete every record of `kind`, concurrently.
///
/// A failed delete is logged and does not stop the others. Returns how many
/// records were listed, not how many deletes succeeded.
pub async fn delete_all<A: ResourceApi + ?Sized>(api: &A, kind: EntityKind) -> E2eResult<usize> {
    let records = api.list(kind).await?;

    let deletes = records.iter().filter_map(|record| {
        let Some(id) = Identifier::from_record(record) else {
            warn!("Skipping {} record without id: {}", kind, record);
            return None;
        };
        Some(async move {
            if let Err(e) = api.delete(kind, &id).await {
                warn!("Failed to delete {} with id {}: {}", kind, id, e);
            }
        })
    });
    join_all(deletes).await;

    Ok(records.len())
}

/// Run [`delete_all`] for each kind in the given order. A kind whose listing
/// fails counts as zero.
pub async fn cleanup_test_data<A: ResourceApi + ?Sized>(
    api: &A,
    kinds: &[EntityKind],
) -> BTreeMap<EntityKind, usize> {
    let mut stats = BTreeMap::new();
    for kind in kinds {
        let count = match delete_all(api, *kind).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to cleanup {}: {}", kind, e);
                0
            }
        };
        stats.insert(*kind, count);
    }
    stats
}
