//! HTTP client for a running store
//!
//! [`ApiClient`] speaks the `POST /api/store` envelope and implements
//! [`ObjectBackend`], so typed queries, the tracking store and the batch jobs
//! work the same against a remote server as in-process.

pub mod object;
pub mod queries;
pub mod session;

pub use object::StoredObject;
pub use queries::{query_customs, query_exporters, query_hs_codes, query_quick_links, query_tracking};
pub use session::{FileSessionStore, MemorySessionStore, SavedSession, SessionStore};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::api::store::{
    Action, DeletePayload, LoginPayload, SaveAllPayload, SavePayload, StoreRequest, UpdatePayload,
};
use crate::config::ClientConfig;
use crate::models::{Document, FileUpload, StoredFile};
use crate::query::Query;
use crate::services::backend::{codes, BackendError, BatchItem, ObjectBackend};

/// Response envelope
#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

pub struct ApiClient {
    http: reqwest::Client,
    endpoint: String,
    session: Arc<dyn SessionStore>,
}

impl ApiClient {
    pub fn new(endpoint: impl Into<String>, session: Arc<dyn SessionStore>) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            session,
        })
    }

    /// Client for `config.endpoint` with the session kept in `config.session_file`
    pub fn from_config(config: &ClientConfig) -> Result<Self, BackendError> {
        Self::new(
            config.endpoint.clone(),
            Arc::new(FileSessionStore::new(config.session_file.clone())),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn session_token(&self) -> Option<String> {
        self.session.load().map(|s| s.session_token)
    }

    /// Cached user from the last login, without a round trip
    pub fn cached_user(&self) -> Option<Value> {
        self.session.load().map(|s| s.user)
    }

    /// Send one action. The stored session token rides along in
    /// `data.sessionToken` unless the caller set one.
    pub async fn call(&self, action: Action, data: Value) -> Result<Value, BackendError> {
        let mut data = match data {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        if let (Some(token), Some(map)) = (self.session_token(), data.as_object_mut()) {
            map.entry("sessionToken").or_insert(Value::String(token));
        }

        let request = StoreRequest {
            action: action.as_str().to_string(),
            data,
        };
        tracing::debug!("POST {} action={}", self.endpoint, request.action);

        let response = self.http.post(&self.endpoint).json(&request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        let envelope: Envelope = serde_json::from_slice(&body).map_err(|e| {
            BackendError::Internal(anyhow::anyhow!(
                "Unexpected response from {} ({}): {}",
                self.endpoint,
                status,
                e
            ))
        })?;

        if envelope.success {
            Ok(envelope.data)
        } else {
            Err(BackendError::Remote {
                message: envelope
                    .error
                    .unwrap_or_else(|| format!("Request failed ({})", status)),
                code: envelope
                    .code
                    .unwrap_or_else(|| codes::INTERNAL_ERROR.to_string()),
            })
        }
    }

    async fn call_as<T: serde::Serialize>(&self, action: Action, payload: T) -> Result<Value, BackendError> {
        let data = serde_json::to_value(payload)
            .map_err(|e| BackendError::Internal(anyhow::anyhow!("Failed to encode payload: {}", e)))?;
        self.call(action, data).await
    }

    /// Log in and remember the session. Returns the user object.
    pub async fn login(&self, username: &str, password: &str) -> Result<Value, BackendError> {
        let user = self
            .call_as(
                Action::Login,
                LoginPayload {
                    username: username.to_string(),
                    password: password.to_string(),
                },
            )
            .await?;
        let token = user
            .get("sessionToken")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::Internal(anyhow::anyhow!("Login response has no sessionToken")))?;
        self.session.save(&SavedSession {
            session_token: token.to_string(),
            user: user.clone(),
        })?;
        tracing::info!("Logged in to {}", self.endpoint);
        Ok(user)
    }

    /// Revoke the session remotely and forget it locally. The local session
    /// is cleared even when the server call fails.
    pub async fn logout(&self) -> Result<(), BackendError> {
        let result = self.call(Action::Logout, json!({})).await;
        self.session.clear()?;
        result.map(|_| ())
    }

    /// The logged-in user, or `None`. Only a token the server rejects as
    /// unauthorized clears the session; other failures leave it in place.
    pub async fn current_user(&self) -> Result<Option<Value>, BackendError> {
        let Some(token) = self.session_token() else {
            return Ok(None);
        };
        match self
            .call(Action::GetCurrentUser, json!({ "sessionToken": token }))
            .await
        {
            Ok(Value::Null) => {
                self.session.clear()?;
                Ok(None)
            }
            Ok(user) => {
                self.session.save(&SavedSession {
                    session_token: token,
                    user: user.clone(),
                })?;
                Ok(Some(user))
            }
            Err(BackendError::Remote { code, message }) if code == codes::UNAUTHORIZED => {
                tracing::warn!("Session rejected: {}", message);
                self.session.clear()?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn documents(class_name: &str, value: Value) -> Result<Vec<Document>, BackendError> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| Document::from_wire(class_name, item).map_err(BackendError::from))
            .collect(),
        other => Err(BackendError::Internal(anyhow::anyhow!(
            "Expected an array of objects, got {}",
            other
        ))),
    }
}

#[async_trait]
impl ObjectBackend for ApiClient {
    async fn find(&self, query: &Query) -> Result<Vec<Document>, BackendError> {
        query.validate()?;
        let data = self.call_as(Action::Query, query.to_payload()).await?;
        documents(query.class_name(), data)
    }

    async fn count(&self, query: &Query) -> Result<u64, BackendError> {
        query.validate()?;
        let data = self.call_as(Action::Count, query.to_count_payload()).await?;
        data.as_u64()
            .ok_or_else(|| BackendError::Internal(anyhow::anyhow!("Expected a count, got {}", data)))
    }

    async fn save(&self, class_name: &str, fields: Map<String, Value>) -> Result<Document, BackendError> {
        let data = self
            .call_as(
                Action::Save,
                SavePayload {
                    class_name: class_name.to_string(),
                    data: fields,
                },
            )
            .await?;
        Ok(Document::from_wire(class_name, data)?)
    }

    async fn update(
        &self,
        class_name: &str,
        object_id: &str,
        fields: Map<String, Value>,
    ) -> Result<Document, BackendError> {
        let data = self
            .call_as(
                Action::Update,
                UpdatePayload {
                    class_name: class_name.to_string(),
                    object_id: object_id.to_string(),
                    data: fields,
                },
            )
            .await?;
        Ok(Document::from_wire(class_name, data)?)
    }

    async fn delete(&self, class_name: &str, object_id: &str) -> Result<(), BackendError> {
        self.call_as(
            Action::Delete,
            DeletePayload {
                class_name: class_name.to_string(),
                object_id: object_id.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    async fn save_all(&self, class_name: &str, items: Vec<BatchItem>) -> Result<Vec<Document>, BackendError> {
        let data = self
            .call_as(
                Action::SaveAll,
                SaveAllPayload {
                    class_name: class_name.to_string(),
                    data_array: items,
                },
            )
            .await?;
        documents(class_name, data)
    }

    async fn upload_file(&self, upload: FileUpload) -> Result<StoredFile, BackendError> {
        let data = self.call_as(Action::UploadFile, upload).await?;
        serde_json::from_value(data)
            .map_err(|e| BackendError::Internal(anyhow::anyhow!("Malformed file response: {}", e)))
    }
}
