//! Store endpoint
//!
//! `POST /api/store` takes `{action, data}` and answers
//! `{success: true, data}` or the error envelope. Before dispatching, a session
//! token found in `data.sessionToken` or the request headers is restored
//! best-effort: a bad token is logged and the action proceeds anonymously,
//! unless the server requires a login for data actions.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::str::FromStr;

use super::middleware::{extract_session_token, ApiError, AppState};
use crate::models::{FileUpload, User};
use crate::query::{CountPayload, Query, QueryPayload};
use crate::services::backend::{BatchItem, ObjectBackend};

/// Store actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Login,
    Logout,
    GetCurrentUser,
    Query,
    Count,
    Save,
    Update,
    Delete,
    SaveAll,
    UploadFile,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Login => "login",
            Action::Logout => "logout",
            Action::GetCurrentUser => "getCurrentUser",
            Action::Query => "query",
            Action::Count => "count",
            Action::Save => "save",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::SaveAll => "saveAll",
            Action::UploadFile => "uploadFile",
        }
    }

    /// Data actions; the session actions work without a login
    pub fn requires_auth(&self) -> bool {
        !matches!(self, Action::Login | Action::Logout | Action::GetCurrentUser)
    }
}

impl FromStr for Action {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "login" => Action::Login,
            "logout" => Action::Logout,
            "getCurrentUser" => Action::GetCurrentUser,
            "query" => Action::Query,
            "count" => Action::Count,
            "save" => Action::Save,
            "update" => Action::Update,
            "delete" => Action::Delete,
            "saveAll" => Action::SaveAll,
            "uploadFile" => Action::UploadFile,
            other => return Err(ApiError::invalid_action(other)),
        })
    }
}

/// Request body of `POST /api/store`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRequest {
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePayload {
    pub class_name: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    pub class_name: String,
    pub object_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePayload {
    pub class_name: String,
    pub object_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAllPayload {
    pub class_name: String,
    #[serde(default)]
    pub data_array: Vec<BatchItem>,
}

fn payload<T: DeserializeOwned>(action: Action, data: Value) -> Result<T, ApiError> {
    serde_json::from_value(data).map_err(|e| {
        ApiError::validation_error(format!("Invalid {} payload: {}", action.as_str(), e))
    })
}

/// `data.sessionToken` wins over the headers
fn request_token(data: &Value, headers: &HeaderMap) -> Option<String> {
    data.get("sessionToken")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| extract_session_token(headers))
}

async fn restore_session(state: &AppState, token: Option<&str>) -> Option<User> {
    let token = token?;
    match state.user_service.validate_session(token).await {
        Ok(Some(user)) => Some(user),
        Ok(None) => {
            tracing::warn!("Session restore failed: invalid or expired token");
            None
        }
        Err(e) => {
            tracing::warn!("Session restore failed: {}", e);
            None
        }
    }
}

/// `POST /api/store`
pub async fn handle_store(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: StoreRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::validation_error(format!("Invalid request body: {}", e)))?;
    let action: Action = request.action.parse()?;
    tracing::info!("Store action: {}", action.as_str());

    let token = request_token(&request.data, &headers);
    let user = restore_session(&state, token.as_deref()).await;
    if state.session_config.require_auth && action.requires_auth() && user.is_none() {
        return Err(ApiError::unauthorized("Login required"));
    }

    let data = dispatch(&state, action, request.data, token.as_deref()).await?;
    Ok(Json(json!({ "success": true, "data": data })))
}

async fn dispatch(
    state: &AppState,
    action: Action,
    data: Value,
    token: Option<&str>,
) -> Result<Value, ApiError> {
    let objects = state.object_service.as_ref();
    match action {
        Action::Login => {
            let LoginPayload { username, password } = payload(action, data)?;
            let (user, session) = state.user_service.login(&username, &password).await?;
            Ok(user.to_wire(Some(&session.id)))
        }
        Action::Logout => {
            if let Some(token) = token {
                state.user_service.logout(token).await?;
            }
            Ok(json!({ "success": true }))
        }
        Action::GetCurrentUser => {
            let SessionPayload { session_token } = payload(action, data)?;
            let Some(token) = session_token.filter(|t| !t.trim().is_empty()) else {
                return Ok(Value::Null);
            };
            let user = state
                .user_service
                .validate_session(&token)
                .await?
                .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;
            Ok(user.to_wire(Some(&token)))
        }
        Action::Query => {
            let query = Query::from_payload(payload::<QueryPayload>(action, data)?)
                .map_err(|e| ApiError::validation_error(e.to_string()))?;
            let docs = objects.find(&query).await?;
            Ok(Value::Array(
                docs.iter()
                    .map(|d| d.to_wire_projected(query.selected()))
                    .collect(),
            ))
        }
        Action::Count => {
            let query = Query::from_count_payload(payload::<CountPayload>(action, data)?)
                .map_err(|e| ApiError::validation_error(e.to_string()))?;
            Ok(json!(objects.count(&query).await?))
        }
        Action::Save => {
            let SavePayload { class_name, data } = payload(action, data)?;
            Ok(objects.save(&class_name, data).await?.to_wire())
        }
        Action::Update => {
            let UpdatePayload {
                class_name,
                object_id,
                data,
            } = payload(action, data)?;
            Ok(objects.update(&class_name, &object_id, data).await?.to_wire())
        }
        Action::Delete => {
            let DeletePayload {
                class_name,
                object_id,
            } = payload(action, data)?;
            objects.delete(&class_name, &object_id).await?;
            Ok(json!({ "success": true, "objectId": object_id }))
        }
        Action::SaveAll => {
            let SaveAllPayload {
                class_name,
                data_array,
            } = payload(action, data)?;
            let saved = objects.save_all(&class_name, data_array).await?;
            Ok(Value::Array(saved.iter().map(|d| d.to_wire()).collect()))
        }
        Action::UploadFile => {
            let upload: FileUpload = payload(action, data)?;
            Ok(objects.upload_file(upload).await?.to_wire())
        }
    }
}
