//! Object store seam
//!
//! Everything above the storage layer (typed queries, the tracking store,
//! sync and import jobs) talks to an [`ObjectBackend`]. The in-process
//! [`ObjectService`](super::ObjectService) and the HTTP
//! [`ApiClient`](crate::client::ApiClient) both implement it, so the same
//! code runs on the server and against a remote instance.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{Document, DocumentError, FileUpload, StoredFile};
use crate::query::{Query, QueryError};

/// Error codes carried in the response envelope
pub mod codes {
    pub const INVALID_ACTION: &str = "INVALID_ACTION";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const OBJECT_NOT_FOUND: &str = "OBJECT_NOT_FOUND";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Errors surfaced by any object backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Object not found: {class_name}/{object_id}")]
    ObjectNotFound {
        class_name: String,
        object_id: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid query: {0}")]
    Query(#[from] QueryError),

    #[error("Malformed object: {0}")]
    Decode(#[from] DocumentError),

    /// The request never produced an envelope
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// An error envelope returned by a remote store
    #[error("{message}")]
    Remote { message: String, code: String },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BackendError {
    /// Envelope code for this error
    pub fn code(&self) -> &str {
        match self {
            BackendError::Validation(_) | BackendError::Query(_) => codes::VALIDATION_ERROR,
            BackendError::ObjectNotFound { .. } => codes::OBJECT_NOT_FOUND,
            BackendError::NotFound(_) => codes::NOT_FOUND,
            BackendError::Unauthorized(_) => codes::UNAUTHORIZED,
            BackendError::Remote { code, .. } => code,
            BackendError::Decode(_) | BackendError::Transport(_) | BackendError::Internal(_) => {
                codes::INTERNAL_ERROR
            }
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BackendError::Validation(message.into())
    }

    pub fn object_not_found(class_name: &str, object_id: &str) -> Self {
        BackendError::ObjectNotFound {
            class_name: class_name.to_string(),
            object_id: object_id.to_string(),
        }
    }
}

/// One entry of a batch save: inserted without `objectId`, merged with one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl BatchItem {
    pub fn insert(fields: Map<String, Value>) -> Self {
        Self {
            object_id: None,
            fields,
        }
    }

    pub fn update(object_id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            object_id: Some(object_id.into()),
            fields,
        }
    }
}

/// Document storage operations shared by the server and the HTTP client.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn find(&self, query: &Query) -> Result<Vec<Document>, BackendError>;

    async fn count(&self, query: &Query) -> Result<u64, BackendError>;

    /// Create an object of `class_name`
    async fn save(&self, class_name: &str, fields: Map<String, Value>) -> Result<Document, BackendError>;

    /// Shallow-merge `fields` into an existing object
    async fn update(
        &self,
        class_name: &str,
        object_id: &str,
        fields: Map<String, Value>,
    ) -> Result<Document, BackendError>;

    async fn delete(&self, class_name: &str, object_id: &str) -> Result<(), BackendError>;

    /// Save many objects of one class atomically
    async fn save_all(&self, class_name: &str, items: Vec<BatchItem>) -> Result<Vec<Document>, BackendError>;

    async fn upload_file(&self, upload: FileUpload) -> Result<StoredFile, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_codes() {
        assert_eq!(BackendError::validation("x").code(), "VALIDATION_ERROR");
        assert_eq!(
            BackendError::object_not_found("Tracking", "abc").code(),
            "OBJECT_NOT_FOUND"
        );
        assert_eq!(
            BackendError::Query(QueryError::InvalidField("a b".into())).code(),
            "VALIDATION_ERROR"
        );
        let remote = BackendError::Remote {
            message: "boom".into(),
            code: "CUSTOM".into(),
        };
        assert_eq!(remote.code(), "CUSTOM");
        assert_eq!(remote.to_string(), "boom");
        assert_eq!(
            BackendError::Internal(anyhow::anyhow!("db")).code(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn test_batch_item_wire_form() {
        let item: BatchItem =
            serde_json::from_value(json!({"objectId": "o1", "containerNo": "C1"})).unwrap();
        assert_eq!(item.object_id.as_deref(), Some("o1"));
        assert_eq!(item.fields.get("containerNo"), Some(&json!("C1")));
        assert!(!item.fields.contains_key("objectId"));

        let fresh = BatchItem::insert(json!({"billNo": "B1"}).as_object().cloned().unwrap());
        assert_eq!(serde_json::to_value(&fresh).unwrap(), json!({"billNo": "B1"}));
    }
}
