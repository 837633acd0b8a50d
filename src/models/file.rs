//! Uploaded file metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Class name used to delete stored files through the generic `delete` action
pub const FILE_CLASS: &str = "_File";

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// A blob written to the upload directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub object_id: String,
    /// Name supplied by the uploader
    pub name: String,
    /// Name on disk, unique
    #[serde(default)]
    pub stored_name: String,
    pub mime_type: String,
    #[serde(default)]
    pub size: i64,
    pub url: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl StoredFile {
    /// `{objectId, name, url, mimeType}`
    pub fn to_wire(&self) -> Value {
        json!({
            "objectId": self.object_id,
            "name": self.name,
            "url": self.url,
            "mimeType": self.mime_type,
        })
    }
}

/// Upload request carried by the `uploadFile` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpload {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub base64_data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}
