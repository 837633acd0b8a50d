//! User model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::object::wire_timestamp;

/// An operator account allowed to log in to the admin tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: i64,
    /// Login name (unique)
    pub username: String,
    /// Password hash (argon2)
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new user. The password must already be hashed.
    pub fn new(username: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            username,
            password_hash,
            created_at: now,
            updated_at: now,
        }
    }

    /// Wire form returned by `login` and `getCurrentUser`
    pub fn to_wire(&self, session_token: Option<&str>) -> Value {
        let mut value = json!({
            "objectId": self.id.to_string(),
            "username": self.username,
            "createdAt": wire_timestamp(self.created_at),
            "updatedAt": wire_timestamp(self.updated_at),
        });
        if let (Some(token), Some(map)) = (session_token, value.as_object_mut()) {
            map.insert("sessionToken".to_string(), Value::String(token.to_string()));
        }
        value
    }
}
