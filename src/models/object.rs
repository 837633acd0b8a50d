//! Stored documents
//!
//! Every record class (tracking rows, reference tables, quick links) is a flat
//! JSON document addressed by class name and object id. `Document` is the
//! untyped form that crosses the wire; `Record` types are typed views of it.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const OBJECT_ID: &str = "objectId";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

/// Fields maintained by the store rather than by callers
pub fn is_reserved_field(name: &str) -> bool {
    matches!(name, OBJECT_ID | CREATED_AT | UPDATED_AT)
}

/// Remove store-maintained keys from caller supplied data
pub fn strip_reserved(mut fields: Map<String, Value>) -> Map<String, Value> {
    fields.retain(|key, _| !is_reserved_field(key));
    fields
}

/// Timestamp format used on the wire and in the database
pub fn wire_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a wire timestamp
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Document decoding errors
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Expected a JSON object")]
    NotAnObject,
    #[error("Document is missing objectId")]
    MissingObjectId,
    #[error("Failed to convert document: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A stored object
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub object_id: String,
    pub class_name: String,
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// A new, not yet persisted document with a fresh object id
    pub fn new(class_name: impl Into<String>, fields: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            object_id: Uuid::new_v4().simple().to_string(),
            class_name: class_name.into(),
            fields: strip_reserved(fields),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Shallow merge: each supplied field replaces the stored one.
    pub fn merge(&mut self, fields: Map<String, Value>) {
        for (key, value) in strip_reserved(fields) {
            self.fields.insert(key, value);
        }
        self.updated_at = Utc::now();
    }

    /// `{objectId, createdAt, updatedAt, ...fields}`
    pub fn to_wire(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 3);
        map.insert(OBJECT_ID.to_string(), Value::String(self.object_id.clone()));
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.clone());
        }
        map.insert(
            CREATED_AT.to_string(),
            Value::String(wire_timestamp(self.created_at)),
        );
        map.insert(
            UPDATED_AT.to_string(),
            Value::String(wire_timestamp(self.updated_at)),
        );
        Value::Object(map)
    }

    /// Wire form restricted to `select` (the bookkeeping keys are always kept)
    pub fn to_wire_projected(&self, select: &[String]) -> Value {
        let mut value = self.to_wire();
        if select.is_empty() {
            return value;
        }
        if let Some(map) = value.as_object_mut() {
            map.retain(|key, _| is_reserved_field(key) || select.iter().any(|s| s == key));
        }
        value
    }

    /// Parse the wire form produced by [`Document::to_wire`]
    pub fn from_wire(class_name: impl Into<String>, value: Value) -> Result<Self, DocumentError> {
        let Value::Object(mut map) = value else {
            return Err(DocumentError::NotAnObject);
        };

        let object_id = match map.remove(OBJECT_ID) {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => return Err(DocumentError::MissingObjectId),
        };
        let now = Utc::now();
        let created_at = map
            .remove(CREATED_AT)
            .and_then(|v| v.as_str().and_then(parse_timestamp))
            .unwrap_or(now);
        let updated_at = map
            .remove(UPDATED_AT)
            .and_then(|v| v.as_str().and_then(parse_timestamp))
            .unwrap_or(created_at);

        Ok(Self {
            object_id,
            class_name: class_name.into(),
            fields: map,
            created_at,
            updated_at,
        })
    }

    /// Typed view of this document
    pub fn decode<T: Record>(&self) -> Result<T, DocumentError> {
        Ok(serde_json::from_value(self.to_wire())?)
    }
}

/// A typed record class.
///
/// Implementors serialize to camelCase field maps with an optional
/// `objectId`; `to_fields` yields the persisted fields.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Class name records of this type are stored under
    const CLASS_NAME: &'static str;

    fn object_id(&self) -> Option<&str>;

    /// Fields to persist, without the store-maintained keys
    fn to_fields(&self) -> Result<Map<String, Value>, DocumentError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(strip_reserved(map)),
            _ => Err(DocumentError::NotAnObject),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_new_document_strips_reserved_fields() {
        let doc = Document::new(
            "Tracking",
            fields(json!({"objectId": "forged", "containerNo": "C1", "createdAt": "x"})),
        );
        assert_ne!(doc.object_id, "forged");
        assert_eq!(doc.object_id.len(), 32);
        assert_eq!(doc.get_str("containerNo"), Some("C1"));
        assert!(doc.get("createdAt").is_none());
    }

    #[test]
    fn test_wire_roundtrip_keeps_identity_and_timestamps() {
        let doc = Document::new("Tracking", fields(json!({"billNo": "B1", "count": 3})));
        let parsed = Document::from_wire("Tracking", doc.to_wire()).unwrap();

        assert_eq!(parsed.object_id, doc.object_id);
        assert_eq!(parsed.fields, doc.fields);
        assert_eq!(
            wire_timestamp(parsed.created_at),
            wire_timestamp(doc.created_at)
        );
    }

    #[test]
    fn test_from_wire_requires_object_id() {
        let err = Document::from_wire("Tracking", json!({"billNo": "B1"})).unwrap_err();
        assert!(matches!(err, DocumentError::MissingObjectId));

        let err = Document::from_wire("Tracking", json!([1, 2])).unwrap_err();
        assert!(matches!(err, DocumentError::NotAnObject));
    }

    #[test]
    fn test_merge_is_shallow_and_bumps_updated_at() {
        let mut doc = Document::new(
            "Tracking",
            fields(json!({"billNo": "B1", "attachments": [{"id": 1}]})),
        );
        let before = doc.updated_at;
        doc.merge(fields(json!({"attachments": [], "remark": "late"})));

        assert_eq!(doc.get_str("billNo"), Some("B1"));
        assert_eq!(doc.get("attachments"), Some(&json!([])));
        assert_eq!(doc.get_str("remark"), Some("late"));
        assert!(doc.updated_at >= before);
    }

    #[test]
    fn test_projection_keeps_bookkeeping_keys() {
        let doc = Document::new("Tracking", fields(json!({"billNo": "B1", "remark": "r"})));
        let projected = doc.to_wire_projected(&["billNo".to_string()]);
        let map = projected.as_object().unwrap();

        assert!(map.contains_key("objectId"));
        assert!(map.contains_key("createdAt"));
        assert!(map.contains_key("billNo"));
        assert!(!map.contains_key("remark"));
    }
}
