//! Untyped object handle
//!
//! For classes without a [`Record`](crate::models::Record) type. Fields set
//! since the last save are tracked, so updates only send what changed.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::models::{is_reserved_field, Document};
use crate::services::backend::{BackendError, BatchItem, ObjectBackend};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    class_name: String,
    object_id: Option<String>,
    fields: Map<String, Value>,
    dirty: Map<String, Value>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl StoredObject {
    /// A new object, created on first save
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            object_id: None,
            fields: Map::new(),
            dirty: Map::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Handle to an existing object without fetching it. Saving sends only
    /// the fields set on the handle.
    pub fn create_without_data(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_id: Some(object_id.into()),
            ..Self::new(class_name)
        }
    }

    pub fn from_document(doc: Document) -> Self {
        Self {
            class_name: doc.class_name,
            object_id: Some(doc.object_id),
            fields: doc.fields,
            dirty: Map::new(),
            created_at: Some(doc.created_at),
            updated_at: Some(doc.updated_at),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn object_id(&self) -> Option<&str> {
        self.object_id.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Set a field. Bookkeeping keys (`objectId`, timestamps) are ignored.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        if is_reserved_field(&key) {
            return self;
        }
        let value = value.into();
        self.fields.insert(key.clone(), value.clone());
        self.dirty.insert(key, value);
        self
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    fn absorb(&mut self, doc: Document) {
        self.object_id = Some(doc.object_id);
        self.fields = doc.fields;
        self.created_at = Some(doc.created_at);
        self.updated_at = Some(doc.updated_at);
        self.dirty.clear();
    }

    /// Create or update. Afterwards the handle reflects the stored object.
    pub async fn save(&mut self, backend: &dyn ObjectBackend) -> Result<(), BackendError> {
        let doc = match self.object_id.as_deref() {
            Some(id) => {
                backend
                    .update(&self.class_name, id, self.dirty.clone())
                    .await?
            }
            None => backend.save(&self.class_name, self.fields.clone()).await?,
        };
        self.absorb(doc);
        Ok(())
    }

    pub async fn destroy(&self, backend: &dyn ObjectBackend) -> Result<(), BackendError> {
        let id = self
            .object_id
            .as_deref()
            .ok_or_else(|| BackendError::validation("Cannot delete an unsaved object"))?;
        backend.delete(&self.class_name, id).await
    }

    /// Save several objects of one class in a single batch
    pub async fn save_all(
        backend: &dyn ObjectBackend,
        objects: &mut [StoredObject],
    ) -> Result<(), BackendError> {
        let Some(first) = objects.first() else {
            return Ok(());
        };
        let class_name = first.class_name.clone();
        if objects.iter().any(|o| o.class_name != class_name) {
            return Err(BackendError::validation(
                "saveAll requires objects of a single class",
            ));
        }

        let items = objects
            .iter()
            .map(|o| match o.object_id.as_deref() {
                Some(id) => BatchItem::update(id, o.dirty.clone()),
                None => BatchItem::insert(o.fields.clone()),
            })
            .collect();
        let saved = backend.save_all(&class_name, items).await?;
        if saved.len() != objects.len() {
            return Err(BackendError::Internal(anyhow::anyhow!(
                "saveAll returned {} objects for {} inputs",
                saved.len(),
                objects.len()
            )));
        }
        for (object, doc) in objects.iter_mut().zip(saved) {
            object.absorb(doc);
        }
        Ok(())
    }
}
