//! Tracking store
//!
//! Holds the full list of tracking records for the views. The list is loaded
//! once, shared as an immutable snapshot through a `watch` channel, and
//! replaced after every mutation, so each mutation notifies subscribers
//! exactly once.

pub mod views;

use chrono::Local;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::watch;

use crate::models::{
    CustomsStatus, FileUpload, Operation, Record, Tracking, CREATED_AT, OBJECT_ID, TRACKING_CLASS,
};
use crate::query::Query;
use crate::services::attachment::{AttachmentError, AttachmentService, UploadReport};
use crate::services::backend::{BackendError, ObjectBackend};

/// Fields that can no longer be edited once a record is released
pub const LOCKED_WHEN_RELEASED: [&str; 10] = [
    "arrivalDate",
    "declareDate",
    "preEntryNo",
    "billNo",
    "containerNo",
    "customsNo",
    "euDeposit",
    "country",
    "productName",
    "remark",
];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Tracking record not found: {0}")]
    NotFound(String),

    #[error("Record {0} has been declared and cannot be deleted")]
    DeclaredRecord(String),

    #[error("Field {field} of released record {object_id} cannot be edited")]
    Locked { object_id: String, field: String },

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Immutable view of the store
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub records: Arc<Vec<Tracking>>,
    /// Bumped on every change
    pub version: u64,
    /// False until the first load and after `invalidate`
    pub loaded: bool,
    /// Records the last load could not read
    pub unreadable: Vec<String>,
}

impl Snapshot {
    pub fn get(&self, object_id: &str) -> Option<&Tracking> {
        self.records
            .iter()
            .find(|t| t.object_id.as_deref() == Some(object_id))
    }
}

pub struct TrackingStore {
    backend: Arc<dyn ObjectBackend>,
    attachments: AttachmentService,
    page_size: u32,
    state: watch::Sender<Snapshot>,
}

fn patch(field: &str, value: impl Into<Value>) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(field.to_string(), value.into());
    map
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

impl TrackingStore {
    pub fn new(backend: Arc<dyn ObjectBackend>, page_size: u32) -> Self {
        let (state, _) = watch::channel(Snapshot::default());
        Self {
            attachments: AttachmentService::new(backend.clone()),
            backend,
            page_size,
            state,
        }
    }

    pub fn attachments(&self) -> &AttachmentService {
        &self.attachments
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.borrow().clone()
    }

    pub fn records(&self) -> Arc<Vec<Tracking>> {
        self.state.borrow().records.clone()
    }

    /// Fetch every record, replacing the current list
    pub async fn load(&self) -> Result<Snapshot, StoreError> {
        let decoded = Query::of::<Tracking>()
            .ascending(CREATED_AT)
            .find_all_decoded::<Tracking>(self.backend.as_ref(), self.page_size)
            .await?;
        let unreadable: Vec<String> = decoded.failed.iter().map(|(id, _)| id.clone()).collect();
        let records = decoded.warn_failed();
        tracing::info!("Loaded {} tracking records", records.len());

        self.state.send_modify(|snap| {
            snap.records = Arc::new(records);
            snap.unreadable = unreadable;
            snap.version += 1;
            snap.loaded = true;
        });
        Ok(self.snapshot())
    }

    /// Mark the list stale. The records stay readable until the next load.
    pub fn invalidate(&self) {
        self.state.send_modify(|snap| {
            snap.loaded = false;
            snap.version += 1;
        });
    }

    pub async fn ensure_loaded(&self) -> Result<Snapshot, StoreError> {
        let snapshot = self.snapshot();
        if snapshot.loaded {
            Ok(snapshot)
        } else {
            self.load().await
        }
    }

    /// Apply a change to the record list and notify once
    fn publish(&self, change: impl FnOnce(&mut Vec<Tracking>)) {
        self.state.send_modify(|snap| {
            let mut records = snap.records.as_ref().clone();
            change(&mut records);
            snap.records = Arc::new(records);
            snap.version += 1;
        });
    }

    fn replace(&self, tracking: Tracking) {
        self.publish(|records| {
            match records
                .iter_mut()
                .find(|t| t.object_id.is_some() && t.object_id == tracking.object_id)
            {
                Some(slot) => *slot = tracking,
                None => records.push(tracking),
            }
        });
    }

    /// The record as this store knows it, fetched when not loaded
    async fn current(&self, object_id: &str) -> Result<Tracking, StoreError> {
        if let Some(tracking) = self.snapshot().get(object_id) {
            return Ok(tracking.clone());
        }
        let doc = Query::of::<Tracking>()
            .equal_to(OBJECT_ID, object_id)
            .first(self.backend.as_ref())
            .await?
            .ok_or_else(|| StoreError::NotFound(object_id.to_string()))?;
        Ok(doc.decode().map_err(BackendError::from)?)
    }

    async fn persist(&self, object_id: &str, fields: Map<String, Value>) -> Result<Tracking, StoreError> {
        let doc = self.backend.update(TRACKING_CLASS, object_id, fields).await?;
        let tracking: Tracking = doc.decode().map_err(BackendError::from)?;
        self.replace(tracking.clone());
        Ok(tracking)
    }

    pub async fn create(&self, tracking: Tracking) -> Result<Tracking, StoreError> {
        let missing = tracking.missing_required();
        if !missing.is_empty() {
            return Err(BackendError::validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            ))
            .into());
        }

        let fields = tracking.to_fields().map_err(BackendError::from)?;
        let doc = self.backend.save(TRACKING_CLASS, fields).await?;
        let created: Tracking = doc.decode().map_err(BackendError::from)?;
        tracing::info!("Created tracking record {}", doc.object_id);
        self.replace(created.clone());
        Ok(created)
    }

    /// Edit plain fields. Released records keep their data fields.
    pub async fn update_fields(
        &self,
        object_id: &str,
        fields: Map<String, Value>,
    ) -> Result<Tracking, StoreError> {
        let current = self.current(object_id).await?;
        if current.is_released() {
            if let Some(field) = fields
                .keys()
                .find(|key| LOCKED_WHEN_RELEASED.contains(&key.as_str()))
            {
                return Err(StoreError::Locked {
                    object_id: object_id.to_string(),
                    field: field.clone(),
                });
            }
        }
        self.persist(object_id, fields).await
    }

    /// Set or clear the operation. Declaring a record without a declare
    /// date stamps today's date.
    pub async fn set_operation(
        &self,
        object_id: &str,
        operation: Option<Operation>,
    ) -> Result<Tracking, StoreError> {
        let current = self.current(object_id).await?;
        let mut fields = patch("operation", operation.map(|op| op.code()).unwrap_or(""));
        if operation == Some(Operation::Declared) && current.declare_date.trim().is_empty() {
            fields.insert("declareDate".to_string(), Value::String(today()));
        }
        self.persist(object_id, fields).await
    }

    pub async fn set_customs_status(
        &self,
        object_id: &str,
        status: Option<CustomsStatus>,
    ) -> Result<Tracking, StoreError> {
        let value = status.map(|s| s.code()).unwrap_or("");
        self.persist(object_id, patch("customsStatus", value)).await
    }

    /// Delete a record. Declared records are refused.
    pub async fn delete(&self, object_id: &str) -> Result<(), StoreError> {
        let current = self.current(object_id).await?;
        if current.is_declared() {
            return Err(StoreError::DeclaredRecord(object_id.to_string()));
        }

        self.backend.delete(TRACKING_CLASS, object_id).await?;
        tracing::info!("Deleted tracking record {}", object_id);
        self.publish(|records| records.retain(|t| t.object_id.as_deref() != Some(object_id)));
        Ok(())
    }

    pub async fn add_attachments(
        &self,
        object_id: &str,
        kind: &str,
        files: Vec<FileUpload>,
    ) -> Result<UploadReport, StoreError> {
        let (tracking, report) = self.attachments.upload(object_id, kind, files).await?;
        if !report.uploaded.is_empty() {
            self.replace(tracking);
        }
        Ok(report)
    }

    pub async fn remove_attachment(
        &self,
        object_id: &str,
        attachment_id: u32,
    ) -> Result<Tracking, StoreError> {
        let tracking = self.attachments.remove(object_id, attachment_id).await?;
        self.replace(tracking.clone());
        Ok(tracking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::object::tests::setup_test_service;
    use crate::services::object::ObjectService;
    use serde_json::json;
    use tempfile::TempDir;

    async fn seeded_store() -> (TempDir, Arc<ObjectService>, TrackingStore) {
        let (dir, service) = setup_test_service().await;
        let store = TrackingStore::new(service.clone(), 2);
        for (container, arrival) in [("C1", "2024-01-15"), ("C2", "2024-01-10"), ("C3", "")] {
            let mut fields = Map::new();
            fields.insert("containerNo".into(), json!(container));
            fields.insert("arrivalDate".into(), json!(arrival));
            service.save(TRACKING_CLASS, fields).await.unwrap();
        }
        (dir, service, store)
    }

    fn id_of(store: &TrackingStore, container: &str) -> String {
        store
            .records()
            .iter()
            .find(|t| t.container_no == container)
            .and_then(|t| t.object_id.clone())
            .unwrap()
    }

    #[tokio::test]
    async fn test_load_invalidate_reload() {
        let (_dir, service, store) = seeded_store().await;
        assert!(!store.snapshot().loaded);

        let snapshot = store.ensure_loaded().await.unwrap();
        assert!(snapshot.loaded);
        assert_eq!(snapshot.records.len(), 3);

        let mut fields = Map::new();
        fields.insert("containerNo".into(), json!("C4"));
        service.save(TRACKING_CLASS, fields).await.unwrap();
        assert_eq!(store.ensure_loaded().await.unwrap().records.len(), 3);

        store.invalidate();
        assert!(!store.snapshot().loaded);
        assert_eq!(store.ensure_loaded().await.unwrap().records.len(), 4);
    }

    #[tokio::test]
    async fn test_load_skips_unreadable_records() {
        let (_dir, service, store) = seeded_store().await;
        let mut fields = Map::new();
        fields.insert("containerNo".into(), json!("C9"));
        fields.insert("customsStatus".into(), json!("Released"));
        let bad = service.save(TRACKING_CLASS, fields).await.unwrap();

        let snapshot = store.load().await.unwrap();
        assert!(snapshot.loaded);
        assert_eq!(snapshot.records.len(), 3);
        assert_eq!(snapshot.unreadable, vec![bad.object_id]);
    }

    #[tokio::test]
    async fn test_mutation_notifies_once() {
        let (_dir, _service, store) = seeded_store().await;
        store.load().await.unwrap();
        let mut rx = store.subscribe();
        let before = rx.borrow_and_update().version;

        let id = id_of(&store, "C1");
        store
            .set_customs_status(&id, Some(CustomsStatus::PortInspection))
            .await
            .unwrap();

        assert!(rx.has_changed().unwrap());
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.version, before + 1);
        assert_eq!(
            snap.get(&id).unwrap().customs_status,
            Some(CustomsStatus::PortInspection)
        );
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_declaring_stamps_date_and_blocks_delete() {
        let (_dir, _service, store) = seeded_store().await;
        store.load().await.unwrap();
        let id = id_of(&store, "C2");

        let declared = store
            .set_operation(&id, Some(Operation::Declared))
            .await
            .unwrap();
        assert_eq!(declared.declare_date, today());
        assert!(declared.is_declared());

        let err = store.delete(&id).await.unwrap_err();
        assert!(matches!(err, StoreError::DeclaredRecord(_)));

        // An existing declare date is kept
        let other = id_of(&store, "C1");
        store
            .update_fields(&other, patch("declareDate", "2024-01-20"))
            .await
            .unwrap();
        let kept = store
            .set_operation(&other, Some(Operation::Declared))
            .await
            .unwrap();
        assert_eq!(kept.declare_date, "2024-01-20");

        let open = id_of(&store, "C3");
        store.delete(&open).await.unwrap();
        assert_eq!(store.records().len(), 2);
    }

    #[tokio::test]
    async fn test_released_records_lock_data_fields() {
        let (_dir, _service, store) = seeded_store().await;
        store.load().await.unwrap();
        let id = id_of(&store, "C1");
        store
            .set_customs_status(&id, Some(CustomsStatus::Released))
            .await
            .unwrap();

        let err = store
            .update_fields(&id, patch("billNo", "B9"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Locked { .. }));

        let updated = store
            .update_fields(&id, patch("instruction", "keep cold"))
            .await
            .unwrap();
        assert_eq!(updated.instruction, "keep cold");
    }

    #[tokio::test]
    async fn test_attachments_flow_through_store() {
        let (_dir, _service, store) = seeded_store().await;
        store.load().await.unwrap();
        let id = id_of(&store, "C1");

        let report = store
            .add_attachments(
                &id,
                "发票",
                vec![
                    FileUpload {
                        filename: "a.pdf".into(),
                        base64_data: "JVBERi0=".into(),
                        mime_type: None,
                    },
                    FileUpload {
                        filename: "b.pdf".into(),
                        base64_data: "JVBERi0=".into(),
                        mime_type: None,
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(report.uploaded.len(), 2);
        assert_eq!(views::attachment_counts(&store.records())[&id], 2);

        let tracking = store.remove_attachment(&id, 1).await.unwrap();
        let ids: Vec<u32> = tracking.attachments.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(store.snapshot().get(&id).unwrap().attachments.len(), 1);
    }

    #[tokio::test]
    async fn test_create_requires_container_and_arrival() {
        let (_dir, _service, store) = seeded_store().await;
        let err = store
            .create(Tracking {
                container_no: "C9".into(),
                ..Tracking::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(BackendError::Validation(_))));

        let created = store
            .create(Tracking {
                container_no: "C9".into(),
                arrival_date: "2024-02-01".into(),
                ..Tracking::default()
            })
            .await
            .unwrap();
        assert!(created.object_id.is_some());
        assert_eq!(store.records().len(), 1);
    }
}
