//! Object service
//!
//! The in-process document store behind `POST /api/store`. Validates class
//! and field names, keeps the bookkeeping keys out of caller data, merges
//! updates shallowly and routes `_File` deletes to the file service.

use crate::db::repositories::ObjectRepository;
use crate::models::{strip_reserved, Document, FileUpload, StoredFile, FILE_CLASS};
use crate::query::{validate_class_name, validate_field_name, Query};
use crate::services::backend::{BackendError, BatchItem, ObjectBackend};
use crate::services::file::{FileService, FileServiceError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

impl From<FileServiceError> for BackendError {
    fn from(err: FileServiceError) -> Self {
        match err {
            FileServiceError::ValidationError(msg) => BackendError::Validation(msg),
            e @ FileServiceError::TooLarge { .. } => BackendError::Validation(e.to_string()),
            FileServiceError::InternalError(e) => BackendError::Internal(e),
        }
    }
}

pub struct ObjectService {
    repo: Arc<dyn ObjectRepository>,
    files: Arc<FileService>,
}

impl ObjectService {
    pub fn new(repo: Arc<dyn ObjectRepository>, files: Arc<FileService>) -> Self {
        Self { repo, files }
    }

    pub fn files(&self) -> &Arc<FileService> {
        &self.files
    }

    /// Class names usable for documents. `_File` only supports `delete`.
    fn check_class(class_name: &str) -> Result<(), BackendError> {
        validate_class_name(class_name)?;
        if class_name == FILE_CLASS {
            return Err(BackendError::validation(
                "Class _File only supports uploadFile and delete",
            ));
        }
        Ok(())
    }

    fn clean_fields(fields: Map<String, Value>) -> Result<Map<String, Value>, BackendError> {
        let fields = strip_reserved(fields);
        for key in fields.keys() {
            validate_field_name(key)?;
        }
        Ok(fields)
    }

    pub async fn get(&self, class_name: &str, object_id: &str) -> Result<Document, BackendError> {
        Self::check_class(class_name)?;
        self.repo
            .get(class_name, object_id)
            .await?
            .ok_or_else(|| BackendError::object_not_found(class_name, object_id))
    }
}

#[async_trait]
impl ObjectBackend for ObjectService {
    async fn find(&self, query: &Query) -> Result<Vec<Document>, BackendError> {
        Self::check_class(query.class_name())?;
        query.validate()?;
        Ok(self.repo.find(query).await?)
    }

    async fn count(&self, query: &Query) -> Result<u64, BackendError> {
        Self::check_class(query.class_name())?;
        query.validate()?;
        Ok(self.repo.count(query).await?)
    }

    async fn save(&self, class_name: &str, fields: Map<String, Value>) -> Result<Document, BackendError> {
        Self::check_class(class_name)?;
        let doc = Document::new(class_name, Self::clean_fields(fields)?);
        let saved = self.repo.create(&doc).await?;
        tracing::info!("Created {} {}", class_name, saved.object_id);
        Ok(saved)
    }

    async fn update(
        &self,
        class_name: &str,
        object_id: &str,
        fields: Map<String, Value>,
    ) -> Result<Document, BackendError> {
        let fields = Self::clean_fields(fields)?;
        let mut doc = self.get(class_name, object_id).await?;
        doc.merge(fields);
        let saved = self.repo.update(&doc).await?;
        tracing::info!("Updated {} {}", class_name, object_id);
        Ok(saved)
    }

    async fn delete(&self, class_name: &str, object_id: &str) -> Result<(), BackendError> {
        if class_name == FILE_CLASS {
            if !self.files.delete(object_id).await? {
                return Err(BackendError::object_not_found(class_name, object_id));
            }
            tracing::info!("Deleted file {}", object_id);
            return Ok(());
        }

        Self::check_class(class_name)?;
        if !self.repo.delete(class_name, object_id).await? {
            return Err(BackendError::object_not_found(class_name, object_id));
        }
        tracing::info!("Deleted {} {}", class_name, object_id);
        Ok(())
    }

    async fn save_all(&self, class_name: &str, items: Vec<BatchItem>) -> Result<Vec<Document>, BackendError> {
        Self::check_class(class_name)?;

        let mut inserts = Vec::new();
        let mut updates: Vec<Document> = Vec::new();
        // Index into `inserts` or `updates` per input item, to return in order
        let mut order = Vec::with_capacity(items.len());
        let mut pending_updates: HashMap<String, usize> = HashMap::new();

        for item in items {
            let fields = Self::clean_fields(item.fields)?;
            match item.object_id {
                Some(object_id) => {
                    // Several items may target the same object; merge them in order
                    if let Some(&index) = pending_updates.get(&object_id) {
                        updates[index].merge(fields);
                        order.push((true, index));
                        continue;
                    }
                    let mut doc = self.get(class_name, &object_id).await?;
                    doc.merge(fields);
                    pending_updates.insert(object_id, updates.len());
                    order.push((true, updates.len()));
                    updates.push(doc);
                }
                None => {
                    order.push((false, inserts.len()));
                    inserts.push(Document::new(class_name, fields));
                }
            }
        }

        self.repo.save_many(&inserts, &updates).await?;
        tracing::info!(
            "Batch saved {} {} ({} new, {} updated)",
            order.len(),
            class_name,
            inserts.len(),
            updates.len()
        );

        Ok(order
            .into_iter()
            .map(|(is_update, index)| {
                if is_update {
                    updates[index].clone()
                } else {
                    inserts[index].clone()
                }
            })
            .collect())
    }

    async fn upload_file(&self, upload: FileUpload) -> Result<StoredFile, BackendError> {
        Ok(self.files.upload(upload).await?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::UploadConfig;
    use crate::db::repositories::{SqlxFileRepository, SqlxObjectRepository};
    use crate::db::{create_test_pool, migrations};
    use serde_json::json;
    use tempfile::TempDir;

    /// In-memory object service with a temporary upload directory
    pub(crate) async fn setup_test_service() -> (TempDir, Arc<ObjectService>) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let dir = TempDir::new().expect("Failed to create temp dir");
        let files = Arc::new(FileService::new(
            SqlxFileRepository::boxed(pool.clone()),
            UploadConfig {
                path: dir.path().to_path_buf(),
                ..UploadConfig::default()
            },
        ));
        let service = ObjectService::new(SqlxObjectRepository::boxed(pool), files);
        (dir, Arc::new(service))
    }

    pub(crate) fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_save_then_query_by_container() {
        let (_dir, service) = setup_test_service().await;
        let saved = service
            .save(
                "Tracking",
                fields(json!({"containerNo": "C1", "arrivalDate": "2024-01-15"})),
            )
            .await
            .expect("Failed to save");
        service
            .save("Tracking", fields(json!({"containerNo": "C2"})))
            .await
            .unwrap();

        let found = Query::new("Tracking")
            .equal_to("containerNo", "C1")
            .find(service.as_ref())
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].object_id, saved.object_id);
        assert_eq!(found[0].get_str("arrivalDate"), Some("2024-01-15"));
    }

    #[tokio::test]
    async fn test_save_rejects_bad_names_and_strips_reserved() {
        let (_dir, service) = setup_test_service().await;

        assert!(matches!(
            service.save("Bad Class", Map::new()).await,
            Err(BackendError::Query(_))
        ));
        assert!(matches!(
            service.save("Tracking", fields(json!({"a.b": 1}))).await,
            Err(BackendError::Query(_))
        ));
        assert!(matches!(
            service.save("_File", Map::new()).await,
            Err(BackendError::Validation(_))
        ));

        let saved = service
            .save("Tracking", fields(json!({"objectId": "forged", "billNo": "B1"})))
            .await
            .unwrap();
        assert_ne!(saved.object_id, "forged");
    }

    #[tokio::test]
    async fn test_update_merges_and_reports_missing() {
        let (_dir, service) = setup_test_service().await;
        let saved = service
            .save("Tracking", fields(json!({"billNo": "B1", "remark": "r"})))
            .await
            .unwrap();

        let updated = service
            .update("Tracking", &saved.object_id, fields(json!({"remark": "done"})))
            .await
            .unwrap();
        assert_eq!(updated.get_str("billNo"), Some("B1"));
        assert_eq!(updated.get_str("remark"), Some("done"));

        let err = service
            .update("Tracking", "missing", fields(json!({"remark": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "OBJECT_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_delete_object_and_file() {
        let (_dir, service) = setup_test_service().await;
        let saved = service.save("Link", fields(json!({"title": "t"}))).await.unwrap();

        service.delete("Link", &saved.object_id).await.unwrap();
        assert_eq!(
            service.delete("Link", &saved.object_id).await.unwrap_err().code(),
            "OBJECT_NOT_FOUND"
        );

        let file = service
            .upload_file(FileUpload {
                filename: "a.txt".into(),
                base64_data: "aGVsbG8=".into(),
                mime_type: None,
            })
            .await
            .unwrap();
        service.delete("_File", &file.object_id).await.unwrap();
        assert!(service.files().get(&file.object_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_all_mixes_inserts_and_updates_in_order() {
        let (_dir, service) = setup_test_service().await;
        let existing = service
            .save("Tracking", fields(json!({"containerNo": "C1"})))
            .await
            .unwrap();

        let saved = service
            .save_all(
                "Tracking",
                vec![
                    BatchItem::insert(fields(json!({"containerNo": "C2"}))),
                    BatchItem::update(existing.object_id.clone(), fields(json!({"remark": "r"}))),
                ],
            )
            .await
            .unwrap();

        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].get_str("containerNo"), Some("C2"));
        assert_eq!(saved[1].object_id, existing.object_id);
        assert_eq!(saved[1].get_str("remark"), Some("r"));
        assert_eq!(Query::new("Tracking").count(service.as_ref()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_save_all_fails_as_a_whole() {
        let (_dir, service) = setup_test_service().await;

        let result = service
            .save_all(
                "Tracking",
                vec![
                    BatchItem::insert(fields(json!({"containerNo": "C2"}))),
                    BatchItem::update("missing", fields(json!({"remark": "r"}))),
                ],
            )
            .await;

        assert!(result.is_err());
        assert_eq!(Query::new("Tracking").count(service.as_ref()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_or_query_is_a_union_without_duplicates() {
        let (_dir, service) = setup_test_service().await;
        for (container, customs) in [("ABC1", "X1"), ("X1", "X1"), ("ZZZ", "ZZZ")] {
            service
                .save(
                    "Tracking",
                    fields(json!({"containerNo": container, "customsNo": customs})),
                )
                .await
                .unwrap();
        }

        let found = Query::new("Tracking")
            .or([
                Query::new("Tracking").contains("containerNo", "X1"),
                Query::new("Tracking").contains("customsNo", "X1"),
            ])
            .find(service.as_ref())
            .await
            .unwrap();

        assert_eq!(found.len(), 2);
    }
}
