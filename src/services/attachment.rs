//! Attachments on tracking records
//!
//! Attachments are embedded in the owning `Tracking` document. Ids are
//! `max + 1` (1 for the first) and never renumbered, so an id stays valid
//! for the life of the record. Uploads run one batch at a time per process:
//! a second batch while one is in flight is refused.

use crate::models::{
    Attachment, FileUpload, PageRequest, PagedResult, Record, StoredFile, Tracking, CREATED_AT,
    FILE_CLASS, OBJECT_ID,
};
use crate::query::Query;
use crate::services::backend::{BackendError, ObjectBackend};
use chrono::Local;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("An attachment upload is already in progress")]
    UploadInProgress,

    #[error("No files to upload")]
    NoFiles,

    #[error("Tracking record not found: {0}")]
    RecordNotFound(String),

    #[error("Attachment {0} not found")]
    AttachmentNotFound(u32),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Single in-flight flag for attachment uploads
#[derive(Debug, Clone, Default)]
pub struct UploadGuard {
    busy: Arc<AtomicBool>,
}

impl UploadGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag; `None` while another upload holds it
    pub fn try_acquire(&self) -> Option<UploadPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| UploadPermit {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the upload flag when dropped
#[derive(Debug)]
pub struct UploadPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for UploadPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

pub fn next_attachment_id(attachments: &[Attachment]) -> u32 {
    attachments.iter().map(|a| a.id).max().map_or(1, |max| max + 1)
}

/// Append an attachment for an uploaded file and return it
pub fn push_attachment(attachments: &mut Vec<Attachment>, kind: &str, file: &StoredFile) -> Attachment {
    let attachment = Attachment {
        id: next_attachment_id(attachments),
        kind: kind.to_string(),
        name: file.name.clone(),
        upload_time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        file_url: file.url.clone(),
        file_id: file.object_id.clone(),
    };
    attachments.push(attachment.clone());
    attachment
}

/// Remove by id, leaving the other ids untouched
pub fn remove_attachment(attachments: &mut Vec<Attachment>, id: u32) -> Option<Attachment> {
    let index = attachments.iter().position(|a| a.id == id)?;
    Some(attachments.remove(index))
}

/// File name without its extension, used to find the owning record
pub fn file_stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .trim()
}

/// Outcome of uploading files to one record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub uploaded: Vec<Attachment>,
    /// `(file name, reason)`
    pub failed: Vec<(String, String)>,
}

/// Outcome of attaching files to records matched by file name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationReport {
    /// `(file name, container number)`
    pub attached: Vec<(String, String)>,
    pub unmatched: Vec<String>,
    /// `(file name, reason)`
    pub failed: Vec<(String, String)>,
}

/// One row of the files page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub attachment_id: u32,
    pub file_name: String,
    pub kind: String,
    pub container_no: String,
    pub customs_no: String,
    pub upload_time: String,
    pub tracking_id: String,
    pub file_url: String,
}

/// Flatten a record's attachments into file rows
pub fn file_entries(tracking: &Tracking) -> Vec<FileEntry> {
    let tracking_id = tracking.object_id.clone().unwrap_or_default();
    tracking
        .attachments
        .iter()
        .map(|a| FileEntry {
            attachment_id: a.id,
            file_name: a.name.clone(),
            kind: a.kind.clone(),
            container_no: tracking.container_no.clone(),
            customs_no: tracking.customs_no.clone(),
            upload_time: a.upload_time.clone(),
            tracking_id: tracking_id.clone(),
            file_url: a.file_url.clone(),
        })
        .collect()
}

fn attachments_patch(attachments: &[Attachment]) -> Result<Map<String, Value>, AttachmentError> {
    let value = serde_json::to_value(attachments)
        .map_err(|e| BackendError::Internal(anyhow::Error::new(e)))?;
    let mut patch = Map::new();
    patch.insert("attachments".to_string(), value);
    Ok(patch)
}

pub struct AttachmentService {
    backend: Arc<dyn ObjectBackend>,
    guard: UploadGuard,
}

impl AttachmentService {
    pub fn new(backend: Arc<dyn ObjectBackend>) -> Self {
        Self {
            backend,
            guard: UploadGuard::new(),
        }
    }

    pub fn guard(&self) -> &UploadGuard {
        &self.guard
    }

    /// Latest copy of a record, so concurrent edits to other fields survive
    async fn fetch(&self, object_id: &str) -> Result<Tracking, AttachmentError> {
        let doc = Query::of::<Tracking>()
            .equal_to(OBJECT_ID, object_id)
            .first(self.backend.as_ref())
            .await?
            .ok_or_else(|| AttachmentError::RecordNotFound(object_id.to_string()))?;
        Ok(doc.decode::<Tracking>().map_err(BackendError::from)?)
    }

    async fn store_attachments(
        &self,
        object_id: &str,
        attachments: &[Attachment],
    ) -> Result<Tracking, AttachmentError> {
        let doc = self
            .backend
            .update(Tracking::CLASS_NAME, object_id, attachments_patch(attachments)?)
            .await?;
        Ok(doc.decode::<Tracking>().map_err(BackendError::from)?)
    }

    /// Upload `files` concurrently and attach the successful ones to a record
    /// with a single update.
    pub async fn upload(
        &self,
        object_id: &str,
        kind: &str,
        files: Vec<FileUpload>,
    ) -> Result<(Tracking, UploadReport), AttachmentError> {
        if files.is_empty() {
            return Err(AttachmentError::NoFiles);
        }
        let _permit = self
            .guard
            .try_acquire()
            .ok_or(AttachmentError::UploadInProgress)?;

        let mut tracking = self.fetch(object_id).await?;
        let names: Vec<String> = files.iter().map(|f| f.filename.clone()).collect();
        let results = join_all(files.into_iter().map(|f| self.backend.upload_file(f))).await;

        let mut report = UploadReport::default();
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(file) => {
                    let attachment = push_attachment(&mut tracking.attachments, kind, &file);
                    report.uploaded.push(attachment);
                }
                Err(e) => {
                    tracing::warn!("Upload of {} failed: {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        if report.uploaded.is_empty() {
            return Ok((tracking, report));
        }

        let tracking = self.store_attachments(object_id, &tracking.attachments).await?;
        tracing::info!(
            "Attached {} file(s) to {} ({} failed)",
            report.uploaded.len(),
            object_id,
            report.failed.len()
        );
        Ok((tracking, report))
    }

    /// Detach an attachment and delete its stored file (best-effort)
    pub async fn remove(&self, object_id: &str, attachment_id: u32) -> Result<Tracking, AttachmentError> {
        let mut tracking = self.fetch(object_id).await?;
        let removed = remove_attachment(&mut tracking.attachments, attachment_id)
            .ok_or(AttachmentError::AttachmentNotFound(attachment_id))?;

        let tracking = self.store_attachments(object_id, &tracking.attachments).await?;

        if !removed.file_id.is_empty() {
            if let Err(e) = self.backend.delete(FILE_CLASS, &removed.file_id).await {
                tracing::warn!("Failed to delete stored file {}: {}", removed.file_id, e);
            }
        }
        Ok(tracking)
    }

    /// Attach each file to the first record whose container, customs or bill
    /// number contains the file's stem.
    pub async fn attach_by_name(
        &self,
        kind: &str,
        files: Vec<FileUpload>,
    ) -> Result<AssociationReport, AttachmentError> {
        if files.is_empty() {
            return Err(AttachmentError::NoFiles);
        }
        let _permit = self
            .guard
            .try_acquire()
            .ok_or(AttachmentError::UploadInProgress)?;

        let mut report = AssociationReport::default();
        for file in files {
            let name = file.filename.clone();
            match self.attach_one_by_name(kind, file).await {
                Ok(Some(container_no)) => report.attached.push((name, container_no)),
                Ok(None) => {
                    tracing::warn!("No record matches file {}", name);
                    report.unmatched.push(name);
                }
                Err(e) => {
                    tracing::warn!("Failed to attach {}: {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    async fn attach_one_by_name(
        &self,
        kind: &str,
        file: FileUpload,
    ) -> Result<Option<String>, AttachmentError> {
        let stem = file_stem(&file.filename).to_string();
        if stem.is_empty() {
            return Ok(None);
        }

        let matched = Query::of::<Tracking>()
            .or([
                Query::of::<Tracking>().contains("containerNo", stem.as_str()),
                Query::of::<Tracking>().contains("customsNo", stem.as_str()),
                Query::of::<Tracking>().contains("billNo", stem.as_str()),
            ])
            .ascending(CREATED_AT)
            .first(self.backend.as_ref())
            .await?;
        let Some(doc) = matched else {
            return Ok(None);
        };
        let mut tracking = doc.decode::<Tracking>().map_err(BackendError::from)?;

        let stored = self.backend.upload_file(file).await?;
        push_attachment(&mut tracking.attachments, kind, &stored);
        self.store_attachments(&doc.object_id, &tracking.attachments)
            .await?;
        Ok(Some(tracking.container_no))
    }

    /// Attachments across records, paged by record, newest records first
    pub async fn list_files(&self, params: PageRequest) -> Result<PagedResult<FileEntry>, AttachmentError> {
        let base = Query::of::<Tracking>().exists("attachments");
        let total = base.count(self.backend.as_ref()).await?;
        let records: Vec<Tracking> = base
            .select(["attachments", "containerNo", "customsNo"])
            .descending(CREATED_AT)
            .skip(params.offset())
            .limit(params.per_page)
            .find_as(self.backend.as_ref())
            .await?;

        let entries = records.iter().flat_map(file_entries).collect();
        Ok(PagedResult::new(entries, total, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::object::tests::{fields, setup_test_service};
    use serde_json::json;

    fn attachment(id: u32) -> Attachment {
        Attachment {
            id,
            kind: "提单".into(),
            name: format!("{}.pdf", id),
            upload_time: String::new(),
            file_url: String::new(),
            file_id: String::new(),
        }
    }

    fn upload(name: &str) -> FileUpload {
        FileUpload {
            filename: name.to_string(),
            base64_data: "aGVsbG8=".to_string(),
            mime_type: None,
        }
    }

    #[test]
    fn test_ids_are_max_plus_one_and_never_renumbered() {
        let mut list: Vec<Attachment> = (1..=3).map(attachment).collect();
        assert_eq!(next_attachment_id(&list), 4);

        remove_attachment(&mut list, 2).unwrap();
        let ids: Vec<u32> = list.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(next_attachment_id(&list), 4);
        assert_eq!(next_attachment_id(&[]), 1);
        assert!(remove_attachment(&mut list, 9).is_none());
    }

    #[test]
    fn test_guard_is_exclusive_until_dropped() {
        let guard = UploadGuard::new();
        let permit = guard.try_acquire().expect("first acquire");
        assert!(guard.is_busy());
        assert!(guard.try_acquire().is_none());
        drop(permit);
        assert!(!guard.is_busy());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("MSCU1234567.pdf"), "MSCU1234567");
        assert_eq!(file_stem("B1.final.PDF"), "B1.final");
        assert_eq!(file_stem("noext"), "noext");
    }

    #[tokio::test]
    async fn test_upload_attaches_in_one_update() {
        let (_dir, service) = setup_test_service().await;
        let record = service
            .save("Tracking", fields(json!({"containerNo": "C1", "attachments": [{"id": 5}]})))
            .await
            .unwrap();
        let attachments = AttachmentService::new(service.clone());

        let (tracking, report) = attachments
            .upload(&record.object_id, "检疫证", vec![upload("a.pdf"), upload("b.pdf")])
            .await
            .expect("Failed to upload");

        let ids: Vec<u32> = tracking.attachments.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![5, 6, 7]);
        assert_eq!(report.uploaded.len(), 2);
        assert!(report.failed.is_empty());
        assert!(tracking.has_quarantine_certificate());
        assert!(!attachments.guard().is_busy());
    }

    #[tokio::test]
    async fn test_upload_refused_while_busy() {
        let (_dir, service) = setup_test_service().await;
        let record = service
            .save("Tracking", fields(json!({"containerNo": "C1"})))
            .await
            .unwrap();
        let attachments = AttachmentService::new(service.clone());

        let _held = attachments.guard().try_acquire().unwrap();
        let result = attachments
            .upload(&record.object_id, "提单", vec![upload("a.pdf")])
            .await;

        assert!(matches!(result, Err(AttachmentError::UploadInProgress)));
    }

    #[tokio::test]
    async fn test_failed_uploads_are_reported() {
        let (_dir, service) = setup_test_service().await;
        let record = service
            .save("Tracking", fields(json!({"containerNo": "C1"})))
            .await
            .unwrap();
        let attachments = AttachmentService::new(service.clone());
        let broken = FileUpload {
            filename: "bad.pdf".into(),
            base64_data: "!!!".into(),
            mime_type: None,
        };

        let (tracking, report) = attachments
            .upload(&record.object_id, "提单", vec![broken, upload("good.pdf")])
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "bad.pdf");
        assert_eq!(tracking.attachments.len(), 1);
        assert_eq!(tracking.attachments[0].id, 1);
    }

    #[tokio::test]
    async fn test_remove_deletes_stored_file() {
        let (_dir, service) = setup_test_service().await;
        let record = service
            .save("Tracking", fields(json!({"containerNo": "C1"})))
            .await
            .unwrap();
        let attachments = AttachmentService::new(service.clone());
        let (tracking, _) = attachments
            .upload(&record.object_id, "提单", vec![upload("a.pdf"), upload("b.pdf")])
            .await
            .unwrap();
        let file_id = tracking.attachments[0].file_id.clone();

        let tracking = attachments.remove(&record.object_id, 1).await.unwrap();

        assert_eq!(tracking.attachments.iter().map(|a| a.id).collect::<Vec<_>>(), vec![2]);
        assert!(service.files().get(&file_id).await.unwrap().is_none());
        assert!(matches!(
            attachments.remove(&record.object_id, 1).await,
            Err(AttachmentError::AttachmentNotFound(1))
        ));
    }

    #[tokio::test]
    async fn test_attach_by_name_uses_first_match() {
        let (_dir, service) = setup_test_service().await;
        service
            .save("Tracking", fields(json!({"containerNo": "MSCU1234567", "billNo": "B1"})))
            .await
            .unwrap();
        service
            .save("Tracking", fields(json!({"containerNo": "TGHU7654321", "customsNo": "530120240001"})))
            .await
            .unwrap();
        let attachments = AttachmentService::new(service.clone());

        let report = attachments
            .attach_by_name(
                "报关单",
                vec![upload("530120240001.pdf"), upload("MSCU1234567.jpg"), upload("UNKNOWN.pdf")],
            )
            .await
            .unwrap();

        assert_eq!(
            report.attached,
            vec![
                ("530120240001.pdf".to_string(), "TGHU7654321".to_string()),
                ("MSCU1234567.jpg".to_string(), "MSCU1234567".to_string()),
            ]
        );
        assert_eq!(report.unmatched, vec!["UNKNOWN.pdf".to_string()]);

        let files = attachments.list_files(PageRequest::default()).await.unwrap();
        assert_eq!(files.total, 2);
        assert_eq!(files.items.len(), 2);
        // Newest record first
        assert_eq!(files.items[0].container_no, "TGHU7654321");
    }
}
