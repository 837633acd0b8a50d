//! File service
//!
//! Stores base64 uploads in the upload directory and records their metadata.
//! Blobs are served back by the static `/files` route.

use crate::config::UploadConfig;
use crate::db::repositories::FileRepository;
use crate::models::{FileUpload, StoredFile, DEFAULT_MIME_TYPE};
use anyhow::Context;
use chrono::Utc;
use data_encoding::{BASE64, BASE64_NOPAD};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use uuid::Uuid;

/// Error types for file operations
#[derive(Debug, thiserror::Error)]
pub enum FileServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("File too large: {size} bytes (maximum {max} bytes)")]
    TooLarge { size: u64, max: u64 },

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct FileService {
    repo: Arc<dyn FileRepository>,
    config: UploadConfig,
}

impl FileService {
    pub fn new(repo: Arc<dyn FileRepository>, config: UploadConfig) -> Self {
        Self { repo, config }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.config.path
    }

    /// Decode and store an upload.
    ///
    /// The MIME type is the supplied one, else the one carried by a data URL
    /// prefix, else a guess from the filename.
    pub async fn upload(&self, upload: FileUpload) -> Result<StoredFile, FileServiceError> {
        let filename = upload.filename.trim();
        if filename.is_empty() || upload.base64_data.trim().is_empty() {
            return Err(FileServiceError::ValidationError(
                "Missing filename or file data".to_string(),
            ));
        }

        let (data_url_mime, payload) = split_data_url(&upload.base64_data);
        let bytes = decode_base64(payload).map_err(FileServiceError::ValidationError)?;

        let size = bytes.len() as u64;
        if size > self.config.max_file_size {
            return Err(FileServiceError::TooLarge {
                size,
                max: self.config.max_file_size,
            });
        }

        let mime_type = resolve_mime_type(filename, upload.mime_type.as_deref().or(data_url_mime));
        let stored_name = format!(
            "{}.{}",
            Uuid::new_v4().simple(),
            file_extension(filename, &mime_type)
        );

        fs::create_dir_all(&self.config.path)
            .await
            .with_context(|| format!("Failed to create upload dir: {:?}", self.config.path))?;
        fs::write(self.config.path.join(&stored_name), &bytes)
            .await
            .context("Failed to save file")?;

        let file = StoredFile {
            object_id: Uuid::new_v4().simple().to_string(),
            name: filename.to_string(),
            url: self.config.file_url(&stored_name),
            stored_name,
            mime_type,
            size: size as i64,
            created_at: Utc::now(),
        };

        if let Err(e) = self.repo.create(&file).await {
            // Don't leave an orphan blob behind
            let _ = fs::remove_file(self.config.path.join(&file.stored_name)).await;
            return Err(e.into());
        }

        tracing::info!(
            "Stored file {} as {} ({} bytes)",
            file.name,
            file.stored_name,
            file.size
        );
        Ok(file)
    }

    pub async fn get(&self, object_id: &str) -> Result<Option<StoredFile>, FileServiceError> {
        Ok(self.repo.get(object_id).await?)
    }

    /// Delete metadata and blob. A missing blob only logs a warning.
    pub async fn delete(&self, object_id: &str) -> Result<bool, FileServiceError> {
        let Some(file) = self.repo.get(object_id).await? else {
            return Ok(false);
        };

        self.repo.delete(object_id).await?;

        let path = self.config.path.join(&file.stored_name);
        if let Err(e) = fs::remove_file(&path).await {
            tracing::warn!("Failed to remove blob {:?}: {}", path, e);
        }
        Ok(true)
    }
}

/// Split an optional `data:<mime>;base64,` prefix from the payload
fn split_data_url(data: &str) -> (Option<&str>, &str) {
    let data = data.trim();
    match data.strip_prefix("data:").and_then(|rest| rest.split_once(',')) {
        Some((header, payload)) => {
            let mime = header
                .strip_suffix(";base64")
                .unwrap_or(header)
                .trim();
            ((!mime.is_empty()).then_some(mime), payload)
        }
        None => (None, data),
    }
}

/// Decode standard base64, with or without padding, ignoring whitespace
pub fn decode_base64(data: &str) -> Result<Vec<u8>, String> {
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(cleaned.as_bytes())
        .or_else(|_| BASE64_NOPAD.decode(cleaned.trim_end_matches('=').as_bytes()))
        .map_err(|e| format!("Invalid base64 data: {}", e))
}

fn resolve_mime_type(filename: &str, supplied: Option<&str>) -> String {
    match supplied.map(str::trim).filter(|m| !m.is_empty()) {
        Some(mime) => mime.to_string(),
        None => mime_guess::from_path(filename)
            .first_raw()
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string(),
    }
}

/// Extension for the stored name: the filename's, else one for the MIME type
fn file_extension(filename: &str, mime_type: &str) -> String {
    let from_name = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() < 10 && e.chars().all(|c| c.is_ascii_alphanumeric()));
    if let Some(ext) = from_name {
        return ext.to_lowercase();
    }
    if mime_type == DEFAULT_MIME_TYPE {
        return "bin".to_string();
    }

    mime_guess::get_mime_extensions_str(mime_type)
        .and_then(|exts| exts.first())
        .map(|e| e.to_string())
        .unwrap_or_else(|| "bin".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::SqlxFileRepository;
    use crate::db::{create_test_pool, migrations};
    use tempfile::TempDir;

    async fn setup_test_service(max_file_size: u64) -> (TempDir, FileService) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = UploadConfig {
            path: dir.path().join("uploads"),
            max_file_size,
            public_url: String::new(),
        };
        let service = FileService::new(SqlxFileRepository::boxed(pool), config);
        (dir, service)
    }

    fn upload(filename: &str, data: &[u8], mime: Option<&str>) -> FileUpload {
        FileUpload {
            filename: filename.to_string(),
            base64_data: BASE64.encode(data),
            mime_type: mime.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_upload_stores_blob_and_metadata() {
        let (_dir, service) = setup_test_service(1024).await;

        let file = service
            .upload(upload("提单 B1.PDF", b"%PDF-1.4", None))
            .await
            .expect("Failed to upload");

        assert_eq!(file.name, "提单 B1.PDF");
        assert_eq!(file.mime_type, "application/pdf");
        assert!(file.stored_name.ends_with(".pdf"));
        assert_eq!(file.url, format!("/files/{}", file.stored_name));
        let on_disk = std::fs::read(service.upload_dir().join(&file.stored_name)).unwrap();
        assert_eq!(on_disk, b"%PDF-1.4");
        assert!(service.get(&file.object_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let (_dir, service) = setup_test_service(4).await;

        assert!(matches!(
            service.upload(upload("", b"abc", None)).await,
            Err(FileServiceError::ValidationError(_))
        ));
        let bad = FileUpload {
            filename: "a.txt".into(),
            base64_data: "not base64!!".into(),
            mime_type: None,
        };
        assert!(matches!(
            service.upload(bad).await,
            Err(FileServiceError::ValidationError(_))
        ));
        assert!(matches!(
            service.upload(upload("a.txt", b"too long", None)).await,
            Err(FileServiceError::TooLarge { size: 8, max: 4 })
        ));
    }

    #[tokio::test]
    async fn test_mime_type_precedence() {
        let (_dir, service) = setup_test_service(1024).await;

        let supplied = service
            .upload(upload("scan.pdf", b"x", Some("image/png")))
            .await
            .unwrap();
        assert_eq!(supplied.mime_type, "image/png");

        let data_url = FileUpload {
            filename: "noext".into(),
            base64_data: format!("data:image/jpeg;base64,{}", BASE64.encode(b"jpg")),
            mime_type: None,
        };
        let from_data_url = service.upload(data_url).await.unwrap();
        assert_eq!(from_data_url.mime_type, "image/jpeg");
        assert!(!from_data_url.stored_name.ends_with(".bin"));

        let unknown = service.upload(upload("blob", b"x", None)).await.unwrap();
        assert_eq!(unknown.mime_type, "application/octet-stream");
        assert!(unknown.stored_name.ends_with(".bin"));
    }

    #[tokio::test]
    async fn test_delete_removes_blob() {
        let (_dir, service) = setup_test_service(1024).await;
        let file = service.upload(upload("a.txt", b"hello", None)).await.unwrap();
        let path = service.upload_dir().join(&file.stored_name);

        assert!(service.delete(&file.object_id).await.unwrap());
        assert!(!path.exists());
        assert!(!service.delete(&file.object_id).await.unwrap());
    }

    #[test]
    fn test_decode_base64_tolerates_padding_and_whitespace() {
        assert_eq!(decode_base64("aGVs\nbG8=").unwrap(), b"hello");
        assert_eq!(decode_base64("aGVsbG8").unwrap(), b"hello");
        assert!(decode_base64("@@@").is_err());
    }
}
