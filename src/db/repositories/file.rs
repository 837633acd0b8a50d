//! File repository
//!
//! Metadata for blobs written to the upload directory.

use crate::db::DynDatabasePool;
use crate::models::StoredFile;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

/// File repository trait
#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Record a stored file
    async fn create(&self, file: &StoredFile) -> Result<StoredFile>;

    /// Get file metadata by object id
    async fn get(&self, object_id: &str) -> Result<Option<StoredFile>>;

    /// Remove file metadata; returns whether it existed
    async fn delete(&self, object_id: &str) -> Result<bool>;
}

/// SQLx-based file repository implementation
pub struct SqlxFileRepository {
    pool: DynDatabasePool,
}

impl SqlxFileRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn FileRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl FileRepository for SqlxFileRepository {
    async fn create(&self, file: &StoredFile) -> Result<StoredFile> {
        create_file(self.pool.sqlite(), file).await
    }

    async fn get(&self, object_id: &str) -> Result<Option<StoredFile>> {
        get_file(self.pool.sqlite(), object_id).await
    }

    async fn delete(&self, object_id: &str) -> Result<bool> {
        delete_file(self.pool.sqlite(), object_id).await
    }
}

async fn create_file(pool: &SqlitePool, file: &StoredFile) -> Result<StoredFile> {
    sqlx::query(
        r#"
        INSERT INTO files (object_id, name, stored_name, mime_type, size, url, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&file.object_id)
    .bind(&file.name)
    .bind(&file.stored_name)
    .bind(&file.mime_type)
    .bind(file.size)
    .bind(&file.url)
    .bind(file.created_at)
    .execute(pool)
    .await
    .context("Failed to record file")?;

    Ok(file.clone())
}

async fn get_file(pool: &SqlitePool, object_id: &str) -> Result<Option<StoredFile>> {
    let row = sqlx::query(
        r#"
        SELECT object_id, name, stored_name, mime_type, size, url, created_at
        FROM files
        WHERE object_id = ?
        "#,
    )
    .bind(object_id)
    .fetch_optional(pool)
    .await
    .context("Failed to get file")?;

    match row {
        Some(row) => Ok(Some(row_to_file(&row)?)),
        None => Ok(None),
    }
}

async fn delete_file(pool: &SqlitePool, object_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM files WHERE object_id = ?")
        .bind(object_id)
        .execute(pool)
        .await
        .context("Failed to delete file")?;

    Ok(result.rows_affected() > 0)
}

fn row_to_file(row: &sqlx::sqlite::SqliteRow) -> Result<StoredFile> {
    Ok(StoredFile {
        object_id: row.get("object_id"),
        name: row.get("name"),
        stored_name: row.get("stored_name"),
        mime_type: row.get("mime_type"),
        size: row.get("size"),
        url: row.get("url"),
        created_at: row.get("created_at"),
    })
}
