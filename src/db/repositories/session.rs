//! Session repository
//!
//! A session row is the server half of a login. Its id is the opaque
//! `sessionToken` the client sends back with every store request, so lookups
//! are by token and revocation is a plain delete. Expiry is checked by the
//! caller; rows past `expires_at` linger until revoked or purged.

use crate::db::DynDatabasePool;
use crate::models::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<()>;

    /// Session behind a token, expired or not
    async fn find(&self, token: &str) -> Result<Option<Session>>;

    /// Drop one token; `false` when it was already gone
    async fn revoke(&self, token: &str) -> Result<bool>;

    /// Drop every token of a user, e.g. after a password reset
    async fn revoke_user(&self, user_id: i64) -> Result<u64>;

    /// Drop the sessions that expired before `cutoff`
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

fn session_from_row(row: &SqliteRow) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn insert(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(session.user_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(self.pool.sqlite())
        .await
        .with_context(|| format!("Failed to store session for user {}", session.user_id))?;
        Ok(())
    }

    async fn find(&self, token: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, user_id, expires_at, created_at FROM sessions WHERE id = ?",
        )
        .bind(token)
        .fetch_optional(self.pool.sqlite())
        .await
        .context("Failed to look up session")?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn revoke(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(token)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to revoke session")?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_user(&self, user_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(self.pool.sqlite())
            .await
            .with_context(|| format!("Failed to revoke sessions of user {}", user_id))?;
        Ok(result.rows_affected())
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
            .bind(cutoff)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to purge expired sessions")?;
        Ok(result.rows_affected())
    }
}
