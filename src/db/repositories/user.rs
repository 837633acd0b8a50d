//! User repository
//!
//! Operator accounts for the admin tool. There is no sign-up: rows are
//! written by `tracking-admin create-user` and only the password hash ever
//! changes afterwards. Usernames are unique at the table level.

use crate::db::DynDatabasePool;
use crate::models::User;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;

const SELECT_BY_ID: &str =
    "SELECT id, username, password_hash, created_at, updated_at FROM users WHERE id = ?";
const SELECT_BY_USERNAME: &str =
    "SELECT id, username, password_hash, created_at, updated_at FROM users WHERE username = ?";

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Store a new account; the returned copy carries the assigned id
    async fn insert(&self, user: &User) -> Result<User>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Replace the password hash; `false` when the account is gone
    async fn set_password_hash(&self, id: i64, password_hash: &str) -> Result<bool>;

    async fn count(&self) -> Result<u64>;
}

pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn insert(&self, user: &User) -> Result<User> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO users (username, password_hash, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(now)
        .bind(now)
        .execute(self.pool.sqlite())
        .await
        .with_context(|| format!("Failed to create user {}", user.username))?;

        Ok(User {
            id: result.last_insert_rowid(),
            created_at: now,
            updated_at: now,
            ..user.clone()
        })
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query(SELECT_BY_ID)
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .with_context(|| format!("Failed to look up user {}", id))?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(SELECT_BY_USERNAME)
            .bind(username)
            .fetch_optional(self.pool.sqlite())
            .await
            .with_context(|| format!("Failed to look up user {}", username))?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn set_password_hash(&self, id: i64, password_hash: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to update password hash")?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool.sqlite())
            .await
            .context("Failed to count users")?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup() -> SqlxUserRepository {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        SqlxUserRepository::new(pool)
    }

    fn operator(name: &str) -> User {
        User::new(name.to_string(), "$argon2id$stub".to_string())
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_usernames_are_unique() {
        let repo = setup().await;
        let ops = repo.insert(&operator("ops")).await.unwrap();
        assert!(ops.id > 0);
        assert_eq!(ops.password_hash, "$argon2id$stub");

        assert!(repo.insert(&operator("ops")).await.is_err());
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lookups() {
        let repo = setup().await;
        let ops = repo.insert(&operator("ops")).await.unwrap();

        assert_eq!(repo.find_by_id(ops.id).await.unwrap().unwrap().username, "ops");
        assert_eq!(repo.find_by_username("ops").await.unwrap().unwrap().id, ops.id);
        assert!(repo.find_by_id(ops.id + 1).await.unwrap().is_none());
        assert!(repo.find_by_username("OPS").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_password_hash() {
        let repo = setup().await;
        let ops = repo.insert(&operator("ops")).await.unwrap();

        assert!(repo.set_password_hash(ops.id, "new-hash").await.unwrap());
        assert_eq!(
            repo.find_by_id(ops.id).await.unwrap().unwrap().password_hash,
            "new-hash"
        );
        assert!(!repo.set_password_hash(ops.id + 1, "x").await.unwrap());
    }
}
