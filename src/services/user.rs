//! User service
//!
//! Operator accounts and login sessions:
//! - login / logout with session tokens
//! - session validation (expired sessions are removed on sight)
//! - account creation and password resets from the admin CLI

use crate::db::repositories::{SessionRepository, UserRepository};
use crate::models::{Session, User};
use crate::services::password::{check_password_length, hash_password, verify_password};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;

/// Default session expiration time in days
const DEFAULT_SESSION_EXPIRATION_DAYS: i64 = 7;

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Invalid credentials
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// User service for managing operators and authentication
pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    session_expiration_days: i64,
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
    ) -> Self {
        Self::with_session_expiration(user_repo, session_repo, DEFAULT_SESSION_EXPIRATION_DAYS)
    }

    pub fn with_session_expiration(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        session_expiration_days: i64,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            session_expiration_days,
        }
    }

    /// Verify credentials and open a session.
    ///
    /// Unknown users and wrong passwords produce the same error.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(User, Session), UserServiceError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(UserServiceError::ValidationError(
                "Username and password are required".to_string(),
            ));
        }

        let invalid = || {
            UserServiceError::AuthenticationError("Invalid username or password".to_string())
        };

        let user = self
            .user_repo
            .find_by_username(username)
            .await
            .context("Failed to look up user")?
            .ok_or_else(invalid)?;

        let valid = verify_password(password, &user.password_hash)
            .context("Failed to verify password")?;
        if !valid {
            tracing::warn!("Failed login for {}", username);
            return Err(invalid());
        }

        let session = Session::start(user.id, self.session_expiration_days);
        self.session_repo
            .insert(&session)
            .await
            .context("Failed to create session")?;

        tracing::info!("User {} logged in", user.username);
        Ok((user, session))
    }

    /// Revoke a session token. Unknown tokens are ignored.
    pub async fn logout(&self, token: &str) -> Result<(), UserServiceError> {
        self.session_repo
            .revoke(token)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// The user owning a live session, `None` for unknown or expired tokens.
    pub async fn validate_session(&self, token: &str) -> Result<Option<User>, UserServiceError> {
        let session = match self
            .session_repo
            .find(token)
            .await
            .context("Failed to get session")?
        {
            Some(s) => s,
            None => return Ok(None),
        };

        if session.is_expired() {
            if let Err(e) = self.session_repo.revoke(token).await {
                tracing::warn!("Failed to remove expired session: {}", e);
            }
            return Ok(None);
        }

        let user = self
            .user_repo
            .find_by_id(session.user_id)
            .await
            .context("Failed to get user")?;

        Ok(user)
    }

    /// Create an operator account
    pub async fn create_user(&self, username: &str, password: &str) -> Result<User, UserServiceError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(UserServiceError::ValidationError(
                "Username is required".to_string(),
            ));
        }
        if username.chars().count() > 50 {
            return Err(UserServiceError::ValidationError(
                "Username must be at most 50 characters".to_string(),
            ));
        }
        check_password_length(password).map_err(UserServiceError::ValidationError)?;

        if self
            .user_repo
            .find_by_username(username)
            .await
            .context("Failed to check username")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(username.to_string()));
        }

        let password_hash = hash_password(password).context("Failed to hash password")?;
        let user = self
            .user_repo
            .insert(&User::new(username.to_string(), password_hash))
            .await
            .context("Failed to create user")?;

        tracing::info!("Created user {}", user.username);
        Ok(user)
    }

    /// Set a new password and revoke the user's sessions
    pub async fn reset_password(&self, username: &str, password: &str) -> Result<(), UserServiceError> {
        check_password_length(password).map_err(UserServiceError::ValidationError)?;

        let user = self
            .user_repo
            .find_by_username(username.trim())
            .await
            .context("Failed to look up user")?
            .ok_or_else(|| UserServiceError::UserNotFound(username.to_string()))?;

        let password_hash = hash_password(password).context("Failed to hash password")?;
        self.user_repo
            .set_password_hash(user.id, &password_hash)
            .await
            .context("Failed to update password")?;
        self.session_repo
            .revoke_user(user.id)
            .await
            .context("Failed to revoke sessions")?;

        tracing::info!("Password reset for {}", user.username);
        Ok(())
    }

    pub async fn user_count(&self) -> Result<u64, UserServiceError> {
        Ok(self.user_repo.count().await.context("Failed to count users")?)
    }

    /// Remove expired sessions; returns how many were deleted
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, UserServiceError> {
        let removed = self
            .session_repo
            .purge_expired(Utc::now())
            .await
            .context("Failed to clean up sessions")?;
        if removed > 0 {
            tracing::info!("Removed {} expired session(s)", removed);
        }
        Ok(removed)
    }
}
