//! Client session persistence
//!
//! The token returned by `login` is kept together with the cached user
//! object, so a restarted admin tool stays logged in.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// A saved login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSession {
    pub session_token: String,
    /// User object as returned by `login` / `getCurrentUser`
    #[serde(default)]
    pub user: Value,
}

/// Where the client keeps its session between calls
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Option<SavedSession>;

    fn save(&self, session: &SavedSession) -> anyhow::Result<()>;

    /// Forget token and user
    fn clear(&self) -> anyhow::Result<()>;
}

/// Process-local session, lost on exit
#[derive(Default)]
pub struct MemorySessionStore {
    session: RwLock<Option<SavedSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<SavedSession> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn save(&self, session: &SavedSession) -> anyhow::Result<()> {
        *self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        *self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}

/// Session stored as JSON in a file
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    /// A missing or unreadable file means "not logged in"
    fn load(&self) -> Option<SavedSession> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<SavedSession>(&content) {
            Ok(session) if !session.session_token.is_empty() => Some(session),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Ignoring corrupt session file {:?}: {}", self.path, e);
                None
            }
        }
    }

    fn save(&self, session: &SavedSession) -> anyhow::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create session dir: {:?}", dir))?;

        // Write then rename, so a crash never leaves half a file
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .context("Failed to create temporary session file")?;
        serde_json::to_writer_pretty(&mut tmp, session).context("Failed to encode session")?;
        tmp.flush().context("Failed to write session")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to save session to {:?}", self.path))?;
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {:?}", self.path)),
        }
    }
}
