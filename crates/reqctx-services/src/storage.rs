//! Persistence for the session list, so registrations survive a restart.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use reqctx_protocol::{ContextError, Result};
use tracing::debug;

use crate::monitor::Session;

/// Backing store for the session list.
pub trait SessionStorage: Send + Sync {
    /// Load the persisted list. An empty list means nothing was stored yet.
    fn load(&self) -> Result<Vec<Session>>;

    /// Replace the persisted list.
    fn save(&self, sessions: &[Session]) -> Result<()>;
}

/// Holds the last saved list in memory.
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    saved: Mutex<Vec<Session>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate, as if a previous process had saved `sessions`.
    pub fn with_sessions(sessions: Vec<Session>) -> Self {
        Self {
            saved: Mutex::new(sessions),
        }
    }

    pub fn saved(&self) -> Vec<Session> {
        self.saved.lock().clone()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<Vec<Session>> {
        Ok(self.saved.lock().clone())
    }

    fn save(&self, sessions: &[Session]) -> Result<()> {
        *self.saved.lock() = sessions.to_vec();
        Ok(())
    }
}

/// Stores the list as a pretty-printed JSON array in one file.
#[derive(Debug)]
pub struct JsonFileSessionStorage {
    path: PathBuf,
}

impl JsonFileSessionStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for JsonFileSessionStorage {
    fn load(&self) -> Result<Vec<Session>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => {
                let sessions: Vec<Session> = serde_json::from_str(&content)?;
                debug!("Loaded {} sessions from {}", sessions.len(), self.path.display());
                Ok(sessions)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(ContextError::storage(format!(
                "read {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn save(&self, sessions: &[Session]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(sessions)?;
        std::fs::write(&self.path, json)
            .map_err(|e| ContextError::storage(format!("write {}: {e}", self.path.display())))
    }
}
