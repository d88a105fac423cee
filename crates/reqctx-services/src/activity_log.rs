//! Durable sinks for session activity records.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use reqctx_protocol::{Activity, ContextError, Result};

/// Append-only destination for activity records.
pub trait ActivityLog: Send + Sync {
    fn append(&self, activity: &Activity) -> Result<()>;
}

/// Keeps every record in memory. Used by tests and when no log file is configured.
#[derive(Debug, Default)]
pub struct MemoryActivityLog {
    entries: Mutex<Vec<Activity>>,
}

impl MemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Activity> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl ActivityLog for MemoryActivityLog {
    fn append(&self, activity: &Activity) -> Result<()> {
        self.entries.lock().push(activity.clone());
        Ok(())
    }
}

/// Writes one JSON object per line to a file, creating parent directories on first use.
#[derive(Debug)]
pub struct JsonlActivityLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every record in the file. Lines that fail to parse are skipped.
    pub fn read_all(&self) -> Result<Vec<Activity>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

impl ActivityLog for JsonlActivityLog {
    fn append(&self, activity: &Activity) -> Result<()> {
        let mut line = serde_json::to_string(activity)?;
        line.push('\n');

        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                ContextError::storage(format!("open {}: {e}", self.path.display()))
            })?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}
