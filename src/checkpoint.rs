//! Persistence for the end time of the last completed query window.
//!
//! Failures never propagate: an unreadable checkpoint behaves as "unset" and
//! a failed write only widens the next window.

use crate::error::CheckpointError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

pub trait CheckpointStore: Send + Sync {
    /// Last persisted end time in epoch seconds, `None` when unset.
    fn read(&self) -> Option<i64>;

    /// Persist `end_time`. Errors are logged, not returned.
    fn write(&self, end_time: i64);
}

/// Checkpoint kept in a single text file holding the decimal end time.
pub struct FileCheckpoint {
    path: PathBuf,
}

impl FileCheckpoint {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_read(&self) -> Result<i64, CheckpointError> {
        let content = fs::read_to_string(&self.path)?;
        parse_checkpoint(&content)
    }

    fn try_write(&self, end_time: i64) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        // rename keeps readers from ever seeing a half-written file
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, end_time.to_string())?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CheckpointStore for FileCheckpoint {
    fn read(&self) -> Option<i64> {
        match self.try_read() {
            Ok(value) => {
                debug!(path = %self.path.display(), value, "checkpoint loaded");
                Some(value)
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Error reading checkpoint: {}", e);
                None
            }
        }
    }

    fn write(&self, end_time: i64) {
        match self.try_write(end_time) {
            Ok(()) => {
                debug!(path = %self.path.display(), end_time, "checkpoint written");
                crate::metrics::QueryMetrics::record_checkpoint(end_time);
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Error writing checkpoint: {}", e);
            }
        }
    }
}

/// Process-local checkpoint, for tests and runs that should not persist.
#[derive(Default)]
pub struct MemoryCheckpoint {
    value: Mutex<Option<i64>>,
    writes: Mutex<Vec<i64>>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: i64) -> Self {
        Self {
            value: Mutex::new(Some(value)),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Every value passed to `write`, oldest first.
    pub fn writes(&self) -> Vec<i64> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl CheckpointStore for MemoryCheckpoint {
    fn read(&self) -> Option<i64> {
        self.value.lock().ok().and_then(|v| *v)
    }

    fn write(&self, end_time: i64) {
        if let Ok(mut value) = self.value.lock() {
            *value = Some(end_time);
        }
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(end_time);
        }
    }
}

fn parse_checkpoint(content: &str) -> Result<i64, CheckpointError> {
    let trimmed = content.trim();
    match trimmed.parse::<i64>() {
        Ok(value) if value >= 0 => Ok(value),
        _ => Err(CheckpointError::Malformed(trimmed.to_string())),
    }
}
