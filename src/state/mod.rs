//! Cross-phase task state
//!
//! The main phase records what teardown must clean up; teardown reads the
//! record once and removes it. Five keys are defined:
//! - `XCODE_KEYCHAIN_TO_DELETE`: temporary keychain path
//! - `XCODE_PROFILE_TO_DELETE`: installed provisioning profile UUID
//! - `XCODEBUILD_LOG`, `XCODEBUILD_ARCHIVE_LOG`, `XCODEBUILD_EXPORT_LOG`:
//!   raw build-tool logs
//!
//! Persistence needs a state directory. Without one the store is disabled:
//! values are still kept in memory for the current phase but nothing is
//! written, and teardown finds nothing to do.

mod record;

pub use record::{StateKey, StateRecord, SCHEMA_VERSION};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

/// File name of the state record inside the state directory.
pub const STATE_FILE_NAME: &str = "xcode-task-state.json";

/// State errors
#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported state schema version {0}")]
    SchemaVersion(u32),
}

/// Task state store for one job.
#[derive(Debug, Clone)]
pub struct TaskState {
    /// State file, `None` when persistence is disabled
    path: Option<PathBuf>,
    record: StateRecord,
}

impl TaskState {
    /// A store that never persists.
    pub fn disabled() -> Self {
        Self {
            path: None,
            record: StateRecord::new(),
        }
    }

    /// Open the store in `dir`, loading any record already there.
    pub fn open(dir: &Path) -> Result<Self, StateError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(STATE_FILE_NAME);
        let record = if path.exists() {
            StateRecord::from_file(&path)?
        } else {
            StateRecord::new()
        };
        Ok(Self {
            path: Some(path),
            record,
        })
    }

    /// Open the store in `dir`, or a disabled store when `dir` is `None`.
    pub fn open_or_disabled(dir: Option<&Path>) -> Result<Self, StateError> {
        match dir {
            Some(dir) => Self::open(dir),
            None => Ok(Self::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: StateKey) -> Option<&str> {
        self.record.get(key)
    }

    pub fn record(&self) -> &StateRecord {
        &self.record
    }

    /// Record a value and persist the store.
    pub fn set(&mut self, key: StateKey, value: impl Into<String>) -> Result<(), StateError> {
        let value = value.into();
        debug!("task state {} = {}", key, value);
        self.record.set(key, value);
        self.record.updated_at = Some(Utc::now());
        self.persist()
    }

    fn persist(&self) -> Result<(), StateError> {
        match self.path {
            Some(ref path) => self.record.write_to_file(path),
            None => Ok(()),
        }
    }

    /// Read the record in `dir` and delete it.
    ///
    /// A missing directory or file yields an empty record.
    pub fn consume(dir: Option<&Path>) -> Result<StateRecord, StateError> {
        let Some(dir) = dir else {
            debug!("task state is disabled; nothing to consume");
            return Ok(StateRecord::new());
        };
        let path = dir.join(STATE_FILE_NAME);
        if !path.exists() {
            return Ok(StateRecord::new());
        }
        let record = StateRecord::from_file(&path)?;
        fs::remove_file(&path)?;
        Ok(record)
    }
}
