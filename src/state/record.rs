//! Persisted state record (xcode-task-state.json)

use std::fmt;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StateError;

/// Schema version for xcode-task-state.json
pub const SCHEMA_VERSION: u32 = 1;

/// Named values handed from the main phase to teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    KeychainToDelete,
    ProfileToDelete,
    BuildLog,
    ArchiveLog,
    ExportLog,
}

impl StateKey {
    pub const ALL: [StateKey; 5] = [
        StateKey::KeychainToDelete,
        StateKey::ProfileToDelete,
        StateKey::BuildLog,
        StateKey::ArchiveLog,
        StateKey::ExportLog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::KeychainToDelete => "XCODE_KEYCHAIN_TO_DELETE",
            StateKey::ProfileToDelete => "XCODE_PROFILE_TO_DELETE",
            StateKey::BuildLog => "XCODEBUILD_LOG",
            StateKey::ArchiveLog => "XCODEBUILD_ARCHIVE_LOG",
            StateKey::ExportLog => "XCODEBUILD_EXPORT_LOG",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State record contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub schema_version: u32,

    #[serde(rename = "XCODE_KEYCHAIN_TO_DELETE", default, skip_serializing_if = "Option::is_none")]
    pub keychain_to_delete: Option<String>,

    #[serde(rename = "XCODE_PROFILE_TO_DELETE", default, skip_serializing_if = "Option::is_none")]
    pub profile_to_delete: Option<String>,

    #[serde(rename = "XCODEBUILD_LOG", default, skip_serializing_if = "Option::is_none")]
    pub build_log: Option<String>,

    #[serde(rename = "XCODEBUILD_ARCHIVE_LOG", default, skip_serializing_if = "Option::is_none")]
    pub archive_log: Option<String>,

    #[serde(rename = "XCODEBUILD_EXPORT_LOG", default, skip_serializing_if = "Option::is_none")]
    pub export_log: Option<String>,

    /// Last write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StateRecord {
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            ..Default::default()
        }
    }

    fn slot(&self, key: StateKey) -> &Option<String> {
        match key {
            StateKey::KeychainToDelete => &self.keychain_to_delete,
            StateKey::ProfileToDelete => &self.profile_to_delete,
            StateKey::BuildLog => &self.build_log,
            StateKey::ArchiveLog => &self.archive_log,
            StateKey::ExportLog => &self.export_log,
        }
    }

    fn slot_mut(&mut self, key: StateKey) -> &mut Option<String> {
        match key {
            StateKey::KeychainToDelete => &mut self.keychain_to_delete,
            StateKey::ProfileToDelete => &mut self.profile_to_delete,
            StateKey::BuildLog => &mut self.build_log,
            StateKey::ArchiveLog => &mut self.archive_log,
            StateKey::ExportLog => &mut self.export_log,
        }
    }

    /// Value for `key`, `None` when unset or blank.
    pub fn get(&self, key: StateKey) -> Option<&str> {
        self.slot(key)
            .as_deref()
            .filter(|v| !v.trim().is_empty())
    }

    pub fn set(&mut self, key: StateKey, value: String) {
        *self.slot_mut(key) = Some(value);
    }

    /// Whether no key holds a value.
    pub fn is_empty(&self) -> bool {
        StateKey::ALL.iter().all(|k| self.get(*k).is_none())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, StateError> {
        let record: StateRecord = serde_json::from_str(json)?;
        if record.schema_version != SCHEMA_VERSION {
            return Err(StateError::SchemaVersion(record.schema_version));
        }
        Ok(record)
    }

    /// Write atomically (temp file then rename).
    pub fn write_to_file(&self, path: &Path) -> Result<(), StateError> {
        let json = self.to_json()?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self, StateError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
