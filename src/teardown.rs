//! Post-task teardown
//!
//! Reads the state the main phase recorded and undoes it: the temporary
//! keychain, the installed provisioning profile, and the raw build logs
//! (announced to the agent for upload). Nothing here fails the job; every
//! problem becomes a warning.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::keychain::Security;
use crate::profile::delete_installed;
use crate::state::{StateKey, StateRecord, TaskState};
use crate::telemetry::upload_log_file;
use crate::tool::ToolRunner;
use crate::warnings::Warnings;

/// Log keys announced for upload, in order.
const LOG_KEYS: [StateKey; 3] = [StateKey::BuildLog, StateKey::ArchiveLog, StateKey::ExportLog];

/// What teardown did.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    pub warnings: Warnings,
    /// Not a macOS host; nothing was attempted
    pub skipped: bool,
    pub keychain_deleted: Option<PathBuf>,
    pub profiles_deleted: Vec<PathBuf>,
    pub logs_uploaded: Vec<PathBuf>,
}

/// Teardown driver
pub struct Teardown<R> {
    runner: R,
    profiles_dir: Option<PathBuf>,
    macos_host: bool,
}

impl<R: ToolRunner> Teardown<R> {
    /// `profiles_dir` is the user provisioning-profiles directory, when known.
    pub fn new(runner: R, profiles_dir: Option<PathBuf>) -> Self {
        Self {
            runner,
            profiles_dir,
            macos_host: cfg!(target_os = "macos"),
        }
    }

    /// Override host detection.
    pub fn with_macos_host(mut self, macos_host: bool) -> Self {
        self.macos_host = macos_host;
        self
    }

    /// Consume the state in `state_dir` and clean up after it.
    pub fn run(&self, state_dir: Option<&Path>) -> TeardownReport {
        if !self.macos_host {
            info!("Teardown only runs on macOS hosts; nothing to do.");
            return TeardownReport {
                skipped: true,
                ..Default::default()
            };
        }
        match TaskState::consume(state_dir) {
            Ok(record) => self.run_record(&record),
            Err(e) => {
                let mut report = TeardownReport::default();
                report
                    .warnings
                    .push(format!("Unable to read task state: {}", e));
                report
            }
        }
    }

    /// Clean up after an already-loaded record.
    pub fn run_record(&self, record: &StateRecord) -> TeardownReport {
        let mut report = TeardownReport::default();

        if let Some(keychain) = non_blank(record.get(StateKey::KeychainToDelete)) {
            let keychain = PathBuf::from(keychain);
            match Security::new(&self.runner).delete_keychain(&keychain) {
                Ok(true) => report.keychain_deleted = Some(keychain),
                Ok(false) => debug!("keychain {} already gone", keychain.display()),
                Err(e) => report.warnings.push(format!(
                    "Failed to delete keychain {}: {}",
                    keychain.display(),
                    e
                )),
            }
        }

        if let Some(uuid) = non_blank(record.get(StateKey::ProfileToDelete)) {
            match self.profiles_dir {
                Some(ref dir) => match delete_installed(dir, uuid) {
                    Ok(deleted) => report.profiles_deleted = deleted,
                    Err(e) => report.warnings.push(format!(
                        "Failed to delete provisioning profile {}: {}",
                        uuid, e
                    )),
                },
                None => report.warnings.push(format!(
                    "HOME is not set; provisioning profile {} was not deleted.",
                    uuid
                )),
            }
        }

        for key in LOG_KEYS {
            if let Some(log) = non_blank(record.get(key)) {
                let log = PathBuf::from(log);
                if upload_log_file(&log) {
                    report.logs_uploaded.push(log);
                }
            }
        }

        report
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockResponse, MockToolRunner};
    use std::fs;
    use tempfile::TempDir;

    fn record(entries: &[(StateKey, String)]) -> StateRecord {
        let mut record = StateRecord::new();
        for (key, value) in entries {
            record.set(*key, value.clone());
        }
        record
    }

    #[test]
    fn test_non_macos_host_does_nothing() {
        let temp = TempDir::new().unwrap();
        let mut state = TaskState::open(temp.path()).unwrap();
        state.set(StateKey::KeychainToDelete, "/tmp/k.keychain").unwrap();

        let mock = MockToolRunner::new();
        let report = Teardown::new(&mock, None)
            .with_macos_host(false)
            .run(Some(temp.path()));
        assert!(report.skipped);
        assert!(mock.calls().is_empty());
        // state is left for a later run
        assert!(TaskState::open(temp.path())
            .unwrap()
            .get(StateKey::KeychainToDelete)
            .is_some());
    }

    #[test]
    fn test_deletes_existing_keychain_only() {
        let temp = TempDir::new().unwrap();
        let keychain = temp.path().join("ios_signing_temp.keychain");
        let mock = MockToolRunner::new();
        let teardown = Teardown::new(&mock, None).with_macos_host(true);

        let report = teardown.run_record(&record(&[(
            StateKey::KeychainToDelete,
            keychain.to_string_lossy().into_owned(),
        )]));
        assert!(report.keychain_deleted.is_none());
        assert!(mock.calls_to("security").is_empty());

        fs::write(&keychain, "k").unwrap();
        let report = teardown.run_record(&record(&[(
            StateKey::KeychainToDelete,
            keychain.to_string_lossy().into_owned(),
        )]));
        assert_eq!(report.keychain_deleted, Some(keychain));
        assert_eq!(mock.calls_matching("security", &["delete-keychain"]).len(), 1);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_keychain_failure_is_a_warning() {
        let temp = TempDir::new().unwrap();
        let keychain = temp.path().join("ios_signing_temp.keychain");
        fs::write(&keychain, "k").unwrap();
        let mock = MockToolRunner::new();
        mock.on(
            "security",
            &["delete-keychain"],
            MockResponse::failure(50, "The specified keychain could not be found."),
        );

        let report = Teardown::new(&mock, None)
            .with_macos_host(true)
            .run_record(&record(&[(
                StateKey::KeychainToDelete,
                keychain.to_string_lossy().into_owned(),
            )]));
        assert!(report.keychain_deleted.is_none());
        assert!(report.warnings.contains("Failed to delete keychain"));
    }

    #[test]
    fn test_deletes_profiles_by_uuid_prefix() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("Provisioning Profiles");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("ABC-123.mobileprovision"), "p").unwrap();
        fs::write(dir.join("ABC-123.provisionprofile"), "p").unwrap();
        fs::write(dir.join("DEF-456.mobileprovision"), "p").unwrap();

        let mock = MockToolRunner::new();
        let report = Teardown::new(&mock, Some(dir.clone()))
            .with_macos_host(true)
            .run_record(&record(&[(StateKey::ProfileToDelete, "ABC-123".to_string())]));
        assert_eq!(report.profiles_deleted.len(), 2);
        assert!(!dir.join("ABC-123.mobileprovision").exists());
        assert!(dir.join("DEF-456.mobileprovision").exists());
    }

    #[test]
    fn test_missing_profiles_dir_warns() {
        let mock = MockToolRunner::new();
        let report = Teardown::new(&mock, None)
            .with_macos_host(true)
            .run_record(&record(&[(StateKey::ProfileToDelete, "ABC-123".to_string())]));
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings.contains("ABC-123"));
    }

    #[test]
    fn test_uploads_existing_logs() {
        let temp = TempDir::new().unwrap();
        let build_log = temp.path().join("xcodebuild.log");
        let archive_log = temp.path().join("xcodebuild_archive.log");
        fs::write(&build_log, "log").unwrap();

        let mock = MockToolRunner::new();
        let report = Teardown::new(&mock, None)
            .with_macos_host(true)
            .run_record(&record(&[
                (StateKey::BuildLog, build_log.to_string_lossy().into_owned()),
                (StateKey::ArchiveLog, archive_log.to_string_lossy().into_owned()),
            ]));
        assert_eq!(report.logs_uploaded, vec![build_log]);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_run_consumes_state_file() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("xcodebuild.log");
        fs::write(&log, "log").unwrap();
        let mut state = TaskState::open(temp.path()).unwrap();
        state.set(StateKey::BuildLog, log.to_string_lossy()).unwrap();

        let mock = MockToolRunner::new();
        let teardown = Teardown::new(&mock, None).with_macos_host(true);
        let report = teardown.run(Some(temp.path()));
        assert_eq!(report.logs_uploaded.len(), 1);

        let report = teardown.run(Some(temp.path()));
        assert!(report.logs_uploaded.is_empty());
    }

    #[test]
    fn test_disabled_state_is_a_no_op() {
        let mock = MockToolRunner::new();
        let report = Teardown::new(&mock, None).with_macos_host(true).run(None);
        assert!(report.warnings.is_empty());
        assert!(mock.calls().is_empty());
    }
}
