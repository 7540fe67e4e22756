//! Shared fixtures for the task integration tests
//!
//! Provides:
//! - Scripted tool runners preloaded with `xcodebuild -version` output
//! - On-disk workspace, project and archive layouts
//! - Canned provisioning-profile and certificate tool output

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use xcode_task::mock::{MockResponse, MockToolRunner};
use xcode_task::plist::PLIST_BUDDY;
use xcode_task::xcodebuild::XCODEBUILD;
use xcode_task::HostEnv;

/// Minimal `security cms -D` output
pub const DECODED_PROFILE: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<plist version=\"1.0\">\n<dict/>\n</plist>";

/// `PlistBuddy -c "Print ProvisionedDevices"` for a device-bound profile
pub const DEVICE_LIST: &str = "Array {\n    00008030-001A2B3C4D5E\n}";

/// `openssl pkcs12 | openssl x509` output for a certificate valid in 2024
pub const X509_OUTPUT: &str = "SHA1 Fingerprint=AA:BB:CC:DD\n\
subject= /UID=T1/CN=iPhone Distribution: Contoso (T1)/OU=T1/O=Contoso/C=US\n\
notBefore=Jan  1 00:00:00 2023 GMT\n\
notAfter=Jan  1 00:00:00 2030 GMT";

/// Working directory and scratch directory for one task run.
pub struct TaskDirs {
    _temp: TempDir,
    pub work: PathBuf,
    pub scratch: PathBuf,
    pub home: PathBuf,
    pub state: PathBuf,
}

impl TaskDirs {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("create temp dir");
        let work = temp.path().join("src");
        let scratch = temp.path().join("tmp");
        let home = temp.path().join("home");
        let state = temp.path().join("state");
        for dir in [&work, &scratch, &home, &state] {
            fs::create_dir_all(dir).expect("create fixture dir");
        }
        Self {
            _temp: temp,
            work,
            scratch,
            home,
            state,
        }
    }

    pub fn host(&self) -> HostEnv {
        HostEnv::new(&self.scratch, Some(self.home.clone()))
    }

    /// `<work>/<name>.xcworkspace` plus a sibling `<name>.xcodeproj`
    /// whose `project.pbxproj` holds `pbxproj`.
    pub fn workspace(&self, name: &str, pbxproj: &str) -> PathBuf {
        let workspace = self.work.join(format!("{}.xcworkspace", name));
        fs::create_dir_all(&workspace).expect("create workspace");
        let project = self.work.join(format!("{}.xcodeproj", name));
        fs::create_dir_all(&project).expect("create project");
        fs::write(project.join("project.pbxproj"), pbxproj).expect("write pbxproj");
        workspace
    }

    /// An archive at `<root>/<name>.xcarchive` holding one app with an
    /// embedded mobile profile.
    pub fn archive(&self, root: &Path, name: &str) -> PathBuf {
        let archive = root.join(format!("{}.xcarchive", name));
        let app = archive
            .join("Products")
            .join("Applications")
            .join(format!("{}.app", name));
        fs::create_dir_all(&app).expect("create app bundle");
        fs::write(app.join("embedded.mobileprovision"), b"profile").expect("write profile");
        fs::write(app.join("Info.plist"), b"<plist/>").expect("write Info.plist");
        archive
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.home
            .join("Library")
            .join("MobileDevice")
            .join("Provisioning Profiles")
    }
}

/// A runner that reports `version` from `xcodebuild -version`.
pub fn xcode_mock(version: &str) -> MockToolRunner {
    let mock = MockToolRunner::new();
    mock.on(
        XCODEBUILD,
        &["-version"],
        MockResponse::stdout(&format!("Xcode {}\nBuild version 10B61", version)),
    );
    mock
}

/// Script profile decoding so every embedded profile reads as an ad-hoc
/// profile named `name` for an app with `bundle_id`.
pub fn script_ad_hoc_profile(mock: &MockToolRunner, name: &str, bundle_id: &str) {
    mock.on("security", &["cms"], MockResponse::stdout(DECODED_PROFILE))
        .on(
            PLIST_BUDDY,
            &["-c", "Print ProvisionedDevices"],
            MockResponse::stdout(DEVICE_LIST),
        )
        .on(PLIST_BUDDY, &["-c", "Print Name"], MockResponse::stdout(name))
        .on(
            PLIST_BUDDY,
            &["-c", "Print CFBundleIdentifier"],
            MockResponse::stdout(bundle_id),
        );
}

/// The `-c` commands sent to PlistBuddy that mutate a plist, in order.
pub fn plist_mutations(mock: &MockToolRunner) -> Vec<String> {
    mock.calls_to(PLIST_BUDDY)
        .iter()
        .filter_map(|c| c.args.get(1).cloned())
        .filter(|c| !c.starts_with("Print "))
        .collect()
}
