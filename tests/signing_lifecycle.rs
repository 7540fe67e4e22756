//! Signing material across both phases
//!
//! The main phase installs a certificate and profile and records what it
//! did; teardown reads that record and removes everything again.

mod fixtures;

use std::fs;

use chrono::{TimeZone, Utc};
use fixtures::{xcode_mock, TaskDirs, DECODED_PROFILE, X509_OUTPUT};
use xcode_task::config::{CertificateInputs, KeychainChoice, ProfileInputs, SigningInputs, TaskInputs};
use xcode_task::keychain::TEMP_KEYCHAIN_NAME;
use xcode_task::mock::{MockResponse, MockToolRunner};
use xcode_task::plist::PLIST_BUDDY;
use xcode_task::signing::SigningOption;
use xcode_task::state::StateKey;
use xcode_task::xcodebuild::{XCODEBUILD, XCPRETTY};
use xcode_task::{Pipeline, TaskState, Teardown};

const IDENTITY: &str = "iPhone Distribution: Contoso (T1)";

/// Scripts a fresh temp keychain, a P12 import and a profile install.
fn signing_mock(dirs: &TaskDirs) -> MockToolRunner {
    let keychain = dirs.scratch.join(TEMP_KEYCHAIN_NAME);
    let mock = xcode_mock("10.1");
    mock.on("openssl", &["pkcs12"], MockResponse::stdout(X509_OUTPUT));
    mock.on_with("security", &["create-keychain"], |inv| {
        if let Some(path) = inv.args.last() {
            fs::write(path, b"keychain").unwrap();
        }
        MockResponse::ok()
    });
    mock.once(
        "security",
        &["list-keychain", "-d", "user"],
        MockResponse::stdout("\"/Users/agent/Library/Keychains/login.keychain-db\""),
    );
    mock.on(
        "security",
        &["list-keychain", "-d", "user"],
        MockResponse::stdout(&format!(
            "\"{}\"\n\"/Users/agent/Library/Keychains/login.keychain-db\"",
            keychain.display()
        )),
    );
    mock.on(
        "security",
        &["find-identity"],
        MockResponse::stdout(&format!(
            "  1) 0123ABCD \"{}\"\n     1 valid identities found",
            IDENTITY
        )),
    );
    mock.on("security", &["cms"], MockResponse::stdout(DECODED_PROFILE))
        .on(PLIST_BUDDY, &["-c", "Print UUID"], MockResponse::stdout("AAAA-1111"))
        .on(PLIST_BUDDY, &["-c", "Print Name"], MockResponse::stdout("Dist Profile"));
    mock
}

fn signing_inputs(dirs: &TaskDirs) -> TaskInputs {
    fs::write(dirs.work.join("dist.mobileprovision"), b"profile").unwrap();
    TaskInputs {
        working_dir: Some(dirs.work.clone()),
        sdk: Some("iphoneos".to_string()),
        signing: SigningInputs {
            option: SigningOption::Manual,
            certificate: Some(CertificateInputs {
                p12: "certs/dist.p12".into(),
                p12_password: Some("p12pw".to_string()),
                keychain: KeychainChoice::Temp,
                keychain_path: None,
                keychain_password: None,
            }),
            profile: Some(ProfileInputs {
                path: "dist.mobileprovision".into(),
                remove_after: true,
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_installed_material_is_removed_by_teardown() {
    let dirs = TaskDirs::new();
    let mock = signing_mock(&dirs);
    let keychain = dirs.scratch.join(TEMP_KEYCHAIN_NAME);

    let state = TaskState::open(&dirs.state).unwrap();
    let mut pipeline = Pipeline::new(&mock, signing_inputs(&dirs), dirs.host(), state)
        .with_now(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
    let outcome = pipeline.run();
    assert!(outcome.is_success(), "{}", outcome.summary_line());
    assert!(outcome.report.warnings.is_empty());

    let build_args = &outcome.report.build_args;
    assert!(build_args.contains(&format!("CODE_SIGN_IDENTITY={}", IDENTITY)));
    assert!(build_args.contains(&"PROVISIONING_PROFILE=AAAA-1111".to_string()));
    assert!(build_args.contains(&"PROVISIONING_PROFILE_SPECIFIER=Dist Profile".to_string()));

    let import = &mock.calls_matching("security", &["import"])[0];
    assert!(import.args.contains(&dirs.work.join("certs/dist.p12").to_string_lossy().into_owned()));

    let installed = dirs.profiles_dir().join("AAAA-1111.mobileprovision");
    assert!(installed.exists());
    assert!(keychain.exists());

    let recorded = TaskState::open(&dirs.state).unwrap();
    assert_eq!(
        recorded.get(StateKey::KeychainToDelete),
        Some(keychain.to_string_lossy().as_ref())
    );
    assert_eq!(recorded.get(StateKey::ProfileToDelete), Some("AAAA-1111"));

    let report = Teardown::new(&mock, Some(dirs.profiles_dir()))
        .with_macos_host(true)
        .run(Some(&dirs.state));
    assert!(report.warnings.is_empty());
    assert_eq!(report.keychain_deleted, Some(keychain.clone()));
    assert_eq!(report.profiles_deleted, vec![installed.clone()]);
    assert!(!installed.exists());
    // the main phase found no stale keychain to delete
    assert_eq!(mock.calls_matching("security", &["delete-keychain"]).len(), 1);

    // The record is consumed; a second teardown has nothing to do.
    let again = Teardown::new(&mock, Some(dirs.profiles_dir()))
        .with_macos_host(true)
        .run(Some(&dirs.state));
    assert!(again.keychain_deleted.is_none());
    assert!(again.profiles_deleted.is_empty());
}

#[test]
fn test_nosign_with_certificate_installs_nothing() {
    let dirs = TaskDirs::new();
    let mock = signing_mock(&dirs);
    let mut inputs = signing_inputs(&dirs);
    inputs.signing.option = SigningOption::NoSign;

    let state = TaskState::open(&dirs.state).unwrap();
    let mut pipeline = Pipeline::new(&mock, inputs, dirs.host(), state);
    let outcome = pipeline.run();
    assert!(outcome.is_success(), "{}", outcome.summary_line());
    assert!(outcome.report.warnings.contains("was not installed"));
    assert!(mock.calls_matching("security", &["create-keychain"]).is_empty());
    assert!(TaskState::open(&dirs.state)
        .unwrap()
        .get(StateKey::KeychainToDelete)
        .is_none());
}

#[test]
fn test_build_log_is_uploaded_by_teardown() {
    let dirs = TaskDirs::new();
    let mock = xcode_mock("10.1");
    mock.on(XCODEBUILD, &["build"], MockResponse::stdout("** BUILD SUCCEEDED **"));
    let inputs = TaskInputs {
        working_dir: Some(dirs.work.clone()),
        use_xcpretty: true,
        ..Default::default()
    };

    let state = TaskState::open(&dirs.state).unwrap();
    let mut pipeline = Pipeline::new(&mock, inputs, dirs.host(), state);
    assert!(pipeline.run().is_success());

    let formatter = &mock.calls_to(XCPRETTY)[0];
    assert_eq!(formatter.args, vec!["-r", "junit", "--no-color"]);

    let log = TaskState::open(&dirs.state)
        .unwrap()
        .get(StateKey::BuildLog)
        .map(std::path::PathBuf::from)
        .unwrap();
    assert!(log.starts_with(&dirs.scratch));
    assert_eq!(fs::read_to_string(&log).unwrap(), "** BUILD SUCCEEDED **\n");

    let report = Teardown::new(&mock, None)
        .with_macos_host(true)
        .run(Some(&dirs.state));
    assert_eq!(report.logs_uploaded, vec![log]);
}
