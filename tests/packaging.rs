//! Build, archive and export scenarios
//!
//! Drives the whole main phase against scripted tools and real on-disk
//! workspace and archive layouts.

mod fixtures;

use std::path::Path;

use fixtures::{plist_mutations, script_ad_hoc_profile, xcode_mock, TaskDirs};
use xcode_task::config::{ExportInputs, SigningInputs, TaskInputs};
use xcode_task::export::{ExportPolicy, EXPORT_OPTIONS_FILE};
use xcode_task::mock::MockResponse;
use xcode_task::signing::SigningOption;
use xcode_task::xcodebuild::XCODEBUILD;
use xcode_task::{Pipeline, TaskError, TaskState};

fn packaging_inputs(dirs: &TaskDirs) -> TaskInputs {
    TaskInputs {
        working_dir: Some(dirs.work.clone()),
        workspace: Some("*.xcworkspace".to_string()),
        scheme: Some("App".to_string()),
        sdk: Some("iphoneos".to_string()),
        configuration: Some("Release".to_string()),
        package_app: true,
        ..Default::default()
    }
}

fn manual_signing() -> SigningInputs {
    SigningInputs {
        option: SigningOption::Manual,
        identity: Some("iPhone Distribution: Contoso (T1)".to_string()),
        profile_uuid: Some("AAAA-1111".to_string()),
        profile_name: Some("App AdHoc".to_string()),
        ..Default::default()
    }
}

#[test]
fn test_manual_signing_exports_profile_mapping() {
    let dirs = TaskDirs::new();
    dirs.workspace("App", "");
    let archive = dirs.archive(&dirs.work.join("App"), "App");

    let mock = xcode_mock("10.1");
    script_ad_hoc_profile(&mock, "App AdHoc", "com.contoso.app");

    let inputs = TaskInputs {
        signing: manual_signing(),
        ..packaging_inputs(&dirs)
    };
    let mut pipeline = Pipeline::new(&mock, inputs, dirs.host(), TaskState::disabled());
    let outcome = pipeline.run();
    assert!(outcome.is_success(), "{}", outcome.summary_line());

    let report = &outcome.report;
    assert_eq!(report.scheme.as_deref(), Some("App"));
    assert_eq!(report.archives.len(), 1);
    assert_eq!(report.archives[0], archive);
    assert_eq!(report.exported, vec![archive.clone()]);

    assert_eq!(
        plist_mutations(&mock),
        vec![
            "Clear",
            "Add method string ad-hoc",
            "Add signingStyle string manual",
            "Add provisioningProfiles dict",
            "Add provisioningProfiles:com.contoso.app string App AdHoc",
        ]
    );

    let archive_call = &mock.calls_matching(XCODEBUILD, &["-workspace"])[0];
    assert!(archive_call.args.contains(&"archive".to_string()));
    assert!(archive_call
        .args
        .contains(&"PROVISIONING_PROFILE_SPECIFIER=App AdHoc".to_string()));

    let export = &mock.calls_matching(XCODEBUILD, &["-exportArchive"])[0];
    assert_eq!(Path::new(&export.args[2]), archive.as_path());
    assert_eq!(
        Path::new(&export.args[4]),
        dirs.work.join("output").join("iphoneos").join("Release").as_path()
    );
    assert_eq!(
        Path::new(&export.args[6]),
        dirs.scratch.join(EXPORT_OPTIONS_FILE).as_path()
    );
}

#[test]
fn test_old_xcode_exports_method_only() {
    let dirs = TaskDirs::new();
    dirs.workspace("App", "");
    dirs.archive(&dirs.work.join("App"), "App");

    let mock = xcode_mock("8.3.3");
    script_ad_hoc_profile(&mock, "App AdHoc", "com.contoso.app");

    let inputs = TaskInputs {
        signing: manual_signing(),
        ..packaging_inputs(&dirs)
    };
    let mut pipeline = Pipeline::new(&mock, inputs, dirs.host(), TaskState::disabled());
    assert!(pipeline.run().is_success());
    assert_eq!(plist_mutations(&mock), vec!["Clear", "Add method string ad-hoc"]);
}

#[test]
fn test_project_default_reads_style_from_project_file() {
    let dirs = TaskDirs::new();
    dirs.workspace(
        "App",
        "\t\t\t\tattributes = {\n\t\t\t\t\t\tProvisioningStyle = Manual;\n\t\t\t\t};\n",
    );
    dirs.archive(&dirs.work.join("App"), "App");

    let mock = xcode_mock("9.4.1");
    script_ad_hoc_profile(&mock, "App AdHoc", "com.contoso.app");

    let inputs = TaskInputs {
        signing: SigningInputs {
            option: SigningOption::Default,
            ..Default::default()
        },
        ..packaging_inputs(&dirs)
    };
    let mut pipeline = Pipeline::new(&mock, inputs, dirs.host(), TaskState::disabled());
    let outcome = pipeline.run();
    assert!(outcome.is_success(), "{}", outcome.summary_line());
    assert!(outcome.report.warnings.is_empty());
    assert!(plist_mutations(&mock).contains(&"Add signingStyle string manual".to_string()));
}

#[test]
fn test_undetectable_style_warns_and_continues() {
    let dirs = TaskDirs::new();
    dirs.workspace("App", "// no signing settings\n");
    dirs.archive(&dirs.work.join("App"), "App");

    let mock = xcode_mock("9.4.1");
    script_ad_hoc_profile(&mock, "App AdHoc", "com.contoso.app");

    let inputs = TaskInputs {
        signing: SigningInputs {
            option: SigningOption::Default,
            ..Default::default()
        },
        ..packaging_inputs(&dirs)
    };
    let mut pipeline = Pipeline::new(&mock, inputs, dirs.host(), TaskState::disabled());
    let outcome = pipeline.run();
    assert!(outcome.is_success());
    assert!(outcome.report.warnings.contains("provisioning style"));
    assert_eq!(plist_mutations(&mock), vec!["Clear", "Add method string ad-hoc"]);
}

#[test]
fn test_specify_export_uses_given_method_and_team() {
    let dirs = TaskDirs::new();
    dirs.workspace("App", "");
    dirs.archive(&dirs.work.join("App"), "App");

    let mock = xcode_mock("10.1");
    let inputs = TaskInputs {
        signing: SigningInputs {
            option: SigningOption::Auto,
            team_id: Some("T1".to_string()),
            ..Default::default()
        },
        export: ExportInputs {
            options: ExportPolicy::Specify,
            method: Some("app-store".to_string()),
            team_id: Some("T1".to_string()),
            plist: None,
        },
        ..packaging_inputs(&dirs)
    };
    let mut pipeline = Pipeline::new(&mock, inputs, dirs.host(), TaskState::disabled());
    assert!(pipeline.run().is_success());
    assert_eq!(
        plist_mutations(&mock),
        vec!["Clear", "Add teamID string T1", "Add method string app-store"]
    );
    assert!(mock.calls_matching("security", &["cms"]).is_empty());
}

#[test]
fn test_missing_export_plist_is_a_validation_failure() {
    let dirs = TaskDirs::new();
    dirs.workspace("App", "");
    dirs.archive(&dirs.work.join("App"), "App");

    let mock = xcode_mock("10.1");
    let inputs = TaskInputs {
        export: ExportInputs {
            options: ExportPolicy::Plist,
            method: None,
            team_id: None,
            plist: Some("missing/ExportOptions.plist".into()),
        },
        ..packaging_inputs(&dirs)
    };
    let mut pipeline = Pipeline::new(&mock, inputs, dirs.host(), TaskState::disabled());
    let outcome = pipeline.run();
    let err = outcome.result.as_ref().unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert!(mock.calls_matching(XCODEBUILD, &["-exportArchive"]).is_empty());
}

#[test]
fn test_explicit_export_plist_is_passed_through() {
    let dirs = TaskDirs::new();
    dirs.workspace("App", "");
    dirs.archive(&dirs.work.join("App"), "App");
    let plist = dirs.work.join("ExportOptions.plist");
    std::fs::write(&plist, "<plist/>").unwrap();

    let mock = xcode_mock("10.1");
    let inputs = TaskInputs {
        export: ExportInputs {
            options: ExportPolicy::Plist,
            method: None,
            team_id: None,
            plist: Some("ExportOptions.plist".into()),
        },
        ..packaging_inputs(&dirs)
    };
    let mut pipeline = Pipeline::new(&mock, inputs, dirs.host(), TaskState::disabled());
    let outcome = pipeline.run();
    assert!(outcome.is_success(), "{}", outcome.summary_line());
    assert_eq!(outcome.report.export_options_plist.as_deref(), Some(plist.as_path()));
    assert!(plist_mutations(&mock).is_empty());
}

#[test]
fn test_no_archive_skips_export() {
    let dirs = TaskDirs::new();
    dirs.workspace("App", "");

    let mock = xcode_mock("10.1");
    let mut pipeline = Pipeline::new(&mock, packaging_inputs(&dirs), dirs.host(), TaskState::disabled());
    let outcome = pipeline.run();
    assert!(outcome.is_success());
    assert!(outcome.report.archives.is_empty());
    // build leads with -sdk; only the archive call leads with -workspace
    assert_eq!(mock.calls_matching(XCODEBUILD, &["-workspace"]).len(), 1);
    assert!(mock.calls_matching(XCODEBUILD, &["-exportArchive"]).is_empty());
}

#[test]
fn test_every_archive_is_exported_in_order() {
    let dirs = TaskDirs::new();
    dirs.workspace("App", "");
    let root = dirs.work.join("archives");
    let first = dirs.archive(&root, "App");
    let second = dirs.archive(&root, "Widget");

    let mock = xcode_mock("8.3.3");
    script_ad_hoc_profile(&mock, "App AdHoc", "com.contoso.app");
    let inputs = TaskInputs {
        archive_path: Some("archives".to_string()),
        export_path: Some("ipa".to_string()),
        ..packaging_inputs(&dirs)
    };
    let mut pipeline = Pipeline::new(&mock, inputs, dirs.host(), TaskState::disabled());
    let outcome = pipeline.run();
    assert!(outcome.is_success(), "{}", outcome.summary_line());
    assert_eq!(outcome.report.exported, vec![first.clone(), second.clone()]);

    let exports = mock.calls_matching(XCODEBUILD, &["-exportArchive"]);
    assert_eq!(exports.len(), 2);
    assert_eq!(Path::new(&exports[0].args[2]), first.as_path());
    assert_eq!(Path::new(&exports[1].args[2]), second.as_path());
    assert_eq!(Path::new(&exports[1].args[4]), dirs.work.join("ipa").as_path());
}

#[test]
fn test_scheme_is_detected_from_workspace() {
    let dirs = TaskDirs::new();
    dirs.workspace("App", "");

    let mock = xcode_mock("10.1");
    mock.on(
        XCODEBUILD,
        &["-workspace"],
        MockResponse::stdout(
            "Information about workspace \"App\":\n    Schemes:\n        App\n        AppTests\n",
        ),
    );
    let inputs = TaskInputs {
        scheme: None,
        package_app: false,
        ..packaging_inputs(&dirs)
    };
    let mut pipeline = Pipeline::new(&mock, inputs, dirs.host(), TaskState::disabled());
    let outcome = pipeline.run();
    assert!(outcome.is_success(), "{}", outcome.summary_line());
    assert_eq!(outcome.report.scheme.as_deref(), Some("App"));
    assert!(outcome.report.warnings.contains("2 shared schemes"));
}

#[test]
fn test_workspace_glob_without_match_fails() {
    let dirs = TaskDirs::new();
    let mock = xcode_mock("10.1");
    let mut pipeline = Pipeline::new(&mock, packaging_inputs(&dirs), dirs.host(), TaskState::disabled());
    let outcome = pipeline.run();
    assert!(matches!(outcome.result, Err(TaskError::Project(_))));
    assert_eq!(outcome.result.as_ref().unwrap_err().exit_code(), 2);
}
