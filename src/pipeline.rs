//! Build/archive/export driver
//!
//! Runs the main phase of the task:
//! - Configure: developer directory, workspace, scheme, destinations
//! - Detect the Xcode version
//! - Resolve signing, installing certificate and profile when asked
//! - Build
//! - Archive and export every archive found, when packaging
//!
//! The sequence is linear. Warnings accumulate in the [`RunReport`] and never
//! change the outcome; telemetry is emitted whether the run succeeds or not.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::{SigningInputs, TaskInputs};
use crate::destination::{self, Destination};
use crate::error::TaskError;
use crate::export::{find_embedded_profiles, ExportBuilder, ExportPlan, ExportRequest};
use crate::fsmatch::find_match;
use crate::profile::user_profiles_dir;
use crate::project::{resolve_workspace, ProjectPath};
use crate::signing::{ResolvedSigning, SigningContext, SigningResolver};
use crate::state::{StateKey, TaskState};
use crate::telemetry::{emit_telemetry, TelemetryData};
use crate::tool::{split_command_line, ToolError, ToolRunner};
use crate::toolchain::{DeveloperDirResolver, XcodeSelection};
use crate::warnings::Warnings;
use crate::xcodebuild::{
    archive_location, unique_log_file, ArchiveCommand, BuildCommand, ExportCommand, Formatter,
    XcodeVersion, Xcodebuild, BUILD_ONLY_DEVICE_ERROR, XCODEBUILD, XCPRETTY,
};

/// Result type for task operations
pub type TaskResult<T> = Result<T, TaskError>;

/// Agent variable naming the job's temp directory.
pub const AGENT_TEMP_DIR_ENV: &str = "AGENT_TEMPDIRECTORY";

/// Agent variable holding the agent version.
pub const AGENT_VERSION_ENV: &str = "AGENT_VERSION";

/// Sdk for which packaging is skipped.
pub const SIMULATOR_SDK: &str = "iphonesimulator";

/// What the task knows about its host.
#[derive(Debug, Clone)]
pub struct HostEnv {
    pub temp_dir: PathBuf,
    pub home: Option<PathBuf>,
    pub agent_version: Option<String>,
    vars: HashMap<String, String>,
}

impl HostEnv {
    /// Snapshot the process environment.
    ///
    /// The temp directory is `temp_dir` when given, else the agent's temp
    /// directory, else the OS one.
    pub fn from_env(temp_dir: Option<&Path>) -> Self {
        let vars: HashMap<String, String> = env::vars().collect();
        let temp_dir = temp_dir
            .map(Path::to_path_buf)
            .or_else(|| {
                vars.get(AGENT_TEMP_DIR_ENV)
                    .filter(|v| !v.trim().is_empty())
                    .map(PathBuf::from)
            })
            .unwrap_or_else(env::temp_dir);
        Self {
            temp_dir,
            home: vars.get("HOME").map(PathBuf::from),
            agent_version: vars.get(AGENT_VERSION_ENV).cloned(),
            vars,
        }
    }

    /// A host with only the given variables.
    pub fn new(temp_dir: impl Into<PathBuf>, home: Option<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            home,
            agent_version: None,
            vars: HashMap::new(),
        }
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }

    /// User provisioning-profiles directory, when `HOME` is known.
    pub fn profiles_dir(&self) -> Option<PathBuf> {
        self.home.as_deref().map(user_profiles_dir)
    }
}

/// What a run did, successful or not.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub warnings: Warnings,
    pub developer_dir: Option<PathBuf>,
    pub project: Option<ProjectPath>,
    pub scheme: Option<String>,
    pub destinations: Vec<String>,
    pub xcode_version: Option<XcodeVersion>,
    pub build_args: Vec<String>,
    pub archives: Vec<PathBuf>,
    pub export_options_plist: Option<PathBuf>,
    pub exported: Vec<PathBuf>,
    pub telemetry: TelemetryData,
}

/// Outcome of the main phase.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub result: TaskResult<()>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The single terminal line for the task log.
    pub fn summary_line(&self) -> String {
        match self.result {
            Ok(()) => "Xcode task succeeded".to_string(),
            Err(ref e) => format!("Xcode task failed: {}", e),
        }
    }
}

fn resolve_path(working_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Main-phase driver
pub struct Pipeline<R> {
    runner: R,
    inputs: TaskInputs,
    host: HostEnv,
    state: TaskState,
    now: DateTime<Utc>,
}

impl<R: ToolRunner> Pipeline<R> {
    pub fn new(runner: R, inputs: TaskInputs, host: HostEnv, state: TaskState) -> Self {
        Self {
            runner,
            inputs,
            host,
            state,
            now: Utc::now(),
        }
    }

    /// Evaluate certificate expiry against `now` instead of the wall clock.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Run the main phase and publish telemetry.
    pub fn run(&mut self) -> RunOutcome {
        let mut report = RunReport {
            telemetry: TelemetryData::new(self.inputs.xcode.version.clone()),
            ..Default::default()
        };
        let result = self.execute(&mut report);
        if let Err(ref e) = result {
            debug!("main phase failed: {:?}", e);
        }
        emit_telemetry(self.host.agent_version.as_deref(), &report.telemetry);
        RunOutcome { report, result }
    }

    fn execute(&mut self, report: &mut RunReport) -> TaskResult<()> {
        let runner = &self.runner;
        let inputs = &self.inputs;
        let host = &self.host;
        let state = &mut self.state;
        let working_dir = inputs.working_dir();

        // Configure
        let selection = XcodeSelection::parse(&inputs.xcode.version)?;
        let developer_dir = DeveloperDirResolver::default().resolve(
            selection,
            inputs.xcode.developer_dir.as_deref(),
            |name| host.var(name),
        )?;
        if let Some(ref dir) = developer_dir {
            info!("DEVELOPER_DIR = {}", dir.display());
        }
        report.developer_dir = developer_dir.clone();

        let program = runner
            .which(XCODEBUILD)
            .ok_or_else(|| ToolError::NotFound(XCODEBUILD.to_string()))?;
        debug!("Tool selected: {}", program.display());
        let xcodebuild = Xcodebuild::new(runner, developer_dir, working_dir.clone())
            .with_program(program.to_string_lossy());

        let project = match non_blank(inputs.workspace.as_deref()) {
            Some(pattern) => Some(resolve_workspace(&working_dir, pattern, &mut report.warnings)?),
            None => None,
        };
        report.project = project.clone();

        let scheme = match inputs.scheme() {
            Some(s) => Some(s.to_string()),
            None => match project {
                Some(ref p) if !p.is_project() => {
                    detect_scheme(&xcodebuild, p, &mut report.warnings)
                }
                _ => None,
            },
        };
        report.scheme = scheme.clone();

        let destinations: Vec<Destination> = destination::resolve(&inputs.destination);
        report.destinations = destinations.iter().map(|d| d.to_string()).collect();

        let actions = inputs.actions();
        report.telemetry.actions = actions.clone();
        report.telemetry.package_app = inputs.package_app;
        let extra_args = inputs
            .args
            .as_deref()
            .map(split_command_line)
            .unwrap_or_default();

        // Version
        let version = xcodebuild.version()?;
        report.telemetry.xcode_version = version.version.clone();
        report.xcode_version = Some(version.clone());

        // Signing
        report.telemetry.signing_option = Some(inputs.signing.option.as_str().to_string());
        let signing = resolve_signing(
            runner,
            &inputs.signing,
            &working_dir,
            host,
            self.now,
            state,
            &mut report.warnings,
        )?;
        let signing_settings = signing.configuration.build_settings();

        // Formatter
        let xcpretty = if inputs.use_xcpretty {
            match runner.which(XCPRETTY) {
                Some(path) => Some(path),
                None => {
                    report.warnings.push(
                        "xcpretty is not installed; falling back to raw xcodebuild output.",
                    );
                    None
                }
            }
        } else {
            None
        };

        // Build
        let sdk = inputs.sdk();
        let configuration = inputs.configuration();
        let build = BuildCommand {
            sdk,
            configuration,
            project: project.as_ref(),
            scheme: scheme.as_deref(),
            destinations: &destinations,
            actions: &actions,
            extra_args: &extra_args,
            signing: &signing_settings,
        };
        report.build_args = build.args();

        let formatter = match xcpretty {
            Some(ref path) => {
                let log = unique_log_file(&host.temp_dir, "xcodebuild");
                state.set(StateKey::BuildLog, log.to_string_lossy())?;
                Some(Formatter::junit(path, log))
            }
            None => None,
        };
        if let Err(e) = xcodebuild.run(report.build_args.clone(), formatter.as_ref()) {
            if e.stderr_contains(BUILD_ONLY_DEVICE_ERROR) {
                report.warnings.push(
                    "The build targets a device-only platform; \
                     set a destination platform for the simulator or device you build for.",
                );
            }
            return Err(e.into());
        }

        if !inputs.package_app || sdk == Some(SIMULATOR_SDK) {
            return Ok(());
        }

        // Archive
        let scheme = scheme.ok_or_else(|| {
            TaskError::Validation("A scheme is required to archive.".to_string())
        })?;
        let project = project.ok_or_else(|| {
            TaskError::Validation("A workspace or project is required to archive.".to_string())
        })?;

        let archive_input = match non_blank(inputs.archive_path.as_deref()) {
            Some(p) => resolve_path(&working_dir, Path::new(p)),
            None => working_dir.clone(),
        };
        let (archive_root, archive_path) = archive_location(&archive_input, &scheme);
        let archive = ArchiveCommand {
            project: &project,
            scheme: &scheme,
            sdk,
            configuration,
            archive_path: &archive_path,
            signing: &signing_settings,
            extra_args: &extra_args,
        };
        let formatter = plain_formatter(
            xcpretty.as_deref(),
            &host.temp_dir,
            "xcodebuild_archive",
            StateKey::ArchiveLog,
            state,
        )?;
        xcodebuild.run(archive.args(), formatter.as_ref())?;

        report.archives = find_match(&archive_root, "**/*.xcarchive")?;
        let Some(first_archive) = report.archives.first().cloned() else {
            info!("No archives found under {}; skipping export.", archive_root.display());
            return Ok(());
        };
        debug!("{} archives found for exporting.", report.archives.len());

        // Export
        report.telemetry.export_options = Some(inputs.export.options.as_str().to_string());
        let embedded = find_embedded_profiles(&first_archive)?;
        let explicit_plist = inputs
            .export
            .plist
            .as_deref()
            .map(|p| resolve_path(&working_dir, p));
        let request = ExportRequest {
            policy: inputs.export.options,
            method: inputs.export.method.as_deref(),
            team_id: inputs.export.team_id.as_deref(),
            plist: explicit_plist.as_deref(),
            embedded: &embedded,
            signing: &signing.configuration,
            project: Some(&project),
            xcode_major: version.major,
            sdk,
        };
        let builder = ExportBuilder::new(runner, &host.temp_dir);
        let plan = builder.plan(&request, &mut report.warnings)?;
        if let ExportPlan::Generated(ref options) = plan {
            debug!("export options: {:?}", options);
        }
        let options_plist = builder.materialize(&plan)?;
        report.export_options_plist = Some(options_plist.clone());

        let export_path = resolve_path(&working_dir, &default_export_path(inputs));
        let export_args = inputs
            .export_args
            .as_deref()
            .map(split_command_line)
            .unwrap_or_default();
        for archive in report.archives.clone() {
            let export = ExportCommand {
                archive: &archive,
                export_path: &export_path,
                options_plist: &options_plist,
                extra_args: &export_args,
            };
            let formatter = plain_formatter(
                xcpretty.as_deref(),
                &host.temp_dir,
                "xcodebuild_export",
                StateKey::ExportLog,
                state,
            )?;
            xcodebuild.run(export.args(), formatter.as_ref())?;
            info!("Exported {} to {}", archive.display(), export_path.display());
            report.exported.push(archive);
        }

        Ok(())
    }
}

/// Resolve signing with input paths made relative to `working_dir`.
fn resolve_signing<R: ToolRunner>(
    runner: &R,
    inputs: &SigningInputs,
    working_dir: &Path,
    host: &HostEnv,
    now: DateTime<Utc>,
    state: &mut TaskState,
    warnings: &mut Warnings,
) -> TaskResult<ResolvedSigning> {
    let inputs = resolved_signing_inputs(inputs, working_dir);
    let profiles_dir = match (inputs.profile.is_some(), host.profiles_dir()) {
        (_, Some(dir)) => dir,
        (false, None) => host.temp_dir.clone(),
        (true, None) => {
            return Err(TaskError::Validation(
                "HOME must be set to install a provisioning profile.".to_string(),
            ))
        }
    };
    let ctx = SigningContext {
        temp_dir: &host.temp_dir,
        profiles_dir: &profiles_dir,
        now,
    };
    let resolved = SigningResolver::new(runner).resolve(&inputs, &ctx, state, warnings)?;
    Ok(resolved)
}

/// `xcpretty --no-color` with a fresh raw log recorded under `key`.
fn plain_formatter(
    xcpretty: Option<&Path>,
    temp_dir: &Path,
    prefix: &str,
    key: StateKey,
    state: &mut TaskState,
) -> TaskResult<Option<Formatter>> {
    match xcpretty {
        Some(path) => {
            let log = unique_log_file(temp_dir, prefix);
            state.set(key, log.to_string_lossy())?;
            Ok(Some(Formatter::plain(path, log)))
        }
        None => Ok(None),
    }
}

/// `export_path`, else `output/<sdk>/<configuration>`.
fn default_export_path(inputs: &TaskInputs) -> PathBuf {
    match non_blank(inputs.export_path.as_deref()) {
        Some(p) => PathBuf::from(p),
        None => {
            let mut path = PathBuf::from("output");
            if let Some(sdk) = inputs.sdk() {
                path.push(sdk);
            }
            if let Some(configuration) = inputs.configuration() {
                path.push(configuration);
            }
            path
        }
    }
}

/// Pick a scheme from the workspace's shared schemes.
///
/// More than one uses the first and warns; none, or a failing listing,
/// warns and builds without a scheme.
fn detect_scheme<R: ToolRunner>(
    xcodebuild: &Xcodebuild<R>,
    workspace: &ProjectPath,
    warnings: &mut Warnings,
) -> Option<String> {
    match xcodebuild.list_schemes(&workspace.path) {
        Ok(schemes) => {
            let first = schemes.first().cloned();
            match schemes.len() {
                0 => warnings.push(format!(
                    "No shared schemes found in {}; building without a scheme.",
                    workspace
                )),
                1 => {}
                n => warnings.push(format!(
                    "{} shared schemes found in {}; using '{}'. Set 'scheme' to choose another.",
                    n,
                    workspace,
                    first.as_deref().unwrap_or_default()
                )),
            }
            if let Some(ref s) = first {
                info!("Scheme selected: {}", s);
            }
            first
        }
        Err(e) => {
            debug!("scheme listing failed: {}", e);
            warnings.push(format!("Failed to find a scheme in {}.", workspace));
            None
        }
    }
}

fn resolved_signing_inputs(inputs: &SigningInputs, working_dir: &Path) -> SigningInputs {
    let mut inputs = inputs.clone();
    if let Some(ref mut cert) = inputs.certificate {
        cert.p12 = resolve_path(working_dir, &cert.p12);
        if let Some(ref mut path) = cert.keychain_path {
            *path = resolve_path(working_dir, path);
        }
    }
    if let Some(ref mut profile) = inputs.profile {
        profile.path = resolve_path(working_dir, &profile.path);
    }
    inputs
}
