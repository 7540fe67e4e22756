//! Build-tool client
//!
//! Argument assembly for the build, archive and export invocations, plus
//! version and scheme discovery. Every invocation carries the resolved
//! `DEVELOPER_DIR` and runs in the task's working directory.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex_lite::Regex;
use tracing::debug;

use crate::certificate::cached_regex;
use crate::destination::Destination;
use crate::project::ProjectPath;
use crate::tool::{Invocation, ToolError, ToolOutput, ToolRunner};
use crate::toolchain::DEVELOPER_DIR_ENV;

pub const XCODEBUILD: &str = "xcodebuild";

/// Output formatter
pub const XCPRETTY: &str = "xcpretty";

/// Build error emitted when a device-only target is built for a simulator.
pub const BUILD_ONLY_DEVICE_ERROR: &str = "build only device cannot be used to run this target";

/// Detected build-tool version
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XcodeVersion {
    /// Text after `Xcode `, e.g. `9.4.1`
    pub version: Option<String>,
    /// Major version, 0 when unknown
    pub major: u32,
}

static VERSION_LINE: OnceLock<Option<Regex>> = OnceLock::new();

/// Parse `xcodebuild -version` output.
pub fn parse_version<'a>(lines: impl IntoIterator<Item = &'a str>) -> XcodeVersion {
    let Some(re) = cached_regex(&VERSION_LINE, r"Xcode (.+)") else {
        return XcodeVersion::default();
    };
    let version = lines.into_iter().find_map(|line| {
        re.captures(line.trim())
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    });
    let major = version
        .as_deref()
        .map(|v| {
            v.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
        })
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0);
    XcodeVersion { version, major }
}

/// Scheme names listed under `Schemes:` in `xcodebuild -list` output.
pub fn parse_schemes<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut schemes = Vec::new();
    let mut in_schemes = false;
    for line in lines {
        let line = line.trim();
        if in_schemes {
            if line.is_empty() {
                in_schemes = false;
            } else {
                schemes.push(line.to_string());
            }
        } else if line == "Schemes:" {
            in_schemes = true;
        }
    }
    schemes
}

/// `<temp>/<prefix>.log`, or `<prefix>N.log` for the first free N.
pub fn unique_log_file(temp_dir: &Path, prefix: &str) -> PathBuf {
    let mut path = temp_dir.join(format!("{}.log", prefix));
    let mut index = 1;
    while path.exists() {
        path = temp_dir.join(format!("{}{}.log", prefix, index));
        index += 1;
    }
    path
}

/// Archive root and archive path for an `archive_path` input.
///
/// A path ending in `.xcarchive` names the archive itself; anything else is
/// a directory that receives `<scheme>.xcarchive`.
pub fn archive_location(archive_path: &Path, scheme: &str) -> (PathBuf, PathBuf) {
    if archive_path.to_string_lossy().ends_with(".xcarchive") {
        let root = archive_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        (root, archive_path.to_path_buf())
    } else {
        (archive_path.to_path_buf(), archive_path.join(scheme))
    }
}

fn push_pair(args: &mut Vec<String>, flag: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

/// Arguments of the build invocation
#[derive(Debug, Clone, Default)]
pub struct BuildCommand<'a> {
    pub sdk: Option<&'a str>,
    pub configuration: Option<&'a str>,
    pub project: Option<&'a ProjectPath>,
    pub scheme: Option<&'a str>,
    pub destinations: &'a [Destination],
    pub actions: &'a [String],
    pub extra_args: &'a [String],
    pub signing: &'a [String],
}

impl BuildCommand<'_> {
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        push_pair(&mut args, "-sdk", self.sdk);
        push_pair(&mut args, "-configuration", self.configuration);
        if let Some(project) = self.project {
            args.push(project.flag().to_string());
            args.push(project.path.to_string_lossy().into_owned());
        }
        push_pair(&mut args, "-scheme", self.scheme);
        for destination in self.destinations {
            args.push("-destination".to_string());
            args.push(destination.to_string());
        }
        args.extend(self.actions.iter().cloned());
        args.extend(self.extra_args.iter().cloned());
        args.extend(self.signing.iter().cloned());
        args
    }
}

/// Arguments of the archive invocation
#[derive(Debug, Clone)]
pub struct ArchiveCommand<'a> {
    pub project: &'a ProjectPath,
    pub scheme: &'a str,
    pub sdk: Option<&'a str>,
    pub configuration: Option<&'a str>,
    pub archive_path: &'a Path,
    pub signing: &'a [String],
    pub extra_args: &'a [String],
}

impl ArchiveCommand<'_> {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            self.project.flag().to_string(),
            self.project.path.to_string_lossy().into_owned(),
        ];
        push_pair(&mut args, "-scheme", Some(self.scheme));
        args.push("archive".to_string());
        push_pair(&mut args, "-sdk", self.sdk);
        push_pair(&mut args, "-configuration", self.configuration);
        args.push("-archivePath".to_string());
        args.push(self.archive_path.to_string_lossy().into_owned());
        args.extend(self.signing.iter().cloned());
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Arguments of one export invocation
#[derive(Debug, Clone)]
pub struct ExportCommand<'a> {
    pub archive: &'a Path,
    pub export_path: &'a Path,
    pub options_plist: &'a Path,
    pub extra_args: &'a [String],
}

impl ExportCommand<'_> {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-exportArchive".to_string(),
            "-archivePath".to_string(),
            self.archive.to_string_lossy().into_owned(),
            "-exportPath".to_string(),
            self.export_path.to_string_lossy().into_owned(),
            "-exportOptionsPlist".to_string(),
            self.options_plist.to_string_lossy().into_owned(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Output formatting for one invocation: the consumer end of a pipe plus
/// the raw log it leaves behind.
#[derive(Debug, Clone)]
pub struct Formatter {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub log_file: PathBuf,
}

impl Formatter {
    /// `xcpretty -r junit --no-color`
    pub fn junit(program: &Path, log_file: PathBuf) -> Self {
        Self {
            program: program.to_path_buf(),
            args: vec!["-r".to_string(), "junit".to_string(), "--no-color".to_string()],
            log_file,
        }
    }

    /// `xcpretty --no-color`
    pub fn plain(program: &Path, log_file: PathBuf) -> Self {
        Self {
            program: program.to_path_buf(),
            args: vec!["--no-color".to_string()],
            log_file,
        }
    }

    fn invocation(&self, working_dir: &Path) -> Invocation {
        Invocation::new(self.program.to_string_lossy())
            .args(self.args.iter().cloned())
            .current_dir(working_dir)
    }
}

/// Client for `xcodebuild`.
#[derive(Debug, Clone)]
pub struct Xcodebuild<R> {
    runner: R,
    program: String,
    developer_dir: Option<PathBuf>,
    working_dir: PathBuf,
}

impl<R: ToolRunner> Xcodebuild<R> {
    pub fn new(runner: R, developer_dir: Option<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            program: XCODEBUILD.to_string(),
            developer_dir,
            working_dir: working_dir.into(),
        }
    }

    /// Use a resolved path for the tool instead of `xcodebuild`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn invocation(&self) -> Invocation {
        let inv = Invocation::new(&self.program).current_dir(&self.working_dir);
        match self.developer_dir {
            Some(ref dir) => inv.env(DEVELOPER_DIR_ENV, dir.to_string_lossy()),
            None => inv,
        }
    }

    /// `xcodebuild -version`
    pub fn version(&self) -> Result<XcodeVersion, ToolError> {
        let out = self.runner.run(&self.invocation().arg("-version"))?;
        let version = parse_version(out.stdout.iter().map(String::as_str));
        debug!("xcode version = {:?}", version);
        Ok(version)
    }

    /// Shared schemes of a workspace.
    pub fn list_schemes(&self, workspace: &Path) -> Result<Vec<String>, ToolError> {
        let inv = self
            .invocation()
            .arg("-workspace")
            .path_arg(workspace)
            .arg("-list")
            .quiet();
        let out = self.runner.run(&inv)?;
        Ok(parse_schemes(out.stdout.iter().map(String::as_str)))
    }

    /// Run with `args`, through `formatter` when given.
    pub fn run(&self, args: Vec<String>, formatter: Option<&Formatter>) -> Result<ToolOutput, ToolError> {
        let inv = self.invocation().args(args);
        match formatter {
            Some(f) => self.runner.pipe(
                &inv,
                &f.invocation(&self.working_dir),
                Some(f.log_file.as_path()),
            ),
            None => self.runner.run(&inv),
        }
    }
}
