//! Export options for `xcodebuild -exportArchive`
//!
//! Three policies:
//! - `plist`: a caller-supplied options plist, used verbatim
//! - `specify`: method and team straight from the inputs
//! - `auto`: method from the archive's first embedded profile; with Xcode 9
//!   or later the iCloud container environment is propagated, and manual
//!   signing adds `signingStyle` plus a bundle id → profile name mapping
//!
//! Generated options are written with a sequence of `PlistBuddy` commands
//! into a fresh file in the temp directory.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use xcode_task_profile::{CloudEnvironment, Platform};

use crate::fsmatch::{find_match, MatchError};
use crate::plist::{PlistBuddy, PlistCommand};
use crate::profile::{ProfileError, ProfileInspector};
use crate::project::{provisioning_style, ProjectPath};
use crate::signing::{SigningConfiguration, SigningStyle};
use crate::tool::{ToolError, ToolRunner};
use crate::warnings::Warnings;

/// File name of the generated export options plist.
pub const EXPORT_OPTIONS_FILE: &str = "_XcodeTaskExportOptions.plist";

/// First Xcode major version that understands signing style and iCloud
/// export options.
pub const SIGNING_STYLE_MIN_XCODE: u32 = 9;

/// Export errors
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export options plist '{0}' does not exist or is not a file")]
    PlistNotFound(PathBuf),

    #[error("no export method given for 'specify' export options")]
    MissingMethod,

    #[error("failed to generate export options: no profile name or bundle identifier for {0}")]
    IncompleteProfile(PathBuf),

    #[error("provisioning profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("failed to search the archive: {0}")]
    Match(#[from] MatchError),

    #[error("failed to write export options: {0}")]
    Tool(#[from] ToolError),
}

/// `export.options`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportPolicy {
    #[default]
    Auto,
    Specify,
    Plist,
}

impl ExportPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportPolicy::Auto => "auto",
            ExportPolicy::Specify => "specify",
            ExportPolicy::Plist => "plist",
        }
    }
}

impl fmt::Display for ExportPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provisioning profiles embedded in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedProfiles {
    pub platform: Platform,
    pub paths: Vec<PathBuf>,
}

impl EmbeddedProfiles {
    pub fn first(&self) -> Option<&Path> {
        self.paths.first().map(PathBuf::as_path)
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Find the embedded profiles in an archive.
///
/// Mobile profiles win; desktop profiles are only searched for when the
/// archive holds no mobile profile.
pub fn find_embedded_profiles(archive: &Path) -> Result<EmbeddedProfiles, MatchError> {
    for platform in [Platform::IOS, Platform::MacOS] {
        let pattern = format!("**/{}", platform.embedded_profile_name());
        let paths = find_match(archive, &pattern)?;
        if !paths.is_empty() {
            debug!(
                "{} {} file(s) found in {}",
                paths.len(),
                platform.embedded_profile_name(),
                archive.display()
            );
            return Ok(EmbeddedProfiles { platform, paths });
        }
    }
    Ok(EmbeddedProfiles {
        platform: Platform::IOS,
        paths: Vec::new(),
    })
}

/// Generated export options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    pub method: Option<String>,
    pub team_id: Option<String>,
    pub cloud_environment: Option<CloudEnvironment>,
    /// `signingStyle = manual`
    pub manual_signing: bool,
    /// Bundle id → profile name, in discovery order
    pub provisioning_profiles: Vec<(String, String)>,
}

impl ExportOptions {
    /// Commands that write these options into an empty plist.
    pub fn plist_commands(&self) -> Vec<PlistCommand> {
        let mut commands = vec![PlistCommand::Clear];
        if let Some(ref team) = self.team_id {
            commands.push(PlistCommand::add_string("teamID", team));
        }
        if let Some(ref method) = self.method {
            commands.push(PlistCommand::add_string("method", method));
        }
        if let Some(env) = self.cloud_environment {
            commands.push(PlistCommand::add_string("iCloudContainerEnvironment", env.as_str()));
        }
        if self.manual_signing {
            commands.push(PlistCommand::add_string("signingStyle", "manual"));
            commands.push(PlistCommand::add_dict("provisioningProfiles"));
            for (bundle_id, name) in &self.provisioning_profiles {
                commands.push(PlistCommand::add_string(
                    format!("provisioningProfiles:{}", bundle_id),
                    name,
                ));
            }
        }
        commands
    }
}

/// What the export invocation receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportPlan {
    /// Caller-supplied plist
    Plist(PathBuf),
    Generated(ExportOptions),
}

/// Inputs to [`ExportBuilder::plan`].
#[derive(Debug, Clone)]
pub struct ExportRequest<'a> {
    pub policy: ExportPolicy,
    pub method: Option<&'a str>,
    pub team_id: Option<&'a str>,
    pub plist: Option<&'a Path>,
    pub embedded: &'a EmbeddedProfiles,
    pub signing: &'a SigningConfiguration,
    pub project: Option<&'a ProjectPath>,
    pub xcode_major: u32,
    pub sdk: Option<&'a str>,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Builds export options from inputs and the archived bundles.
pub struct ExportBuilder<R> {
    runner: R,
    scratch_dir: PathBuf,
}

impl<R: ToolRunner> ExportBuilder<R> {
    /// Scratch plists and the generated options file go under `scratch_dir`.
    pub fn new(runner: R, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            scratch_dir: scratch_dir.into(),
        }
    }

    fn inspector(&self) -> ProfileInspector<&R> {
        ProfileInspector::new(&self.runner, &self.scratch_dir)
    }

    pub fn plan(
        &self,
        request: &ExportRequest<'_>,
        warnings: &mut Warnings,
    ) -> Result<ExportPlan, ExportError> {
        match request.policy {
            ExportPolicy::Plist => {
                let plist = request
                    .plist
                    .filter(|p| p.is_file())
                    .ok_or_else(|| {
                        ExportError::PlistNotFound(
                            request.plist.map(Path::to_path_buf).unwrap_or_default(),
                        )
                    })?;
                Ok(ExportPlan::Plist(plist.to_path_buf()))
            }
            ExportPolicy::Specify => {
                let method = non_blank(request.method).ok_or(ExportError::MissingMethod)?;
                Ok(ExportPlan::Generated(ExportOptions {
                    method: Some(method),
                    team_id: non_blank(request.team_id),
                    ..Default::default()
                }))
            }
            ExportPolicy::Auto => self.auto(request, warnings).map(ExportPlan::Generated),
        }
    }

    fn auto(
        &self,
        request: &ExportRequest<'_>,
        warnings: &mut Warnings,
    ) -> Result<ExportOptions, ExportError> {
        let inspector = self.inspector();
        let embedded = request.embedded;

        let method = embedded.first().and_then(|profile| {
            debug!("embedded prov profile = {}", profile.display());
            inspector
                .classify(profile, embedded.platform)
                .export_method()
                .map(String::from)
        });
        debug!("using export method = {:?}", method);
        if method.is_none() {
            if let Some(sdk) = request.sdk.filter(|s| !s.is_empty() && *s != "macosx") {
                warnings.push(format!(
                    "Could not identify the export method for sdk '{}'; \
                     choose 'specify' or 'plist' export options.",
                    sdk
                ));
            }
        }

        let mut options = ExportOptions {
            method,
            ..Default::default()
        };
        if request.xcode_major < SIGNING_STYLE_MIN_XCODE {
            return Ok(options);
        }

        if let Some(profile) = embedded.first() {
            options.cloud_environment =
                inspector.cloud_entitlement(profile, options.method.as_deref())?;
        }

        let style = if request.signing.is_project_default() {
            let detected = request.project.and_then(provisioning_style);
            if detected.is_none() {
                warnings.push("Cannot determine the provisioning style from the project file.");
            }
            detected
        } else {
            request.signing.style()
        };

        if style == Some(SigningStyle::Manual) {
            options.manual_signing = true;
            for profile in &embedded.paths {
                let name = inspector.name(profile)?;
                let bundle_id = inspector.bundle_id(profile);
                debug!(
                    "embedded profile {} name = {:?}, bundle id = {:?}",
                    profile.display(),
                    name,
                    bundle_id
                );
                match (bundle_id, name) {
                    (Some(bundle_id), Some(name)) => {
                        options.provisioning_profiles.push((bundle_id, name))
                    }
                    _ => return Err(ExportError::IncompleteProfile(profile.clone())),
                }
            }
        }
        Ok(options)
    }

    /// Options plist path for the export invocation, writing generated
    /// options to `<scratch>/_XcodeTaskExportOptions.plist`.
    pub fn materialize(&self, plan: &ExportPlan) -> Result<PathBuf, ExportError> {
        match plan {
            ExportPlan::Plist(path) => Ok(path.clone()),
            ExportPlan::Generated(options) => {
                let path = self.scratch_dir.join(EXPORT_OPTIONS_FILE);
                PlistBuddy::new(&self.runner).apply_all(&path, &options.plist_commands())?;
                Ok(path)
            }
        }
    }
}
