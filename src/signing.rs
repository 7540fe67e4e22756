//! Signing policy resolution
//!
//! Turns the signing inputs into a [`SigningConfiguration`] and, when asked,
//! installs the certificate and provisioning profile the build needs. The
//! configuration renders to the `KEY=value` build settings passed to both the
//! build and archive invocations.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::certificate::generate_password;
use crate::config::SigningInputs;
use crate::keychain::{
    install_certificate, CertificateInstall, InstalledCertificate, KeychainError, Security,
};
use crate::profile::{InstalledProfile, ProfileError, ProfileInspector};
use crate::state::{StateError, StateKey, TaskState};
use crate::tool::ToolRunner;
use crate::warnings::Warnings;

/// Signing errors
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("keychain error: {0}")]
    Keychain(#[from] KeychainError),

    #[error("provisioning profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("task state error: {0}")]
    State(#[from] StateError),

    #[error("no keychain path given for a custom keychain")]
    MissingKeychainPath,
}

/// `signing.option`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningOption {
    /// Build without code signing
    #[default]
    #[serde(rename = "nosign")]
    NoSign,
    /// Whatever the project file declares
    Default,
    Manual,
    Auto,
}

impl SigningOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningOption::NoSign => "nosign",
            SigningOption::Default => "default",
            SigningOption::Manual => "manual",
            SigningOption::Auto => "auto",
        }
    }
}

impl fmt::Display for SigningOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signing style as declared by a project or chosen for export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningStyle {
    Automatic,
    Manual,
}

/// Resolved signing for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningConfiguration {
    /// `CODE_SIGNING_ALLOWED=NO`
    None,
    Manual {
        identity: Option<String>,
        profile_uuid: Option<String>,
        profile_name: Option<String>,
        suffix: Option<String>,
    },
    Automatic {
        team: Option<String>,
    },
    /// No overrides; the project file decides
    ProjectDefault,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl SigningConfiguration {
    /// Build settings in the order the build tool receives them.
    ///
    /// Manual signing always passes both profile settings, empty when
    /// unknown, so the build tool ignores any specifier in the project.
    pub fn build_settings(&self) -> Vec<String> {
        match self {
            SigningConfiguration::None => vec!["CODE_SIGNING_ALLOWED=NO".to_string()],
            SigningConfiguration::Manual {
                identity,
                profile_uuid,
                profile_name,
                suffix,
            } => {
                let mut settings = vec!["CODE_SIGN_STYLE=Manual".to_string()];
                if let Some(identity) = non_blank(identity.as_deref()) {
                    settings.push(format!("CODE_SIGN_IDENTITY={}", identity));
                }
                let suffix = non_blank(suffix.as_deref())
                    .map(|s| format!("_{}", s))
                    .unwrap_or_default();
                settings.push(format!(
                    "PROVISIONING_PROFILE{}={}",
                    suffix,
                    profile_uuid.as_deref().unwrap_or("").trim()
                ));
                settings.push(format!(
                    "PROVISIONING_PROFILE_SPECIFIER{}={}",
                    suffix,
                    profile_name.as_deref().unwrap_or("").trim()
                ));
                settings
            }
            SigningConfiguration::Automatic { team } => {
                let mut settings = vec!["CODE_SIGN_STYLE=Automatic".to_string()];
                if let Some(team) = non_blank(team.as_deref()) {
                    settings.push(format!("DEVELOPMENT_TEAM={}", team));
                }
                settings
            }
            SigningConfiguration::ProjectDefault => Vec::new(),
        }
    }

    /// Signing style implied without reading the project, `None` for
    /// project defaults.
    pub fn style(&self) -> Option<SigningStyle> {
        match self {
            SigningConfiguration::None => None,
            SigningConfiguration::Manual { .. } => Some(SigningStyle::Manual),
            SigningConfiguration::Automatic { .. } => Some(SigningStyle::Automatic),
            SigningConfiguration::ProjectDefault => None,
        }
    }

    pub fn is_project_default(&self) -> bool {
        matches!(self, SigningConfiguration::ProjectDefault)
    }
}

/// Host paths the resolver works with.
#[derive(Debug, Clone)]
pub struct SigningContext<'a> {
    pub temp_dir: &'a Path,
    /// User provisioning-profiles directory
    pub profiles_dir: &'a Path,
    pub now: DateTime<Utc>,
}

/// Everything signing resolution produced.
#[derive(Debug, Clone)]
pub struct ResolvedSigning {
    pub option: SigningOption,
    pub configuration: SigningConfiguration,
    pub certificate: Option<InstalledCertificate>,
    pub profile: Option<InstalledProfile>,
}

/// Resolves signing inputs, installing signing material on the way.
pub struct SigningResolver<R> {
    runner: R,
}

impl<R: ToolRunner> SigningResolver<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Resolve `inputs` into a signing configuration.
    ///
    /// Installation failures abort; teardown work is recorded in `state` as
    /// soon as each piece is installed.
    pub fn resolve(
        &self,
        inputs: &SigningInputs,
        ctx: &SigningContext<'_>,
        state: &mut TaskState,
        warnings: &mut Warnings,
    ) -> Result<ResolvedSigning, SigningError> {
        let certificate = match inputs.certificate {
            Some(ref cert) if inputs.option == SigningOption::NoSign => {
                warnings.push(format!(
                    "Signing is disabled; the certificate {} was not installed.",
                    cert.p12.display()
                ));
                None
            }
            Some(ref cert) => {
                let location = cert.location().ok_or(SigningError::MissingKeychainPath)?;
                let keychain_password = non_blank(cert.keychain_password.as_deref())
                    .map(String::from)
                    .unwrap_or_else(generate_password);
                let request = CertificateInstall {
                    p12: &cert.p12,
                    p12_password: cert.p12_password.as_deref(),
                    location,
                    keychain_password: &keychain_password,
                    temp_dir: ctx.temp_dir,
                };
                let installed = install_certificate(&self.runner, &request, ctx.now, warnings)?;
                if installed.delete_after {
                    state.set(
                        StateKey::KeychainToDelete,
                        installed.keychain.to_string_lossy(),
                    )?;
                }
                info!("Certificate installed in {}", installed.keychain.display());
                Some(installed)
            }
            None => None,
        };

        let profile = match inputs.profile {
            Some(ref profile) => {
                let inspector = ProfileInspector::new(&self.runner, ctx.temp_dir);
                let installed = inspector.install(&profile.path, ctx.profiles_dir)?;
                if installed.name.is_none() {
                    warnings.push(format!(
                        "Provisioning profile name not found in {}.",
                        profile.path.display()
                    ));
                }
                if profile.remove_after {
                    state.set(StateKey::ProfileToDelete, installed.uuid.clone())?;
                }
                info!(
                    "Provisioning profile {} installed at {}",
                    installed.uuid,
                    installed.path.display()
                );
                Some(installed)
            }
            None => None,
        };

        let configuration = match inputs.option {
            SigningOption::NoSign => SigningConfiguration::None,
            SigningOption::Default => SigningConfiguration::ProjectDefault,
            SigningOption::Auto => SigningConfiguration::Automatic {
                team: non_blank(inputs.team_id.as_deref()).map(String::from),
            },
            SigningOption::Manual => {
                let identity = match non_blank(inputs.identity.as_deref()) {
                    Some(identity) => Some(identity.to_string()),
                    None => match certificate {
                        Some(ref cert) => Some(self.signing_identity(&cert.keychain)?),
                        None => None,
                    },
                };
                SigningConfiguration::Manual {
                    identity,
                    profile_uuid: non_blank(inputs.profile_uuid.as_deref())
                        .map(String::from)
                        .or_else(|| profile.as_ref().map(|p| p.uuid.clone())),
                    profile_name: non_blank(inputs.profile_name.as_deref())
                        .map(String::from)
                        .or_else(|| profile.as_ref().and_then(|p| p.name.clone())),
                    suffix: non_blank(inputs.profile_suffix.as_deref()).map(String::from),
                }
            }
        };
        debug!("signing configuration: {:?}", configuration);

        Ok(ResolvedSigning {
            option: inputs.option,
            configuration,
            certificate,
            profile,
        })
    }

    fn signing_identity(&self, keychain: &Path) -> Result<String, KeychainError> {
        let identity = Security::new(&self.runner).find_signing_identity(keychain)?;
        info!("Using signing identity {}", identity);
        Ok(identity)
    }
}
