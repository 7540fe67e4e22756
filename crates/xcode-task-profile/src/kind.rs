//! Profile type, platform and cloud environment enumerations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error parsing one of the enumerations from its wire name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown platform '{0}': expected 'ios' or 'macos'")]
    Platform(String),

    #[error("unknown provisioning profile type '{0}'")]
    ProfileType(String),
}

/// Distribution type granted by a provisioning profile.
///
/// The wire names double as `xcodebuild -exportArchive` export methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileType {
    AppStore,
    AdHoc,
    Enterprise,
    Development,
    DeveloperId,
    /// Classification could not be completed.
    Unknown,
}

impl ProfileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileType::AppStore => "app-store",
            ProfileType::AdHoc => "ad-hoc",
            ProfileType::Enterprise => "enterprise",
            ProfileType::Development => "development",
            ProfileType::DeveloperId => "developer-id",
            ProfileType::Unknown => "unknown",
        }
    }

    /// Export method for this type, `None` when the type is unknown.
    pub fn export_method(&self) -> Option<&'static str> {
        match self {
            ProfileType::Unknown => None,
            other => Some(other.as_str()),
        }
    }
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "app-store" => Ok(ProfileType::AppStore),
            "ad-hoc" => Ok(ProfileType::AdHoc),
            "enterprise" => Ok(ProfileType::Enterprise),
            "development" => Ok(ProfileType::Development),
            "developer-id" => Ok(ProfileType::DeveloperId),
            "unknown" => Ok(ProfileType::Unknown),
            other => Err(ParseError::ProfileType(other.to_string())),
        }
    }
}

/// Platform family a profile was issued for.
///
/// Mobile profiles use the `.mobileprovision` extension, desktop profiles
/// `.provisionprofile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "ios")]
    IOS,
    #[serde(rename = "macos")]
    MacOS,
}

impl Platform {
    /// File name of the profile embedded in an archived bundle.
    pub fn embedded_profile_name(&self) -> &'static str {
        match self {
            Platform::IOS => "embedded.mobileprovision",
            Platform::MacOS => "embedded.provisionprofile",
        }
    }
}

impl FromStr for Platform {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ios" | "mobile" => Ok(Platform::IOS),
            "macos" | "desktop" => Ok(Platform::MacOS),
            other => Err(ParseError::Platform(other.to_string())),
        }
    }
}

/// iCloud container environment written into export options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloudEnvironment {
    Production,
    Development,
}

impl CloudEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudEnvironment::Production => "Production",
            CloudEnvironment::Development => "Development",
        }
    }
}

impl fmt::Display for CloudEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
