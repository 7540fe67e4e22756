//! Input schema and validation

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::destination::DestinationKind;
use crate::export::ExportPolicy;
use crate::keychain::KeychainLocation;
use crate::signing::SigningOption;
use crate::toolchain::XcodeSelection;

fn default_actions() -> Vec<String> {
    vec!["build".to_string()]
}

fn default_xcode_version() -> String {
    "default".to_string()
}

/// Top-level task inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInputs {
    /// Working directory; relative paths resolve against it
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Workspace or project path, glob patterns allowed
    #[serde(default)]
    pub workspace: Option<String>,

    #[serde(default)]
    pub scheme: Option<String>,

    #[serde(default)]
    pub sdk: Option<String>,

    #[serde(default)]
    pub configuration: Option<String>,

    /// Build actions, e.g. `["clean", "build"]`
    #[serde(default = "default_actions")]
    pub actions: Vec<String>,

    /// Extra build-tool arguments as one command line
    #[serde(default)]
    pub args: Option<String>,

    /// Archive and export after building
    #[serde(default)]
    pub package_app: bool,

    #[serde(default)]
    pub archive_path: Option<String>,

    #[serde(default)]
    pub export_path: Option<String>,

    /// Extra export arguments as one command line
    #[serde(default)]
    pub export_args: Option<String>,

    /// Pipe build-tool output through xcpretty
    #[serde(default)]
    pub use_xcpretty: bool,

    /// Scratch directory for keychains, logs and export options
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    #[serde(default)]
    pub xcode: XcodeInputs,

    #[serde(default)]
    pub destination: DestinationInputs,

    #[serde(default)]
    pub signing: SigningInputs,

    #[serde(default)]
    pub export: ExportInputs,
}

impl Default for TaskInputs {
    fn default() -> Self {
        Self {
            working_dir: None,
            workspace: None,
            scheme: None,
            sdk: None,
            configuration: None,
            actions: default_actions(),
            args: None,
            package_app: false,
            archive_path: None,
            export_path: None,
            export_args: None,
            use_xcpretty: false,
            temp_dir: None,
            xcode: XcodeInputs::default(),
            destination: DestinationInputs::default(),
            signing: SigningInputs::default(),
            export: ExportInputs::default(),
        }
    }
}

/// `[xcode]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XcodeInputs {
    /// `"default"`, a major version such as `"9"`, or `"specifyPath"`
    #[serde(default = "default_xcode_version")]
    pub version: String,

    /// Developer directory for `"specifyPath"`
    #[serde(default)]
    pub developer_dir: Option<PathBuf>,
}

impl Default for XcodeInputs {
    fn default() -> Self {
        Self {
            version: default_xcode_version(),
            developer_dir: None,
        }
    }
}

/// `[destination]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationInputs {
    /// `"default"`, `"iOS"`, `"tvOS"`, `"macOS"` or any other platform name
    #[serde(default)]
    pub platform: Option<String>,

    #[serde(default, rename = "type")]
    pub kind: DestinationKind,

    #[serde(default)]
    pub simulators: Vec<String>,

    #[serde(default)]
    pub devices: Vec<String>,
}

/// `[signing]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigningInputs {
    #[serde(default)]
    pub option: SigningOption,

    #[serde(default)]
    pub identity: Option<String>,

    #[serde(default)]
    pub profile_uuid: Option<String>,

    #[serde(default)]
    pub profile_name: Option<String>,

    /// Target suffix for `PROVISIONING_PROFILE_<suffix>`
    #[serde(default)]
    pub profile_suffix: Option<String>,

    #[serde(default)]
    pub team_id: Option<String>,

    /// Certificate to install before building
    #[serde(default)]
    pub certificate: Option<CertificateInputs>,

    /// Provisioning profile to install before building
    #[serde(default)]
    pub profile: Option<ProfileInputs>,
}

/// Where an installed certificate goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeychainChoice {
    #[default]
    Temp,
    Default,
    Custom,
}

/// `[signing.certificate]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateInputs {
    pub p12: PathBuf,

    #[serde(default)]
    pub p12_password: Option<String>,

    #[serde(default)]
    pub keychain: KeychainChoice,

    #[serde(default)]
    pub keychain_path: Option<PathBuf>,

    /// Generated for the temporary keychain when absent
    #[serde(default)]
    pub keychain_password: Option<String>,
}

impl CertificateInputs {
    /// Keychain location, `None` for a custom keychain without a path.
    pub fn location(&self) -> Option<KeychainLocation> {
        match self.keychain {
            KeychainChoice::Temp => Some(KeychainLocation::Temp),
            KeychainChoice::Default => Some(KeychainLocation::Default),
            KeychainChoice::Custom => self.keychain_path.clone().map(KeychainLocation::Custom),
        }
    }
}

/// `[signing.profile]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileInputs {
    pub path: PathBuf,

    /// Delete the installed profile in teardown
    #[serde(default)]
    pub remove_after: bool,
}

/// `[export]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportInputs {
    #[serde(default)]
    pub options: ExportPolicy,

    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub team_id: Option<String>,

    /// Export options plist for `options = "plist"`
    #[serde(default)]
    pub plist: Option<PathBuf>,
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

impl TaskInputs {
    /// Load and validate inputs from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    /// Parse and validate inputs from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let inputs: TaskInputs = toml::from_str(s)?;
        inputs.validate()?;
        Ok(inputs)
    }

    /// Validate cross-field rules
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.actions.iter().all(|a| a.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "At least one action must be given in 'actions'".to_string(),
            ));
        }

        let selection = XcodeSelection::parse(&self.xcode.version)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        if selection == XcodeSelection::SpecifyPath && self.xcode.developer_dir.is_none() {
            return Err(ConfigError::ValidationError(
                "'xcode.developer_dir' is required when 'xcode.version' is 'specifyPath'"
                    .to_string(),
            ));
        }

        if self.export.options == ExportPolicy::Specify && !present(&self.export.method) {
            return Err(ConfigError::ValidationError(
                "'export.method' is required when 'export.options' is 'specify'".to_string(),
            ));
        }

        if let Some(ref cert) = self.signing.certificate {
            if cert.keychain == KeychainChoice::Custom && cert.keychain_path.is_none() {
                return Err(ConfigError::ValidationError(
                    "'signing.certificate.keychain_path' is required for a custom keychain"
                        .to_string(),
                ));
            }
            if cert.keychain != KeychainChoice::Temp && !present(&cert.keychain_password) {
                return Err(ConfigError::ValidationError(
                    "'signing.certificate.keychain_password' is required unless the keychain is 'temp'"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Working directory, defaulting to the current one.
    pub fn working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Actions with blanks removed.
    pub fn actions(&self) -> Vec<String> {
        self.actions
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .map(String::from)
            .collect()
    }

    /// The sdk when set and non-blank.
    pub fn sdk(&self) -> Option<&str> {
        self.sdk.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// The configuration when set and non-blank.
    pub fn configuration(&self) -> Option<&str> {
        self.configuration
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// The scheme when set and non-blank.
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}
