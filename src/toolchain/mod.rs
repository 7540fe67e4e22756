//! Developer directory selection
//!
//! `xcode.version` picks which Xcode the build tools run from:
//! - `default`: leave `DEVELOPER_DIR` alone
//! - `<N>`: `XCODE_<N>_DEVELOPER_DIR`, else a known install location for
//!   that major version when it exists on disk
//! - `specifyPath`: the configured `developer_dir`
//!
//! The resolved directory is exported as `DEVELOPER_DIR` to every tool.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Environment variable the Apple tools read.
pub const DEVELOPER_DIR_ENV: &str = "DEVELOPER_DIR";

/// Install locations used when `XCODE_<N>_DEVELOPER_DIR` is not set.
pub const FALLBACK_DEVELOPER_DIRS: &[(u32, &str)] = &[
    (8, "/Applications/Xcode_8.3.3.app/Contents/Developer"),
    (9, "/Applications/Xcode_9.1.app/Contents/Developer"),
];

/// Toolchain errors
#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("invalid xcode version selection '{0}': expected 'default', a major version or 'specifyPath'")]
    InvalidSelection(String),

    #[error("failed to locate Xcode {version}; set {env_name} to its developer directory")]
    NotFound { version: u32, env_name: String },

    #[error("no developer directory given for 'specifyPath'")]
    MissingDeveloperDir,
}

/// Parsed `xcode.version`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XcodeSelection {
    Default,
    Major(u32),
    SpecifyPath,
}

impl XcodeSelection {
    pub fn parse(value: &str) -> Result<Self, ToolchainError> {
        match value.trim() {
            "" | "default" => Ok(XcodeSelection::Default),
            "specifyPath" => Ok(XcodeSelection::SpecifyPath),
            other => other
                .parse::<u32>()
                .map(XcodeSelection::Major)
                .map_err(|_| ToolchainError::InvalidSelection(other.to_string())),
        }
    }
}

impl fmt::Display for XcodeSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XcodeSelection::Default => f.write_str("default"),
            XcodeSelection::Major(n) => write!(f, "{}", n),
            XcodeSelection::SpecifyPath => f.write_str("specifyPath"),
        }
    }
}

/// `XCODE_<N>_DEVELOPER_DIR`
pub fn version_env_name(version: u32) -> String {
    format!("XCODE_{}_DEVELOPER_DIR", version)
}

/// Resolves the developer directory for a selection.
#[derive(Debug, Clone)]
pub struct DeveloperDirResolver {
    fallbacks: Vec<(u32, PathBuf)>,
}

impl Default for DeveloperDirResolver {
    fn default() -> Self {
        Self::with_fallbacks(
            FALLBACK_DEVELOPER_DIRS
                .iter()
                .map(|(v, p)| (*v, PathBuf::from(p))),
        )
    }
}

impl DeveloperDirResolver {
    pub fn with_fallbacks(fallbacks: impl IntoIterator<Item = (u32, PathBuf)>) -> Self {
        Self {
            fallbacks: fallbacks.into_iter().collect(),
        }
    }

    /// Developer directory to export, `None` for the default Xcode.
    ///
    /// `env` looks up host variables.
    pub fn resolve<F>(
        &self,
        selection: XcodeSelection,
        developer_dir: Option<&Path>,
        env: F,
    ) -> Result<Option<PathBuf>, ToolchainError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match selection {
            XcodeSelection::Default => Ok(None),
            XcodeSelection::SpecifyPath => developer_dir
                .filter(|d| !d.as_os_str().is_empty())
                .map(|d| Some(d.to_path_buf()))
                .ok_or(ToolchainError::MissingDeveloperDir),
            XcodeSelection::Major(version) => {
                let env_name = version_env_name(version);
                if let Some(dir) = env(&env_name).filter(|d| !d.trim().is_empty()) {
                    debug!("{} = {}", env_name, dir);
                    return Ok(Some(PathBuf::from(dir.trim())));
                }

                let fallback = self
                    .fallbacks
                    .iter()
                    .find(|(v, _)| *v == version)
                    .map(|(_, p)| p)
                    .filter(|p| p.exists());
                match fallback {
                    Some(dir) => {
                        debug!("using fallback developer dir {}", dir.display());
                        Ok(Some(dir.clone()))
                    }
                    None => Err(ToolchainError::NotFound { version, env_name }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_selection() {
        assert_eq!(XcodeSelection::parse("default").unwrap(), XcodeSelection::Default);
        assert_eq!(XcodeSelection::parse("").unwrap(), XcodeSelection::Default);
        assert_eq!(XcodeSelection::parse("9").unwrap(), XcodeSelection::Major(9));
        assert_eq!(
            XcodeSelection::parse("specifyPath").unwrap(),
            XcodeSelection::SpecifyPath
        );
        assert!(XcodeSelection::parse("nine").is_err());
        assert_eq!(XcodeSelection::Major(10).to_string(), "10");
    }

    #[test]
    fn test_default_leaves_environment_alone() {
        let resolver = DeveloperDirResolver::default();
        assert_eq!(resolver.resolve(XcodeSelection::Default, None, no_env).unwrap(), None);
    }

    #[test]
    fn test_specify_path() {
        let resolver = DeveloperDirResolver::default();
        let dir = Path::new("/Applications/Xcode_10.app/Contents/Developer");
        assert_eq!(
            resolver
                .resolve(XcodeSelection::SpecifyPath, Some(dir), no_env)
                .unwrap(),
            Some(dir.to_path_buf())
        );
        assert!(matches!(
            resolver.resolve(XcodeSelection::SpecifyPath, None, no_env),
            Err(ToolchainError::MissingDeveloperDir)
        ));
    }

    #[test]
    fn test_major_version_from_env() {
        let resolver = DeveloperDirResolver::with_fallbacks(Vec::new());
        let env = |name: &str| {
            (name == "XCODE_10_DEVELOPER_DIR").then(|| "/Apps/Xcode10/Contents/Developer".to_string())
        };
        assert_eq!(
            resolver.resolve(XcodeSelection::Major(10), None, env).unwrap(),
            Some(PathBuf::from("/Apps/Xcode10/Contents/Developer"))
        );
    }

    #[test]
    fn test_major_version_fallback_must_exist() {
        let temp = TempDir::new().unwrap();
        let resolver = DeveloperDirResolver::with_fallbacks(vec![
            (8, temp.path().to_path_buf()),
            (9, temp.path().join("missing")),
        ]);
        assert_eq!(
            resolver.resolve(XcodeSelection::Major(8), None, no_env).unwrap(),
            Some(temp.path().to_path_buf())
        );

        let err = resolver
            .resolve(XcodeSelection::Major(9), None, no_env)
            .unwrap_err();
        assert!(err.to_string().contains("XCODE_9_DEVELOPER_DIR"));
    }
}
