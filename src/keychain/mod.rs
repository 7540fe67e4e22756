//! Credential-store access through the macOS `security` tool.
//!
//! Keychain lifecycle for signing:
//! - create (with an extended auto-lock timeout) or reuse a keychain file
//! - unlock before every import
//! - import the P12 and, on reused keychains, grant the signing tools access
//!   to the private key through its partition list
//! - make sure the keychain is on the user search list, then verify it

mod install;

pub use install::{install_certificate, CertificateInstall, InstalledCertificate, KeychainLocation};

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex_lite::Regex;
use thiserror::Error;
use tracing::{debug, info};

use crate::certificate::{cached_regex, CertificateError};
use crate::tool::{Invocation, ToolError, ToolOutput, ToolRunner};

/// File name of the per-job keychain under the temp directory.
pub const TEMP_KEYCHAIN_NAME: &str = "ios_signing_temp.keychain";

/// Auto-lock timeout for new keychains, the host's maximum job length.
pub const AUTO_LOCK_TIMEOUT_SECONDS: u32 = 21600;

/// Partitions granted to the imported private key.
pub const PARTITION_LIST: &str = "apple-tool:,apple:";

/// Marker printed by `security` versions without the partition-list command.
const UNKNOWN_COMMAND: &str = "security: unknown command";

/// Keychain errors
#[derive(Debug, Error)]
pub enum KeychainError {
    #[error("keychain command failed: {0}")]
    Tool(#[from] ToolError),

    #[error("keychain {0} could not be added to the keychain search list")]
    NotInSearchList(PathBuf),

    #[error("no code signing identity found in keychain {0}")]
    SigningIdentityNotFound(PathBuf),

    #[error("failed to set the partition list of the private key: {0}")]
    PartitionList(#[source] ToolError),

    #[error("could not determine the default keychain")]
    NoDefaultKeychain,

    #[error(transparent)]
    Certificate(#[from] CertificateError),
}

/// Result of granting the private key's partition list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionListOutcome {
    Applied,
    /// The installed `security` predates the command.
    Unsupported,
}

/// Client for the `security` tool.
#[derive(Debug, Clone)]
pub struct Security<R> {
    runner: R,
}

impl<R: ToolRunner> Security<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    fn security() -> Invocation {
        Invocation::new("security")
    }

    fn run(&self, inv: Invocation) -> Result<ToolOutput, KeychainError> {
        Ok(self.runner.run(&inv)?)
    }

    pub fn create_keychain(&self, keychain: &Path, password: &str) -> Result<(), KeychainError> {
        self.run(
            Self::security()
                .args(["create-keychain", "-p"])
                .secret_arg(password)
                .path_arg(keychain),
        )?;
        Ok(())
    }

    /// Apply the auto-lock timeout to a keychain.
    pub fn set_keychain_settings(&self, keychain: &Path) -> Result<(), KeychainError> {
        self.run(
            Self::security()
                .args(["set-keychain-settings", "-lut"])
                .arg(AUTO_LOCK_TIMEOUT_SECONDS.to_string())
                .path_arg(keychain),
        )?;
        Ok(())
    }

    /// Delete a keychain if its file exists. Returns whether it was deleted.
    pub fn delete_keychain(&self, keychain: &Path) -> Result<bool, KeychainError> {
        if !keychain.exists() {
            return Ok(false);
        }
        self.run(Self::security().arg("delete-keychain").path_arg(keychain))?;
        info!("Deleted keychain {}", keychain.display());
        Ok(true)
    }

    pub fn unlock(&self, keychain: &Path, password: &str) -> Result<(), KeychainError> {
        self.run(
            Self::security()
                .args(["unlock-keychain", "-p"])
                .secret_arg(password)
                .path_arg(keychain),
        )?;
        Ok(())
    }

    /// Import a P12 certificate, allowing any application to use it.
    pub fn import_p12(
        &self,
        keychain: &Path,
        p12: &Path,
        p12_password: Option<&str>,
    ) -> Result<(), KeychainError> {
        self.run(
            Self::security()
                .arg("import")
                .path_arg(p12)
                .arg("-P")
                .secret_arg(p12_password.unwrap_or(""))
                .args(["-A", "-t", "cert", "-f", "pkcs12", "-k"])
                .path_arg(keychain),
        )?;
        Ok(())
    }

    /// Current user keychain search list, quotes removed.
    pub fn search_list(&self) -> Result<Vec<String>, KeychainError> {
        let out = self.run(Self::security().args(["list-keychain", "-d", "user"]).quiet())?;
        let list: Vec<String> = out
            .stdout
            .iter()
            .map(|l| l.trim().replace('"', ""))
            .filter(|l| !l.is_empty())
            .collect();
        debug!("keychain search list = {:?}", list);
        Ok(list)
    }

    pub fn set_search_list(&self, keychains: &[String]) -> Result<(), KeychainError> {
        self.run(
            Self::security()
                .args(["list-keychain", "-d", "user", "-s"])
                .args(keychains.iter().cloned()),
        )?;
        Ok(())
    }

    /// Put `keychain` at the front of the search list unless already listed,
    /// then re-read the list to confirm it is there.
    ///
    /// Listing is checked by substring so `/private/var/...` entries match
    /// `/var/...` paths.
    pub fn ensure_in_search_list(&self, keychain: &Path) -> Result<(), KeychainError> {
        let wanted = keychain.to_string_lossy().to_string();
        let listed = |list: &[String]| list.iter().any(|k| k.contains(&wanted));

        let current = self.search_list()?;
        if !listed(&current) {
            let mut updated = Vec::with_capacity(current.len() + 1);
            updated.push(wanted.clone());
            updated.extend(current);
            self.set_search_list(&updated)?;
        }

        if listed(&self.search_list()?) {
            Ok(())
        } else {
            Err(KeychainError::NotInSearchList(keychain.to_path_buf()))
        }
    }

    /// Grant `apple-tool:,apple:` access to the named private key.
    ///
    /// An older `security` without the command is reported as
    /// [`PartitionListOutcome::Unsupported`]; any other failure is an error.
    pub fn set_key_partition_list(
        &self,
        keychain: &Path,
        password: &str,
        key_name: &str,
    ) -> Result<PartitionListOutcome, KeychainError> {
        debug!("Setting the partition_id ACL for {}", key_name);
        let inv = Self::security()
            .args(["set-key-partition-list", "-S", PARTITION_LIST, "-s", "-l", key_name, "-k"])
            .secret_arg(password)
            .path_arg(keychain);

        match self.runner.run(&inv) {
            Ok(_) => Ok(PartitionListOutcome::Applied),
            Err(e) if e.stderr_contains(UNKNOWN_COMMAND) => Ok(PartitionListOutcome::Unsupported),
            Err(e) => Err(KeychainError::PartitionList(e)),
        }
    }

    /// First valid code signing identity in a keychain.
    pub fn find_signing_identity(&self, keychain: &Path) -> Result<String, KeychainError> {
        let out = self.run(
            Self::security()
                .args(["find-identity", "-v", "-p", "codesigning"])
                .path_arg(keychain),
        )?;

        parse_signing_identity(out.stdout.iter().map(String::as_str))
            .ok_or_else(|| KeychainError::SigningIdentityNotFound(keychain.to_path_buf()))
    }

    /// Delete a certificate by its SHA-1 hash.
    pub fn delete_certificate(&self, keychain: &Path, sha1: &str) -> Result<(), KeychainError> {
        self.run(
            Self::security()
                .args(["delete-certificate", "-Z", sha1])
                .path_arg(keychain),
        )?;
        Ok(())
    }

    /// Path of the user's default keychain.
    pub fn default_keychain(&self) -> Result<PathBuf, KeychainError> {
        let out = self.run(Self::security().arg("default-keychain").quiet())?;
        out.first_line()
            .map(|l| l.replace('"', "").trim().to_string())
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .ok_or(KeychainError::NoDefaultKeychain)
    }

    /// Decode a CMS-signed file such as a provisioning profile.
    pub fn decode_cms(&self, file: &Path) -> Result<Vec<String>, KeychainError> {
        let out = self.run(
            Self::security()
                .args(["cms", "-D", "-i"])
                .path_arg(file)
                .quiet(),
        )?;
        Ok(out.stdout)
    }
}

static QUOTED_IDENTITY: OnceLock<Option<Regex>> = OnceLock::new();

/// Extract the first quoted identity from `find-identity` output.
pub fn parse_signing_identity<'a>(lines: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let re = cached_regex(&QUOTED_IDENTITY, r#""(.+)""#)?;
    lines
        .into_iter()
        .filter_map(|line| re.captures(line.trim()))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .next()
}
