//! Provisioning profile inspection and installation.
//!
//! A profile is CMS-decoded into a scratch plist that lives only as long as
//! the [`DecodedProfile`] guard, then queried field by field. Classification
//! itself lives in `xcode_task_profile`; this module only does the scraping.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use xcode_task_profile::{classify, cloud_environment, CloudEnvironment, Platform, ProfileFields, ProfileType};

use crate::keychain::{KeychainError, Security};
use crate::plist::PlistBuddy;
use crate::tool::ToolRunner;

/// Field holding the iCloud container environment entitlement.
pub const CLOUD_ENTITLEMENT_FIELD: &str =
    "Entitlements:com.apple.developer.icloud-container-environment";

/// Profile errors
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to decode provisioning profile {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: KeychainError,
    },

    #[error("no details found in provisioning profile {0}")]
    Empty(PathBuf),

    #[error("UUID not found in provisioning profile {0}")]
    UuidNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Scratch plist holding a decoded profile, deleted on drop.
#[derive(Debug)]
pub struct DecodedProfile {
    file: NamedTempFile,
}

impl DecodedProfile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Attributes of a provisioning profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningProfile {
    pub path: PathBuf,
    pub uuid: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub profile_type: ProfileType,
    pub platform: Platform,
    /// `CFBundleIdentifier` of the sibling `Info.plist`
    pub bundle_id: Option<String>,
}

/// A profile copied into the user's profiles directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledProfile {
    pub uuid: String,
    pub name: Option<String>,
    pub path: PathBuf,
}

/// `~/Library/MobileDevice/Provisioning Profiles`
pub fn user_profiles_dir(home: &Path) -> PathBuf {
    home.join("Library")
        .join("MobileDevice")
        .join("Provisioning Profiles")
}

/// Delete every installed profile whose file name starts with `uuid`.
pub fn delete_installed(profiles_dir: &Path, uuid: &str) -> io::Result<Vec<PathBuf>> {
    let uuid = uuid.trim();
    let mut deleted = Vec::new();
    if uuid.is_empty() || !profiles_dir.is_dir() {
        return Ok(deleted);
    }

    for entry in fs::read_dir(profiles_dir)? {
        let entry = entry?;
        let matches = entry
            .file_name()
            .to_str()
            .map(|n| n.starts_with(uuid))
            .unwrap_or(false);
        if matches && entry.path().is_file() {
            info!("Deleting provisioning profile: {}", entry.path().display());
            fs::remove_file(entry.path())?;
            deleted.push(entry.path());
        }
    }
    Ok(deleted)
}

/// Reads provisioning profiles through `security cms` and `PlistBuddy`.
#[derive(Debug, Clone)]
pub struct ProfileInspector<R> {
    runner: R,
    scratch_dir: PathBuf,
}

impl<R: ToolRunner> ProfileInspector<R> {
    /// Decoded plists are written under `scratch_dir`.
    pub fn new(runner: R, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            scratch_dir: scratch_dir.into(),
        }
    }

    fn plist(&self) -> PlistBuddy<&R> {
        PlistBuddy::new(&self.runner)
    }

    /// Decode a profile into a scratch plist.
    pub fn decode(&self, profile: &Path) -> Result<DecodedProfile, ProfileError> {
        let lines = Security::new(&self.runner)
            .decode_cms(profile)
            .map_err(|source| ProfileError::Decode {
                path: profile.to_path_buf(),
                source,
            })?;
        if lines.iter().all(|l| l.trim().is_empty()) {
            return Err(ProfileError::Empty(profile.to_path_buf()));
        }

        fs::create_dir_all(&self.scratch_dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("_xcodetasktmp")
            .suffix(".plist")
            .tempfile_in(&self.scratch_dir)?;
        for line in &lines {
            writeln!(file, "{}", line)?;
        }
        file.flush()?;
        Ok(DecodedProfile { file })
    }

    fn fields(&self, decoded: &DecodedProfile) -> ProfileFields {
        let plist = self.plist();
        ProfileFields {
            provisions_all_devices: plist.print(decoded.path(), "ProvisionsAllDevices"),
            get_task_allow: plist.print(decoded.path(), "Entitlements:get-task-allow"),
            provisioned_devices: plist.print(decoded.path(), "ProvisionedDevices"),
        }
    }

    /// Classify a profile. Any failure yields [`ProfileType::Unknown`].
    pub fn classify(&self, profile: &Path, platform: Platform) -> ProfileType {
        match self.decode(profile) {
            Ok(decoded) => {
                let profile_type = classify(&self.fields(&decoded), platform);
                debug!("{} classified as {}", profile.display(), profile_type);
                profile_type
            }
            Err(e) => {
                debug!("could not classify {}: {}", profile.display(), e);
                ProfileType::Unknown
            }
        }
    }

    /// The profile's `Name`.
    pub fn name(&self, profile: &Path) -> Result<Option<String>, ProfileError> {
        let decoded = self.decode(profile)?;
        let name = self.plist().print(decoded.path(), "Name");
        debug!("profile name = {:?}", name);
        Ok(name)
    }

    /// iCloud container environment to export with, `None` when the profile
    /// carries no iCloud entitlement.
    pub fn cloud_entitlement(
        &self,
        profile: &Path,
        export_method: Option<&str>,
    ) -> Result<Option<CloudEnvironment>, ProfileError> {
        let decoded = self.decode(profile)?;
        let entitlement = self.plist().print(decoded.path(), CLOUD_ENTITLEMENT_FIELD);
        Ok(entitlement.map(|_| cloud_environment(export_method)))
    }

    /// Bundle identifier from the `Info.plist` next to an embedded profile.
    pub fn bundle_id(&self, profile: &Path) -> Option<String> {
        let info_plist = profile
            .parent()
            .map(|dir| dir.join("Info.plist"))
            .unwrap_or_else(|| PathBuf::from("Info.plist"));
        let bundle_id = self.plist().print(&info_plist, "CFBundleIdentifier");
        debug!("{} bundle identifier = {:?}", info_plist.display(), bundle_id);
        bundle_id
    }

    /// Read every attribute of a profile from a single decode.
    pub fn inspect(&self, profile: &Path, platform: Platform) -> Result<ProvisioningProfile, ProfileError> {
        let decoded = self.decode(profile)?;
        let plist = self.plist();
        Ok(ProvisioningProfile {
            path: profile.to_path_buf(),
            uuid: plist.print(decoded.path(), "UUID"),
            name: plist.print(decoded.path(), "Name"),
            profile_type: classify(&self.fields(&decoded), platform),
            platform,
            bundle_id: self.bundle_id(profile),
        })
    }

    /// Copy a profile into `profiles_dir` as `<UUID><ext>`.
    pub fn install(&self, profile: &Path, profiles_dir: &Path) -> Result<InstalledProfile, ProfileError> {
        let (uuid, name) = {
            let decoded = self.decode(profile)?;
            let plist = self.plist();
            (
                plist.print(decoded.path(), "UUID"),
                plist.print(decoded.path(), "Name"),
            )
        };
        let uuid = uuid.ok_or_else(|| ProfileError::UuidNotFound(profile.to_path_buf()))?;

        fs::create_dir_all(profiles_dir)?;
        let extension = profile
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let target = profiles_dir.join(format!("{}{}", uuid.trim(), extension));
        fs::copy(profile, &target)?;
        debug!("installed {} as {}", profile.display(), target.display());

        Ok(InstalledProfile {
            uuid,
            name,
            path: target,
        })
    }
}
