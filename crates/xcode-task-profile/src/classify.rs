//! Profile type classification.
//!
//! Mobile rules:
//! - `ProvisionsAllDevices` true → enterprise
//! - `Entitlements:get-task-allow` true → development
//! - no `ProvisionedDevices` → app-store
//! - otherwise → ad-hoc
//!
//! Desktop rules:
//! - `ProvisionsAllDevices` true → developer-id
//! - no `ProvisionedDevices` → app-store
//! - otherwise → development

use crate::kind::{CloudEnvironment, Platform, ProfileType};
use crate::{is_present, is_true};

/// Raw field values printed from a decoded provisioning profile.
///
/// Each value is exactly what the plist tool printed, `None` when the key is
/// missing or could not be read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileFields {
    /// `ProvisionsAllDevices`
    pub provisions_all_devices: Option<String>,
    /// `Entitlements:get-task-allow`
    pub get_task_allow: Option<String>,
    /// `ProvisionedDevices`
    pub provisioned_devices: Option<String>,
}

/// Classify a profile from its scraped fields.
pub fn classify(fields: &ProfileFields, platform: Platform) -> ProfileType {
    let all_devices = is_true(fields.provisions_all_devices.as_deref());
    let has_devices = is_present(fields.provisioned_devices.as_deref());

    match platform {
        Platform::IOS => {
            if all_devices {
                ProfileType::Enterprise
            } else if is_true(fields.get_task_allow.as_deref()) {
                ProfileType::Development
            } else if !has_devices {
                ProfileType::AppStore
            } else {
                ProfileType::AdHoc
            }
        }
        Platform::MacOS => {
            if all_devices {
                ProfileType::DeveloperId
            } else if !has_devices {
                ProfileType::AppStore
            } else {
                ProfileType::Development
            }
        }
    }
}

/// Map an export method to the iCloud container environment it needs.
///
/// Distribution methods (`app-store`, `enterprise`, `developer-id`) use the
/// production container; every other method, including none, uses development.
pub fn cloud_environment(export_method: Option<&str>) -> CloudEnvironment {
    match export_method {
        Some("app-store") | Some("enterprise") | Some("developer-id") => {
            CloudEnvironment::Production
        }
        _ => CloudEnvironment::Development,
    }
}
