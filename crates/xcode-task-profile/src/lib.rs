//! Provisioning profile classification rules.
//!
//! Pure decision logic shared by the Xcode task: given the handful of fields
//! scraped from a decoded provisioning profile, decide which distribution
//! type the profile grants and which iCloud container environment an export
//! should request. Nothing in this crate spawns processes or touches disk;
//! callers own the scraping and hand over plain values.

mod classify;
mod kind;

pub use classify::{classify, cloud_environment, ProfileFields};
pub use kind::{CloudEnvironment, ParseError, Platform, ProfileType};

/// Interpret a printed plist value as a boolean the way plist tools render it.
///
/// `PlistBuddy` prints booleans as `true`/`false`; anything else, including
/// an absent value, is not true.
pub fn is_true(value: Option<&str>) -> bool {
    value
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Whether a printed plist value counts as present.
///
/// An empty print is treated the same as a missing key.
pub fn is_present(value: Option<&str>) -> bool {
    value.map(|v| !v.trim().is_empty()).unwrap_or(false)
}
