//! Host logging commands and the task telemetry event
//!
//! The pipeline agent scrapes `##vso[...]` lines from stdout. Telemetry is
//! best-effort: it is only published to agents new enough to accept it and
//! a failure to serialize never affects the task result.

use std::path::Path;

use serde::Serialize;
use tracing::debug;

/// Oldest agent that accepts `telemetry.publish`.
pub const MIN_TELEMETRY_AGENT_VERSION: (u64, u64, u64) = (2, 120, 0);

pub const TELEMETRY_AREA: &str = "TaskHub";
pub const TELEMETRY_FEATURE: &str = "Xcode";

/// Selection reported when a run fails before its inputs are loaded.
pub const UNKNOWN_SELECTION: &str = "unknown";

/// Fields reported for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryData {
    pub xcode_version_selection: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    pub package_app: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_option: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_options: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xcode_version: Option<String>,
}

impl TelemetryData {
    pub fn new(selection: impl Into<String>) -> Self {
        Self {
            xcode_version_selection: selection.into(),
            ..Default::default()
        }
    }

    /// Event for a run that never got as far as reading its inputs.
    pub fn unloaded() -> Self {
        Self::new(UNKNOWN_SELECTION)
    }
}

/// Parse `major.minor.patch`, missing parts as 0.
fn parse_agent_version(version: &str) -> Option<(u64, u64, u64)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = match parts.next() {
        Some(p) => p.parse().ok()?,
        None => 0,
    };
    let patch = match parts.next() {
        Some(p) => p.parse().ok()?,
        None => 0,
    };
    Some((major, minor, patch))
}

/// Whether an agent of `version` accepts telemetry.
pub fn agent_supports_telemetry(version: Option<&str>) -> bool {
    version
        .and_then(parse_agent_version)
        .map(|v| v >= MIN_TELEMETRY_AGENT_VERSION)
        .unwrap_or(false)
}

/// `##vso[telemetry.publish area=<area>;feature=<feature>]<json>`
pub fn telemetry_command(data: &TelemetryData) -> Result<String, serde_json::Error> {
    Ok(format!(
        "##vso[telemetry.publish area={};feature={}]{}",
        TELEMETRY_AREA,
        TELEMETRY_FEATURE,
        serde_json::to_string(data)?
    ))
}

/// Publish telemetry to the agent when it supports it.
///
/// Returns the line written, if any.
pub fn emit_telemetry(agent_version: Option<&str>, data: &TelemetryData) -> Option<String> {
    if !agent_supports_telemetry(agent_version) {
        debug!(
            "Agent version is {}. Version 2.120.0 or higher is needed for telemetry.",
            agent_version.unwrap_or("unknown")
        );
        return None;
    }
    match telemetry_command(data) {
        Ok(line) => {
            println!("{}", line);
            Some(line)
        }
        Err(e) => {
            debug!("Unable to log telemetry: {}", e);
            None
        }
    }
}

/// `##vso[task.uploadfile]<path>`
pub fn upload_file_command(path: &Path) -> String {
    format!("##vso[task.uploadfile]{}", path.display())
}

/// Ask the agent to attach a log file, if it exists.
pub fn upload_log_file(path: &Path) -> bool {
    if path.exists() {
        println!("{}", upload_file_command(path));
        true
    } else {
        debug!("log file {} does not exist", path.display());
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_agent_version_gate() {
        assert!(agent_supports_telemetry(Some("2.120.0")));
        assert!(agent_supports_telemetry(Some("2.136.1")));
        assert!(agent_supports_telemetry(Some("3")));
        assert!(!agent_supports_telemetry(Some("2.119.9")));
        assert!(!agent_supports_telemetry(Some("2.117")));
        assert!(!agent_supports_telemetry(Some("not-a-version")));
        assert!(!agent_supports_telemetry(None));
    }

    #[test]
    fn test_telemetry_command() {
        let data = TelemetryData {
            xcode_version_selection: "default".to_string(),
            actions: vec!["build".to_string()],
            package_app: true,
            signing_option: Some("manual".to_string()),
            export_options: Some("auto".to_string()),
            xcode_version: Some("9.4.1".to_string()),
        };
        let line = telemetry_command(&data).unwrap();
        let (prefix, json) = line.split_once(']').unwrap();
        assert_eq!(prefix, "##vso[telemetry.publish area=TaskHub;feature=Xcode");

        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["xcodeVersionSelection"], "default");
        assert_eq!(value["actions"][0], "build");
        assert_eq!(value["packageApp"], true);
        assert_eq!(value["signingOption"], "manual");
        assert_eq!(value["exportOptions"], "auto");
        assert_eq!(value["xcodeVersion"], "9.4.1");
    }

    #[test]
    fn test_unloaded_run_reports_unknown_selection() {
        let line = emit_telemetry(Some("2.136.1"), &TelemetryData::unloaded()).unwrap();
        let (_, json) = line.split_once(']').unwrap();
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["xcodeVersionSelection"], "unknown");
        assert_eq!(value["packageApp"], false);
        assert!(value.get("actions").is_none());
        assert!(value.get("xcodeVersion").is_none());
    }

    #[test]
    fn test_emit_skips_old_agents() {
        assert!(emit_telemetry(Some("2.100.0"), &TelemetryData::default()).is_none());
        assert!(emit_telemetry(Some("2.120.0"), &TelemetryData::default()).is_some());
    }

    #[test]
    fn test_upload_only_existing_files() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("xcodebuild.log");
        assert!(!upload_log_file(&log));
        std::fs::write(&log, "log").unwrap();
        assert!(upload_log_file(&log));
        assert_eq!(
            upload_file_command(&log),
            format!("##vso[task.uploadfile]{}", log.display())
        );
    }
}
