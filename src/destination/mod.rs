//! Destination specifiers for the build tool
//!
//! Each destination becomes one `-destination` argument:
//! - macOS: `platform=macOS`
//! - simulators: `platform=<P> Simulator,name=<device>`
//! - devices: `platform=<P>,name=<device>`
//!
//! A missing or `default` platform yields no destinations at all, leaving
//! the choice to the build tool.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DestinationInputs;

/// Platform name that always builds for the local Mac.
pub const MACOS_PLATFORM: &str = "macOS";

/// Platform value meaning "let the build tool decide".
pub const DEFAULT_PLATFORM: &str = "default";

/// Whether named destinations are simulators or connected devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    #[default]
    Simulators,
    Devices,
}

/// One `-destination` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub platform: String,
    /// Device or simulator name, `None` for macOS
    pub name: Option<String>,
    pub simulator: bool,
}

impl Destination {
    pub fn macos() -> Self {
        Self {
            platform: MACOS_PLATFORM.to_string(),
            name: None,
            simulator: false,
        }
    }

    pub fn named(platform: &str, name: &str, kind: DestinationKind) -> Self {
        Self {
            platform: platform.to_string(),
            name: Some(name.to_string()),
            simulator: kind == DestinationKind::Simulators,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "platform={}", self.platform)?;
        if self.simulator {
            write!(f, " Simulator")?;
        }
        if let Some(ref name) = self.name {
            write!(f, ",name={}", name)?;
        }
        Ok(())
    }
}

/// Resolve destination inputs into destination specifiers.
pub fn resolve(inputs: &DestinationInputs) -> Vec<Destination> {
    let platform = match inputs.platform.as_deref().map(str::trim) {
        None | Some("") | Some(DEFAULT_PLATFORM) => return Vec::new(),
        Some(p) => p,
    };

    if platform == MACOS_PLATFORM {
        return vec![Destination::macos()];
    }

    let names = match inputs.kind {
        DestinationKind::Simulators => &inputs.simulators,
        DestinationKind::Devices => &inputs.devices,
    };
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .map(|n| Destination::named(platform, n, inputs.kind))
        .collect()
}
