//! Property-list access through `PlistBuddy`.
//!
//! Reads are best-effort: a missing key and a failing tool both come back as
//! `None`. Mutations are fallible and operate on a file one command at a
//! time, since the tool cannot write a whole document at once.

use std::path::Path;

use tracing::debug;

use crate::tool::{Invocation, ToolError, ToolRunner};

/// Absolute path of the plist tool on macOS.
pub const PLIST_BUDDY: &str = "/usr/libexec/PlistBuddy";

/// Value type for an `Add` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlistType {
    String,
    Dict,
}

impl PlistType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlistType::String => "string",
            PlistType::Dict => "dict",
        }
    }
}

/// One mutation applied to a plist file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlistCommand {
    Clear,
    Add {
        field: String,
        ty: PlistType,
        value: Option<String>,
    },
}

impl PlistCommand {
    pub fn add_string(field: impl Into<String>, value: impl Into<String>) -> Self {
        PlistCommand::Add {
            field: field.into(),
            ty: PlistType::String,
            value: Some(value.into()),
        }
    }

    pub fn add_dict(field: impl Into<String>) -> Self {
        PlistCommand::Add {
            field: field.into(),
            ty: PlistType::Dict,
            value: None,
        }
    }

    /// Text passed to `-c`.
    pub fn render(&self) -> String {
        match self {
            PlistCommand::Clear => "Clear".to_string(),
            PlistCommand::Add { field, ty, value } => match value {
                Some(v) => format!("Add {} {} {}", field, ty.as_str(), v),
                None => format!("Add {} {}", field, ty.as_str()),
            },
        }
    }
}

/// Client for the plist tool.
#[derive(Debug, Clone)]
pub struct PlistBuddy<R> {
    runner: R,
}

impl<R: ToolRunner> PlistBuddy<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Print a field, `None` when it is absent, empty, or the tool fails.
    pub fn print(&self, file: &Path, field: &str) -> Option<String> {
        let inv = Invocation::new(PLIST_BUDDY)
            .arg("-c")
            .arg(format!("Print {}", field))
            .path_arg(file)
            .quiet();

        match self.runner.run(&inv) {
            Ok(out) => {
                let value = out.stdout_text().trim().to_string();
                if value.is_empty() {
                    None
                } else {
                    Some(value)
                }
            }
            Err(e) => {
                debug!("could not read '{}' from {}: {}", field, file.display(), e);
                None
            }
        }
    }

    /// Apply a single mutation.
    pub fn apply(&self, file: &Path, command: &PlistCommand) -> Result<(), ToolError> {
        let inv = Invocation::new(PLIST_BUDDY)
            .arg("-c")
            .arg(command.render())
            .path_arg(file);
        self.runner.run(&inv)?;
        Ok(())
    }

    /// Apply mutations in order, stopping at the first failure.
    pub fn apply_all(&self, file: &Path, commands: &[PlistCommand]) -> Result<(), ToolError> {
        for command in commands {
            self.apply(file, command)?;
        }
        Ok(())
    }
}
