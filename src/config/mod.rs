//! Task inputs (xcode-task.toml)
//!
//! Mirrors the inputs a pipeline host hands to the Xcode task. Loading
//! validates cross-field rules up front so a bad input fails before any tool
//! runs:
//! - at least one action
//! - an explicit developer directory for `xcode.version = "specifyPath"`
//! - an export method for `export.options = "specify"`
//! - keychain path and password for non-temporary certificate keychains

mod inputs;

pub use inputs::{
    CertificateInputs, DestinationInputs, ExportInputs, KeychainChoice, ProfileInputs,
    SigningInputs, TaskInputs, XcodeInputs,
};

use std::io;

/// Inputs file looked up in the current directory when none is given.
pub const DEFAULT_INPUTS_FILE: &str = "xcode-task.toml";

/// Error types for input loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read inputs file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
