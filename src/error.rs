//! Task error taxonomy and exit codes

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::export::ExportError;
use crate::fsmatch::MatchError;
use crate::project::ProjectError;
use crate::signing::SigningError;
use crate::state::StateError;
use crate::tool::ToolError;
use crate::toolchain::ToolchainError;

/// Main-phase errors
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Toolchain(#[from] ToolchainError),

    #[error("{0}")]
    Project(#[from] ProjectError),

    #[error("{0}")]
    Tool(#[from] ToolError),

    #[error("{0}")]
    Signing(#[from] SigningError),

    #[error("{0}")]
    Export(#[from] ExportError),

    #[error("{0}")]
    Match(#[from] MatchError),

    #[error("task state error: {0}")]
    State(#[from] StateError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TaskError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            TaskError::Config(ConfigError::ValidationError(_)) => 2,
            TaskError::Config(_) => 1,
            TaskError::Validation(_) => 2,
            TaskError::Toolchain(ToolchainError::NotFound { .. }) => 1,
            TaskError::Toolchain(_) => 2,
            TaskError::Project(ProjectError::NotFound(_)) => 2,
            TaskError::Project(_) => 1,
            TaskError::Tool(_) => 50,
            TaskError::Signing(_) => 40,
            TaskError::Export(ExportError::PlistNotFound(_) | ExportError::MissingMethod) => 2,
            TaskError::Export(ExportError::Tool(_)) => 50,
            TaskError::Export(_) => 40,
            TaskError::Match(_) => 1,
            TaskError::State(_) => 1,
            TaskError::Io(_) => 1,
        }
    }
}
