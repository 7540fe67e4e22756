//! Workspace and project selection
//!
//! The workspace input may be a glob. A path ending in `.xcodeproj` is
//! passed as `-project`; anything else as `-workspace`.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::fsmatch::{find_match, MatchError};
use crate::signing::SigningStyle;
use crate::warnings::Warnings;

/// Project selection errors
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("no workspace or project matches '{0}'")]
    NotFound(String),

    #[error("invalid workspace pattern: {0}")]
    Pattern(#[from] MatchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    Workspace,
    Project,
}

/// A resolved `.xcworkspace` or `.xcodeproj`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPath {
    pub path: PathBuf,
    pub kind: ProjectKind,
}

impl ProjectPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let kind = if path
            .to_string_lossy()
            .trim_end_matches('/')
            .ends_with(".xcodeproj")
        {
            ProjectKind::Project
        } else {
            ProjectKind::Workspace
        };
        Self { path, kind }
    }

    pub fn is_project(&self) -> bool {
        self.kind == ProjectKind::Project
    }

    /// `-project` or `-workspace`
    pub fn flag(&self) -> &'static str {
        match self.kind {
            ProjectKind::Project => "-project",
            ProjectKind::Workspace => "-workspace",
        }
    }

    /// The `project.pbxproj` holding signing settings.
    ///
    /// A workspace maps to the sibling project of the same name.
    pub fn pbxproj_path(&self) -> PathBuf {
        match self.kind {
            ProjectKind::Project => self.path.join("project.pbxproj"),
            ProjectKind::Workspace => self
                .path
                .with_extension("xcodeproj")
                .join("project.pbxproj"),
        }
    }
}

impl fmt::Display for ProjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Resolve the workspace input against `working_dir`.
///
/// The first match wins; more than one match is a warning.
pub fn resolve_workspace(
    working_dir: &Path,
    pattern: &str,
    warnings: &mut Warnings,
) -> Result<ProjectPath, ProjectError> {
    let matches = find_match(working_dir, pattern.trim())?;
    let first = matches
        .first()
        .cloned()
        .ok_or_else(|| ProjectError::NotFound(pattern.to_string()))?;
    if matches.len() > 1 {
        warnings.push(format!(
            "Multiple workspaces matched '{}'; using {}.",
            pattern,
            first.display()
        ));
    }
    let project = ProjectPath::new(first);
    debug!("{} {}", project.flag(), project);
    Ok(project)
}

fn parse_style_line(line: &str) -> Option<SigningStyle> {
    match line.trim() {
        "ProvisioningStyle = Automatic;" | "CODE_SIGN_STYLE = Automatic;" => {
            Some(SigningStyle::Automatic)
        }
        "ProvisioningStyle = Manual;" | "CODE_SIGN_STYLE = Manual;" => Some(SigningStyle::Manual),
        _ => None,
    }
}

/// First signing style declared in the project file, `None` when the file
/// is missing or declares none.
pub fn provisioning_style(project: &ProjectPath) -> Option<SigningStyle> {
    let pbxproj = project.pbxproj_path();
    let file = match File::open(&pbxproj) {
        Ok(f) => f,
        Err(e) => {
            debug!("cannot read {}: {}", pbxproj.display(), e);
            return None;
        }
    };
    let style = BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .find_map(|line| parse_style_line(&line));
    debug!("{} provisioning style: {:?}", pbxproj.display(), style);
    style
}
