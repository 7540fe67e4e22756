//! File-system glob matching
//!
//! Patterns use globset syntax with `/` as a literal separator, so `*` stays
//! inside one path component and `**/` spans any number of them. Relative
//! patterns resolve against a root directory. Only the part of the tree
//! below the pattern's literal prefix is walked.

use std::path::{Component, Path, PathBuf};

use globset::GlobBuilder;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Glob matching errors
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Glob pattern error: {0}")]
    Glob(#[from] globset::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

fn has_glob_chars(s: &str) -> bool {
    s.contains(['*', '?', '[', '{'])
}

/// Leading components of a pattern that hold no glob characters.
fn literal_base(pattern: &Path) -> PathBuf {
    let mut base = PathBuf::new();
    for component in pattern.components() {
        if let Component::Normal(part) = component {
            if has_glob_chars(&part.to_string_lossy()) {
                break;
            }
        }
        base.push(component);
    }
    base
}

/// Paths under `root` matching `pattern`, in a stable order.
///
/// A pattern without glob characters matches the named path when it exists.
/// Symlinks are not followed.
pub fn find_match(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, MatchError> {
    let full = if Path::new(pattern).is_absolute() {
        PathBuf::from(pattern)
    } else {
        root.join(pattern)
    };

    if !has_glob_chars(pattern) {
        return Ok(if full.exists() { vec![full] } else { Vec::new() });
    }

    let glob = GlobBuilder::new(&full.to_string_lossy())
        .literal_separator(true)
        .build()?
        .compile_matcher();

    let base = literal_base(&full);
    if !base.exists() {
        debug!("glob base {} does not exist", base.display());
        return Ok(Vec::new());
    }

    let mut matches = Vec::new();
    for entry in WalkDir::new(&base)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
    {
        let entry = entry?;
        if glob.is_match(entry.path()) {
            matches.push(entry.path().to_path_buf());
        }
    }
    debug!("{} matched {} path(s)", full.display(), matches.len());
    Ok(matches)
}
