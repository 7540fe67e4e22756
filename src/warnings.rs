//! Warning collection.
//!
//! Warnings are reported as they happen and also kept for the final report.

use serde::Serialize;
use tracing::warn;

/// Ordered list of warnings raised during one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Warnings(Vec<String>);

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning and emit it.
    pub fn push(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.0.push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Whether any warning contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.iter().any(|w| w.contains(needle))
    }
}
