//! # Log Scope
//!
//! Hierarchical logging context for stages.
//!
//! Every stage logs under a dotted path built from its container chain,
//! e.g. `pipette.reduce.phot`. The path is attached to every tracing record
//! as the `scope` field, so a subscriber can filter or group records by
//! pipeline branch. Scopes are plain values: a child holds its full path and
//! keeps no reference to its parent.

use std::fmt;
use std::sync::Arc;

/// Name of the process-wide default scope.
pub const ROOT_SCOPE: &str = "pipette";

/// Separator between path segments.
pub const SCOPE_SEPARATOR: char = '.';

/// A dotted logging path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogScope {
    path: Arc<str>,
}

impl Default for LogScope {
    fn default() -> Self {
        Self::root()
    }
}

impl LogScope {
    /// The process-wide default scope.
    #[must_use]
    pub fn root() -> Self {
        Self::named(ROOT_SCOPE)
    }

    /// A top-level scope with a custom name.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            path: Arc::from(name),
        }
    }

    /// A scope nested under this one.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        Self {
            path: Arc::from(format!("{}{}{}", self.path, SCOPE_SEPARATOR, name)),
        }
    }

    /// The enclosing scope, if any.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.path
            .rsplit_once(SCOPE_SEPARATOR)
            .map(|(parent, _)| Self::named(parent))
    }

    /// Full dotted path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment.
    #[must_use]
    pub fn leaf(&self) -> &str {
        self.path
            .rsplit_once(SCOPE_SEPARATOR)
            .map(|(_, leaf)| leaf)
            .unwrap_or(&self.path)
    }
}

impl fmt::Display for LogScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}
