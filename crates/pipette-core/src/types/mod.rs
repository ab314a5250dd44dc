//! # Core Type Definitions
//!
//! This module contains the contract types shared by every stage:
//! - Key sets (`KeySet`) used for requires/provides and iteration descriptors
//! - Check kinds (`CheckKind`) used in log records and errors
//! - Error types (`PipelineError`)
//!
//! ## Ordering Guarantees
//!
//! Key sets keep insertion order (first occurrence wins), so descriptions and
//! error messages list keys exactly as they were declared.

use indexmap::IndexSet;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

// =============================================================================
// KEY SET
// =============================================================================

/// An insertion-ordered, de-duplicated set of clipboard keys.
///
/// Normalization rules:
/// - a single key becomes a one-element set
/// - `None` becomes the empty set
/// - repeated keys keep their first position
///
/// Equality is order-sensitive: `(a,b)` and `(b,a)` are different contracts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "KeyList")]
pub struct KeySet(IndexSet<String>);

impl PartialEq for KeySet {
    fn eq(&self, other: &Self) -> bool {
        self.0.iter().eq(other.0.iter())
    }
}

impl Eq for KeySet {}

/// Wire shape accepted in configuration: `"key"` or `["a", "b"]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum KeyList {
    One(String),
    Many(Vec<String>),
}

impl From<KeyList> for KeySet {
    fn from(list: KeyList) -> Self {
        match list {
            KeyList::One(key) => Self::from(key),
            KeyList::Many(keys) => keys.into_iter().collect(),
        }
    }
}

impl KeySet {
    /// Create an empty key set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key. Returns `false` if it was already present.
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        self.0.insert(key.into())
    }

    /// Check whether a key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the set has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over keys in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Append every key of `other` not already present.
    pub fn union_with(&mut self, other: &KeySet) {
        for key in other.iter() {
            self.insert(key);
        }
    }

    /// Render the keys joined by `sep`.
    #[must_use]
    pub fn join(&self, sep: &str) -> String {
        self.iter().collect::<Vec<_>>().join(sep)
    }

    /// Owned copy of the keys, in order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl fmt::Display for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join(","))
    }
}

impl<S: Into<String>> FromIterator<S> for KeySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for key in iter {
            set.insert(key);
        }
        set
    }
}

impl From<&str> for KeySet {
    fn from(key: &str) -> Self {
        std::iter::once(key).collect()
    }
}

impl From<String> for KeySet {
    fn from(key: String) -> Self {
        std::iter::once(key).collect()
    }
}

impl From<Vec<&str>> for KeySet {
    fn from(keys: Vec<&str>) -> Self {
        keys.into_iter().collect()
    }
}

impl From<Vec<String>> for KeySet {
    fn from(keys: Vec<String>) -> Self {
        keys.into_iter().collect()
    }
}

impl From<&[&str]> for KeySet {
    fn from(keys: &[&str]) -> Self {
        keys.iter().copied().collect()
    }
}

impl<const N: usize> From<[&str; N]> for KeySet {
    fn from(keys: [&str; N]) -> Self {
        keys.into_iter().collect()
    }
}

impl<T: Into<KeySet>> From<Option<T>> for KeySet {
    fn from(keys: Option<T>) -> Self {
        keys.map(Into::into).unwrap_or_default()
    }
}

impl<'a> IntoIterator for &'a KeySet {
    type Item = &'a String;
    type IntoIter = indexmap::set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// =============================================================================
// CHECK KIND
// =============================================================================

/// Which side of a stage contract is being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckKind {
    /// Keys a stage needs before it runs.
    Requirements,
    /// Keys a stage guarantees after it runs.
    Provisions,
}

impl CheckKind {
    /// Name used in log records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Requirements => "requirements",
            CheckKind::Provisions => "provisions",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised while building or running a pipeline.
///
/// Every contract violation is fatal: there is no retry or local recovery in
/// the engine. Errors propagate through every enclosing composite up to the
/// driver, which decides whether to continue with the next unit of work.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The clipboard lacks a key the stage requires.
    #[error("Stage {stage} requirements not met{}: missing '{key}'", within_suffix(.within))]
    UnsatisfiedRequirement {
        stage: String,
        key: String,
        within: Option<String>,
    },

    /// The stage's output lacks a key it declared it provides.
    #[error("Stage {stage} provisions not met{}: missing '{key}'", within_suffix(.within))]
    UnsatisfiedProvision {
        stage: String,
        key: String,
        within: Option<String>,
    },

    /// Iterated sequences have different lengths.
    #[error(
        "Stage {stage}: iteration sequences have different length: {keys:?} (expected {expected}, found {found})"
    )]
    IterationLengthMismatch {
        stage: String,
        keys: Vec<String>,
        expected: usize,
        found: usize,
    },

    /// An iterated key does not hold an ordered sequence.
    #[error("Stage {stage}: component '{key}' is not iterable")]
    NotIterable { stage: String, key: String },

    /// An iterated key is absent from the clipboard.
    #[error("Stage {stage}: iteration component '{key}' is not on the clipboard")]
    MissingIterationKey { stage: String, key: String },

    /// A stage without a body was run.
    #[error("Stage {stage}: run is not implemented")]
    NotImplemented { stage: String },

    /// A stage could not be constructed from its specification.
    #[error("Malformed stage {name}: {reason}")]
    MalformedStage { name: String, reason: String },

    /// A stage body reported a failure.
    #[error("Stage {stage} failed: {reason}")]
    StageFailed { stage: String, reason: String },

    /// Configuration could not be parsed or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

fn within_suffix(within: &Option<String>) -> String {
    within
        .as_ref()
        .map(|parent| format!(" within {parent}"))
        .unwrap_or_default()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_key_is_promoted() {
        let set = KeySet::from("exposure");
        assert_eq!(set.to_vec(), vec!["exposure".to_string()]);
    }

    #[test]
    fn none_is_empty() {
        let set = KeySet::from(None::<&str>);
        assert!(set.is_empty());
    }

    #[test]
    fn insertion_order_is_kept_and_duplicates_dropped() {
        let set = KeySet::from(["b", "a", "b", "c"]);
        assert_eq!(set.join(","), "b,a,c");
    }

    #[test]
    fn equality_respects_order() {
        assert_eq!(KeySet::from(["a", "b"]), KeySet::from(["a", "b", "a"]));
        assert_ne!(KeySet::from(["a", "b"]), KeySet::from(["b", "a"]));
    }

    #[test]
    fn union_appends_new_keys_only() {
        let mut set = KeySet::from(["a", "b"]);
        set.union_with(&KeySet::from(["b", "c"]));
        assert_eq!(set.to_string(), "a,b,c");
    }

    #[test]
    fn deserializes_from_string_or_list() {
        #[derive(Deserialize)]
        struct Holder {
            one: KeySet,
            many: KeySet,
        }

        let holder: Holder =
            toml::from_str("one = \"dataId\"\nmany = [\"x\", \"y\"]").expect("parse");
        assert_eq!(holder.one.to_vec(), vec!["dataId".to_string()]);
        assert_eq!(holder.many.join(","), "x,y");
    }

    #[test]
    fn error_messages_name_the_container() {
        let err = PipelineError::UnsatisfiedRequirement {
            stage: "phot".to_string(),
            key: "psf".to_string(),
            within: Some("reduce".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Stage phot requirements not met within reduce: missing 'psf'"
        );

        let err = PipelineError::UnsatisfiedProvision {
            stage: "phot".to_string(),
            key: "sources".to_string(),
            within: None,
        };
        assert_eq!(
            err.to_string(),
            "Stage phot provisions not met: missing 'sources'"
        );
    }
}
