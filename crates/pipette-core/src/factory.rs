//! # Stage Factory
//!
//! Builds stage trees from configuration.
//!
//! A [`StageSpec`] is one node of a pipeline description, normally read from
//! TOML:
//!
//! ```toml
//! name = "reduce"
//! kind = "multi"
//!
//! [[stages]]
//! name = "isr"
//! kind = "isr"
//! requires = "dataId"
//! provides = "exposure"
//!
//! [[stages]]
//! name = "fringe"
//! kind = "fringe"
//! enabled = false
//! ```
//!
//! A [`StageRegistry`] turns specs into stages. It knows the composite kinds
//! itself (`multi`, `ignored`); leaf kinds are registered by the driver,
//! since their bodies live outside the engine.
//!
//! ## Rules
//!
//! | Spec | Result |
//! |------|--------|
//! | `enabled = false` | `IgnoredStage` with the spec's name |
//! | `kind = "multi"` | `MultiStage` over `stages` |
//! | `kind = "multi"` + `iterate` | `IterateMultiStage` |
//! | registered leaf kind | the registered constructor's stage |
//! | leaf kind + `iterate` | `IterateStage` wrapping it |
//! | unknown kind | `PipelineError::MalformedStage` |

use crate::{
    IgnoredStage, IterateMultiStage, IterateStage, KeySet, MultiStage, PipelineError, Stage,
    StageInfo,
};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Built-in kind for sequential composites.
pub const KIND_MULTI: &str = "multi";

/// Built-in kind for placeholder stages.
pub const KIND_IGNORED: &str = "ignored";

// =============================================================================
// STAGE SPEC
// =============================================================================

/// Configuration record describing one stage (and its children).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageSpec {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub requires: KeySet,
    #[serde(default)]
    pub provides: KeySet,
    /// Sequences to iterate over; empty means no iteration.
    #[serde(default)]
    pub iterate: KeySet,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub stages: Vec<StageSpec>,
    #[serde(default)]
    pub config: toml::Table,
}

fn enabled_by_default() -> bool {
    true
}

impl StageSpec {
    /// A minimal enabled spec.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            requires: KeySet::new(),
            provides: KeySet::new(),
            iterate: KeySet::new(),
            enabled: true,
            stages: Vec::new(),
            config: toml::Table::new(),
        }
    }

    /// Parse a spec from a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Stage identity described by this spec.
    #[must_use]
    pub fn info(&self) -> StageInfo {
        StageInfo::new(self.name.clone())
            .with_requires(self.requires.clone())
            .with_provides(self.provides.clone())
            .with_config(self.config.clone())
    }

    fn malformed(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::MalformedStage {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// FACTORY TRAIT
// =============================================================================

/// Something that turns specs into stages.
pub trait StageFactory {
    /// Build one stage.
    fn create(&self, spec: &StageSpec) -> Result<Box<dyn Stage>, PipelineError>;

    /// Build stages in order, failing on the first malformed spec.
    fn create_all(&self, specs: &[StageSpec]) -> Result<Vec<Box<dyn Stage>>, PipelineError> {
        specs.iter().map(|spec| self.create(spec)).collect()
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Constructor for a registered leaf kind.
pub type StageConstructor =
    dyn Fn(&StageSpec) -> Result<Box<dyn Stage>, PipelineError> + Send + Sync;

/// Kind-name to constructor table.
#[derive(Default)]
pub struct StageRegistry {
    constructors: BTreeMap<String, Box<StageConstructor>>,
}

impl StageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a leaf kind, replacing any earlier constructor for it.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&StageSpec) -> Result<Box<dyn Stage>, PipelineError> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Box::new(constructor));
        self
    }

    /// Check whether a kind can be built.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        kind == KIND_MULTI || kind == KIND_IGNORED || self.constructors.contains_key(kind)
    }

    /// Registered leaf kinds, sorted.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    fn create_leaf(&self, spec: &StageSpec) -> Result<Box<dyn Stage>, PipelineError> {
        let constructor = self
            .constructors
            .get(&spec.kind)
            .ok_or_else(|| spec.malformed(format!("unknown stage kind '{}'", spec.kind)))?;
        if !spec.stages.is_empty() {
            return Err(spec.malformed(format!(
                "stage kind '{}' does not take child stages",
                spec.kind
            )));
        }
        constructor(spec)
    }
}

impl StageFactory for StageRegistry {
    fn create(&self, spec: &StageSpec) -> Result<Box<dyn Stage>, PipelineError> {
        if !spec.enabled || spec.kind == KIND_IGNORED {
            tracing::debug!(stage = %spec.name, "building ignored stage");
            return Ok(Box::new(IgnoredStage::new(spec.info())));
        }

        if spec.kind == KIND_MULTI {
            let multi = MultiStage::from_specs(spec.info(), &spec.stages, self)?;
            if spec.iterate.is_empty() {
                return Ok(Box::new(multi));
            }
            return Ok(Box::new(IterateMultiStage::new(spec.iterate.clone(), multi)));
        }

        let leaf = self.create_leaf(spec)?;
        if spec.iterate.is_empty() {
            Ok(leaf)
        } else {
            Ok(Box::new(IterateStage::new(spec.iterate.clone(), leaf)))
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
