//! # Multi-Stage Composite
//!
//! A stage built from an ordered list of child stages, run in turn against
//! one working clipboard.
//!
//! ## Contract aggregation
//!
//! The composite's requirements are the children's requirements that no
//! earlier child provides, followed by the composite's own explicit ones.
//! Its provisions are the union of the children's provisions and its own.
//! A key produced inside the composite and consumed later inside it never
//! surfaces as a composite requirement.
//!
//! ## Two-tier checking
//!
//! `run` checks the composite's requirements once against the incoming
//! clipboard, then re-checks each child's requirements against the working
//! clipboard before running it. The first tier catches misconfiguration; the
//! second catches children assembled in the wrong order.

use crate::factory::{StageFactory, StageSpec};
use crate::{Clipboard, KeySet, LogScope, PipelineError, Stage, StageInfo};
use std::fmt;

/// Derive `(requires, provides)` for a sequence of stages.
pub fn aggregate_contract<'a, S, I>(stages: I) -> (KeySet, KeySet)
where
    S: Stage + ?Sized + 'a,
    I: IntoIterator<Item = &'a S>,
{
    let mut requires = KeySet::new();
    let mut provides = KeySet::new();
    for stage in stages {
        for key in stage.requires().iter() {
            if !(requires.contains(key) || provides.contains(key)) {
                requires.insert(key);
            }
        }
        provides.union_with(stage.provides());
    }
    (requires, provides)
}

/// Sequential composite stage.
pub struct MultiStage {
    info: StageInfo,
    stages: Vec<Box<dyn Stage>>,
}

impl MultiStage {
    /// Build a composite. Requires/provides already on `info` are kept as
    /// explicit additions to the derived contract.
    #[must_use]
    pub fn new(mut info: StageInfo, mut stages: Vec<Box<dyn Stage>>) -> Self {
        let (mut requires, mut provides) = aggregate_contract(stages.iter());
        requires.union_with(info.requires());
        provides.union_with(info.provides());
        info.set_contract(requires, provides);

        for stage in &mut stages {
            stage.attach(info.scope());
        }

        Self { info, stages }
    }

    /// Build a composite whose children are produced by `factory`.
    pub fn from_specs(
        info: StageInfo,
        specs: &[StageSpec],
        factory: &dyn StageFactory,
    ) -> Result<Self, PipelineError> {
        let stages = factory.create_all(specs)?;
        Ok(Self::new(info, stages))
    }

    /// Children in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Box<dyn Stage>] {
        &self.stages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for MultiStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiStage")
            .field("info", &self.info)
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Stage for MultiStage {
    fn info(&self) -> &StageInfo {
        &self.info
    }

    fn attach(&mut self, parent: &LogScope) {
        self.info.attach(parent);
        let scope = self.info.scope().clone();
        for stage in &mut self.stages {
            stage.attach(&scope);
        }
    }

    fn run(&self, clipboard: &Clipboard) -> Result<Option<Clipboard>, PipelineError> {
        let name = self.info.name();
        self.info.ensure_requirements(clipboard, None)?;

        let mut working = clipboard.clone();
        for stage in &self.stages {
            stage.info().ensure_requirements(&working, Some(name))?;

            let span = tracing::debug_span!("stage", scope = %stage.info().scope());
            let _enter = span.enter();

            if let Some(delta) = stage.run(&working)? {
                stage.info().ensure_provisions(&delta, Some(name))?;
                working.merge(delta);
            }
        }
        Ok(Some(working))
    }

    fn describe(&self) -> String {
        let children: Vec<String> = self.stages.iter().map(|s| s.describe()).collect();
        format!(
            "{} [{}]: ({}) --> ({})",
            self.info.name(),
            children.join(", "),
            self.info.requires(),
            self.info.provides()
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
