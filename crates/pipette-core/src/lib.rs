//! # pipette-core
//!
//! The staged-pipeline engine for Pipette - THE ENGINE.
//!
//! Ordered units of work ("stages") run against a shared key-value working
//! set ("clipboard"). Each stage declares the keys it requires and the keys
//! it provides; the engine checks both around every run.
//!
//! ## Building Blocks
//!
//! - `stage` → the [`Stage`] trait, [`StageInfo`], leaf stages
//! - `multi` → [`MultiStage`], a sequential composite with a derived contract
//! - `iterate` → [`IterateStage`], per-element iteration over parallel sequences
//! - `factory` → [`StageRegistry`], stage trees built from TOML
//!
//! ## Architectural Constraints
//!
//! - Synchronous: every run is a strictly nested call, no threads, no async
//! - Stateless stages: `run` takes `&self`, so a tree can be run repeatedly
//! - Fatal contracts: a violated requirement or provision aborts the run
//! - Opaque data: scientific values are carried, never inspected

// =============================================================================
// MODULES
// =============================================================================

pub mod clipboard;
pub mod factory;
pub mod iterate;
pub mod multi;
pub mod scope;
pub mod stage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use clipboard::{Clipboard, Opaque, Value};
pub use scope::{LogScope, ROOT_SCOPE};
pub use types::{CheckKind, KeySet, PipelineError};

// =============================================================================
// RE-EXPORTS: Stages
// =============================================================================

pub use iterate::{IterateMultiStage, IterateStage};
pub use multi::{MultiStage, aggregate_contract};
pub use stage::{BaseStage, FnStage, IgnoredStage, Stage, StageFn, StageInfo, run_pipeline};

// =============================================================================
// RE-EXPORTS: Factory
// =============================================================================

pub use factory::{
    KIND_IGNORED, KIND_MULTI, StageConstructor, StageFactory, StageRegistry, StageSpec,
};
