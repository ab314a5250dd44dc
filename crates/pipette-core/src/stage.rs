//! # Stage Module
//!
//! The base stage contract and the leaf stage variants.
//!
//! A stage is a named unit of work with a declared contract:
//! - `requires`: keys that must be on the clipboard before it runs
//! - `provides`: keys it guarantees in its returned delta
//!
//! `run` takes the clipboard by reference and returns an optional delta.
//! The caller checks the delta against `provides` and merges it. Stages hold
//! no per-run state, so a stage tree can be run any number of times.
//!
//! ## Contract checks
//!
//! [`Stage::check_require`] and [`Stage::check_provide`] never fail: they log
//! and return a boolean. Composites escalate a `false` into a
//! [`PipelineError`] through [`StageInfo::ensure`].

use crate::{CheckKind, Clipboard, KeySet, LogScope, PipelineError};
use std::fmt;

// =============================================================================
// STAGE INFO (identity + contract)
// =============================================================================

/// Identity, contract and configuration of a stage.
///
/// Built with chained `with_*` calls and handed to a stage constructor:
///
/// ```
/// use pipette_core::StageInfo;
///
/// let info = StageInfo::new("detect")
///     .with_requires("exposure")
///     .with_provides(["sources", "background"]);
/// assert_eq!(info.describe(), "detect: (exposure) --> (sources,background)");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StageInfo {
    name: String,
    requires: KeySet,
    provides: KeySet,
    scope: LogScope,
    config: toml::Table,
}

impl StageInfo {
    /// New stage identity logging under the default scope.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let scope = LogScope::root().child(&name);
        Self {
            name,
            requires: KeySet::new(),
            provides: KeySet::new(),
            scope,
            config: toml::Table::new(),
        }
    }

    /// Declare required keys (added to any already declared).
    #[must_use]
    pub fn with_requires(mut self, keys: impl Into<KeySet>) -> Self {
        self.requires.union_with(&keys.into());
        self
    }

    /// Declare provided keys (added to any already declared).
    #[must_use]
    pub fn with_provides(mut self, keys: impl Into<KeySet>) -> Self {
        self.provides.union_with(&keys.into());
        self
    }

    /// Attach stage configuration.
    #[must_use]
    pub fn with_config(mut self, config: toml::Table) -> Self {
        self.config = config;
        self
    }

    /// Log under `parent` instead of the default scope.
    #[must_use]
    pub fn with_scope(mut self, parent: &LogScope) -> Self {
        self.attach(parent);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn requires(&self) -> &KeySet {
        &self.requires
    }

    #[must_use]
    pub fn provides(&self) -> &KeySet {
        &self.provides
    }

    #[must_use]
    pub fn scope(&self) -> &LogScope {
        &self.scope
    }

    #[must_use]
    pub fn config(&self) -> &toml::Table {
        &self.config
    }

    /// Rebind the log scope as a child of `parent`.
    pub fn attach(&mut self, parent: &LogScope) {
        self.scope = parent.child(&self.name);
    }

    /// `"<name>: (<requires>) --> (<provides>)"`.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{}: ({}) --> ({})", self.name, self.requires, self.provides)
    }

    pub(crate) fn clear_contract(&mut self) {
        self.requires = KeySet::new();
        self.provides = KeySet::new();
    }

    pub(crate) fn set_contract(&mut self, requires: KeySet, provides: KeySet) {
        self.requires = requires;
        self.provides = provides;
    }

    fn keys(&self, kind: CheckKind) -> &KeySet {
        match kind {
            CheckKind::Requirements => &self.requires,
            CheckKind::Provisions => &self.provides,
        }
    }

    /// First key of the `kind` set absent from the clipboard, logging the
    /// outcome.
    pub fn missing(&self, kind: CheckKind, clipboard: &Clipboard) -> Option<&str> {
        let keys = self.keys(kind);
        if keys.is_empty() {
            tracing::debug!(
                scope = %self.scope,
                stage = %self.name,
                kind = kind.as_str(),
                "Stage {} has no {}",
                self.name,
                kind
            );
            return None;
        }

        for key in keys.iter() {
            if !clipboard.contains_key(key) {
                tracing::warn!(
                    scope = %self.scope,
                    stage = %self.name,
                    kind = kind.as_str(),
                    key,
                    "Stage {} {} not satisfied: {}",
                    self.name,
                    kind,
                    key
                );
                return Some(key);
            }
        }

        tracing::debug!(
            scope = %self.scope,
            stage = %self.name,
            kind = kind.as_str(),
            "Stage {} satisfies {}",
            self.name,
            kind
        );
        None
    }

    /// Check that every required key is present.
    pub fn check_require(&self, clipboard: &Clipboard) -> bool {
        self.missing(CheckKind::Requirements, clipboard).is_none()
    }

    /// Check that every provided key is present.
    pub fn check_provide(&self, clipboard: &Clipboard) -> bool {
        self.missing(CheckKind::Provisions, clipboard).is_none()
    }

    /// Escalate a failed check into an error.
    ///
    /// `within` names the enclosing composite, if the check is made on its
    /// behalf.
    pub fn ensure(
        &self,
        kind: CheckKind,
        clipboard: &Clipboard,
        within: Option<&str>,
    ) -> Result<(), PipelineError> {
        let Some(key) = self.missing(kind, clipboard) else {
            return Ok(());
        };
        let stage = self.name.clone();
        let key = key.to_string();
        let within = within.map(str::to_string);
        Err(match kind {
            CheckKind::Requirements => PipelineError::UnsatisfiedRequirement { stage, key, within },
            CheckKind::Provisions => PipelineError::UnsatisfiedProvision { stage, key, within },
        })
    }

    /// [`StageInfo::ensure`] for requirements.
    pub fn ensure_requirements(
        &self,
        clipboard: &Clipboard,
        within: Option<&str>,
    ) -> Result<(), PipelineError> {
        self.ensure(CheckKind::Requirements, clipboard, within)
    }

    /// [`StageInfo::ensure`] for provisions.
    pub fn ensure_provisions(
        &self,
        clipboard: &Clipboard,
        within: Option<&str>,
    ) -> Result<(), PipelineError> {
        self.ensure(CheckKind::Provisions, clipboard, within)
    }
}

// =============================================================================
// STAGE TRAIT
// =============================================================================

/// A unit of work over a shared clipboard.
///
/// Implementors supply [`Stage::info`], [`Stage::attach`] and usually
/// [`Stage::run`]. The default `run` reports [`PipelineError::NotImplemented`].
pub trait Stage: Send + Sync {
    /// Identity and contract.
    fn info(&self) -> &StageInfo;

    /// Rebind logging under a container's scope.
    fn attach(&mut self, parent: &LogScope);

    /// Run the stage, returning a delta to merge (or `None` for no change).
    fn run(&self, clipboard: &Clipboard) -> Result<Option<Clipboard>, PipelineError> {
        let _ = clipboard;
        Err(PipelineError::NotImplemented {
            stage: self.name().to_string(),
        })
    }

    /// Human-readable contract.
    fn describe(&self) -> String {
        self.info().describe()
    }

    fn name(&self) -> &str {
        self.info().name()
    }

    fn requires(&self) -> &KeySet {
        self.info().requires()
    }

    fn provides(&self) -> &KeySet {
        self.info().provides()
    }

    fn check_require(&self, clipboard: &Clipboard) -> bool {
        self.info().check_require(clipboard)
    }

    fn check_provide(&self, clipboard: &Clipboard) -> bool {
        self.info().check_provide(clipboard)
    }
}

impl<S: Stage + ?Sized> Stage for Box<S> {
    fn info(&self) -> &StageInfo {
        (**self).info()
    }

    fn attach(&mut self, parent: &LogScope) {
        (**self).attach(parent);
    }

    fn run(&self, clipboard: &Clipboard) -> Result<Option<Clipboard>, PipelineError> {
        (**self).run(clipboard)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn requires(&self) -> &KeySet {
        (**self).requires()
    }

    fn provides(&self) -> &KeySet {
        (**self).provides()
    }

    fn check_require(&self, clipboard: &Clipboard) -> bool {
        (**self).check_require(clipboard)
    }

    fn check_provide(&self, clipboard: &Clipboard) -> bool {
        (**self).check_provide(clipboard)
    }
}

/// Run a top-level stage and merge its delta into `clipboard`.
///
/// Requirements are checked before the run and provisions against the
/// returned delta, as a composite does for each of its children.
pub fn run_pipeline(stage: &dyn Stage, mut clipboard: Clipboard) -> Result<Clipboard, PipelineError> {
    stage.info().ensure_requirements(&clipboard, None)?;

    let span = tracing::info_span!("pipeline", scope = %stage.info().scope());
    let _enter = span.enter();

    if let Some(delta) = stage.run(&clipboard)? {
        stage.info().ensure_provisions(&delta, None)?;
        clipboard.merge(delta);
    }
    Ok(clipboard)
}

// =============================================================================
// BASE STAGE
// =============================================================================

/// A stage with a contract but no body.
///
/// Useful to declare the shape of a pipeline before its bodies exist.
/// Running it fails with [`PipelineError::NotImplemented`].
#[derive(Debug, Clone)]
pub struct BaseStage {
    info: StageInfo,
}

impl BaseStage {
    #[must_use]
    pub fn new(info: StageInfo) -> Self {
        Self { info }
    }
}

impl Stage for BaseStage {
    fn info(&self) -> &StageInfo {
        &self.info
    }

    fn attach(&mut self, parent: &LogScope) {
        self.info.attach(parent);
    }
}

// =============================================================================
// FN STAGE
// =============================================================================

/// Body of a [`FnStage`].
pub type StageFn =
    dyn Fn(&Clipboard, &StageInfo) -> Result<Option<Clipboard>, PipelineError> + Send + Sync;

/// A leaf stage whose body is a closure.
///
/// The closure receives the clipboard and the stage's own info (for its name,
/// scope and configuration) and returns a delta.
pub struct FnStage {
    info: StageInfo,
    body: Box<StageFn>,
}

impl FnStage {
    pub fn new<F>(info: StageInfo, body: F) -> Self
    where
        F: Fn(&Clipboard, &StageInfo) -> Result<Option<Clipboard>, PipelineError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            info,
            body: Box::new(body),
        }
    }
}

impl fmt::Debug for FnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStage").field("info", &self.info).finish()
    }
}

impl Stage for FnStage {
    fn info(&self) -> &StageInfo {
        &self.info
    }

    fn attach(&mut self, parent: &LogScope) {
        self.info.attach(parent);
    }

    fn run(&self, clipboard: &Clipboard) -> Result<Option<Clipboard>, PipelineError> {
        tracing::debug!(scope = %self.info.scope(), stage = %self.info.name(), "running");
        (self.body)(clipboard, &self.info)
    }
}

// =============================================================================
// IGNORED STAGE
// =============================================================================

/// A stage disabled by configuration.
///
/// It keeps its place in the pipeline tree but has an empty contract and
/// does nothing when run.
#[derive(Debug, Clone)]
pub struct IgnoredStage {
    info: StageInfo,
}

impl IgnoredStage {
    /// Any requires/provides on `info` are discarded.
    #[must_use]
    pub fn new(mut info: StageInfo) -> Self {
        info.clear_contract();
        Self { info }
    }
}

impl Stage for IgnoredStage {
    fn info(&self) -> &StageInfo {
        &self.info
    }

    fn attach(&mut self, parent: &LogScope) {
        self.info.attach(parent);
    }

    fn run(&self, _clipboard: &Clipboard) -> Result<Option<Clipboard>, PipelineError> {
        tracing::debug!(
            scope = %self.info.scope(),
            stage = %self.info.name(),
            "Stage {} has been ignored.",
            self.info.name()
        );
        Ok(None)
    }

    fn describe(&self) -> String {
        format!("{}: IGNORED", self.info.name())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    #[test]
    fn describe_lists_keys_in_given_order() {
        let info = StageInfo::new("isr")
            .with_requires(["dataId", "calib"])
            .with_provides("exposure");
        assert_eq!(info.describe(), "isr: (dataId,calib) --> (exposure)");
    }

    #[test]
    fn describe_empty_contract() {
        let stage = BaseStage::new(StageInfo::new("noop"));
        assert_eq!(stage.describe(), "noop: () --> ()");
    }

    #[test]
    fn empty_checks_pass_on_empty_clipboard() {
        let stage = BaseStage::new(StageInfo::new("noop"));
        let clip = Clipboard::new();
        assert!(stage.check_require(&clip));
        assert!(stage.check_provide(&clip));
    }

    #[test]
    fn check_require_reports_missing_key() {
        let info = StageInfo::new("phot").with_requires(["exposure", "psf"]);
        let clip = Clipboard::new().with("exposure", 1);

        assert!(!info.check_require(&clip));
        assert_eq!(info.missing(CheckKind::Requirements, &clip), Some("psf"));
    }

    #[test]
    fn ensure_escalates_with_container_name() {
        let info = StageInfo::new("phot").with_provides("sources");
        let err = info
            .ensure(CheckKind::Provisions, &Clipboard::new(), Some("reduce"))
            .expect_err("should fail");
        assert_eq!(
            err,
            PipelineError::UnsatisfiedProvision {
                stage: "phot".to_string(),
                key: "sources".to_string(),
                within: Some("reduce".to_string()),
            }
        );
    }

    #[test]
    fn base_run_is_not_implemented() {
        let stage = BaseStage::new(StageInfo::new("abstract"));
        let result = stage.run(&Clipboard::new());
        assert_eq!(
            result,
            Err(PipelineError::NotImplemented {
                stage: "abstract".to_string()
            })
        );
    }

    #[test]
    fn ignored_stage_drops_contract() {
        let stage = IgnoredStage::new(
            StageInfo::new("fringe")
                .with_requires("exposure")
                .with_provides("defringed"),
        );
        assert!(stage.requires().is_empty());
        assert!(stage.provides().is_empty());
        assert_eq!(stage.describe(), "fringe: IGNORED");
    }

    #[test]
    fn ignored_stage_leaves_clipboard_alone() {
        let stage = IgnoredStage::new(StageInfo::new("fringe"));
        let clip = Clipboard::new().with("exposure", Value::opaque(7_u8));
        assert_eq!(stage.run(&clip), Ok(None));
        assert_eq!(stage.run(&Clipboard::new()), Ok(None));
    }

    #[test]
    fn fn_stage_sees_its_config() {
        let mut config = toml::Table::new();
        config.insert("threshold".to_string(), toml::Value::Float(5.0));

        let stage = FnStage::new(
            StageInfo::new("detect").with_config(config).with_provides("threshold"),
            |_clip, info| {
                let threshold = info
                    .config()
                    .get("threshold")
                    .and_then(toml::Value::as_float)
                    .unwrap_or_default();
                Ok(Some(Clipboard::new().with("threshold", threshold)))
            },
        );

        let delta = stage.run(&Clipboard::new()).expect("run").expect("delta");
        assert_eq!(delta.get("threshold").and_then(Value::as_float), Some(5.0));
    }

    #[test]
    fn attach_rebinds_scope() {
        let mut stage = BaseStage::new(StageInfo::new("phot"));
        assert_eq!(stage.info().scope().path(), "pipette.phot");

        stage.attach(&LogScope::root().child("reduce"));
        assert_eq!(stage.info().scope().path(), "pipette.reduce.phot");
    }

    #[test]
    fn with_scope_nests_under_parent() {
        let info = StageInfo::new("phot").with_scope(&LogScope::named("hsc").child("reduce"));
        assert_eq!(info.scope().path(), "hsc.reduce.phot");
        assert_eq!(info.scope().leaf(), "phot");
    }

    /// Collects formatted log output for assertions.
    #[derive(Clone, Default)]
    struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("log buffer").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn lines(&self) -> Vec<String> {
            let bytes = self.0.lock().expect("log buffer").clone();
            String::from_utf8_lossy(&bytes)
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    fn capture_logs(body: impl FnOnce()) -> Vec<String> {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .without_time()
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, body);
        buffer.lines()
    }

    #[test]
    fn checks_log_outcome_with_fields() {
        let lines = capture_logs(|| {
            let empty = Clipboard::new();
            assert!(StageInfo::new("noop").check_require(&empty));

            let phot = StageInfo::new("phot").with_requires(["exposure", "psf"]);
            assert!(!phot.check_require(&Clipboard::new().with("exposure", 1)));

            let fringe = IgnoredStage::new(StageInfo::new("fringe"));
            assert_eq!(fringe.run(&empty), Ok(None));
        });

        assert!(lines.iter().any(|l| l.contains("DEBUG")
            && l.contains("Stage noop has no requirements")
            && l.contains("kind=\"requirements\"")));
        assert!(lines.iter().any(|l| l.contains("WARN")
            && l.contains("Stage phot requirements not satisfied: psf")
            && l.contains("stage=phot")
            && l.contains("kind=\"requirements\"")
            && l.contains("key=\"psf\"")));
        assert!(lines.iter().any(|l| l.contains("DEBUG")
            && l.contains("Stage fringe has been ignored.")
            && l.contains("scope=pipette.fringe")));
    }

    #[test]
    fn run_pipeline_merges_delta() {
        let stage = FnStage::new(
            StageInfo::new("calibrate")
                .with_requires("dataId")
                .with_provides("zeropoint"),
            |_clip, _info| Ok(Some(Clipboard::new().with("zeropoint", 27.0))),
        );
        let out = run_pipeline(&stage, Clipboard::new().with("dataId", 1)).expect("run");
        assert_eq!(out.len(), 2);
        assert!(out.contains_key("zeropoint"));
    }

    #[test]
    fn run_pipeline_rejects_short_delta() {
        let stage = FnStage::new(
            StageInfo::new("calibrate").with_provides("zeropoint"),
            |_clip, _info| Ok(Some(Clipboard::new())),
        );
        let result = run_pipeline(&stage, Clipboard::new());
        assert!(matches!(
            result,
            Err(PipelineError::UnsatisfiedProvision { ref key, .. }) if key == "zeropoint"
        ));
    }
}
