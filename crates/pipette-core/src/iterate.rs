//! # Per-Element Iteration
//!
//! [`IterateStage`] wraps a run-body stage and invokes it once per index of
//! one or more parallel sequences taken from the clipboard.
//!
//! For each index the body sees a view of the clipboard in which every
//! iterated key is rebound to its element at that index. After the body
//! returns, the (possibly replaced) element is written back into the
//! sequence at that index. Anything else the body produces stays in the view
//! and is dropped with it.
//!
//! With a [`MultiStage`] body ([`IterateMultiStage`]) the outer loop is the
//! index and the inner loop is the child stage, so later children see the
//! per-element outputs of earlier children for the same index.

use crate::{Clipboard, KeySet, LogScope, MultiStage, PipelineError, Stage, StageInfo, Value};
use std::fmt;

/// A stage that runs its body once per element of the iterated sequences.
///
/// The wrapper takes its name and contract from the body.
pub struct IterateStage<B: Stage> {
    iterate: KeySet,
    body: B,
}

/// Per-element iteration over a sequence of child stages.
pub type IterateMultiStage = IterateStage<MultiStage>;

impl<B: Stage> IterateStage<B> {
    /// Iterate `body` over the sequences named by `iterate`.
    pub fn new(iterate: impl Into<KeySet>, body: B) -> Self {
        Self {
            iterate: iterate.into(),
            body,
        }
    }

    /// Keys of the iterated sequences.
    #[must_use]
    pub fn iterate(&self) -> &KeySet {
        &self.iterate
    }

    /// The stage run for each element.
    #[must_use]
    pub fn body(&self) -> &B {
        &self.body
    }

    /// Common length of the iterated sequences.
    fn sequence_length(&self, clipboard: &Clipboard) -> Result<usize, PipelineError> {
        let stage = self.body.name();
        let mut length = None;

        for key in self.iterate.iter() {
            let value = clipboard
                .get(key)
                .ok_or_else(|| PipelineError::MissingIterationKey {
                    stage: stage.to_string(),
                    key: key.to_string(),
                })?;
            let items = value.as_seq().ok_or_else(|| PipelineError::NotIterable {
                stage: stage.to_string(),
                key: key.to_string(),
            })?;

            match length {
                None => length = Some(items.len()),
                Some(expected) if expected != items.len() => {
                    return Err(PipelineError::IterationLengthMismatch {
                        stage: stage.to_string(),
                        keys: self.iterate.to_vec(),
                        expected,
                        found: items.len(),
                    });
                }
                Some(_) => {}
            }
        }

        length.ok_or_else(|| PipelineError::MalformedStage {
            name: stage.to_string(),
            reason: "no iteration keys".to_string(),
        })
    }

    fn element(&self, outer: &Clipboard, key: &str, index: usize) -> Result<Value, PipelineError> {
        outer
            .get(key)
            .and_then(Value::as_seq)
            .and_then(|items| items.get(index))
            .cloned()
            .ok_or_else(|| PipelineError::MissingIterationKey {
                stage: self.body.name().to_string(),
                key: key.to_string(),
            })
    }

    fn store(
        &self,
        outer: &mut Clipboard,
        key: &str,
        index: usize,
        value: Value,
    ) -> Result<(), PipelineError> {
        let slot = outer
            .get_mut(key)
            .and_then(Value::as_seq_mut)
            .and_then(|items| items.get_mut(index))
            .ok_or_else(|| PipelineError::MissingIterationKey {
                stage: self.body.name().to_string(),
                key: key.to_string(),
            })?;
        *slot = value;
        Ok(())
    }
}

impl IterateMultiStage {
    /// Iterate a sequence of child stages: for each index, every child runs
    /// in order before the next index starts.
    pub fn multi(
        info: StageInfo,
        iterate: impl Into<KeySet>,
        stages: Vec<Box<dyn Stage>>,
    ) -> Self {
        Self::new(iterate, MultiStage::new(info, stages))
    }
}

impl<B: Stage + fmt::Debug> fmt::Debug for IterateStage<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterateStage")
            .field("iterate", &self.iterate)
            .field("body", &self.body)
            .finish()
    }
}

impl<B: Stage> Stage for IterateStage<B> {
    fn info(&self) -> &StageInfo {
        self.body.info()
    }

    fn attach(&mut self, parent: &LogScope) {
        self.body.attach(parent);
    }

    fn run(&self, clipboard: &Clipboard) -> Result<Option<Clipboard>, PipelineError> {
        let info = self.body.info();
        info.ensure_requirements(clipboard, None)?;

        let length = self.sequence_length(clipboard)?;
        tracing::debug!(
            scope = %info.scope(),
            stage = %info.name(),
            length,
            "Stage {} iterating over {}",
            info.name(),
            self.iterate
        );

        let mut outer = clipboard.clone();
        for index in 0..length {
            let mut view = outer.clone();
            for key in self.iterate.iter() {
                view.insert(key, self.element(&outer, key, index)?);
            }

            tracing::trace!(scope = %info.scope(), index, "element");
            if let Some(delta) = self.body.run(&view)? {
                view.merge(delta);
            }

            for key in self.iterate.iter() {
                let value = view
                    .remove(key)
                    .ok_or_else(|| PipelineError::MissingIterationKey {
                        stage: info.name().to_string(),
                        key: key.to_string(),
                    })?;
                self.store(&mut outer, key, index, value)?;
            }
        }

        info.ensure_provisions(&outer, None)?;
        Ok(Some(outer))
    }

    fn describe(&self) -> String {
        self.body.describe()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FnStage;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn record(log: &Log, entry: String) {
        if let Ok(mut entries) = log.lock() {
            entries.push(entry);
        }
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Doubles `a`, appends a suffix to `b`, records what it saw.
    fn doubler(log: &Log) -> FnStage {
        let log = Arc::clone(log);
        FnStage::new(
            StageInfo::new("double").with_requires(["a", "b"]),
            move |clip, _info| {
                let a = clip.get("a").and_then(Value::as_int).unwrap_or_default();
                let b = clip.get("b").and_then(Value::as_str).unwrap_or_default();
                record(&log, format!("{a}/{b}"));
                Ok(Some(
                    Clipboard::new()
                        .with("a", a * 2)
                        .with("b", format!("{b}!")),
                ))
            },
        )
    }

    #[test]
    fn body_runs_once_per_index_with_scalars() {
        let log = Log::default();
        let stage = IterateStage::new(["a", "b"], doubler(&log));
        let clip = Clipboard::new()
            .with("a", Value::seq([1, 2, 3]))
            .with("b", Value::seq(["x", "y", "z"]))
            .with("other", 9);

        let out = stage.run(&clip).expect("run").expect("clipboard");

        assert_eq!(entries(&log), vec!["1/x", "2/y", "3/z"]);
        assert_eq!(out.get("a"), Some(&Value::seq([2, 4, 6])));
        assert_eq!(out.get("b"), Some(&Value::seq(["x!", "y!", "z!"])));
        assert_eq!(out.get("other"), Some(&Value::Int(9)));
        // Input untouched.
        assert_eq!(clip.get("a"), Some(&Value::seq([1, 2, 3])));
    }

    #[test]
    fn length_mismatch_fails_before_body() {
        let log = Log::default();
        let stage = IterateStage::new(["a", "b"], doubler(&log));
        let clip = Clipboard::new()
            .with("a", Value::seq([1, 2, 3]))
            .with("b", Value::seq(["w", "x", "y", "z"]));

        let err = stage.run(&clip).expect_err("should fail");
        assert_eq!(
            err,
            PipelineError::IterationLengthMismatch {
                stage: "double".to_string(),
                keys: vec!["a".to_string(), "b".to_string()],
                expected: 3,
                found: 4,
            }
        );
        assert!(entries(&log).is_empty());
    }

    #[test]
    fn zero_length_runs_nothing() {
        let log = Log::default();
        let stage = IterateStage::new(["a", "b"], doubler(&log));
        let clip = Clipboard::new()
            .with("a", Value::seq(Vec::<Value>::new()))
            .with("b", Value::seq(Vec::<Value>::new()));

        let out = stage.run(&clip).expect("run").expect("clipboard");
        assert!(entries(&log).is_empty());
        assert_eq!(out, clip);
    }

    #[test]
    fn scalar_component_is_not_iterable() {
        let log = Log::default();
        let stage = IterateStage::new("a", doubler(&log));
        let clip = Clipboard::new().with("a", 5).with("b", "x");

        assert_eq!(
            stage.run(&clip).err(),
            Some(PipelineError::NotIterable {
                stage: "double".to_string(),
                key: "a".to_string(),
            })
        );
    }

    #[test]
    fn missing_requirement_is_fatal() {
        let log = Log::default();
        let stage = IterateStage::new("a", doubler(&log));
        let clip = Clipboard::new().with("a", Value::seq([1]));

        assert!(matches!(
            stage.run(&clip),
            Err(PipelineError::UnsatisfiedRequirement { ref key, .. }) if key == "b"
        ));
    }

    #[test]
    fn per_element_outputs_do_not_leak() {
        let stage = IterateStage::new(
            "ccd",
            FnStage::new(
                StageInfo::new("measure")
                    .with_requires("ccd")
                    .with_provides("flux"),
                |_clip, _info| Ok(Some(Clipboard::new().with("flux", 1.5))),
            ),
        );
        let clip = Clipboard::new().with("ccd", Value::seq([0, 1]));

        assert_eq!(
            stage.run(&clip).err(),
            Some(PipelineError::UnsatisfiedProvision {
                stage: "measure".to_string(),
                key: "flux".to_string(),
                within: None,
            })
        );
    }

    #[test]
    fn multi_body_runs_index_major() {
        let log = Log::default();
        let step = |name: &'static str| -> Box<dyn Stage> {
            let log = Arc::clone(&log);
            Box::new(FnStage::new(
                StageInfo::new(name).with_requires("ccd"),
                move |clip, info| {
                    let ccd = clip.get("ccd").and_then(Value::as_int).unwrap_or(-1);
                    record(&log, format!("{}({})", info.name(), ccd));
                    Ok(None)
                },
            ))
        };

        let stage = IterateMultiStage::multi(
            StageInfo::new("perCcd"),
            "ccd",
            vec![step("S1"), step("S2")],
        );
        stage
            .run(&Clipboard::new().with("ccd", Value::seq([0, 1])))
            .expect("run");

        assert_eq!(entries(&log), vec!["S1(0)", "S2(0)", "S1(1)", "S2(1)"]);
    }

    #[test]
    fn later_children_see_earlier_element_outputs() {
        let stage = IterateMultiStage::multi(
            StageInfo::new("perCcd"),
            "exposure",
            vec![
                Box::new(FnStage::new(
                    StageInfo::new("background")
                        .with_requires("exposure")
                        .with_provides("bg"),
                    |clip, _info| {
                        let e = clip.get("exposure").and_then(Value::as_int).unwrap_or_default();
                        Ok(Some(Clipboard::new().with("bg", e / 10)))
                    },
                )),
                Box::new(FnStage::new(
                    StageInfo::new("subtract")
                        .with_requires(["exposure", "bg"])
                        .with_provides("exposure"),
                    |clip, _info| {
                        let e = clip.get("exposure").and_then(Value::as_int).unwrap_or_default();
                        let bg = clip.get("bg").and_then(Value::as_int).unwrap_or_default();
                        Ok(Some(Clipboard::new().with("exposure", e - bg)))
                    },
                )),
            ],
        );

        assert_eq!(stage.requires().join(","), "exposure");
        assert_eq!(stage.describe().split(' ').next(), Some("perCcd"));

        // bg is provided per element; the outer default keeps the provision
        // check satisfied and is never overwritten by the element views.
        let clip = Clipboard::new()
            .with("exposure", Value::seq([100, 200]))
            .with("bg", 0);
        let out = stage.run(&clip).expect("run").expect("clipboard");
        assert_eq!(out.get("exposure"), Some(&Value::seq([90, 180])));
        assert_eq!(out.get("bg"), Some(&Value::Int(0)));
    }

    #[test]
    fn empty_descriptor_is_malformed() {
        let stage = IterateStage::new(
            KeySet::new(),
            FnStage::new(StageInfo::new("noop"), |_clip, _info| Ok(None)),
        );
        assert!(matches!(
            stage.run(&Clipboard::new()),
            Err(PipelineError::MalformedStage { .. })
        ));
    }

    #[test]
    fn wrapper_shares_body_identity() {
        let mut stage = IterateStage::new(
            "ccd",
            FnStage::new(StageInfo::new("measure").with_requires("ccd"), |_c, _i| Ok(None)),
        );
        stage.attach(&LogScope::root().child("reduce"));

        assert_eq!(stage.name(), "measure");
        assert_eq!(stage.info().scope().path(), "pipette.reduce.measure");
        assert_eq!(stage.describe(), "measure: (ccd) --> ()");
        assert_eq!(stage.iterate().join(","), "ccd");
        assert_eq!(stage.body().name(), "measure");
    }
}
