//! # Driver Stages
//!
//! Utility leaf stages the driver registers with the stage factory.
//!
//! - `set`: provides every key of its `config` table as a clipboard value
//! - `copy`: copies the value under `config.from` to `config.to`
//!
//! Scientific stages (ISR, detection, astrometry) are registered the same
//! way by whatever links against this crate.

use pipette_core::{
    Clipboard, FnStage, PipelineError, Stage, StageRegistry, StageSpec, Value,
};

/// Kind name of the constant-setting stage.
pub const KIND_SET: &str = "set";

/// Kind name of the key-copying stage.
pub const KIND_COPY: &str = "copy";

/// Registry holding the driver's leaf kinds.
#[must_use]
pub fn driver_registry() -> StageRegistry {
    let mut registry = StageRegistry::new();
    register_driver_stages(&mut registry);
    registry
}

/// Add the driver's leaf kinds to `registry`.
pub fn register_driver_stages(registry: &mut StageRegistry) {
    registry
        .register(KIND_SET, build_set)
        .register(KIND_COPY, build_copy);
}

fn build_set(spec: &StageSpec) -> Result<Box<dyn Stage>, PipelineError> {
    let values: Clipboard = spec
        .config
        .iter()
        .map(|(key, value)| (key.as_str(), Value::from_toml(value)))
        .collect();
    let keys: Vec<&str> = values.keys().collect();
    let info = spec.info().with_provides(keys);

    Ok(Box::new(FnStage::new(info, move |_clip, _info| {
        Ok(Some(values.clone()))
    })))
}

fn build_copy(spec: &StageSpec) -> Result<Box<dyn Stage>, PipelineError> {
    let from = config_key(spec, "from")?;
    let to = config_key(spec, "to")?;
    let info = spec
        .info()
        .with_requires(from.as_str())
        .with_provides(to.as_str());

    Ok(Box::new(FnStage::new(info, move |clip, info| {
        let value = clip
            .get(&from)
            .cloned()
            .ok_or_else(|| PipelineError::StageFailed {
                stage: info.name().to_string(),
                reason: format!("nothing to copy under '{from}'"),
            })?;
        Ok(Some(Clipboard::new().with(to.as_str(), value)))
    })))
}

fn config_key(spec: &StageSpec, field: &str) -> Result<String, PipelineError> {
    spec.config
        .get(field)
        .and_then(toml::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| PipelineError::MalformedStage {
            name: spec.name.clone(),
            reason: format!("'{}' stage needs a string config.{field}", spec.kind),
        })
}
