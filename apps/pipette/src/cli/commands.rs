//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::config::DriverConfig;
use crate::stages::driver_registry;
use pipette_core::{Clipboard, PipelineError, Stage, StageFactory, Value, run_pipeline};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Maximum size of a clipboard seed file (16 MB).
const MAX_CLIPBOARD_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Rerun name used when checking requirements outside a run.
const CHECK_RERUN: &str = "check";

// =============================================================================
// REQUEST TYPES
// =============================================================================

/// How command results are printed.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputMode {
    pub json: bool,
    pub quiet: bool,
}

/// One `run` invocation: a frame and the CCDs to reduce.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub frame: u32,
    pub ccds: Vec<u32>,
    pub rerun: String,
    pub clipboard: Option<PathBuf>,
    pub keep_going: bool,
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Run the configured pipeline once per CCD.
pub fn cmd_run(
    config_path: &Path,
    output: OutputMode,
    request: &RunRequest,
) -> Result<(), PipelineError> {
    let config = DriverConfig::load(config_path)?;
    let pipeline = build_pipeline(&config)?;
    let extra = request
        .clipboard
        .as_deref()
        .map(read_clipboard)
        .transpose()?;

    let mut failed = Vec::new();
    for &ccd in &request.ccds {
        let result = run_unit(&config, pipeline.as_ref(), request, ccd, extra.as_ref(), output);
        match result {
            Ok(()) => {}
            Err(e) if request.keep_going => {
                tracing::error!(frame = request.frame, ccd, error = %e, "Unit failed, continuing");
                failed.push(ccd);
            }
            Err(e) => return Err(e),
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::StageFailed {
            stage: pipeline.name().to_string(),
            reason: format!(
                "{} of {} CCDs failed: {:?}",
                failed.len(),
                request.ccds.len(),
                failed
            ),
        })
    }
}

/// Reduce one (frame, ccd) unit and report the result.
fn run_unit(
    config: &DriverConfig,
    pipeline: &dyn Stage,
    request: &RunRequest,
    ccd: u32,
    extra: Option<&Clipboard>,
    output: OutputMode,
) -> Result<(), PipelineError> {
    let span = tracing::info_span!("unit", frame = request.frame, ccd);
    let _enter = span.enter();
    tracing::info!("Processing frame {} ccd {}", request.frame, ccd);

    let clipboard = initial_clipboard(request.frame, ccd, &request.rerun, extra);
    let result = run_pipeline(pipeline, clipboard)?;

    let path = config.output_path(&request.rerun, request.frame, ccd);
    if let Some(path) = &path {
        write_clipboard(path, &result)?;
        tracing::info!(path = %path.display(), "Wrote clipboard");
    }

    if output.json {
        let report = serde_json::json!({
            "frame": request.frame,
            "ccd": ccd,
            "rerun": request.rerun,
            "output": path.as_ref().map(|p| p.to_string_lossy()),
            "clipboard": result.to_json(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
        return Ok(());
    }

    if !output.quiet {
        println!("Frame {} CCD {}: {} keys", request.frame, ccd, result.len());
        for (key, value) in result.iter() {
            println!("  {:<16} {}", key, value.kind());
        }
    }

    Ok(())
}

// =============================================================================
// DESCRIBE COMMAND
// =============================================================================

/// Print the configured stage tree.
pub fn cmd_describe(config_path: &Path, output: OutputMode) -> Result<(), PipelineError> {
    let config = DriverConfig::load(config_path)?;
    let pipeline = build_pipeline(&config)?;

    if output.json {
        let report = serde_json::json!({
            "name": pipeline.name(),
            "requires": pipeline.requires().to_vec(),
            "provides": pipeline.provides().to_vec(),
            "describe": pipeline.describe(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
        return Ok(());
    }

    println!("{}", pipeline.describe());
    if !output.quiet {
        println!();
        println!("Requires: {}", pipeline.requires().join(", "));
        println!("Provides: {}", pipeline.provides().join(", "));
    }

    Ok(())
}

// =============================================================================
// CHECK COMMAND
// =============================================================================

/// Check the pipeline's requirements without running it.
///
/// `dataId` and `rerun` are always present, as `run` supplies them.
pub fn cmd_check(
    config_path: &Path,
    output: OutputMode,
    clipboard: Option<&Path>,
) -> Result<(), PipelineError> {
    let config = DriverConfig::load(config_path)?;
    let pipeline = build_pipeline(&config)?;
    let extra = clipboard.map(read_clipboard).transpose()?;
    let clipboard = initial_clipboard(0, 0, CHECK_RERUN, extra.as_ref());

    let missing: Vec<&str> = pipeline
        .requires()
        .iter()
        .filter(|key| !clipboard.contains_key(key))
        .collect();

    if output.json {
        let report = serde_json::json!({
            "name": pipeline.name(),
            "satisfied": missing.is_empty(),
            "missing": missing,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
    } else if !output.quiet {
        if missing.is_empty() {
            println!("Stage {} requirements satisfied", pipeline.name());
        } else {
            println!("Stage {} requirements not met", pipeline.name());
            for key in &missing {
                println!("  missing: {}", key);
            }
        }
    }

    match missing.first() {
        None => Ok(()),
        Some(key) => Err(PipelineError::UnsatisfiedRequirement {
            stage: pipeline.name().to_string(),
            key: (*key).to_string(),
            within: None,
        }),
    }
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Build the configured stage tree with the driver's stage kinds.
pub fn build_pipeline(config: &DriverConfig) -> Result<Box<dyn Stage>, PipelineError> {
    driver_registry().create(&config.pipeline)
}

/// Seed clipboard for one unit: `dataId = {visit, ccd}`, `rerun`, then any
/// extra entries (which may override both).
#[must_use]
pub fn initial_clipboard(
    frame: u32,
    ccd: u32,
    rerun: &str,
    extra: Option<&Clipboard>,
) -> Clipboard {
    let data_id: BTreeMap<String, Value> = [
        ("visit".to_string(), Value::from(frame)),
        ("ccd".to_string(), Value::from(ccd)),
    ]
    .into_iter()
    .collect();

    let mut clipboard = Clipboard::new()
        .with("dataId", data_id)
        .with("rerun", rerun);
    if let Some(extra) = extra {
        clipboard.merge(extra.clone());
    }
    clipboard
}

/// Read a JSON object file into a clipboard.
pub fn read_clipboard(path: &Path) -> Result<Clipboard, PipelineError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        PipelineError::Io(format!("Cannot read file metadata '{}': {}", path.display(), e))
    })?;
    if metadata.len() > MAX_CLIPBOARD_FILE_SIZE {
        return Err(PipelineError::Io(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_CLIPBOARD_FILE_SIZE
        )));
    }

    let text = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::Io(format!("Read '{}': {}", path.display(), e)))?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| PipelineError::Config(format!("Parse '{}': {}", path.display(), e)))?;
    Clipboard::from_json(json)
}

/// Write a clipboard as pretty JSON, creating the parent directory.
pub fn write_clipboard(path: &Path, clipboard: &Clipboard) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            PipelineError::Io(format!("Create '{}': {}", parent.display(), e))
        })?;
    }
    let text = serde_json::to_string_pretty(&clipboard.to_json())
        .map_err(|e| PipelineError::Io(format!("Serialize clipboard: {}", e)))?;
    std::fs::write(path, text)
        .map_err(|e| PipelineError::Io(format!("Write '{}': {}", path.display(), e)))
}
