//! # Pipette CLI Module
//!
//! This module implements the CLI interface for the Pipette driver.
//!
//! ## Available Commands
//!
//! - `run` - Reduce one frame, one unit of work per CCD
//! - `describe` - Print the configured stage tree
//! - `check` - Report missing pipeline inputs without running anything

mod commands;

use crate::config::DEFAULT_CCDS;
use clap::{Parser, Subcommand};
use pipette_core::PipelineError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Pipette - staged image reduction driver
///
/// Builds a stage tree from a TOML configuration and runs it over a
/// clipboard seeded with the frame and CCD being reduced.
#[derive(Parser, Debug)]
#[command(name = "pipette")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the driver configuration
    #[arg(short, long, global = true, default_value = "pipette.toml")]
    pub config: PathBuf,

    /// Debugging output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Suppress informational output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline over one frame
    Run {
        /// Visit to run
        #[arg(short, long)]
        frame: u32,

        /// CCDs to run, colon-separated
        #[arg(long, default_value = DEFAULT_CCDS)]
        ccd: String,

        /// Rerun name
        #[arg(short, long, env = "USER", default_value = "rerun")]
        rerun: String,

        /// JSON object file with extra clipboard entries
        #[arg(long)]
        clipboard: Option<PathBuf>,

        /// Continue with the next CCD when one fails
        #[arg(long)]
        keep_going: bool,
    },

    /// Print the stage tree and its derived contract
    Describe,

    /// Check the pipeline's requirements against the initial clipboard
    Check {
        /// JSON object file with extra clipboard entries
        #[arg(long)]
        clipboard: Option<PathBuf>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), PipelineError> {
    let output = OutputMode {
        json: cli.json_mode,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Run {
            frame,
            ccd,
            rerun,
            clipboard,
            keep_going,
        } => {
            let request = RunRequest {
                frame,
                ccds: crate::config::parse_ccd_list(&ccd)?,
                rerun,
                clipboard,
                keep_going,
            };
            cmd_run(&cli.config, output, &request)
        }
        Commands::Describe => cmd_describe(&cli.config, output),
        Commands::Check { clipboard } => cmd_check(&cli.config, output, clipboard.as_deref()),
    }
}
