//! # Pipette - Staged Reduction Driver
//!
//! The main binary for the Pipette stage engine.
//!
//! It reads a TOML configuration, builds the stage tree it describes and
//! runs it once per (frame, CCD) unit of work.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               apps/pipette (THE DRIVER)              │
//! │                                                      │
//! │  ┌─────────────┐   ┌─────────────┐   ┌───────────┐  │
//! │  │    CLI      │   │   Config    │   │  Driver   │  │
//! │  │   (clap)    │   │   (toml)    │   │  stages   │  │
//! │  └──────┬──────┘   └──────┬──────┘   └─────┬─────┘  │
//! │         └─────────────────┼────────────────┘        │
//! │                           ▼                         │
//! │                   ┌───────────────┐                 │
//! │                   │ pipette-core  │                 │
//! │                   │ (THE ENGINE)  │                 │
//! │                   └───────────────┘                 │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Reduce CCDs 0-2 of visit 1234
//! pipette -c suprimecam.toml run --frame 1234 --ccd 0:1:2
//!
//! # Inspect the stage tree
//! pipette -c suprimecam.toml describe
//! ```

use clap::Parser;
use pipette::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "pipette=info,pipette_core=info";

/// Filter used when `RUST_LOG` is unset and `--debug` is given.
const DEBUG_FILTER: &str = "pipette=debug,pipette_core=debug";

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // Parse first: --debug selects the default filter.
    let cli = cli::Cli::parse();

    // Initialize tracing: PIPETTE_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("PIPETTE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if cli.debug { DEBUG_FILTER } else { DEFAULT_FILTER };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    // Execute command
    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
