//! # Pipette Driver Library
//!
//! Library interface for the Pipette driver, exposing the CLI, the driver
//! configuration and the driver-side stages for integration testing.

pub mod cli;
pub mod config;
pub mod stages;
