//! Gratia Runtime - Node assembly
//!
//! This crate wires the layers into a running node:
//! - `GratiaConfig`: file, environment and flag configuration
//! - `init_tracing`: the log subscriber
//! - `boot`: carrier selection and the `Gratia` handle
//! - Console commands for the interactive `gratia-node` binary

pub mod config;
pub mod telemetry;
pub mod boot;
pub mod console;

pub use config::*;
pub use telemetry::*;
pub use boot::*;
pub use console::*;
