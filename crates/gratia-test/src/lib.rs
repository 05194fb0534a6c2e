//! Gratia Test Harness - Multi-node simulation
//!
//! This crate provides:
//! - A chaos signal channel (latency, jitter, loss, duplication)
//! - Local swarms: many hubs on one virtual clock and one shared medium
//! - Mesh swarms: hubs over the in-memory relay and connectivity layer
//! - End-to-end scenario tests

pub mod chaos;
pub mod swarm;
pub mod mesh;
pub mod scenarios;

pub use chaos::*;
pub use swarm::*;
pub use mesh::*;
pub use scenarios::*;
