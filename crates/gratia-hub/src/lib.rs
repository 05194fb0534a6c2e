//! Gratia Hub - Local presence state and event publication
//!
//! The hub owns phase, mood, whisper and peer liveness, drives a tick clock
//! through the scheduler port, and publishes every change as a
//! `KernelEvent` to registered observers and listeners.

pub mod hub;
pub mod observer;
pub mod observers;

pub use hub::*;
pub use observer::*;
pub use observers::*;
