//! Gratia Signal - Presence broadcasting and the peer radar
//!
//! This crate provides:
//! - The `SignalChannel` capability and its in-process carrier
//! - Resonance scoring and energy sampling
//! - The radar: a scored, self-expiring table of remote peers
//! - The signal adapter bridging a `PresenceHub` and a channel

pub mod channel;
pub mod resonance;
pub mod energy;
pub mod radar;
pub mod adapter;

pub use channel::*;
pub use resonance::*;
pub use energy::*;
pub use radar::*;
pub use adapter::*;
