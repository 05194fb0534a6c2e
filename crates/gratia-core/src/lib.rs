//! Gratia Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every Gratia layer:
//! - Identifiers (PeerId)
//! - Time primitives (Timestamp)
//! - Presence facets (Phase, Mood) and snapshots
//! - Hub events and wire-level presence signals
//! - Listener sets and subscriptions

pub mod id;
pub mod time;
pub mod presence;
pub mod event;
pub mod signal;
pub mod listener;
pub mod error;

pub use id::*;
pub use time::*;
pub use presence::*;
pub use event::*;
pub use signal::*;
pub use listener::*;
pub use error::*;
