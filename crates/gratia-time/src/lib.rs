//! Gratia Time - Scheduler port
//!
//! Every timed behavior in Gratia (hub ticks, periodic broadcasts, debounce)
//! goes through the `Scheduler` trait:
//! - `ManualScheduler`: virtual time, advanced explicitly by tests
//! - `TokioScheduler`: real time on a tokio runtime

pub mod scheduler;
pub mod manual;
pub mod runtime;

pub use scheduler::*;
pub use manual::*;
pub use runtime::*;
