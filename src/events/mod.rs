//! # Lifecycle Events
//!
//! Typed completion and pipeline lifecycle events delivered over a broadcast
//! channel. Replaces a global listener bus: callers subscribe explicitly and
//! dropped receivers cannot leak listeners.

pub mod publisher;

pub use publisher::{ConductorEvent, EventPublisher};
