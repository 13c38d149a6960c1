//! # JamQ Common Library
//!
//! Shared code for the JamQ host daemon and its tooling:
//! - Track and session data model (status graph, queue ordering)
//! - Track change feed (per-session broadcast channels)
//! - Session event types for SSE transmission
//! - Common error types

pub mod error;
pub mod events;
pub mod model;

pub use error::{Error, Result};
