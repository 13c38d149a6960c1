//! # JamQ Host Library (jamq-host)
//!
//! The party host daemon: accepts guest track suggestions, lets the
//! host curate them into an ordered play queue, resolves approved
//! tracks to playable media through a provider fallback chain, and
//! drives the host page's embedded player over a per-session SSE
//! stream.
//!
//! **Architecture:** one actor task per active session (see
//! [`engine`]), fed by row-level change notifications from the track
//! store and exposed over an Axum REST/SSE surface.

pub mod api;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod playback;
pub mod queue;
pub mod resolver;
pub mod store;
pub mod submit;

pub use error::{Error, Result};
