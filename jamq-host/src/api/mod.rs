//! REST API for the party host daemon
//!
//! Session lifecycle, guest submission, host curation, playback
//! control, and the per-session SSE event stream. All state lives
//! behind the session engines; handlers translate HTTP to engine
//! commands and map errors onto status codes.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{build_router, AppContext};
