//! Error types for the host daemon
//!
//! Domain-specific errors (store, submission, engine, catalog) live
//! next to their modules and carry their own HTTP mappings in the API
//! layer; this enum only covers startup and configuration failures.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Startup and configuration errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}
