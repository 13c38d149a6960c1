//! Media search provider contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider-side search errors
///
/// These never leave the resolution chain: any failure simply moves the
/// chain along to the next provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// A playable search hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// External media identifier (11-character video id)
    pub media_id: String,
    /// Title as reported by the provider
    pub title: String,
    /// Channel or uploader name
    pub author: String,
    /// Display name of the backend that answered, for attribution
    pub provider: String,
}

/// Shape check for external media identifiers
///
/// Exactly 11 characters from [A-Za-z0-9_-]. Anything else counts as a
/// malformed provider payload.
pub fn is_valid_media_id(id: &str) -> bool {
    id.len() == 11
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// One backend of the resolution chain
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Display name for logs and result attribution
    fn name(&self) -> &str;

    /// Whether this provider can be called at all
    ///
    /// The primary reports false when its credential is absent; the
    /// chain skips it without counting an error.
    fn available(&self) -> bool {
        true
    }

    /// Search for playable media matching `query`
    ///
    /// An empty vec is a valid answer meaning "no hits".
    async fn search(&self, query: &str) -> Result<Vec<MediaRef>, ProviderError>;
}
