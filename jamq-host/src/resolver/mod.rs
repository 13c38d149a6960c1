//! Media resolution chain
//!
//! Resolves a free-text query to a playable media reference by walking
//! an ordered list of search providers, each wrapped in its own per-call
//! timeout. A timeout, transport error, malformed payload, or empty
//! answer all mean the same thing: move on to the next provider. Each
//! provider is tried at most once per call, exhaustion yields `None`
//! rather than an error, and nothing is cached here.

pub mod invidious;
pub mod provider;
pub mod youtube;

pub use invidious::{InvidiousProvider, DEFAULT_INSTANCES};
pub use provider::{is_valid_media_id, MediaRef, ProviderError, SearchProvider};
pub use youtube::YouTubeDataProvider;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ResolverConfig;
use crate::error::{Error, Result};

const USER_AGENT: &str = "jamq/0.1 (https://github.com/jamq/jamq)";

/// One provider plus its per-call time budget
#[derive(Clone)]
pub struct ProviderHandle {
    pub provider: Arc<dyn SearchProvider>,
    pub timeout: Duration,
}

impl ProviderHandle {
    pub fn new(provider: Arc<dyn SearchProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }
}

/// Ordered provider chain
pub struct MediaResolver {
    handles: Vec<ProviderHandle>,
}

impl MediaResolver {
    pub fn new(handles: Vec<ProviderHandle>) -> Self {
        Self { handles }
    }

    /// Build the standard chain: official API first (when a key is
    /// configured), then each mirror in listed order
    pub fn from_config(cfg: &ResolverConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            // Backstop only; the per-handle timeouts govern each call
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;

        let mut handles = Vec::with_capacity(1 + cfg.invidious_instances.len());
        handles.push(ProviderHandle::new(
            Arc::new(YouTubeDataProvider::new(
                client.clone(),
                cfg.youtube_api_key.clone(),
            )),
            Duration::from_millis(cfg.youtube_timeout_ms),
        ));
        for instance in &cfg.invidious_instances {
            handles.push(ProviderHandle::new(
                Arc::new(InvidiousProvider::new(client.clone(), instance.clone())),
                Duration::from_millis(cfg.invidious_timeout_ms),
            ));
        }

        Ok(Self::new(handles))
    }

    /// Resolve a query to the first well-formed hit
    pub async fn resolve(&self, query: &str) -> Option<MediaRef> {
        for handle in &self.handles {
            let provider = handle.provider.as_ref();

            if !provider.available() {
                debug!(provider = provider.name(), "Skipping unavailable provider");
                continue;
            }

            match tokio::time::timeout(handle.timeout, provider.search(query)).await {
                Err(_) => {
                    warn!(
                        provider = provider.name(),
                        timeout_ms = handle.timeout.as_millis() as u64,
                        "Provider timed out"
                    );
                }
                Ok(Err(e)) => {
                    warn!(provider = provider.name(), error = %e, "Provider search failed");
                }
                Ok(Ok(results)) => {
                    if results.is_empty() {
                        debug!(provider = provider.name(), "No results");
                        continue;
                    }
                    match results.iter().find(|r| is_valid_media_id(&r.media_id)) {
                        Some(hit) => {
                            debug!(
                                provider = provider.name(),
                                media_id = %hit.media_id,
                                "Resolved query"
                            );
                            return Some(hit.clone());
                        }
                        None => {
                            warn!(
                                provider = provider.name(),
                                "Results carried no well-formed media id"
                            );
                        }
                    }
                }
            }
        }

        debug!(query = %query, "Resolution chain exhausted");
        None
    }
}
