//! Invidious mirror search provider
//!
//! Secondary resolution backends, one per mirror instance. Keyless, so
//! always available, but individual mirrors come and go; the chain
//! treats every kind of mirror failure as "try the next one".

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::provider::{MediaRef, ProviderError, SearchProvider};

/// Public mirror list used when the configuration names none
pub const DEFAULT_INSTANCES: &[&str] = &[
    "https://inv.nadeko.net",
    "https://invidious.privacyredirect.com",
    "https://invidious.protokolla.fi",
    "https://iv.nboeck.de",
    "https://invidious.lunar.icu",
    "https://yewtu.be",
    "https://invidious.fdn.fr",
    "https://inv.riverside.rocks",
];

/// Single-instance Invidious search backend
pub struct InvidiousProvider {
    client: reqwest::Client,
    base_url: String,
}

impl InvidiousProvider {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self { client, base_url }
    }
}

#[async_trait]
impl SearchProvider for InvidiousProvider {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn search(&self, query: &str) -> Result<Vec<MediaRef>, ProviderError> {
        let url = format!("{}/api/v1/search", self.base_url);

        debug!(instance = %self.base_url, query = %query, "Querying Invidious mirror");

        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("type", "video")])
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError(status.as_u16(), error_text));
        }

        let hits: Vec<SearchHit> = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        Ok(hits
            .into_iter()
            .filter(|hit| hit.kind == "video")
            .filter_map(|hit| {
                let media_id = hit.video_id?;
                Some(MediaRef {
                    media_id,
                    title: hit.title,
                    author: hit.author,
                    provider: self.base_url.clone(),
                })
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(rename = "videoId")]
    video_id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
}
