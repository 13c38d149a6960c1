//! YouTube Data API search provider
//!
//! Primary resolution backend. Requires an API key; without one the
//! provider reports itself unavailable and the chain moves straight to
//! the mirrors. Searches are restricted to the music video category and
//! ask for a single result.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::provider::{MediaRef, ProviderError, SearchProvider};

const SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";
const PROVIDER_NAME: &str = "youtube-official";

/// Official Data API v3 search backend
pub struct YouTubeDataProvider {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl YouTubeDataProvider {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        // An empty configured key means "no key"
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        Self { client, api_key }
    }
}

#[async_trait]
impl SearchProvider for YouTubeDataProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn search(&self, query: &str) -> Result<Vec<MediaRef>, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::ApiError(401, "API key not configured".to_string()))?;

        debug!(query = %query, "Querying YouTube Data API");

        let response = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("part", "snippet"),
                ("q", query),
                ("type", "video"),
                ("videoCategoryId", "10"),
                ("maxResults", "1"),
                ("key", api_key),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError(status.as_u16(), error_text));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        Ok(body
            .items
            .into_iter()
            .filter_map(|item| {
                let media_id = item.id.video_id?;
                Some(MediaRef {
                    media_id,
                    title: item.snippet.title,
                    author: item.snippet.channel_title,
                    provider: PROVIDER_NAME.to_string(),
                })
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: ItemId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct ItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    title: String,
    #[serde(rename = "channelTitle")]
    channel_title: String,
}
