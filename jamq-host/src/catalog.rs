//! Track catalog search client
//!
//! Queries the iTunes Search API for track metadata so the submission
//! form can offer title, artist, album, and cover art instead of free
//! text. Results are suggestions only; a guest can always submit a
//! track the catalog has never heard of.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const ITUNES_BASE_URL: &str = "https://itunes.apple.com/search";
const USER_AGENT: &str = "jamq/0.1 (https://github.com/jamq/jamq)";
const RESULT_LIMIT: u32 = 20;

/// Catalog client errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// One catalog match, already shaped for the submission form
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CatalogTrack {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub cover_url: Option<String>,
}

/// iTunes search response envelope
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<CatalogHit>,
}

/// One raw iTunes result; every field is optional because the API
/// mixes entity kinds in one results array
#[derive(Debug, Deserialize)]
struct CatalogHit {
    #[serde(rename = "trackName")]
    track_name: Option<String>,
    #[serde(rename = "artistName")]
    artist_name: Option<String>,
    #[serde(rename = "collectionName")]
    collection_name: Option<String>,
    #[serde(rename = "artworkUrl100")]
    artwork_url: Option<String>,
}

/// iTunes Search API client
#[derive(Clone)]
pub struct CatalogClient {
    http_client: reqwest::Client,
}

impl CatalogClient {
    pub fn new() -> Result<Self, CatalogError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CatalogError::NetworkError(e.to_string()))?;

        Ok(Self { http_client })
    }

    /// Search the catalog for tracks matching a free-text query
    ///
    /// A blank query returns no results without touching the network.
    pub async fn search(&self, query: &str) -> Result<Vec<CatalogTrack>, CatalogError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        debug!(query = %query, "Querying track catalog");

        let response = self
            .http_client
            .get(ITUNES_BASE_URL)
            .query(&[
                ("term", query),
                ("media", "music"),
                ("entity", "song"),
                ("limit", &RESULT_LIMIT.to_string()),
            ])
            .send()
            .await
            .map_err(|e| CatalogError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CatalogError::ApiError(status.as_u16(), error_text));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| CatalogError::ParseError(e.to_string()))?;

        let tracks = hits_to_tracks(body.results);
        debug!(query = %query, results = tracks.len(), "Catalog search complete");
        Ok(tracks)
    }
}

fn hits_to_tracks(hits: Vec<CatalogHit>) -> Vec<CatalogTrack> {
    hits.into_iter()
        .filter_map(|hit| {
            // Non-song entities come back without a track name
            let title = hit.track_name?;
            let artist = hit.artist_name?;
            Some(CatalogTrack {
                title,
                artist,
                album: hit.collection_name,
                cover_url: hit.artwork_url.map(|url| upscale_artwork(&url)),
            })
        })
        .collect()
}

/// Swap the 100x100 thumbnail for the 600x600 rendition
///
/// iTunes serves both from the same path, so this is a pure string
/// rewrite. URLs without the expected suffix pass through unchanged.
fn upscale_artwork(url: &str) -> String {
    url.replace("100x100", "600x600")
}
