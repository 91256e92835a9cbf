//! iTunes Search API album artwork.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::http::{ensure_success, query_url, HttpRequest, HttpTransport};
use crate::providers::{json_array, json_string, AlbumQuery, ArtworkCandidate, ArtworkProvider};

pub const PROVIDER_NAME: &str = "itunes";
pub const DEFAULT_BASE_URL: &str = "https://itunes.apple.com";
const SEARCH_LIMIT: &str = "10";

pub struct ITunesProvider {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
}

impl ITunesProvider {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// iTunes serves 100px thumbnails; the same path serves larger renditions.
    fn upscale_artwork_url(url: &str) -> String {
        url.replace("100x100bb", "600x600bb")
    }

    fn parse_results(payload: &Value) -> Result<Vec<ArtworkCandidate>, ProviderError> {
        let results = json_array(payload, "results", PROVIDER_NAME)?;
        Ok(results
            .iter()
            .map(|item| {
                let artwork = json_string(&item["artworkUrl100"]);
                ArtworkCandidate {
                    artist: json_string(&item["artistName"]),
                    title: json_string(&item["collectionName"]),
                    artwork_url: (!artwork.is_empty())
                        .then(|| Self::upscale_artwork_url(&artwork)),
                }
            })
            .collect())
    }
}

#[async_trait]
impl ArtworkProvider for ITunesProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn search(&self, query: &AlbumQuery) -> Result<Vec<ArtworkCandidate>, ProviderError> {
        let term = format!("{} {}", query.artist.trim(), query.album.trim());
        let url = query_url(
            &format!("{}/search", self.base_url),
            &[("term", &term), ("entity", "album"), ("limit", SEARCH_LIMIT)],
        );
        let response = ensure_success(self.transport.get(&HttpRequest::get(url)).await?)?;
        let payload: Value = response
            .json()
            .map_err(|error| ProviderError::Malformed(format!("itunes: {error}")))?;
        Self::parse_results(&payload)
    }
}
