//! Cover Art Archive lookups by release-group id.
//!
//! The archive is keyed by identifier rather than searched by name, so this
//! provider only runs for rows that already carry a release-group id. Every
//! candidate it returns is labelled with the requested artist and title.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{DispatchError, ProviderError};
use crate::http::{ensure_success, HttpRequest, HttpTransport};
use crate::providers::{json_array, json_string, AlbumQuery, ArtworkCandidate, ArtworkProvider};

pub const PROVIDER_NAME: &str = "cover_art_archive";
pub const DEFAULT_BASE_URL: &str = "https://coverartarchive.org";

pub struct CoverArtArchiveProvider {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
}

impl CoverArtArchiveProvider {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn image_url(image: &Value) -> String {
        let large = json_string(&image["thumbnails"]["large"]);
        if large.is_empty() {
            json_string(&image["image"])
        } else {
            large
        }
    }

    fn parse_images(
        payload: &Value,
        query: &AlbumQuery,
    ) -> Result<Vec<ArtworkCandidate>, ProviderError> {
        let images = json_array(payload, "images", PROVIDER_NAME)?;
        let mut fronts: Vec<&Value> = images
            .iter()
            .filter(|image| image["front"].as_bool().unwrap_or(false))
            .collect();
        if fronts.is_empty() {
            fronts = images.iter().collect();
        }
        Ok(fronts
            .into_iter()
            .map(|image| {
                let url = Self::image_url(image);
                ArtworkCandidate {
                    artist: query.artist.clone(),
                    title: query.album.clone(),
                    artwork_url: (!url.is_empty()).then_some(url),
                }
            })
            .collect())
    }
}

#[async_trait]
impl ArtworkProvider for CoverArtArchiveProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn is_enabled_for(&self, query: &AlbumQuery) -> bool {
        query.release_group_id().is_some()
    }

    async fn search(&self, query: &AlbumQuery) -> Result<Vec<ArtworkCandidate>, ProviderError> {
        let Some(release_group_id) = query.release_group_id() else {
            return Ok(Vec::new());
        };
        let url = format!(
            "{}/release-group/{}",
            self.base_url,
            urlencoding::encode(release_group_id)
        );
        let request = HttpRequest::get(url).header("Accept", "application/json");
        let response = match ensure_success(self.transport.get(&request).await?) {
            Ok(response) => response,
            // No artwork has been uploaded for this release group.
            Err(DispatchError::Status(404)) => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };
        let payload: Value = response
            .json()
            .map_err(|error| ProviderError::Malformed(format!("cover_art_archive: {error}")))?;
        Self::parse_images(&payload, query)
    }
}
