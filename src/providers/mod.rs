//! External artwork providers and the throttled metadata registry.

pub mod cover_art_archive;
pub mod deezer;
pub mod itunes;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::cache::cache_key;
use crate::config::ProvidersConfig;
use crate::error::ProviderError;
use crate::http::HttpTransport;
use crate::matching::MatchCandidate;

pub use cover_art_archive::CoverArtArchiveProvider;
pub use deezer::DeezerProvider;
pub use itunes::ITunesProvider;
pub use registry::RegistryClient;

/// One catalog row to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlbumQuery {
    pub artist: String,
    pub album: String,
    #[serde(default, alias = "releaseGroupId", skip_serializing_if = "Option::is_none")]
    pub release_group_id: Option<String>,
}

impl AlbumQuery {
    pub fn new(artist: impl Into<String>, album: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            album: album.into(),
            release_group_id: None,
        }
    }

    pub fn with_release_group(mut self, release_group_id: impl Into<String>) -> Self {
        self.release_group_id = Some(release_group_id.into());
        self
    }

    pub fn cache_key(&self) -> String {
        cache_key(&self.artist, &self.album)
    }

    pub fn has_artist_and_title(&self) -> bool {
        !self.artist.trim().is_empty() && !self.album.trim().is_empty()
    }

    /// The release-group id, if present and non-blank.
    pub fn release_group_id(&self) -> Option<&str> {
        self.release_group_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// One entry from a provider's search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtworkCandidate {
    pub artist: String,
    pub title: String,
    pub artwork_url: Option<String>,
}

impl ArtworkCandidate {
    /// The artwork URL, if it is non-blank.
    pub fn usable_url(&self) -> Option<&str> {
        self.artwork_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

impl MatchCandidate for ArtworkCandidate {
    fn candidate_artist(&self) -> &str {
        &self.artist
    }

    fn candidate_title(&self) -> &str {
        &self.title
    }
}

/// An artwork source searched by the orchestrator.
#[async_trait]
pub trait ArtworkProvider: Send + Sync {
    /// Stable name used for stats and configuration.
    fn name(&self) -> &str;

    /// Whether this provider has the inputs it needs for `query`.
    fn is_enabled_for(&self, query: &AlbumQuery) -> bool {
        query.has_artist_and_title()
    }

    async fn search(&self, query: &AlbumQuery) -> Result<Vec<ArtworkCandidate>, ProviderError>;
}

/// Builds the HTTP-backed providers listed in `config.order`, in that order.
pub fn build_artwork_providers(
    config: &ProvidersConfig,
    transport: Arc<dyn HttpTransport>,
) -> Vec<Arc<dyn ArtworkProvider>> {
    let mut providers: Vec<Arc<dyn ArtworkProvider>> = Vec::new();
    for name in &config.order {
        let provider: Arc<dyn ArtworkProvider> = match name.as_str() {
            itunes::PROVIDER_NAME => Arc::new(ITunesProvider::new(
                Arc::clone(&transport),
                config.itunes_base_url.clone(),
            )),
            deezer::PROVIDER_NAME => Arc::new(DeezerProvider::new(
                Arc::clone(&transport),
                config.deezer_base_url.clone(),
            )),
            cover_art_archive::PROVIDER_NAME => Arc::new(CoverArtArchiveProvider::new(
                Arc::clone(&transport),
                config.cover_art_archive_base_url.clone(),
            )),
            unknown => {
                warn!("Ignoring unknown artwork provider '{}' in config", unknown);
                continue;
            }
        };
        if providers.iter().any(|existing| existing.name() == provider.name()) {
            continue;
        }
        providers.push(provider);
    }
    providers
}

/// Expects `value[key]` to be an array, or reports the payload as malformed.
pub(crate) fn json_array<'a>(
    value: &'a serde_json::Value,
    key: &str,
    provider: &str,
) -> Result<&'a Vec<serde_json::Value>, ProviderError> {
    value[key].as_array().ok_or_else(|| {
        ProviderError::Malformed(format!("{provider} response has no '{key}' array"))
    })
}

pub(crate) fn json_string(value: &serde_json::Value) -> String {
    value.as_str().unwrap_or_default().trim().to_string()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::DispatchError;
    use crate::http::{HttpRequest, HttpResponse, HttpTransport};

    /// Serves canned bodies by URL prefix and records every request.
    #[derive(Default)]
    pub struct CannedTransport {
        responses: HashMap<String, (u16, String)>,
        pub requests: Mutex<Vec<HttpRequest>>,
    }

    impl CannedTransport {
        pub fn with(mut self, url_prefix: &str, status: u16, body: &str) -> Self {
            self.responses
                .insert(url_prefix.to_string(), (status, body.to_string()));
            self
        }

        pub fn last_request(&self) -> HttpRequest {
            self.requests
                .lock()
                .expect("request log lock poisoned")
                .last()
                .cloned()
                .expect("at least one request")
        }
    }

    #[async_trait]
    impl HttpTransport for CannedTransport {
        async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, DispatchError> {
            self.requests
                .lock()
                .expect("request log lock poisoned")
                .push(request.clone());
            self.responses
                .iter()
                .find(|(prefix, _)| request.url.starts_with(prefix.as_str()))
                .map(|(_, (status, body))| HttpResponse::new(*status, body.clone()))
                .ok_or(DispatchError::Status(404))
        }
    }
}
