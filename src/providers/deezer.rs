use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::http::{ensure_success, query_url, HttpRequest, HttpTransport};
use crate::providers::{json_array, json_string, AlbumQuery, ArtworkCandidate, ArtworkProvider};

pub const PROVIDER_NAME: &str = "deezer";
pub const DEFAULT_BASE_URL: &str = "https://api.deezer.com";
const SEARCH_LIMIT: &str = "10";

/// Deezer album search. Covers come from the `cover_xl` rendition.
pub struct DeezerProvider {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
}

impl DeezerProvider {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn escape_term(value: &str) -> String {
        value.trim().replace('"', "")
    }

    fn parse_results(payload: &Value) -> Result<Vec<ArtworkCandidate>, ProviderError> {
        // Deezer reports quota and query errors with a 200 and an `error` object.
        if let Some(error) = payload.get("error") {
            return Err(ProviderError::Malformed(format!(
                "deezer error payload: {}",
                json_string(&error["message"])
            )));
        }
        let albums = json_array(payload, "data", PROVIDER_NAME)?;
        Ok(albums
            .iter()
            .map(|album| {
                let cover = json_string(&album["cover_xl"]);
                ArtworkCandidate {
                    artist: json_string(&album["artist"]["name"]),
                    title: json_string(&album["title"]),
                    artwork_url: (!cover.is_empty()).then_some(cover),
                }
            })
            .collect())
    }
}

#[async_trait]
impl ArtworkProvider for DeezerProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn search(&self, query: &AlbumQuery) -> Result<Vec<ArtworkCandidate>, ProviderError> {
        let q = format!(
            "artist:\"{}\" album:\"{}\"",
            Self::escape_term(&query.artist),
            Self::escape_term(&query.album)
        );
        let url = query_url(
            &format!("{}/search/album", self.base_url),
            &[("q", &q), ("limit", SEARCH_LIMIT)],
        );
        let response = ensure_success(self.transport.get(&HttpRequest::get(url)).await?)?;
        let payload: Value = response
            .json()
            .map_err(|error| ProviderError::Malformed(format!("deezer: {error}")))?;
        Self::parse_results(&payload)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::DeezerProvider;
    use crate::error::ProviderError;
    use crate::providers::test_support::CannedTransport;
    use crate::providers::{AlbumQuery, ArtworkProvider};

    #[tokio::test]
    async fn test_search_reads_cover_xl() {
        let transport = Arc::new(CannedTransport::default().with(
            "https://deezer.test/search/album",
            200,
            r#"{"data":[{"title":"Homogenic","artist":{"name":"Björk"},
                "cover_xl":"https://cdn.deezer.test/cover/1000x1000.jpg"}],"total":1}"#,
        ));
        let provider = DeezerProvider::new(transport.clone(), "https://deezer.test");

        let candidates = provider
            .search(&AlbumQuery::new("Björk", "Homogenic"))
            .await
            .expect("search succeeds");

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].artist, "Björk");
        assert_eq!(
            candidates[0].usable_url(),
            Some("https://cdn.deezer.test/cover/1000x1000.jpg")
        );
        assert!(transport
            .last_request()
            .url
            .starts_with("https://deezer.test/search/album?q=artist%3A%22Bj"));
    }

    #[tokio::test]
    async fn test_error_object_is_malformed() {
        let transport = Arc::new(CannedTransport::default().with(
            "https://deezer.test",
            200,
            r#"{"error":{"type":"Exception","message":"Quota limit exceeded","code":4}}"#,
        ));
        let provider = DeezerProvider::new(transport, "https://deezer.test");
        let error = provider
            .search(&AlbumQuery::new("a", "b"))
            .await
            .expect_err("error payload");
        assert_eq!(
            error,
            ProviderError::Malformed("deezer error payload: Quota limit exceeded".to_string())
        );
    }

    #[tokio::test]
    async fn test_empty_data_is_not_an_error() {
        let transport = Arc::new(CannedTransport::default().with(
            "https://deezer.test",
            200,
            r#"{"data":[],"total":0}"#,
        ));
        let provider = DeezerProvider::new(transport, "https://deezer.test");
        assert_eq!(provider.search(&AlbumQuery::new("a", "b")).await, Ok(Vec::new()));
    }
}
