//! MusicBrainz release-group lookups behind the rate-limited dispatch queue.
//!
//! The registry allows roughly one request per second per client and wants an
//! identifying `User-Agent`, so every call goes through a
//! [`RateLimitedDispatchQueue`] instead of a provider slot.

use log::debug;
use serde_json::Value;

use crate::error::{DispatchError, ProviderError};
use crate::http::{query_url, HttpRequest};
use crate::matching::{pick_best_match, MatchCandidate};
use crate::providers::{json_array, json_string};
use crate::queue::{Priority, RateLimitedDispatchQueue};

pub const DEFAULT_BASE_URL: &str = "https://musicbrainz.org";
const SEARCH_LIMIT: &str = "5";

/// One `release-groups` entry from a registry search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseGroupCandidate {
    pub id: String,
    pub title: String,
    pub artist: String,
}

impl MatchCandidate for ReleaseGroupCandidate {
    fn candidate_artist(&self) -> &str {
        &self.artist
    }

    fn candidate_title(&self) -> &str {
        &self.title
    }
}

#[derive(Clone)]
pub struct RegistryClient {
    queue: RateLimitedDispatchQueue,
    base_url: String,
    client_identifier: String,
}

impl RegistryClient {
    pub fn new(
        queue: RateLimitedDispatchQueue,
        base_url: impl Into<String>,
        client_identifier: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_identifier: client_identifier.into(),
        }
    }

    pub fn queue(&self) -> &RateLimitedDispatchQueue {
        &self.queue
    }

    /// Lucene phrase query; embedded quotes and backslashes are escaped.
    fn phrase(value: &str) -> String {
        let escaped = value.trim().replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    }

    fn search_request(&self, artist: &str, album: &str) -> HttpRequest {
        let lucene = format!(
            "releasegroup:{} AND artist:{}",
            Self::phrase(album),
            Self::phrase(artist)
        );
        let url = query_url(
            &format!("{}/ws/2/release-group/", self.base_url),
            &[("query", &lucene), ("fmt", "json"), ("limit", SEARCH_LIMIT)],
        );
        HttpRequest::get(url)
            .header("User-Agent", self.client_identifier.as_str())
            .header("Accept", "application/json")
    }

    fn parse_release_groups(payload: &Value) -> Result<Vec<ReleaseGroupCandidate>, ProviderError> {
        let groups = json_array(payload, "release-groups", "registry")?;
        Ok(groups
            .iter()
            .map(|group| ReleaseGroupCandidate {
                id: json_string(&group["id"]),
                title: json_string(&group["title"]),
                artist: json_string(&group["artist-credit"][0]["name"]),
            })
            .filter(|candidate| !candidate.id.is_empty())
            .collect())
    }

    /// Finds the best-matching release-group id for an artist/album pair.
    ///
    /// `Ok(None)` means the registry answered but had nothing usable.
    pub async fn lookup_release_group(
        &self,
        artist: &str,
        album: &str,
        priority: Priority,
    ) -> Result<Option<String>, ProviderError> {
        if artist.trim().is_empty() || album.trim().is_empty() {
            return Ok(None);
        }
        let response = match self
            .queue
            .add(self.search_request(artist, album), priority)
            .await
        {
            Ok(response) => response,
            Err(failure) if failure.error == DispatchError::Status(404) => return Ok(None),
            Err(failure) => return Err(failure.into()),
        };
        if response.retries > 0 {
            debug!(
                "Registry: '{}' / '{}' settled after {} retries",
                artist, album, response.retries
            );
        }
        let payload: Value = response
            .json()
            .map_err(|error| ProviderError::Malformed(format!("registry: {error}")))?;
        let candidates = Self::parse_release_groups(&payload)?;
        Ok(pick_best_match(&candidates, artist, album).map(|candidate| candidate.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::RegistryClient;
    use crate::error::{DispatchError, ProviderError};
    use crate::providers::test_support::CannedTransport;
    use crate::queue::{Priority, RateLimitSettings, RateLimitedDispatchQueue};
    use crate::retry::RetryPolicy;

    fn client(transport: Arc<CannedTransport>) -> RegistryClient {
        let settings = RateLimitSettings {
            min_interval: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_retries: 0,
                backoff_base: Duration::ZERO,
            },
        };
        RegistryClient::new(
            RateLimitedDispatchQueue::new(transport, settings),
            "https://mb.test/",
            "coverscout-tests/1.0 ( tests@example.org )",
        )
    }

    #[tokio::test]
    async fn test_lookup_prefers_exact_release_group() {
        let transport = Arc::new(CannedTransport::default().with(
            "https://mb.test/ws/2/release-group/",
            200,
            r#"{"count":2,"release-groups":[
                {"id":"tribute-id","title":"OK Computer: A Tribute",
                 "artist-credit":[{"name":"Various Artists"}]},
                {"id":"b1392450","title":"OK Computer",
                 "artist-credit":[{"name":"Radiohead"}]}]}"#,
        ));

        let id = client(transport.clone())
            .lookup_release_group("Radiohead", "OK Computer", Priority::High)
            .await
            .expect("lookup succeeds");

        assert_eq!(id.as_deref(), Some("b1392450"));
        let request = transport.last_request();
        assert!(request.url.contains("fmt=json"));
        assert!(request
            .headers
            .iter()
            .any(|(name, value)| name == "User-Agent" && value.starts_with("coverscout-tests")));
    }

    #[tokio::test]
    async fn test_lookup_without_results_is_none() {
        let transport = Arc::new(CannedTransport::default().with(
            "https://mb.test",
            200,
            r#"{"count":0,"release-groups":[]}"#,
        ));
        let found = client(transport)
            .lookup_release_group("Nobody", "Nothing", Priority::Normal)
            .await;
        assert_eq!(found, Ok(None));
    }

    #[tokio::test]
    async fn test_blank_inputs_skip_the_network() {
        let transport = Arc::new(CannedTransport::default());
        let found = client(transport.clone())
            .lookup_release_group(" ", "Album", Priority::Normal)
            .await;
        assert_eq!(found, Ok(None));
        assert!(transport
            .requests
            .lock()
            .expect("request log lock poisoned")
            .is_empty());
    }

    #[tokio::test]
    async fn test_terminal_status_is_reported() {
        let transport = Arc::new(CannedTransport::default().with("https://mb.test", 400, ""));
        let found = client(transport)
            .lookup_release_group("a", "b", Priority::Normal)
            .await;
        assert_eq!(found, Err(ProviderError::Dispatch(DispatchError::Status(400))));
    }

    #[test]
    fn test_phrase_escapes_quotes() {
        assert_eq!(RegistryClient::phrase(r#" Say "Hi" "#), r#""Say \"Hi\"""#);
    }
}
