//! HTTP transport seam used by every provider.
//!
//! Providers and the rate-limited queue talk to an [`HttpTransport`] rather than
//! to `ureq` directly so that dispatch timing and retry behavior can be tested
//! against scripted responses.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::{DispatchError, TransportErrorKind};

/// One outbound GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Response body and status for a settled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Retries spent before this response arrived.
    pub retries: u32,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retries: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Issues GET requests. Non-2xx statuses come back as `Ok` responses.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, DispatchError>;
}

/// Converts a non-success response into a `Status` error.
pub fn ensure_success(response: HttpResponse) -> Result<HttpResponse, DispatchError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(DispatchError::Status(response.status))
    }
}

/// Appends URL-encoded query parameters to `base`.
pub fn query_url(base: &str, params: &[(&str, &str)]) -> String {
    let mut url = base.to_string();
    if params.is_empty() {
        return url;
    }

    url.push('?');
    for (index, (key, value)) in params.iter().enumerate() {
        if index > 0 {
            url.push('&');
        }
        url.push_str(key);
        url.push('=');
        url.push_str(urlencoding::encode(value).as_ref());
    }
    url
}

/// Blocking `ureq` agent driven from the tokio blocking pool.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    /// `request_timeout` bounds the whole call, body included, so the blocking
    /// thread is released no later than that.
    pub fn new(request_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5).min(request_timeout))
            .timeout(request_timeout)
            .build();
        Self { agent }
    }

    fn classify_transport_message(message: &str) -> TransportErrorKind {
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("timed out") || lowered.contains("timeout") {
            TransportErrorKind::TimedOut
        } else if lowered.contains("reset") || lowered.contains("broken pipe") {
            TransportErrorKind::ConnectionReset
        } else if lowered.contains("refused") {
            TransportErrorKind::ConnectionRefused
        } else {
            TransportErrorKind::Other
        }
    }

    fn classify_transport(transport: &ureq::Transport) -> DispatchError {
        let message = transport.to_string();
        let kind = match transport.kind() {
            ureq::ErrorKind::Dns => TransportErrorKind::Dns,
            ureq::ErrorKind::ConnectionFailed => match Self::classify_transport_message(&message) {
                TransportErrorKind::Other => TransportErrorKind::ConnectionRefused,
                kind => kind,
            },
            ureq::ErrorKind::Io => Self::classify_transport_message(&message),
            _ => TransportErrorKind::Other,
        };
        DispatchError::transport(kind, message)
    }

    fn read_response(response: ureq::Response) -> Result<HttpResponse, DispatchError> {
        let status = response.status();
        let body = response.into_string().map_err(|error| {
            let message = format!("Failed to read response: {error}");
            let kind = match error.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                    TransportErrorKind::TimedOut
                }
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                    TransportErrorKind::ConnectionReset
                }
                _ => Self::classify_transport_message(&message),
            };
            DispatchError::transport(kind, message)
        })?;
        Ok(HttpResponse::new(status, body))
    }

    fn get_blocking(agent: &ureq::Agent, request: &HttpRequest) -> Result<HttpResponse, DispatchError> {
        let mut call = agent.get(&request.url);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }
        match call.call() {
            Ok(response) => Self::read_response(response),
            Err(ureq::Error::Status(_, response)) => Self::read_response(response),
            Err(ureq::Error::Transport(transport)) => Err(Self::classify_transport(&transport)),
        }
    }
}

#[async_trait]
impl HttpTransport for UreqTransport {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, DispatchError> {
        let agent = self.agent.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || Self::get_blocking(&agent, &request))
            .await
            .map_err(|error| {
                DispatchError::transport(
                    TransportErrorKind::Other,
                    format!("HTTP worker failed: {error}"),
                )
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::{ensure_success, query_url, HttpRequest, HttpResponse, UreqTransport};
    use crate::error::{DispatchError, TransportErrorKind};

    #[test]
    fn test_query_url_encodes_values() {
        assert_eq!(
            query_url(
                "https://itunes.apple.com/search",
                &[("term", "Simon & Garfunkel"), ("entity", "album")]
            ),
            "https://itunes.apple.com/search?term=Simon%20%26%20Garfunkel&entity=album"
        );
        assert_eq!(query_url("https://example.org", &[]), "https://example.org");
    }

    #[test]
    fn test_request_builder_collects_headers() {
        let request = HttpRequest::get("https://example.org")
            .header("Accept", "application/json")
            .header("User-Agent", "coverscout/0.1.0");
        assert_eq!(request.headers.len(), 2);
        assert_eq!(request.headers[0].0, "Accept");
    }

    #[test]
    fn test_ensure_success_maps_status_to_error() {
        assert!(ensure_success(HttpResponse::new(204, "")).is_ok());
        assert_eq!(
            ensure_success(HttpResponse::new(404, "missing")),
            Err(DispatchError::Status(404))
        );
    }

    #[test]
    fn test_json_reports_malformed_bodies() {
        let response = HttpResponse::new(200, "<html>");
        assert!(response.json::<serde_json::Value>().is_err());
        let response = HttpResponse::new(200, r#"{"ok":true}"#);
        let value: serde_json::Value = response.json().expect("valid json");
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_transport_message_classification() {
        assert_eq!(
            UreqTransport::classify_transport_message("operation timed out"),
            TransportErrorKind::TimedOut
        );
        assert_eq!(
            UreqTransport::classify_transport_message("Connection reset by peer"),
            TransportErrorKind::ConnectionReset
        );
        assert_eq!(
            UreqTransport::classify_transport_message("Connection refused (os error 111)"),
            TransportErrorKind::ConnectionRefused
        );
        assert_eq!(
            UreqTransport::classify_transport_message("invalid certificate"),
            TransportErrorKind::Other
        );
    }
}
