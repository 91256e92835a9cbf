//! Error types shared by the dispatch queues, providers and configuration loader.

use std::time::Duration;

use thiserror::Error;

/// Network-level failure classes reported by an [`crate::http::HttpTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    ConnectionReset,
    ConnectionRefused,
    Dns,
    TimedOut,
    Other,
}

/// Failure of a single dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The provider answered with a non-success HTTP status.
    #[error("provider returned HTTP {0}")]
    Status(u16),
    /// The request never produced a response.
    #[error("transport error ({kind:?}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    /// The attempt exceeded its time budget and was abandoned.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The queue went away before the job settled.
    #[error("dispatch queue closed before the job settled")]
    Closed,
    /// The caller gave up before the job was started.
    #[error("dispatch cancelled before it started")]
    Cancelled,
}

impl DispatchError {
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }
}

/// Terminal failure of a rate-limited dispatch, annotated with the retries spent on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error} (after {retries} retries)")]
pub struct DispatchFailure {
    pub error: DispatchError,
    pub retries: u32,
}

/// Failure of one provider search.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// The payload did not have the shape the provider expects.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl From<DispatchFailure> for ProviderError {
    fn from(failure: DispatchFailure) -> Self {
        Self::Dispatch(failure.error)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Failure reported by the catalog collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("catalog lookup failed: {0}")]
pub struct CatalogError(pub String);
