//! Retry classification and backoff timing for outbound provider requests.

use std::time::Duration;

use crate::error::{DispatchError, TransportErrorKind};

const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Outcome of classifying one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub reason: &'static str,
}

impl RetryDecision {
    fn retry(reason: &'static str) -> Self {
        Self {
            retry: true,
            reason,
        }
    }

    fn terminal(reason: &'static str) -> Self {
        Self {
            retry: false,
            reason,
        }
    }
}

/// Bounded retry budget with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry_count` (1-based).
    pub fn delay(&self, retry_count: u32) -> Duration {
        backoff_delay(self.backoff_base, retry_count)
    }
}

/// Decides whether a failed attempt is worth repeating.
pub fn classify(error: &DispatchError) -> RetryDecision {
    match error {
        DispatchError::Status(code) => match code {
            400..=499 => RetryDecision::terminal("client_error"),
            503 | 504 => RetryDecision::retry("service_unavailable"),
            500..=599 => RetryDecision::terminal("server_error"),
            _ => RetryDecision::terminal("unexpected_status"),
        },
        DispatchError::Transport { kind, .. } => match kind {
            TransportErrorKind::ConnectionReset => RetryDecision::retry("connection_reset"),
            TransportErrorKind::ConnectionRefused => RetryDecision::retry("connection_refused"),
            TransportErrorKind::Dns => RetryDecision::retry("dns_failure"),
            TransportErrorKind::TimedOut => RetryDecision::retry("network_timeout"),
            TransportErrorKind::Other => RetryDecision::terminal("transport_error"),
        },
        DispatchError::Timeout(_) => RetryDecision::retry("timeout"),
        DispatchError::Closed => RetryDecision::terminal("closed"),
        DispatchError::Cancelled => RetryDecision::terminal("cancelled"),
    }
}

/// `base * 2^(retry_count - 1)`: 1s, 2s, 4s, ... for a one second base.
pub fn backoff_delay(base: Duration, retry_count: u32) -> Duration {
    let exponent = retry_count.max(1).saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    base.checked_mul(1u32 << exponent).unwrap_or(Duration::MAX)
}
