//! Outbound request queues.
//!
//! [`BoundedConcurrencyQueue`] caps connections to a fragile provider;
//! [`RateLimitedDispatchQueue`] serializes and spaces out requests to a provider
//! with a hard global rate ceiling.

pub mod bounded;
pub mod rate_limited;

pub use bounded::BoundedConcurrencyQueue;
pub use rate_limited::{PendingDispatch, RateLimitSettings, RateLimitedDispatchQueue};

/// Admission priority for the rate-limited queue. Ordering is `Low < Normal < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}
