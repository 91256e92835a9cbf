//! Orchestration of throttled, failure-prone artwork and metadata providers.
//!
//! Requests are capped per provider, serialized behind a rate ceiling where the
//! provider demands it, retried on transient failures, memoized, and scheduled
//! by what is visible in the album list.

pub mod bootstrap;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod http;
pub mod matching;
pub mod orchestrator;
pub mod protocol;
pub mod providers;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod viewport;
