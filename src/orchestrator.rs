//! Sequential, adaptively ordered artwork resolution across providers.
//!
//! Each album is resolved by trying providers one at a time, best success
//! ratio first, until one yields a usable URL. Settled lookups, including
//! misses, are memoized in the [`ResultCache`].

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::cache::{CachedArtwork, ResultCache};
use crate::config::ProvidersConfig;
use crate::error::{DispatchError, ProviderError};
use crate::matching::pick_best_match;
use crate::providers::{AlbumQuery, ArtworkCandidate, ArtworkProvider, RegistryClient};
use crate::queue::{BoundedConcurrencyQueue, Priority};
use crate::retry::{classify, RetryPolicy};
use crate::stats::{SourceStat, SourceStatsTracker};

/// A provider paired with the queue that caps its outbound connections.
pub struct ProviderSlot {
    provider: Arc<dyn ArtworkProvider>,
    queue: BoundedConcurrencyQueue,
}

impl ProviderSlot {
    pub fn new(
        provider: Arc<dyn ArtworkProvider>,
        max_concurrent: usize,
        job_timeout: Option<Duration>,
    ) -> Self {
        Self {
            provider,
            queue: BoundedConcurrencyQueue::new(max_concurrent, job_timeout),
        }
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn queue(&self) -> &BoundedConcurrencyQueue {
        &self.queue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Retry budget for transient failures of a single provider.
    pub provider_retry: RetryPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            provider_retry: RetryPolicy {
                max_retries: 1,
                backoff_base: Duration::from_millis(1000),
            },
        }
    }
}

impl From<&ProvidersConfig> for OrchestratorSettings {
    fn from(config: &ProvidersConfig) -> Self {
        Self {
            provider_retry: RetryPolicy {
                max_retries: config.max_retries,
                backoff_base: Duration::from_millis(config.backoff_base_ms),
            },
        }
    }
}

pub struct ArtworkOrchestrator {
    slots: Vec<ProviderSlot>,
    registry: Option<Arc<RegistryClient>>,
    cache: Arc<ResultCache>,
    stats: Arc<SourceStatsTracker>,
    settings: OrchestratorSettings,
}

impl ArtworkOrchestrator {
    /// `providers` are listed in their default order, which breaks success-ratio ties.
    pub fn new(
        providers: Vec<ProviderSlot>,
        cache: Arc<ResultCache>,
        stats: Arc<SourceStatsTracker>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            slots: providers,
            registry: None,
            cache,
            stats,
            settings,
        }
    }

    /// Fills missing release-group ids from the registry before searching.
    pub fn with_registry(mut self, registry: Arc<RegistryClient>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn stats(&self) -> &Arc<SourceStatsTracker> {
        &self.stats
    }

    /// Provider names in their default order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.slots.iter().map(ProviderSlot::name).collect()
    }

    pub fn has_registry(&self) -> bool {
        self.registry.is_some()
    }

    pub fn stats_snapshot(&self) -> BTreeMap<String, SourceStat> {
        self.stats.snapshot()
    }

    pub async fn resolve(&self, query: &AlbumQuery) -> Option<String> {
        self.resolve_with_priority(query, Priority::Normal).await
    }

    /// Resolves one album. `priority` only affects registry lookups.
    pub async fn resolve_with_priority(
        &self,
        query: &AlbumQuery,
        priority: Priority,
    ) -> Option<String> {
        self.resolve_cancellable(query, priority, &CancellationToken::new())
            .await
    }

    /// Resolves one album until `cancel` fires.
    ///
    /// Once cancelled no further provider or registry call is started; a call
    /// already running still settles and a hit from it is cached. A lookup
    /// cut short by cancellation caches nothing.
    pub async fn resolve_cancellable(
        &self,
        query: &AlbumQuery,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let key = query.cache_key();
        if let Some(cached) = self.cache.get(&key) {
            debug!("Artwork[{}]: cache hit ({:?})", key, cached);
            return cached.into_url();
        }

        let query = self.with_release_group(query, priority, cancel).await;
        let mut slots: Vec<&ProviderSlot> = self
            .slots
            .iter()
            .filter(|slot| slot.provider.is_enabled_for(&query))
            .collect();
        self.stats.order_by_success(&mut slots, |slot| slot.name());

        for slot in slots {
            if cancel.is_cancelled() {
                debug!("Artwork[{}]: cancelled before {}", key, slot.name());
                return None;
            }
            if let Some(url) = self.search_provider(slot, &query, &key, cancel).await {
                self.stats.record_success(slot.name());
                info!("Artwork[{}]: resolved via {}", key, slot.name());
                self.cache.insert(key, CachedArtwork::Found(url.clone()));
                return Some(url);
            }
        }

        if cancel.is_cancelled() {
            debug!("Artwork[{}]: cancelled, leaving the miss uncached", key);
            return None;
        }
        info!("Artwork[{}]: no provider produced artwork", key);
        self.cache.insert(key, CachedArtwork::NotFound);
        None
    }

    async fn with_release_group<'q>(
        &self,
        query: &'q AlbumQuery,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> Cow<'q, AlbumQuery> {
        let Some(registry) = self.registry.as_ref() else {
            return Cow::Borrowed(query);
        };
        if query.release_group_id().is_some()
            || !query.has_artist_and_title()
            || cancel.is_cancelled()
        {
            return Cow::Borrowed(query);
        }
        // Dropping the lookup drops its queued dispatch, which the queue then skips.
        let lookup = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Cow::Borrowed(query),
            lookup = registry.lookup_release_group(&query.artist, &query.album, priority) => lookup,
        };
        match lookup {
            Ok(Some(release_group_id)) => {
                debug!(
                    "Artwork[{}]: registry release group {}",
                    query.cache_key(),
                    release_group_id
                );
                Cow::Owned(query.clone().with_release_group(release_group_id))
            }
            Ok(None) => Cow::Borrowed(query),
            Err(error) => {
                warn!(
                    "Artwork[{}]: registry lookup failed: {}",
                    query.cache_key(),
                    error
                );
                Cow::Borrowed(query)
            }
        }
    }

    /// One provider, retried on transient failures. Every try that reaches the
    /// provider counts as an attempt.
    async fn search_provider(
        &self,
        slot: &ProviderSlot,
        query: &AlbumQuery,
        key: &str,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let policy = self.settings.provider_retry;
        let mut retry_count = 0u32;
        loop {
            let outcome = slot
                .queue
                .add_cancellable(cancel, || {
                    self.stats.record_attempt(slot.name());
                    slot.provider.search(query)
                })
                .await;
            let error: DispatchError = match outcome {
                Ok(Ok(candidates)) => return Self::select_artwork(candidates, query),
                Ok(Err(ProviderError::Malformed(message))) => {
                    warn!(
                        "Artwork[{}]: {} returned a malformed response: {}",
                        key,
                        slot.name(),
                        message
                    );
                    return None;
                }
                Err(DispatchError::Cancelled) => {
                    debug!("Artwork[{}]: {} dropped from queue", key, slot.name());
                    return None;
                }
                Ok(Err(ProviderError::Dispatch(error))) | Err(error) => error,
            };

            let decision = classify(&error);
            if !decision.retry || retry_count >= policy.max_retries {
                warn!(
                    "Artwork[{}]: {} failed after {} retries ({}): {}",
                    key,
                    slot.name(),
                    retry_count,
                    decision.reason,
                    error
                );
                return None;
            }
            retry_count += 1;
            let backoff = policy.delay(retry_count);
            info!(
                "Artwork[{}]: {} attempt {} failed ({}), retrying in {:?}",
                key,
                slot.name(),
                retry_count,
                decision.reason,
                backoff
            );
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    fn select_artwork(candidates: Vec<ArtworkCandidate>, query: &AlbumQuery) -> Option<String> {
        let usable: Vec<ArtworkCandidate> = candidates
            .into_iter()
            .filter(|candidate| candidate.usable_url().is_some())
            .collect();
        pick_best_match(&usable, &query.artist, &query.album)
            .and_then(ArtworkCandidate::usable_url)
            .map(str::to_string)
    }
}
