//! Wires configuration into the provider, queue and scheduler graph.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::sync::broadcast;

use crate::cache::ResultCache;
use crate::config::{Config, RegistryConfig};
use crate::http::HttpTransport;
use crate::orchestrator::{ArtworkOrchestrator, OrchestratorSettings, ProviderSlot};
use crate::protocol::{BusImagePrefetcher, Message};
use crate::providers::{build_artwork_providers, RegistryClient};
use crate::queue::{RateLimitSettings, RateLimitedDispatchQueue};
use crate::stats::SourceStatsTracker;
use crate::viewport::{CatalogSource, ViewportLoadScheduler, ViewportSettings};

pub struct ArtworkServices {
    pub orchestrator: Arc<ArtworkOrchestrator>,
    pub scheduler: ViewportLoadScheduler,
    pub bus_sender: broadcast::Sender<Message>,
}

pub fn build_registry(
    config: &RegistryConfig,
    transport: Arc<dyn HttpTransport>,
) -> Option<RegistryClient> {
    if !config.enabled {
        return None;
    }
    let queue = RateLimitedDispatchQueue::new(transport, RateLimitSettings::from(config));
    Some(RegistryClient::new(
        queue,
        config.base_url.clone(),
        config.client_identifier.clone(),
    ))
}

pub fn build_orchestrator(config: &Config, transport: Arc<dyn HttpTransport>) -> ArtworkOrchestrator {
    let job_timeout = (config.providers.job_timeout_ms > 0)
        .then(|| Duration::from_millis(config.providers.job_timeout_ms));
    let slots: Vec<ProviderSlot> =
        build_artwork_providers(&config.providers, Arc::clone(&transport))
            .into_iter()
            .map(|provider| {
                ProviderSlot::new(provider, config.providers.max_concurrent, job_timeout)
            })
            .collect();

    let orchestrator = ArtworkOrchestrator::new(
        slots,
        Arc::new(ResultCache::new()),
        Arc::new(SourceStatsTracker::new()),
        OrchestratorSettings::from(&config.providers),
    );
    info!(
        "Artwork providers: {:?} (registry {})",
        orchestrator.provider_names(),
        if config.registry.enabled { "on" } else { "off" }
    );
    match build_registry(&config.registry, transport) {
        Some(registry) => orchestrator.with_registry(Arc::new(registry)),
        None => orchestrator,
    }
}

pub fn build_artwork_services(
    config: &Config,
    transport: Arc<dyn HttpTransport>,
    catalog: Arc<dyn CatalogSource>,
    bus_sender: broadcast::Sender<Message>,
) -> ArtworkServices {
    let orchestrator = Arc::new(build_orchestrator(config, transport));
    let scheduler = ViewportLoadScheduler::new(
        Arc::clone(&orchestrator),
        ViewportSettings::from(&config.viewport),
    )
    .with_hover_preloader(catalog, Arc::new(BusImagePrefetcher::new(bus_sender.clone())));
    ArtworkServices {
        orchestrator,
        scheduler,
        bus_sender,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::broadcast;

    use super::{build_artwork_services, build_orchestrator, build_registry};
    use crate::catalog::InMemoryCatalog;
    use crate::config::{Config, RegistryConfig};
    use crate::providers::test_support::CannedTransport;

    #[test]
    fn test_default_config_builds_every_provider_and_registry() {
        let orchestrator = build_orchestrator(&Config::default(), Arc::new(CannedTransport::default()));
        assert_eq!(
            orchestrator.provider_names(),
            vec!["itunes", "deezer", "cover_art_archive"]
        );
        assert!(orchestrator.has_registry());
    }

    #[test]
    fn test_disabled_registry_is_not_built() {
        let config = RegistryConfig {
            enabled: false,
            ..RegistryConfig::default()
        };
        assert!(build_registry(&config, Arc::new(CannedTransport::default())).is_none());
    }

    #[test]
    fn test_registry_queue_uses_configured_interval() {
        let config = RegistryConfig {
            min_interval_ms: 1_500,
            ..RegistryConfig::default()
        };
        let registry = build_registry(&config, Arc::new(CannedTransport::default()))
            .expect("registry enabled");
        assert_eq!(
            registry.queue().settings().min_interval,
            Duration::from_millis(1_500)
        );
        assert_eq!(registry.queue().settings().retry.max_retries, 2);
    }

    #[test]
    fn test_services_share_one_orchestrator() {
        let (bus_sender, _receiver) = broadcast::channel(16);
        let services = build_artwork_services(
            &Config::default(),
            Arc::new(CannedTransport::default()),
            Arc::new(InMemoryCatalog::default()),
            bus_sender,
        );
        assert!(services.scheduler.hover().is_some());
        assert_eq!(Arc::strong_count(&services.orchestrator), 3);
        assert_eq!(services.scheduler.settings().background_batch_size, 3);
    }
}
