//! Debounced hover preloading of an artist's album artwork.
//!
//! Hovering an artist arms a short timer. If the pointer is still there when it
//! fires, the artist's albums are fetched from the catalog and the first few are
//! resolved so their artwork is warm by the time the user opens the artist.
//! Only one preload is live at a time; a new hover supersedes the old one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::CatalogError;
use crate::orchestrator::ArtworkOrchestrator;
use crate::providers::AlbumQuery;
use crate::queue::Priority;

/// Read access to the catalog collaborator.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn albums_by_artist(&self, artist: &str) -> Result<Vec<AlbumQuery>, CatalogError>;
}

/// Fire-and-forget warming of a resolved image URL.
pub trait ImagePrefetcher: Send + Sync {
    fn prefetch(&self, url: &str);
}

#[derive(Default)]
struct ActiveHover {
    latest_id: u64,
    token: Option<CancellationToken>,
    /// True until the debounce delay for `latest_id` has elapsed.
    debouncing: bool,
}

struct HoverInner {
    orchestrator: Arc<ArtworkOrchestrator>,
    catalog: Arc<dyn CatalogSource>,
    prefetcher: Arc<dyn ImagePrefetcher>,
    debounce: Duration,
    warm_count: usize,
    active: Mutex<ActiveHover>,
}

pub struct HoverPreloader {
    inner: Arc<HoverInner>,
}

impl HoverPreloader {
    pub fn new(
        orchestrator: Arc<ArtworkOrchestrator>,
        catalog: Arc<dyn CatalogSource>,
        prefetcher: Arc<dyn ImagePrefetcher>,
        debounce: Duration,
        warm_count: usize,
    ) -> Self {
        Self {
            inner: Arc::new(HoverInner {
                orchestrator,
                catalog,
                prefetcher,
                debounce,
                warm_count,
                active: Mutex::new(ActiveHover::default()),
            }),
        }
    }

    /// Arms a preload for `artist`, aborting any preload already in flight.
    pub fn hover_enter(&self, artist: &str) -> JoinHandle<()> {
        let (id, token) = self.inner.begin();
        let inner = Arc::clone(&self.inner);
        let artist = artist.to_string();
        tokio::spawn(async move { inner.run(id, artist, token).await })
    }

    /// Cancels the preload only if its debounce delay has not elapsed yet.
    pub fn hover_leave(&self) {
        let mut active = self.inner.active.lock().expect("hover state lock poisoned");
        if !active.debouncing {
            return;
        }
        active.debouncing = false;
        if let Some(token) = active.token.take() {
            debug!("Hover[{}]: pointer left before debounce", active.latest_id);
            token.cancel();
        }
    }

    /// Aborts whatever preload is armed or running.
    pub fn cancel(&self) {
        let mut active = self.inner.active.lock().expect("hover state lock poisoned");
        active.debouncing = false;
        if let Some(token) = active.token.take() {
            token.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner
            .active
            .lock()
            .expect("hover state lock poisoned")
            .token
            .is_some()
    }
}

impl HoverInner {
    fn begin(&self) -> (u64, CancellationToken) {
        let mut active = self.active.lock().expect("hover state lock poisoned");
        if let Some(previous) = active.token.take() {
            previous.cancel();
        }
        active.latest_id = active.latest_id.wrapping_add(1);
        active.debouncing = true;
        let token = CancellationToken::new();
        active.token = Some(token.clone());
        (active.latest_id, token)
    }

    fn mark_debounced(&self, id: u64) -> bool {
        let mut active = self.active.lock().expect("hover state lock poisoned");
        if active.latest_id != id {
            return false;
        }
        active.debouncing = false;
        true
    }

    /// Cancellation happens under the same lock, so a cancelled preload never prefetches.
    fn prefetch_if_live(&self, token: &CancellationToken, url: &str) -> bool {
        let _active = self.active.lock().expect("hover state lock poisoned");
        if token.is_cancelled() {
            return false;
        }
        self.prefetcher.prefetch(url);
        true
    }

    fn clear_if(&self, id: u64) {
        let mut active = self.active.lock().expect("hover state lock poisoned");
        if active.latest_id == id {
            active.token = None;
            active.debouncing = false;
        }
    }

    async fn run(&self, id: u64, artist: String, token: CancellationToken) {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(self.debounce) => {}
        }
        if token.is_cancelled() || !self.mark_debounced(id) {
            return;
        }

        let albums = tokio::select! {
            _ = token.cancelled() => return,
            albums = self.catalog.albums_by_artist(&artist) => albums,
        };
        let albums = match albums {
            Ok(albums) => albums,
            Err(error) => {
                warn!("Hover[{}]: catalog lookup for '{}' failed: {}", id, artist, error);
                self.clear_if(id);
                return;
            }
        };

        let mut warmed = 0usize;
        for album in albums.iter().take(self.warm_count) {
            if token.is_cancelled() {
                return;
            }
            let url = self
                .orchestrator
                .resolve_cancellable(album, Priority::Low, &token)
                .await;
            match url {
                Some(url) if self.prefetch_if_live(&token, &url) => warmed += 1,
                Some(_) => return,
                None if token.is_cancelled() => return,
                None => {}
            }
        }
        debug!("Hover[{}]: warmed {} covers for '{}'", id, warmed, artist);
        self.clear_if(id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{CatalogSource, HoverPreloader, ImagePrefetcher};
    use crate::catalog::InMemoryCatalog;
    use crate::error::CatalogError;
    use crate::providers::AlbumQuery;
    use crate::viewport::test_support::orchestrator;

    struct CountingCatalog {
        inner: InMemoryCatalog,
        lookups: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CatalogSource for CountingCatalog {
        async fn albums_by_artist(&self, artist: &str) -> Result<Vec<AlbumQuery>, CatalogError> {
            self.lookups
                .lock()
                .expect("lookups lock poisoned")
                .push(artist.to_string());
            self.inner.albums_by_artist(artist).await
        }
    }

    struct FailingCatalog;

    #[async_trait]
    impl CatalogSource for FailingCatalog {
        async fn albums_by_artist(&self, _artist: &str) -> Result<Vec<AlbumQuery>, CatalogError> {
            Err(CatalogError("catalog offline".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingPrefetcher {
        urls: Mutex<Vec<String>>,
    }

    impl RecordingPrefetcher {
        fn urls(&self) -> Vec<String> {
            self.urls.lock().expect("urls lock poisoned").clone()
        }
    }

    impl ImagePrefetcher for RecordingPrefetcher {
        fn prefetch(&self, url: &str) {
            self.urls.lock().expect("urls lock poisoned").push(url.to_string());
        }
    }

    fn catalog() -> Arc<CountingCatalog> {
        let mut albums: Vec<AlbumQuery> = (0..5)
            .map(|index| AlbumQuery::new("Low", format!("low-{index}")))
            .collect();
        albums.push(AlbumQuery::new("Yo La Tengo", "fakebook"));
        Arc::new(CountingCatalog {
            inner: InMemoryCatalog::new(albums),
            lookups: Mutex::new(Vec::new()),
        })
    }

    fn preloader(
        catalog: Arc<dyn CatalogSource>,
        prefetcher: Arc<RecordingPrefetcher>,
    ) -> HoverPreloader {
        let (orchestrator, _provider) = orchestrator(Duration::from_millis(20));
        HoverPreloader::new(
            orchestrator,
            catalog,
            prefetcher,
            Duration::from_millis(300),
            3,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_hover_warms_first_albums_after_debounce() {
        let catalog = catalog();
        let prefetcher = Arc::new(RecordingPrefetcher::default());
        let hover = preloader(catalog.clone(), prefetcher.clone());

        hover.hover_enter("low").await.expect("hover task");

        assert_eq!(
            prefetcher.urls(),
            vec![
                "https://img.test/low-0.jpg",
                "https://img.test/low-1.jpg",
                "https://img.test/low-2.jpg"
            ]
        );
        assert!(!hover.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_during_debounce_cancels() {
        let catalog = catalog();
        let prefetcher = Arc::new(RecordingPrefetcher::default());
        let hover = preloader(catalog.clone(), prefetcher.clone());

        let task = hover.hover_enter("Low");
        tokio::time::sleep(Duration::from_millis(100)).await;
        hover.hover_leave();
        task.await.expect("hover task");

        assert!(catalog.lookups.lock().expect("lookups lock poisoned").is_empty());
        assert!(prefetcher.urls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_after_debounce_keeps_preloading() {
        let catalog = catalog();
        let prefetcher = Arc::new(RecordingPrefetcher::default());
        let hover = preloader(catalog.clone(), prefetcher.clone());

        let task = hover.hover_enter("Low");
        tokio::time::sleep(Duration::from_millis(310)).await;
        hover.hover_leave();
        task.await.expect("hover task");

        assert_eq!(prefetcher.urls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_hover_supersedes_previous() {
        let catalog = catalog();
        let prefetcher = Arc::new(RecordingPrefetcher::default());
        let hover = preloader(catalog.clone(), prefetcher.clone());

        let first = hover.hover_enter("Low");
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = hover.hover_enter("Yo La Tengo");
        first.await.expect("first hover task");
        second.await.expect("second hover task");

        assert_eq!(
            *catalog.lookups.lock().expect("lookups lock poisoned"),
            vec!["Yo La Tengo".to_string()]
        );
        assert_eq!(prefetcher.urls(), vec!["https://img.test/fakebook.jpg"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_catalog_failure_is_not_fatal() {
        let prefetcher = Arc::new(RecordingPrefetcher::default());
        let hover = preloader(Arc::new(FailingCatalog), prefetcher.clone());

        hover.hover_enter("Low").await.expect("hover task");

        assert!(prefetcher.urls().is_empty());
        assert!(!hover.is_active());
    }
}
