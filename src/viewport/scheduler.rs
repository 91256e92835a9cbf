use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use log::{debug, info};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::orchestrator::ArtworkOrchestrator;
use crate::providers::AlbumQuery;
use crate::queue::Priority;
use crate::viewport::hover::{CatalogSource, HoverPreloader, ImagePrefetcher};
use crate::viewport::{ArtworkSink, LoadState, ViewportSettings, VisibilityProbe};

#[derive(Default)]
struct SessionState {
    load: LoadState,
    /// Set once any visibility report (or the safety-net probe) has arrived.
    observed: bool,
    /// Rows of the first visible batch that have not finished yet.
    first_batch: Option<BTreeSet<usize>>,
    sweep_started: bool,
}

struct SessionInner {
    id: Uuid,
    rows: Vec<AlbumQuery>,
    orchestrator: Arc<ArtworkOrchestrator>,
    settings: ViewportSettings,
    sink: Arc<dyn ArtworkSink>,
    probe: Arc<dyn VisibilityProbe>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    state: Mutex<SessionState>,
}

/// Load bookkeeping for one rendered list. Cloning shares the session.
#[derive(Clone)]
pub struct ListLoadSession {
    inner: Arc<SessionInner>,
}

impl ListLoadSession {
    fn start(
        rows: Vec<AlbumQuery>,
        orchestrator: Arc<ArtworkOrchestrator>,
        settings: ViewportSettings,
        sink: Arc<dyn ArtworkSink>,
        probe: Arc<dyn VisibilityProbe>,
    ) -> Self {
        let inner = Arc::new(SessionInner {
            id: Uuid::new_v4(),
            rows,
            orchestrator,
            settings,
            sink,
            probe,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            state: Mutex::new(SessionState::default()),
        });
        info!("Viewport[{}]: rendered {} rows", inner.id, inner.rows.len());

        let watchdog = Arc::clone(&inner);
        inner.tasks.spawn(async move {
            tokio::select! {
                _ = watchdog.cancel.cancelled() => {}
                _ = tokio::time::sleep(watchdog.settings.visibility_timeout) => {
                    watchdog.run_safety_net();
                }
            }
        });
        Self { inner }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn len(&self) -> usize {
        self.inner.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.rows.is_empty()
    }

    /// Observer callback: these rows just scrolled into view.
    pub fn rows_visible(&self, indices: &[usize]) {
        self.inner.admit_visible(indices);
    }

    /// Stops all new work for this list. Results of in-flight lookups still
    /// reach the cache but are never painted.
    pub fn teardown(&self) {
        {
            let _state = self
                .inner
                .state
                .lock()
                .expect("viewport session lock poisoned");
            if self.inner.cancel.is_cancelled() {
                return;
            }
            self.inner.cancel.cancel();
        }
        self.inner.tasks.close();
        info!("Viewport[{}]: torn down", self.inner.id);
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn load_state(&self) -> LoadState {
        self.inner
            .state
            .lock()
            .expect("viewport session lock poisoned")
            .load
            .clone()
    }

    /// Waits until no task of this session is running: either every row has
    /// been attempted, or the session was torn down and in-flight lookups drained.
    pub async fn wait_settled(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }
}

impl SessionInner {
    fn admit_visible(self: &Arc<Self>, indices: &[usize]) {
        let admitted = {
            let mut state = self.state.lock().expect("viewport session lock poisoned");
            if self.cancel.is_cancelled() {
                return;
            }
            state.observed = true;
            let mut admitted = Vec::new();
            for &index in indices {
                if index < self.rows.len() && state.load.begin(index) {
                    admitted.push(index);
                }
            }
            if state.first_batch.is_none() {
                state.first_batch = Some(admitted.iter().copied().collect());
            }
            admitted
        };

        if !admitted.is_empty() {
            debug!("Viewport[{}]: loading visible rows {:?}", self.id, admitted);
        }
        for index in admitted {
            let inner = Arc::clone(self);
            self.tasks
                .spawn(async move { inner.load_row(index, Priority::High).await });
        }
        self.maybe_start_sweep();
    }

    fn run_safety_net(self: &Arc<Self>) {
        let observed = self
            .state
            .lock()
            .expect("viewport session lock poisoned")
            .observed;
        if observed || self.cancel.is_cancelled() {
            return;
        }
        let visible = self.probe.visible_rows();
        info!(
            "Viewport[{}]: no visibility report after {:?}, probe found rows {:?}",
            self.id, self.settings.visibility_timeout, visible
        );
        self.admit_visible(&visible);
    }

    async fn load_row(self: &Arc<Self>, index: usize, priority: Priority) {
        if self.cancel.is_cancelled() {
            return;
        }
        let Some(row) = self.rows.get(index) else {
            return;
        };
        let url = self
            .orchestrator
            .resolve_cancellable(row, priority, &self.cancel)
            .await;

        {
            // Painting under the lock keeps teardown from racing a paint.
            let mut state = self.state.lock().expect("viewport session lock poisoned");
            if self.cancel.is_cancelled() {
                debug!(
                    "Viewport[{}]: dropping result for row {} after teardown",
                    self.id, index
                );
                return;
            }
            state.load.finish(index);
            if let Some(first_batch) = state.first_batch.as_mut() {
                first_batch.remove(&index);
            }
            self.sink.paint(index, url.as_deref());
        }
        self.maybe_start_sweep();
    }

    fn maybe_start_sweep(self: &Arc<Self>) {
        let start = {
            let mut state = self.state.lock().expect("viewport session lock poisoned");
            let first_batch_done = state
                .first_batch
                .as_ref()
                .is_some_and(|pending| pending.is_empty());
            if first_batch_done && !state.sweep_started && !self.cancel.is_cancelled() {
                state.sweep_started = true;
                true
            } else {
                false
            }
        };
        if start {
            let inner = Arc::clone(self);
            self.tasks
                .spawn(async move { inner.run_background_sweep().await });
        }
    }

    fn next_background_batch(&self, cursor: &mut usize) -> Vec<usize> {
        let mut state = self.state.lock().expect("viewport session lock poisoned");
        if self.cancel.is_cancelled() {
            return Vec::new();
        }
        let mut batch = Vec::with_capacity(self.settings.background_batch_size);
        while *cursor < self.rows.len() && batch.len() < self.settings.background_batch_size {
            if state.load.begin(*cursor) {
                batch.push(*cursor);
            }
            *cursor += 1;
        }
        batch
    }

    async fn run_background_sweep(self: &Arc<Self>) {
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = tokio::time::sleep(self.settings.settle_delay) => {}
        }
        debug!("Viewport[{}]: background sweep started", self.id);

        let mut cursor = 0usize;
        let mut first = true;
        loop {
            if !first {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.settings.background_batch_pause) => {}
                }
            }
            first = false;

            let batch = self.next_background_batch(&mut cursor);
            if batch.is_empty() {
                break;
            }
            join_all(
                batch
                    .iter()
                    .map(|&index| self.load_row(index, Priority::Low)),
            )
            .await;
        }
        if !self.cancel.is_cancelled() {
            info!("Viewport[{}]: every row attempted", self.id);
        }
    }
}

/// Owns the active list session and the hover preloader for one view.
pub struct ViewportLoadScheduler {
    orchestrator: Arc<ArtworkOrchestrator>,
    settings: ViewportSettings,
    active: Mutex<Option<ListLoadSession>>,
    hover: Option<HoverPreloader>,
}

impl ViewportLoadScheduler {
    pub fn new(orchestrator: Arc<ArtworkOrchestrator>, settings: ViewportSettings) -> Self {
        Self {
            orchestrator,
            settings,
            active: Mutex::new(None),
            hover: None,
        }
    }

    pub fn with_hover_preloader(
        mut self,
        catalog: Arc<dyn CatalogSource>,
        prefetcher: Arc<dyn ImagePrefetcher>,
    ) -> Self {
        self.hover = Some(HoverPreloader::new(
            Arc::clone(&self.orchestrator),
            catalog,
            prefetcher,
            self.settings.hover_debounce,
            self.settings.hover_warm_count,
        ));
        self
    }

    pub fn settings(&self) -> ViewportSettings {
        self.settings
    }

    pub fn hover(&self) -> Option<&HoverPreloader> {
        self.hover.as_ref()
    }

    /// Starts a session for `rows`, tearing down the previous one.
    pub fn render(
        &self,
        rows: Vec<AlbumQuery>,
        sink: Arc<dyn ArtworkSink>,
        probe: Arc<dyn VisibilityProbe>,
    ) -> ListLoadSession {
        let mut active = self.active.lock().expect("viewport scheduler lock poisoned");
        if let Some(previous) = active.take() {
            previous.teardown();
        }
        if let Some(hover) = &self.hover {
            hover.cancel();
        }
        let session = ListLoadSession::start(
            rows,
            Arc::clone(&self.orchestrator),
            self.settings,
            sink,
            probe,
        );
        *active = Some(session.clone());
        session
    }

    pub fn active_session(&self) -> Option<ListLoadSession> {
        self.active
            .lock()
            .expect("viewport scheduler lock poisoned")
            .clone()
    }

    /// Tears down the active list and any in-flight hover preload.
    pub fn teardown(&self) {
        let previous = self
            .active
            .lock()
            .expect("viewport scheduler lock poisoned")
            .take();
        if let Some(previous) = previous {
            previous.teardown();
        }
        if let Some(hover) = &self.hover {
            hover.cancel();
        }
    }
}
