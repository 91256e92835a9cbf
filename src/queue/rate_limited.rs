//! Serialized, priority-ordered dispatch queue for a provider with a hard rate ceiling.
//!
//! A single processing task drains the queue. Before every network attempt it
//! waits until `min_interval` has passed since the previous attempt, so no two
//! dispatches are ever closer than that, across all priorities and retries.
//! At most one request is in flight at any time.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::ops::Add;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use governor::clock::{Clock, Reference};
use governor::middleware::NoOpMiddleware;
use governor::nanos::Nanos;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::RegistryConfig;
use crate::error::{DispatchError, DispatchFailure};
use crate::http::{ensure_success, HttpRequest, HttpResponse, HttpTransport};
use crate::queue::Priority;
use crate::retry::{classify, RetryPolicy};

type DispatchReply = Result<HttpResponse, DispatchFailure>;

/// Timing and retry limits for one throttled provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub min_interval: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&RegistryConfig> for RateLimitSettings {
    fn from(config: &RegistryConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(config.min_interval_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                backoff_base: Duration::from_millis(config.backoff_base_ms),
            },
        }
    }
}

struct QueuedJob {
    id: Uuid,
    request: HttpRequest,
    priority: Priority,
    enqueued_at: Instant,
    reply: oneshot::Sender<DispatchReply>,
}

/// Per-job retry bookkeeping, dropped once the job settles.
#[derive(Debug, Default)]
struct DispatchAttempt {
    retry_count: u32,
    last_error: Option<DispatchError>,
    last_response_status: Option<u16>,
}

#[derive(Default)]
struct DispatchState {
    pending: VecDeque<QueuedJob>,
    processing: bool,
}

/// A point on tokio's clock, so the limiter follows paused time in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TokioInstant(Instant);

impl Add<Nanos> for TokioInstant {
    type Output = Self;

    fn add(self, other: Nanos) -> Self {
        Self(self.0 + Duration::from(other))
    }
}

impl Reference for TokioInstant {
    fn duration_since(&self, earlier: Self) -> Nanos {
        Nanos::from(self.0.saturating_duration_since(earlier.0))
    }

    fn saturating_sub(&self, duration: Nanos) -> Self {
        Self(self.0.checked_sub(Duration::from(duration)).unwrap_or(self.0))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TokioClock;

impl Clock for TokioClock {
    type Instant = TokioInstant;

    fn now(&self) -> Self::Instant {
        TokioInstant(Instant::now())
    }
}

type DispatchLimiter =
    RateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<TokioInstant>>;

/// One dispatch per `min_interval`, no bursts. `None` when the interval is zero.
fn dispatch_limiter(min_interval: Duration) -> Option<DispatchLimiter> {
    let quota = Quota::with_period(min_interval)?.allow_burst(NonZeroU32::MIN);
    Some(RateLimiter::direct_with_clock(quota, TokioClock))
}

struct Shared {
    transport: Arc<dyn HttpTransport>,
    settings: RateLimitSettings,
    limiter: Option<DispatchLimiter>,
    state: Mutex<DispatchState>,
}

/// Handle to a queued request.
pub struct PendingDispatch {
    id: Uuid,
    reply: oneshot::Receiver<DispatchReply>,
}

impl PendingDispatch {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the job to settle. Dropping the handle before dispatch cancels the job.
    pub async fn wait(self) -> DispatchReply {
        self.reply.await.unwrap_or(Err(DispatchFailure {
            error: DispatchError::Closed,
            retries: 0,
        }))
    }
}

/// Priority queue in front of one globally throttled provider.
#[derive(Clone)]
pub struct RateLimitedDispatchQueue {
    shared: Arc<Shared>,
}

impl RateLimitedDispatchQueue {
    pub fn new(transport: Arc<dyn HttpTransport>, settings: RateLimitSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                settings,
                limiter: dispatch_limiter(settings.min_interval),
                state: Mutex::new(DispatchState::default()),
            }),
        }
    }

    pub fn settings(&self) -> RateLimitSettings {
        self.shared.settings
    }

    /// Jobs waiting to be dispatched.
    pub fn pending(&self) -> usize {
        self.shared
            .state
            .lock()
            .expect("dispatch state lock poisoned")
            .pending
            .len()
    }

    /// Inserts a job and starts the processing task if it is idle.
    ///
    /// Higher priorities go first; equal priorities keep insertion order.
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, request: HttpRequest, priority: Priority) -> PendingDispatch {
        let (reply_tx, reply_rx) = oneshot::channel();
        let id = Uuid::new_v4();
        let job = QueuedJob {
            id,
            request,
            priority,
            enqueued_at: Instant::now(),
            reply: reply_tx,
        };

        let start_processing = {
            let mut state = self
                .shared
                .state
                .lock()
                .expect("dispatch state lock poisoned");
            let position = state
                .pending
                .iter()
                .position(|queued| queued.priority < priority)
                .unwrap_or(state.pending.len());
            state.pending.insert(position, job);
            !std::mem::replace(&mut state.processing, true)
        };

        if start_processing {
            tokio::spawn(Self::process(Arc::clone(&self.shared)));
        }
        PendingDispatch { id, reply: reply_rx }
    }

    /// Enqueues a request and waits for its response.
    pub async fn add(&self, request: HttpRequest, priority: Priority) -> DispatchReply {
        self.enqueue(request, priority).wait().await
    }

    async fn process(shared: Arc<Shared>) {
        loop {
            let job = {
                let mut state = shared.state.lock().expect("dispatch state lock poisoned");
                match state.pending.pop_front() {
                    Some(job) => job,
                    None => {
                        state.processing = false;
                        return;
                    }
                }
            };

            if job.reply.is_closed() {
                debug!("Dispatch[{}]: waiter gone, skipping {}", job.id, job.request.url);
                continue;
            }

            debug!(
                "Dispatch[{}]: {:?} priority, queued for {:?}",
                job.id,
                job.priority,
                job.enqueued_at.elapsed()
            );
            let outcome = shared.dispatch_with_retries(&job).await;
            let _ = job.reply.send(outcome);
        }
    }
}

impl Shared {
    async fn wait_for_dispatch_slot(&self) {
        let Some(limiter) = self.limiter.as_ref() else {
            return;
        };
        while let Err(not_until) = limiter.check() {
            let wait = not_until.wait_time_from(TokioClock.now());
            // Never a zero sleep, which would not advance a paused clock.
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    async fn dispatch_once(&self, request: &HttpRequest) -> Result<HttpResponse, DispatchError> {
        let limit = self.settings.request_timeout;
        match tokio::time::timeout(limit, self.transport.get(request)).await {
            Ok(result) => result.and_then(ensure_success),
            Err(_) => Err(DispatchError::Timeout(limit)),
        }
    }

    async fn dispatch_with_retries(&self, job: &QueuedJob) -> DispatchReply {
        let mut attempt = DispatchAttempt::default();
        loop {
            self.wait_for_dispatch_slot().await;
            match self.dispatch_once(&job.request).await {
                Ok(mut response) => {
                    response.retries = attempt.retry_count;
                    if attempt.retry_count > 0 {
                        info!(
                            "Dispatch[{}]: succeeded after {} retries (last status {:?}, last error {:?})",
                            job.id,
                            attempt.retry_count,
                            attempt.last_response_status,
                            attempt.last_error
                        );
                    }
                    return Ok(response);
                }
                Err(error) => {
                    if let DispatchError::Status(code) = error {
                        attempt.last_response_status = Some(code);
                    }
                    let decision = classify(&error);
                    if !decision.retry || attempt.retry_count >= self.settings.retry.max_retries {
                        warn!(
                            "Dispatch[{}]: giving up on {} after {} retries ({}): {}",
                            job.id, job.request.url, attempt.retry_count, decision.reason, error
                        );
                        return Err(DispatchFailure {
                            error,
                            retries: attempt.retry_count,
                        });
                    }
                    attempt.retry_count += 1;
                    let backoff = self.settings.retry.delay(attempt.retry_count);
                    info!(
                        "Dispatch[{}]: attempt {} failed ({}), retrying in {:?}",
                        job.id, attempt.retry_count, decision.reason, backoff
                    );
                    attempt.last_error = Some(error);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
