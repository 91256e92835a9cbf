//! FIFO job queue that caps how many jobs run at once.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;

/// Increments a counter for as long as it is alive.
struct CounterGuard<'a>(&'a AtomicUsize);

impl<'a> CounterGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs at most `max_concurrent` jobs at a time, admitting waiters in arrival order.
///
/// One job failing never affects the others: `add` settles with exactly the
/// outcome of the job it was handed.
pub struct BoundedConcurrencyQueue {
    max_concurrent: usize,
    job_timeout: Option<Duration>,
    // tokio's semaphore is fair, which gives FIFO admission.
    permits: Semaphore,
    running: AtomicUsize,
    queued: AtomicUsize,
}

impl BoundedConcurrencyQueue {
    pub fn new(max_concurrent: usize, job_timeout: Option<Duration>) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            max_concurrent,
            job_timeout,
            permits: Semaphore::new(max_concurrent),
            running: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
        }
    }

    /// Waits for a free slot, then runs `job`.
    ///
    /// Fails only with [`DispatchError::Timeout`] when a job timeout is configured
    /// and the job overruns it. Time spent waiting for a slot does not count.
    pub async fn add<F, Fut, T>(&self, job: F) -> Result<T, DispatchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.add_cancellable(&CancellationToken::new(), job).await
    }

    /// Like [`Self::add`], but gives up its place in line once `cancel` fires.
    ///
    /// A job that already holds a slot runs to completion; `job` is never
    /// called after cancellation.
    pub async fn add_cancellable<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        job: F,
    ) -> Result<T, DispatchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let permit = {
            let _waiting = CounterGuard::enter(&self.queued);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
                permit = self.permits.acquire() => permit.map_err(|_| DispatchError::Closed)?,
            }
        };
        let _running = CounterGuard::enter(&self.running);
        let outcome = match self.job_timeout {
            Some(limit) => tokio::time::timeout(limit, job())
                .await
                .map_err(|_| DispatchError::Timeout(limit)),
            None => Ok(job().await),
        };
        drop(permit);
        outcome
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Jobs currently executing.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Jobs waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use futures::future::join_all;
    use tokio_util::sync::CancellationToken;

    use super::BoundedConcurrencyQueue;
    use crate::error::DispatchError;

    #[tokio::test(start_paused = true)]
    async fn test_running_never_exceeds_max_concurrent() {
        let queue = &BoundedConcurrencyQueue::new(3, None);
        let active = &AtomicUsize::new(0);
        let peak = &AtomicUsize::new(0);

        let jobs = (0..10u64).map(move |index| {
            queue.add(move || async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                assert!(queue.running() <= 3);
                tokio::time::sleep(Duration::from_millis(50 + index * 10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                index
            })
        });
        let results = join_all(jobs).await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(
            results.into_iter().map(|r| r.expect("no timeout")).collect::<Vec<_>>(),
            (0..10).collect::<Vec<_>>()
        );
        assert_eq!(queue.running(), 0);
        assert_eq!(queue.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_is_first_in_first_out() {
        let queue = &BoundedConcurrencyQueue::new(1, None);
        let started = &Mutex::new(Vec::new());

        let jobs = (0..5).map(move |index| {
            queue.add(move || async move {
                started.lock().expect("start log lock poisoned").push(index);
                tokio::time::sleep(Duration::from_millis(10)).await;
            })
        });
        join_all(jobs).await;

        assert_eq!(
            *started.lock().expect("start log lock poisoned"),
            vec![0, 1, 2, 3, 4]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_does_not_block_others() {
        let queue = Arc::new(BoundedConcurrencyQueue::new(1, None));
        let failing = queue.add(|| async { Err::<u32, &str>("provider exploded") });
        let succeeding = queue.add(|| async { Ok::<u32, &str>(7) });
        let (failed, succeeded) = tokio::join!(failing, succeeding);

        assert_eq!(failed.expect("no timeout"), Err("provider exploded"));
        assert_eq!(succeeded.expect("no timeout"), Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_timeout_frees_the_slot() {
        let queue = BoundedConcurrencyQueue::new(1, Some(Duration::from_secs(1)));
        let hanging = queue.add(|| std::future::pending::<u32>());
        let next = queue.add(|| async { 5u32 });
        let (hung, ran) = tokio::join!(hanging, next);

        assert_eq!(hung, Err(DispatchError::Timeout(Duration::from_secs(1))));
        assert_eq!(ran, Ok(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counters_track_waiting_jobs() {
        let queue = Arc::new(BoundedConcurrencyQueue::new(1, None));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let blocker = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .add(|| async move {
                        let _ = release_rx.await;
                    })
                    .await
            })
        };
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.add(|| async { 1u8 }).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(queue.running(), 1);
        assert_eq!(queue.queued(), 1);

        release_tx.send(()).expect("blocker still waiting");
        blocker.await.expect("blocker task").expect("no timeout");
        assert_eq!(waiter.await.expect("waiter task"), Ok(1));
        assert_eq!(queue.running(), 0);
        assert_eq!(queue.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_never_runs_its_job() {
        let queue = Arc::new(BoundedConcurrencyQueue::new(1, None));
        let cancel = CancellationToken::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let holder = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .add(|| tokio::time::sleep(Duration::from_millis(100)))
                    .await
            })
        };
        let waiter = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            let ran = Arc::clone(&ran);
            tokio::spawn(async move {
                queue
                    .add_cancellable(&cancel, || async move {
                        ran.fetch_add(1, Ordering::SeqCst);
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.queued(), 1);

        cancel.cancel();
        assert_eq!(waiter.await.expect("waiter task"), Err(DispatchError::Cancelled));
        assert_eq!(queue.queued(), 0);
        holder.await.expect("holder task").expect("no timeout");
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(queue.add(|| async { 3u8 }).await, Ok(3));
    }
}
