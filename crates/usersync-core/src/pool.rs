//! Bounded worker pool for sync jobs.
//!
//! Jobs run as tokio tasks, at most `max_concurrent_jobs` at a time. The
//! caller gets a [`SyncHandle`] back immediately and never blocks on it
//! unless it chooses to await. Dropping a handle detaches the job; the
//! underlying store or file operation still runs to completion.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::SyncError;

/// Pool size used when the configured value is zero.
const MIN_JOBS: usize = 1;

/// Bounded executor for sync jobs. Clones share the same limit.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool running at most `max_concurrent_jobs` jobs at once.
    pub fn new(max_concurrent_jobs: usize) -> Self {
        let size = max_concurrent_jobs.max(MIN_JOBS);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Maximum number of concurrent jobs.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Jobs currently holding a slot.
    pub fn busy(&self) -> usize {
        self.size.saturating_sub(self.permits.available_permits())
    }

    /// Queue `job` and return a handle to its result.
    pub fn spawn<F, T>(&self, job: F) -> SyncHandle<T>
    where
        F: Future<Output = Result<T, SyncError>> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let inner = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return Err(SyncError::PoolClosed);
            };
            job.await
        });
        SyncHandle { inner }
    }

    /// Wait until every running and queued job has finished.
    pub async fn drain(&self) {
        let all = u32::try_from(self.size).unwrap_or(u32::MAX);
        if let Ok(permits) = self.permits.acquire_many(all).await {
            drop(permits);
        }
    }

    /// Refuse new jobs. Jobs that already hold a slot keep running; queued
    /// ones resolve to [`SyncError::PoolClosed`].
    pub fn close(&self) {
        self.permits.close();
    }
}

/// Eventual result of a job spawned on a [`WorkerPool`].
#[derive(Debug)]
#[must_use = "dropping a handle detaches the job without observing its result"]
pub struct SyncHandle<T> {
    inner: JoinHandle<Result<T, SyncError>>,
}

impl<T> SyncHandle<T> {
    /// Whether the job has completed.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<T> Future for SyncHandle<T> {
    type Output = Result<T, SyncError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(source) => Err(SyncError::Worker { source }),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn handle_resolves_to_job_result() {
        let pool = WorkerPool::new(2);
        let value = pool.spawn(async { Ok(7_u32) }).await.unwrap();
        assert_eq!(value, 7);

        let err = pool
            .spawn(async { Err::<(), _>(SyncError::PoolClosed) })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::PoolClosed));
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_pool_size() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.spawn(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst).saturating_add(1);
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.busy(), 0);
    }

    #[tokio::test]
    async fn dropped_handle_still_runs_job() {
        let pool = WorkerPool::new(1);
        let done = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&done);
        drop(pool.spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            flag.store(1, Ordering::SeqCst);
            Ok(())
        }));
        // Give the detached job time to acquire its slot before draining.
        tokio::time::sleep(Duration::from_millis(1)).await;
        pool.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_job_surfaces_as_worker_error() {
        let pool = WorkerPool::new(1);
        let fail = true;
        let handle = pool.spawn(async move {
            assert!(!fail, "job blew up");
            Ok(())
        });
        assert!(matches!(handle.await, Err(SyncError::Worker { .. })));
    }

    #[test]
    fn zero_sized_pool_gets_one_slot() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }
}
