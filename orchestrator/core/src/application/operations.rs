// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bounded pool for asynchronous lifecycle operations.
//!
//! Submission never blocks the caller: work items are spawned immediately and
//! wait for a concurrency permit inside the task. A [`TaskTracker`] doubles as
//! the completion barrier used at shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Default ceiling on waiting for in-flight operations at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, thiserror::Error)]
#[error("operation pool is shut down")]
pub struct PoolClosed;

pub struct OperationPool {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl OperationPool {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    /// Whether new work is still accepted.
    pub fn is_open(&self) -> bool {
        !self.tracker.is_closed()
    }

    pub fn submit<F>(&self, work: F) -> Result<(), PoolClosed>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(PoolClosed);
        }
        let permits = self.permits.clone();
        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            work.await;
        });
        Ok(())
    }

    /// Operations submitted and not yet finished, queued ones included.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stops accepting work and waits for in-flight operations, at most
    /// `timeout`. Returns `false` when the ceiling was hit.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, "waiting for in-flight operations");
        }
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    pending = self.tracker.len(),
                    timeout_secs = timeout.as_secs(),
                    "in-flight operations did not finish before shutdown ceiling"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = OperationPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert_eq!(pool.in_flight(), 0);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_work() {
        let pool = OperationPool::new(1);
        assert!(pool.shutdown(Duration::from_secs(1)).await);
        assert!(!pool.is_open());
        assert!(pool.submit(async {}).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ceiling() {
        let pool = OperationPool::new(1);
        pool.submit(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        })
        .unwrap();
        assert!(!pool.shutdown(Duration::from_secs(60)).await);
    }
}
