// Bounded background dispatcher for outbound work
//
// Every submitted unit runs on its own tokio task, but at most `limit` of
// them do work at once; the rest wait for a permit.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    limit: usize,
}

impl Dispatcher {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    /// Spawn `task` once a permit is free. Must be called within a tokio runtime.
    pub fn submit<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            // The semaphore is never closed, so a permit always arrives
            let _permit = permits.acquire_owned().await.ok();
            let _slot = InFlightGuard::enter(in_flight);
            task.await
        })
    }

    /// Units currently doing work
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_returns_task_output() {
        let dispatcher = Dispatcher::default();
        let handle = dispatcher.submit(async { 40 + 2 });
        assert_eq!(handle.await.unwrap(), 42);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_zero_limit_clamped() {
        assert_eq!(Dispatcher::new(0).limit(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bounded() {
        let dispatcher = Dispatcher::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                dispatcher.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
        assert_eq!(dispatcher.in_flight(), 0);
    }
}
