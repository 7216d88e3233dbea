//! Bounded concurrency and AIMD backpressure.
//!
//! A semaphore-gated worker pool sized to configured parallelism, with a
//! concurrency limit that grows additively and shrinks multiplicatively in
//! response to observed latency and error rate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Caps in-flight work at a limit that grows by one on a healthy window and
/// halves on a window with elevated errors or latency.
pub struct BoundedExecutor {
    semaphore: Arc<Semaphore>,
    limit: AtomicUsize,
    floor: usize,
    ceiling: usize,
}

pub struct Permit<'a> {
    _inner: tokio::sync::SemaphorePermit<'a>,
}

impl BoundedExecutor {
    pub fn new(initial: usize, floor: usize, ceiling: usize) -> Self {
        let initial = initial.clamp(floor, ceiling);
        Self {
            semaphore: Arc::new(Semaphore::new(initial)),
            limit: AtomicUsize::new(initial),
            floor,
            ceiling,
        }
    }

    pub async fn acquire(&self) -> Permit<'_> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("semaphore is never closed");
        Permit { _inner: permit }
    }

    pub fn current_limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// Called once per observation window (e.g. every N completed jobs, or
    /// every few seconds under load).
    pub fn report_window(&self, error_rate: f64, p95_latency_exceeded: bool) {
        let current = self.limit.load(Ordering::Relaxed);
        if error_rate > 0.1 || p95_latency_exceeded {
            let reduced = (current / 2).max(self.floor);
            self.shrink_to(reduced);
        } else if current < self.ceiling {
            self.grow_by(1);
        }
    }

    fn grow_by(&self, n: usize) {
        let new_limit = (self.limit.load(Ordering::Relaxed) + n).min(self.ceiling);
        let delta = new_limit - self.limit.swap(new_limit, Ordering::Relaxed);
        if delta > 0 {
            self.semaphore.add_permits(delta);
        }
    }

    fn shrink_to(&self, new_limit: usize) {
        let old = self.limit.swap(new_limit, Ordering::Relaxed);
        if new_limit < old {
            let to_remove = old - new_limit;
            // Permits are removed lazily as they're returned; forget() on
            // acquisition is the standard tokio idiom for shrinking a
            // semaphore's capacity.
            for _ in 0..to_remove {
                if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
                    permit.forget();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grows_on_healthy_window() {
        let executor = BoundedExecutor::new(2, 1, 8);
        executor.report_window(0.0, false);
        assert_eq!(executor.current_limit(), 3);
    }

    #[tokio::test]
    async fn halves_on_unhealthy_window() {
        let executor = BoundedExecutor::new(8, 1, 16);
        executor.report_window(0.5, false);
        assert_eq!(executor.current_limit(), 4);
    }

    #[tokio::test]
    async fn never_shrinks_below_floor() {
        let executor = BoundedExecutor::new(2, 2, 8);
        executor.report_window(1.0, false);
        assert_eq!(executor.current_limit(), 2);
    }
}
