//! Worker pools for the two scheduling levels.
//!
//! The outer pool runs one task per forecast-hour-file and each of those
//! tasks opens an inner pool for its conversion jobs. Workers of a
//! [`Nesting::Restricted`] pool may not open pools themselves, so the
//! outer pool must be created [`Nesting::NonRestricted`].

use crate::error::{ConversionError, Result};
use futures::stream::{self, StreamExt};
use std::future::Future;
use tokio::task;
use tracing::{debug, error};

tokio::task_local! {
    static RESTRICTED_WORKER: bool;
}

/// Whether a pool's workers may create pools of their own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nesting {
    Restricted,
    NonRestricted,
}

/// Bounded set of tokio workers draining a list of tasks
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: String,
    workers: usize,
    nesting: Nesting,
}

impl WorkerPool {
    /// Create a pool; fails inside a worker of a restricted pool
    pub fn new(name: impl Into<String>, workers: usize, nesting: Nesting) -> Result<Self> {
        let name = name.into();
        if in_restricted_worker() {
            return Err(ConversionError::NestedPool { pool: name });
        }
        Ok(Self {
            name,
            workers: workers.max(1),
            nesting,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `job` over every item with at most `workers` tasks in flight.
    ///
    /// Results come back in completion order. A task that panics is
    /// reported as [`ConversionError::WorkerFailed`] without affecting
    /// its siblings.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, job: F) -> Vec<Result<R>>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Send + 'static,
    {
        let restricted = self.nesting == Nesting::Restricted;
        debug!(
            "Pool '{}' running {} tasks on {} workers",
            self.name,
            items.len(),
            self.workers
        );

        stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| {
                let handle = task::spawn(RESTRICTED_WORKER.scope(restricted, job(item)));
                let name = self.name.clone();
                async move {
                    handle.await.unwrap_or_else(|e| {
                        error!("Task {} of pool '{}' did not complete: {}", index, name, e);
                        Err(ConversionError::WorkerFailed {
                            task: format!("{}[{}]", name, index),
                            reason: e.to_string(),
                        })
                    })
                }
            })
            .buffer_unordered(self.workers)
            .collect()
            .await
    }
}

/// True while running inside a worker of a restricted pool
pub fn in_restricted_worker() -> bool {
    RESTRICTED_WORKER.try_with(|restricted| *restricted).unwrap_or(false)
}

/// Run a CPU-bound closure on the blocking thread pool
pub async fn run_blocking<R, F>(label: String, f: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| ConversionError::WorkerFailed {
            task: label,
            reason: e.to_string(),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_runs_every_item() {
        let pool = WorkerPool::new("squares", 3, Nesting::Restricted).unwrap();
        let mut results: Vec<u32> = pool
            .run((1..=5).collect(), |n: u32| async move { Ok(n * n) })
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        results.sort_unstable();
        assert_eq!(results, vec![1, 4, 9, 16, 25]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new("bounded", 2, Nesting::Restricted).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        pool.run((0..8).collect(), |_: u32| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_restricted_workers_cannot_nest() {
        let outer = WorkerPool::new("outer", 2, Nesting::Restricted).unwrap();
        let results = outer
            .run(vec![()], |_| async move {
                WorkerPool::new("inner", 2, Nesting::Restricted).map(|_| ())
            })
            .await;
        assert!(matches!(
            results[0],
            Err(ConversionError::NestedPool { ref pool }) if pool == "inner"
        ));
    }

    #[tokio::test]
    async fn test_non_restricted_workers_can_nest() {
        let outer = WorkerPool::new("outer", 2, Nesting::NonRestricted).unwrap();
        let results = outer
            .run(vec![2usize, 3], |n| async move {
                let inner = WorkerPool::new("inner", n, Nesting::Restricted)?;
                let done = inner
                    .run((0..n).collect(), |i: usize| async move {
                        assert!(in_restricted_worker());
                        Ok(i)
                    })
                    .await;
                Ok(done.len())
            })
            .await;

        let mut counts: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
        counts.sort_unstable();
        assert_eq!(counts, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_panicking_task_is_contained() {
        let pool = WorkerPool::new("panics", 2, Nesting::Restricted).unwrap();
        let results = pool
            .run(vec![0u32, 1, 2], |n| async move {
                if n == 1 {
                    panic!("job {} exploded", n);
                }
                Ok(n)
            })
            .await;

        let failed = results
            .iter()
            .filter(|r| matches!(r, Err(ConversionError::WorkerFailed { .. })))
            .count();
        assert_eq!(failed, 1);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
    }

    #[tokio::test]
    async fn test_blocking_closure_result() {
        let value = run_blocking("sum".to_string(), || Ok(2 + 2)).await.unwrap();
        assert_eq!(value, 4);
        let failed = run_blocking::<(), _>("boom".to_string(), || panic!("boom")).await;
        assert!(matches!(failed, Err(ConversionError::WorkerFailed { .. })));
    }
}
