//! Runs many asynchronous units of work while capping how many are in flight
//! at once, so that a wide fan-out (resolving every member of a collection,
//! loading a directory tree) can't exhaust file handles.

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use futures::FutureExt;

/// Concurrency cap used when none is configured.
pub const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct ThrottledWorker {
    limit: usize,
}

impl Default for ThrottledWorker {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

impl ThrottledWorker {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    /// Runs every task, at most `limit` at a time, and returns their outputs
    /// in the order the tasks were given.
    ///
    /// A new task is started as soon as any running task finishes. Tasks that
    /// can fail should return a `Result`; a failure only fills its own slot.
    pub async fn run<'a, T: Send + 'a>(&self, tasks: Vec<BoxFuture<'a, T>>) -> Vec<T> {
        self.run_with_limit(tasks, self.limit).await
    }

    pub async fn run_with_limit<'a, T: Send + 'a>(
        &self,
        tasks: Vec<BoxFuture<'a, T>>,
        limit: usize,
    ) -> Vec<T> {
        let count = tasks.len();
        let mut results: Vec<(usize, T)> = stream::iter(tasks.into_iter().enumerate())
            .map(|(i, task)| async move { (i, task.await) })
            .buffer_unordered(limit.max(1))
            .collect::<Vec<_>>()
            .boxed()
            .await;

        // buffer_unordered yields in completion order
        results.sort_by_key(|(i, _)| *i);
        debug_assert_eq!(results.len(), count);
        results.into_iter().map(|(_, output)| output).collect()
    }

    /// Runs the tasks and hands the ordered outputs to `on_done` exactly once,
    /// including when there are no tasks at all.
    pub async fn run_then<'a, T, F, R>(&self, tasks: Vec<BoxFuture<'a, T>>, on_done: F) -> R
    where
        T: Send + 'a,
        F: FnOnce(Vec<T>) -> R,
    {
        on_done(self.run(tasks).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_limit_and_keeps_order() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<BoxFuture<'_, usize>> = (0..25)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    // later tasks finish first
                    tokio::time::sleep(Duration::from_millis(30 - i as u64)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    i * 2
                }
                .boxed()
            })
            .collect();

        let results = ThrottledWorker::new(4).run(tasks).await;
        assert_eq!(results, (0..25).map(|i| i * 2).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failures_stay_in_their_slot() {
        let tasks: Vec<BoxFuture<'_, Result<u32, String>>> = vec![
            async { Ok(1) }.boxed(),
            async { Err("boom".to_string()) }.boxed(),
            async { Ok(3) }.boxed(),
        ];
        let results = ThrottledWorker::default().run(tasks).await;
        assert_eq!(results, vec![Ok(1), Err("boom".to_string()), Ok(3)]);
    }

    #[tokio::test]
    async fn empty_task_list_still_completes() {
        let mut calls = 0;
        let len = ThrottledWorker::default()
            .run_then(Vec::<BoxFuture<'_, ()>>::new(), |results| {
                calls += 1;
                results.len()
            })
            .await;
        assert_eq!(len, 0);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn zero_limit_still_runs_every_task() {
        let tasks: Vec<BoxFuture<'_, usize>> = (0..3).map(|i| async move { i }.boxed()).collect();
        assert_eq!(ThrottledWorker::new(0).run(tasks).await, vec![0, 1, 2]);
    }
}
