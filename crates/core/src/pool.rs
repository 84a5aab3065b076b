//! Bounded task pool.
//!
//! Runs a fixed list of tasks with at most `concurrency` of them in flight,
//! and yields exactly one result per task. A task that panics yields a
//! [`TaskFault`] instead of taking the pool down.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use thiserror::Error;
use tokio::task::JoinSet;

/// Why a task produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFault {
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was aborted (pool shut down or runtime stopping).
    #[error("task was lost before settling")]
    Lost,
}

type Task<T> = Box<dyn FnOnce() -> BoxFuture<'static, T> + Send>;

/// Concurrency ceiling for a set of tasks.
#[derive(Debug, Clone, Copy)]
pub struct TaskPool {
    concurrency: usize,
}

impl TaskPool {
    /// A pool running at most `concurrency` tasks at once (at least one).
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Start running `tasks`. Nothing is spawned until the first
    /// [`PoolRun::next`] call.
    pub fn start<T, F, Fut>(&self, tasks: Vec<F>) -> PoolRun<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let pending: VecDeque<(usize, Task<T>)> = tasks
            .into_iter()
            .enumerate()
            .map(|(index, task)| {
                let task: Task<T> = Box::new(move || task().boxed());
                (index, task)
            })
            .collect();

        PoolRun {
            total: pending.len(),
            pending,
            running: JoinSet::new(),
            concurrency: self.concurrency,
            settled: 0,
        }
    }

    /// Run every task to completion. Results come back in input order.
    pub async fn run_all<T, F, Fut>(&self, tasks: Vec<F>) -> Vec<Result<T, TaskFault>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        if tasks.is_empty() {
            return Vec::new();
        }

        let mut run = self.start(tasks);
        let mut results: Vec<Option<Result<T, TaskFault>>> =
            std::iter::repeat_with(|| None).take(run.total()).collect();

        while let Some((index, result)) = run.next().await {
            results[index] = Some(result);
        }

        results
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(TaskFault::Lost)))
            .collect()
    }
}

/// An in-progress pool run. Yields results in settlement order.
pub struct PoolRun<T> {
    pending: VecDeque<(usize, Task<T>)>,
    running: JoinSet<(usize, Result<T, TaskFault>)>,
    concurrency: usize,
    total: usize,
    settled: usize,
}

impl<T: Send + 'static> PoolRun<T> {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn active(&self) -> usize {
        self.running.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn settled(&self) -> usize {
        self.settled
    }

    /// Wait for the next task to settle, topping the pool back up to the
    /// ceiling. Returns `None` once every task has settled.
    pub async fn next(&mut self) -> Option<(usize, Result<T, TaskFault>)> {
        self.fill();

        loop {
            match self.running.join_next().await? {
                Ok((index, result)) => {
                    self.settled += 1;
                    self.fill();
                    return Some((index, result));
                }
                Err(e) => {
                    // Panics are caught inside the task, so only aborts land here
                    tracing::warn!(error = %e, "Pool task aborted before settling");
                    self.fill();
                }
            }
        }
    }

    /// Drop tasks not yet started and abort the running ones, waiting until
    /// they are gone.
    pub async fn shutdown(mut self) {
        let dropped = self.pending.len();
        self.pending.clear();
        let aborted = self.running.len();
        self.running.shutdown().await;
        if dropped + aborted > 0 {
            tracing::debug!(dropped, aborted, "Pool shut down");
        }
    }

    fn fill(&mut self) {
        while self.running.len() < self.concurrency {
            let Some((index, task)) = self.pending.pop_front() else {
                break;
            };
            let fut = task();
            self.running.spawn(async move {
                let result = AssertUnwindSafe(fut)
                    .catch_unwind()
                    .await
                    .map_err(|panic| TaskFault::Panicked(panic_message(panic.as_ref())));
                (index, result)
            });
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
