//! Parallelization Pattern
//!
//! Fans a sequence of items out to a worker concurrently and joins on all of
//! them. Workers run as futures on the calling task (no threads are spawned),
//! each with its own inputs, so there is nothing shared to lock. Results are
//! always returned in input order regardless of completion order.
//!
//! [`Parallelizer::run`] and [`Parallelizer::map_reduce`] fail fast: the first
//! worker error aborts the join and drops the remaining in-flight workers.
//! [`Parallelizer::run_settled`] waits for everything and reports each outcome.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use std::time::Instant;

use super::execution::{StageExt, WorkflowResult};

/// Parallel workflow configuration
#[derive(Debug, Clone, Default)]
pub struct ParallelConfig {
    /// Maximum concurrent workers (`None` runs every item at once)
    pub max_concurrency: Option<usize>,
}

/// Concurrent fan-out with an order-preserving join
#[derive(Debug, Clone)]
pub struct Parallelizer {
    name: String,
    config: ParallelConfig,
}

impl Default for Parallelizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Parallelizer {
    pub fn new() -> Self {
        Self {
            name: "parallelizer".to_string(),
            config: ParallelConfig::default(),
        }
    }

    /// Set the workflow name used in errors and logs
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Limit the number of workers in flight
    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.config.max_concurrency = limit.map(|l| l.max(1));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn width(&self, items: usize) -> usize {
        self.config.max_concurrency.unwrap_or(items).max(1)
    }

    /// Apply `worker` to every item concurrently; `result[i]` comes from `items[i]`.
    ///
    /// # Errors
    ///
    /// The first worker failure, annotated with the failing item's index.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, worker: F) -> WorkflowResult<Vec<R>>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = WorkflowResult<R>>,
    {
        let count = items.len();
        let width = self.width(count);
        let name = self.name.as_str();
        let start = Instant::now();

        tracing::debug!(workflow = %name, items = count, width, "Fanning out");

        let mut results: Vec<(usize, R)> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| {
                let fut = worker(item);
                async move {
                    fut.await
                        .map(|r| (index, r))
                        .stage(name, format!("item {}", index))
                }
            })
            .buffer_unordered(width)
            .try_collect()
            .await?;

        results.sort_by_key(|(index, _)| *index);

        tracing::debug!(
            workflow = %name,
            items = count,
            duration_ms = start.elapsed().as_millis() as u64,
            "Fan-out joined"
        );

        Ok(results.into_iter().map(|(_, r)| r).collect())
    }

    /// Run every worker to completion and return each outcome in input order
    pub async fn run_settled<T, R, F, Fut>(&self, items: Vec<T>, worker: F) -> Vec<WorkflowResult<R>>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = WorkflowResult<R>>,
    {
        let width = self.width(items.len());
        let name = self.name.as_str();

        stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| {
                let fut = worker(item);
                async move { fut.await.stage(name, format!("item {}", index)) }
            })
            .buffered(width)
            .collect()
            .await
    }

    /// Fan out with `worker`, then fold all results with `aggregate`.
    ///
    /// Aggregation only happens when every worker succeeded.
    pub async fn map_reduce<T, F, Fut, A, AFut>(
        &self,
        items: Vec<T>,
        worker: F,
        aggregate: A,
    ) -> WorkflowResult<String>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = WorkflowResult<String>>,
        A: FnOnce(Vec<String>) -> AFut,
        AFut: Future<Output = WorkflowResult<String>>,
    {
        let results = self.run(items, worker).await?;
        aggregate(results).await.stage(&self.name, "aggregate")
    }
}
