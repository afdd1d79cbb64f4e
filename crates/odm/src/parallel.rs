//! Parallel query coordinator.
//!
//! Runs a batch of independent tasks concurrently on the tokio runtime with
//! a bounded number in flight, and reports one outcome per task in
//! submission order. A failing or panicking task never stops its siblings
//! and never disappears from the results.
//!
//! # Pool Size
//!
//! At most `min(tasks, 2 * available_parallelism + 1)` tasks run at once,
//! further capped by `parallel.max_workers` when configured.
//!
//! # Example
//!
//! ```
//! use helios_odm::config::ParallelConfig;
//! use helios_odm::parallel::{ParallelExecutor, ParallelTask};
//!
//! # tokio::runtime::Builder::new_multi_thread().build().unwrap().block_on(async {
//! let executor = ParallelExecutor::new(&ParallelConfig::default());
//! let tasks = vec![
//!     ParallelTask::new("one", async { Ok(1) }),
//!     ParallelTask::new("two", async { Ok(2) }),
//! ];
//! let results = executor.execute_all(tasks).await;
//! assert_eq!(results.into_results().unwrap(), vec![1, 2]);
//! # });
//! ```

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::ParallelConfig;
use crate::error::{StorageError, StorageResult, TaskError, TaskFailure};

/// One independent unit of work submitted to the coordinator.
pub struct ParallelTask<T> {
    label: String,
    future: BoxFuture<'static, StorageResult<T>>,
}

impl<T> ParallelTask<T> {
    /// Wraps a future. The label identifies the task in failure reports.
    pub fn new<F>(label: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        Self {
            label: label.into(),
            future: Box::pin(future),
        }
    }

    /// Returns the label.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<T> fmt::Debug for ParallelTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelTask")
            .field("label", &self.label)
            .finish()
    }
}

/// The outcome of one task.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    /// The task produced a value.
    Completed(T),
    /// The task returned an error or panicked.
    Failed(StorageError),
    /// The batch was cancelled before the task finished.
    Cancelled,
}

impl<T> TaskOutcome<T> {
    /// Returns the value of a completed task.
    pub fn value(&self) -> Option<&T> {
        match self {
            TaskOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the error of a failed task.
    pub fn error(&self) -> Option<&StorageError> {
        match self {
            TaskOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Returns `true` if the task produced a value.
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }
}

/// Results of a batch, one slot per task in submission order.
#[derive(Debug)]
pub struct BatchResults<T> {
    slots: Vec<(String, TaskOutcome<T>)>,
    pool_size: usize,
    undersized: bool,
}

impl<T> BatchResults<T> {
    /// Returns the number of tasks.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` for an empty batch.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the outcome of the task at `index`.
    pub fn outcome(&self, index: usize) -> Option<&TaskOutcome<T>> {
        self.slots.get(index).map(|(_, outcome)| outcome)
    }

    /// Iterates over `(label, outcome)` in submission order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TaskOutcome<T>)> {
        self.slots.iter().map(|(label, outcome)| (label.as_str(), outcome))
    }

    /// Returns the number of tasks that were allowed to run at once.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns `true` if the batch had fewer than two tasks.
    pub fn is_undersized(&self) -> bool {
        self.undersized
    }

    /// Returns `true` if every task completed.
    pub fn all_completed(&self) -> bool {
        self.slots.iter().all(|(_, outcome)| outcome.is_completed())
    }

    /// Describes every failed task.
    pub fn failures(&self) -> Vec<TaskFailure> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, (label, outcome))| {
                outcome.error().map(|err| TaskFailure {
                    index,
                    label: label.clone(),
                    message: err.to_string(),
                })
            })
            .collect()
    }

    /// Returns the indexes of cancelled tasks.
    pub fn cancelled(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, (_, outcome))| matches!(outcome, TaskOutcome::Cancelled))
            .map(|(index, _)| index)
            .collect()
    }

    /// Returns every outcome in submission order.
    pub fn into_outcomes(self) -> Vec<TaskOutcome<T>> {
        self.slots.into_iter().map(|(_, outcome)| outcome).collect()
    }

    /// Returns the values in submission order if every task completed.
    ///
    /// # Errors
    ///
    /// * `TaskError::Aggregate` - Naming every failed task
    /// * `TaskError::Cancelled` - If the batch was cancelled
    pub fn into_results(self) -> StorageResult<Vec<T>> {
        let failures = self.failures();
        if !failures.is_empty() {
            return Err(TaskError::Aggregate {
                total: self.slots.len(),
                failures,
            }
            .into());
        }
        let unfinished = self.cancelled();
        if !unfinished.is_empty() {
            return Err(TaskError::Cancelled { unfinished }.into());
        }
        Ok(self
            .slots
            .into_iter()
            .filter_map(|(_, outcome)| match outcome {
                TaskOutcome::Completed(value) => Some(value),
                _ => None,
            })
            .collect())
    }
}

/// Runs batches of tasks with a bounded number in flight.
#[derive(Debug, Clone, Default)]
pub struct ParallelExecutor {
    max_workers: Option<usize>,
}

impl ParallelExecutor {
    /// Creates an executor from configuration.
    pub fn new(config: &ParallelConfig) -> Self {
        Self {
            max_workers: config.max_workers,
        }
    }

    /// Returns the number of tasks allowed in flight for a batch.
    pub fn pool_size(&self, task_count: usize) -> usize {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let size = task_count.min(2 * parallelism + 1);
        match self.max_workers {
            Some(max) => size.min(max.max(1)),
            None => size,
        }
    }

    /// Runs every task and waits for all of them.
    pub async fn execute_all<T>(&self, tasks: Vec<ParallelTask<T>>) -> BatchResults<T>
    where
        T: Send + 'static,
    {
        self.execute_all_until(tasks, futures::future::pending()).await
    }

    /// Runs every task until all finish or `cancel` resolves.
    ///
    /// On cancellation outstanding tasks are aborted and awaited before
    /// returning. Results of tasks that finished are kept; the rest are
    /// marked [`TaskOutcome::Cancelled`].
    pub async fn execute_all_until<T, C>(
        &self,
        tasks: Vec<ParallelTask<T>>,
        cancel: C,
    ) -> BatchResults<T>
    where
        T: Send + 'static,
        C: Future<Output = ()>,
    {
        let total = tasks.len();
        let undersized = total < 2;
        if undersized {
            warn!(tasks = total, "Parallel batch has fewer than two tasks; run the query directly");
        }

        let pool_size = self.pool_size(total);
        let semaphore = Arc::new(Semaphore::new(pool_size.max(1)));
        let mut labels = Vec::with_capacity(total);
        let mut outcomes: Vec<Option<TaskOutcome<T>>> = (0..total).map(|_| None).collect();
        let mut set = JoinSet::new();

        for (index, task) in tasks.into_iter().enumerate() {
            labels.push(task.label);
            let semaphore = Arc::clone(&semaphore);
            let future = task.future;
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = AssertUnwindSafe(future).catch_unwind().await;
                (index, result)
            });
        }

        let mut cancelled = false;
        tokio::pin!(cancel);
        loop {
            tokio::select! {
                joined = set.join_next() => match joined {
                    Some(Ok((index, result))) => outcomes[index] = Some(into_outcome(index, result)),
                    Some(Err(err)) => warn!(error = %err, "Parallel task ended abnormally"),
                    None => break,
                },
                _ = &mut cancel => {
                    cancelled = true;
                    set.abort_all();
                    while let Some(joined) = set.join_next().await {
                        if let Ok((index, result)) = joined {
                            outcomes[index] = Some(into_outcome(index, result));
                        }
                    }
                    break;
                }
            }
        }

        let slots: Vec<_> = labels
            .into_iter()
            .zip(outcomes)
            .enumerate()
            .map(|(index, (label, outcome))| {
                let outcome = outcome.unwrap_or_else(|| {
                    if cancelled {
                        TaskOutcome::Cancelled
                    } else {
                        TaskOutcome::Failed(
                            TaskError::Panicked {
                                index,
                                message: "task ended without a result".to_string(),
                            }
                            .into(),
                        )
                    }
                });
                (label, outcome)
            })
            .collect();

        let results = BatchResults {
            slots,
            pool_size,
            undersized,
        };
        debug!(
            tasks = total,
            pool_size,
            failed = results.failures().len(),
            cancelled = results.cancelled().len(),
            "Parallel batch finished"
        );
        results
    }
}

fn into_outcome<T>(
    index: usize,
    result: Result<StorageResult<T>, Box<dyn Any + Send>>,
) -> TaskOutcome<T> {
    match result {
        Ok(Ok(value)) => TaskOutcome::Completed(value),
        Ok(Err(err)) => {
            warn!(index, error = %err, "Parallel task failed");
            TaskOutcome::Failed(err)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(index, message = %message, "Parallel task panicked");
            TaskOutcome::Failed(TaskError::Panicked { index, message }.into())
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
