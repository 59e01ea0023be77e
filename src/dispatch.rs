//! Batch dispatch of collection children
//!
//! A [`TaskDispatcher`] runs a batch of [`ImportTask`]s and blocks until the
//! whole batch has finished (group join). Two strategies are provided:
//!
//! - [`SequentialDispatcher`]: in-process, one task after the other, in
//!   listing order
//! - [`WorkerPoolDispatcher`]: every task is submitted to a rayon pool and
//!   results are collected over a channel
//!
//! ## Nested collections
//!
//! The join is synchronous: a collection import waits for all of its children
//! while holding its own worker. Children that are themselves collections
//! submit to the same pool and wait in turn. Rayon lets a waiting worker run
//! queued tasks, but a dispatcher backed by a fixed set of blocking workers
//! can be exhausted by a deep or wide hierarchy of nested archives, with every
//! worker waiting on children that cannot be scheduled. No timeout or
//! cancellation is applied here; a hung child blocks its parent.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};

use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;
use tracing::debug;

use crate::context::ImportContext;
use crate::error::ImportError;
use crate::tasks::ImportTask;

#[derive(Debug, Error)]
pub enum TaskFailure {
    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("Task panicked: {0}")]
    Panicked(String),
}

/// Result of one task of a batch.
#[derive(Debug)]
pub struct TaskOutcome {
    /// Position of the task in the submitted batch.
    pub index: usize,
    pub task: &'static str,
    pub result: Result<Vec<PathBuf>, TaskFailure>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Batch submission failed: {0}")]
    Submit(String),

    #[error("Batch join failed after {} of {expected} task(s): {reason}", .completed.len())]
    Join {
        completed: Vec<TaskOutcome>,
        expected: usize,
        reason: String,
    },
}

pub trait TaskDispatcher: Send + Sync {
    fn name(&self) -> &str;

    /// Run every task of the batch, blocking until all have finished.
    ///
    /// Outcomes are returned in batch order. On [`DispatchError::Join`] the
    /// outcomes of the tasks that did run are handed back.
    fn run_batch(
        &self,
        ctx: &ImportContext,
        tasks: &[ImportTask],
    ) -> Result<Vec<TaskOutcome>, DispatchError>;
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one task, containing panics to the task.
pub fn execute_task(ctx: &ImportContext, index: usize, task: &ImportTask) -> TaskOutcome {
    let result = match panic::catch_unwind(AssertUnwindSafe(|| task.run(ctx))) {
        Ok(Ok(paths)) => Ok(paths),
        Ok(Err(e)) => Err(TaskFailure::Import(e)),
        Err(payload) => Err(TaskFailure::Panicked(panic_message(payload.as_ref()))),
    };
    TaskOutcome {
        index,
        task: task.kind.name(),
        result,
    }
}

/// Run the tasks at `indices` in-process, in the given order.
pub fn run_sequential(
    ctx: &ImportContext,
    tasks: &[ImportTask],
    indices: impl IntoIterator<Item = usize>,
) -> Vec<TaskOutcome> {
    indices
        .into_iter()
        .filter_map(|index| tasks.get(index).map(|task| execute_task(ctx, index, task)))
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialDispatcher;

impl TaskDispatcher for SequentialDispatcher {
    fn name(&self) -> &str {
        "sequential"
    }

    fn run_batch(
        &self,
        ctx: &ImportContext,
        tasks: &[ImportTask],
    ) -> Result<Vec<TaskOutcome>, DispatchError> {
        Ok(run_sequential(ctx, tasks, 0..tasks.len()))
    }
}

/// Worker pool built on first use.
pub struct WorkerPoolDispatcher {
    threads: usize,
    pool: Mutex<Option<Arc<ThreadPool>>>,
}

impl WorkerPoolDispatcher {
    /// `threads == 0` uses one worker per CPU.
    pub fn new(threads: usize) -> Self {
        Self {
            threads,
            pool: Mutex::new(None),
        }
    }

    fn pool(&self) -> Result<Arc<ThreadPool>, DispatchError> {
        let mut slot = self.pool.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|i| format!("soma-import-{i}"))
            .build()
            .map_err(|e| DispatchError::Submit(e.to_string()))?;
        let pool = Arc::new(pool);
        *slot = Some(pool.clone());
        Ok(pool)
    }
}

impl TaskDispatcher for WorkerPoolDispatcher {
    fn name(&self) -> &str {
        "worker-pool"
    }

    fn run_batch(
        &self,
        ctx: &ImportContext,
        tasks: &[ImportTask],
    ) -> Result<Vec<TaskOutcome>, DispatchError> {
        let pool = self.pool()?;
        debug!("Submitting {} task(s) to {} worker(s)", tasks.len(), pool.current_num_threads());

        let (tx, rx) = mpsc::channel();
        pool.scope(|scope| {
            for (index, task) in tasks.iter().enumerate() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    // the receiver outlives the scope
                    let _ = tx.send(execute_task(ctx, index, task));
                });
            }
        });
        drop(tx);

        let mut outcomes: Vec<TaskOutcome> = rx.into_iter().collect();
        outcomes.sort_by_key(|o| o.index);

        if outcomes.len() != tasks.len() {
            return Err(DispatchError::Join {
                expected: tasks.len(),
                reason: format!("{} result(s) never arrived", tasks.len() - outcomes.len()),
                completed: outcomes,
            });
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_join_error_reports_progress() {
        let err = DispatchError::Join {
            completed: vec![TaskOutcome {
                index: 0,
                task: "import",
                result: Ok(Vec::new()),
            }],
            expected: 3,
            reason: "worker lost".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Batch join failed after 1 of 3 task(s): worker lost"
        );
    }

    #[test]
    fn test_worker_pool_is_reused() {
        let dispatcher = WorkerPoolDispatcher::new(2);
        let first = dispatcher.pool().unwrap();
        let second = dispatcher.pool().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.current_num_threads(), 2);
    }
}
