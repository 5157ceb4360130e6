//! Background tasks: work that outlives the response it was scheduled from.
//!
//! Cache writes are handed to a [`Scheduler`] so the response can be written
//! to the socket without waiting on the store. [`TaskQueue`] runs each task on
//! the Tokio runtime and keeps its handle so a caller can [`drain`](TaskQueue::drain)
//! outstanding work before shutting down.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};

use tokio::task::JoinSet;
use tracing::warn;

/// A unit of deferred work.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs tasks to completion without blocking the caller.
pub trait Scheduler: Send + Sync {
    /// Starts `task` in the background. Must not wait for it.
    fn defer(&self, task: Task);
}

/// Tokio-backed [`Scheduler`] that tracks every task it starts.
///
/// # Examples
///
/// ```
/// use payload_gate::background::{Scheduler, TaskQueue};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let tasks = TaskQueue::new();
/// tasks.defer(Box::pin(async { /* write something */ }));
/// tasks.drain().await;
/// assert_eq!(tasks.pending(), 0);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Mutex<JoinSet<()>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks started and not yet reaped.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Waits until every deferred task, including ones deferred while
    /// draining, has finished.
    pub async fn drain(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.lock());
            if tasks.is_empty() {
                break;
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "deferred task did not complete");
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(result = "poisoned_recovered", "recovered task queue lock");
                poisoned.into_inner()
            }
        }
    }
}

impl Scheduler for TaskQueue {
    fn defer(&self, task: Task) {
        let mut tasks = self.lock();
        // Reap finished tasks so the set does not grow with traffic.
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "deferred task did not complete");
            }
        }
        tasks.spawn(task);
    }
}
