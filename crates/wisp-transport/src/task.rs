//! Labelled concurrent tasks with group cancellation.
//!
//! A [`TaskGroup`] runs a fixed set of futures concurrently under one
//! cancellation token. The first error cancels every sibling; with
//! [`fast_fail`](TaskGroup::fast_fail) any completion does. The cleanup
//! action runs exactly once after every task has stopped.

use crate::copy::CopyError;
use std::future::Future;
use std::pin::Pin;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type TaskFuture = Pin<Box<dyn Future<Output = Result<u64, CopyError>> + Send>>;

/// A set of relay tasks that live and die together.
#[derive(Default)]
pub struct TaskGroup {
    tasks: Vec<(&'static str, TaskFuture)>,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
    fast_fail: bool,
}

impl TaskGroup {
    /// Empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a labelled task.
    pub fn append<F>(&mut self, label: &'static str, task: F)
    where
        F: Future<Output = Result<u64, CopyError>> + Send + 'static,
    {
        self.tasks.push((label, Box::pin(task)));
    }

    /// Action to run once every task has stopped.
    pub fn cleanup(&mut self, action: impl FnOnce() + Send + 'static) {
        self.cleanup = Some(Box::new(action));
    }

    /// Cancel the group as soon as any task finishes, not only on errors.
    pub fn fast_fail(&mut self) {
        self.fast_fail = true;
    }

    /// Run every task to completion or cancellation.
    ///
    /// Returns the total byte count on success.
    ///
    /// # Errors
    ///
    /// Returns the first task error, or [`CopyError::Cancelled`] when
    /// `parent` was cancelled before the tasks finished on their own.
    pub async fn run(self, parent: &CancellationToken) -> Result<u64, CopyError> {
        let token = parent.child_token();
        let mut set = JoinSet::new();

        for (label, task) in self.tasks {
            let token = token.clone();
            set.spawn(async move {
                let result = tokio::select! {
                    result = task => result,
                    () = token.cancelled() => Err(CopyError::Cancelled),
                };
                (label, result)
            });
        }

        let mut first_error = None;
        let mut total = 0u64;
        while let Some(joined) = set.join_next().await {
            let (label, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => ("join", Err(CopyError::Io(std::io::Error::other(e)))),
            };
            match result {
                Ok(n) => {
                    debug!(task = label, bytes = n, "task finished");
                    total += n;
                    if self.fast_fail {
                        token.cancel();
                    }
                }
                Err(CopyError::Cancelled) => {
                    debug!(task = label, "task cancelled");
                }
                Err(e) => {
                    debug!(task = label, error = %e, "task failed");
                    token.cancel();
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(cleanup) = self.cleanup {
            cleanup();
        }

        match first_error {
            Some(e) => Err(e),
            None if parent.is_cancelled() => Err(CopyError::Cancelled),
            None => Ok(total),
        }
    }
}
