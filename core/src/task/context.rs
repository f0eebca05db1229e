use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::progress::Progress;
use super::scheduler::TaskScheduler;
use crate::error::TaskError;
use crate::util::lock;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of one executing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(u64);

impl TaskId {
    pub fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

pub(crate) type ProgressHook = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Handed to every task body: identity, cancellation and progress reporting.
#[derive(Clone)]
pub struct TaskContext {
    id: TaskId,
    name: Arc<str>,
    token: CancellationToken,
    scheduler: TaskScheduler,
    progress: Arc<Mutex<Progress>>,
    progress_hooks: Arc<Vec<ProgressHook>>,
}

impl TaskContext {
    pub(crate) fn new(
        name: Arc<str>,
        token: CancellationToken,
        scheduler: TaskScheduler,
        progress_hooks: Arc<Vec<ProgressHook>>,
    ) -> Self {
        Self {
            id: TaskId::next(),
            progress: Arc::new(Mutex::new(Progress::new(name.as_ref()))),
            name,
            token,
            scheduler,
            progress_hooks,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cooperative cancellation point for chunked work.
    pub fn check_cancelled(&self) -> Result<(), TaskError> {
        if self.token.is_cancelled() {
            Err(TaskError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Report progress for this step. Chain hooks only see reports that pass
    /// the change gate; the scheduler's aggregator sees every report.
    pub fn report_progress(&self, value: u64, total: u64, message: Option<&str>) {
        let changed = {
            let mut progress = lock(&self.progress);
            progress
                .update(value, total, message)
                .then(|| progress.clone())
        };

        if let Some(progress) = changed {
            for hook in self.progress_hooks.iter() {
                hook(&progress);
            }
        }

        self.scheduler
            .progress()
            .update_progress(self.id, value, total, message);
    }

    pub fn progress(&self) -> Progress {
        lock(&self.progress).clone()
    }
}
