use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::affinity::TaskAffinity;
use super::aggregator::ProgressAggregator;
use super::ui::UiContext;
use crate::config::SchedulerConfig;
use crate::error::TaskError;
use crate::util::lock;

type ExclusiveJob = BoxFuture<'static, ()>;

/// Owns the execution lanes every task runs on.
///
/// - Concurrent: the tokio worker pool.
/// - Exclusive: one consumer draining a FIFO queue, one job at a time.
/// - UI: jobs posted to the host's [`UiContext`].
///
/// Cheap to clone; all clones share the same lanes and root token.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    exclusive_tx: Mutex<Option<mpsc::UnboundedSender<ExclusiveJob>>>,
    ui: UiContext,
    root: CancellationToken,
    progress: Arc<ProgressAggregator>,
    disposed: AtomicBool,
}

impl TaskScheduler {
    /// Build a scheduler with its own worker pool.
    pub fn new(cfg: &SchedulerConfig, ui: UiContext) -> std::io::Result<Self> {
        let workers = cfg.worker_threads.unwrap_or_else(num_cpus::get).max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("gitkeeper-worker")
            .enable_all()
            .build()?;
        tracing::debug!(target: "gitkeeper.scheduler", workers, "task scheduler started");
        Ok(Self::build(runtime.handle().clone(), Some(runtime), cfg, ui))
    }

    /// Build a scheduler on a runtime owned by the host.
    pub fn with_handle(handle: Handle, cfg: &SchedulerConfig, ui: UiContext) -> Self {
        Self::build(handle, None, cfg, ui)
    }

    fn build(
        handle: Handle,
        runtime: Option<Runtime>,
        cfg: &SchedulerConfig,
        ui: UiContext,
    ) -> Self {
        let (exclusive_tx, exclusive_rx) = mpsc::unbounded_channel();
        handle.spawn(run_exclusive_lane(exclusive_rx));

        Self {
            inner: Arc::new(SchedulerInner {
                handle,
                runtime: Mutex::new(runtime),
                exclusive_tx: Mutex::new(Some(exclusive_tx)),
                ui,
                root: CancellationToken::new(),
                progress: Arc::new(ProgressAggregator::new(cfg.progress_channel_capacity)),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    pub fn ui(&self) -> &UiContext {
        &self.inner.ui
    }

    /// Root token; every chain's token is a child of it.
    pub fn root_token(&self) -> &CancellationToken {
        &self.inner.root
    }

    pub fn progress(&self) -> &Arc<ProgressAggregator> {
        &self.inner.progress
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.handle.spawn(fut)
    }

    /// Run `fut` on the lane matching `affinity` and wait for its result.
    ///
    /// Panics inside `fut` surface as [`TaskError::Faulted`]; a lane that is
    /// already shut down yields [`TaskError::Canceled`].
    pub async fn dispatch<T>(
        &self,
        affinity: TaskAffinity,
        fut: BoxFuture<'static, Result<T, TaskError>>,
    ) -> Result<T, TaskError>
    where
        T: Send + 'static,
    {
        let fut = guard_panics(fut);
        match affinity {
            TaskAffinity::None => fut.await,
            TaskAffinity::Concurrent => match self.inner.handle.spawn(fut).await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(TaskError::Canceled),
                Err(e) => Err(TaskError::faulted(format!("task join failed: {e}"))),
            },
            TaskAffinity::Exclusive => {
                let (tx, rx) = oneshot::channel();
                let job = async move {
                    let _ = tx.send(fut.await);
                }
                .boxed();
                let sent = match lock(&self.inner.exclusive_tx).as_ref() {
                    Some(lane) => lane.send(job).is_ok(),
                    None => false,
                };
                if !sent {
                    return Err(TaskError::Canceled);
                }
                rx.await.unwrap_or(Err(TaskError::Canceled))
            }
            TaskAffinity::Ui => {
                let (tx, rx) = oneshot::channel();
                let handle = self.inner.handle.clone();
                let posted = self.inner.ui.post(move || {
                    let _guard = handle.enter();
                    let _ = tx.send(futures::executor::block_on(fut));
                });
                if !posted {
                    return Err(TaskError::Canceled);
                }
                rx.await.unwrap_or(Err(TaskError::Canceled))
            }
        }
    }

    /// Cancel the root token, close the exclusive lane, stop the UI pump and
    /// release the owned worker pool. In-flight work is abandoned.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(target: "gitkeeper.scheduler", "disposing task scheduler");
        self.inner.root.cancel();
        lock(&self.inner.exclusive_tx).take();
        self.inner.ui.dispose();
        if let Some(runtime) = lock(&self.inner.runtime).take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.shutdown_background();
        }
    }
}

async fn run_exclusive_lane(mut rx: mpsc::UnboundedReceiver<ExclusiveJob>) {
    while let Some(job) = rx.recv().await {
        job.await;
    }
    tracing::debug!(target: "gitkeeper.scheduler", "exclusive lane stopped");
}

fn guard_panics<T>(
    fut: BoxFuture<'static, Result<T, TaskError>>,
) -> BoxFuture<'static, Result<T, TaskError>>
where
    T: Send + 'static,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .map(|res| res.unwrap_or_else(|panic| Err(panic_error(panic))))
        .boxed()
}

pub(crate) fn panic_error(panic: Box<dyn Any + Send>) -> TaskError {
    let msg = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    TaskError::faulted(format!("task panicked: {msg}"))
}
