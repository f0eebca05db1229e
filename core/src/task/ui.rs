//! Single-threaded synchronization context for UI-affinity work.
//!
//! The host owns the UI thread and pumps the queue, either by calling
//! [`UiContext::run_pending`] from its own loop or by handing a thread to
//! [`UiContext::run`]. Disposing the context stops the pump.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::mpsc;

use crate::util::lock;

type UiJob = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone)]
pub struct UiContext {
    inner: Arc<UiInner>,
}

struct UiInner {
    tx: Mutex<Option<mpsc::UnboundedSender<UiJob>>>,
    rx: Mutex<mpsc::UnboundedReceiver<UiJob>>,
    thread: OnceLock<ThreadId>,
    disposed: AtomicBool,
}

impl UiContext {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(UiInner {
                tx: Mutex::new(Some(tx)),
                rx: Mutex::new(rx),
                thread: OnceLock::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Bind the calling thread as the UI thread. Only the first binding wins.
    pub fn bind_current_thread(&self) -> bool {
        let current = thread::current().id();
        *self.inner.thread.get_or_init(|| current) == current
    }

    pub fn is_ui_thread(&self) -> bool {
        self.inner.thread.get() == Some(&thread::current().id())
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Queue `job` for the UI thread without waiting. Returns `false` once
    /// the context is disposed.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match lock(&self.inner.tx).as_ref() {
            Some(tx) => tx.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    /// Run `job` on the UI thread and wait for its result.
    ///
    /// Called from the UI thread itself the job runs inline, otherwise the
    /// caller would wait on a queue only it can drain. Returns `None` when the
    /// context was disposed before the job ran.
    pub fn send<F, R>(&self, job: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_ui_thread() {
            return Some(job());
        }

        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        if !self.post(move || {
            let _ = tx.send(job());
        }) {
            return None;
        }
        rx.recv().ok()
    }

    /// Drain every queued job on the calling thread; returns how many ran.
    pub fn run_pending(&self) -> usize {
        if !self.bind_current_thread() {
            tracing::warn!(target: "gitkeeper.ui", "run_pending called off the UI thread");
            return 0;
        }

        let mut ran = 0;
        loop {
            let job = match lock(&self.inner.rx).try_recv() {
                Ok(job) => job,
                Err(_) => break,
            };
            job();
            ran += 1;
        }
        ran
    }

    /// Service the queue on the calling thread until the context is disposed.
    pub fn run(&self) {
        if !self.bind_current_thread() {
            tracing::warn!(target: "gitkeeper.ui", "run called off the UI thread");
            return;
        }

        loop {
            let job = lock(&self.inner.rx).blocking_recv();
            match job {
                Some(job) => job(),
                None => break,
            }
        }
        tracing::debug!(target: "gitkeeper.ui", "ui pump stopped");
    }

    /// Start a dedicated UI thread for hosts that have none of their own.
    pub fn spawn_pump_thread(&self) -> std::io::Result<JoinHandle<()>> {
        let ctx = self.clone();
        thread::Builder::new()
            .name("gitkeeper-ui".into())
            .spawn(move || ctx.run())
    }

    /// Stop accepting work; the pump exits once the queue is drained.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
        lock(&self.inner.tx).take();
    }
}

impl Default for UiContext {
    fn default() -> Self {
        Self::new()
    }
}
