//! Composable units of work.
//!
//! A [`Task`] is the tail of a linear chain. Every combinator consumes the
//! current tail and returns the new one, so chains are built fluently:
//!
//! ```text
//! Task::new("status", Concurrent, ..)
//!     .then("parse", None, ..)          // OnSuccess
//!     .on_failure("fallback", None, ..) // OnFailure
//!     .catch(|e| e.is_canceled())
//!     .finally(|ok, err| ..)
//!     .start(&scheduler)
//! ```
//!
//! Each step is dispatched to the scheduler lane of its own affinity. A failed
//! step becomes a fault that skips downstream OnSuccess steps and is offered
//! to the catch handlers registered at or after it, in chain order.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::affinity::{TaskAffinity, TaskRunOptions};
use super::context::{ProgressHook, TaskContext};
use super::progress::Progress;
use super::scheduler::{panic_error, TaskScheduler};
use super::ui::UiContext;
use crate::error::TaskError;

struct Fault {
    error: TaskError,
    handled: bool,
}

type StepResult<T> = Result<T, Fault>;
type ChainFn<T> =
    Box<dyn FnOnce(Arc<ChainRuntime>, usize) -> BoxFuture<'static, StepResult<T>> + Send>;
type CatchHandler = Arc<dyn Fn(&TaskError) -> bool + Send + Sync>;
type StartHook = Box<dyn FnOnce() + Send>;
type EndHook = Box<dyn FnOnce(bool, Option<&TaskError>) + Send>;

/// Terminal state of a started chain. Exactly one per chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    Success(T),
    /// Faulted, but a catch handler returned `true`.
    Handled(TaskError),
    Faulted(TaskError),
}

impl<T> TaskOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            Self::Success(_) => None,
            Self::Handled(e) | Self::Faulted(e) => Some(e),
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success(v) => Some(v),
            _ => None,
        }
    }

    /// `Ok(Some)` on success, `Ok(None)` for a handled fault, `Err` when the
    /// fault was not handled anywhere along the chain.
    pub fn into_result(self) -> Result<Option<T>, TaskError> {
        match self {
            Self::Success(v) => Ok(Some(v)),
            Self::Handled(_) => Ok(None),
            Self::Faulted(e) => Err(e),
        }
    }

    /// Like [`into_result`](Self::into_result) but treats handled faults as
    /// errors too, for callers that need the value.
    pub fn into_value(self) -> Result<T, TaskError> {
        match self {
            Self::Success(v) => Ok(v),
            Self::Handled(e) | Self::Faulted(e) => Err(e),
        }
    }
}

struct ChainRuntime {
    chain_id: Uuid,
    scheduler: TaskScheduler,
    token: CancellationToken,
    catchers: Vec<(usize, CatchHandler)>,
    progress_hooks: Arc<Vec<ProgressHook>>,
}

impl ChainRuntime {
    fn raise_fault(&self, step: usize, name: &str, error: TaskError) -> Fault {
        let handled = self
            .catchers
            .iter()
            .filter(|(at, _)| *at >= step)
            .any(|(_, handler)| handler(&error));

        if error.is_canceled() {
            tracing::debug!(target: "gitkeeper.task", chain = %self.chain_id, task = name, handled, "task canceled");
        } else {
            tracing::warn!(target: "gitkeeper.task", chain = %self.chain_id, task = name, handled, error = %error, "task faulted");
        }
        Fault { error, handled }
    }

    fn skip(&self, name: &str, options: TaskRunOptions) {
        tracing::trace!(target: "gitkeeper.task", chain = %self.chain_id, task = name, ?options, "task skipped");
    }

    async fn run_step<T, F, Fut>(
        self: Arc<Self>,
        index: usize,
        name: Arc<str>,
        affinity: TaskAffinity,
        body: F,
    ) -> StepResult<T>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        if self.token.is_cancelled() {
            return Err(self.raise_fault(index, &name, TaskError::Canceled));
        }

        let ctx = TaskContext::new(
            name.clone(),
            self.token.clone(),
            self.scheduler.clone(),
            self.progress_hooks.clone(),
        );
        let task_id = ctx.id();
        tracing::trace!(target: "gitkeeper.task", chain = %self.chain_id, task = %name, %task_id, %affinity, "task started");

        let result = self.scheduler.dispatch(affinity, body(ctx).boxed()).await;
        self.scheduler.progress().complete(task_id);

        match result {
            Ok(value) => Ok(value),
            Err(error) => Err(self.raise_fault(index, &name, error)),
        }
    }
}

pub struct Task<T> {
    name: Arc<str>,
    affinity: TaskAffinity,
    affinities: Vec<TaskAffinity>,
    run: ChainFn<T>,
    catchers: Vec<(usize, CatchHandler)>,
    start_hooks: Vec<StartHook>,
    end_hooks: Vec<EndHook>,
    finally_hooks: Vec<EndHook>,
    progress_hooks: Vec<ProgressHook>,
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("affinities", &self.affinities)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Task<T> {
    pub fn new<F, Fut>(name: impl Into<String>, affinity: TaskAffinity, body: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let name: Arc<str> = Arc::from(name.into());
        let step_name = name.clone();
        Self {
            name,
            affinity,
            affinities: vec![affinity],
            run: Box::new(move |rt, base| rt.run_step(base, step_name, affinity, body).boxed()),
            catchers: Vec::new(),
            start_hooks: Vec::new(),
            end_hooks: Vec::new(),
            finally_hooks: Vec::new(),
            progress_hooks: Vec::new(),
        }
    }

    /// A task with a synchronous body; the body still runs on its lane.
    pub fn from_fn<F>(name: impl Into<String>, affinity: TaskAffinity, f: F) -> Self
    where
        F: FnOnce(&TaskContext) -> Result<T, TaskError> + Send + 'static,
    {
        Self::new(name, affinity, move |ctx| async move { f(&ctx) })
    }

    pub fn ready(name: impl Into<String>, value: T) -> Self {
        Self::new(name, TaskAffinity::None, move |_| future::ready(Ok(value)))
    }

    pub fn failed(name: impl Into<String>, error: TaskError) -> Self {
        Self::new(name, TaskAffinity::None, move |_| future::ready(Err(error)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Affinity of the tail step.
    pub fn affinity(&self) -> TaskAffinity {
        self.affinity
    }

    /// Affinities of every step in chain order.
    pub fn affinities(&self) -> &[TaskAffinity] {
        &self.affinities
    }

    /// Whether any step of the chain runs on the exclusive lane.
    pub fn is_exclusive(&self) -> bool {
        self.affinities.contains(&TaskAffinity::Exclusive)
    }

    fn extend<U, C>(self, name: Arc<str>, affinity: TaskAffinity, continuation: C) -> Task<U>
    where
        U: Send + 'static,
        C: FnOnce(Arc<ChainRuntime>, usize, StepResult<T>) -> BoxFuture<'static, StepResult<U>>
            + Send
            + 'static,
    {
        let Task {
            run: prior,
            mut affinities,
            catchers,
            start_hooks,
            end_hooks,
            finally_hooks,
            progress_hooks,
            ..
        } = self;
        affinities.push(affinity);

        Task {
            name,
            affinity,
            affinities,
            run: Box::new(move |rt, base| {
                async move {
                    let result = prior(rt.clone(), base).await;
                    continuation(rt, base, result).await
                }
                .boxed()
            }),
            catchers,
            start_hooks,
            end_hooks,
            finally_hooks,
            progress_hooks,
        }
    }

    /// Continue with `f` when this chain succeeded; receives its value.
    pub fn then<U, F, Fut>(self, name: impl Into<String>, affinity: TaskAffinity, f: F) -> Task<U>
    where
        U: Send + 'static,
        F: FnOnce(TaskContext, T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U, TaskError>> + Send + 'static,
    {
        let index = self.affinities.len();
        let name: Arc<str> = Arc::from(name.into());
        let step_name = name.clone();
        self.extend(name, affinity, move |rt, base, prior| match prior {
            Ok(value) => rt
                .run_step(base + index, step_name, affinity, move |ctx| f(ctx, value))
                .boxed(),
            Err(fault) => {
                rt.skip(&step_name, TaskRunOptions::OnSuccess);
                future::ready(Err(fault)).boxed()
            }
        })
    }

    /// Append a whole independent chain, run only when this one succeeded.
    ///
    /// The appended chain's own start/end hooks fire around its segment; its
    /// catch and finally handlers join this chain.
    pub fn then_task<U: Send + 'static>(self, next: Task<U>) -> Task<U> {
        let offset = self.affinities.len();
        let Task {
            name,
            affinity,
            affinities: next_affinities,
            run: next_run,
            catchers: next_catchers,
            start_hooks: segment_start,
            end_hooks: segment_end,
            finally_hooks: next_finally,
            progress_hooks: next_progress,
        } = next;

        let step_name = name.clone();
        let mut chained = self.extend(name, affinity, move |rt, base, prior| match prior {
            Ok(_) => async move {
                for hook in segment_start {
                    hook();
                }
                let result = next_run(rt, base + offset).await;
                let success = result.is_ok();
                let error = result.as_ref().err().map(|fault| &fault.error);
                for hook in segment_end {
                    hook(success, error);
                }
                result
            }
            .boxed(),
            Err(fault) => {
                rt.skip(&step_name, TaskRunOptions::OnSuccess);
                future::ready(Err(fault)).boxed()
            }
        });

        chained.affinities.pop();
        chained.affinities.extend(next_affinities);
        chained.catchers.extend(
            next_catchers
                .into_iter()
                .map(|(at, handler)| (at + offset, handler)),
        );
        chained.finally_hooks.extend(next_finally);
        chained.progress_hooks.extend(next_progress);
        chained
    }

    /// Continue with `f` whatever the outcome; its result replaces the chain's.
    pub fn then_always<U, F, Fut>(
        self,
        name: impl Into<String>,
        affinity: TaskAffinity,
        f: F,
    ) -> Task<U>
    where
        U: Send + 'static,
        F: FnOnce(TaskContext, Result<T, TaskError>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U, TaskError>> + Send + 'static,
    {
        let index = self.affinities.len();
        let name: Arc<str> = Arc::from(name.into());
        let step_name = name.clone();
        self.extend(name, affinity, move |rt, base, prior| {
            let prior = prior.map_err(|fault| fault.error);
            rt.run_step(base + index, step_name, affinity, move |ctx| f(ctx, prior))
                .boxed()
        })
    }

    /// Recover from a fault with `f`; skipped (value passes through) when
    /// this chain succeeded.
    pub fn on_failure<F, Fut>(self, name: impl Into<String>, affinity: TaskAffinity, f: F) -> Task<T>
    where
        F: FnOnce(TaskContext, TaskError) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let index = self.affinities.len();
        let name: Arc<str> = Arc::from(name.into());
        let step_name = name.clone();
        self.extend(name, affinity, move |rt, base, prior| match prior {
            Ok(value) => {
                rt.skip(&step_name, TaskRunOptions::OnFailure);
                future::ready(Ok(value)).boxed()
            }
            Err(fault) => rt
                .run_step(base + index, step_name, affinity, move |ctx| f(ctx, fault.error))
                .boxed(),
        })
    }

    /// Register a fault handler covering every step up to this point.
    /// Returning `true` marks the fault handled and stops it surfacing.
    pub fn catch<H>(mut self, handler: H) -> Self
    where
        H: Fn(&TaskError) -> bool + Send + Sync + 'static,
    {
        let at = self.affinities.len().saturating_sub(1);
        self.catchers.push((at, Arc::new(handler)));
        self
    }

    /// Runs once when the chain terminates, whatever the outcome.
    pub fn finally<H>(mut self, handler: H) -> Self
    where
        H: FnOnce(bool, Option<&TaskError>) + Send + 'static,
    {
        self.finally_hooks.push(Box::new(handler));
        self
    }

    pub fn on_start<H>(mut self, hook: H) -> Self
    where
        H: FnOnce() + Send + 'static,
    {
        self.start_hooks.push(Box::new(hook));
        self
    }

    /// Runs when the chain terminates, before the finally handlers.
    pub fn on_end<H>(mut self, hook: H) -> Self
    where
        H: FnOnce(bool, Option<&TaskError>) + Send + 'static,
    {
        self.end_hooks.push(Box::new(hook));
        self
    }

    pub fn on_progress<H>(mut self, hook: H) -> Self
    where
        H: Fn(&Progress) + Send + Sync + 'static,
    {
        self.progress_hooks.push(Arc::new(hook));
        self
    }

    /// Enqueue the chain and return immediately.
    pub fn start(self, scheduler: &TaskScheduler) -> TaskHandle<T> {
        let parent = scheduler.root_token().clone();
        self.start_linked(scheduler, &parent)
    }

    /// Start with a token linked to `parent` instead of the scheduler root.
    pub fn start_linked(self, scheduler: &TaskScheduler, parent: &CancellationToken) -> TaskHandle<T> {
        let chain_id = Uuid::new_v4();
        let token = parent.child_token();
        let Task {
            name,
            affinities,
            run,
            catchers,
            start_hooks,
            end_hooks,
            finally_hooks,
            progress_hooks,
            ..
        } = self;
        let ui = scheduler.ui().clone();

        if scheduler.is_disposed() {
            let error = TaskError::Canceled;
            finish(end_hooks, finally_hooks, false, Some(&error));
            return TaskHandle {
                chain_id,
                name,
                token,
                ui,
                state: HandleState::Finished(TaskOutcome::Faulted(error)),
            };
        }

        let rt = Arc::new(ChainRuntime {
            chain_id,
            scheduler: scheduler.clone(),
            token: token.clone(),
            catchers,
            progress_hooks: Arc::new(progress_hooks),
        });

        let chain_name = name.clone();
        let driver = async move {
            tracing::debug!(
                target: "gitkeeper.task",
                chain = %chain_id,
                task = %chain_name,
                steps = affinities.len(),
                exclusive = affinities.contains(&TaskAffinity::Exclusive),
                "chain started"
            );

            let body = async move {
                for hook in start_hooks {
                    hook();
                }
                run(rt, 0).await
            };
            let outcome = match AssertUnwindSafe(body).catch_unwind().await {
                Ok(Ok(value)) => TaskOutcome::Success(value),
                Ok(Err(Fault { error, handled: true })) => TaskOutcome::Handled(error),
                Ok(Err(Fault { error, handled: false })) => TaskOutcome::Faulted(error),
                Err(panic) => TaskOutcome::Faulted(panic_error(panic)),
            };

            finish(end_hooks, finally_hooks, outcome.is_success(), outcome.error());
            tracing::debug!(
                target: "gitkeeper.task",
                chain = %chain_id,
                task = %chain_name,
                success = outcome.is_success(),
                "chain ended"
            );
            outcome
        };

        TaskHandle {
            chain_id,
            name,
            token,
            ui,
            state: HandleState::Running(scheduler.spawn(driver)),
        }
    }

    /// Start the chain and block the calling thread until it terminates.
    ///
    /// Must not be called from inside an async runtime worker. On the UI
    /// thread the UI queue keeps being pumped while waiting.
    pub fn run_synchronously(self, scheduler: &TaskScheduler) -> Result<Option<T>, TaskError> {
        self.start(scheduler).wait_blocking().into_result()
    }
}

fn finish(
    end_hooks: Vec<EndHook>,
    finally_hooks: Vec<EndHook>,
    success: bool,
    error: Option<&TaskError>,
) {
    for hook in end_hooks {
        hook(success, error);
    }
    for hook in finally_hooks {
        hook(success, error);
    }
}

enum HandleState<T> {
    Running(JoinHandle<TaskOutcome<T>>),
    Finished(TaskOutcome<T>),
}

/// Returned by [`Task::start`]; awaits or cancels the running chain.
pub struct TaskHandle<T> {
    chain_id: Uuid,
    name: Arc<str>,
    token: CancellationToken,
    ui: UiContext,
    state: HandleState<T>,
}

impl<T: Send + 'static> TaskHandle<T> {
    pub fn chain_id(&self) -> Uuid {
        self.chain_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Request cooperative cancellation of this chain only.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Running(join) => join.is_finished(),
            HandleState::Finished(_) => true,
        }
    }

    pub async fn wait(self) -> TaskOutcome<T> {
        match self.state {
            HandleState::Finished(outcome) => outcome,
            HandleState::Running(join) => from_join(join.await),
        }
    }

    pub fn wait_blocking(self) -> TaskOutcome<T> {
        match self.state {
            HandleState::Finished(outcome) => outcome,
            HandleState::Running(join) => {
                if self.ui.is_ui_thread() {
                    while !join.is_finished() {
                        if self.ui.run_pending() == 0 {
                            std::thread::sleep(Duration::from_millis(1));
                        }
                    }
                }
                from_join(futures::executor::block_on(join))
            }
        }
    }
}

fn from_join<T>(res: Result<TaskOutcome<T>, JoinError>) -> TaskOutcome<T> {
    match res {
        Ok(outcome) => outcome,
        Err(e) if e.is_cancelled() => TaskOutcome::Faulted(TaskError::Canceled),
        Err(e) => TaskOutcome::Faulted(TaskError::faulted(format!("chain driver failed: {e}"))),
    }
}

/// Fan-in of independent chains: runs them all and collects their values.
///
/// Sub-chains start linked to the queue's token, so cancelling the queue
/// cancels every member. The first failure (in queue order) fails the queue
/// after all members have terminated.
pub struct TaskQueue<T> {
    name: String,
    tasks: Vec<Task<T>>,
}

impl<T: Send + 'static> TaskQueue<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    pub fn queue(mut self, task: Task<T>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn into_task(self) -> Task<Vec<T>> {
        let tasks = self.tasks;
        Task::new(self.name, TaskAffinity::None, move |ctx| async move {
            let handles: Vec<_> = tasks
                .into_iter()
                .map(|task| task.start_linked(ctx.scheduler(), ctx.token()))
                .collect();

            let mut values = Vec::with_capacity(handles.len());
            let mut first_error = None;
            for handle in handles {
                match handle.wait().await {
                    TaskOutcome::Success(v) => values.push(v),
                    TaskOutcome::Handled(e) | TaskOutcome::Faulted(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }

            match first_error {
                Some(e) => Err(e),
                None => Ok(values),
            }
        })
    }
}
