use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use super::context::TaskId;
use super::progress::Progress;
use crate::util::lock;

/// Folds progress reports from concurrently running tasks into one
/// normalized stream.
///
/// Tasks that reach 100% leave the live set and are accumulated into
/// `done_value` / `done_total`. Each finished task contributes once: a
/// repeated 100% report replaces its earlier contribution.
pub struct ProgressAggregator {
    state: Mutex<AggregatorState>,
    event_tx: broadcast::Sender<Progress>,
}

struct AggregatorState {
    live: HashMap<TaskId, (u64, u64)>,
    done: HashMap<TaskId, (u64, u64)>,
    done_value: u64,
    done_total: u64,
    progress: Progress,
}

impl AggregatorState {
    fn fold(&mut self, task_id: TaskId, value: u64, total: u64) {
        self.live.remove(&task_id);
        self.unfold(task_id);
        let value = value.min(total);
        self.done.insert(task_id, (value, total));
        self.done_value = self.done_value.saturating_add(value);
        self.done_total = self.done_total.saturating_add(total);
    }

    fn unfold(&mut self, task_id: TaskId) {
        if let Some((value, total)) = self.done.remove(&task_id) {
            self.done_value = self.done_value.saturating_sub(value);
            self.done_total = self.done_total.saturating_sub(total);
        }
    }

    fn totals(&self) -> (u64, u64) {
        self.live.values().fold(
            (self.done_value, self.done_total),
            |(value, total), (v, t)| (value.saturating_add(*v), total.saturating_add(*t)),
        )
    }
}

impl ProgressAggregator {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Mutex::new(AggregatorState {
                live: HashMap::new(),
                done: HashMap::new(),
                done_value: 0,
                done_total: 0,
                progress: Progress::new("aggregate"),
            }),
            event_tx,
        }
    }

    /// Subscribe to aggregated progress emissions.
    pub fn subscribe(&self) -> broadcast::Receiver<Progress> {
        self.event_tx.subscribe()
    }

    /// Record the latest report for `task_id`.
    ///
    /// Returns the aggregated progress when it passed the change gate (and
    /// was broadcast), `None` otherwise.
    pub fn update_progress(
        &self,
        task_id: TaskId,
        value: u64,
        total: u64,
        message: Option<&str>,
    ) -> Option<Progress> {
        let emitted = {
            let mut state = lock(&self.state);
            if total > 0 && value >= total {
                state.fold(task_id, value, total);
            } else {
                // A finished task reporting again is running again.
                state.unfold(task_id);
                state.live.insert(task_id, (value, total));
            }
            let (sum_value, sum_total) = state.totals();
            state
                .progress
                .update(sum_value, sum_total, message)
                .then(|| state.progress.clone())
        };

        if let Some(progress) = emitted.as_ref() {
            let _ = self.event_tx.send(progress.clone());
        }
        emitted
    }

    /// Fold a task that ended without reporting completion itself.
    ///
    /// No-op for tasks that never reported or already reached 100%.
    pub fn complete(&self, task_id: TaskId) -> Option<Progress> {
        let total = {
            let mut state = lock(&self.state);
            match state.live.get(&task_id).map(|(_, total)| *total) {
                None => return None,
                Some(0) => {
                    state.live.remove(&task_id);
                    return None;
                }
                Some(total) => total,
            }
        };
        self.update_progress(task_id, total, total, None)
    }

    pub fn current(&self) -> Progress {
        lock(&self.state).progress.clone()
    }

    pub fn live_tasks(&self) -> usize {
        lock(&self.state).live.len()
    }
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new(256)
    }
}
