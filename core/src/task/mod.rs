pub mod affinity;
pub mod aggregator;
pub mod chain;
pub mod context;
pub mod progress;
pub mod scheduler;
pub mod ui;

pub use affinity::{TaskAffinity, TaskRunOptions};
pub use aggregator::ProgressAggregator;
pub use chain::{Task, TaskHandle, TaskOutcome, TaskQueue};
pub use context::{TaskContext, TaskId};
pub use progress::{Progress, PROGRESS_CHANGE_THRESHOLD};
pub use scheduler::TaskScheduler;
pub use ui::UiContext;
