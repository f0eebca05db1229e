//! Terminal progress bar fed by the scheduler's progress aggregator.

use gitkeeper_core::task::{Progress, TaskScheduler};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

const BAR_TEMPLATE: &str = "{spinner} [{bar:30}] {percent:>3}% {msg}";

pub struct ProgressReporter {
    bar: ProgressBar,
    pump: JoinHandle<()>,
}

impl ProgressReporter {
    /// Draws on stderr; hidden when stderr is not a terminal.
    pub fn attach(scheduler: &TaskScheduler) -> Self {
        let bar = ProgressBar::new(100);
        if atty::is(atty::Stream::Stderr) {
            bar.set_draw_target(ProgressDrawTarget::stderr());
        } else {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("=> "));
        }

        let mut rx = scheduler.progress().subscribe();
        let target = bar.clone();
        let pump = scheduler.handle().spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(p) => render(&target, &p),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::trace!(target: "gitkeeper.ui", skipped, "progress bar lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Self { bar, pump }
    }

    pub fn finish(self) {
        self.pump.abort();
        self.bar.finish_and_clear();
    }
}

fn render(bar: &ProgressBar, p: &Progress) {
    bar.set_position(position(p));
    if let Some(msg) = p.message.as_ref() {
        bar.set_message(msg.clone());
    }
}

fn position(p: &Progress) -> u64 {
    (p.percentage() * 100.0).round() as u64
}
