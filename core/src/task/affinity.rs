use serde::{Deserialize, Serialize};

/// Thread class a task must execute on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskAffinity {
    /// Any background worker; no ordering among concurrent tasks.
    Concurrent,
    /// The single serialized lane; at most one exclusive task runs at a time.
    Exclusive,
    /// The host-owned UI thread.
    Ui,
    /// Inline on the chain driver, no scheduling.
    None,
}

impl std::fmt::Display for TaskAffinity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Concurrent => "concurrent",
            Self::Exclusive => "exclusive",
            Self::Ui => "ui",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

/// When a continuation runs relative to its predecessor's outcome.
///
/// Each chain combinator fixes its own: `then`/`then_task` run on success,
/// `on_failure` on a fault, `then_always` either way. Skipped steps are
/// traced with the option that excluded them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskRunOptions {
    OnSuccess,
    OnFailure,
    Always,
}
