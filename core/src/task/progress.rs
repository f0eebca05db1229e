use serde::Serialize;

/// Minimum movement of the completed fraction that counts as a change.
pub const PROGRESS_CHANGE_THRESHOLD: f64 = 0.01;

/// A value/total pair with a message and a "changed since last emission" flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub name: String,
    pub value: u64,
    pub total: u64,
    pub message: Option<String>,
    pub changed: bool,
}

impl Progress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: 0,
            total: 0,
            message: None,
            changed: false,
        }
    }

    /// Completed fraction in `0.0..=1.0`; zero while the total is unknown.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.value.min(self.total) as f64) / (self.total as f64)
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.value >= self.total
    }

    /// Record a new report and recompute `changed` against the previous one.
    ///
    /// A report counts as changed when it hits 0 or the total, moves the
    /// fraction by more than [`PROGRESS_CHANGE_THRESHOLD`], or carries a
    /// different message. A `None` message keeps the previous one.
    pub fn update(&mut self, value: u64, total: u64, message: Option<&str>) -> bool {
        let previous_pct = self.percentage();
        let previous_message = self.message.clone();

        self.value = value;
        self.total = total;
        if let Some(m) = message {
            self.message = Some(m.to_string());
        }

        self.changed = value == 0
            || value == total
            || (self.percentage() - previous_pct).abs() > PROGRESS_CHANGE_THRESHOLD
            || self.message != previous_message;
        self.changed
    }
}
