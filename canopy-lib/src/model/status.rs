//! Workflow status carried by step and task nodes.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Progress of a workflow step or task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Percentage complete, `0..=100`.
    pub progress: u8,
    /// Whether the work failed.
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Status {
    /// Creates a status at the given progress (clamped to 100).
    pub fn at(progress: u8) -> Self {
        Self {
            progress: progress.min(100),
            ..Default::default()
        }
    }

    /// A completed status.
    pub fn done() -> Self {
        Self::at(100)
    }

    /// A failed status at the given progress.
    pub fn failed_at(progress: u8) -> Self {
        Self {
            failed: true,
            ..Self::at(progress)
        }
    }

    /// Returns `true` once no further change is expected.
    ///
    /// Failed work is terminal regardless of progress.
    pub fn is_terminal(&self) -> bool {
        self.failed || self.progress >= 100
    }
}
