use std::fmt;
use std::time::Duration;

/// A snapshot sent after every unit that finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Label of the unit that just finished, padded to the run's label width
    pub label: String,
    /// Units that finished executing, successfully or not. Never decreases.
    pub completed: usize,
    pub cancelled: usize,
    pub in_flight: usize,
    pub total: usize,
    pub elapsed: Duration,
    pub estimated_remaining: Option<Duration>,
}

/// One-off user-facing messages about interrupts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Interrupted { cancelled: usize, draining: usize },
    Terminated { terminated: usize },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Interrupted {
                cancelled,
                draining,
            } => write!(
                f,
                "Interrupted: cancelled {} pending units, waiting for {} running units",
                cancelled, draining
            ),
            Notice::Terminated { terminated } => {
                write!(f, "Stopped: abandoned {} running units", terminated)
            }
        }
    }
}

/// Receives progress from a run
pub trait ProgressSink {
    fn on_progress(&self, update: &ProgressUpdate);

    fn on_notice(&self, _notice: &Notice) {}
}

/// Discards all progress
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _update: &ProgressUpdate) {}
}

pub(crate) fn pad_label(label: &str, width: usize) -> String {
    format!("{:<width$}", label, width = width)
}

/// Extrapolates the remaining time from the rate so far
pub(crate) fn estimate_remaining(
    elapsed: Duration,
    finished: usize,
    remaining: usize,
) -> Option<Duration> {
    if finished == 0 {
        return None;
    }
    Some(elapsed.mul_f64(remaining as f64 / finished as f64))
}
