use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::AppError;

/// Consecutive polling failures, tracked per background task.
///
/// A task's streak only resets on that task's own success, so a healthy
/// process poll cannot mask a metrics endpoint that keeps failing.
#[derive(Debug)]
pub struct FailureCounter {
    streaks: Mutex<HashMap<&'static str, u32>>,
    threshold: u32,
}

impl FailureCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            streaks: Mutex::new(HashMap::new()),
            threshold,
        }
    }

    /// Returns the task's new streak
    pub fn record_failure(&self, task: &'static str) -> u32 {
        let mut streaks = self.streaks.lock();
        let streak = streaks.entry(task).or_insert(0);
        *streak = streak.saturating_add(1);
        *streak
    }

    pub fn record_success(&self, task: &'static str) {
        self.streaks.lock().remove(task);
    }

    /// Longest current streak across tasks
    pub fn count(&self) -> u32 {
        self.worst().map(|(_, n)| n).unwrap_or(0)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    fn worst(&self) -> Option<(&'static str, u32)> {
        self.streaks
            .lock()
            .iter()
            .map(|(task, n)| (*task, *n))
            .max_by_key(|(_, n)| *n)
    }

    /// True once some task failed `threshold` times in a row
    pub fn exceeded(&self) -> bool {
        let failures = self.count();
        failures > 0 && failures >= self.threshold
    }

    pub fn check(&self) -> Result<(), AppError> {
        match self.worst() {
            Some((task, failures)) if failures >= self.threshold => {
                Err(AppError::RetriesExceeded {
                    task,
                    failures,
                    threshold: self.threshold,
                })
            }
            _ => Ok(()),
        }
    }
}
