//! Structured reports from dispatch-loop runs.

use serde::Serialize;
use serde_json::json;

use crate::error::ActionError;
use crate::types::{TaskId, Time};

/// One observed task failure: the §6 error-reporting channel entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    /// The task that failed.
    pub task: TaskId,
    /// What its body reported.
    pub error: ActionError,
}

/// Report from a [`run_until_idle`](crate::scheduler::Scheduler::run_until_idle)
/// execution.
///
/// Failures are ordered by dispatch time; a caller can deterministically
/// assert which tasks failed and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Tasks dispatched during the run (completed or failed).
    pub steps: u64,
    /// Number of times virtual time was advanced to a next deadline.
    pub auto_advances: u64,
    /// Clock reading at the start of the run.
    pub time_start: Time,
    /// Clock reading at the end of the run.
    pub time_end: Time,
    /// All failures observed during the run, in dispatch order.
    pub failures: Vec<TaskFailure>,
}

impl RunReport {
    /// Returns true if no task failed during the run.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the failure recorded for `task`, if any.
    #[must_use]
    pub fn failure_for(&self, task: TaskId) -> Option<&TaskFailure> {
        self.failures.iter().find(|f| f.task == task)
    }

    /// Total logical nanoseconds elapsed during the run.
    #[must_use]
    pub const fn elapsed_nanos(&self) -> u64 {
        self.time_end.as_nanos().saturating_sub(self.time_start.as_nanos())
    }

    /// Total logical milliseconds elapsed during the run.
    #[must_use]
    pub const fn elapsed_ms(&self) -> u64 {
        self.elapsed_nanos() / 1_000_000
    }

    /// Convert to JSON for artifact storage.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "steps": self.steps,
            "auto_advances": self.auto_advances,
            "time_start_nanos": self.time_start.as_nanos(),
            "time_end_nanos": self.time_end.as_nanos(),
            "failures": self
                .failures
                .iter()
                .map(|f| {
                    json!({
                        "task": f.task.as_u64(),
                        "panic": f.error.is_panic(),
                        "message": f.error.message(),
                    })
                })
                .collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with_failure() -> RunReport {
        RunReport {
            steps: 3,
            auto_advances: 1,
            time_start: Time::ZERO,
            time_end: Time::from_millis(50),
            failures: vec![TaskFailure {
                task: TaskId::from_u64(2),
                error: ActionError::failed("no data"),
            }],
        }
    }

    #[test]
    fn clean_report_has_no_failures() {
        let report = RunReport {
            steps: 0,
            auto_advances: 0,
            time_start: Time::ZERO,
            time_end: Time::ZERO,
            failures: Vec::new(),
        };
        assert!(report.is_clean());
        assert_eq!(report.elapsed_nanos(), 0);
    }

    #[test]
    fn failure_lookup_by_task() {
        let report = report_with_failure();
        assert!(!report.is_clean());
        let failure = report.failure_for(TaskId::from_u64(2)).expect("failure recorded");
        assert_eq!(failure.error.message(), "no data");
        assert!(report.failure_for(TaskId::from_u64(9)).is_none());
    }

    #[test]
    fn elapsed_is_derived_from_bracketing_times() {
        let report = report_with_failure();
        assert_eq!(report.elapsed_ms(), 50);
    }

    #[test]
    fn json_export_carries_failures() {
        let value = report_with_failure().to_json();
        assert_eq!(value["steps"], 3);
        assert_eq!(value["failures"][0]["task"], 2);
        assert_eq!(value["failures"][0]["message"], "no data");
        assert_eq!(value["failures"][0]["panic"], false);
    }
}
