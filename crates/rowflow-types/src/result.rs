//! Per-step counters and the aggregate pipeline result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Counters owned by a single step copy during its run.
///
/// `read` counts rows pulled from input queues; `written` counts rows
/// the step emitted onward (queue pushes, or external output for sink
/// steps); `rejected` counts rows redirected to an error queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounters {
    pub read: u64,
    pub written: u64,
    pub rejected: u64,
    pub errors: u64,
}

impl StepCounters {
    pub fn absorb(&mut self, other: &StepCounters) {
        self.read += other.read;
        self.written += other.written;
        self.rejected += other.rejected;
        self.errors += other.errors;
    }
}

/// Descriptor of a file a step generated during the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFile {
    pub path: PathBuf,
    /// Free-form kind tag (e.g. `"text"`, `"log"`).
    pub kind: String,
    /// Step that produced the file.
    pub step: String,
    pub created_at: DateTime<Utc>,
}

/// Counters for one step copy, as merged into the aggregate result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCopyCounters {
    pub step: String,
    pub copy: u32,
    pub counters: StepCounters,
}

/// Aggregate outcome of a pipeline run.
///
/// `rows_read`/`rows_written` aggregate over sink steps (steps with no
/// outgoing hops): rows that reached the end of the pipeline and rows
/// it emitted to the outside world. Queue traffic between interior
/// steps is visible per step in `steps`, not in the aggregates.
/// Mutable only inside the engine during the run; read-only once the
/// pipeline reaches a terminal state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_rejected: u64,
    pub errors: u64,
    pub files: Vec<ResultFile>,
    /// True when the run ended because of a deliberate stop request
    /// (immediate or safe), which is not a failure.
    pub stopped: bool,
    pub duration_secs: f64,
    /// First error observed, for reporting. The full per-step picture
    /// is in `steps`.
    pub first_error: Option<String>,
    pub steps: Vec<StepCopyCounters>,
}

impl ExecutionResult {
    /// Overall success: zero errors across all steps.
    #[must_use]
    pub fn success(&self) -> bool {
        self.errors == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_iff_zero_errors() {
        let mut result = ExecutionResult::default();
        assert!(result.success());
        result.errors = 1;
        assert!(!result.success());
    }

    #[test]
    fn test_stopped_is_not_failure() {
        let result = ExecutionResult {
            stopped: true,
            ..ExecutionResult::default()
        };
        assert!(result.success());
        assert!(result.stopped);
    }

    #[test]
    fn test_counters_absorb() {
        let mut total = StepCounters::default();
        total.absorb(&StepCounters {
            read: 10,
            written: 8,
            rejected: 2,
            errors: 0,
        });
        total.absorb(&StepCounters {
            read: 5,
            written: 5,
            rejected: 0,
            errors: 1,
        });
        assert_eq!(total.read, 15);
        assert_eq!(total.written, 13);
        assert_eq!(total.rejected, 2);
        assert_eq!(total.errors, 1);
    }
}
