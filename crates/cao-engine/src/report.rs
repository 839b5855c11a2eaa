//! Aggregated task results and exit-code mapping.

use serde::Serialize;

use cao_core::{AssistantName, SubtaskState, TaskState};

/// Why a subtask did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    Spawn,
    Timeout,
    NonZeroExit,
    DependencyFailure,
    Aborted,
    MergeConflict,
}

impl FailureReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Spawn => "spawn-failure",
            Self::Timeout => "timeout",
            Self::NonZeroExit => "non-zero-exit",
            Self::DependencyFailure => "dependency-failure",
            Self::Aborted => "aborted",
            Self::MergeConflict => "merge-conflict",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubtaskReport {
    pub subtask_id: String,
    pub assistant: AssistantName,
    pub state: SubtaskState,
    pub exit_code: Option<i32>,
    pub reason: Option<FailureReason>,
    pub duration_ms: u64,
    /// One-line result summary (last meaningful output line or the
    /// failure detail).
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    pub state: TaskState,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Set when the task deadline fired or any subtask timed out.
    pub timed_out: bool,
    pub duration_ms: u64,
    pub subtasks: Vec<SubtaskReport>,
}

impl TaskReport {
    pub fn empty_failed(task_id: String, duration_ms: u64) -> Self {
        Self {
            task_id,
            state: TaskState::Failed,
            total: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            timed_out: false,
            duration_ms,
            subtasks: Vec::new(),
        }
    }

    /// Process exit code: 0 succeeded, 2 partial, 3 failed, 4 aborted by
    /// timeout, 5 aborted by user.
    pub fn exit_code(&self) -> i32 {
        match self.state {
            TaskState::Succeeded => 0,
            TaskState::PartiallyFailed => 2,
            TaskState::Cancelled => 5,
            TaskState::Failed => {
                if self.timed_out {
                    4
                } else {
                    3
                }
            }
            TaskState::Pending | TaskState::Running => 70,
        }
    }

    /// The end-of-run summary block, printed once after streaming stops.
    pub fn render_summary(&self) -> String {
        let mut out = format!(
            "== task {} — {} ({}/{} succeeded) in {:.1}s\n",
            self.task_id,
            self.state,
            self.succeeded,
            self.total,
            self.duration_ms as f64 / 1000.0,
        );
        for sub in &self.subtasks {
            let detail = match (&sub.reason, sub.exit_code) {
                (Some(reason), _) => reason.label().to_string(),
                (None, Some(code)) => format!("exit {code}"),
                (None, None) => String::new(),
            };
            out.push_str(&format!(
                "   [{}] {:<11} {:<18} {:>6.1}s  {}\n",
                sub.assistant.as_str(),
                sub.state.to_string(),
                detail,
                sub.duration_ms as f64 / 1000.0,
                sub.summary,
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(state: SubtaskState, reason: Option<FailureReason>) -> SubtaskReport {
        SubtaskReport {
            subtask_id: "s".to_string(),
            assistant: AssistantName::Claude,
            state,
            exit_code: Some(0),
            reason,
            duration_ms: 1200,
            summary: "ok".to_string(),
        }
    }

    fn report(state: TaskState, timed_out: bool) -> TaskReport {
        TaskReport {
            task_id: "t".to_string(),
            state,
            total: 1,
            succeeded: 0,
            failed: 1,
            skipped: 0,
            timed_out,
            duration_ms: 1500,
            subtasks: vec![sub(SubtaskState::Failed, Some(FailureReason::Timeout))],
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(report(TaskState::Succeeded, false).exit_code(), 0);
        assert_eq!(report(TaskState::PartiallyFailed, false).exit_code(), 2);
        assert_eq!(report(TaskState::Failed, false).exit_code(), 3);
        assert_eq!(report(TaskState::Failed, true).exit_code(), 4);
        assert_eq!(report(TaskState::Cancelled, false).exit_code(), 5);
    }

    #[test]
    fn test_summary_block_lists_reason_labels() {
        let out = report(TaskState::Failed, true).render_summary();
        assert!(out.contains("== task t — failed (0/1 succeeded)"));
        assert!(out.contains("[claude]"));
        assert!(out.contains("timeout"));
    }

    #[test]
    fn test_failure_reason_labels() {
        assert_eq!(FailureReason::Spawn.label(), "spawn-failure");
        assert_eq!(FailureReason::MergeConflict.label(), "merge-conflict");
        assert_eq!(FailureReason::DependencyFailure.label(), "dependency-failure");
    }
}
