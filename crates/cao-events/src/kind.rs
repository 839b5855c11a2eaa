use serde::{Deserialize, Serialize};

/// Every significant transition the orchestrator records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    TaskCreated,
    SubtaskPlanned,
    LockRequested,
    LockGranted,
    LockDenied,
    SubtaskStarted,
    /// Optional, downsampled; not emitted per output line.
    SubtaskOutputChunk,
    SubtaskCompleted,
    SubtaskFailed,
    PlanUpdated,
    FindingsUpdated,
    ProgressUpdated,
    ConflictDetected,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCreated => "task-created",
            Self::SubtaskPlanned => "subtask-planned",
            Self::LockRequested => "lock-requested",
            Self::LockGranted => "lock-granted",
            Self::LockDenied => "lock-denied",
            Self::SubtaskStarted => "subtask-started",
            Self::SubtaskOutputChunk => "subtask-output-chunk",
            Self::SubtaskCompleted => "subtask-completed",
            Self::SubtaskFailed => "subtask-failed",
            Self::PlanUpdated => "plan-updated",
            Self::FindingsUpdated => "findings-updated",
            Self::ProgressUpdated => "progress-updated",
            Self::ConflictDetected => "conflict-detected",
            Self::TaskCompleted => "task-completed",
            Self::TaskFailed => "task-failed",
            Self::TaskCancelled => "task-cancelled",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown event kind '{s}'"))
    }
}
