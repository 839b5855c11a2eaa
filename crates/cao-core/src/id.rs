//! Opaque identifiers for tasks, subtasks, and events.
//!
//! Tasks and subtasks are referenced by ULID strings held in central
//! registries, never by cross-referenced pointers. Event ids are per-task
//! monotonic integers assigned by the event bus.

use crate::error::OrchestratorError;

/// Generate a new task id (26-char ULID, lexicographically sortable).
pub fn new_task_id() -> String {
    ulid::Ulid::new().to_string()
}

/// Generate a new subtask id.
pub fn new_subtask_id() -> String {
    ulid::Ulid::new().to_string()
}

/// Validate an id is a well-formed ULID.
pub fn validate_id(id: &str) -> Result<(), OrchestratorError> {
    ulid::Ulid::from_string(id)
        .map(|_| ())
        .map_err(|_| OrchestratorError::Usage(format!("Invalid id '{id}': expected ULID format")))
}
