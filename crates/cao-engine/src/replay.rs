//! Event-log replay: rebuild subtask states from the durable event order
//! and check the scheduling invariants against it.
//!
//! The event log is the ground truth for audit and resumption; this
//! routine re-derives what the lock manager must have decided and fails
//! loudly on any history that violates the invariants.

use std::collections::{BTreeMap, BTreeSet};

use cao_core::SubtaskState;
use cao_events::{Event, EventKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedSubtask {
    pub assistant: String,
    pub declared_files: BTreeSet<String>,
    pub dependencies: BTreeSet<String>,
    pub state: SubtaskState,
}

#[derive(Debug, Clone, Default)]
pub struct Replay {
    pub subtasks: BTreeMap<String, ReplayedSubtask>,
    pub cancelled: bool,
}

/// Replay a task's event log, verifying as it goes that
/// - event ids are strictly increasing without gaps,
/// - every grant happened with declared files disjoint from all
///   in-progress siblings,
/// - every grant happened after all dependencies' completion events.
pub fn replay(events: &[Event]) -> Result<Replay, String> {
    let mut state = Replay::default();
    let mut completed: BTreeSet<String> = BTreeSet::new();
    let mut expected_id = 0u64;

    for event in events {
        if event.id != expected_id {
            return Err(format!(
                "event id gap: expected {expected_id}, found {} ({})",
                event.id, event.kind
            ));
        }
        expected_id += 1;

        let subtask_id = event.subtask_id.clone();
        match event.kind {
            EventKind::SubtaskPlanned => {
                let Some(id) = subtask_id else {
                    return Err("subtask-planned without subtask id".to_string());
                };
                state.subtasks.insert(
                    id,
                    ReplayedSubtask {
                        assistant: event.payload["assistant"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string(),
                        declared_files: string_set(&event.payload["files"]),
                        dependencies: string_set(&event.payload["depends"]),
                        state: SubtaskState::Pending,
                    },
                );
            }
            EventKind::LockGranted => {
                let Some(id) = subtask_id else {
                    return Err("lock-granted without subtask id".to_string());
                };
                check_grant(&state, &completed, &id)?;
                let Some(subtask) = state.subtasks.get_mut(&id) else {
                    return Err(format!("lock-granted for unplanned subtask '{id}'"));
                };
                subtask.state = SubtaskState::InProgress;
            }
            EventKind::SubtaskCompleted => {
                if let Some(id) = subtask_id {
                    if let Some(subtask) = state.subtasks.get_mut(&id) {
                        subtask.state = SubtaskState::Succeeded;
                    }
                    completed.insert(id);
                }
            }
            EventKind::SubtaskFailed => {
                if let Some(id) = subtask_id {
                    let skipped = event.payload["state"] == serde_json::json!("skipped");
                    if let Some(subtask) = state.subtasks.get_mut(&id) {
                        subtask.state = if skipped {
                            SubtaskState::Skipped
                        } else {
                            SubtaskState::Failed
                        };
                    }
                }
            }
            EventKind::TaskCancelled => {
                state.cancelled = true;
            }
            _ => {}
        }
    }

    Ok(state)
}

fn check_grant(
    state: &Replay,
    completed: &BTreeSet<String>,
    id: &str,
) -> Result<(), String> {
    let Some(subtask) = state.subtasks.get(id) else {
        return Err(format!("lock-granted for unplanned subtask '{id}'"));
    };

    for dep in &subtask.dependencies {
        if !completed.contains(dep) {
            return Err(format!(
                "subtask '{id}' was granted before dependency '{dep}' completed"
            ));
        }
    }

    for (other_id, other) in &state.subtasks {
        if other_id == id || other.state != SubtaskState::InProgress {
            continue;
        }
        let overlap: Vec<&String> = subtask
            .declared_files
            .intersection(&other.declared_files)
            .collect();
        if !overlap.is_empty() {
            return Err(format!(
                "subtasks '{id}' and '{other_id}' were concurrently in-progress with overlapping files {overlap:?}"
            ));
        }
    }
    Ok(())
}

fn string_set(value: &serde_json::Value) -> BTreeSet<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "replay_props.rs"]
mod prop_tests;
