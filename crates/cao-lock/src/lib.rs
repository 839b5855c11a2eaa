//! State-lock manager: a single-process scheduler core over subtasks.
//!
//! Two edge types govern who may run: dependency edges (ordering) and
//! declared-file overlaps (mutual exclusion). All operations are
//! serialised by one mutex over the lock table; `try_acquire` is
//! non-blocking and returns denial as a value, never as an error —
//! scheduling order is the engine's concern, not ours.

mod dag;
mod snapshot;

pub use snapshot::LockSnapshot;

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use cao_core::{OrchestratorError, SubtaskState};

/// Planner-supplied description of one subtask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtaskSpec {
    pub subtask_id: String,
    pub assistant: String,
    /// Files this subtask will read or write. Empty = conflicts with no one.
    pub declared_files: BTreeSet<String>,
    /// Subtask ids that must be `succeeded` before this one may start.
    pub depends_on: BTreeSet<String>,
}

impl SubtaskSpec {
    pub fn new(subtask_id: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            subtask_id: subtask_id.into(),
            assistant: assistant.into(),
            declared_files: BTreeSet::new(),
            depends_on: BTreeSet::new(),
        }
    }
}

/// One row of the lock table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub task_id: String,
    pub subtask_id: String,
    pub assistant: String,
    pub state: SubtaskState,
    pub acquired_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub declared_files: BTreeSet<String>,
    pub dependencies: BTreeSet<String>,
}

/// Outcome of a non-blocking acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum AcquireOutcome {
    Granted,
    Denied { reason: DenyReason },
}

/// Why an acquisition was denied. A scheduling signal, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DenyReason {
    /// A dependency has not reached `succeeded` yet.
    UnmetDependency { dependency: String },
    /// Overlapping declared files with in-progress siblings.
    FileConflict { files: Vec<String> },
    /// The subtask is already in progress or terminal.
    AlreadyAcquired,
    /// The task was aborted.
    Aborted,
    /// A dependency ended `failed` or `skipped`; the subtask was just
    /// transitioned to `skipped`.
    DependencyFailed { dependency: String },
}

#[derive(Debug, Default)]
struct TaskLocks {
    records: HashMap<String, LockRecord>,
    /// Registration order, for deterministic iteration.
    order: Vec<String>,
    aborted: bool,
}

/// The per-process lock table, keyed by task id.
#[derive(Debug, Default)]
pub struct LockManager {
    inner: Mutex<HashMap<String, TaskLocks>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task's subtasks, all in state `pending`.
    ///
    /// Rejects duplicate ids, dependencies on unknown subtasks, and
    /// dependency cycles; on rejection nothing is registered.
    pub fn initialise(
        &self,
        task_id: &str,
        specs: &[SubtaskSpec],
    ) -> Result<(), OrchestratorError> {
        let mut seen = BTreeSet::new();
        for spec in specs {
            if !seen.insert(spec.subtask_id.as_str()) {
                return Err(OrchestratorError::Usage(format!(
                    "duplicate subtask id '{}'",
                    spec.subtask_id
                )));
            }
        }
        for spec in specs {
            for dep in &spec.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(OrchestratorError::Usage(format!(
                        "subtask '{}' depends on unknown subtask '{}'",
                        spec.subtask_id, dep
                    )));
                }
            }
        }
        dag::validate_acyclic(specs)?;

        let mut table = self.lock_table();
        let entry = table.entry(task_id.to_string()).or_default();
        for spec in specs {
            entry.order.push(spec.subtask_id.clone());
            entry.records.insert(
                spec.subtask_id.clone(),
                LockRecord {
                    task_id: task_id.to_string(),
                    subtask_id: spec.subtask_id.clone(),
                    assistant: spec.assistant.clone(),
                    state: SubtaskState::Pending,
                    acquired_at: None,
                    released_at: None,
                    declared_files: spec.declared_files.clone(),
                    dependencies: spec.depends_on.clone(),
                },
            );
        }
        debug!(task_id, subtasks = specs.len(), "lock table initialised");
        Ok(())
    }

    /// Attempt to move a subtask to `in-progress`.
    ///
    /// Granted iff (a) the subtask is `pending` or `blocked`, (b) every
    /// dependency is `succeeded`, and (c) no in-progress sibling declares
    /// an overlapping file. On denial the subtask may transition to
    /// `blocked` (retryable) or `skipped` (dependency ended badly).
    pub fn try_acquire(
        &self,
        task_id: &str,
        subtask_id: &str,
    ) -> Result<AcquireOutcome, OrchestratorError> {
        let mut table = self.lock_table();
        let locks = known_task(&mut table, task_id)?;

        if locks.aborted {
            return Ok(AcquireOutcome::Denied {
                reason: DenyReason::Aborted,
            });
        }

        let record = known_subtask(locks, task_id, subtask_id)?;
        if !record.state.is_acquirable() {
            return Ok(AcquireOutcome::Denied {
                reason: DenyReason::AlreadyAcquired,
            });
        }

        // Dependency gate.
        let deps = record.dependencies.clone();
        for dep in &deps {
            let dep_state = known_subtask(locks, task_id, dep)?.state;
            match dep_state {
                SubtaskState::Succeeded => {}
                SubtaskState::Failed | SubtaskState::Skipped => {
                    let record = known_subtask(locks, task_id, subtask_id)?;
                    record.state = SubtaskState::Skipped;
                    record.released_at = Some(Utc::now());
                    debug!(task_id, subtask_id, dependency = %dep, "subtask skipped");
                    return Ok(AcquireOutcome::Denied {
                        reason: DenyReason::DependencyFailed {
                            dependency: dep.clone(),
                        },
                    });
                }
                _ => {
                    known_subtask(locks, task_id, subtask_id)?.state = SubtaskState::Blocked;
                    return Ok(AcquireOutcome::Denied {
                        reason: DenyReason::UnmetDependency {
                            dependency: dep.clone(),
                        },
                    });
                }
            }
        }

        // File-overlap gate against in-progress siblings.
        let declared = known_subtask(locks, task_id, subtask_id)?.declared_files.clone();
        let mut conflicts: Vec<String> = locks
            .records
            .values()
            .filter(|r| r.subtask_id != subtask_id && r.state == SubtaskState::InProgress)
            .flat_map(|r| r.declared_files.intersection(&declared).cloned())
            .collect();
        if !conflicts.is_empty() {
            conflicts.sort();
            conflicts.dedup();
            known_subtask(locks, task_id, subtask_id)?.state = SubtaskState::Blocked;
            return Ok(AcquireOutcome::Denied {
                reason: DenyReason::FileConflict { files: conflicts },
            });
        }

        let record = known_subtask(locks, task_id, subtask_id)?;
        record.state = SubtaskState::InProgress;
        record.acquired_at = Some(Utc::now());
        debug!(task_id, subtask_id, "lock granted");
        Ok(AcquireOutcome::Granted)
    }

    /// Release an in-progress subtask into a terminal state.
    ///
    /// Blocked siblings are NOT auto-started; re-evaluation is the
    /// engine's job.
    pub fn release(
        &self,
        task_id: &str,
        subtask_id: &str,
        success: bool,
    ) -> Result<SubtaskState, OrchestratorError> {
        let mut table = self.lock_table();
        let locks = known_task(&mut table, task_id)?;
        let record = known_subtask(locks, task_id, subtask_id)?;

        if record.state != SubtaskState::InProgress {
            return Err(OrchestratorError::Integrity(format!(
                "release of subtask '{subtask_id}' in state {}",
                record.state
            )));
        }

        record.state = if success {
            SubtaskState::Succeeded
        } else {
            SubtaskState::Failed
        };
        record.released_at = Some(Utc::now());
        debug!(task_id, subtask_id, state = %record.state, "lock released");
        Ok(record.state)
    }

    /// Mark every non-terminal subtask `skipped` and refuse further grants.
    /// Returns the ids that were skipped.
    pub fn abort(&self, task_id: &str, reason: &str) -> Vec<String> {
        let mut table = self.lock_table();
        let Some(locks) = table.get_mut(task_id) else {
            return Vec::new();
        };
        locks.aborted = true;

        let now = Utc::now();
        let mut skipped = Vec::new();
        for id in locks.order.clone() {
            if let Some(record) = locks.records.get_mut(&id) {
                if !record.state.is_terminal() {
                    record.state = SubtaskState::Skipped;
                    record.released_at = Some(now);
                    skipped.push(id);
                }
            }
        }
        debug!(task_id, reason, skipped = skipped.len(), "task aborted");
        skipped
    }

    /// Current record for one subtask.
    pub fn record(&self, task_id: &str, subtask_id: &str) -> Option<LockRecord> {
        self.lock_table()
            .get(task_id)
            .and_then(|locks| locks.records.get(subtask_id))
            .cloned()
    }

    /// All records of a task, in registration order.
    pub fn records(&self, task_id: &str) -> Vec<LockRecord> {
        let table = self.lock_table();
        let Some(locks) = table.get(task_id) else {
            return Vec::new();
        };
        locks
            .order
            .iter()
            .filter_map(|id| locks.records.get(id))
            .cloned()
            .collect()
    }

    /// True when every subtask of the task reached a terminal state.
    pub fn all_terminal(&self, task_id: &str) -> bool {
        self.records(task_id)
            .iter()
            .all(|r| r.state.is_terminal())
    }

    /// Serialisable snapshot for `locks.json`.
    pub fn snapshot(&self, task_id: &str) -> LockSnapshot {
        let table = self.lock_table();
        let aborted = table.get(task_id).map(|l| l.aborted).unwrap_or_default();
        drop(table);
        LockSnapshot {
            task_id: task_id.to_string(),
            aborted,
            records: self.records(task_id),
        }
    }

    /// Rebuild a task's lock table from a snapshot (resume path).
    pub fn restore(&self, snapshot: &LockSnapshot) -> Result<(), OrchestratorError> {
        snapshot.validate()?;
        let mut table = self.lock_table();
        let entry = table.entry(snapshot.task_id.clone()).or_default();
        entry.aborted = snapshot.aborted;
        entry.order = snapshot
            .records
            .iter()
            .map(|r| r.subtask_id.clone())
            .collect();
        entry.records = snapshot
            .records
            .iter()
            .map(|r| (r.subtask_id.clone(), r.clone()))
            .collect();
        Ok(())
    }

    /// Drop a finished task's table.
    pub fn forget(&self, task_id: &str) {
        self.lock_table().remove(task_id);
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, HashMap<String, TaskLocks>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn known_task<'a>(
    table: &'a mut HashMap<String, TaskLocks>,
    task_id: &str,
) -> Result<&'a mut TaskLocks, OrchestratorError> {
    table
        .get_mut(task_id)
        .ok_or_else(|| OrchestratorError::Integrity(format!("unknown task '{task_id}'")))
}

fn known_subtask<'a>(
    locks: &'a mut TaskLocks,
    task_id: &str,
    subtask_id: &str,
) -> Result<&'a mut LockRecord, OrchestratorError> {
    locks.records.get_mut(subtask_id).ok_or_else(|| {
        OrchestratorError::Integrity(format!(
            "unknown subtask '{subtask_id}' in task '{task_id}'"
        ))
    })
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
