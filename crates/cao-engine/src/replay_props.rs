//! Property tests for [`replay`]: randomized task graphs and scheduling
//! interleavings, generated by a simulator that only takes legal steps.
//!
//! Legal histories must replay cleanly and reproduce the simulator's
//! final states; histories corrupted afterwards (id gaps, a grant moved
//! before its dependency's completion, overlapping concurrent grants)
//! must be rejected.

use super::*;

use chrono::Utc;
use proptest::prelude::*;
use serde_json::{Value, json};

const FILE_POOL: &[&str] = &["src/a.rs", "src/b.rs", "src/c.rs"];

fn sub_id(index: usize) -> String {
    format!("s{index}")
}

/// A randomly shaped task: dependencies only point at lower indices, so
/// the graph is a DAG by construction.
#[derive(Clone, Debug)]
struct SimPlan {
    deps: Vec<Vec<usize>>,
    files: Vec<BTreeSet<String>>,
}

fn plan_strategy() -> impl Strategy<Value = SimPlan> {
    (2usize..6).prop_flat_map(|n| {
        let dep_bits = prop::collection::vec(prop::collection::vec(any::<bool>(), n), n);
        let file_bits = prop::collection::vec(0u8..8, n);
        (dep_bits, file_bits).prop_map(move |(dep_bits, file_bits)| SimPlan {
            deps: (0..n)
                .map(|i| (0..i).filter(|j| dep_bits[i][*j]).collect())
                .collect(),
            files: file_bits
                .iter()
                .map(|bits| {
                    FILE_POOL
                        .iter()
                        .enumerate()
                        .filter(|(k, _)| bits & (1 << k) != 0)
                        .map(|(_, f)| f.to_string())
                        .collect()
                })
                .collect(),
        })
    })
}

fn decisions_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

#[derive(Default)]
struct Log {
    events: Vec<Event>,
    next_id: u64,
}

impl Log {
    fn push(&mut self, kind: EventKind, subtask: Option<usize>, payload: Value) {
        self.events.push(Event {
            id: self.next_id,
            ts: Utc::now(),
            kind,
            task_id: "t1".to_string(),
            subtask_id: subtask.map(sub_id),
            payload,
        });
        self.next_id += 1;
    }
}

/// Run the plan through a scheduler that only ever takes legal steps,
/// picking among them with the decision bytes. Returns the event history
/// and the final state per subtask.
fn simulate(plan: &SimPlan, decisions: &[u8]) -> (Vec<Event>, Vec<SubtaskState>) {
    let n = plan.deps.len();
    let mut log = Log::default();
    let mut states = vec![SubtaskState::Pending; n];

    for i in 0..n {
        let depends: Vec<String> = plan.deps[i].iter().map(|j| sub_id(*j)).collect();
        log.push(
            EventKind::SubtaskPlanned,
            Some(i),
            json!({"assistant": "claude", "files": plan.files[i], "depends": depends}),
        );
    }

    let mut step = 0usize;
    loop {
        // Skip cascade: a pending subtask whose dependency ended badly is
        // skipped the next time it is considered.
        let mut changed = true;
        while changed {
            changed = false;
            for i in 0..n {
                if states[i] == SubtaskState::Pending
                    && plan.deps[i]
                        .iter()
                        .any(|j| matches!(states[*j], SubtaskState::Failed | SubtaskState::Skipped))
                {
                    states[i] = SubtaskState::Skipped;
                    log.push(
                        EventKind::SubtaskFailed,
                        Some(i),
                        json!({"state": "skipped", "reason": "dependency-failure"}),
                    );
                    changed = true;
                }
            }
        }

        let running: Vec<usize> = (0..n)
            .filter(|i| states[*i] == SubtaskState::InProgress)
            .collect();
        let startable: Vec<usize> = (0..n)
            .filter(|&i| {
                states[i] == SubtaskState::Pending
                    && plan.deps[i]
                        .iter()
                        .all(|j| states[*j] == SubtaskState::Succeeded)
                    && running
                        .iter()
                        .all(|r| plan.files[i].is_disjoint(&plan.files[*r]))
            })
            .collect();

        if running.is_empty() && startable.is_empty() {
            break;
        }

        let d = decisions.get(step).copied().unwrap_or(0) as usize;
        step += 1;

        if !startable.is_empty() && (running.is_empty() || d % 2 == 0) {
            let i = startable[d / 2 % startable.len()];
            states[i] = SubtaskState::InProgress;
            log.push(EventKind::LockGranted, Some(i), Value::Null);
        } else {
            let i = running[d / 2 % running.len()];
            if d % 3 == 0 {
                states[i] = SubtaskState::Failed;
                log.push(
                    EventKind::SubtaskFailed,
                    Some(i),
                    json!({"reason": "non-zero-exit"}),
                );
            } else {
                states[i] = SubtaskState::Succeeded;
                log.push(EventKind::SubtaskCompleted, Some(i), Value::Null);
            }
        }
    }

    (log.events, states)
}

/// Find a lock-granted event whose subtask has a dependency completed
/// earlier in the log: (grant index, dependency completion index).
fn find_reorderable(events: &[Event]) -> Option<(usize, usize)> {
    let mut depends: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut completed_at: BTreeMap<String, usize> = BTreeMap::new();

    for (idx, event) in events.iter().enumerate() {
        let Some(id) = &event.subtask_id else {
            continue;
        };
        match event.kind {
            EventKind::SubtaskPlanned => {
                let deps = event.payload["depends"]
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();
                depends.insert(id.clone(), deps);
            }
            EventKind::SubtaskCompleted => {
                completed_at.insert(id.clone(), idx);
            }
            EventKind::LockGranted => {
                for dep in depends.get(id).into_iter().flatten() {
                    if let Some(&completion) = completed_at.get(dep) {
                        return Some((idx, completion));
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn renumber(events: &mut [Event]) {
    for (index, event) in events.iter_mut().enumerate() {
        event.id = index as u64;
    }
}

proptest! {
    #[test]
    fn legal_histories_replay_cleanly(
        plan in plan_strategy(),
        decisions in decisions_strategy(),
    ) {
        let (events, states) = simulate(&plan, &decisions);
        let replayed = replay(&events).unwrap();
        for (i, state) in states.iter().enumerate() {
            prop_assert_eq!(
                replayed.subtasks[&sub_id(i)].state,
                *state,
                "state diverges for subtask {}",
                i
            );
        }
    }

    #[test]
    fn id_gaps_are_always_rejected(
        plan in plan_strategy(),
        decisions in decisions_strategy(),
        bump in 1u64..5,
    ) {
        let (mut events, _) = simulate(&plan, &decisions);
        // At least the planned events exist, so the log is never empty.
        let last = events.len() - 1;
        events[last].id += bump;
        let err = replay(&events).unwrap_err();
        prop_assert!(err.contains("event id gap"), "unexpected error: {err}");
    }

    #[test]
    fn grants_moved_before_their_dependency_are_rejected(
        plan in plan_strategy(),
        decisions in decisions_strategy(),
    ) {
        let (events, _) = simulate(&plan, &decisions);
        // Only histories that actually granted a dependent subtask can be
        // corrupted this way; others are vacuously fine.
        if let Some((grant, completion)) = find_reorderable(&events) {
            let mut corrupted = events.clone();
            let moved = corrupted.remove(grant);
            corrupted.insert(completion, moved);
            renumber(&mut corrupted);
            prop_assert!(replay(&corrupted).is_err());
        }
    }

    #[test]
    fn overlapping_concurrent_grants_are_rejected(
        extra in plan_strategy(),
        shared in 0usize..3,
    ) {
        // Two independent subtasks declaring the same file, granted
        // concurrently, on top of an arbitrary planned population.
        let n = extra.deps.len();
        let mut log = Log::default();
        for i in 0..n {
            log.push(
                EventKind::SubtaskPlanned,
                Some(i),
                json!({"assistant": "claude", "files": [FILE_POOL[shared]], "depends": []}),
            );
        }
        log.push(EventKind::LockGranted, Some(0), Value::Null);
        log.push(EventKind::LockGranted, Some(1), Value::Null);

        let err = replay(&log.events).unwrap_err();
        prop_assert!(err.contains("overlapping files"), "unexpected error: {err}");
    }
}
