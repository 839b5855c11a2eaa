//! Dependency-graph validation (Kahn's algorithm).

use std::collections::{HashMap, VecDeque};

use cao_core::OrchestratorError;

use crate::SubtaskSpec;

/// Reject dependency cycles before anything is registered.
///
/// Runs a BFS topological reduction; nodes still carrying in-degree after
/// the traversal form the cycle reported in the error.
pub fn validate_acyclic(specs: &[SubtaskSpec]) -> Result<(), OrchestratorError> {
    let index: HashMap<&str, usize> = specs
        .iter()
        .enumerate()
        .map(|(i, s)| (s.subtask_id.as_str(), i))
        .collect();

    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];
    let mut indegree: Vec<usize> = vec![0; specs.len()];
    for (to, spec) in specs.iter().enumerate() {
        for dep in &spec.depends_on {
            // Unknown deps are rejected by the caller before we run.
            if let Some(&from) = index.get(dep.as_str()) {
                edges[from].push(to);
                indegree[to] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = indegree
        .iter()
        .enumerate()
        .filter_map(|(i, d)| (*d == 0).then_some(i))
        .collect();
    let mut visited = 0usize;

    while let Some(node) = queue.pop_front() {
        visited += 1;
        for &next in &edges[node] {
            indegree[next] = indegree[next].saturating_sub(1);
            if indegree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if visited == specs.len() {
        Ok(())
    } else {
        let cycle: Vec<String> = indegree
            .iter()
            .enumerate()
            .filter_map(|(i, d)| (*d > 0).then(|| specs[i].subtask_id.clone()))
            .collect();
        Err(OrchestratorError::DependencyCycle(cycle))
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    /// Random graphs whose dependencies only point at lower indices —
    /// acyclic by construction.
    fn forward_graph() -> impl Strategy<Value = Vec<SubtaskSpec>> {
        (2usize..8).prop_flat_map(|n| {
            prop::collection::vec(prop::collection::vec(any::<bool>(), n), n).prop_map(
                move |bits| {
                    (0..n)
                        .map(|i| {
                            let mut spec = SubtaskSpec::new(format!("s{i}"), "claude");
                            spec.depends_on = (0..i)
                                .filter(|j| bits[i][*j])
                                .map(|j| format!("s{j}"))
                                .collect();
                            spec
                        })
                        .collect()
                },
            )
        })
    }

    proptest! {
        #[test]
        fn forward_edge_graphs_always_validate(specs in forward_graph()) {
            prop_assert!(validate_acyclic(&specs).is_ok());
        }

        #[test]
        fn injected_back_edge_is_always_rejected(
            specs in forward_graph(),
            a in 0usize..8,
            b in 0usize..8,
        ) {
            let n = specs.len();
            let (a, b) = (a % n, b % n);
            prop_assume!(a != b);
            let (lo, hi) = (a.min(b), a.max(b));

            // Close a two-cycle between lo and hi on top of whatever
            // forward edges the graph already has.
            let mut specs = specs;
            specs[hi].depends_on.insert(format!("s{lo}"));
            specs[lo].depends_on.insert(format!("s{hi}"));

            let err = validate_acyclic(&specs).unwrap_err();
            match err {
                OrchestratorError::DependencyCycle(nodes) => {
                    let lo_name = format!("s{}", lo);
                    let hi_name = format!("s{}", hi);
                    prop_assert!(nodes.contains(&lo_name));
                    prop_assert!(nodes.contains(&hi_name));
                }
                other => prop_assert!(false, "expected DependencyCycle, got {other:?}"),
            }
        }
    }
}
