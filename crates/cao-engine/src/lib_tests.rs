use super::*;
use cao_events::read_log;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

struct TestEnv {
    engine: Engine,
    cache: Arc<HelpCache>,
    streamed: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
    /// Keeps the stub scripts and cache file alive for the test duration.
    _stub_dir: tempfile::TempDir,
    task_dir: tempfile::TempDir,
    work_dir: tempfile::TempDir,
}

impl TestEnv {
    fn request(&self, prompt: &str, candidates: Vec<AssistantName>) -> TaskRequest {
        let mut request = TaskRequest::new(prompt, candidates, self.work_dir.path().to_path_buf());
        request.task_dir = Some(self.task_dir.path().to_path_buf());
        request.subtask_timeout = Duration::from_secs(20);
        request.task_timeout = Duration::from_secs(60);
        request
    }

    fn events(&self) -> Vec<cao_events::Event> {
        read_log(&self.task_dir.path().join(cao_events::EVENTS_FILE_NAME)).unwrap()
    }

    fn streamed_text(&self) -> String {
        String::from_utf8(self.streamed.lock().unwrap().clone()).unwrap()
    }
}

/// Stub assistant script: answers --version/--help like a flagged-prompt
/// CLI, then runs `body` for real invocations (`$2` is the prompt).
fn write_stub(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    let script = format!(
        "#!/bin/sh\n\
         if [ \"$1\" = \"--version\" ]; then echo 1.0.0; exit 0; fi\n\
         if [ \"$1\" = \"--help\" ]; then\n\
         echo 'Usage: stub [options] [prompt]'\n\
         echo ''\n\
         echo 'Options:'\n\
         echo '  -p, --print   Print response and exit'\n\
         exit 0\n\
         fi\n\
         {body}\n"
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

/// Build an engine whose assistants are shell stubs.
fn test_env(stubs: &[(AssistantName, &str)]) -> TestEnv {
    let stub_dir = tempfile::tempdir().unwrap();
    let task_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();

    let mut config = GlobalConfig::default();
    for (assistant, body) in stubs {
        let exe = write_stub(stub_dir.path(), &format!("stub-{assistant}"), body);
        config.assistants.insert(
            assistant.as_str().to_string(),
            cao_config::AssistantOverride {
                executable: Some(exe),
                env: Default::default(),
                disabled: false,
            },
        );
    }

    let cache = Arc::new(HelpCache::new(stub_dir.path().join("help-cache.json")));
    let (sink, streamed) = TermSink::memory();
    TestEnv {
        engine: Engine::new(config, cache.clone(), sink),
        cache,
        streamed,
        _stub_dir: stub_dir,
        task_dir,
        work_dir,
    }
}

fn kinds(events: &[cao_events::Event]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}

#[tokio::test]
async fn test_parallel_fanout_succeeds_with_prefixed_streams() {
    let env = test_env(&[
        (AssistantName::Qwen, "echo \"qwen says: $2\""),
        (AssistantName::Claude, "echo \"claude says: $2\""),
        (AssistantName::Gemini, "echo \"gemini says: $2\""),
    ]);
    let request = env.request(
        "explain closures",
        vec![AssistantName::Qwen, AssistantName::Claude, AssistantName::Gemini],
    );

    let report = env.engine.run_task(request).await.unwrap();
    assert_eq!(report.state, TaskState::Succeeded);
    assert_eq!(report.exit_code(), 0);
    assert_eq!((report.total, report.succeeded), (3, 3));

    let events = env.events();
    let kind_list = kinds(&events);
    assert_eq!(
        kind_list
            .iter()
            .filter(|k| **k == EventKind::LockGranted)
            .count(),
        3
    );
    assert_eq!(
        kind_list
            .iter()
            .filter(|k| **k == EventKind::LockDenied)
            .count(),
        0
    );
    assert_eq!(
        kind_list
            .iter()
            .filter(|k| **k == EventKind::SubtaskCompleted)
            .count(),
        3
    );
    assert_eq!(*kind_list.last().unwrap(), EventKind::TaskCompleted);

    let streamed = env.streamed_text();
    assert!(streamed.contains("[qwen] qwen says: explain closures"));
    assert!(streamed.contains("[claude] claude says: explain closures"));
    assert!(streamed.contains("[gemini] gemini says: explain closures"));

    // Planning files were maintained alongside.
    let taskfiles = cao_taskfiles::TaskFiles::open(env.task_dir.path(), &report.task_id);
    assert!(taskfiles.read(cao_taskfiles::PLAN_FILE).unwrap().contains("assistant=claude"));
    assert!(taskfiles
        .read(cao_taskfiles::FINDINGS_FILE)
        .unwrap()
        .contains("claude says: explain closures"));
    assert_eq!(taskfiles.progress_entries().unwrap().len(), 6);

    // Lock snapshot for resume.
    let snapshot =
        cao_lock::LockSnapshot::load(&env.task_dir.path().join("locks.json")).unwrap();
    assert_eq!(snapshot.records.len(), 3);
}

#[tokio::test]
async fn test_event_ids_are_gapless_and_ordered() {
    let env = test_env(&[(AssistantName::Claude, "echo ok")]);
    let request = env.request("do it", vec![AssistantName::Claude]);
    env.engine.run_task(request).await.unwrap();

    let events = env.events();
    for (index, event) in events.iter().enumerate() {
        assert_eq!(event.id, index as u64);
    }
}

#[tokio::test]
async fn test_file_conflict_serialises_then_both_succeed() {
    let env = test_env(&[
        (AssistantName::Claude, "echo claude done"),
        (AssistantName::Gemini, "echo gemini done"),
    ]);
    let mut request = env.request("touch util", vec![AssistantName::Claude, AssistantName::Gemini]);
    let shared: BTreeSet<String> = ["src/util.js".to_string()].into_iter().collect();
    request.declared_files.insert(AssistantName::Claude, shared.clone());
    request.declared_files.insert(AssistantName::Gemini, shared);

    let report = env.engine.run_task(request).await.unwrap();
    assert_eq!(report.state, TaskState::Succeeded);
    assert_eq!(report.succeeded, 2);

    let events = env.events();
    let denied: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::LockDenied)
        .collect();
    assert!(!denied.is_empty());
    assert_eq!(denied[0].payload["kind"], serde_json::json!("file-conflict"));
    assert_eq!(denied[0].payload["files"][0], serde_json::json!("src/util.js"));

    // Replay invariant: the second grant only happens after the first
    // subtask's completion is already persisted.
    let grants: Vec<u64> = events
        .iter()
        .filter(|e| e.kind == EventKind::LockGranted)
        .map(|e| e.id)
        .collect();
    let first_completion = events
        .iter()
        .find(|e| e.kind == EventKind::SubtaskCompleted)
        .map(|e| e.id)
        .unwrap();
    assert_eq!(grants.len(), 2);
    assert!(grants[1] > first_completion);

    // Full replay reproduces the lock table's final states and confirms
    // the files-disjoint-when-concurrent invariant over the whole log.
    let replayed = replay(&events).unwrap();
    let snapshot =
        cao_lock::LockSnapshot::load(&env.task_dir.path().join("locks.json")).unwrap();
    for record in &snapshot.records {
        assert_eq!(
            replayed.subtasks[&record.subtask_id].state, record.state,
            "replayed state diverges for {}",
            record.subtask_id
        );
    }
}

#[tokio::test]
async fn test_sequential_chain_skips_after_spawn_failure() {
    let mut env = test_env(&[
        (AssistantName::Gemini, "echo unused"),
        (AssistantName::Qwen, "echo unused"),
    ]);
    // Point claude at a missing binary to force a spawn failure.
    env.engine.config.assistants.insert(
        AssistantName::Claude.as_str().to_string(),
        cao_config::AssistantOverride {
            executable: Some("/nonexistent/claude-missing".to_string()),
            env: Default::default(),
            disabled: false,
        },
    );

    let mut request = env.request(
        "chain",
        vec![AssistantName::Claude, AssistantName::Gemini, AssistantName::Qwen],
    );
    request.mode = ExecutionMode::Sequential;

    let report = env.engine.run_task(request).await.unwrap();
    assert_eq!(report.state, TaskState::Failed);
    assert_eq!(report.exit_code(), 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 2);

    assert_eq!(report.subtasks[0].reason, Some(FailureReason::Spawn));
    assert_eq!(report.subtasks[1].state, SubtaskState::Skipped);
    assert_eq!(report.subtasks[2].state, SubtaskState::Skipped);

    let events = env.events();
    let failures: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::SubtaskFailed)
        .collect();
    assert_eq!(failures.len(), 3);
    assert_eq!(
        failures[1].payload["reason"],
        serde_json::json!("dependency-failure")
    );
}

#[tokio::test]
async fn test_subtask_timeout_maps_to_exit_4() {
    let env = test_env(&[(AssistantName::Claude, "sleep 30")]);
    let mut request = env.request("slow", vec![AssistantName::Claude]);
    request.subtask_timeout = Duration::from_millis(200);

    let started = std::time::Instant::now();
    let report = env.engine.run_task(request).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));

    assert_eq!(report.state, TaskState::Failed);
    assert!(report.timed_out);
    assert_eq!(report.exit_code(), 4);
    assert_eq!(report.subtasks[0].reason, Some(FailureReason::Timeout));

    let events = env.events();
    let failure = events
        .iter()
        .find(|e| e.kind == EventKind::SubtaskFailed)
        .unwrap();
    assert_eq!(failure.payload["reason"], serde_json::json!("timeout"));
}

#[tokio::test]
async fn test_zero_candidates_fails_immediately() {
    let env = test_env(&[]);
    let request = env.request("anything", vec![]);
    let report = env.engine.run_task(request).await.unwrap();

    assert_eq!(report.state, TaskState::Failed);
    assert_eq!(report.exit_code(), 3);
    assert_eq!(report.total, 0);

    let events = env.events();
    assert_eq!(
        kinds(&events),
        vec![EventKind::TaskCreated, EventKind::TaskFailed]
    );
    assert_eq!(events[1].payload["reason"], serde_json::json!("no-candidates"));
}

#[tokio::test]
async fn test_disabled_assistant_is_filtered_out() {
    let mut env = test_env(&[(AssistantName::Claude, "echo ok")]);
    if let Some(entry) = env
        .engine
        .config
        .assistants
        .get_mut(AssistantName::Claude.as_str())
    {
        entry.disabled = true;
    }
    let request = env.request("anything", vec![AssistantName::Claude]);
    let report = env.engine.run_task(request).await.unwrap();
    assert_eq!(report.state, TaskState::Failed);
    assert_eq!(report.total, 0);
}

#[tokio::test]
async fn test_single_candidate_parallel_equals_sequential() {
    for mode in [ExecutionMode::Parallel, ExecutionMode::Sequential] {
        let env = test_env(&[(AssistantName::Codex, "echo one")]);
        let mut request = env.request("solo", vec![AssistantName::Codex]);
        request.mode = mode;
        let report = env.engine.run_task(request).await.unwrap();
        assert_eq!(report.state, TaskState::Succeeded, "mode {mode}");
        assert_eq!((report.total, report.succeeded), (1, 1), "mode {mode}");
    }
}

#[tokio::test]
async fn test_usage_error_exit_invalidates_help_cache() {
    let env = test_env(&[(AssistantName::Claude, "exit 2")]);
    let request = env.request("bad usage", vec![AssistantName::Claude]);
    let report = env.engine.run_task(request).await.unwrap();

    assert_eq!(report.state, TaskState::Failed);
    assert_eq!(report.subtasks[0].reason, Some(FailureReason::NonZeroExit));
    // The entry was cached during the run, then dropped on the usage error.
    assert!(env.cache.peek("claude").is_none());
}

#[tokio::test]
async fn test_partial_failure_maps_to_exit_2() {
    let env = test_env(&[
        (AssistantName::Claude, "echo good"),
        (AssistantName::Gemini, "exit 1"),
    ]);
    let request = env.request("mixed", vec![AssistantName::Claude, AssistantName::Gemini]);
    let report = env.engine.run_task(request).await.unwrap();

    assert_eq!(report.state, TaskState::PartiallyFailed);
    assert_eq!(report.exit_code(), 2);
    assert_eq!((report.succeeded, report.failed), (1, 1));
}

#[tokio::test]
async fn test_user_abort_cancels_task_with_exit_5() {
    let env = test_env(&[(AssistantName::Claude, "sleep 30")]);
    let (tx, rx) = watch::channel(false);
    let mut request = env.request("long", vec![AssistantName::Claude]);
    request.abort = Some(rx);

    let engine_task = async { env.engine.run_task(request).await };
    let trigger = async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = tx.send(true);
    };
    let (report, ()) = tokio::join!(engine_task, trigger);
    let report = report.unwrap();

    assert_eq!(report.state, TaskState::Cancelled);
    assert_eq!(report.exit_code(), 5);

    let events = env.events();
    let cancelled = events
        .iter()
        .find(|e| e.kind == EventKind::TaskCancelled)
        .unwrap();
    assert_eq!(cancelled.payload["reason"], serde_json::json!("user-abort"));
}

#[tokio::test]
async fn test_worktree_isolated_subtask_merges_back() {
    let env = test_env(&[(
        AssistantName::Claude,
        "echo generated > generated.txt; echo wrote file",
    )]);

    // The work dir must be a git repository for worktrees.
    let repo = env.work_dir.path();
    for args in [
        vec!["init", "-b", "main"],
        vec!["config", "user.email", "cao@localhost"],
        vec!["config", "user.name", "cao test"],
    ] {
        let status = std::process::Command::new("git")
            .args(&args)
            .current_dir(repo)
            .status()
            .unwrap();
        assert!(status.success());
    }
    std::fs::write(repo.join("seed.txt"), "seed\n").unwrap();
    for args in [vec!["add", "-A"], vec!["commit", "-m", "seed"]] {
        let status = std::process::Command::new("git")
            .args(&args)
            .current_dir(repo)
            .status()
            .unwrap();
        assert!(status.success());
    }

    let mut request = env.request("write a file", vec![AssistantName::Claude]);
    request.merge_strategy = Some(MergeStrategy::Squash);
    request.declared_files.insert(
        AssistantName::Claude,
        ["generated.txt".to_string()].into_iter().collect(),
    );

    let report = env.engine.run_task(request).await.unwrap();
    assert_eq!(report.state, TaskState::Succeeded);
    assert_eq!(
        std::fs::read_to_string(repo.join("generated.txt")).unwrap(),
        "generated\n"
    );
}

#[test]
fn test_resolve_candidates_routes_or_falls_back() {
    let config = GlobalConfig::default();

    let (candidates, residual) =
        resolve_candidates(&config, "use claude to fix the build", None).unwrap();
    assert_eq!(candidates, vec![AssistantName::Claude]);
    assert_eq!(residual, "fix the build");

    let (candidates, residual) = resolve_candidates(
        &config,
        "explain closures",
        Some(vec![AssistantName::Qwen, AssistantName::Gemini]),
    )
    .unwrap();
    assert_eq!(candidates.len(), 2);
    assert_eq!(residual, "explain closures");

    let mut with_default = GlobalConfig::default();
    with_default.defaults.default_assistant = Some(AssistantName::Codex);
    let (candidates, _) = resolve_candidates(&with_default, "explain closures", None).unwrap();
    assert_eq!(candidates, vec![AssistantName::Codex]);

    let err = resolve_candidates(&config, "explain closures", None).unwrap_err();
    assert_eq!(err.exit_code(), 64);
}
