//! Parallel execution engine: orchestrates the life of a single task.
//!
//! Routing picks candidates, the lock manager decides who may run, this
//! crate decides when: a scheduling loop spawns every currently grantable
//! subtask (bounded by the concurrency cap), releases locks as children
//! finish, and re-evaluates until all subtasks are terminal or a deadline
//! escalates to abort.

mod replay;
mod report;
mod subtask;

pub use replay::{Replay, ReplayedSubtask, replay};
pub use report::{FailureReason, SubtaskReport, TaskReport};

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use cao_config::GlobalConfig;
use cao_core::{
    AssistantName, ExecutionMode, OrchestratorError, SubtaskState, TaskState, id,
};
use cao_events::{EventBus, EventKind};
use cao_lock::{AcquireOutcome, DenyReason, LockManager, SubtaskSpec};
use cao_probe::HelpCache;
use cao_process::{StreamMode, TermSink};
use cao_taskfiles::TaskFiles;
use cao_worktree::MergeStrategy;

use subtask::{SubtaskContext, SubtaskRun, run_subtask};

/// Everything needed to run one task.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Task id to use; `None` generates a fresh ULID.
    pub task_id: Option<String>,
    pub prompt: String,
    pub mode: ExecutionMode,
    pub candidates: Vec<AssistantName>,
    /// Declared file sets per candidate; empty by default (read-only).
    pub declared_files: HashMap<AssistantName, BTreeSet<String>>,
    pub max_parallel: usize,
    pub subtask_timeout: Duration,
    pub task_timeout: Duration,
    pub work_dir: PathBuf,
    /// Override of the task directory (tests); defaults to the config root.
    pub task_dir: Option<PathBuf>,
    /// Worktree isolation for subtasks with declared files.
    pub merge_strategy: Option<MergeStrategy>,
    pub stream_mode: StreamMode,
    /// User-initiated abort (Ctrl-C); flips to true once.
    pub abort: Option<watch::Receiver<bool>>,
}

impl TaskRequest {
    pub fn new(prompt: impl Into<String>, candidates: Vec<AssistantName>, work_dir: PathBuf) -> Self {
        Self {
            task_id: None,
            prompt: prompt.into(),
            mode: ExecutionMode::Parallel,
            candidates,
            declared_files: HashMap::new(),
            max_parallel: cao_config::DEFAULT_MAX_PARALLEL,
            subtask_timeout: Duration::from_secs(600),
            task_timeout: Duration::from_secs(1800),
            work_dir,
            task_dir: None,
            merge_strategy: None,
            stream_mode: StreamMode::TeePrefixed,
            abort: None,
        }
    }
}

/// Route a prompt into (candidates, residual prompt).
///
/// Explicit candidates win; otherwise the intent router decides; otherwise
/// the configured default assistant; otherwise a usage error (exit 64).
pub fn resolve_candidates(
    config: &GlobalConfig,
    prompt: &str,
    explicit: Option<Vec<AssistantName>>,
) -> Result<(Vec<AssistantName>, String), OrchestratorError> {
    if let Some(candidates) = explicit {
        return Ok((candidates, prompt.to_string()));
    }
    let routing = cao_router::route(prompt);
    if let Some(target) = routing.target {
        return Ok((vec![target], routing.residual));
    }
    if let Some(default) = config.defaults.default_assistant {
        return Ok((vec![default], prompt.trim().to_string()));
    }
    Err(OrchestratorError::Usage(
        "could not route the prompt to an assistant and no default is configured".to_string(),
    ))
}

pub struct Engine {
    config: GlobalConfig,
    help_cache: Arc<HelpCache>,
    locks: Arc<LockManager>,
    sink: TermSink,
}

impl Engine {
    pub fn new(config: GlobalConfig, help_cache: Arc<HelpCache>, sink: TermSink) -> Self {
        Self {
            config,
            help_cache,
            locks: Arc::new(LockManager::new()),
            sink,
        }
    }

    /// Run one task to completion and aggregate the result.
    ///
    /// A single subtask failure never aborts siblings; only the task
    /// deadline or a user abort escalates to `abort`.
    pub async fn run_task(&self, request: TaskRequest) -> Result<TaskReport> {
        let started = std::time::Instant::now();
        let task_id = request
            .task_id
            .clone()
            .unwrap_or_else(id::new_task_id);
        let task_dir = request
            .task_dir
            .clone()
            .unwrap_or_else(|| cao_config::task_dir(&task_id));
        let bus = Arc::new(EventBus::open(&task_dir, &task_id)?);

        bus.publish(
            EventKind::TaskCreated,
            None,
            json!({
                "prompt": request.prompt,
                "mode": request.mode,
                "candidates": request.candidates,
            }),
        )?;

        let candidates: Vec<AssistantName> = request
            .candidates
            .iter()
            .copied()
            .filter(|a| self.config.is_enabled(*a))
            .collect();
        if candidates.is_empty() {
            bus.publish(EventKind::TaskFailed, None, json!({"reason": "no-candidates"}))?;
            return Ok(TaskReport::empty_failed(
                task_id,
                started.elapsed().as_millis() as u64,
            ));
        }

        // Plan: one subtask per candidate; sequential mode chains them.
        let mut specs: Vec<SubtaskSpec> = Vec::with_capacity(candidates.len());
        let mut assistant_of: HashMap<String, AssistantName> = HashMap::new();
        let mut prev: Option<String> = None;
        for assistant in &candidates {
            let subtask_id = id::new_subtask_id();
            let mut spec = SubtaskSpec::new(&subtask_id, assistant.as_str());
            spec.declared_files = request
                .declared_files
                .get(assistant)
                .cloned()
                .unwrap_or_default();
            if request.mode == ExecutionMode::Sequential {
                if let Some(prev) = &prev {
                    spec.depends_on.insert(prev.clone());
                }
            }
            prev = Some(subtask_id.clone());
            assistant_of.insert(subtask_id, *assistant);
            specs.push(spec);
        }

        let taskfiles = TaskFiles::create(
            &task_dir,
            &task_id,
            &request.prompt,
            &request.mode.to_string(),
        )?;
        bus.publish(EventKind::PlanUpdated, None, Value::Null)?;
        for spec in &specs {
            taskfiles.add_subtask(
                &spec.subtask_id,
                &spec.assistant,
                &spec.declared_files,
                &spec.depends_on,
            )?;
            bus.publish(EventKind::PlanUpdated, Some(&spec.subtask_id), Value::Null)?;
            bus.publish(
                EventKind::SubtaskPlanned,
                Some(&spec.subtask_id),
                json!({
                    "assistant": spec.assistant,
                    "files": spec.declared_files,
                    "depends": spec.depends_on,
                }),
            )?;
        }

        self.locks.initialise(&task_id, &specs)?;
        info!(task_id, candidates = candidates.len(), mode = %request.mode, "task started");

        let max_parallel = request.max_parallel.max(1);
        let deadline = tokio::time::Instant::now() + request.task_timeout;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut abort_rx = request.abort.clone();
        let mut join_set: JoinSet<SubtaskRun> = JoinSet::new();
        let mut running = 0usize;
        let mut reports: HashMap<String, SubtaskReport> = HashMap::new();
        let mut task_timed_out = false;
        let mut user_aborted = false;

        loop {
            // Schedule everything currently grantable, bounded by the cap.
            let mut progressed = false;
            for spec in &specs {
                if running >= max_parallel {
                    break;
                }
                let Some(record) = self.locks.record(&task_id, &spec.subtask_id) else {
                    continue;
                };
                if !record.state.is_acquirable() {
                    continue;
                }

                bus.publish(EventKind::LockRequested, Some(&spec.subtask_id), Value::Null)?;
                match self.locks.try_acquire(&task_id, &spec.subtask_id)? {
                    AcquireOutcome::Granted => {
                        progressed = true;
                        bus.publish(EventKind::LockGranted, Some(&spec.subtask_id), Value::Null)?;
                        taskfiles.record_transition(
                            &spec.subtask_id,
                            &record.state.to_string(),
                            "in-progress",
                            None,
                        )?;
                        bus.publish(
                            EventKind::ProgressUpdated,
                            Some(&spec.subtask_id),
                            Value::Null,
                        )?;

                        let assistant = assistant_of[&spec.subtask_id];
                        let ctx = self.subtask_context(
                            &request,
                            &task_id,
                            &task_dir,
                            spec,
                            assistant,
                            cancel_rx.clone(),
                            bus.clone(),
                        );
                        join_set.spawn(run_subtask(ctx));
                        running += 1;
                    }
                    AcquireOutcome::Denied { reason } => {
                        bus.publish(
                            EventKind::LockDenied,
                            Some(&spec.subtask_id),
                            serde_json::to_value(&reason)?,
                        )?;
                        if let DenyReason::DependencyFailed { dependency } = &reason {
                            // try_acquire just transitioned it to skipped.
                            progressed = true;
                            taskfiles.record_transition(
                                &spec.subtask_id,
                                &record.state.to_string(),
                                "skipped",
                                Some(FailureReason::DependencyFailure.label()),
                            )?;
                            bus.publish(
                                EventKind::ProgressUpdated,
                                Some(&spec.subtask_id),
                                Value::Null,
                            )?;
                            bus.publish(
                                EventKind::SubtaskFailed,
                                Some(&spec.subtask_id),
                                json!({
                                    "state": "skipped",
                                    "reason": FailureReason::DependencyFailure.label(),
                                    "dependency": dependency,
                                }),
                            )?;
                            reports.insert(
                                spec.subtask_id.clone(),
                                SubtaskReport {
                                    subtask_id: spec.subtask_id.clone(),
                                    assistant: assistant_of[&spec.subtask_id],
                                    state: SubtaskState::Skipped,
                                    exit_code: None,
                                    reason: Some(FailureReason::DependencyFailure),
                                    duration_ms: 0,
                                    summary: format!("dependency '{dependency}' did not succeed"),
                                },
                            );
                        }
                    }
                }
            }

            if running == 0 {
                if self.locks.all_terminal(&task_id) {
                    break;
                }
                if progressed {
                    continue;
                }
                return Err(OrchestratorError::Integrity(format!(
                    "scheduling stalled for task '{task_id}'"
                ))
                .into());
            }

            tokio::select! {
                Some(joined) = join_set.join_next() => {
                    running -= 1;
                    let run = joined.context("subtask panicked")?;
                    self.finish_subtask(&task_id, &taskfiles, &bus, run, &mut reports)?;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    task_timed_out = true;
                    let _ = cancel_tx.send(true);
                    break;
                }
                aborted = wait_abort(&mut abort_rx) => {
                    if aborted {
                        user_aborted = true;
                        let _ = cancel_tx.send(true);
                        break;
                    }
                }
            }
        }

        // Abort path: drain soft-terminated children, then skip the rest.
        if task_timed_out || user_aborted {
            let reason = if user_aborted { "user-abort" } else { "task-timeout" };
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(run) => {
                        self.finish_subtask(&task_id, &taskfiles, &bus, run, &mut reports)?;
                    }
                    Err(e) => warn!(error = %e, "subtask panicked during abort"),
                }
            }
            for subtask_id in self.locks.abort(&task_id, reason) {
                taskfiles.record_transition(&subtask_id, "pending", "skipped", Some(reason))?;
                bus.publish(EventKind::ProgressUpdated, Some(&subtask_id), Value::Null)?;
                bus.publish(
                    EventKind::SubtaskFailed,
                    Some(&subtask_id),
                    json!({"state": "skipped", "reason": reason}),
                )?;
                reports.insert(
                    subtask_id.clone(),
                    SubtaskReport {
                        subtask_id: subtask_id.clone(),
                        assistant: assistant_of[&subtask_id],
                        state: SubtaskState::Skipped,
                        exit_code: None,
                        reason: Some(if user_aborted {
                            FailureReason::Aborted
                        } else {
                            FailureReason::Timeout
                        }),
                        duration_ms: 0,
                        summary: reason.to_string(),
                    },
                );
            }
            bus.publish(EventKind::TaskCancelled, None, json!({"reason": reason}))?;
        }

        // Aggregate.
        let subtasks: Vec<SubtaskReport> = specs
            .iter()
            .filter_map(|spec| reports.remove(&spec.subtask_id))
            .collect();
        let succeeded = subtasks
            .iter()
            .filter(|s| s.state == SubtaskState::Succeeded)
            .count();
        let failed = subtasks
            .iter()
            .filter(|s| s.state == SubtaskState::Failed)
            .count();
        let skipped = subtasks
            .iter()
            .filter(|s| s.state == SubtaskState::Skipped)
            .count();
        let timed_out = task_timed_out
            || subtasks
                .iter()
                .any(|s| s.reason == Some(FailureReason::Timeout));

        let state = if user_aborted && succeeded == 0 {
            TaskState::Cancelled
        } else if succeeded == subtasks.len() && !subtasks.is_empty() {
            TaskState::Succeeded
        } else if succeeded > 0 {
            TaskState::PartiallyFailed
        } else {
            TaskState::Failed
        };

        if !(task_timed_out || user_aborted) {
            let terminal_kind = if state == TaskState::Failed {
                EventKind::TaskFailed
            } else {
                EventKind::TaskCompleted
            };
            bus.publish(
                terminal_kind,
                None,
                json!({
                    "state": state,
                    "succeeded": succeeded,
                    "failed": failed,
                    "skipped": skipped,
                }),
            )?;
        }

        let snapshot = self.locks.snapshot(&task_id);
        if let Err(e) = snapshot.save(&cao_config::paths::locks_snapshot_path(&task_dir)) {
            warn!(error = %e, "failed to write lock snapshot");
        }
        self.locks.forget(&task_id);

        info!(task_id, %state, succeeded, failed, skipped, "task finished");
        Ok(TaskReport {
            task_id,
            state,
            total: subtasks.len(),
            succeeded,
            failed,
            skipped,
            timed_out,
            duration_ms: started.elapsed().as_millis() as u64,
            subtasks,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn subtask_context(
        &self,
        request: &TaskRequest,
        task_id: &str,
        task_dir: &std::path::Path,
        spec: &SubtaskSpec,
        assistant: AssistantName,
        cancel: watch::Receiver<bool>,
        bus: Arc<EventBus>,
    ) -> SubtaskContext {
        let extra_env = self
            .config
            .assistant(assistant)
            .map(|o| o.env.clone())
            .unwrap_or_default();
        SubtaskContext {
            task_id: task_id.to_string(),
            subtask_id: spec.subtask_id.clone(),
            assistant,
            prompt: request.prompt.clone(),
            declared_files: spec.declared_files.clone(),
            executable: self.config.executable(assistant),
            extra_env,
            work_dir: request.work_dir.clone(),
            task_dir: task_dir.to_path_buf(),
            subtask_timeout: request.subtask_timeout,
            output_cap: self.config.defaults.output_cap_bytes,
            stream_mode: request.stream_mode,
            cancel,
            bus,
            cache: self.help_cache.clone(),
            sink: self.sink.clone(),
            merge_strategy: request.merge_strategy,
        }
    }

    /// Release the lock and record the outcome of one finished subtask.
    fn finish_subtask(
        &self,
        task_id: &str,
        taskfiles: &TaskFiles,
        bus: &EventBus,
        run: SubtaskRun,
        reports: &mut HashMap<String, SubtaskReport>,
    ) -> Result<()> {
        let state = self.locks.release(task_id, &run.subtask_id, run.success)?;
        let note = run.reason.map(|r| r.label().to_string()).or_else(|| {
            run.exit_code.map(|c| format!("exit {c}"))
        });
        taskfiles.record_transition(
            &run.subtask_id,
            "in-progress",
            &state.to_string(),
            note.as_deref(),
        )?;
        bus.publish(EventKind::ProgressUpdated, Some(&run.subtask_id), Value::Null)?;

        if run.success {
            taskfiles.record_finding(
                run.assistant.as_str(),
                &run.summary,
                run.excerpt.as_deref(),
            )?;
            bus.publish(EventKind::FindingsUpdated, Some(&run.subtask_id), Value::Null)?;
            bus.publish(
                EventKind::SubtaskCompleted,
                Some(&run.subtask_id),
                json!({"exitCode": run.exit_code, "durationMs": run.duration_ms}),
            )?;
        } else {
            bus.publish(
                EventKind::SubtaskFailed,
                Some(&run.subtask_id),
                json!({
                    "reason": run.reason.map(|r| r.label()),
                    "exitCode": run.exit_code,
                    "durationMs": run.duration_ms,
                }),
            )?;
        }

        debug!(subtask_id = %run.subtask_id, %state, "subtask finished");
        reports.insert(
            run.subtask_id.clone(),
            SubtaskReport {
                subtask_id: run.subtask_id,
                assistant: run.assistant,
                state,
                exit_code: run.exit_code,
                reason: run.reason,
                duration_ms: run.duration_ms,
                summary: run.summary,
            },
        );
        Ok(())
    }
}

async fn wait_abort(abort: &mut Option<watch::Receiver<bool>>) -> bool {
    match abort {
        Some(rx) => {
            if *rx.borrow() {
                return true;
            }
            match rx.changed().await {
                Ok(()) => *rx.borrow(),
                Err(_) => std::future::pending().await,
            }
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
