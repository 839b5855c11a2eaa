//! One assistant invocation: pattern lookup, argv build, optional worktree
//! isolation, execution, and outcome classification.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, warn};

use cao_core::AssistantName;
use cao_events::{EventBus, EventKind};
use cao_probe::{HelpCache, InvocationPattern, build_argv};
use cao_process::{ExecOutcome, ExecRequest, StreamMode, TermSink, execute};
use cao_worktree::{Capability, MergeOutcome, MergeStrategy, Worktree};

use crate::report::FailureReason;

pub(crate) struct SubtaskContext {
    pub task_id: String,
    pub subtask_id: String,
    pub assistant: AssistantName,
    pub prompt: String,
    pub declared_files: BTreeSet<String>,
    pub executable: String,
    pub extra_env: HashMap<String, String>,
    pub work_dir: PathBuf,
    pub task_dir: PathBuf,
    pub subtask_timeout: Duration,
    pub output_cap: usize,
    pub stream_mode: StreamMode,
    pub cancel: watch::Receiver<bool>,
    pub bus: Arc<EventBus>,
    pub cache: Arc<HelpCache>,
    pub sink: TermSink,
    pub merge_strategy: Option<MergeStrategy>,
}

pub(crate) struct SubtaskRun {
    pub subtask_id: String,
    pub assistant: AssistantName,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub reason: Option<FailureReason>,
    pub summary: String,
    /// Short stdout excerpt recorded into the findings document.
    pub excerpt: Option<String>,
    pub duration_ms: u64,
}

impl SubtaskRun {
    fn failed(ctx: &SubtaskContext, reason: FailureReason, summary: String, exit_code: Option<i32>, duration_ms: u64) -> Self {
        Self {
            subtask_id: ctx.subtask_id.clone(),
            assistant: ctx.assistant,
            success: false,
            exit_code,
            reason: Some(reason),
            summary,
            excerpt: None,
            duration_ms,
        }
    }
}

pub(crate) async fn run_subtask(ctx: SubtaskContext) -> SubtaskRun {
    let started = std::time::Instant::now();
    let descriptor = cao_core::descriptor(ctx.assistant);

    let pattern = match ctx.cache.get_pattern(descriptor, &ctx.executable).await {
        Ok(pattern) => pattern,
        Err(e) => {
            warn!(assistant = %ctx.assistant, error = %e, "help cache unavailable; using descriptor default");
            InvocationPattern::unknown(ctx.assistant.as_str(), "unknown", format!("{e:#}"))
        }
    };

    let built = build_argv(descriptor, &ctx.executable, &pattern, &ctx.prompt);
    if built.used_fallback {
        warn!(
            assistant = %ctx.assistant,
            "prompt convention unknown; using descriptor default"
        );
    }

    // Isolate code-mutating subtasks in a worktree when one was requested
    // and the VCS supports it; otherwise the file locks already serialise
    // overlapping writers.
    let mut exec_dir = ctx.work_dir.clone();
    let mut worktree: Option<(Worktree, MergeStrategy)> = None;
    if let Some(strategy) = ctx.merge_strategy {
        if !ctx.declared_files.is_empty() {
            match cao_worktree::capability(&ctx.work_dir) {
                Capability::Available => {
                    match cao_worktree::create(&ctx.work_dir, &ctx.task_dir, &ctx.subtask_id) {
                        Ok(wt) => {
                            exec_dir = wt.path.clone();
                            worktree = Some((wt, strategy));
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to create worktree; running in place");
                        }
                    }
                }
                capability => {
                    warn!(
                        ?capability,
                        "worktrees unavailable; falling back to serialised file locks"
                    );
                }
            }
        }
    }

    let _ = ctx.bus.publish(
        EventKind::SubtaskStarted,
        Some(&ctx.subtask_id),
        json!({
            "assistant": ctx.assistant,
            "argv": built.argv,
            "patternFallback": built.used_fallback,
        }),
    );

    let mut req = ExecRequest::new(ctx.assistant.as_str(), built.argv, exec_dir);
    req.timeout = ctx.subtask_timeout;
    req.output_cap = ctx.output_cap;
    req.stream_mode = ctx.stream_mode;
    req.cancel = Some(ctx.cancel.clone());
    req.spool = Some(
        ctx.task_dir
            .join(cao_config::paths::TASK_OUTPUT_DIR)
            .join(format!("{}.out", ctx.subtask_id)),
    );
    req.env_overrides = ctx.extra_env.clone();
    req.env_overrides
        .insert("CAO_TASK_ID".to_string(), ctx.task_id.clone());
    req.env_overrides
        .insert("CAO_SUBTASK_ID".to_string(), ctx.subtask_id.clone());

    let outcome = match execute(req, &ctx.sink).await {
        Ok(outcome) => outcome,
        Err(e) => {
            remove_worktree(worktree);
            return SubtaskRun::failed(
                &ctx,
                FailureReason::Spawn,
                format!("{e:#}"),
                None,
                started.elapsed().as_millis() as u64,
            );
        }
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    if outcome.timed_out {
        remove_worktree(worktree);
        return SubtaskRun::failed(
            &ctx,
            FailureReason::Timeout,
            format!("timed out after {} ms", ctx.subtask_timeout.as_millis()),
            Some(outcome.exit_code),
            duration_ms,
        );
    }
    if outcome.cancelled {
        remove_worktree(worktree);
        return SubtaskRun::failed(
            &ctx,
            FailureReason::Aborted,
            "aborted".to_string(),
            Some(outcome.exit_code),
            duration_ms,
        );
    }
    if outcome.exit_code != 0 {
        if cao_probe::is_usage_error(outcome.exit_code) {
            // A usage error usually means the cached invocation shape no
            // longer matches the installed CLI.
            if let Err(e) = ctx.cache.invalidate(ctx.assistant.as_str(), "usage-error") {
                warn!(error = %e, "failed to invalidate help cache");
            }
        }
        remove_worktree(worktree);
        return SubtaskRun::failed(
            &ctx,
            FailureReason::NonZeroExit,
            failure_summary(&outcome),
            Some(outcome.exit_code),
            duration_ms,
        );
    }

    if let Some((wt, strategy)) = worktree {
        match merge_back(&wt, strategy, &ctx.declared_files, &ctx.subtask_id) {
            Ok(None) => {
                let _ = wt.remove();
            }
            Ok(Some(conflicted)) => {
                let _ = ctx.bus.publish(
                    EventKind::ConflictDetected,
                    Some(&ctx.subtask_id),
                    json!({"files": conflicted}),
                );
                let _ = wt.remove();
                return SubtaskRun::failed(
                    &ctx,
                    FailureReason::MergeConflict,
                    format!("merge conflict: {}", conflicted.join(", ")),
                    Some(outcome.exit_code),
                    duration_ms,
                );
            }
            Err(e) => {
                let _ = wt.remove();
                return SubtaskRun::failed(
                    &ctx,
                    FailureReason::MergeConflict,
                    format!("merge failed: {e:#}"),
                    Some(outcome.exit_code),
                    duration_ms,
                );
            }
        }
    }

    debug!(subtask_id = %ctx.subtask_id, duration_ms, "subtask succeeded");
    SubtaskRun {
        subtask_id: ctx.subtask_id.clone(),
        assistant: ctx.assistant,
        success: true,
        exit_code: Some(0),
        reason: None,
        summary: outcome.summary(),
        excerpt: excerpt_of(&outcome.stdout),
        duration_ms,
    }
}

/// Commit and merge a finished worktree. `Ok(Some(files))` reports a
/// conflict; `Ok(None)` means merged (or nothing to merge).
fn merge_back(
    wt: &Worktree,
    strategy: MergeStrategy,
    declared_files: &BTreeSet<String>,
    subtask_id: &str,
) -> anyhow::Result<Option<Vec<String>>> {
    if !wt.commit_all(&format!("subtask {subtask_id}"))? {
        return Ok(None);
    }
    match wt.merge(strategy, declared_files)? {
        MergeOutcome::Conflict { files } => Ok(Some(files)),
        MergeOutcome::Merged | MergeOutcome::NothingToMerge => Ok(None),
    }
}

fn remove_worktree(worktree: Option<(Worktree, MergeStrategy)>) {
    if let Some((wt, _)) = worktree {
        if let Err(e) = wt.remove() {
            warn!(error = %e, "failed to remove worktree");
        }
    }
}

fn failure_summary(outcome: &ExecOutcome) -> String {
    let stdout_summary = outcome.summary();
    if !stdout_summary.is_empty() {
        return stdout_summary;
    }
    if let Some(line) = outcome
        .stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
    {
        return line.trim().to_string();
    }
    format!("exit code {}", outcome.exit_code)
}

/// First few stdout lines, recorded into the findings document.
fn excerpt_of(stdout: &str) -> Option<String> {
    let excerpt: Vec<&str> = stdout.lines().filter(|l| !l.trim().is_empty()).take(8).collect();
    if excerpt.is_empty() {
        None
    } else {
        Some(excerpt.join("\n"))
    }
}
