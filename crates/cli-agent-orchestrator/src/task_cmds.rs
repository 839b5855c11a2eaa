//! `cao task`: inspect and clean up recorded tasks.

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::str::FromStr;

use cao_core::OutputFormat;
use cao_events::{EventFilter, EventKind, read_log};
use cao_taskfiles::{FINDINGS_FILE, PLAN_FILE, PROGRESS_FILE, TaskFiles};

struct TaskEntry {
    task_id: String,
    dir: PathBuf,
    modified: chrono::DateTime<chrono::Utc>,
    last_kind: Option<EventKind>,
}

fn list_tasks() -> Result<Vec<TaskEntry>> {
    let root = cao_config::tasks_root();
    let mut entries = Vec::new();
    let Ok(dir) = std::fs::read_dir(&root) else {
        return Ok(entries);
    };
    for entry in dir.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let task_id = entry.file_name().to_string_lossy().into_owned();
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(chrono::DateTime::<chrono::Utc>::from)
            .unwrap_or_else(|_| chrono::Utc::now());
        let last_kind = read_log(&cao_config::paths::events_log_path(&path))
            .ok()
            .and_then(|events| events.last().map(|e| e.kind));
        entries.push(TaskEntry {
            task_id,
            dir: path,
            modified,
            last_kind,
        });
    }
    entries.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(entries)
}

pub fn handle_list(output_format: OutputFormat) -> Result<()> {
    let entries = list_tasks()?;
    match output_format {
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = entries
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "taskId": e.task_id,
                        "modified": e.modified,
                        "lastEvent": e.last_kind.map(|k| k.as_str()),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Text => {
            for entry in entries {
                println!(
                    "{}  {}  {}",
                    entry.modified.format("%Y-%m-%d %H:%M"),
                    entry.task_id,
                    entry.last_kind.map(|k| k.as_str()).unwrap_or("-"),
                );
            }
        }
    }
    Ok(())
}

pub fn handle_show(task_id: &str) -> Result<()> {
    let dir = cao_config::task_dir(task_id);
    if !dir.is_dir() {
        bail!("no recorded task '{task_id}'");
    }
    let files = TaskFiles::open(&dir, task_id);
    for name in [PLAN_FILE, FINDINGS_FILE, PROGRESS_FILE] {
        match files.read(name) {
            Ok(content) => {
                println!("{content}");
            }
            Err(_) => println!("({name} missing)\n"),
        }
    }
    Ok(())
}

pub fn handle_events(task_id: &str, kind: Option<&str>, subtask: Option<&str>) -> Result<()> {
    let dir = cao_config::task_dir(task_id);
    let log = cao_config::paths::events_log_path(&dir);
    if !log.is_file() {
        bail!("no event log for task '{task_id}'");
    }

    let filter = EventFilter {
        kinds: kind
            .map(|k| EventKind::from_str(k).map(|k| vec![k]))
            .transpose()
            .map_err(|e| anyhow::anyhow!(e))?,
        subtask_id: subtask.map(|s| s.to_string()),
        ..Default::default()
    };
    for event in cao_events::query(&log, &filter)? {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

/// Explicit cleanup: tasks are never removed automatically.
pub fn handle_cleanup(
    task_id: Option<&str>,
    all: bool,
    max_age_days: Option<u32>,
    dry_run: bool,
) -> Result<()> {
    let victims: Vec<TaskEntry> = if let Some(task_id) = task_id {
        let dir = cao_config::task_dir(task_id);
        if !dir.is_dir() {
            bail!("no recorded task '{task_id}'");
        }
        vec![TaskEntry {
            task_id: task_id.to_string(),
            dir,
            modified: chrono::Utc::now(),
            last_kind: None,
        }]
    } else if all {
        let cutoff =
            chrono::Utc::now() - chrono::Duration::days(i64::from(max_age_days.unwrap_or(30)));
        list_tasks()?
            .into_iter()
            .filter(|e| e.modified < cutoff)
            .collect()
    } else {
        bail!("pass a task id or --all");
    };

    for victim in &victims {
        if dry_run {
            println!("would remove {}", victim.dir.display());
            continue;
        }
        // Worktree leftovers hold git metadata; prune them first.
        if let Ok(cwd) = std::env::current_dir() {
            let _ = cao_worktree::cleanup_task_worktrees(&cwd, &victim.dir);
        }
        std::fs::remove_dir_all(&victim.dir)
            .with_context(|| format!("failed to remove {}", victim.dir.display()))?;
        println!("removed task {}", victim.task_id);
    }
    if victims.is_empty() {
        println!("nothing to remove");
    }
    Ok(())
}
