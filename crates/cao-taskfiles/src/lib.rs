//! Task-planning files: the three textual documents (`plan`, `findings`,
//! `progress`) persisted per task.
//!
//! Conversation with an assistant is lossy and token-bounded; these files
//! keep the essence out-of-band so a later run (or a later human) can
//! reconstruct what was going on without replaying transcripts.
//!
//! Every update is atomic (temp file in the same directory, fsync,
//! rename) and follows a fixed template so the documents re-parse. The
//! caller publishes the matching `*-updated` event after each mutation.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use regex::Regex;

pub const PLAN_FILE: &str = "plan";
pub const FINDINGS_FILE: &str = "findings";
pub const PROGRESS_FILE: &str = "progress";

/// Handle to one task's planning files.
#[derive(Debug, Clone)]
pub struct TaskFiles {
    dir: PathBuf,
    task_id: String,
}

/// One parsed `progress` entry (newest first in the file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEntry {
    pub ts: String,
    pub subtask_id: String,
    pub from: String,
    pub to: String,
    pub note: Option<String>,
}

fn progress_entry_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^- (?P<ts>\S+) \[(?P<subtask>[^\]]+)\] (?P<from>[\w-]+) -> (?P<to>[\w-]+)(?: \((?P<note>.*)\))?$",
        )
        .unwrap()
    })
}

impl TaskFiles {
    /// Initialise the three documents under `dir`.
    pub fn create(dir: &Path, task_id: &str, prompt: &str, mode: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create task dir: {}", dir.display()))?;
        let files = Self {
            dir: dir.to_path_buf(),
            task_id: task_id.to_string(),
        };

        let ts = timestamp();
        write_atomic(
            &files.path(PLAN_FILE),
            &format!(
                "# Plan — task {task_id}\n\n- Created: {ts}\n- Mode: {mode}\n- Prompt: {prompt}\n\n## Subtasks\n\n"
            ),
        )?;
        write_atomic(
            &files.path(FINDINGS_FILE),
            &format!("# Findings — task {task_id}\n\n"),
        )?;
        write_atomic(
            &files.path(PROGRESS_FILE),
            &format!("# Progress — task {task_id}\n\n"),
        )?;
        Ok(files)
    }

    /// Handle to already-created documents (resume path).
    pub fn open(dir: &Path, task_id: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            task_id: task_id.to_string(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Append one subtask line to the plan's `## Subtasks` section.
    pub fn add_subtask(
        &self,
        subtask_id: &str,
        assistant: &str,
        files: &BTreeSet<String>,
        depends_on: &BTreeSet<String>,
    ) -> Result<()> {
        let mut plan = self.read(PLAN_FILE)?;
        if !plan.ends_with('\n') {
            plan.push('\n');
        }
        plan.push_str(&format!(
            "- [{subtask_id}] assistant={assistant} files={} depends={}\n",
            join_or_none(files),
            join_or_none(depends_on),
        ));
        write_atomic(&self.path(PLAN_FILE), &plan)
    }

    /// Append a dated findings section for one completed subtask.
    pub fn record_finding(
        &self,
        assistant: &str,
        summary: &str,
        excerpt: Option<&str>,
    ) -> Result<()> {
        let mut findings = self.read(FINDINGS_FILE)?;
        if !findings.ends_with('\n') {
            findings.push('\n');
        }
        findings.push_str(&format!("## {} — {assistant}\n\n{summary}\n", timestamp()));
        if let Some(excerpt) = excerpt {
            findings.push('\n');
            for line in excerpt.lines() {
                findings.push_str("> ");
                findings.push_str(line);
                findings.push('\n');
            }
        }
        findings.push('\n');
        write_atomic(&self.path(FINDINGS_FILE), &findings)
    }

    /// Prepend one transition line to the progress log (newest first).
    pub fn record_transition(
        &self,
        subtask_id: &str,
        from: &str,
        to: &str,
        note: Option<&str>,
    ) -> Result<()> {
        let progress = self.read(PROGRESS_FILE)?;
        let mut entry = format!("- {} [{subtask_id}] {from} -> {to}", timestamp());
        if let Some(note) = note {
            entry.push_str(&format!(" ({note})"));
        }
        entry.push('\n');

        // Header is the title line plus one blank line; entries go right
        // after it, newest on top.
        let mut lines: Vec<&str> = progress.lines().collect();
        let insert_at = lines.len().min(2);
        let entry_trimmed = entry.trim_end();
        lines.insert(insert_at, entry_trimmed);
        let mut updated = lines.join("\n");
        updated.push('\n');
        write_atomic(&self.path(PROGRESS_FILE), &updated)
    }

    pub fn read(&self, name: &str) -> Result<String> {
        let path = self.path(name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))
    }

    /// Parse the stable progress format back into entries, newest first.
    pub fn progress_entries(&self) -> Result<Vec<ProgressEntry>> {
        Ok(parse_progress(&self.read(PROGRESS_FILE)?))
    }
}

pub fn parse_progress(content: &str) -> Vec<ProgressEntry> {
    content
        .lines()
        .filter_map(|line| {
            let caps = progress_entry_re().captures(line)?;
            Some(ProgressEntry {
                ts: caps["ts"].to_string(),
                subtask_id: caps["subtask"].to_string(),
                from: caps["from"].to_string(),
                to: caps["to"].to_string(),
                note: caps.name("note").map(|m| m.as_str().to_string()),
            })
        })
        .collect()
}

fn join_or_none(set: &BTreeSet<String>) -> String {
    if set.is_empty() {
        "(none)".to_string()
    } else {
        set.iter().cloned().collect::<Vec<_>>().join(",")
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Atomic replace: write a temp file in the same directory, fsync, rename.
/// A reader always sees either the old or the new content, never a tear.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("no parent directory for {}", path.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(content.as_bytes())
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to fsync temp file for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("failed to rename into {}", path.display()))?;
    Ok(())
}
