//! Walking assistant session directories into [`SessionRecord`]s.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use cao_core::{ALL_ASSISTANTS, AssistantName, descriptor};

use crate::SessionRecord;

/// How far back the scan looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    All,
    Today,
    LastDays(u32),
}

/// Scan filters; all conjunctive.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Restrict to these assistants (None = all).
    pub assistants: Option<Vec<AssistantName>>,
    /// Keep only records belonging to this project (records without
    /// project info are kept, flagged via `project_known = false`).
    pub project: Option<PathBuf>,
    pub window: Option<TimeWindow>,
    /// Case-insensitive substring match on the content digest.
    pub digest_contains: Option<String>,
}

/// Bytes of a session file inspected for the excerpt and line count.
const HEAD_READ_LIMIT: usize = 256 * 1024;
const EXCERPT_MAX_CHARS: usize = 80;

/// Walk every candidate session directory and produce the unified list,
/// most recent first.
pub fn scan(home: &Path, options: &ScanOptions) -> Result<Vec<SessionRecord>> {
    let mut records = Vec::new();

    for assistant in ALL_ASSISTANTS {
        if let Some(filter) = &options.assistants {
            if !filter.contains(assistant) {
                continue;
            }
        }
        let desc = descriptor(*assistant);
        for rel in desc.session_dirs {
            let root = home.join(rel);
            if !root.is_dir() {
                continue;
            }
            let pattern = format!("{}/**/*", root.display());
            let Ok(paths) = glob::glob(&pattern) else {
                continue;
            };
            for path in paths.flatten() {
                if !path.is_file() {
                    continue;
                }
                if !is_session_file(&path) {
                    continue;
                }
                if let Some(record) = inspect(*assistant, &root, &path) {
                    records.push(record);
                }
            }
        }
    }

    records.retain(|r| keep(r, options));
    records.sort_by(|a, b| b.modified.cmp(&a.modified));
    debug!(total = records.len(), "session scan complete");
    Ok(records)
}

fn is_session_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("jsonl") | Some("json")
    )
}

fn keep(record: &SessionRecord, options: &ScanOptions) -> bool {
    if let Some(project) = &options.project {
        if !record.matches_project(project) {
            return false;
        }
    }
    match options.window {
        Some(TimeWindow::Today) => {
            if record.modified.date_naive() != Utc::now().date_naive() {
                return false;
            }
        }
        Some(TimeWindow::LastDays(days)) => {
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
            if record.modified < cutoff {
                return false;
            }
        }
        Some(TimeWindow::All) | None => {}
    }
    if let Some(needle) = &options.digest_contains {
        if !record
            .excerpt
            .to_lowercase()
            .contains(&needle.to_lowercase())
        {
            return false;
        }
    }
    true
}

fn inspect(assistant: AssistantName, root: &Path, path: &Path) -> Option<SessionRecord> {
    let metadata = std::fs::metadata(path).ok()?;
    let modified: DateTime<Utc> = metadata.modified().ok()?.into();
    let session_id = path.file_stem()?.to_string_lossy().into_owned();

    let head = read_head(path);
    let message_count = (path.extension().and_then(|e| e.to_str()) == Some("jsonl"))
        .then(|| head.lines().filter(|l| !l.trim().is_empty()).count() as u64);

    let desc = descriptor(assistant);
    let project_path = if desc.records_project_path {
        extract_project_path(assistant, root, path, &head)
    } else {
        None
    };

    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(modified.timestamp_millis().to_le_bytes());
    let fingerprint = hex_prefix(&hasher.finalize(), 16);

    Some(SessionRecord {
        assistant,
        session_id,
        project_path,
        project_known: desc.records_project_path,
        modified,
        message_count,
        excerpt: excerpt_from(&head),
        fingerprint,
        path: path.to_path_buf(),
    })
}

fn read_head(path: &Path) -> String {
    let Ok(file) = std::fs::File::open(path) else {
        return String::new();
    };
    let mut buf = Vec::with_capacity(8 * 1024);
    let mut handle = file.take(HEAD_READ_LIMIT as u64);
    if handle.read_to_end(&mut buf).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Recover the project path a session belongs to.
///
/// - Claude encodes the project in the parent directory name
///   (`~/.claude/projects/-root-crate/<uuid>.jsonl`).
/// - Codex records a `cwd` field in the first JSONL record.
fn extract_project_path(
    assistant: AssistantName,
    root: &Path,
    path: &Path,
    head: &str,
) -> Option<PathBuf> {
    match assistant {
        AssistantName::Claude => {
            let parent = path.parent()?.strip_prefix(root).ok()?;
            let name = parent.components().next()?.as_os_str().to_str()?;
            name.starts_with('-')
                .then(|| PathBuf::from(name.replace('-', "/")))
        }
        AssistantName::Codex => {
            let first_line = head.lines().find(|l| !l.trim().is_empty())?;
            let value: serde_json::Value = serde_json::from_str(first_line).ok()?;
            find_cwd(&value).map(PathBuf::from)
        }
        _ => None,
    }
}

fn find_cwd(value: &serde_json::Value) -> Option<String> {
    if let Some(cwd) = value.get("cwd").and_then(|v| v.as_str()) {
        return Some(cwd.to_string());
    }
    value
        .get("payload")
        .and_then(|p| p.get("cwd"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Short human-readable digest: the first meaningful text in the file.
fn excerpt_from(head: &str) -> String {
    for line in head.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let text = if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
            first_text_field(&value).unwrap_or_default()
        } else {
            line.to_string()
        };
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            continue;
        }
        return truncate_chars(&text, EXCERPT_MAX_CHARS);
    }
    String::new()
}

fn first_text_field(value: &serde_json::Value) -> Option<String> {
    for key in ["display", "text", "content", "prompt", "summary", "message"] {
        if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
            if !text.trim().is_empty() {
                return Some(text.to_string());
            }
        }
        // One level of nesting covers the common `{message: {content: ..}}`
        // shapes without turning this into a content indexer.
        if let Some(inner) = value.get(key) {
            if let Some(text) = inner.get("content").and_then(|v| v.as_str()) {
                if !text.trim().is_empty() {
                    return Some(text.to_string());
                }
            }
        }
    }
    None
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().nth(max).is_none() {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max).collect();
        out.push('…');
        out
    }
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}
