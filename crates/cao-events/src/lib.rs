//! Append-only, file-backed event bus: one JSONL log per task, exactly
//! one writer.
//!
//! Event ids are strictly increasing without gaps within a task; their
//! order is the ground truth for audit and resumption. Opening an existing
//! log resumes the id sequence and truncates a partial trailing line left
//! by a crashed writer.

mod kind;
mod query;

pub use kind::EventKind;
pub use query::{EventFilter, query, read_log};

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::mpsc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const EVENTS_FILE_NAME: &str = "events.log";

/// One durable event record. The JSON key set is a stable on-disk
/// interface: `{ id, ts, kind, taskId, subtaskId?, payload }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "subtaskId", default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

#[derive(Deserialize)]
struct EventIdOnly {
    id: u64,
}

struct Subscriber {
    kinds: Option<Vec<EventKind>>,
    tx: mpsc::Sender<Event>,
}

struct BusInner {
    file: Option<File>,
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Per-task event bus. Cloneable across the engine via `Arc`.
pub struct EventBus {
    task_id: String,
    path: PathBuf,
    inner: Mutex<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("task_id", &self.task_id)
            .field("path", &self.path)
            .finish()
    }
}

impl EventBus {
    /// Open (or create) the event log under a task directory.
    pub fn open(task_dir: &Path, task_id: &str) -> Result<Self> {
        let path = task_dir.join(EVENTS_FILE_NAME);
        std::fs::create_dir_all(task_dir)
            .with_context(|| format!("failed to create task dir: {}", task_dir.display()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .with_context(|| format!("failed to open event log: {}", path.display()))?;

        truncate_partial_trailing_line(&path, &mut file)
            .with_context(|| format!("failed to repair event log tail: {}", path.display()))?;
        let next_id = next_id_from_log(&path)?;

        Ok(Self {
            task_id: task_id.to_string(),
            path,
            inner: Mutex::new(BusInner {
                file: Some(file),
                next_id,
                subscribers: Vec::new(),
            }),
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn log_path(&self) -> &Path {
        &self.path
    }

    /// Append one event: assign the next id, timestamp it, persist the
    /// line, then notify in-process subscribers synchronously.
    ///
    /// The id is consumed only when the write succeeds, keeping the
    /// sequence gap-free.
    pub fn publish(
        &self,
        kind: EventKind,
        subtask_id: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<Event> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let event = Event {
            id: inner.next_id,
            ts: Utc::now(),
            kind,
            task_id: self.task_id.clone(),
            subtask_id: subtask_id.map(|s| s.to_string()),
            payload,
        };

        let mut line = serde_json::to_vec(&event).context("failed to serialize event")?;
        line.push(b'\n');

        let file = inner
            .file
            .as_mut()
            .context("event log writer is unavailable")?;
        file.write_all(&line)
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        inner.next_id += 1;

        inner.subscribers.retain(|sub| {
            let wanted = sub
                .kinds
                .as_ref()
                .is_none_or(|kinds| kinds.contains(&event.kind));
            if !wanted {
                return true;
            }
            // Drop subscribers whose receiver went away.
            sub.tx.send(event.clone()).is_ok()
        });

        Ok(event)
    }

    /// In-process subscription; events arrive on the returned receiver in
    /// publish order. `kinds = None` subscribes to everything.
    pub fn subscribe(&self, kinds: Option<Vec<EventKind>>) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel();
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscribers
            .push(Subscriber { kinds, tx });
        rx
    }

    /// Read back this task's events with a filter.
    pub fn query(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        query(&self.path, filter)
    }
}

/// Drop any partial trailing line (no terminating `\n`) left by a crash.
fn truncate_partial_trailing_line(path: &Path, file: &mut File) -> std::io::Result<()> {
    let file_len = file.metadata()?.len();
    if file_len == 0 {
        return Ok(());
    }

    file.seek(SeekFrom::End(-1))?;
    let mut last_byte = [0_u8; 1];
    file.read_exact(&mut last_byte)?;
    if last_byte[0] == b'\n' {
        file.seek(SeekFrom::End(0))?;
        return Ok(());
    }

    let bytes = std::fs::read(path)?;
    let truncate_len = bytes
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0_u64, |pos| pos as u64 + 1);
    file.set_len(truncate_len)?;
    file.seek(SeekFrom::End(0))?;
    Ok(())
}

/// Resume point: one past the last valid id in the log.
fn next_id_from_log(path: &Path) -> Result<u64> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };

    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut next_id = 0_u64;
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        match serde_json::from_str::<EventIdOnly>(line.trim_end()) {
            Ok(parsed) => next_id = parsed.id + 1,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping corrupt event line");
            }
        }
    }
    Ok(next_id)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
