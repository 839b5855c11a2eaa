//! Session recovery index: a unified, read-only view over every
//! assistant's on-disk conversation history.
//!
//! The index walks each assistant's candidate session directories
//! (relative to the user home), reads metadata only — filename, mtime,
//! the first lines for an excerpt — and never rewrites an assistant's
//! files. It is not a search engine; contents are not indexed.

mod cache;
mod render;
mod scan;

pub use cache::{SessionIndexCache, load_cache, save_cache};
pub use render::{RenderFormat, render};
pub use scan::{ScanOptions, TimeWindow, scan};

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cao_core::AssistantName;

/// One discovered session history file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub assistant: AssistantName,
    pub session_id: String,
    /// Project the session belongs to, when the assistant records it.
    pub project_path: Option<PathBuf>,
    /// Whether this assistant's format carries project information at all.
    pub project_known: bool,
    pub modified: DateTime<Utc>,
    /// Line count for JSONL histories (capped read), None otherwise.
    pub message_count: Option<u64>,
    /// Short human-readable content digest (first meaningful line).
    pub excerpt: String,
    /// Stable fingerprint of (path, mtime) for the scan cache.
    pub fingerprint: String,
    pub path: PathBuf,
}

impl SessionRecord {
    /// True when the record should appear for the given project filter.
    pub fn matches_project(&self, project: &std::path::Path) -> bool {
        match (&self.project_path, self.project_known) {
            (Some(p), _) => p == project,
            // No project info stored: included regardless, with a note.
            (None, _) => true,
        }
    }
}
