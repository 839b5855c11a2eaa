//! Reading the event log back: full replay and filtered queries.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::{Event, EventKind};

/// Query filter; all fields are conjunctive, `None` means "any".
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kinds: Option<Vec<EventKind>>,
    pub subtask_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(subtask_id) = &self.subtask_id {
            if event.subtask_id.as_deref() != Some(subtask_id.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.ts < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.ts > until {
                return false;
            }
        }
        true
    }
}

/// Read every valid event line from a log, in file order.
pub fn read_log(path: &Path) -> Result<Vec<Event>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open event log: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut events = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => events.push(event),
            Err(err) => {
                warn!(path = %path.display(), line = line_no + 1, error = %err,
                      "skipping unparsable event line");
            }
        }
    }
    Ok(events)
}

/// Filtered read of a task's event log.
pub fn query(path: &Path, filter: &EventFilter) -> Result<Vec<Event>> {
    Ok(read_log(path)?
        .into_iter()
        .filter(|e| filter.matches(e))
        .collect())
}
