//! Lock-table snapshots (`locks.json`), for audit and resume.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use cao_core::OrchestratorError;

use crate::LockRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub task_id: String,
    pub aborted: bool,
    pub records: Vec<LockRecord>,
}

impl LockSnapshot {
    /// Cross-reference check: every dependency must name a subtask that is
    /// present in the snapshot.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        for record in &self.records {
            for dep in &record.dependencies {
                if !self.records.iter().any(|r| &r.subtask_id == dep) {
                    return Err(OrchestratorError::Integrity(format!(
                        "lock snapshot for task '{}' references unknown subtask '{dep}'",
                        self.task_id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize locks")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let snapshot: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(snapshot)
    }
}
