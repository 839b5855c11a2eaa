//! Optional persistence of the last scan (`sessions-index.cache`).

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SessionRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIndexCache {
    pub scanned_at: DateTime<Utc>,
    pub records: Vec<SessionRecord>,
}

impl SessionIndexCache {
    pub fn is_fresh(&self, max_age: chrono::Duration) -> bool {
        Utc::now().signed_duration_since(self.scanned_at) < max_age
    }
}

pub fn save_cache(path: &Path, records: &[SessionRecord]) -> Result<()> {
    let cache = SessionIndexCache {
        scanned_at: Utc::now(),
        records: records.to_vec(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string(&cache).context("failed to serialize session cache")?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn load_cache(path: &Path) -> Option<SessionIndexCache> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cao_core::AssistantName;
    use std::path::PathBuf;

    fn record() -> SessionRecord {
        SessionRecord {
            assistant: AssistantName::Claude,
            session_id: "s".to_string(),
            project_path: None,
            project_known: true,
            modified: Utc::now(),
            message_count: None,
            excerpt: String::new(),
            fingerprint: "f".to_string(),
            path: PathBuf::from("/x"),
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sessions-index.cache");
        save_cache(&path, &[record()]).unwrap();

        let cache = load_cache(&path).unwrap();
        assert_eq!(cache.records.len(), 1);
        assert!(cache.is_fresh(chrono::Duration::minutes(5)));
    }

    #[test]
    fn test_load_missing_or_corrupt_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_cache(&tmp.path().join("nope")).is_none());
        let path = tmp.path().join("bad");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_cache(&path).is_none());
    }
}
